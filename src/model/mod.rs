//! Diffusion models: the pluggable update rules the controller drives.
//!
//! Every variant follows the same generation-buffered shape: stage `next = state` for
//! every cell, sweep the grid reading only current states and writing only next states,
//! commit, then repaint the whole back grid.

pub mod city;
pub mod immune;
pub mod knowledge;
pub mod sir;
pub mod sis;

use crate::grid::{Generational, Grid};
use crate::raster::RasterBuffer;
use anyhow::Result;
use diffusion_common::{ModelConfig, ModelVariant};
use image::Rgba;
use log::debug;
use rand::distr::Bernoulli;
use rand::rngs::StdRng;
use rand::Rng;

pub use city::{CityParams, SisCityModel};
pub use immune::{ImmuneParams, SisImmuneModel};
pub use knowledge::{KnowledgeModel, KnowledgeParams};
pub use sir::{SirModel, SirParams};
pub use sis::{Onset, SisModel, SisParams};

// Palette shared by the SIR/SIS family
pub const INFECTED_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]); // blue
pub const SUSCEPTIBLE_COLOR: Rgba<u8> = Rgba([255, 225, 200, 255]); // skin
pub const REMOVED_COLOR: Rgba<u8> = Rgba([200, 200, 200, 255]); // light gray
pub const IMMUNE_COLOR: Rgba<u8> = Rgba([150, 150, 150, 255]); // gray
pub const UNDETERMINED_COLOR: Rgba<u8> = Rgba([200, 255, 200, 255]); // pale green

/// When a variant considers its run finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Active only while the last generation produced at least one new transition.
    WhenQuiescent,
    /// Open process; never completes on its own.
    Never,
}

impl Termination {
    pub fn is_active(self, transitions: u32) -> bool {
        match self {
            Termination::WhenQuiescent => transitions > 0,
            Termination::Never => true,
        }
    }
}

/// A named probability gating one kind of transition.
#[derive(Debug, Clone, Copy)]
pub struct Rate {
    dist: Bernoulli,
}

impl Rate {
    pub fn new(name: &str, probability: f64) -> Result<Self> {
        let dist = Bernoulli::new(probability).map_err(|e| {
            anyhow::anyhow!("{} rate must be a probability in [0, 1] (got {}): {}", name, probability, e)
        })?;
        Ok(Rate { dist })
    }

    /// One independent Bernoulli trial.
    #[inline(always)]
    pub fn draw(&self, rng: &mut StdRng) -> bool {
        rng.sample(self.dist)
    }
}

/// The capability set every diffusion variant provides to the controller.
///
/// The controller owns the raster and lends it for each call; a model only remembers
/// the dimensions it was configured with.
pub trait DiffusionModel: Send {
    /// Stable identifier used in status reports and export file names.
    fn name(&self) -> &'static str;

    /// Sizes the cell grid to the raster. Calling it again with the same dimensions
    /// keeps the existing allocation.
    fn configure(&mut self, raster: &RasterBuffer);

    /// Reseeds the random stream, restores the initial distribution, clears the back
    /// grid and paints the first frame.
    fn reset(&mut self, raster: &mut RasterBuffer);

    /// Advances one generation and repaints. Returns whether the run is still active
    /// under the variant's `termination` policy.
    fn step(&mut self, raster: &mut RasterBuffer) -> bool;

    fn termination(&self) -> Termination;

    /// Cell counts per state label, in declaration order.
    fn census(&self) -> Vec<(&'static str, u32)>;

    /// Out-of-band operator event. Returns a message for the status channel, if any.
    fn send_event(&mut self, event: &str) -> Option<String> {
        match event.trim() {
            "census" => Some(describe_census(self.name(), &self.census())),
            other => {
                debug!("{} ignored event '{}'", self.name(), other);
                None
            }
        }
    }
}

/// Builds the configured variant with its default rates, overridden by the config.
pub fn build(config: &ModelConfig) -> Result<Box<dyn DiffusionModel>> {
    let rates = &config.rates;
    let model: Box<dyn DiffusionModel> = match config.variant {
        ModelVariant::Sir => {
            let mut params = SirParams::default();
            if let Some(p) = rates.transmission {
                params.transmission = p;
            }
            params.seed = config.seed.unwrap_or(params.seed);
            Box::new(SirModel::new(params)?)
        }
        ModelVariant::Sis | ModelVariant::Sisa => {
            let mut params = if config.variant == ModelVariant::Sis {
                SisParams::sis()
            } else {
                SisParams::sisa()
            };
            if let Some(p) = rates.acceptance {
                params.acceptance = p;
            }
            if let Some(p) = rates.drop {
                params.drop = p;
            }
            if let Some(p) = rates.pickup {
                params.pickup = p;
            }
            if let (Onset::Spontaneous(rate), Some(p)) = (&mut params.onset, rates.spontaneous) {
                *rate = p;
            }
            params.seed = config.seed.unwrap_or(params.seed);
            Box::new(SisModel::new(params)?)
        }
        ModelVariant::SisImmune => {
            let mut params = ImmuneParams::default();
            if let Some(p) = rates.acceptance {
                params.acceptance = p;
            }
            if let Some(p) = rates.drop {
                params.drop = p;
            }
            if let Some(p) = rates.spontaneous {
                params.spontaneous = p;
            }
            if let Some(p) = rates.immunity {
                params.immunity = p;
            }
            params.seed = config.seed.unwrap_or(params.seed);
            Box::new(SisImmuneModel::new(params)?)
        }
        ModelVariant::SisCity => {
            let mut params = CityParams::default();
            if let Some(p) = rates.acceptance {
                params.acceptance = p;
            }
            if let Some(p) = rates.drop {
                params.drop = p;
            }
            params.seed = config.seed.unwrap_or(params.seed);
            Box::new(SisCityModel::new(params)?)
        }
        ModelVariant::Knowledge => {
            let mut params = KnowledgeParams::default();
            if let Some(p) = rates.acceptance {
                params.acceptance = p;
            }
            if let Some(p) = rates.drop {
                params.drop = p;
            }
            params.seed = config.seed.unwrap_or(params.seed);
            Box::new(KnowledgeModel::new(params)?)
        }
    };
    Ok(model)
}

/// "SIRModel census: Susceptible=10, Infected=1, Removed=0"
pub fn describe_census(name: &str, census: &[(&'static str, u32)]) -> String {
    let parts: Vec<String> = census.iter().map(|(label, n)| format!("{}={}", label, n)).collect();
    format!("{} census: {}", name, parts.join(", "))
}

/// Binds a grid to the raster's dimensions, logging when storage had to be reallocated.
pub(crate) fn bind_grid<C: Clone + Default>(name: &str, grid: &mut Grid<C>, raster: &RasterBuffer) {
    let (w, h) = raster.dimensions();
    if grid.resize_to(w, h) {
        debug!("{} allocated a {}x{} grid", name, w, h);
    }
}

/// Repaints every cell of `grid` into the back grid.
pub(crate) fn paint_cells<C>(grid: &Grid<C>, raster: &mut RasterBuffer, color_of: impl Fn(&C) -> Rgba<u8>) {
    for (idx, cell) in grid.cells().iter().enumerate() {
        let (x, y) = grid.coords(idx);
        raster.plot(x, y, color_of(cell));
    }
}

/// Commits a sweep and paints the result.
pub(crate) fn finish_generation<C: Generational>(
    grid: &mut Grid<C>,
    raster: &mut RasterBuffer,
    color_of: impl Fn(&C) -> Rgba<u8>,
) {
    grid.commit_all();
    paint_cells(grid, raster, color_of);
}

#[cfg(test)]
mod tests {
    use super::*;
    use diffusion_common::RateOverrides;

    fn config(variant: ModelVariant) -> ModelConfig {
        ModelConfig {
            variant,
            seed: None,
            rates: RateOverrides::default(),
        }
    }

    #[test]
    fn build_selects_variant_by_value() {
        let cases = [
            (ModelVariant::Sir, "SIRModel", Termination::WhenQuiescent),
            (ModelVariant::Sis, "SISModel", Termination::WhenQuiescent),
            (ModelVariant::Sisa, "SISaModel", Termination::Never),
            (ModelVariant::SisImmune, "SISimmuModel", Termination::Never),
            (ModelVariant::SisCity, "SISCityModel", Termination::WhenQuiescent),
            (ModelVariant::Knowledge, "SISKnowledgeModel", Termination::WhenQuiescent),
        ];
        for (variant, name, termination) in cases {
            let model = build(&config(variant)).unwrap();
            assert_eq!(model.name(), name);
            assert_eq!(model.termination(), termination);
        }
    }

    #[test]
    fn build_rejects_bad_override() {
        let mut cfg = config(ModelVariant::Sir);
        cfg.rates.transmission = Some(2.0);
        assert!(build(&cfg).is_err());
    }

    #[test]
    fn rate_extremes_are_certain() {
        use rand::SeedableRng;
        let mut rng = StdRng::seed_from_u64(1);
        let always = Rate::new("always", 1.0).unwrap();
        let never = Rate::new("never", 0.0).unwrap();
        assert!((0..100).all(|_| always.draw(&mut rng)));
        assert!((0..100).all(|_| !never.draw(&mut rng)));
        assert!(Rate::new("bad", -0.1).is_err());
    }

    #[test]
    fn termination_policies() {
        assert!(!Termination::WhenQuiescent.is_active(0));
        assert!(Termination::WhenQuiescent.is_active(3));
        assert!(Termination::Never.is_active(0));
    }

    #[test]
    fn census_event_is_answered() {
        let mut model = build(&config(ModelVariant::Sir)).unwrap();
        let mut raster = RasterBuffer::new(5, 5).unwrap();
        model.configure(&raster);
        model.reset(&mut raster);

        let reply = model.send_event("census").unwrap();
        assert_eq!(reply, "SIRModel census: Susceptible=24, Infected=1, Removed=0");
        assert!(model.send_event("unknown").is_none());
    }
}
