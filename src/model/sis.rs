use super::{
    bind_grid, finish_generation, paint_cells, DiffusionModel, Rate, Termination, INFECTED_COLOR, SUSCEPTIBLE_COLOR,
    UNDETERMINED_COLOR,
};
use crate::grid::{Cell, Grid, ORTHOGONAL};
use crate::raster::RasterBuffer;
use anyhow::Result;
use image::Rgba;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SisState {
    /// Never exposed yet; may settle into Susceptible on its own.
    #[default]
    Undetermined,
    Susceptible,
    Infected,
}

impl SisState {
    pub const LABELS: [&'static str; 3] = ["Undetermined", "Susceptible", "Infected"];

    fn slot(self) -> usize {
        self as usize
    }

    fn color(self) -> Rgba<u8> {
        match self {
            SisState::Undetermined => UNDETERMINED_COLOR,
            SisState::Susceptible => SUSCEPTIBLE_COLOR,
            SisState::Infected => INFECTED_COLOR,
        }
    }

    fn can_be_infected(self) -> bool {
        matches!(self, SisState::Undetermined | SisState::Susceptible)
    }
}

/// How infection enters the population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Onset {
    /// A 5x5 infected block centred on the grid at reset.
    CentreSeed,
    /// No seed; each generation one random cell becomes infected with this probability.
    Spontaneous(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SisParams {
    /// Chance that an infected cell infects one neighbor.
    pub acceptance: f64,
    /// Chance that an infected cell returns to susceptible.
    pub drop: f64,
    /// Chance that an undetermined cell settles into susceptible.
    pub pickup: f64,
    pub onset: Onset,
    pub seed: u64,
}

impl SisParams {
    /// Seeded SIS defaults.
    pub fn sis() -> Self {
        SisParams {
            acceptance: 0.28,
            drop: 0.9,
            pickup: 0.5,
            onset: Onset::CentreSeed,
            seed: 131,
        }
    }

    /// SIS with spontaneous onset (SISa) defaults.
    pub fn sisa() -> Self {
        SisParams {
            acceptance: 0.26,
            drop: 0.9,
            pickup: 0.5,
            onset: Onset::Spontaneous(0.5),
            seed: 13163,
        }
    }
}

/// Susceptible/infected/susceptible spread, with or without spontaneous onset.
#[derive(Debug)]
pub struct SisModel {
    params: SisParams,
    acceptance: Rate,
    drop: Rate,
    pickup: Rate,
    spontaneous: Option<Rate>,
    grid: Grid<Cell<SisState>>,
    rng: StdRng,
}

impl SisModel {
    pub fn new(params: SisParams) -> Result<Self> {
        let spontaneous = match params.onset {
            Onset::CentreSeed => None,
            Onset::Spontaneous(p) => Some(Rate::new("spontaneous", p)?),
        };
        Ok(SisModel {
            acceptance: Rate::new("acceptance", params.acceptance)?,
            drop: Rate::new("drop", params.drop)?,
            pickup: Rate::new("pickup", params.pickup)?,
            spontaneous,
            grid: Grid::default(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
        })
    }

    #[cfg(test)]
    pub fn state_at(&self, x: i64, y: i64) -> Option<SisState> {
        self.grid.get(x, y).map(|c| c.state)
    }
}

impl DiffusionModel for SisModel {
    fn name(&self) -> &'static str {
        match self.params.onset {
            Onset::CentreSeed => "SISModel",
            Onset::Spontaneous(_) => "SISaModel",
        }
    }

    fn configure(&mut self, raster: &RasterBuffer) {
        bind_grid(self.name(), &mut self.grid, raster);
    }

    fn reset(&mut self, raster: &mut RasterBuffer) {
        debug!("{} reset (seed {})", self.name(), self.params.seed);
        self.rng = StdRng::seed_from_u64(self.params.seed);
        self.grid.fill(Cell::new(SisState::Undetermined));

        if self.params.onset == Onset::CentreSeed {
            let (cx, cy) = (self.grid.width() as i64 / 2, self.grid.height() as i64 / 2);
            for idx in self.grid.square(cx - 2, cy - 2, 5) {
                self.grid.cells_mut()[idx] = Cell::new(SisState::Infected);
            }
        }

        raster.clear();
        paint_cells(&self.grid, raster, |c| c.state.color());
    }

    fn step(&mut self, raster: &mut RasterBuffer) -> bool {
        self.grid.stage_all();
        let mut infections = 0;

        for idx in 0..self.grid.len() {
            match self.grid.cells()[idx].state {
                SisState::Infected => {
                    if self.drop.draw(&mut self.rng) {
                        self.grid.cells_mut()[idx].next = SisState::Susceptible;
                    }

                    let (x, y) = self.grid.coords(idx);
                    for n in self.grid.neighbors(x, y, ORTHOGONAL).into_iter().flatten() {
                        if self.grid.cells()[n].state.can_be_infected() && self.acceptance.draw(&mut self.rng) {
                            self.grid.cells_mut()[n].next = SisState::Infected;
                            infections += 1;
                        }
                    }
                }
                SisState::Undetermined => {
                    // Infection from a neighbor wins over settling down
                    let cell = &mut self.grid.cells_mut()[idx];
                    if self.pickup.draw(&mut self.rng) && cell.next == SisState::Undetermined {
                        cell.next = SisState::Susceptible;
                    }
                }
                SisState::Susceptible => {}
            }
        }

        if let Some(spontaneous) = &self.spontaneous {
            if spontaneous.draw(&mut self.rng) && !self.grid.is_empty() {
                let idx = self.rng.random_range(0..self.grid.len());
                self.grid.cells_mut()[idx].next = SisState::Infected;
                infections += 1;
            }
        }

        finish_generation(&mut self.grid, raster, |c| c.state.color());
        self.termination().is_active(infections)
    }

    fn termination(&self) -> Termination {
        match self.params.onset {
            Onset::CentreSeed => Termination::WhenQuiescent,
            Onset::Spontaneous(_) => Termination::Never,
        }
    }

    fn census(&self) -> Vec<(&'static str, u32)> {
        self.grid.census(&SisState::LABELS, |c| c.state.slot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(width: u32, height: u32, params: SisParams) -> (SisModel, RasterBuffer) {
        let mut raster = RasterBuffer::new(width, height).unwrap();
        let mut model = SisModel::new(params).unwrap();
        model.configure(&raster);
        model.reset(&mut raster);
        (model, raster)
    }

    fn infected(model: &SisModel) -> u32 {
        model.census()[SisState::Infected.slot()].1
    }

    #[test]
    fn seeded_reset_places_a_centred_block() {
        let (model, raster) = configured(20, 20, SisParams::sis());
        assert_eq!(infected(&model), 25);
        for y in 8..=12 {
            for x in 8..=12 {
                assert_eq!(model.state_at(x, y), Some(SisState::Infected));
            }
        }
        assert_eq!(model.state_at(7, 10), Some(SisState::Undetermined));
        assert_eq!(raster.get_pixel(10, 10), Some(INFECTED_COLOR));
    }

    #[test]
    fn seed_block_is_clipped_on_tiny_grids() {
        let (model, _) = configured(3, 2, SisParams::sis());
        assert_eq!(infected(&model), 6);
    }

    #[test]
    fn spontaneous_variant_starts_clean() {
        let (model, _) = configured(10, 10, SisParams::sisa());
        assert_eq!(model.name(), "SISaModel");
        assert_eq!(infected(&model), 0);
    }

    #[test]
    fn certain_drop_and_no_spread_clears_infection() {
        let params = SisParams {
            acceptance: 0.0,
            drop: 1.0,
            pickup: 1.0,
            ..SisParams::sis()
        };
        let (mut model, mut raster) = configured(9, 9, params);

        assert!(!model.step(&mut raster));
        let census = model.census();
        assert_eq!(census, vec![("Undetermined", 0), ("Susceptible", 81), ("Infected", 0)]);
    }

    #[test]
    fn infection_overrides_pickup() {
        let params = SisParams {
            acceptance: 1.0,
            drop: 0.0,
            pickup: 1.0,
            ..SisParams::sis()
        };
        let (mut model, mut raster) = configured(9, 9, params);
        model.step(&mut raster);

        // The ring just outside the 5x5 seed is infected, not settled
        assert_eq!(model.state_at(4, 1), Some(SisState::Infected));
        assert_eq!(model.state_at(1, 4), Some(SisState::Infected));
        // Corners of that ring are only diagonal to the seed
        assert_eq!(model.state_at(1, 1), Some(SisState::Susceptible));
    }

    #[test]
    fn spontaneous_onset_never_completes() {
        let params = SisParams {
            onset: Onset::Spontaneous(0.0),
            ..SisParams::sisa()
        };
        let (mut model, mut raster) = configured(6, 6, params);
        for _ in 0..5 {
            assert!(model.step(&mut raster));
        }
        assert_eq!(infected(&model), 0);
    }

    #[test]
    fn certain_spontaneous_onset_infects_one_cell() {
        let params = SisParams {
            acceptance: 0.0,
            drop: 0.0,
            onset: Onset::Spontaneous(1.0),
            ..SisParams::sisa()
        };
        let (mut model, mut raster) = configured(6, 6, params);
        model.step(&mut raster);
        assert_eq!(infected(&model), 1);
    }

    #[test]
    fn runs_are_reproducible() {
        let run = || {
            let (mut model, mut raster) = configured(25, 25, SisParams::sisa());
            for _ in 0..30 {
                model.step(&mut raster);
            }
            model.census()
        };
        assert_eq!(run(), run());
    }
}
