use super::{
    bind_grid, finish_generation, paint_cells, DiffusionModel, Rate, Termination, INFECTED_COLOR, REMOVED_COLOR,
    SUSCEPTIBLE_COLOR,
};
use crate::grid::{Cell, Grid, ORTHOGONAL};
use crate::raster::RasterBuffer;
use anyhow::Result;
use image::Rgba;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SirState {
    #[default]
    Susceptible,
    Infected,
    /// Absorbing: a removed cell never changes again.
    Removed,
}

impl SirState {
    pub const LABELS: [&'static str; 3] = ["Susceptible", "Infected", "Removed"];

    fn slot(self) -> usize {
        self as usize
    }

    fn color(self) -> Rgba<u8> {
        match self {
            SirState::Susceptible => SUSCEPTIBLE_COLOR,
            SirState::Infected => INFECTED_COLOR,
            SirState::Removed => REMOVED_COLOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SirParams {
    /// Chance that an infected cell passes the infection to one susceptible neighbor.
    pub transmission: f64,
    pub seed: u64,
}

impl Default for SirParams {
    fn default() -> Self {
        SirParams {
            transmission: 0.5,
            seed: 131,
        }
    }
}

/// Classic susceptible/infected/removed spread. Every infected cell is removed after
/// one generation; the run ends once a generation infects nobody new.
#[derive(Debug)]
pub struct SirModel {
    params: SirParams,
    transmission: Rate,
    grid: Grid<Cell<SirState>>,
    rng: StdRng,
}

impl SirModel {
    pub fn new(params: SirParams) -> Result<Self> {
        Ok(SirModel {
            transmission: Rate::new("transmission", params.transmission)?,
            grid: Grid::default(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
        })
    }

    #[cfg(test)]
    pub fn state_at(&self, x: i64, y: i64) -> Option<SirState> {
        self.grid.get(x, y).map(|c| c.state)
    }
}

impl DiffusionModel for SirModel {
    fn name(&self) -> &'static str {
        "SIRModel"
    }

    fn configure(&mut self, raster: &RasterBuffer) {
        bind_grid(self.name(), &mut self.grid, raster);
    }

    fn reset(&mut self, raster: &mut RasterBuffer) {
        debug!("{} reset (seed {})", self.name(), self.params.seed);
        self.rng = StdRng::seed_from_u64(self.params.seed);
        self.grid.fill(Cell::new(SirState::Susceptible));

        // A single infected seed at the centre
        let (cx, cy) = (self.grid.width() as i64 / 2, self.grid.height() as i64 / 2);
        if let Some(cell) = self.grid.get_mut(cx, cy) {
            *cell = Cell::new(SirState::Infected);
        }

        raster.clear();
        paint_cells(&self.grid, raster, |c| c.state.color());
    }

    fn step(&mut self, raster: &mut RasterBuffer) -> bool {
        self.grid.stage_all();
        let mut infections = 0;

        for idx in 0..self.grid.len() {
            if self.grid.cells()[idx].state != SirState::Infected {
                continue;
            }
            self.grid.cells_mut()[idx].next = SirState::Removed;

            let (x, y) = self.grid.coords(idx);
            for n in self.grid.neighbors(x, y, ORTHOGONAL).into_iter().flatten() {
                if self.grid.cells()[n].state == SirState::Susceptible && self.transmission.draw(&mut self.rng) {
                    self.grid.cells_mut()[n].next = SirState::Infected;
                    infections += 1;
                }
            }
        }

        finish_generation(&mut self.grid, raster, |c| c.state.color());
        self.termination().is_active(infections)
    }

    fn termination(&self) -> Termination {
        Termination::WhenQuiescent
    }

    fn census(&self) -> Vec<(&'static str, u32)> {
        self.grid.census(&SirState::LABELS, |c| c.state.slot())
    }
}
