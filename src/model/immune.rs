use super::{
    bind_grid, finish_generation, paint_cells, DiffusionModel, Rate, Termination, IMMUNE_COLOR, INFECTED_COLOR,
    SUSCEPTIBLE_COLOR,
};
use crate::grid::{Cell, Grid, ORTHOGONAL};
use crate::raster::RasterBuffer;
use anyhow::Result;
use image::Rgba;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ImmuneState {
    #[default]
    Susceptible,
    Infected,
    /// No interest at all; never infected.
    Immune,
}

impl ImmuneState {
    pub const LABELS: [&'static str; 3] = ["Susceptible", "Infected", "Immune"];

    fn slot(self) -> usize {
        self as usize
    }

    fn color(self) -> Rgba<u8> {
        match self {
            ImmuneState::Susceptible => SUSCEPTIBLE_COLOR,
            ImmuneState::Infected => INFECTED_COLOR,
            ImmuneState::Immune => IMMUNE_COLOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImmuneParams {
    pub acceptance: f64,
    pub drop: f64,
    pub spontaneous: f64,
    /// Share of the population seeded as immune at reset.
    pub immunity: f64,
    pub seed: u64,
}

impl Default for ImmuneParams {
    fn default() -> Self {
        ImmuneParams {
            acceptance: 0.26,
            drop: 0.9,
            spontaneous: 0.25,
            immunity: 0.01,
            seed: 13163,
        }
    }
}

/// SIS with spontaneous onset over a population that is partly immune.
#[derive(Debug)]
pub struct SisImmuneModel {
    params: ImmuneParams,
    acceptance: Rate,
    drop: Rate,
    spontaneous: Rate,
    immunity: Rate,
    grid: Grid<Cell<ImmuneState>>,
    rng: StdRng,
}

impl SisImmuneModel {
    pub fn new(params: ImmuneParams) -> Result<Self> {
        Ok(SisImmuneModel {
            acceptance: Rate::new("acceptance", params.acceptance)?,
            drop: Rate::new("drop", params.drop)?,
            spontaneous: Rate::new("spontaneous", params.spontaneous)?,
            immunity: Rate::new("immunity", params.immunity)?,
            grid: Grid::default(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
        })
    }
}

impl DiffusionModel for SisImmuneModel {
    fn name(&self) -> &'static str {
        "SISimmuModel"
    }

    fn configure(&mut self, raster: &RasterBuffer) {
        bind_grid(self.name(), &mut self.grid, raster);
    }

    fn reset(&mut self, raster: &mut RasterBuffer) {
        debug!("{} reset (seed {})", self.name(), self.params.seed);
        self.rng = StdRng::seed_from_u64(self.params.seed);

        let immunity = self.immunity;
        let rng = &mut self.rng;
        self.grid.for_each_mut(|_, _, cell| {
            let state = if immunity.draw(rng) {
                ImmuneState::Immune
            } else {
                ImmuneState::Susceptible
            };
            *cell = Cell::new(state);
        });

        raster.clear();
        paint_cells(&self.grid, raster, |c| c.state.color());
    }

    fn step(&mut self, raster: &mut RasterBuffer) -> bool {
        self.grid.stage_all();
        let mut infections = 0;

        for idx in 0..self.grid.len() {
            if self.grid.cells()[idx].state != ImmuneState::Infected {
                continue;
            }
            if self.drop.draw(&mut self.rng) {
                self.grid.cells_mut()[idx].next = ImmuneState::Susceptible;
            }

            let (x, y) = self.grid.coords(idx);
            for n in self.grid.neighbors(x, y, ORTHOGONAL).into_iter().flatten() {
                if self.grid.cells()[n].state == ImmuneState::Susceptible && self.acceptance.draw(&mut self.rng) {
                    self.grid.cells_mut()[n].next = ImmuneState::Infected;
                    infections += 1;
                }
            }
        }

        if self.spontaneous.draw(&mut self.rng) && !self.grid.is_empty() {
            let idx = self.rng.random_range(0..self.grid.len());
            let cell = &mut self.grid.cells_mut()[idx];
            if cell.state != ImmuneState::Immune {
                cell.next = ImmuneState::Infected;
                infections += 1;
            }
        }

        finish_generation(&mut self.grid, raster, |c| c.state.color());
        self.termination().is_active(infections)
    }

    fn termination(&self) -> Termination {
        Termination::Never
    }

    fn census(&self) -> Vec<(&'static str, u32)> {
        self.grid.census(&ImmuneState::LABELS, |c| c.state.slot())
    }
}
