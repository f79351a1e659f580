use super::{bind_grid, finish_generation, paint_cells, DiffusionModel, Rate, Termination, INFECTED_COLOR, SUSCEPTIBLE_COLOR};
use crate::grid::{Generational, Grid, DIAGONAL, ORTHOGONAL};
use crate::raster::RasterBuffer;
use anyhow::Result;
use image::Rgba;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

// Zone layout is authored on a 300x300 reference grid and scaled to the real one
const REFERENCE_SIZE: f64 = 300.0;
const ZONE_ORIGINS: [(i64, i64); 2] = [(210, 210), (260, 260)];
const ZONE_SIZE: i64 = 40;
const RING_INSET: i64 = 5;
const OUTBREAK_ORIGIN: (i64, i64) = (250, 250);
const OUTBREAK_SIZE: i64 = 10;

/// Baseline connectivity: the four orthogonal neighbors only.
pub const BASE_DEGREE: u8 = 4;
pub const MAX_DEGREE: u8 = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CityState {
    #[default]
    Susceptible,
    Infected,
}

impl CityState {
    pub const LABELS: [&'static str; 2] = ["Susceptible", "Infected"];

    fn slot(self) -> usize {
        self as usize
    }
}

/// A resident with a connectivity degree (4..=8). Degrees above 4 unlock diagonal
/// contacts one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CityCell {
    pub state: CityState,
    pub next: CityState,
    pub degree: u8,
}

impl Default for CityCell {
    fn default() -> Self {
        CityCell {
            state: CityState::Susceptible,
            next: CityState::Susceptible,
            degree: BASE_DEGREE,
        }
    }
}

impl Generational for CityCell {
    fn stage(&mut self) {
        self.next = self.state;
    }

    fn commit(&mut self) {
        self.state = self.next;
    }
}

impl CityCell {
    fn color(&self) -> Rgba<u8> {
        match (self.state, self.degree) {
            (CityState::Infected, _) => INFECTED_COLOR,
            (CityState::Susceptible, 5) => Rgba([200, 200, 200, 255]),
            (CityState::Susceptible, 6) => Rgba([175, 175, 175, 255]),
            (CityState::Susceptible, 7) => Rgba([150, 150, 150, 255]),
            (CityState::Susceptible, 8) => Rgba([125, 125, 125, 255]),
            (CityState::Susceptible, _) => SUSCEPTIBLE_COLOR,
        }
    }

    /// Whether the diagonal at `slot` of `DIAGONAL` is reachable from this cell.
    fn reaches_diagonal(&self, slot: usize) -> bool {
        self.degree as usize > BASE_DEGREE as usize + slot
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CityParams {
    pub acceptance: f64,
    pub drop: f64,
    pub seed: u64,
}

impl Default for CityParams {
    fn default() -> Self {
        CityParams {
            acceptance: 0.27,
            drop: 0.9,
            seed: 131,
        }
    }
}

/// SIS over a city with two dense zones, each a set of nested squares whose residents
/// are increasingly connected toward the middle.
#[derive(Debug)]
pub struct SisCityModel {
    params: CityParams,
    acceptance: Rate,
    drop: Rate,
    grid: Grid<CityCell>,
    rng: StdRng,
}

impl SisCityModel {
    pub fn new(params: CityParams) -> Result<Self> {
        Ok(SisCityModel {
            acceptance: Rate::new("acceptance", params.acceptance)?,
            drop: Rate::new("drop", params.drop)?,
            grid: Grid::default(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
        })
    }

    #[cfg(test)]
    pub fn cell_at(&self, x: i64, y: i64) -> Option<CityCell> {
        self.grid.get(x, y).copied()
    }

    fn lay_out_city(&mut self) {
        let scale = self.grid.width().min(self.grid.height()) as f64 / REFERENCE_SIZE;
        let scaled = |v: i64| (v as f64 * scale).round() as i64;

        for (zx, zy) in ZONE_ORIGINS {
            let (mut x, mut y, mut size) = (zx, zy, ZONE_SIZE);
            // Outer ring first; each inner square overwrites the middle of the previous one
            for degree in BASE_DEGREE + 1..=MAX_DEGREE {
                for idx in self.grid.square(scaled(x), scaled(y), scaled(size)) {
                    self.grid.cells_mut()[idx].degree = degree;
                }
                x += RING_INSET;
                y += RING_INSET;
                size -= 2 * RING_INSET;
            }
        }

        // Clamped so the outbreak lands on the grid however small it is
        let (ox, oy) = OUTBREAK_ORIGIN;
        let ox = scaled(ox).min(self.grid.width() as i64 - 1);
        let oy = scaled(oy).min(self.grid.height() as i64 - 1);
        for idx in self.grid.square(ox, oy, scaled(OUTBREAK_SIZE).max(1)) {
            let cell = &mut self.grid.cells_mut()[idx];
            cell.state = CityState::Infected;
            cell.next = CityState::Infected;
        }
    }

    fn try_infect(&mut self, target: usize) -> bool {
        if self.grid.cells()[target].state == CityState::Susceptible && self.acceptance.draw(&mut self.rng) {
            self.grid.cells_mut()[target].next = CityState::Infected;
            return true;
        }
        false
    }
}

impl DiffusionModel for SisCityModel {
    fn name(&self) -> &'static str {
        "SISCityModel"
    }

    fn configure(&mut self, raster: &RasterBuffer) {
        bind_grid(self.name(), &mut self.grid, raster);
    }

    fn reset(&mut self, raster: &mut RasterBuffer) {
        debug!("{} reset (seed {})", self.name(), self.params.seed);
        self.rng = StdRng::seed_from_u64(self.params.seed);
        self.grid.fill(CityCell::default());
        self.lay_out_city();

        raster.clear();
        paint_cells(&self.grid, raster, CityCell::color);
    }

    fn step(&mut self, raster: &mut RasterBuffer) -> bool {
        self.grid.stage_all();
        let mut infections = 0;

        for idx in 0..self.grid.len() {
            let cell = self.grid.cells()[idx];
            if cell.state != CityState::Infected {
                continue;
            }
            if self.drop.draw(&mut self.rng) {
                self.grid.cells_mut()[idx].next = CityState::Susceptible;
            }

            let (x, y) = self.grid.coords(idx);
            for n in self.grid.neighbors(x, y, ORTHOGONAL).into_iter().flatten() {
                if self.try_infect(n) {
                    infections += 1;
                }
            }
            let diagonal = self.grid.neighbors(x, y, DIAGONAL);
            for (slot, n) in diagonal.into_iter().enumerate() {
                let Some(n) = n else { continue };
                if cell.reaches_diagonal(slot) && self.try_infect(n) {
                    infections += 1;
                }
            }
        }

        finish_generation(&mut self.grid, raster, CityCell::color);
        self.termination().is_active(infections)
    }

    fn termination(&self) -> Termination {
        Termination::WhenQuiescent
    }

    fn census(&self) -> Vec<(&'static str, u32)> {
        self.grid.census(&CityState::LABELS, |c| c.state.slot())
    }
}
