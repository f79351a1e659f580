use super::{bind_grid, DiffusionModel, Rate, Termination};
use crate::grid::{Generational, Grid, ORTHOGONAL};
use crate::raster::RasterBuffer;
use anyhow::Result;
use image::Rgba;
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub const UNAWARE_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Level colors, lowest first: orange, green, teal, purple.
pub const LEVEL_COLORS: [Rgba<u8>; 4] = [
    Rgba([255, 127, 0, 255]),
    Rgba([0, 255, 100, 255]),
    Rgba([0, 200, 200, 255]),
    Rgba([255, 0, 255, 255]),
];

pub const MAX_LEVEL: u8 = 4;

const CROWD_SIZE: i64 = 4;
const CENTRE_SPACING: i64 = 15;
const CENTRE_MARK: i64 = 2;

/// A person who may know something, and how advanced that knowledge is.
///
/// The level survives losing interest: a cell that drops back to unaware keeps its
/// level and resumes from there when it becomes aware again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KnowledgeCell {
    pub aware: bool,
    pub level: u8,
    pub next_aware: bool,
    pub next_level: u8,
    /// Knowledge centres donate but never receive or forget.
    pub centre: bool,
}

impl KnowledgeCell {
    fn centre(level: u8) -> Self {
        KnowledgeCell {
            aware: true,
            level,
            next_aware: true,
            next_level: level,
            centre: true,
        }
    }

    fn color(&self) -> Rgba<u8> {
        match self.level {
            1..=MAX_LEVEL if self.aware => LEVEL_COLORS[self.level as usize - 1],
            _ => UNAWARE_COLOR,
        }
    }

    fn slot(&self) -> usize {
        if self.aware {
            self.level.min(MAX_LEVEL) as usize
        } else {
            0
        }
    }
}

impl Generational for KnowledgeCell {
    fn stage(&mut self) {
        self.next_aware = self.aware;
        self.next_level = self.level;
    }

    fn commit(&mut self) {
        if self.centre {
            return;
        }
        self.aware = self.next_aware;
        self.level = self.next_level;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KnowledgeParams {
    /// Chance that an unaware neighbor takes on what an aware cell knows.
    pub acceptance: f64,
    /// Chance that an aware cell loses interest.
    pub drop: f64,
    pub seed: u64,
}

impl Default for KnowledgeParams {
    fn default() -> Self {
        KnowledgeParams {
            acceptance: 0.23,
            drop: 0.4,
            seed: 131,
        }
    }
}

/// Knowledge spreading in a fixed sequence of levels. A cell only advances one level
/// at a time, and only by meeting someone exactly one level ahead.
#[derive(Debug)]
pub struct KnowledgeModel {
    params: KnowledgeParams,
    acceptance: Rate,
    drop: Rate,
    grid: Grid<KnowledgeCell>,
    centres: Vec<(i64, i64)>,
    rng: StdRng,
}

impl KnowledgeModel {
    pub const LABELS: [&'static str; 5] = ["Unaware", "Orange", "Green", "Teal", "Purple"];

    pub fn new(params: KnowledgeParams) -> Result<Self> {
        Ok(KnowledgeModel {
            acceptance: Rate::new("acceptance", params.acceptance)?,
            drop: Rate::new("drop", params.drop)?,
            grid: Grid::default(),
            centres: Vec::new(),
            rng: StdRng::seed_from_u64(params.seed),
            params,
        })
    }

    #[cfg(test)]
    pub fn cell_at(&self, x: i64, y: i64) -> Option<KnowledgeCell> {
        self.grid.get(x, y).copied()
    }

    /// Coordinates of the centres placed by the last reset.
    #[cfg(test)]
    pub fn centres(&self) -> &[(i64, i64)] {
        &self.centres
    }

    fn paint(&self, raster: &mut RasterBuffer) {
        for (idx, cell) in self.grid.cells().iter().enumerate() {
            let (x, y) = self.grid.coords(idx);
            raster.plot(x, y, cell.color());
        }
        // Centres are marked larger than one cell so they stay visible
        for &(cx, cy) in &self.centres {
            let Some(cell) = self.grid.get(cx, cy) else { continue };
            let color = cell.color();
            for y in cy..cy + CENTRE_MARK {
                for x in cx..cx + CENTRE_MARK {
                    raster.plot(x, y, color);
                }
            }
        }
    }
}

impl DiffusionModel for KnowledgeModel {
    fn name(&self) -> &'static str {
        "SISKnowledgeModel"
    }

    fn configure(&mut self, raster: &RasterBuffer) {
        bind_grid(self.name(), &mut self.grid, raster);
    }

    fn reset(&mut self, raster: &mut RasterBuffer) {
        debug!("{} reset (seed {})", self.name(), self.params.seed);
        self.rng = StdRng::seed_from_u64(self.params.seed);
        self.grid.fill(KnowledgeCell::default());

        let (cx, cy) = (self.grid.width() as i64 / 2, self.grid.height() as i64 / 2);
        for idx in self.grid.square(cx, cy, CROWD_SIZE) {
            let cell = &mut self.grid.cells_mut()[idx];
            *cell = KnowledgeCell {
                aware: true,
                level: 1,
                ..KnowledgeCell::default()
            };
            cell.stage();
        }

        let name = self.name();
        self.centres.clear();
        let placements = [
            (cx, cy, 1),
            (cx + CENTRE_SPACING, cy, 2),
            (cx + CENTRE_SPACING, cy + CENTRE_SPACING, 3),
            (cx, cy + CENTRE_SPACING, 4),
        ];
        for (x, y, level) in placements {
            match self.grid.get_mut(x, y) {
                Some(cell) => {
                    *cell = KnowledgeCell::centre(level);
                    self.centres.push((x, y));
                }
                None => debug!("{} skipped level {} centre at ({}, {}): off the grid", name, level, x, y),
            }
        }

        raster.clear();
        self.paint(raster);
    }

    fn step(&mut self, raster: &mut RasterBuffer) -> bool {
        self.grid.stage_all();
        let mut newly_aware = 0;

        for idx in 0..self.grid.len() {
            let cell = self.grid.cells()[idx];
            if !cell.aware {
                continue;
            }

            let (x, y) = self.grid.coords(idx);
            for n in self.grid.neighbors(x, y, ORTHOGONAL).into_iter().flatten() {
                let neighbor = self.grid.cells()[n];
                if !neighbor.aware {
                    if self.acceptance.draw(&mut self.rng) {
                        let target = &mut self.grid.cells_mut()[n];
                        target.next_aware = true;
                        target.next_level = target.next_level.max(cell.level);
                        newly_aware += 1;
                    }
                } else if !cell.centre && neighbor.level == cell.level + 1 {
                    let me = &mut self.grid.cells_mut()[idx];
                    me.next_level = me.next_level.max(neighbor.level);
                }
            }

            if !cell.centre && self.drop.draw(&mut self.rng) {
                self.grid.cells_mut()[idx].next_aware = false;
            }
        }

        self.grid.commit_all();
        self.paint(raster);
        self.termination().is_active(newly_aware)
    }

    fn termination(&self) -> Termination {
        Termination::WhenQuiescent
    }

    fn census(&self) -> Vec<(&'static str, u32)> {
        self.grid.census(&Self::LABELS, KnowledgeCell::slot)
    }
}
