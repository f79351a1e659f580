use rayon::prelude::*;

/// The four orthogonal neighbors, in sweep order: North, East, South, West.
pub const ORTHOGONAL: [(i64, i64); 4] = [(0, -1), (1, 0), (0, 1), (-1, 0)];

/// Ordinal diagonals in the order a growing connectivity degree unlocks them:
/// NE (degree > 4), SE (> 5), SW (> 6), NW (> 7).
pub const DIAGONAL: [(i64, i64); 4] = [(1, -1), (1, 1), (-1, 1), (-1, -1)];

/// A cell that keeps its current value apart from the value it will take next generation.
pub trait Generational {
    /// Copies current into next before a sweep.
    fn stage(&mut self);
    /// Copies next into current after a sweep.
    fn commit(&mut self);
}

/// Plain state/next-state pair used by most variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cell<S> {
    pub state: S,
    pub next: S,
}

impl<S: Copy> Cell<S> {
    pub fn new(state: S) -> Self {
        Cell { state, next: state }
    }
}

impl<S: Copy> Generational for Cell<S> {
    fn stage(&mut self) {
        self.next = self.state;
    }

    fn commit(&mut self) {
        self.state = self.next;
    }
}

/// Row-major 2-D cell storage. No wraparound: anything off the edge simply does not exist.
#[derive(Debug, Clone, Default)]
pub struct Grid<C> {
    width: u32,
    height: u32,
    cells: Vec<C>,
}

impl<C: Clone + Default> Grid<C> {
    pub fn new(width: u32, height: u32) -> Self {
        Grid {
            width,
            height,
            cells: vec![C::default(); width as usize * height as usize],
        }
    }

    /// Makes the grid `width` x `height`. Keeps the existing allocation when the
    /// dimensions already match. Returns whether a reallocation happened.
    pub fn resize_to(&mut self, width: u32, height: u32) -> bool {
        if self.width == width && self.height == height {
            return false;
        }
        *self = Grid::new(width, height);
        true
    }

    pub fn fill(&mut self, cell: C) {
        self.cells.iter_mut().for_each(|c| *c = cell.clone());
    }
}

impl<C> Grid<C> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Index of (x, y), or `None` outside the grid.
    #[inline(always)]
    pub fn index(&self, x: i64, y: i64) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    #[inline(always)]
    pub fn coords(&self, idx: usize) -> (i64, i64) {
        let w = self.width as usize;
        ((idx % w) as i64, (idx / w) as i64)
    }

    pub fn get(&self, x: i64, y: i64) -> Option<&C> {
        self.index(x, y).map(|i| &self.cells[i])
    }

    pub fn get_mut(&mut self, x: i64, y: i64) -> Option<&mut C> {
        self.index(x, y).map(move |i| &mut self.cells[i])
    }

    pub fn cells(&self) -> &[C] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [C] {
        &mut self.cells
    }

    /// Indices of the four cells at `offsets` from (x, y); `None` where that neighbor
    /// would fall off the grid. Slot order follows `offsets`.
    #[inline(always)]
    pub fn neighbors(&self, x: i64, y: i64, offsets: [(i64, i64); 4]) -> [Option<usize>; 4] {
        offsets.map(|(dx, dy)| self.index(x + dx, y + dy))
    }

    /// Applies `f` to every cell with its coordinates, row by row.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(i64, i64, &mut C)) {
        let w = self.width as usize;
        for (idx, cell) in self.cells.iter_mut().enumerate() {
            f((idx % w) as i64, (idx / w) as i64, cell);
        }
    }

    /// Indices of the in-bounds cells of the `size` x `size` square whose top-left
    /// corner is (x0, y0).
    pub fn square(&self, x0: i64, y0: i64, size: i64) -> Vec<usize> {
        let mut out = Vec::new();
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                if let Some(i) = self.index(x, y) {
                    out.push(i);
                }
            }
        }
        out
    }
}

impl<C: Generational> Grid<C> {
    /// Start of a generation: every cell's next value equals its current one.
    pub fn stage_all(&mut self) {
        self.cells.iter_mut().for_each(Generational::stage);
    }

    /// End of a generation: every cell takes its next value.
    pub fn commit_all(&mut self) {
        self.cells.iter_mut().for_each(Generational::commit);
    }
}

impl<C: Sync> Grid<C> {
    /// Counts cells per label. `labels` fixes the output order; `label_of` classifies a cell
    /// by its position in `labels`.
    pub fn census(
        &self,
        labels: &[&'static str],
        label_of: impl Fn(&C) -> usize + Sync,
    ) -> Vec<(&'static str, u32)> {
        let counts = self
            .cells
            .par_iter()
            .fold(
                || vec![0u32; labels.len()],
                |mut acc, cell| {
                    acc[label_of(cell)] += 1;
                    acc
                },
            )
            .reduce(
                || vec![0u32; labels.len()],
                |mut a, b| {
                    a.iter_mut().zip(b).for_each(|(x, y)| *x += y);
                    a
                },
            );
        labels.iter().copied().zip(counts).collect()
    }
}
