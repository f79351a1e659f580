use anyhow::Result;
use image::{Rgba, RgbaImage};
use rayon::prelude::*;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Clear color a fresh buffer starts with (mid gray).
pub const DEFAULT_CLEAR_COLOR: Rgba<u8> = Rgba([127, 127, 127, 255]);

/// Double-buffered RGBA raster.
///
/// The writer (a diffusion model, driven by the controller) owns the back grid outright
/// and paints it without any locking. The front grid sits in a shared slot that the
/// renderer reads through a [`FrontView`]. `swap` exchanges the two grids by moving
/// their storage, so no pixel data is copied and neither side can see a half-written grid.
#[derive(Debug)]
pub struct RasterBuffer {
    width: u32,
    height: u32,

    // Grid currently being written (back) and grid currently displayed (front)
    back: RgbaImage,
    front: Arc<Mutex<RgbaImage>>,

    alpha_blending: bool,

    // Pen colors
    clear_color: Rgba<u8>,
    pen_color: Rgba<u8>,
}

impl RasterBuffer {
    /// Creates a raster of `width` x `height` pixels with both grids filled with the clear color.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Raster buffer dimensions must be positive (got {}x{}).", width, height);
        }
        let back = RgbaImage::from_pixel(width, height, DEFAULT_CLEAR_COLOR);
        let front = Arc::new(Mutex::new(back.clone()));

        Ok(RasterBuffer {
            width,
            height,
            back,
            front,
            alpha_blending: false,
            clear_color: DEFAULT_CLEAR_COLOR,
            pen_color: Rgba([0, 0, 0, 255]),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Turns per-pixel alpha compositing on or off for `set_pixel`.
    pub fn enable_alpha_blending(&mut self, enable: bool) {
        self.alpha_blending = enable;
    }

    pub fn set_clear_color(&mut self, color: Rgba<u8>) {
        self.clear_color = color;
    }

    /// Sets the pen used by subsequent `set_pixel` calls.
    pub fn set_pixel_color(&mut self, color: Rgba<u8>) {
        self.pen_color = color;
    }

    /// Fills the back grid with the clear color. The front grid is untouched.
    pub fn clear(&mut self) {
        let clear = self.clear_color.0;
        let pixels: &mut [u8] = &mut self.back;
        pixels.par_chunks_mut(4).for_each(|px| px.copy_from_slice(&clear));
    }

    /// Writes the pen color into the back grid at (x, y).
    /// Coordinates outside the grid are ignored.
    pub fn set_pixel(&mut self, x: i64, y: i64) {
        let Some((x, y)) = self.in_bounds(x, y) else {
            return;
        };
        let pen = self.pen_color;
        let dst = self.back.get_pixel_mut(x, y);
        *dst = if self.alpha_blending { blend(pen, *dst) } else { pen };
    }

    /// Sets the pen color and writes it at (x, y) in one call.
    pub fn plot(&mut self, x: i64, y: i64, color: Rgba<u8>) {
        self.set_pixel_color(color);
        self.set_pixel(x, y);
    }

    /// Reads the back grid at (x, y), or `None` outside the grid.
    pub fn get_pixel(&self, x: i64, y: i64) -> Option<Rgba<u8>> {
        self.in_bounds(x, y).map(|(x, y)| *self.back.get_pixel(x, y))
    }

    /// Exchanges the roles of the two grids: what was painted becomes visible and
    /// the previously displayed grid becomes writable.
    pub fn swap(&mut self) {
        let mut front = lock(&self.front);
        std::mem::swap(&mut self.back, &mut *front);
    }

    /// The grid currently owned by the writer.
    pub fn back_pixels(&self) -> &RgbaImage {
        &self.back
    }

    /// A cloneable read handle on the grid currently on display, for the renderer thread.
    pub fn front_view(&self) -> FrontView {
        FrontView {
            width: self.width,
            height: self.height,
            slot: Arc::clone(&self.front),
        }
    }

    fn in_bounds(&self, x: i64, y: i64) -> Option<(u32, u32)> {
        let x = u32::try_from(x).ok().filter(|&x| x < self.width)?;
        let y = u32::try_from(y).ok().filter(|&y| y < self.height)?;
        Some((x, y))
    }
}

/// Read-only access to whichever grid is currently the front one.
#[derive(Debug, Clone)]
pub struct FrontView {
    width: u32,
    height: u32,
    slot: Arc<Mutex<RgbaImage>>,
}

impl FrontView {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Runs `f` against the front grid. A concurrent `swap` waits until `f` returns.
    pub fn read<R>(&self, f: impl FnOnce(&RgbaImage) -> R) -> R {
        let front = lock(&self.slot);
        f(&front)
    }

    /// Copies the front grid out.
    pub fn snapshot(&self) -> RgbaImage {
        self.read(|pixels| pixels.clone())
    }
}

// A panic while holding the front slot cannot leave a grid half-swapped, so the
// poisoned data is still a complete frame.
fn lock(slot: &Mutex<RgbaImage>) -> MutexGuard<'_, RgbaImage> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Non-premultiplied "source over" compositing; the result is always opaque.
fn blend(src: Rgba<u8>, dst: Rgba<u8>) -> Rgba<u8> {
    let a = src[3] as f32 / 255.0;
    let mix = |s: u8, d: u8| (s as f32 * a + d as f32 * (1.0 - a)).round() as u8;
    Rgba([mix(src[0], dst[0]), mix(src[1], dst[1]), mix(src[2], dst[2]), 255])
}
