use crate::raster::FrontView;
use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use log::{debug, error, info, trace};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Something that can show the front grid.
pub trait Surface {
    fn present(&mut self, frame: &RgbaImage) -> Result<()>;
}

/// A display-less surface: counts frames and can drop a magnified PNG preview
/// every few frames.
#[derive(Debug)]
pub struct HeadlessSurface {
    scale: u32,
    preview_path: Option<PathBuf>,
    preview_every: u64,
    frames: u64,
}

impl HeadlessSurface {
    pub fn new(scale: u32, preview_path: Option<PathBuf>, preview_every: u64) -> Self {
        HeadlessSurface {
            scale: scale.max(1),
            preview_path,
            preview_every: preview_every.max(1),
            frames: 0,
        }
    }

    #[cfg(test)]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn write_preview(&self, frame: &RgbaImage, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create '{}'", parent.display()))?;
            }
        }
        let (w, h) = frame.dimensions();
        let scaled = if self.scale == 1 {
            frame.clone()
        } else {
            imageops::resize(frame, w * self.scale, h * self.scale, FilterType::Nearest)
        };
        scaled
            .save(path)
            .with_context(|| format!("Failed to write preview '{}'", path.display()))?;
        Ok(())
    }
}

impl Surface for HeadlessSurface {
    fn present(&mut self, frame: &RgbaImage) -> Result<()> {
        self.frames += 1;
        if let Some(path) = &self.preview_path {
            if (self.frames - 1) % self.preview_every == 0 {
                self.write_preview(frame, path)?;
                trace!("Preview frame {} written to {}", self.frames, path.display());
            }
        }
        Ok(())
    }
}

/// Presents the front grid every `frame_period` until `shutdown` is raised.
/// Returns the number of frames presented.
pub fn run_render_loop(
    view: &FrontView,
    surface: &mut dyn Surface,
    frame_period: Duration,
    shutdown: &AtomicBool,
) -> u64 {
    let (w, h) = view.dimensions();
    info!("Render loop started ({}x{}, {:.1} fps)", w, h, 1.0 / frame_period.as_secs_f64());
    let mut presented = 0;

    while !shutdown.load(Ordering::SeqCst) {
        let start = Instant::now();
        // Copy out so the controller's next swap never waits on presentation
        let frame = view.snapshot();
        match surface.present(&frame) {
            Ok(()) => presented += 1,
            Err(e) => error!("Error presenting frame: {:#}", e),
        }
        let elapsed = start.elapsed();
        thread::sleep(frame_period.saturating_sub(elapsed));
    }

    debug!("Render loop presented {} frames", presented);
    presented
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::RasterBuffer;
    use image::Rgba;
    use std::sync::Arc;

    /// Remembers the color of the top-left pixel of each frame.
    struct FirstPixels(Vec<Rgba<u8>>);

    impl Surface for FirstPixels {
        fn present(&mut self, frame: &RgbaImage) -> Result<()> {
            self.0.push(*frame.get_pixel(0, 0));
            Ok(())
        }
    }

    #[test]
    fn loop_presents_until_shutdown() {
        let mut raster = RasterBuffer::new(4, 4).unwrap();
        raster.plot(0, 0, Rgba([9, 9, 9, 255]));
        raster.swap();
        let view = raster.front_view();

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            flag.store(true, Ordering::SeqCst);
        });

        let mut surface = FirstPixels(Vec::new());
        let presented = run_render_loop(&view, &mut surface, Duration::from_millis(5), &shutdown);
        stopper.join().unwrap();

        assert!(presented >= 2);
        assert_eq!(presented as usize, surface.0.len());
        assert!(surface.0.iter().all(|&c| c == Rgba([9, 9, 9, 255])));
    }

    #[test]
    fn raised_flag_presents_nothing() {
        let raster = RasterBuffer::new(2, 2).unwrap();
        let shutdown = AtomicBool::new(true);
        let mut surface = FirstPixels(Vec::new());
        assert_eq!(run_render_loop(&raster.front_view(), &mut surface, Duration::from_millis(1), &shutdown), 0);
    }

    #[test]
    fn headless_preview_is_magnified() {
        let path = std::env::temp_dir().join(format!("diffusion-preview-{}.png", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let mut surface = HeadlessSurface::new(3, Some(path.clone()), 2);

        let frame = RgbaImage::from_pixel(5, 4, Rgba([1, 2, 3, 255]));
        surface.present(&frame).unwrap();
        surface.present(&frame).unwrap();
        assert_eq!(surface.frames(), 2);

        let preview = image::open(&path).unwrap().to_rgba8();
        assert_eq!(preview.dimensions(), (15, 12));
        assert_eq!(preview.get_pixel(14, 11), &Rgba([1, 2, 3, 255]));
        std::fs::remove_file(&path).unwrap();
    }
}
