use anyhow::{Context, Result};
use diffusion_common::ExportKind;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame, ImageFormat, RgbaImage};
use log::{debug, info};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Animation frame rate for exported GIFs.
pub const GIF_FPS: u32 = 15;

/// Receives painted frames from the controller, in generation order.
pub trait FrameSink: Send {
    /// A new run of `model_name` starts; the next frame is its reset frame.
    fn begin(&mut self, model_name: &str);

    fn frame(&mut self, generation: u64, frame: &RgbaImage) -> Result<()>;

    /// End of run (stop or completion). Closes the run's output.
    fn finish(&mut self) -> Result<()>;
}

/// Builds the sink selected in the config, if any.
pub fn build(kind: ExportKind, dir: &Path) -> Option<Box<dyn FrameSink>> {
    match kind {
        ExportKind::None => None,
        ExportKind::Gif => Some(Box::new(GifExporter::new(dir))),
        ExportKind::Png => Some(Box::new(PngSequenceExporter::new(dir))),
    }
}

/// Streams a run into one looping GIF, `<dir>/<Name><run>.gif`. Frames are encoded
/// as they arrive; nothing is held in memory between generations.
pub struct GifExporter {
    dir: PathBuf,
    name: String,
    encoder: Option<GifEncoder<BufWriter<File>>>,
    path: Option<PathBuf>,
    written: u64,
    run: u32,
}

impl GifExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        GifExporter {
            dir: dir.into(),
            name: String::from("model"),
            encoder: None,
            path: None,
            written: 0,
            run: 0,
        }
    }

    /// Frames encoded into the current run's file.
    #[cfg(test)]
    pub fn written(&self) -> u64 {
        self.written
    }

    fn open(&mut self) -> Result<&mut GifEncoder<BufWriter<File>>> {
        if self.encoder.is_none() {
            fs::create_dir_all(&self.dir)
                .with_context(|| format!("Failed to create export directory '{}'", self.dir.display()))?;
            let path = self.dir.join(format!("{}{}.gif", self.name, self.run));
            let file = File::create(&path).with_context(|| format!("Failed to create '{}'", path.display()))?;
            let mut encoder = GifEncoder::new(BufWriter::new(file));
            encoder.set_repeat(Repeat::Infinite)?;
            debug!("Streaming GIF frames to {}", path.display());
            self.path = Some(path);
            self.encoder = Some(encoder);
        }
        self.encoder.as_mut().context("GIF encoder missing")
    }
}

impl FrameSink for GifExporter {
    fn begin(&mut self, model_name: &str) {
        // An unfinished run leaves a truncated file behind; drop it
        if self.encoder.take().is_some() {
            if let Some(path) = self.path.take() {
                debug!("Discarding unfinished GIF {} ({} frames)", path.display(), self.written);
                let _ = fs::remove_file(&path);
            }
        }
        self.written = 0;
        self.name = model_name.to_string();
    }

    fn frame(&mut self, generation: u64, frame: &RgbaImage) -> Result<()> {
        let delay = Delay::from_numer_denom_ms(1000, GIF_FPS);
        let encoder = self.open()?;
        encoder
            .encode_frame(Frame::from_parts(frame.clone(), 0, 0, delay))
            .with_context(|| format!("Failed to encode frame {}", generation))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Dropping the encoder writes the trailer and flushes the file
        let Some(encoder) = self.encoder.take() else {
            return Ok(());
        };
        drop(encoder);

        if let Some(path) = self.path.take() {
            info!("Exported {} frames to {}", self.written, path.display());
        }
        self.written = 0;
        self.run += 1;
        Ok(())
    }
}

/// Writes every frame as its own PNG, `<dir>/<Name><n>.png`, numbered across runs.
pub struct PngSequenceExporter {
    dir: PathBuf,
    name: String,
    written: u64,
}

impl PngSequenceExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        PngSequenceExporter {
            dir: dir.into(),
            name: String::from("model"),
            written: 0,
        }
    }
}

impl FrameSink for PngSequenceExporter {
    fn begin(&mut self, model_name: &str) {
        self.name = model_name.to_string();
    }

    fn frame(&mut self, generation: u64, frame: &RgbaImage) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create export directory '{}'", self.dir.display()))?;
        let path = self.dir.join(format!("{}{}.png", self.name, self.written));
        frame
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("Failed to write frame {} to '{}'", generation, path.display()))?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!("{} frames written to {}", self.written, self.dir.display());
        Ok(())
    }
}
