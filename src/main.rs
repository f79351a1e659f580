use anyhow::{Context, Result};
use clap::Parser;
use diffusion_common::{EngineConfig, ExportKind, ModelVariant, RunStateStore};
use env_logger::{Builder, Target};
use image::Rgba;
use log::{debug, error, info, LevelFilter};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

// Define modules used by main
mod console;
mod controller;
mod export;
mod grid;
mod model;
mod raster;
mod render;
mod stats;
mod transport;

use controller::Controller;
use raster::RasterBuffer;
use render::HeadlessSurface;
use stats::CensusRecorder;

/// Command-line arguments for the diffusion engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the engine configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Model variant, overriding [model] variant (sir, sis, sisa, sis_immune, sis_city, knowledge)
    #[arg(long)]
    variant: Option<ModelVariant>,

    /// Seed for the model's random stream, overriding [model] seed
    #[arg(long)]
    seed: Option<u64>,

    /// Frame export, overriding [output] export (none, gif, png)
    #[arg(long)]
    export: Option<ExportKind>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // --- Load Configuration ---
    let mut config = EngineConfig::load(&args.config)?;
    if let Some(variant) = args.variant {
        config.model.variant = variant;
    }
    if args.seed.is_some() {
        config.model.seed = args.seed;
    }
    if let Some(export) = args.export {
        config.output.export = export;
    }

    init_logger(&config)?;
    info!("Starting Diffusion Engine...");
    info!(
        "Grid {}x{} (display scale {}), model {:?}, export {:?}",
        config.grid.width, config.grid.height, config.grid.scale, config.model.variant, config.output.export
    );
    debug!("Engine configuration: {:#?}", config);

    // --- Build the simulation side ---
    let mut raster = RasterBuffer::new(config.grid.width, config.grid.height)?;
    raster.set_clear_color(Rgba(config.grid.clear_color));
    raster.enable_alpha_blending(config.grid.alpha_blending);
    let model = model::build(&config.model)?;
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut controller = Controller::new(raster, model, config.controller.clone()).with_shutdown(shutdown.clone());
    if let Some(exporter) = export::build(config.output.export, &config.output.export_dir) {
        controller = controller.with_exporter(exporter);
    }
    if config.output.save_stats {
        controller = controller.with_recorder(CensusRecorder::new(&config.output.data_root, config.output.stats_format));
    } else {
        info!("Census recording disabled (save_stats is false).");
    }
    controller.configure();
    let view = controller.front_view();

    let mut store = RunStateStore::open(config.output.run_state_path())?;
    if let Some(last) = store.exit_state() {
        info!("Previous session ended in state {:?}", last);
    }

    // --- Spawn the three loops ---
    let channels = transport::channels();
    let (command_rx, event_tx) = (channels.command_rx, channels.event_tx);
    let controller_thread = thread::Builder::new()
        .name("controller".into())
        .spawn(move || controller.run(&command_rx, &event_tx))
        .context("Failed to spawn controller thread")?;

    let frame_period = config.render.frame_period();
    let mut surface = HeadlessSurface::new(
        config.grid.scale,
        config.render.preview_path.clone(),
        config.render.preview_every,
    );
    let render_shutdown = shutdown.clone();
    let render_thread = thread::Builder::new()
        .name("render".into())
        .spawn(move || render::run_render_loop(&view, &mut surface, frame_period, &render_shutdown))
        .context("Failed to spawn render thread")?;

    // Blocks on stdin, so it is never joined
    let command_tx = channels.command_tx;
    println!("{}", console::HELP);
    thread::Builder::new()
        .name("console".into())
        .spawn(move || console::run_console(io::stdin().lock(), io::stdout(), command_tx))
        .context("Failed to spawn console thread")?;

    // The observer runs here until the controller hangs up
    console::run_observer(channels.event_rx, io::stdout(), &mut store);

    if controller_thread.join().is_err() {
        error!("Controller thread panicked");
        shutdown.store(true, Ordering::SeqCst);
    }
    match render_thread.join() {
        Ok(frames) => info!("Rendered {} frames.", frames),
        Err(_) => error!("Render thread panicked"),
    }

    if store.save()? {
        info!("Run state saved to {}", config.output.run_state_path().display());
    }
    info!("Diffusion Engine finished.");
    Ok(())
}

/// Logs to `<log_root>/<info_log>` when configured, otherwise to stderr.
fn init_logger(config: &EngineConfig) -> Result<()> {
    let mut builder = Builder::from_default_env();
    builder.filter(None, LevelFilter::Info);
    if let Some(path) = config.output.info_log_path() {
        fs::create_dir_all(&config.output.log_root)
            .with_context(|| format!("Failed to create log directory '{}'", config.output.log_root.display()))?;
        let file = File::create(&path).with_context(|| format!("Failed to create log file '{}'", path.display()))?;
        builder.target(Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}
