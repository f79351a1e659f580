use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// Grid and window placement, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GridConfig {
    pub width: u32,
    pub height: u32,
    /// Display magnification applied by the renderer; the simulation grid is unaffected.
    #[serde(default = "default_scale")]
    pub scale: u32,
    #[serde(default = "default_window_pos_x")]
    pub window_pos_x: i32,
    #[serde(default = "default_window_pos_y")]
    pub window_pos_y: i32,
    /// RGBA the raster is cleared to before each model paints its initial frame.
    #[serde(default = "default_clear_color")]
    pub clear_color: [u8; 4],
    /// Composite translucent paint over the existing pixel instead of overwriting it.
    #[serde(default)]
    pub alpha_blending: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    Sir,
    Sis,
    Sisa,
    SisImmune,
    SisCity,
    Knowledge,
}

impl std::str::FromStr for ModelVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sir" => Ok(ModelVariant::Sir),
            "sis" => Ok(ModelVariant::Sis),
            "sisa" => Ok(ModelVariant::Sisa),
            "sis_immune" => Ok(ModelVariant::SisImmune),
            "sis_city" => Ok(ModelVariant::SisCity),
            "knowledge" => Ok(ModelVariant::Knowledge),
            other => anyhow::bail!(
                "Unknown model variant '{}' (expected sir, sis, sisa, sis_immune, sis_city or knowledge)",
                other
            ),
        }
    }
}

/// Optional overrides for the stochastic rates of a variant.
/// Rates a variant does not use are ignored by it.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RateOverrides {
    #[serde(default)]
    pub transmission: Option<f64>,
    #[serde(default)]
    pub acceptance: Option<f64>,
    #[serde(default)]
    pub drop: Option<f64>,
    #[serde(default)]
    pub pickup: Option<f64>,
    #[serde(default)]
    pub spontaneous: Option<f64>,
    #[serde(default)]
    pub immunity: Option<f64>,
}

impl RateOverrides {
    fn named(&self) -> [(&'static str, Option<f64>); 6] {
        [
            ("transmission", self.transmission),
            ("acceptance", self.acceptance),
            ("drop", self.drop),
            ("pickup", self.pickup),
            ("spontaneous", self.spontaneous),
            ("immunity", self.immunity),
        ]
    }
}

// Model selection, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ModelConfig {
    pub variant: ModelVariant,
    /// Seed for the variant's random stream. Each variant has its own default.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub rates: RateOverrides,
}

// Controller pacing
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ControllerConfig {
    /// How long the controller waits for a command while not advancing.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
    /// Pause between autonomous generations.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            idle_wait_ms: default_idle_wait_ms(),
            step_delay_ms: default_step_delay_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }
}

// Render loop pacing and optional preview output
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub preview_path: Option<PathBuf>,
    #[serde(default = "default_preview_every")]
    pub preview_every: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            fps: default_fps(),
            preview_path: None,
            preview_every: default_preview_every(),
        }
    }
}

impl RenderConfig {
    /// Target duration of one rendered frame.
    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    None,
    Gif,
    Png,
}

impl std::str::FromStr for ExportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(ExportKind::None),
            "gif" => Ok(ExportKind::Gif),
            "png" => Ok(ExportKind::Png),
            other => anyhow::bail!("Unknown export kind '{}' (expected none, gif or png)", other),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatsFormat {
    Json,
    Bincode,
    Messagepack,
    Csv,
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_log_root")]
    pub log_root: PathBuf,
    /// Log file name under `log_root`. Logs go to stderr when unset.
    #[serde(default)]
    pub info_log: Option<String>,
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    #[serde(default = "default_export")]
    pub export: ExportKind,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default)]
    pub save_stats: bool,
    #[serde(default = "default_stats_format")]
    pub stats_format: StatsFormat,
    #[serde(default = "default_run_state_file")]
    pub run_state_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            log_root: default_log_root(),
            info_log: None,
            data_root: default_data_root(),
            export: default_export(),
            export_dir: default_export_dir(),
            save_stats: false,
            stats_format: default_stats_format(),
            run_state_file: default_run_state_file(),
        }
    }
}

impl OutputConfig {
    pub fn run_state_path(&self) -> PathBuf {
        self.data_root.join(&self.run_state_file)
    }

    pub fn info_log_path(&self) -> Option<PathBuf> {
        self.info_log.as_ref().map(|name| self.log_root.join(name))
    }
}

// Main engine configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    pub grid: GridConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl EngineConfig {
    /// Loads the engine configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;

        Ok(config)
    }

    /// Parses and validates a configuration held in memory.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid.width == 0 || self.grid.height == 0 {
            anyhow::bail!(
                "grid dimensions must be positive (got {}x{}).",
                self.grid.width,
                self.grid.height
            );
        }
        if self.grid.scale == 0 {
            anyhow::bail!("grid.scale must be at least 1.");
        }
        if !(self.render.fps.is_finite() && self.render.fps > 0.0) {
            anyhow::bail!("render.fps must be positive (got {}).", self.render.fps);
        }
        if self.render.preview_every == 0 {
            anyhow::bail!("render.preview_every must be at least 1.");
        }
        for (name, rate) in self.model.rates.named() {
            if let Some(p) = rate {
                if !(0.0..=1.0).contains(&p) {
                    anyhow::bail!("model.rates.{} must be a probability in [0, 1] (got {}).", name, p);
                }
            }
        }
        Ok(())
    }
}

fn default_scale() -> u32 {
    1
}

fn default_window_pos_x() -> i32 {
    1500
}

fn default_window_pos_y() -> i32 {
    100
}

fn default_clear_color() -> [u8; 4] {
    [127, 127, 127, 255]
}

fn default_idle_wait_ms() -> u64 {
    10
}

fn default_step_delay_ms() -> u64 {
    1
}

fn default_fps() -> f64 {
    15.0
}

fn default_preview_every() -> u64 {
    15
}

fn default_log_root() -> PathBuf {
    PathBuf::from("logs")
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_export() -> ExportKind {
    ExportKind::None
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_stats_format() -> StatsFormat {
    StatsFormat::Json
}

fn default_run_state_file() -> String {
    "run_state.json".to_string()
}
