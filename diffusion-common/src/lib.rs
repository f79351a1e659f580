pub mod census;
pub mod config;
pub mod run_state;

// Re-export key types for easier use by dependent crates
pub use census::GenerationCensus;
pub use config::{
    ControllerConfig, EngineConfig, ExportKind, GridConfig, ModelConfig, ModelVariant, OutputConfig,
    RateOverrides, RenderConfig, StatsFormat,
};
pub use run_state::{ExitState, RunState, RunStateStore};
