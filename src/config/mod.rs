pub mod loader;
pub mod types;

pub use loader::{get_config_path, get_workdir, load_config};
pub use types::{
    BoundaryConfig, CaptureConfig, CompanionRule, ResolverConfig, RuntimeConfig, ScriptboxConfig,
    TelemetryConfig,
};
