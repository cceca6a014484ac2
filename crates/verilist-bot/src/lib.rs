//! The verilist bot: configuration, wiring and the status endpoint.

pub mod config;
pub mod runtime;
pub mod status;

pub use config::{load_config, Config, ConfigError};
pub use runtime::StartupError;
