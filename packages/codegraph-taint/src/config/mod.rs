//! Analysis configuration
//!
//! ```text
//! Preset (fast | balanced | thorough | custom)
//!   └─ InfoflowConfig (rule toggles, access-path bound, solver limits)
//!        └─ YAML overrides (version 1 schema)
//! ```
//!
//! # Example
//! ```ignore
//! let config = InfoflowConfig::from_yaml_file("analysis.yaml")?;
//! config.validate()?;
//! ```

mod error;
mod infoflow_config;
mod preset;

pub use error::{ConfigError, ConfigResult};
pub use infoflow_config::{ImplicitFlowMode, InfoflowConfig, StaticFieldTrackingMode};
pub use preset::Preset;
