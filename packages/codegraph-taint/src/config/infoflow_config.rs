//! Infoflow configuration
//!
//! Read-only for the duration of a run: rules consult it to decide which
//! propagation features are active.

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, ConfigResult};
use super::preset::Preset;

// ============================================================================
// Modes
// ============================================================================

/// How control dependencies are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplicitFlowMode {
    /// Implicit flows are not tracked at all
    None,

    /// Array reads through a tainted index are tracked, other control
    /// dependencies are not
    ArrayAccesses,

    /// Every control dependency involving tainted data is tracked
    AllImplicitFlows,
}

impl ImplicitFlowMode {
    pub fn track_array_accesses(&self) -> bool {
        matches!(self, Self::ArrayAccesses | Self::AllImplicitFlows)
    }

    pub fn track_control_flow_dependencies(&self) -> bool {
        matches!(self, Self::AllImplicitFlows)
    }
}

/// How taints on static fields are tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaticFieldTrackingMode {
    /// Static fields are ordinary access paths (context- and flow-sensitive)
    ContextFlowSensitive,

    /// Accepted for compatibility; handled like `ContextFlowSensitive`
    ContextFlowInsensitive,

    /// Taints on static fields are dropped
    None,
}

impl StaticFieldTrackingMode {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }
}

// ============================================================================
// InfoflowConfig
// ============================================================================

/// Backward taint analysis configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfoflowConfig {
    /// Control-dependency tracking
    pub implicit_flow_mode: ImplicitFlowMode,

    /// Static field handling
    pub static_field_tracking_mode: StaticFieldTrackingMode,

    /// Track array contents and lengths separately
    pub enable_array_tracking: bool,

    /// Propagate a tainted array length into the size operand of `new T[n]`
    pub enable_array_size_tainting: bool,

    /// Treat throw/catch as a distinct control edge
    pub enable_exception_tracking: bool,

    /// Drop derivations whose types cannot be compatible
    pub enable_type_checking: bool,

    /// Taint the operand of `x instanceof T` when `x` is tainted
    pub enable_instance_of_tainting: bool,

    /// Descend into callees that are sources
    pub inspect_sources: bool,

    /// Descend into callees that are sinks
    pub inspect_sinks: bool,

    /// Maximum number of fields in an access path (1..=50)
    pub access_path_length: usize,

    /// Stop once this many results are recorded (0 = unlimited)
    pub stop_after_first_k_flows: usize,

    /// Abort after this many path edges (0 = unlimited)
    pub max_propagations: usize,

    /// Worker threads for the solver (1 = sequential)
    #[serde(default = "default_solver_threads")]
    pub solver_threads: usize,
}

fn default_solver_threads() -> usize {
    num_cpus::get().max(1)
}

/// On-disk schema (version 1)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: Option<u32>,
    #[serde(default)]
    preset: Option<String>,
    #[serde(default)]
    overrides: Option<serde_yaml::Value>,
}

impl InfoflowConfig {
    /// Build the configuration for a preset
    pub fn from_preset(preset: Preset) -> Self {
        match preset {
            Preset::Fast => Self {
                implicit_flow_mode: ImplicitFlowMode::None,
                static_field_tracking_mode: StaticFieldTrackingMode::ContextFlowSensitive,
                enable_array_tracking: true,
                enable_array_size_tainting: false,
                enable_exception_tracking: false,
                enable_type_checking: true,
                enable_instance_of_tainting: false,
                inspect_sources: false,
                inspect_sinks: false,
                access_path_length: 3,
                stop_after_first_k_flows: 1,
                max_propagations: 100_000,
                solver_threads: default_solver_threads(),
            },
            Preset::Balanced | Preset::Custom => Self {
                implicit_flow_mode: ImplicitFlowMode::ArrayAccesses,
                static_field_tracking_mode: StaticFieldTrackingMode::ContextFlowSensitive,
                enable_array_tracking: true,
                enable_array_size_tainting: false,
                enable_exception_tracking: true,
                enable_type_checking: true,
                enable_instance_of_tainting: false,
                inspect_sources: false,
                inspect_sinks: false,
                access_path_length: 5,
                stop_after_first_k_flows: 0,
                max_propagations: 0,
                solver_threads: default_solver_threads(),
            },
            Preset::Thorough => Self {
                implicit_flow_mode: ImplicitFlowMode::AllImplicitFlows,
                static_field_tracking_mode: StaticFieldTrackingMode::ContextFlowSensitive,
                enable_array_tracking: true,
                enable_array_size_tainting: true,
                enable_exception_tracking: true,
                enable_type_checking: true,
                enable_instance_of_tainting: true,
                inspect_sources: false,
                inspect_sinks: true,
                access_path_length: 10,
                stop_after_first_k_flows: 0,
                max_propagations: 0,
                solver_threads: default_solver_threads(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.access_path_length == 0 || self.access_path_length > 50 {
            return Err(ConfigError::range_with_hint(
                "access_path_length",
                self.access_path_length,
                1,
                50,
                "Access paths need at least one field and must stay bounded",
            ));
        }

        if self.solver_threads == 0 || self.solver_threads > 1024 {
            return Err(ConfigError::range_with_hint(
                "solver_threads",
                self.solver_threads,
                1,
                1024,
                "Use 1 for a sequential solver",
            ));
        }

        if self.enable_array_size_tainting && !self.enable_array_tracking {
            return Err(ConfigError::Validation(
                "enable_array_size_tainting requires enable_array_tracking".to_string(),
            ));
        }

        Ok(())
    }

    /// Load from a YAML document (version 1 schema)
    ///
    /// ```yaml
    /// version: 1
    /// preset: thorough
    /// overrides:
    ///   access_path_length: 4
    ///   inspect_sinks: false
    /// ```
    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        let version = file.version.ok_or(ConfigError::MissingVersion)?;
        if version != 1 {
            return Err(ConfigError::UnsupportedVersion {
                found: version,
                supported: vec![1],
            });
        }

        let preset = match file.preset {
            Some(name) => Preset::from_str(&name).map_err(|_| ConfigError::UnknownPreset(name))?,
            None => Preset::default(),
        };

        let mut config = Self::from_preset(preset);
        if let Some(overrides) = file.overrides {
            let mut merged = serde_yaml::to_value(&config)?;
            if let (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(patch)) =
                (&mut merged, overrides)
            {
                for (key, value) in patch {
                    base.insert(key, value);
                }
            } else {
                return Err(ConfigError::Validation(
                    "'overrides' must be a mapping".to_string(),
                ));
            }
            config = serde_yaml::from_value(merged)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file (version 1 schema)
    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Serialize back to the version 1 schema
    pub fn to_yaml(&self) -> ConfigResult<String> {
        let mut root = serde_yaml::Mapping::new();
        root.insert("version".into(), 1u32.into());
        root.insert("preset".into(), Preset::Custom.as_str().into());
        root.insert("overrides".into(), serde_yaml::to_value(self)?);
        Ok(serde_yaml::to_string(&root)?)
    }
}

impl Default for InfoflowConfig {
    fn default() -> Self {
        Self::from_preset(Preset::Balanced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_presets_validate() {
        for preset in [Preset::Fast, Preset::Balanced, Preset::Thorough, Preset::Custom] {
            assert!(InfoflowConfig::from_preset(preset).validate().is_ok());
        }
    }

    #[test]
    fn test_thorough_tracks_everything() {
        let config = InfoflowConfig::from_preset(Preset::Thorough);
        assert!(config.implicit_flow_mode.track_control_flow_dependencies());
        assert!(config.implicit_flow_mode.track_array_accesses());
        assert!(config.enable_array_size_tainting);
    }

    #[test]
    fn test_array_accesses_mode() {
        let mode = ImplicitFlowMode::ArrayAccesses;
        assert!(mode.track_array_accesses());
        assert!(!mode.track_control_flow_dependencies());
    }

    #[test]
    fn test_invalid_access_path_length() {
        let config = InfoflowConfig {
            access_path_length: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Range { .. })));
    }

    #[test]
    fn test_size_tainting_requires_arrays() {
        let config = InfoflowConfig {
            enable_array_tracking: false,
            enable_array_size_tainting: true,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_yaml_overrides_merge_onto_preset() {
        let yaml = r#"
version: 1
preset: thorough
overrides:
  access_path_length: 4
  implicit_flow_mode: none
"#;
        let config = InfoflowConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.access_path_length, 4);
        assert_eq!(config.implicit_flow_mode, ImplicitFlowMode::None);
        // untouched fields keep the preset value
        assert!(config.enable_array_size_tainting);
    }

    #[test]
    fn test_yaml_missing_version() {
        let err = InfoflowConfig::from_yaml_str("preset: fast\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingVersion));
    }

    #[test]
    fn test_yaml_unknown_preset() {
        let err = InfoflowConfig::from_yaml_str("version: 1\npreset: paranoid\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPreset(name) if name == "paranoid"));
    }

    #[test]
    fn test_yaml_unknown_override_field() {
        let yaml = "version: 1\noverrides:\n  acces_path_length: 3\n";
        assert!(matches!(
            InfoflowConfig::from_yaml_str(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let config = InfoflowConfig {
            stop_after_first_k_flows: 2,
            ..InfoflowConfig::from_preset(Preset::Fast)
        };
        let yaml = config.to_yaml().unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();

        let loaded = InfoflowConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
