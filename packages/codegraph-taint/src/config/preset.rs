//! Preset configurations
//!
//! Presets provide complete default configurations for common use cases.

use serde::{Deserialize, Serialize};

/// Configuration preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// CI/CD: explicit flows only
    ///
    /// - No implicit flows, no exception tracking
    /// - Access paths of length 3
    /// - Stops after the first flow
    Fast,

    /// Development: explicit flows with arrays and exceptions
    ///
    /// - Array and exception tracking on
    /// - Access paths of length 5
    Balanced,

    /// Security audit: everything on
    ///
    /// - All implicit flows, array size tainting
    /// - Access paths of length 10
    Thorough,

    /// Custom: User-defined (YAML only)
    ///
    /// Starts from the balanced defaults.
    Custom,
}

impl Preset {
    /// Parse preset from string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "thorough" => Ok(Self::Thorough),
            "custom" => Ok(Self::Custom),
            _ => Err(format!(
                "Unknown preset '{}'. Valid presets: fast, balanced, thorough, custom",
                s
            )),
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Thorough => "thorough",
            Self::Custom => "custom",
        }
    }
}

impl Default for Preset {
    fn default() -> Self {
        Self::Balanced
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
