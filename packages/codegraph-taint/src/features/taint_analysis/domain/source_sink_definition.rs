//! Source and sink definitions
//!
//! A definition names a method and the locations of a call to it that are
//! tainted (for a source) or checked (for a sink).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::shared::models::MethodSig;

/// Role of a definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceSinkType {
    Source,
    Sink,
    Both,
}

impl SourceSinkType {
    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source | Self::Both)
    }

    pub fn is_sink(&self) -> bool {
        matches!(self, Self::Sink | Self::Both)
    }
}

/// Location at a call site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallLocation {
    /// Receiver object
    Base,
    /// Value assigned from the call
    Return,
    /// Argument at index
    Parameter(usize),
}

impl fmt::Display for CallLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallLocation::Base => write!(f, "base"),
            CallLocation::Return => write!(f, "return"),
            CallLocation::Parameter(i) => write!(f, "arg{}", i),
        }
    }
}

/// Method-based source/sink definition
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceSinkDefinition {
    pub id: String,
    pub category: Option<String>,
    pub method: MethodSig,
    pub kind: SourceSinkType,
    /// Tainted (source) or checked (sink) locations. Empty means the
    /// default: the return value for sources, every argument and the
    /// receiver for sinks.
    pub locations: Vec<CallLocation>,
}

impl SourceSinkDefinition {
    pub fn source(id: impl Into<String>, method: MethodSig) -> Self {
        Self {
            id: id.into(),
            category: None,
            method,
            kind: SourceSinkType::Source,
            locations: Vec::new(),
        }
    }

    pub fn sink(id: impl Into<String>, method: MethodSig) -> Self {
        Self {
            kind: SourceSinkType::Sink,
            ..Self::source(id, method)
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_locations(mut self, locations: Vec<CallLocation>) -> Self {
        self.locations = locations;
        self
    }

    /// Locations that apply for a call with `arg_count` arguments
    pub fn effective_locations(&self, arg_count: usize, has_base: bool, as_source: bool) -> Vec<CallLocation> {
        if !self.locations.is_empty() {
            return self.locations.clone();
        }
        if as_source {
            vec![CallLocation::Return]
        } else {
            let mut locations: Vec<CallLocation> =
                (0..arg_count).map(CallLocation::Parameter).collect();
            if has_base {
                locations.push(CallLocation::Base);
            }
            locations
        }
    }
}

impl fmt::Display for SourceSinkDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.method)
    }
}
