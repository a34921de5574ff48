/*
 * Codegraph Taint - Backward Taint Propagation Engine
 *
 * Feature-First Hexagonal Architecture:
 * - shared/      : Statement-level IR consumed by the analysis
 * - config/      : Analysis configuration (presets, YAML, validation)
 * - features/    : Vertical slices (taint_analysis: domain → ports → infrastructure → application)
 *
 * The core is the rule chain: ordered propagation rules computing, for each
 * control-flow edge kind, the taint facts flowing out of a statement given one
 * flowing in. The search runs from sinks back to sources.
 *
 * References:
 * - Arzt et al. (2014): "FlowDroid: Precise Context, Flow, Field, Object-Sensitive Taint Analysis"
 * - Reps, Horwitz, Sagiv (1995): IFDS
 */

// Crate-level lint configuration
#![allow(clippy::too_many_arguments)] // Flow functions carry the full solver state
#![allow(clippy::type_complexity)] // Complex types are necessary for analysis
#![allow(clippy::collapsible_if)] // Readability over brevity
#![allow(clippy::collapsible_else_if)] // else if clarity
#![allow(clippy::new_without_default)] // Default impl not always needed
#![allow(clippy::module_inception)] // Module naming intentional
#![allow(clippy::should_implement_trait)] // from_str naming intentional

// ═══════════════════════════════════════════════════════════════════════════
// Module Exports - Feature-First Architecture
// ═══════════════════════════════════════════════════════════════════════════

/// Configuration (presets, YAML loading, validation)
pub mod config;

/// Crate error types
pub mod errors;

/// Shared models (IR)
pub mod shared;

/// Feature slices
pub mod features;

pub use config::{ImplicitFlowMode, InfoflowConfig, Preset, StaticFieldTrackingMode};
pub use errors::{Result, TaintError};
pub use features::taint_analysis::{BackwardTaintAnalysis, InfoflowResults};
