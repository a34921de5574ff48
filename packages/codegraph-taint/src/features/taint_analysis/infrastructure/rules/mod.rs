//! Backward propagation rules
//!
//! Each rule owns one concern and can be enabled or dropped from the chain
//! without touching the others.

mod array;
mod clinit;
mod exception;
mod implicit_flow;
mod sink_seeding;
mod skip_system_class;
mod source_recording;
mod stop_after_first_k;
mod strong_update;
mod wrapper;

pub use array::ArrayPropagationRule;
pub use clinit::ClinitPropagationRule;
pub use exception::ExceptionPropagationRule;
pub use implicit_flow::ImplicitPropagationRule;
pub use sink_seeding::SinkSeedingRule;
pub use skip_system_class::SkipSystemClassRule;
pub use source_recording::SourceRecordingRule;
pub use stop_after_first_k::StopAfterFirstKFlowsRule;
pub use strong_update::StrongUpdatePropagationRule;
pub use wrapper::WrapperPropagationRule;
