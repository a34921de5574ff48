// Taint analysis domain
//
// Pure data: access paths, taint facts, the fact arena, source/sink
// definitions and recorded results. No solver or program queries here.

pub mod abstraction;
pub mod access_path;
pub mod arena;
pub mod results;
pub mod source_sink_definition;

pub use abstraction::{Abstraction, AbstractionId, SourceContext};
pub use access_path::{AccessPath, AccessPathFactory, ArrayTaintType};
pub use arena::AbstractionArena;
pub use results::{AbstractionAtSink, ResultListener, TaintPropagationResults};
pub use source_sink_definition::{CallLocation, SourceSinkDefinition, SourceSinkType};
