// Backward taint analysis
//
// Hexagonal Architecture:
// - domain: access paths, taint facts, the fact arena, results
// - ports: traits for the collaborators a run consults (CFG, aliasing, sources/sinks, wrappers)
// - infrastructure: rule chain, rules, in-memory collaborators, IFDS solver
// - application: backward taint problem and the analysis service

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod ports;

// Re-export application layer (primary interface)
pub use application::{
    BackwardTaintAnalysis, BackwardTaintProblem, FlowEndpoint, InfoflowResults, TaintFlow,
};

// Re-export domain types
pub use domain::{
    Abstraction, AbstractionAtSink, AccessPath, AccessPathFactory, ArrayTaintType, CallLocation,
    ResultListener, SourceSinkDefinition, SourceSinkType,
};

pub use infrastructure::summary_wrapper::SummaryRule;
pub use ports::SecondaryFlowListener;
