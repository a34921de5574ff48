//! Application layer: the backward problem and the service running it

pub mod analysis_service;
pub mod backward_problem;

pub use analysis_service::{BackwardTaintAnalysis, FlowEndpoint, InfoflowResults, TaintFlow};
pub use backward_problem::BackwardTaintProblem;
