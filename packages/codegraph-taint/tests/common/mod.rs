//! Shared helpers for integration tests
//!
//! Programs are built with `Main.secret()` as the only source and
//! `Main.sink(..)` as the only sink.

#![allow(dead_code)]

use std::sync::Arc;

use codegraph_taint::features::taint_analysis::infrastructure::{
    AliasAnalyzer, BackwardsIcfg, InfoflowManager, MethodSourceSinkManager, TypeUtils,
};
use codegraph_taint::features::taint_analysis::ports::{EdgeSubmitter, PathEdge};
use codegraph_taint::features::taint_analysis::{BackwardTaintAnalysis, SourceSinkDefinition};
use codegraph_taint::shared::models::{MethodSig, Program, ProgramBuilder, StmtHandle, StmtId, Type};
use codegraph_taint::{InfoflowConfig, Preset};

pub fn main_sig() -> MethodSig {
    MethodSig::new("Main", "main", vec![], Type::Void)
}

pub fn secret_sig(ret: Type) -> MethodSig {
    MethodSig::new("Main", "secret", vec![], ret)
}

pub fn sink_sig(param: Type) -> MethodSig {
    MethodSig::new("Main", "sink", vec![param], Type::Void)
}

/// Declares the source and sink methods on a fresh builder
pub fn program_with_endpoints(value: Type) -> ProgramBuilder {
    let mut pb = ProgramBuilder::new();
    pb.declare_method(secret_sig(value.clone()), true)
        .declare_method(sink_sig(value), true);
    pb
}

pub fn definitions(value: Type) -> Vec<SourceSinkDefinition> {
    vec![
        SourceSinkDefinition::source("secret", secret_sig(value.clone())),
        SourceSinkDefinition::sink("sink", sink_sig(value)),
    ]
}

/// Preset on one solver thread so runs are reproducible
pub fn config(preset: Preset) -> InfoflowConfig {
    InfoflowConfig {
        solver_threads: 1,
        ..InfoflowConfig::from_preset(preset)
    }
}

pub fn analysis(program: &Arc<Program>, value: Type, config: InfoflowConfig) -> BackwardTaintAnalysis {
    BackwardTaintAnalysis::new(program.clone(), config).with_definitions(definitions(value))
}

/// Statement id of a builder handle
pub fn stmt_in(program: &Program, sig: &MethodSig, handle: StmtHandle) -> StmtId {
    let method = program.find_method(sig).expect("method in program");
    program.stmt_at(method, handle).expect("statement in method")
}

/// Manager wired the same way a run wires it, for driving flow functions
pub fn manager(program: &Arc<Program>, value: Type, config: InfoflowConfig) -> Arc<InfoflowManager> {
    let icfg = Arc::new(BackwardsIcfg::new(program.clone()));
    let aliasing = Arc::new(AliasAnalyzer::new(program.clone(), &config));
    let type_utils = TypeUtils::new(program.clone(), config.enable_type_checking);
    let manager = InfoflowManager::new(config, icfg, aliasing, type_utils)
        .with_source_sink_manager(Arc::new(MethodSourceSinkManager::new(definitions(value))));
    Arc::new(manager)
}

pub struct IgnoreEdges;

impl EdgeSubmitter for IgnoreEdges {
    fn submit_edge(&self, _edge: PathEdge) {}
}
