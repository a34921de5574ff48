/*
 * Backward Taint Analysis Service
 *
 * Wires one run together:
 *   1. Validate the configuration
 *   2. Build the backward ICFG, aliasing, source/sink manager and wrapper
 *   3. Solve the backward problem from every sink
 *   4. Turn recorded results into source -> sink flows with their paths
 *
 * Results whose path cannot be rebuilt are dropped with a warning; the run
 * itself still succeeds.
 */

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::backward_problem::BackwardTaintProblem;
use crate::config::InfoflowConfig;
use crate::errors::Result;
use crate::features::taint_analysis::domain::{
    AbstractionAtSink, ResultListener, SourceSinkDefinition,
};
use crate::features::taint_analysis::infrastructure::alias_analyzer::AliasAnalyzer;
use crate::features::taint_analysis::infrastructure::backwards_icfg::BackwardsIcfg;
use crate::features::taint_analysis::infrastructure::ifds_framework::IFDSStatistics;
use crate::features::taint_analysis::infrastructure::ifds_solver::IFDSSolver;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::source_sink::MethodSourceSinkManager;
use crate::features::taint_analysis::infrastructure::summary_wrapper::{
    SummaryRule, SummaryTaintWrapper,
};
use crate::features::taint_analysis::infrastructure::type_utils::TypeUtils;
use crate::features::taint_analysis::ports::SecondaryFlowListener;
use crate::shared::models::{Program, StmtId};

// ============================================================================
// Results
// ============================================================================

/// One end of a reported flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowEndpoint {
    pub stmt: StmtId,
    /// Signature of the enclosing method
    pub method: String,
    /// Ids of the matching source or sink definitions
    pub definitions: Vec<String>,
    /// Statement text
    pub code: String,
}

/// A source reaching a sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaintFlow {
    pub source: FlowEndpoint,
    pub sink: FlowEndpoint,
    /// Statements from the source to the sink
    pub path: Vec<StmtId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfoflowResults {
    pub run_id: String,
    pub flows: Vec<TaintFlow>,
    pub statistics: IFDSStatistics,
    /// Results dropped because their path could not be rebuilt
    pub dropped: usize,
}

impl InfoflowResults {
    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Whether some flow connects the two statements
    pub fn has_flow(&self, source: StmtId, sink: StmtId) -> bool {
        self.flows
            .iter()
            .any(|f| f.source.stmt == source && f.sink.stmt == sink)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn collect(manager: &InfoflowManager, statistics: IFDSStatistics) -> Self {
        let program = manager.icfg().program();
        let mut seen: FxHashSet<(StmtId, StmtId)> = FxHashSet::default();
        let mut flows = vec![];
        let mut dropped = 0;

        let mut recorded = manager.results().results();
        recorded.sort_by_key(|r| (r.stmt, r.abstraction.path_length()));
        for result in recorded {
            match build_flow(manager, program, &result) {
                Ok(flow) => {
                    if seen.insert((flow.source.stmt, flow.sink.stmt)) {
                        flows.push(flow);
                    }
                }
                Err(err) => {
                    tracing::warn!(stmt = %result.stmt, error = %err, "dropping result without a path");
                    dropped += 1;
                }
            }
        }
        flows.sort_by_key(|f| (f.source.stmt, f.sink.stmt));

        Self {
            run_id: manager.run_id().to_string(),
            flows,
            statistics,
            dropped,
        }
    }
}

fn endpoint(program: &Program, stmt: StmtId, definitions: Vec<String>) -> FlowEndpoint {
    let method = program.method(program.method_of(stmt));
    FlowEndpoint {
        stmt,
        method: method.sig.to_string(),
        definitions,
        code: program.stmt(stmt).to_string(),
    }
}

fn build_flow(
    manager: &InfoflowManager,
    program: &Program,
    result: &AbstractionAtSink,
) -> Result<TaintFlow> {
    let chain = manager.arena().path_to_root(&result.abstraction)?;
    let root = chain
        .last()
        .and_then(|node| node.source_context().cloned())
        .ok_or_else(|| crate::errors::TaintError::invalid_state("result chain has no root"))?;

    let mut path: Vec<StmtId> = vec![];
    for stmt in chain.iter().filter_map(|node| node.current_stmt()) {
        if path.last() != Some(&stmt) {
            path.push(stmt);
        }
    }
    if path.last() != Some(&root.stmt) {
        path.push(root.stmt);
    }

    let ids = |defs: &[Arc<SourceSinkDefinition>]| defs.iter().map(|d| d.id.clone()).collect();
    Ok(TaintFlow {
        source: endpoint(program, result.stmt, ids(&result.definitions)),
        sink: endpoint(program, root.stmt, ids(&root.definitions)),
        path,
    })
}

// ============================================================================
// Service
// ============================================================================

/// Entry point of the backward taint analysis
pub struct BackwardTaintAnalysis {
    program: Arc<Program>,
    config: InfoflowConfig,
    definitions: Vec<SourceSinkDefinition>,
    summaries: Vec<SummaryRule>,
    result_listeners: Vec<Arc<dyn ResultListener>>,
    secondary_flow_listener: Option<Arc<dyn SecondaryFlowListener>>,
}

impl BackwardTaintAnalysis {
    pub fn new(program: Arc<Program>, config: InfoflowConfig) -> Self {
        Self {
            program,
            config,
            definitions: vec![],
            summaries: vec![],
            result_listeners: vec![],
            secondary_flow_listener: None,
        }
    }

    pub fn with_definitions(
        mut self,
        definitions: impl IntoIterator<Item = SourceSinkDefinition>,
    ) -> Self {
        self.definitions.extend(definitions);
        self
    }

    /// Library summaries; without any, no wrapper is installed
    pub fn with_summaries(mut self, summaries: impl IntoIterator<Item = SummaryRule>) -> Self {
        self.summaries.extend(summaries);
        self
    }

    /// Load summaries from a JSON array of rules
    pub fn with_summaries_json(self, json: &str) -> Result<Self> {
        let rules: Vec<SummaryRule> = serde_json::from_str(json).map_err(|e| {
            crate::errors::TaintError::unsupported(format!("summary rules: {}", e))
        })?;
        Ok(self.with_summaries(rules))
    }

    pub fn with_result_listener(mut self, listener: Arc<dyn ResultListener>) -> Self {
        self.result_listeners.push(listener);
        self
    }

    pub fn with_secondary_flow_listener(mut self, listener: Arc<dyn SecondaryFlowListener>) -> Self {
        self.secondary_flow_listener = Some(listener);
        self
    }

    pub fn config(&self) -> &InfoflowConfig {
        &self.config
    }

    fn build_manager(&self) -> InfoflowManager {
        let icfg = Arc::new(BackwardsIcfg::new(self.program.clone()));
        let aliasing = Arc::new(AliasAnalyzer::new(self.program.clone(), &self.config));
        let type_utils = TypeUtils::new(self.program.clone(), self.config.enable_type_checking);
        let ssm = MethodSourceSinkManager::new(self.definitions.iter().cloned());

        let mut manager = InfoflowManager::new(self.config.clone(), icfg, aliasing, type_utils)
            .with_source_sink_manager(Arc::new(ssm));
        if !self.summaries.is_empty() {
            let wrapper = SummaryTaintWrapper::new(self.summaries.iter().cloned());
            manager = manager.with_taint_wrapper(Arc::new(wrapper));
        }
        if let Some(listener) = &self.secondary_flow_listener {
            manager = manager.with_secondary_flow_listener(listener.clone());
        }
        for listener in &self.result_listeners {
            manager.results().add_listener(listener.clone());
        }
        manager
    }

    /// Run the analysis to completion (or until it is terminated)
    pub fn run(&self) -> Result<InfoflowResults> {
        self.config.validate()?;
        let start = Instant::now();
        let manager = Arc::new(self.build_manager());

        tracing::info!(
            run_id = %manager.run_id(),
            stmts = self.program.stmt_count(),
            definitions = self.definitions.len(),
            summaries = self.summaries.len(),
            "backward taint analysis started"
        );

        let problem = BackwardTaintProblem::new(manager.clone());
        let solver = IFDSSolver::new(problem, manager.clone());
        let statistics = solver.solve();
        let results = InfoflowResults::collect(&manager, statistics);

        tracing::info!(
            run_id = %results.run_id,
            flows = results.len(),
            dropped = results.dropped,
            path_edges = results.statistics.num_path_edges,
            terminated_early = results.statistics.terminated_early,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "backward taint analysis finished"
        );
        Ok(results)
    }
}

impl std::fmt::Debug for BackwardTaintAnalysis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackwardTaintAnalysis")
            .field("stmts", &self.program.stmt_count())
            .field("definitions", &self.definitions.len())
            .field("summaries", &self.summaries.len())
            .finish()
    }
}
