/*
 * IFDS Framework (Interprocedural Finite Distributive Subset Problems)
 *
 * The contract between the tabulation solver and a concrete dataflow
 * problem. Facts are taint abstractions, nodes are statements of the
 * (backward) interprocedural CFG.
 *
 * A problem answers four flow functions:
 * - normal:          intraprocedural edge `stmt -> dest`
 * - call:            from a call site into one callee's start points
 * - return:          from a callee exit back to one return site
 * - call-to-return:  across a call without entering the callee
 *
 * Every flow function may inject additional path edges through the
 * `EdgeSubmitter` it receives, or replace its own outcome with a
 * `FlowOutcome::Redirect`.
 *
 * References:
 * - Reps, Horwitz, Sagiv (1995): "Precise Interprocedural Dataflow Analysis via Graph Reachability"
 * - Naeem, Lhoták, Rodriguez (2010): "Practical Extensions to the IFDS Algorithm"
 * - Bodden et al. (2012): "Inter-procedural Data-flow Analysis with IFDS/IDE and Soot"
 */

use serde::{Deserialize, Serialize};

use crate::features::taint_analysis::domain::Abstraction;
use crate::features::taint_analysis::ports::{EdgeSubmitter, FlowOutcome, InfoflowCfg};
use crate::shared::models::{MethodId, StmtId};

/// Dataflow problem driven by [`super::ifds_solver::IFDSSolver`]
pub trait IFDSProblem: Send + Sync {
    /// Graph the solver walks
    fn icfg(&self) -> &dyn InfoflowCfg;

    /// The fact that holds everywhere
    fn zero_value(&self) -> Abstraction {
        Abstraction::zero()
    }

    /// Statements and facts the tabulation starts from
    fn initial_seeds(&self) -> Vec<(StmtId, Abstraction)>;

    /// Whether facts reaching the exit of a method entered only through a
    /// seed continue into every caller
    fn follow_returns_past_seeds(&self) -> bool {
        true
    }

    fn normal_flow(
        &self,
        d1: &Abstraction,
        source: &Abstraction,
        stmt: StmtId,
        dest: StmtId,
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome;

    fn call_flow(
        &self,
        d1: &Abstraction,
        source: &Abstraction,
        call: StmtId,
        callee: MethodId,
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome;

    /// `callee_d1` is the context at the callee's start point, `caller_d1s`
    /// the contexts of the caller edges that reached `call_site`
    fn return_flow(
        &self,
        callee_d1: &Abstraction,
        source: &Abstraction,
        call_site: StmtId,
        callee: MethodId,
        exit: StmtId,
        return_site: Option<StmtId>,
        caller_d1s: &[Abstraction],
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome;

    fn call_to_return_flow(
        &self,
        d1: &Abstraction,
        source: &Abstraction,
        call: StmtId,
        return_site: StmtId,
        submitter: &dyn EdgeSubmitter,
    ) -> FlowOutcome;
}

/// Counters of one solver run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IFDSStatistics {
    /// Distinct path edges accepted
    pub num_path_edges: usize,

    /// Propagation attempts, duplicates included
    pub num_propagations: usize,

    /// End summaries (callee context, exit, fact) recorded
    pub num_end_summaries: usize,

    /// Times an existing end summary was applied at a new call site
    /// instead of re-analyzing the callee
    pub num_summary_reuses: usize,

    /// Worklist batches processed
    pub num_iterations: usize,

    /// Analysis time (milliseconds)
    pub analysis_time_ms: u64,

    /// The run stopped before reaching the fixed point
    pub terminated_early: bool,
}
