/*
 * IFDS Tabulation Algorithm (Solver)
 *
 * Worklist tabulation over path edges (d1, n, d2) of the backward ICFG,
 * after Reps, Horwitz, Sagiv (1995) with the extensions of Naeem et al.
 *
 * Algorithm Overview:
 * 1. Seed the worklist with (zero, seed stmt, seed fact)
 * 2. Drain the worklist in batches; each edge is processed independently
 * 3. Calls:
 *    - call flow into every callee with a body, entering at its start points
 *    - record (callee, d3) -> caller edge as "incoming"
 *    - apply end summaries already known for (callee, d3)
 *    - call-to-return flow to every return site
 * 4. Exits:
 *    - record the end summary (method, d1) -> (exit, d2)
 *    - return flow to every incoming caller edge
 *    - zero contexts without callers return into all callers (unbalanced)
 * 5. Other statements: normal flow to every successor
 * 6. Stop at the fixed point or when termination is requested
 *
 * Batches run on a dedicated rayon pool when the `parallel` feature is on
 * and more than one solver thread is configured. All tables are concurrent
 * maps; no table guard is held while a flow function runs.
 *
 * References:
 * - Reps, Horwitz, Sagiv (1995): Original IFDS paper
 * - Naeem, Lhoták, Rodriguez (2010): Practical extensions
 * - Bodden et al. (2012): IFDS/IDE with Soot
 */

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::ifds_framework::{IFDSProblem, IFDSStatistics};
use super::manager::InfoflowManager;
use crate::features::taint_analysis::domain::Abstraction;
use crate::features::taint_analysis::ports::{EdgeSubmitter, FlowOutcome, PathEdge};
use crate::shared::models::{MethodId, StmtId};

/// Caller-side (d1, d2) pairs per call site
type Incoming = FxHashMap<StmtId, FxHashSet<(Abstraction, Abstraction)>>;

pub struct IFDSSolver<P: IFDSProblem> {
    problem: P,
    manager: Arc<InfoflowManager>,

    path_edges: DashSet<PathEdge>,
    /// (callee, d3 at its start point) -> call sites that entered with it
    incoming: DashMap<(MethodId, Abstraction), Incoming>,
    /// (method, d1) -> (exit stmt, d2) reaching the exit
    end_summary: DashMap<(MethodId, Abstraction), FxHashSet<(StmtId, Abstraction)>>,
    worklist: Mutex<Vec<PathEdge>>,

    propagations: AtomicUsize,
    accepted: AtomicUsize,
    summary_reuses: AtomicUsize,

    #[cfg(feature = "parallel")]
    pool: Option<rayon::ThreadPool>,
}

impl<P: IFDSProblem> IFDSSolver<P> {
    pub fn new(problem: P, manager: Arc<InfoflowManager>) -> Self {
        #[cfg(feature = "parallel")]
        let pool = Self::build_pool(manager.config().solver_threads);

        Self {
            problem,
            manager,
            path_edges: DashSet::new(),
            incoming: DashMap::new(),
            end_summary: DashMap::new(),
            worklist: Mutex::new(Vec::new()),
            propagations: AtomicUsize::new(0),
            accepted: AtomicUsize::new(0),
            summary_reuses: AtomicUsize::new(0),
            #[cfg(feature = "parallel")]
            pool,
        }
    }

    #[cfg(feature = "parallel")]
    fn build_pool(threads: usize) -> Option<rayon::ThreadPool> {
        if threads <= 1 {
            return None;
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("taint-solver-{}", i))
            .build()
        {
            Ok(pool) => Some(pool),
            Err(e) => {
                tracing::warn!(error = %e, "solver pool unavailable, running sequentially");
                None
            }
        }
    }

    pub fn problem(&self) -> &P {
        &self.problem
    }

    /// Run to the fixed point (or until terminated)
    pub fn solve(&self) -> IFDSStatistics {
        let start = Instant::now();
        let zero = self.problem.zero_value();
        for (stmt, fact) in self.problem.initial_seeds() {
            self.propagate(PathEdge::new(zero.clone(), stmt, fact));
        }

        let mut iterations = 0;
        loop {
            let batch = std::mem::take(&mut *self.worklist.lock());
            if batch.is_empty() || self.manager.is_terminated() {
                break;
            }
            iterations += 1;
            tracing::trace!(iteration = iterations, edges = batch.len(), "solver batch");
            self.process_batch(batch);
        }

        IFDSStatistics {
            num_path_edges: self.path_edges.len(),
            num_propagations: self.propagations.load(Ordering::Relaxed),
            num_end_summaries: self.end_summary.iter().map(|e| e.value().len()).sum(),
            num_summary_reuses: self.summary_reuses.load(Ordering::Relaxed),
            num_iterations: iterations,
            analysis_time_ms: start.elapsed().as_millis() as u64,
            terminated_early: self.manager.is_terminated(),
        }
    }

    #[cfg(feature = "parallel")]
    fn process_batch(&self, batch: Vec<PathEdge>) {
        use rayon::prelude::*;

        match &self.pool {
            Some(pool) => pool.install(|| {
                batch
                    .into_par_iter()
                    .for_each(|edge| self.process_edge(edge))
            }),
            None => batch.into_iter().for_each(|edge| self.process_edge(edge)),
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn process_batch(&self, batch: Vec<PathEdge>) {
        batch.into_iter().for_each(|edge| self.process_edge(edge));
    }

    fn process_edge(&self, edge: PathEdge) {
        if self.manager.is_terminated() {
            return;
        }
        let icfg = self.problem.icfg();
        let n = edge.target_node;
        if icfg.is_call_stmt(n) {
            self.process_call(&edge);
        } else {
            if icfg.is_exit_stmt(n) {
                self.process_exit(&edge);
            }
            if !icfg.succs_of(n).is_empty() {
                self.process_normal_flow(&edge);
            }
        }
    }

    fn process_call(&self, edge: &PathEdge) {
        let icfg = self.problem.icfg();
        let (d1, n, d2) = (&edge.source_fact, edge.target_node, &edge.target_fact);
        let return_sites = icfg.return_sites_of_call_at(n);

        for &callee in icfg.callees_of_call_at(n) {
            if !icfg.program().method(callee).has_body() {
                continue;
            }
            let outcome = self.problem.call_flow(d1, d2, n, callee, self);
            for d3 in self.accept(outcome) {
                // Register before reading summaries so a concurrent exit
                // sees either this caller or its own summary
                self.incoming
                    .entry((callee, d3.clone()))
                    .or_default()
                    .entry(n)
                    .or_default()
                    .insert((d1.clone(), d2.clone()));

                for sp in icfg.start_points_of(callee) {
                    self.propagate(PathEdge::new(d3.clone(), sp, d3.clone()));
                }

                let summaries: Vec<(StmtId, Abstraction)> = self
                    .end_summary
                    .get(&(callee, d3.clone()))
                    .map(|s| s.iter().cloned().collect())
                    .unwrap_or_default();
                if !summaries.is_empty() {
                    self.summary_reuses.fetch_add(1, Ordering::Relaxed);
                }
                for (exit, d4) in summaries {
                    for &r in return_sites {
                        let outcome = self.problem.return_flow(
                            &d3,
                            &d4,
                            n,
                            callee,
                            exit,
                            Some(r),
                            std::slice::from_ref(d1),
                            self,
                        );
                        for d5 in self.accept(outcome) {
                            self.propagate(PathEdge::new(d1.clone(), r, d5));
                        }
                    }
                }
            }
        }

        for &r in return_sites {
            let outcome = self.problem.call_to_return_flow(d1, d2, n, r, self);
            for d3 in self.accept(outcome) {
                self.propagate(PathEdge::new(d1.clone(), r, d3));
            }
        }
    }

    fn process_exit(&self, edge: &PathEdge) {
        let icfg = self.problem.icfg();
        let (d1, n, d2) = (&edge.source_fact, edge.target_node, &edge.target_fact);
        let method = icfg.method_of(n);

        let is_new = self
            .end_summary
            .entry((method, d1.clone()))
            .or_default()
            .insert((n, d2.clone()));
        if !is_new {
            return;
        }

        let callers: Vec<(StmtId, Vec<Abstraction>)> = self
            .incoming
            .get(&(method, d1.clone()))
            .map(|inc| {
                inc.iter()
                    .map(|(call, pairs)| {
                        let d1s: FxHashSet<Abstraction> =
                            pairs.iter().map(|(c, _)| c.clone()).collect();
                        (*call, d1s.into_iter().collect())
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (call, caller_d1s) in &callers {
            for &r in icfg.return_sites_of_call_at(*call) {
                let outcome = self.problem.return_flow(
                    d1,
                    d2,
                    *call,
                    method,
                    n,
                    Some(r),
                    caller_d1s,
                    self,
                );
                for d5 in self.accept(outcome) {
                    for d4 in caller_d1s {
                        self.propagate(PathEdge::new(d4.clone(), r, d5.clone()));
                    }
                }
            }
        }

        // Unbalanced return: the method was entered through a seed
        if callers.is_empty() && d1.is_zero() && self.problem.follow_returns_past_seeds() {
            let zero = self.problem.zero_value();
            for &call in icfg.callers_of(method) {
                for &r in icfg.return_sites_of_call_at(call) {
                    let outcome = self.problem.return_flow(
                        d1,
                        d2,
                        call,
                        method,
                        n,
                        Some(r),
                        std::slice::from_ref(&zero),
                        self,
                    );
                    for d5 in self.accept(outcome) {
                        self.propagate(PathEdge::new(zero.clone(), r, d5));
                    }
                }
            }
        }
    }

    fn process_normal_flow(&self, edge: &PathEdge) {
        let icfg = self.problem.icfg();
        let (d1, n, d2) = (&edge.source_fact, edge.target_node, &edge.target_fact);
        for &m in icfg.succs_of(n) {
            let outcome = self.problem.normal_flow(d1, d2, n, m, self);
            for d3 in self.accept(outcome) {
                self.propagate(PathEdge::new(d1.clone(), m, d3));
            }
        }
    }

    /// Facts of a flow outcome; a redirect is propagated in place of them
    fn accept(&self, outcome: FlowOutcome) -> FxHashSet<Abstraction> {
        match outcome {
            FlowOutcome::Continue(facts) => facts,
            FlowOutcome::Redirect(edge) => {
                self.propagate(edge);
                FxHashSet::default()
            }
        }
    }

    fn propagate(&self, edge: PathEdge) {
        if self.manager.is_terminated() {
            return;
        }
        self.propagations.fetch_add(1, Ordering::Relaxed);
        if self.path_edges.contains(&edge) || !self.path_edges.insert(edge.clone()) {
            return;
        }

        let max = self.manager.config().max_propagations;
        let accepted = self.accepted.fetch_add(1, Ordering::Relaxed) + 1;
        if max > 0 && accepted > max {
            tracing::warn!(max, "propagation limit reached, terminating");
            self.manager.force_terminate();
            return;
        }

        let PathEdge {
            source_fact,
            target_node,
            target_fact,
        } = edge;
        let target_fact = if target_fact.is_zero() {
            target_fact
        } else {
            self.manager.arena().register(target_fact)
        };
        tracing::trace!(stmt = %target_node, fact = %target_fact, "path edge");
        self.worklist
            .lock()
            .push(PathEdge::new(source_fact, target_node, target_fact));
    }

    /// Facts that reached `stmt` in any context
    #[cfg(test)]
    fn facts_at(&self, stmt: StmtId) -> FxHashSet<Abstraction> {
        self.path_edges
            .iter()
            .filter(|e| e.target_node == stmt)
            .map(|e| e.target_fact.clone())
            .collect()
    }
}

impl<P: IFDSProblem> EdgeSubmitter for IFDSSolver<P> {
    fn submit_edge(&self, edge: PathEdge) {
        self.propagate(edge);
    }
}

impl<P: IFDSProblem> std::fmt::Debug for IFDSSolver<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IFDSSolver")
            .field("path_edges", &self.path_edges.len())
            .field("worklist", &self.worklist.lock().len())
            .finish_non_exhaustive()
    }
}
