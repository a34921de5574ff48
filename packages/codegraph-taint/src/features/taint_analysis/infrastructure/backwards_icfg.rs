/*
 * Backward Interprocedural CFG
 *
 * Reverses the program's control flow for the backward search:
 *
 *   forward            backward
 *   -------            --------
 *   succs(u)      ->   preds_of(u)
 *   preds(u)      ->   succs_of(u)
 *   exits         ->   start points
 *   entry nop     ->   exit statement
 *   preds(call)   ->   return sites
 *
 * Dominance stays forward: dominator_of(u) is the forward immediate
 * dominator, postdominator_of(u) the forward immediate postdominator. Both
 * are computed per method with petgraph and memoized for the run.
 */

use dashmap::DashMap;
use petgraph::algo::dominators::{simple_fast, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::sync::Arc;

use crate::features::taint_analysis::ports::InfoflowCfg;
use crate::shared::models::{Field, Local, MethodId, Program, StmtId, StmtKind, Value};

/// Immediate dominators and postdominators of one method body
#[derive(Debug, Default)]
struct MethodDominance {
    dominators: FxHashMap<StmtId, StmtId>,
    postdominators: FxHashMap<StmtId, StmtId>,
}

impl MethodDominance {
    fn compute(program: &Program, method: MethodId) -> Self {
        let stmts = program.method(method).stmts();
        let Some(&entry) = stmts.first() else {
            return Self::default();
        };

        // Forward graph rooted at the entry nop
        let mut forward: DiGraph<StmtId, ()> = DiGraph::with_capacity(stmts.len(), stmts.len());
        let index: FxHashMap<StmtId, NodeIndex> =
            stmts.iter().map(|&s| (s, forward.add_node(s))).collect();
        for &s in stmts {
            for succ in program.succs(s) {
                forward.add_edge(index[&s], index[succ], ());
            }
        }
        let doms = simple_fast(&forward, index[&entry]);
        let dominators = immediate(&doms, stmts, &index, |n| Some(forward[n]));

        // Reversed graph below a virtual exit that joins every forward exit
        let mut reversed: DiGraph<Option<StmtId>, ()> =
            DiGraph::with_capacity(stmts.len() + 1, stmts.len() * 2);
        let rev_index: FxHashMap<StmtId, NodeIndex> =
            stmts.iter().map(|&s| (s, reversed.add_node(Some(s)))).collect();
        let virtual_exit = reversed.add_node(None);
        for &s in stmts {
            let succs = program.succs(s);
            if succs.is_empty() {
                reversed.add_edge(virtual_exit, rev_index[&s], ());
            }
            for succ in succs {
                reversed.add_edge(rev_index[succ], rev_index[&s], ());
            }
        }
        let postdoms = simple_fast(&reversed, virtual_exit);
        let postdominators = immediate(&postdoms, stmts, &rev_index, |n| reversed[n]);

        Self {
            dominators,
            postdominators,
        }
    }
}

fn immediate(
    doms: &Dominators<NodeIndex>,
    stmts: &[StmtId],
    index: &FxHashMap<StmtId, NodeIndex>,
    stmt_of: impl Fn(NodeIndex) -> Option<StmtId>,
) -> FxHashMap<StmtId, StmtId> {
    stmts
        .iter()
        .filter_map(|s| {
            let idom = doms.immediate_dominator(index[s])?;
            stmt_of(idom).map(|d| (*s, d))
        })
        .collect()
}

/// Statement reads or writes the static field
fn touches_static_field(kind: &StmtKind, field: &Field) -> bool {
    let is_field = |v: &Value| matches!(v, Value::StaticField(f) if f == field);
    match kind {
        StmtKind::Assign { left, right } => is_field(left) || is_field(right),
        StmtKind::Identity { right, .. } => is_field(right),
        _ => false,
    }
}

pub struct BackwardsIcfg {
    program: Arc<Program>,
    dominance: DashMap<MethodId, Arc<MethodDominance>>,
    static_field_uses: DashMap<(MethodId, Field), bool>,
}

impl BackwardsIcfg {
    pub fn new(program: Arc<Program>) -> Self {
        Self {
            program,
            dominance: DashMap::new(),
            static_field_uses: DashMap::new(),
        }
    }

    fn dominance_of(&self, method: MethodId) -> Arc<MethodDominance> {
        if let Some(hit) = self.dominance.get(&method) {
            return hit.clone();
        }
        let computed = Arc::new(MethodDominance::compute(&self.program, method));
        self.dominance.entry(method).or_insert(computed).clone()
    }

    /// Predecessors on the same nesting level: a branch whose body is
    /// skipped entirely is stepped over through the dominator
    fn same_level_predecessors(&self, stmt: StmtId) -> Vec<StmtId> {
        let preds = self.program.preds(stmt);
        match preds {
            [] => return vec![],
            [pred] => {
                let branches = self.program.stmt(*pred).is_branching();
                if !branches || self.postdominator_of(*pred) != Some(stmt) {
                    return vec![*pred];
                }
            }
            _ => {}
        }
        match self.dominator_of(stmt) {
            Some(dom) => self.program.preds(dom).to_vec(),
            None => vec![],
        }
    }

    fn conditionals_recursive(&self, stmt: StmtId, out: &mut Vec<StmtId>, done: &mut FxHashSet<StmtId>) {
        let method = self.program.method_of(stmt);
        let mut worklist: VecDeque<StmtId> = self
            .same_level_predecessors(stmt)
            .into_iter()
            .filter(|p| done.insert(*p))
            .collect();

        while let Some(item) = worklist.pop_front() {
            if self.program.stmt(item).is_branching() {
                out.push(item);
            }
            // Continue in every caller once the entry is reached
            if self.is_exit_stmt(item) {
                for &caller in self.program.callers(method) {
                    if done.insert(caller) {
                        self.conditionals_recursive(caller, out, done);
                    }
                }
            }
            for pred in self.same_level_predecessors(item) {
                if done.insert(pred) {
                    worklist.push_back(pred);
                }
            }
        }
    }

    fn uses_static_field(&self, method: MethodId, field: &Field) -> bool {
        let mut visited = FxHashSet::default();
        let mut worklist = vec![method];
        while let Some(current) = worklist.pop() {
            if !visited.insert(current) {
                continue;
            }
            let key = (current, field.clone());
            if let Some(known) = self.static_field_uses.get(&key) {
                if *known {
                    return true;
                }
                continue;
            }
            for &s in self.program.method(current).stmts() {
                if touches_static_field(&self.program.stmt(s).kind, field) {
                    return true;
                }
                worklist.extend(self.program.callees(s).iter().copied());
            }
        }
        false
    }
}

impl InfoflowCfg for BackwardsIcfg {
    fn program(&self) -> &Program {
        &self.program
    }

    fn succs_of(&self, stmt: StmtId) -> &[StmtId] {
        self.program.preds(stmt)
    }

    fn preds_of(&self, stmt: StmtId) -> &[StmtId] {
        self.program.succs(stmt)
    }

    fn start_points_of(&self, method: MethodId) -> Vec<StmtId> {
        self.program
            .method(method)
            .stmts()
            .iter()
            .copied()
            .filter(|&s| self.program.succs(s).is_empty())
            .collect()
    }

    fn is_exit_stmt(&self, stmt: StmtId) -> bool {
        self.program.method(self.program.method_of(stmt)).entry() == Some(stmt)
    }

    fn is_start_point(&self, stmt: StmtId) -> bool {
        self.program.succs(stmt).is_empty()
    }

    fn return_sites_of_call_at(&self, call: StmtId) -> &[StmtId] {
        self.program.preds(call)
    }

    fn callees_of_call_at(&self, call: StmtId) -> &[MethodId] {
        self.program.callees(call)
    }

    fn callers_of(&self, method: MethodId) -> &[StmtId] {
        self.program.callers(method)
    }

    fn dominator_of(&self, stmt: StmtId) -> Option<StmtId> {
        let method = self.program.method_of(stmt);
        self.dominance_of(method).dominators.get(&stmt).copied()
    }

    fn postdominator_of(&self, stmt: StmtId) -> Option<StmtId> {
        let method = self.program.method_of(stmt);
        self.dominance_of(method).postdominators.get(&stmt).copied()
    }

    fn is_exceptional_edge_between(&self, from: StmtId, to: StmtId) -> bool {
        self.program.is_exceptional_edge(to, from)
    }

    fn conditional_branches_intraprocedural(&self, stmt: StmtId) -> Vec<StmtId> {
        let mut done = FxHashSet::default();
        let mut out = vec![];
        let mut worklist: VecDeque<StmtId> = self.same_level_predecessors(stmt).into();
        while let Some(item) = worklist.pop_front() {
            if !done.insert(item) {
                continue;
            }
            if self.program.stmt(item).is_branching() {
                out.push(item);
            }
            worklist.extend(
                self.same_level_predecessors(item)
                    .into_iter()
                    .filter(|p| !done.contains(p)),
            );
        }
        out
    }

    fn conditional_branches_interprocedural(&self, stmt: StmtId) -> Vec<StmtId> {
        let mut out = vec![];
        let mut done = FxHashSet::default();
        self.conditionals_recursive(stmt, &mut out, &mut done);
        out
    }

    fn is_static_field_used(&self, method: MethodId, field: &Field) -> bool {
        let key = (method, field.clone());
        if let Some(known) = self.static_field_uses.get(&key) {
            return *known;
        }
        let used = self.uses_static_field(method, field);
        self.static_field_uses.insert(key, used);
        used
    }

    fn method_writes_value(&self, method: MethodId, local: &Local) -> bool {
        self.program.method(method).stmts().iter().any(|&s| {
            matches!(
                &self.program.stmt(s).kind,
                StmtKind::Assign { left: Value::Local(l), .. } if l == local
            )
        })
    }
}

impl std::fmt::Debug for BackwardsIcfg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackwardsIcfg")
            .field("stmts", &self.program.stmt_count())
            .field("dominance_cached", &self.dominance.len())
            .finish()
    }
}
