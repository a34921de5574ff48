/*
 * Taint Analysis Ports (Hexagonal Architecture)
 *
 * Boundaries between the propagation rules and their collaborators:
 *
 *                    +-------------------------+
 *                    |   Solver (worklist)     |
 *                    +------------+------------+
 *                                 |  PathEdge / FlowOutcome
 *                    +------------v------------+
 *                    |  Problem + rule chain   |
 *                    +------------+------------+
 *                                 |
 *      +-------------+------------+-------------+---------------+
 *      |             |                          |               |
 *  InfoflowCfg   Aliasing        ReversibleSourceSinkManager  ReversibleTaintWrapper
 *
 * All collaborators are shared across solver threads and must be
 * `Send + Sync`. Queries are pure; none of them mutates analysis state.
 */

use rustc_hash::FxHashSet;
use std::sync::Arc;

use super::domain::{Abstraction, AccessPath, AccessPathFactory, SourceSinkDefinition};
use crate::shared::models::{
    Field, Local, MethodId, MethodSig, Program, Stmt, StmtId, StmtKind, Value, STRING_CLASS,
};

// ============================================================================
// Solver edges
// ============================================================================

/// (d1, n, d2): `d2` holds at `n` in the context of `d1`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathEdge {
    /// Fact at the start point of the enclosing method
    pub source_fact: Abstraction,
    pub target_node: StmtId,
    pub target_fact: Abstraction,
}

impl PathEdge {
    pub fn new(source_fact: Abstraction, target_node: StmtId, target_fact: Abstraction) -> Self {
        Self {
            source_fact,
            target_node,
            target_fact,
        }
    }
}

/// Result of a flow function
#[derive(Debug, Clone)]
pub enum FlowOutcome {
    /// Facts flowing out of the edge
    Continue(FxHashSet<Abstraction>),
    /// Replace this edge's outcome with a fresh path edge
    Redirect(PathEdge),
}

impl FlowOutcome {
    pub fn none() -> Self {
        FlowOutcome::Continue(FxHashSet::default())
    }

    pub fn single(abs: Abstraction) -> Self {
        let mut set = FxHashSet::default();
        set.insert(abs);
        FlowOutcome::Continue(set)
    }

    pub fn from_facts(facts: impl IntoIterator<Item = Abstraction>) -> Self {
        FlowOutcome::Continue(facts.into_iter().collect())
    }

    /// Outgoing facts, empty for a redirect
    pub fn into_facts(self) -> FxHashSet<Abstraction> {
        match self {
            FlowOutcome::Continue(facts) => facts,
            FlowOutcome::Redirect(_) => FxHashSet::default(),
        }
    }
}

/// Reentrant, thread-safe edge injection into the running solver
pub trait EdgeSubmitter: Send + Sync {
    fn submit_edge(&self, edge: PathEdge);
}

// ============================================================================
// Interprocedural CFG (backward view)
// ============================================================================

/// Control-flow queries in the direction of the search
///
/// Successors are forward predecessors, start points are forward exits and
/// the exit statement of a method is its forward entry. Dominance queries
/// and static-field usage are answered on the forward program.
pub trait InfoflowCfg: Send + Sync {
    fn program(&self) -> &Program;

    fn method_of(&self, stmt: StmtId) -> MethodId {
        self.program().method_of(stmt)
    }

    fn stmt(&self, stmt: StmtId) -> &Stmt {
        self.program().stmt(stmt)
    }

    /// Statements reached next by the backward search
    fn succs_of(&self, stmt: StmtId) -> &[StmtId];

    /// Statements the backward search came from (forward successors)
    fn preds_of(&self, stmt: StmtId) -> &[StmtId];

    fn start_points_of(&self, method: MethodId) -> Vec<StmtId>;

    fn is_exit_stmt(&self, stmt: StmtId) -> bool;

    fn is_start_point(&self, stmt: StmtId) -> bool;

    fn is_call_stmt(&self, stmt: StmtId) -> bool {
        self.stmt(stmt).contains_invoke()
    }

    fn return_sites_of_call_at(&self, call: StmtId) -> &[StmtId];

    fn callees_of_call_at(&self, call: StmtId) -> &[MethodId];

    fn callers_of(&self, method: MethodId) -> &[StmtId];

    /// Forward immediate dominator, `None` at method level
    fn dominator_of(&self, stmt: StmtId) -> Option<StmtId>;

    /// Forward immediate postdominator, `None` at method level
    fn postdominator_of(&self, stmt: StmtId) -> Option<StmtId>;

    /// Whether the backward edge `from -> to` is a forward exceptional edge
    fn is_exceptional_edge_between(&self, from: StmtId, to: StmtId) -> bool;

    /// Branches inside the method that control whether `stmt` executes,
    /// nearest first
    fn conditional_branches_intraprocedural(&self, stmt: StmtId) -> Vec<StmtId>;

    /// Same as the intraprocedural query, continued through all callers
    fn conditional_branches_interprocedural(&self, stmt: StmtId) -> Vec<StmtId>;

    /// Whether the method or anything it calls reads or writes `field`
    fn is_static_field_used(&self, method: MethodId, field: &Field) -> bool;

    /// Whether the method body assigns `local`
    fn method_writes_value(&self, method: MethodId, local: &Local) -> bool;
}

// ============================================================================
// Aliasing oracle
// ============================================================================

pub trait Aliasing: Send + Sync {
    /// Both values may denote the same location at this point
    fn may_alias(&self, v1: &Value, v2: &Value) -> bool;

    /// Both locals always denote the same object at `stmt`
    fn must_alias(&self, l1: &Local, l2: &Local, stmt: StmtId) -> bool;

    /// Facts needed to keep every alias of the location written at `stmt`
    /// tainted along with `new_abs`
    fn compute_aliases(
        &self,
        d1: &Abstraction,
        stmt: StmtId,
        target: &Value,
        new_abs: &Abstraction,
    ) -> Vec<Abstraction>;

    /// `val` may alias the root local of `ap`
    fn may_alias_base(&self, val: &Value, ap: &AccessPath) -> bool {
        match ap.plain_value() {
            Some(local) => self.may_alias(val, &Value::Local(local.clone())),
            None => false,
        }
    }

    /// Path of `ap` as seen through the field reference `val`, if `ap` is
    /// rooted at that field
    fn may_alias_access_path(&self, ap: &AccessPath, val: &Value) -> Option<AccessPath> {
        match val {
            Value::InstanceField { base, field } => {
                let base_matches = ap.plain_value() == Some(base);
                (base_matches && ap.first_field_matches(field)).then(|| ap.clone())
            }
            Value::StaticField(field) => {
                (ap.is_static_field_ref() && ap.first_field_matches(field)).then(|| ap.clone())
            }
            _ => None,
        }
    }

    /// Whether writing `val` at `stmt` can create aliases of the fact
    fn can_have_aliases(&self, stmt: &Stmt, val: &Value, source: &Abstraction) -> bool {
        if let StmtKind::Assign { left, .. } = &stmt.kind {
            if let (Value::Local(l), Some(plain)) = (left, source.access_path().plain_value()) {
                if l == plain {
                    return false;
                }
            }
            if matches!(val, Value::ArrayRef { .. }) || val.is_field_ref() {
                return true;
            }
        }
        heap_value_with_aliases(stmt, val, source)
    }

    /// Like [`Aliasing::can_have_aliases`] for values read on the right side
    fn can_have_aliases_right_side(
        &self,
        stmt: &Stmt,
        val: &Value,
        source: &Abstraction,
    ) -> bool {
        if let StmtKind::Assign { right, .. } = &stmt.kind {
            if let (Value::Local(r), Some(plain)) = (right, source.access_path().plain_value()) {
                if r == plain {
                    return false;
                }
            }
            if matches!(val, Value::ArrayRef { .. }) || val.is_field_ref() {
                return true;
            }
        }
        heap_value_with_aliases(stmt, val, source)
    }
}

/// Call of a `java.lang.String` constructor
pub fn is_string_constructor_call(stmt: &Stmt) -> bool {
    stmt.invoke_expr()
        .map(|inv| inv.method.is_constructor() && inv.method.class == STRING_CLASS)
        .unwrap_or(false)
}

fn heap_value_with_aliases(stmt: &Stmt, val: &Value, source: &Abstraction) -> bool {
    let ty = val.ty();
    if ty.is_primitive() || val.is_constant() {
        return false;
    }
    if ty.is_string()
        && !is_string_constructor_call(stmt)
        && !source.access_path().can_have_immutable_aliases()
    {
        return false;
    }
    val.is_field_ref() || matches!(val, Value::Local(l) if l.ty.is_array())
}

// ============================================================================
// Source/sink manager
// ============================================================================

/// Definitions matched at a statement plus the access paths they taint
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub definitions: Vec<Arc<SourceSinkDefinition>>,
    pub access_paths: Vec<AccessPath>,
    /// Definitions naming each entry of `access_paths`, index for index
    pub path_definitions: Vec<Vec<Arc<SourceSinkDefinition>>>,
    pub user_data: Option<String>,
}

impl SourceInfo {
    /// Definitions that name `ap`; empty if `ap` is not one of ours
    pub fn definitions_for(&self, ap: &AccessPath) -> Vec<Arc<SourceSinkDefinition>> {
        self.access_paths
            .iter()
            .position(|p| p == ap)
            .and_then(|i| self.path_definitions.get(i))
            .cloned()
            .unwrap_or_default()
    }
}

/// Definitions matched at a terminal statement
#[derive(Debug, Clone)]
pub struct SinkInfo {
    pub definitions: Vec<Arc<SourceSinkDefinition>>,
    pub user_data: Option<String>,
}

/// Source/sink lookups in both directions
///
/// Running backward, a sink call seeds the search (`inverse_sink_info`) and
/// a source call ends it (`inverse_source_info`).
pub trait ReversibleSourceSinkManager: Send + Sync {
    fn source_info(&self, stmt: &Stmt, factory: &AccessPathFactory) -> Option<SourceInfo>;

    /// Forward sink check; with `ap`, only if the path reaches a checked
    /// location
    fn sink_info(&self, stmt: &Stmt, ap: Option<&AccessPath>) -> Option<SinkInfo>;

    /// Source call whose tainted location is the root of `ap`
    fn inverse_source_info(&self, stmt: &Stmt, ap: Option<&AccessPath>) -> Option<SinkInfo>;

    /// Sink call and the access paths of its checked locations
    fn inverse_sink_info(&self, stmt: &Stmt, factory: &AccessPathFactory) -> Option<SourceInfo>;

    fn is_source_stmt(&self, stmt: &Stmt) -> bool {
        self.inverse_source_info(stmt, None).is_some()
    }

    fn is_sink_stmt(&self, stmt: &Stmt) -> bool {
        self.sink_info(stmt, None).is_some()
    }
}

// ============================================================================
// Taint wrapper
// ============================================================================

/// Precomputed behavior of library callees, usable in reverse
pub trait ReversibleTaintWrapper: Send + Sync {
    fn supports_callee(&self, method: &MethodSig) -> bool;

    /// The wrapper owns the fact at this call: the callee body is never
    /// entered for it and the wrapper's answer is complete
    fn is_exclusive(&self, stmt: &Stmt, abs: &Abstraction) -> bool;

    /// Facts before the call that lead to `abs` after it; `None` when the
    /// callee is not modeled
    fn inverse_taints_for_method(
        &self,
        stmt: &Stmt,
        d1: &Abstraction,
        abs: &Abstraction,
        factory: &AccessPathFactory,
    ) -> Option<FxHashSet<Abstraction>>;
}

/// Notified when an active fact crosses a call or condition that a
/// secondary analysis may want to follow
pub trait SecondaryFlowListener: Send + Sync {
    fn on_secondary_flow(&self, d1: &Abstraction, source: &Abstraction, stmt: &Stmt);
}
