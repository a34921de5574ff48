//! Implicit flows
//!
//! Facts carry the branch that controls them as their dominator. A tainted
//! write inside a branch leaves an empty-path fact behind; when that fact
//! reaches its dominator the branch condition becomes tainted. Facts that
//! entered a branch with a non-empty path are re-injected without the
//! dominator once they leave it.

use std::sync::Arc;

use crate::features::taint_analysis::domain::{AccessPath, Abstraction};
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::{FlowOutcome, PathEdge};
use crate::shared::models::{Method, Stmt, StmtKind, Value};

pub struct ImplicitPropagationRule {
    manager: Arc<InfoflowManager>,
}

impl ImplicitPropagationRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }

    /// A fact reached the branch that dominates it. Conditional facts are
    /// dropped; facts with a real path continue without the dominator.
    fn leave_branch(&self, context: &Abstraction, source: &Abstraction, stmt: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        kill.kill_all = true;
        if source.access_path().is_empty() {
            return FlowOutcome::none();
        }
        FlowOutcome::Redirect(PathEdge::new(
            context.clone(),
            stmt.id,
            source.remove_dominator(stmt.id),
        ))
    }

    /// Condition operands of a branch that an update inside it depends on
    fn taint_condition(&self, source: &Abstraction, stmt: &Stmt) -> FlowOutcome {
        let Some(condition) = stmt.condition() else {
            return FlowOutcome::none();
        };
        let operands = match condition {
            Value::Local(_) => vec![condition.clone()],
            other => other.uses().into_iter().filter(|v| !v.is_constant()).collect(),
        };

        let factory = self.manager.access_path_factory();
        let outer = self.manager.icfg().dominator_of(stmt.id);
        let mut out = vec![];
        for operand in operands {
            let Some(ap) = factory.create_access_path(&operand, false) else {
                continue;
            };
            let abs = source.derive_condition(ap, stmt.id);
            if let Some(outer) = outer {
                out.push(abs.derive_new_abstraction_with_dominator(outer, None));
            }
            out.push(abs);
        }
        tracing::debug!(stmt = %stmt, facts = out.len(), "branch condition tainted");
        FlowOutcome::from_facts(out)
    }
}

impl TaintPropagationRule for ImplicitPropagationRule {
    fn name(&self) -> &'static str {
        "implicit_flow"
    }

    fn propagate_normal_flow(&self, state: &FlowState<'_>, dest: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        if source.is_zero() {
            return FlowOutcome::none();
        }

        if source.is_dominator(stmt.id) {
            if !source.access_path().is_empty() {
                return self.leave_branch(state.d1, source, stmt, kill);
            }
            // An update happened inside the branch
            kill.kill_source = true;
            return self.taint_condition(source, stmt);
        }

        let icfg = self.manager.icfg();
        if source.access_path().is_empty() {
            // Exceptional edges are implicit: the next write depends on them
            if icfg.is_exceptional_edge_between(stmt.id, dest.id) {
                if let StmtKind::Assign { left, .. } = &dest.kind {
                    if let Some(ap) = self.manager.access_path_factory().create_access_path(left, false) {
                        return FlowOutcome::single(source.derive_new_abstraction(ap, Some(stmt.id)));
                    }
                }
            }
            return FlowOutcome::none();
        }

        // Entering a branch; writes to the fact itself are handled by the
        // base flow functions
        let affected = stmt
            .left_op()
            .map(|left| self.manager.aliasing().may_alias_base(&left, source.access_path()))
            .unwrap_or(false);
        match icfg.dominator_of(stmt.id) {
            Some(dom) if dom != dest.id && !affected => {
                kill.kill_source = true;
                FlowOutcome::single(source.derive_new_abstraction_with_dominator(dom, Some(stmt.id)))
            }
            _ => FlowOutcome::none(),
        }
    }

    fn propagate_call_flow(&self, state: &FlowState<'_>, callee: &Method, kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        if source.is_zero() {
            return FlowOutcome::none();
        }
        if source.is_dominator(stmt.id) {
            return self.leave_branch(state.d1, source, stmt, kill);
        }
        // Nothing is derived backward from an empty path inside a callee
        if source.access_path().is_empty() {
            kill.kill_all = true;
            return FlowOutcome::none();
        }

        // Constant returns decide the assigned value through control flow
        let StmtKind::Assign { left, .. } = &stmt.kind else {
            return FlowOutcome::none();
        };
        if source.dominator().is_some() || !self.manager.aliasing().may_alias_base(left, source.access_path()) {
            return FlowOutcome::none();
        }
        let icfg = self.manager.icfg();
        let mut out = vec![];
        for &unit in callee.stmts() {
            let StmtKind::Return(Some(ret_val)) = &icfg.stmt(unit).kind else {
                continue;
            };
            if !ret_val.is_constant() {
                continue;
            }
            let abs = source
                .derive_conditional_update(stmt.id)
                .derive_new_abstraction_with_turn_unit(Some(stmt.id));
            for cond in icfg.conditional_branches_intraprocedural(unit) {
                out.push(abs.derive_new_abstraction_with_dominator(cond, None));
            }
        }
        FlowOutcome::from_facts(out)
    }

    fn propagate_call_to_return_flow(&self, state: &FlowState<'_>, kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        let icfg = self.manager.icfg();

        if source.is_zero() {
            let Some(ssm) = self.manager.source_sink_manager() else {
                return FlowOutcome::none();
            };
            kill.kill_source = true;
            let Some(sink) = ssm.inverse_sink_info(stmt, self.manager.access_path_factory()) else {
                return FlowOutcome::none();
            };
            if sink.access_paths.is_empty() {
                return FlowOutcome::none();
            }

            // Every sink call inside a branch leaks the condition
            let arena = self.manager.arena();
            let mut out = vec![];
            for cond in icfg.conditional_branches_interprocedural(stmt.id) {
                let root = Abstraction::new_root(
                    sink.definitions.clone(),
                    AccessPath::empty(),
                    stmt.id,
                    sink.user_data.clone(),
                    false,
                    false,
                )
                .with_corresponding_call_site(Some(stmt.id))
                .with_dominator(Some(cond));
                out.push(arena.register(root));
            }

            let method = icfg.program().method(stmt.method);
            if !method.is_static {
                let this_ap = method
                    .this_local()
                    .and_then(|this| self.manager.access_path_factory().create_access_path(&Value::local(this), false));
                // Only the definitions naming the first checked path
                let definitions = sink
                    .access_paths
                    .first()
                    .map(|ap| sink.definitions_for(ap))
                    .unwrap_or_default();
                if let Some(this_ap) = this_ap {
                    let root = Abstraction::new_root(
                        definitions,
                        this_ap,
                        stmt.id,
                        sink.user_data.clone(),
                        false,
                        false,
                    )
                    .with_corresponding_call_site(Some(stmt.id));
                    out.push(arena.register(root));
                }
            }
            return FlowOutcome::from_facts(out);
        }

        if source.is_dominator(stmt.id) {
            return self.leave_branch(state.d1, source, stmt, kill);
        }

        // Conditional update of the assigned value
        if let StmtKind::Assign { left, .. } = &stmt.kind {
            if source.dominator().is_some()
                && self.manager.aliasing().may_alias_base(left, source.access_path())
            {
                kill.kill_source = true;
                return FlowOutcome::single(source.derive_conditional_update(stmt.id));
            }
        }
        FlowOutcome::none()
    }

    fn propagate_return_flow(
        &self,
        state: &FlowState<'_>,
        _caller_d1s: &[Abstraction],
        _return_site: Option<&Stmt>,
        call_site: &Stmt,
        kill: &mut KillFlags,
    ) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        if source.is_zero() {
            return FlowOutcome::none();
        }
        if source.is_dominator(stmt.id) {
            return self.leave_branch(state.d1, source, stmt, kill);
        }
        if source.access_path().is_empty() {
            // Already dominated by a branch inside the callee
            return FlowOutcome::single(source.derive_new_abstraction(AccessPath::empty(), Some(stmt.id)));
        }

        // A parameter decided a sink inside the callee; a constant argument
        // means the caller's control flow chose it
        let icfg = self.manager.icfg();
        let callee = icfg.program().method(stmt.method);
        let Some(inv) = call_site.invoke_expr() else {
            return FlowOutcome::none();
        };
        let Some(plain) = source.access_path().plain_value() else {
            return FlowOutcome::none();
        };
        for (i, arg) in inv.args.iter().enumerate() {
            if callee.parameter_local(i) == Some(plain) && arg.is_constant() {
                let out = icfg
                    .conditional_branches_intraprocedural(call_site.id)
                    .into_iter()
                    .map(|cond| {
                        source
                            .derive_new_abstraction_with_dominator(cond, Some(stmt.id))
                            .with_corresponding_call_site(Some(call_site.id))
                    });
                return FlowOutcome::from_facts(out);
            }
        }
        FlowOutcome::none()
    }
}
