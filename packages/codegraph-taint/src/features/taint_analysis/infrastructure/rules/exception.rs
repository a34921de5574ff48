//! Exceptions
//!
//! A tainted caught exception becomes a pending-throw fact. The pending
//! fact is resolved onto the thrown value at the responsible `throw`, in
//! this method or inside a callee.

use std::sync::Arc;

use crate::features::taint_analysis::domain::Abstraction;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::FlowOutcome;
use crate::shared::models::{Method, Stmt, StmtKind, Value};

pub struct ExceptionPropagationRule {
    manager: Arc<InfoflowManager>,
}

impl ExceptionPropagationRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }

    /// Copies of `abs` dominated by each branch controlling the throw
    fn dominated_by_branches(&self, abs: Abstraction, throw: &Stmt) -> Vec<Abstraction> {
        let branches = self.manager.icfg().conditional_branches_intraprocedural(throw.id);
        if branches.is_empty() {
            return vec![abs];
        }
        branches
            .into_iter()
            .enumerate()
            .map(|(i, cond)| {
                if i == 0 {
                    abs.clone().with_dominator(Some(cond))
                } else {
                    abs.derive_new_abstraction_with_dominator(cond, None)
                }
            })
            .collect()
    }
}

impl TaintPropagationRule for ExceptionPropagationRule {
    fn name(&self) -> &'static str {
        "exception"
    }

    fn propagate_normal_flow(&self, state: &FlowState<'_>, _dest: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        let ap = source.access_path();

        // e := @caughtexception
        if let StmtKind::Identity {
            left,
            right: Value::CaughtException(_),
        } = &stmt.kind
        {
            let caught = ap.is_empty() || ap.plain_value() == Some(left);
            if caught && !source.is_zero() {
                kill.kill_source = true;
                return FlowOutcome::single(source.derive_new_abstraction_on_throw(stmt.id));
            }
        }

        // The throw is in this method
        if let StmtKind::Throw(op) = &stmt.kind {
            if source.exception_thrown() {
                kill.kill_source = true;
                let Some(new_ap) = self
                    .manager
                    .access_path_factory()
                    .copy_with_new_value(ap, op, None, false)
                else {
                    return FlowOutcome::none();
                };
                let abs = source.derive_new_abstraction_on_catch(new_ap);
                let tracks_control_flow = self
                    .manager
                    .config()
                    .implicit_flow_mode
                    .track_control_flow_dependencies();
                if tracks_control_flow && abs.dominator().is_none() {
                    return FlowOutcome::from_facts(self.dominated_by_branches(abs, stmt));
                }
                return FlowOutcome::single(abs);
            }
        }
        FlowOutcome::none()
    }

    fn propagate_call_to_return_flow(&self, state: &FlowState<'_>, kill: &mut KillFlags) -> FlowOutcome {
        // A pending throw goes into the callee, never around it
        if state.source.exception_thrown() {
            kill.kill_source = true;
        }
        FlowOutcome::none()
    }

    fn propagate_call_flow(&self, state: &FlowState<'_>, callee: &Method, _kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        if !source.exception_thrown() {
            return FlowOutcome::none();
        }

        let icfg = self.manager.icfg();
        let factory = self.manager.access_path_factory();
        let type_utils = self.manager.type_utils();
        let mut out = vec![];
        for &unit in callee.stmts() {
            let StmtKind::Throw(op) = &icfg.stmt(unit).kind else {
                continue;
            };
            if !type_utils.check_cast(source.access_path(), &op.ty()) {
                continue;
            }
            if let Some(ap) = factory.copy_with_new_value(source.access_path(), op, None, false) {
                out.push(source.derive_new_abstraction_on_catch(ap));
            }
        }
        FlowOutcome::from_facts(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::taint_analysis::infrastructure::test_support::{Fixture, NoopSubmitter};

    #[test]
    fn test_catch_then_throw_round_trip() {
        let fx = Fixture::throw_and_catch();
        let rule = ExceptionPropagationRule::new(fx.manager.clone());
        let catch = fx.program.stmt(fx.stmt("catch"));
        let fact = fx.fact_on("e");
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: catch,
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let throw = fx.program.stmt(fx.stmt("throw"));
        let pending = rule.propagate_normal_flow(&state, throw, &mut kill).into_facts();
        assert!(kill.kill_source);
        assert_eq!(pending.len(), 1);
        let pending = pending.into_iter().next().unwrap();
        assert!(pending.exception_thrown());
        assert_eq!(pending.access_path(), fact.access_path());

        // at the throw the pending fact lands on the thrown value
        let state = FlowState {
            d1: &fact,
            source: &pending,
            stmt: throw,
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let dest = fx.program.stmt(fx.stmt("alloc"));
        let resolved = rule.propagate_normal_flow(&state, dest, &mut kill).into_facts();
        assert!(kill.kill_source);
        let resolved = resolved.into_iter().next().unwrap();
        assert!(!resolved.exception_thrown());
        assert_eq!(resolved.access_path().plain_value().unwrap().name, "ex");
    }

    #[test]
    fn test_pending_throw_never_passes_a_call() {
        let fx = Fixture::throw_and_catch();
        let rule = ExceptionPropagationRule::new(fx.manager.clone());
        let pending = fx.fact_on("e").derive_new_abstraction_on_throw(fx.stmt("catch"));
        let state = FlowState {
            d1: &pending,
            source: &pending,
            stmt: fx.program.stmt(fx.stmt("sink")),
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        rule.propagate_call_to_return_flow(&state, &mut kill);
        assert!(kill.kill_source);
    }

    #[test]
    fn test_pending_throw_lands_on_compatible_callee_throws() {
        let fx = Fixture::throwing_callee();
        let rule = ExceptionPropagationRule::new(fx.manager.clone());
        let call = fx.stmt("call");
        let pending = fx.fact_on("e").derive_new_abstraction_on_throw(call);
        let state = FlowState {
            d1: &pending,
            source: &pending,
            stmt: fx.program.stmt(call),
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let callee = fx.program.method(fx.method("fail"));
        let facts = rule.propagate_call_flow(&state, callee, &mut kill).into_facts();

        // the SQLException throw cannot produce an IOException
        assert_eq!(facts.len(), 1);
        let fact = facts.into_iter().next().unwrap();
        assert!(!fact.exception_thrown());
        assert_eq!(fact.access_path().plain_value().unwrap().name, "io");
    }

    #[test]
    fn test_untainted_exception_does_not_enter_callee() {
        let fx = Fixture::throwing_callee();
        let rule = ExceptionPropagationRule::new(fx.manager.clone());
        let call = fx.stmt("call");
        let fact = fx.fact_on("e");
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: fx.program.stmt(call),
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let callee = fx.program.method(fx.method("fail"));
        assert!(rule.propagate_call_flow(&state, callee, &mut kill).into_facts().is_empty());
    }
}
