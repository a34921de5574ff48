//! Modeled library calls
//!
//! When the taint wrapper knows a callee, the facts before the call come
//! from its summary instead of the callee body.

use std::sync::Arc;

use crate::features::taint_analysis::domain::Abstraction;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::{is_string_constructor_call, FlowOutcome};
use crate::shared::models::{Method, Stmt, StmtKind, Type, Value};

pub struct WrapperPropagationRule {
    manager: Arc<InfoflowManager>,
}

impl WrapperPropagationRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }

    /// Whether the fact is visible at the call, and whether through the
    /// returned value
    fn tainted_at_call(&self, stmt: &Stmt, source: &Abstraction) -> (bool, bool) {
        let ap = source.access_path();
        if ap.is_static_field_ref() || ap.is_empty() {
            return (false, false);
        }
        let Some(inv) = stmt.invoke_expr() else {
            return (false, false);
        };
        let aliasing = self.manager.aliasing();

        if let StmtKind::Assign { left, .. } = &stmt.kind {
            if aliasing.may_alias_base(left, ap) {
                return (true, true);
            }
        }
        if let Some(base) = &inv.base {
            if aliasing.may_alias_base(&Value::Local(base.clone()), ap) {
                return (true, false);
            }
        }
        let through_arg = inv.args.iter().any(|arg| {
            let ty = arg.ty();
            !(ty.is_primitive() || ty.is_string()) && aliasing.may_alias_base(arg, ap)
        });
        (through_arg, false)
    }

    /// Turn unit for immutable return values, alias search for the rest
    fn finish(&self, state: &FlowState<'_>, abs: Abstraction, ret_val_tainted: bool, out: &mut Vec<Abstraction>) -> Abstraction {
        let stmt = state.stmt;
        let abs_ap = abs.access_path().clone();

        if ret_val_tainted {
            if let StmtKind::Assign { left, .. } = &stmt.kind {
                let ty: Type = left.ty();
                if ty.is_primitive() || (ty.is_string() && !abs_ap.can_have_immutable_aliases()) {
                    return abs.derive_new_abstraction_with_turn_unit(Some(stmt.id));
                }
            }
        }

        // Nothing new to alias when the path did not change
        if abs_ap == *state.source.access_path() || abs_ap.is_empty() {
            return abs;
        }

        let base_type = abs_ap.base_type();
        let basic_string = base_type.is_string()
            && !abs_ap.can_have_immutable_aliases()
            && !is_string_constructor_call(stmt);
        let taints_object = base_type.is_reference()
            && !base_type.is_array()
            && !basic_string
            && (abs_ap.field_count() > 0 || abs_ap.taint_sub_fields());
        let taints_static_field = abs_ap.is_static_field_ref()
            && abs_ap
                .first_field_type()
                .map(|t| !t.is_primitive() && !t.is_string())
                .unwrap_or(false);
        let plain = abs_ap.plain_value().map(|l| Value::Local(l.clone()));
        let aliasing = self.manager.aliasing();
        let right_side_aliases = plain
            .as_ref()
            .map(|p| aliasing.can_have_aliases_right_side(stmt, p, &abs))
            .unwrap_or(false);

        if taints_object || taints_static_field || right_side_aliases {
            if let Some(plain) = plain {
                let icfg = self.manager.icfg();
                for &pred in icfg.preds_of(stmt.id) {
                    out.extend(aliasing.compute_aliases(state.d1, pred, &plain, &abs));
                }
            }
            abs
        } else {
            abs.derive_new_abstraction_with_turn_unit(Some(stmt.id))
        }
    }
}

impl TaintPropagationRule for WrapperPropagationRule {
    fn name(&self) -> &'static str {
        "wrapper"
    }

    fn propagate_call_flow(&self, state: &FlowState<'_>, _callee: &Method, kill: &mut KillFlags) -> FlowOutcome {
        // The call-to-return edge answers for exclusive callees
        if let Some(wrapper) = self.manager.taint_wrapper() {
            kill.kill_all |= wrapper.is_exclusive(state.stmt, state.source);
        }
        FlowOutcome::none()
    }

    fn propagate_call_to_return_flow(&self, state: &FlowState<'_>, kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        if source.is_zero() {
            return FlowOutcome::none();
        }
        let Some(wrapper) = self.manager.taint_wrapper() else {
            return FlowOutcome::none();
        };

        let (tainted, ret_val_tainted) = self.tainted_at_call(stmt, source);
        kill.kill_source = ret_val_tainted;
        if !tainted {
            return FlowOutcome::none();
        }

        // Source calls end the search in the recording rule
        if !self.manager.config().inspect_sources {
            if let Some(ssm) = self.manager.source_sink_manager() {
                if ssm.inverse_source_info(stmt, None).is_some() {
                    return FlowOutcome::none();
                }
            }
        }

        let modeled = wrapper.inverse_taints_for_method(
            stmt,
            state.d1,
            source,
            self.manager.access_path_factory(),
        );
        kill.kill_source |= wrapper.is_exclusive(stmt, source);
        let Some(modeled) = modeled else {
            return FlowOutcome::none();
        };

        let aliasing = self.manager.aliasing();
        let left = match &stmt.kind {
            StmtKind::Assign { left, right } => Some((left, right)),
            _ => None,
        };
        let mut out = vec![];
        for abs in modeled {
            // A tainted return value only feeds the alias search
            let keep = match left {
                Some((left, right)) if aliasing.may_alias_base(left, abs.access_path()) => right
                    .uses()
                    .iter()
                    .any(|used| aliasing.may_alias_base(used, abs.access_path())),
                _ => true,
            };
            let abs = self.finish(state, abs, ret_val_tainted, &mut out);
            if keep {
                out.push(abs);
            }
        }

        let facts = out.into_iter().map(|abs| {
            if abs == *source {
                abs
            } else {
                abs.with_corresponding_call_site(Some(stmt.id))
            }
        });
        FlowOutcome::from_facts(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::taint_analysis::infrastructure::test_support::{Fixture, NoopSubmitter};

    #[test]
    fn test_summary_moves_return_taint_to_argument() {
        // t = String.valueOf(s) with t tainted
        let fx = Fixture::library_call();
        let rule = WrapperPropagationRule::new(fx.manager.clone());
        let fact = fx.fact_on("t");
        let call = fx.program.stmt(fx.stmt("wrap"));
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: call,
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let facts = rule.propagate_call_to_return_flow(&state, &mut kill).into_facts();

        assert!(kill.kill_source);
        assert_eq!(facts.len(), 1);
        let arg = facts.into_iter().next().unwrap();
        assert_eq!(arg.access_path().plain_value().unwrap().name, "s");
        assert_eq!(arg.corresponding_call_site(), Some(call.id));
        assert_eq!(arg.turn_unit(), Some(call.id));
    }

    #[test]
    fn test_exclusive_callee_is_not_entered() {
        let fx = Fixture::library_call();
        let rule = WrapperPropagationRule::new(fx.manager.clone());
        let fact = fx.fact_on("t");
        let call = fx.program.stmt(fx.stmt("wrap"));
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: call,
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let callee = fx.program.method(fx.method("valueOf"));
        rule.propagate_call_flow(&state, callee, &mut kill);
        assert!(kill.kill_all);
    }

    #[test]
    fn test_unrelated_fact_passes_untouched() {
        let fx = Fixture::library_call();
        let rule = WrapperPropagationRule::new(fx.manager.clone());
        let fact = fx.fact_on("u");
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: fx.program.stmt(fx.stmt("wrap")),
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let facts = rule.propagate_call_to_return_flow(&state, &mut kill).into_facts();
        assert!(facts.is_empty());
        assert!(!kill.kill_source);
    }
}
