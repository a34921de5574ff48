//! Strong updates through must-aliases
//!
//! A write through a reference that must alias the fact's base overwrites
//! the tainted location, so the taint moves to the written value and the
//! old fact dies. Writes through the very same base are left to the base
//! flow functions.

use std::sync::Arc;

use crate::features::taint_analysis::domain::{Abstraction, ArrayTaintType};
use crate::features::taint_analysis::infrastructure::base_selector::select_base;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::FlowOutcome;
use crate::shared::models::{Method, Stmt, StmtKind, Type, Value};

pub struct StrongUpdatePropagationRule {
    manager: Arc<InfoflowManager>,
}

impl StrongUpdatePropagationRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }

    /// Fact was activated by the edge that produced it
    fn just_activated(&self, source: &Abstraction) -> bool {
        let Some(pred_id) = source.predecessor() else {
            return false;
        };
        match self.manager.arena().get(pred_id) {
            Some(pred) => {
                !pred.is_abstraction_active()
                    && source.is_abstraction_active()
                    && pred.access_path() == source.access_path()
            }
            None => false,
        }
    }

    /// Decides whether `left` overwrites the fact: `(cut_first_field, type)`
    fn overwritten_by(&self, source: &Abstraction, left: &Value, stmt: &Stmt) -> Option<(bool, Option<Type>)> {
        let aliasing = self.manager.aliasing();
        let ap = source.access_path();
        let plain = ap.plain_value();

        if ap.is_instance_field_ref() {
            let plain = plain?;
            match left {
                // x.f = y with x.f tainted: y
                Value::InstanceField { base, field } => {
                    (aliasing.must_alias(base, plain, stmt.id) && ap.first_field_matches(field))
                        .then(|| (true, Some(field.ty.clone())))
                }
                // x = y with x.f tainted: y.f
                Value::Local(local) => aliasing.must_alias(local, plain, stmt.id).then_some((false, None)),
                _ => None,
            }
        } else if ap.is_static_field_ref() {
            match left {
                Value::StaticField(field) if ap.first_field_matches(field) => {
                    Some((true, Some(field.ty.clone())))
                }
                _ => None,
            }
        } else if ap.is_local() {
            let plain = plain?;
            match left {
                Value::ArrayRef { base, .. } if ap.array_taint_type() != ArrayTaintType::Length => {
                    aliasing
                        .must_alias(base, plain, stmt.id)
                        .then(|| (false, base.ty.element_type().cloned()))
                }
                Value::Local(local) => aliasing.must_alias(local, plain, stmt.id).then_some((false, None)),
                _ => None,
            }
        } else {
            None
        }
    }
}

impl TaintPropagationRule for StrongUpdatePropagationRule {
    fn name(&self) -> &'static str {
        "strong_update"
    }

    fn propagate_normal_flow(&self, state: &FlowState<'_>, _dest: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        let stmt = state.stmt;
        let source = state.source;
        let StmtKind::Assign { left, right } = &stmt.kind else {
            return FlowOutcome::none();
        };

        // An alias created right here survives its own statement
        if source.current_stmt() == Some(stmt.id) || self.just_activated(source) {
            return FlowOutcome::none();
        }

        let aliasing = self.manager.aliasing();
        if aliasing.may_alias_base(&select_base(left, false), source.access_path()) {
            return FlowOutcome::none();
        }

        let Some((cut_first_field, ty)) = self.overwritten_by(source, left, stmt) else {
            return FlowOutcome::none();
        };

        kill.kill_source = !matches!(left, Value::ArrayRef { .. });
        if right.is_constant() || matches!(right, Value::New(_) | Value::NewArray { .. }) {
            return FlowOutcome::none();
        }

        let right_val = select_base(right, true);
        let Some(new_ap) = self.manager.access_path_factory().copy_with_new_value(
            source.access_path(),
            &right_val,
            ty.clone(),
            cut_first_field,
        ) else {
            return FlowOutcome::none();
        };
        let new_abs = source.derive_new_abstraction(new_ap, Some(stmt.id));

        let primitive_or_string = ty.as_ref().map(|t| t.is_primitive() || t.is_string()).unwrap_or(false);
        if primitive_or_string {
            return FlowOutcome::single(new_abs.derive_new_abstraction_with_turn_unit(Some(stmt.id)));
        }

        let mut out = vec![];
        if aliasing.can_have_aliases_right_side(stmt, &right_val, &new_abs) {
            out.extend(aliasing.compute_aliases(state.d1, stmt.id, &right_val, &new_abs));
        }
        out.push(new_abs);
        FlowOutcome::from_facts(out)
    }

    fn propagate_call_flow(&self, state: &FlowState<'_>, callee: &Method, _kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        let ap = source.access_path();
        if ap.is_empty() || ap.is_static_field_ref() {
            return FlowOutcome::none();
        }
        let StmtKind::Assign { left, .. } = &stmt.kind else {
            return FlowOutcome::none();
        };

        let aliasing = self.manager.aliasing();
        if aliasing.may_alias_base(&select_base(left, false), ap) {
            return FlowOutcome::none();
        }
        let (Some(left_local), Some(plain)) = (left.as_local(), ap.plain_value()) else {
            return FlowOutcome::none();
        };
        if !aliasing.must_alias(left_local, plain, stmt.id) {
            return FlowOutcome::none();
        }

        // Only the callee's returns can produce the overwritten value
        let icfg = self.manager.icfg();
        let factory = self.manager.access_path_factory();
        let type_utils = self.manager.type_utils();
        let mut out = vec![];
        for &unit in callee.stmts() {
            let StmtKind::Return(Some(ret_val)) = &icfg.stmt(unit).kind else {
                continue;
            };
            if !(matches!(ret_val, Value::Local(_)) || ret_val.is_field_ref()) {
                continue;
            }
            let ret_type = ret_val.ty();
            if !type_utils.check_cast_types(ap.base_type(), &ret_type) {
                continue;
            }
            let Some(new_ap) = factory.copy_with_new_value(ap, ret_val, Some(ret_type.clone()), false) else {
                continue;
            };
            let mut abs = source.derive_new_abstraction(new_ap, Some(stmt.id));
            if ret_type.is_primitive() || ret_type.is_string() {
                abs = abs.derive_new_abstraction_with_turn_unit(Some(stmt.id));
            }
            out.push(abs.with_corresponding_call_site(Some(stmt.id)));
        }
        FlowOutcome::from_facts(out)
    }
}
