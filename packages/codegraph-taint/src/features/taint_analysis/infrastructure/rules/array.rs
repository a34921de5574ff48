//! Array contents and lengths
//!
//! Length and contents taint stay separate. Reads through an index taint
//! the whole array; writes through one are weak updates.

use std::sync::Arc;

use crate::features::taint_analysis::domain::ArrayTaintType;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::FlowOutcome;
use crate::shared::models::{Stmt, StmtKind, Type, Value};

pub struct ArrayPropagationRule {
    manager: Arc<InfoflowManager>,
}

impl ArrayPropagationRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }
}

impl TaintPropagationRule for ArrayPropagationRule {
    fn name(&self) -> &'static str {
        "array"
    }

    fn propagate_normal_flow(&self, state: &FlowState<'_>, _dest: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        let StmtKind::Assign { left, right } = &state.stmt.kind else {
            return FlowOutcome::none();
        };
        let source = state.source;
        let stmt = state.stmt;
        let ap = source.access_path();
        let aliasing = self.manager.aliasing();
        let factory = self.manager.access_path_factory();
        let config = self.manager.config();

        let mut out = vec![];
        let new_abs = match right {
            // x = a.length
            Value::Length(op) if aliasing.may_alias_base(left, ap) => factory
                .create_access_path_typed(op, Some(op.ty()), true, ArrayTaintType::Length)
                .map(|new_ap| source.derive_new_abstraction(new_ap, Some(stmt.id))),
            // y = new T[n] with the length of y tainted
            Value::NewArray { size, .. }
                if config.enable_array_size_tainting
                    && !size.is_constant()
                    && ap.array_taint_type() != ArrayTaintType::Contents
                    && aliasing.may_alias_base(left, ap) =>
            {
                factory
                    .create_access_path(size, true)
                    .map(|new_ap| source.derive_new_abstraction(new_ap, Some(stmt.id)))
            }
            // y = x[i]
            Value::ArrayRef { base, index }
                if ap.array_taint_type() != ArrayTaintType::Length && aliasing.may_alias_base(left, ap) =>
            {
                if config.implicit_flow_mode.track_array_accesses() {
                    if let Some(index_ap) = factory.create_access_path(index, false) {
                        out.push(source.derive_new_abstraction(index_ap, Some(stmt.id)));
                    }
                }
                // The whole array, one dimension up
                let target_type = Type::array_of(ap.base_type().clone());
                factory
                    .copy_with_new_value_array(
                        ap,
                        &Value::Local(base.clone()),
                        Some(target_type),
                        false,
                        ArrayTaintType::Contents,
                    )
                    .map(|new_ap| source.derive_new_abstraction(new_ap, Some(stmt.id)))
            }
            _ => None,
        };

        let Some(new_abs) = new_abs else {
            return FlowOutcome::from_facts(out);
        };
        kill.kill_source = !matches!(left, Value::ArrayRef { .. });
        if aliasing.can_have_aliases(stmt, left, &new_abs) {
            out.extend(aliasing.compute_aliases(state.d1, stmt.id, left, &new_abs));
        }
        out.push(new_abs);
        FlowOutcome::from_facts(out)
    }
}
