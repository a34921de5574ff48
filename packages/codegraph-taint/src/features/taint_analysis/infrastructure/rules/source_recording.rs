//! Records a result when an active fact reaches a source call or a value
//! a source defines. The backward search ends there.

use std::sync::Arc;

use crate::features::taint_analysis::domain::{Abstraction, AbstractionAtSink};
use crate::features::taint_analysis::infrastructure::base_selector::select_base_list;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::FlowOutcome;
use crate::shared::models::{Method, Stmt, StmtKind, Value};

pub struct SourceRecordingRule {
    manager: Arc<InfoflowManager>,
}

impl SourceRecordingRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }

    /// Value a statement hands to whatever defines the fact
    fn checked_value(stmt: &Stmt) -> Option<Value> {
        match &stmt.kind {
            StmtKind::Return(Some(op)) => Some(op.clone()),
            StmtKind::If { condition } => Some(condition.clone()),
            StmtKind::Switch { key } => Some(key.clone()),
            StmtKind::Assign { right, .. } => Some(right.clone()),
            StmtKind::Identity { left, .. } => Some(Value::Local(left.clone())),
            _ => None,
        }
    }

    /// Stores the result; `false` means the fact should stop here
    fn record(&self, source: &Abstraction, stmt: &Stmt) -> bool {
        let Some(ssm) = self.manager.source_sink_manager() else {
            return true;
        };
        let Some(info) = ssm.inverse_source_info(stmt, Some(source.access_path())) else {
            return true;
        };
        let added = self
            .manager
            .results()
            .add_result(AbstractionAtSink::new(info.definitions, source.clone(), stmt.id));
        if added {
            tracing::debug!(stmt = %stmt, fact = %source, "source reached");
        }
        added
    }

    fn check_for_source(&self, source: &Abstraction, stmt: &Stmt, value: &Value) -> bool {
        if !source.is_abstraction_active() {
            return true;
        }
        let aliasing = self.manager.aliasing();
        let ap = source.access_path();
        let hit = select_base_list(value, false)
            .iter()
            .any(|val| aliasing.may_alias_base(val, ap));
        if hit {
            self.record(source, stmt)
        } else {
            true
        }
    }

    /// Whether the callee at `stmt` can see the tainted value
    fn is_taint_visible_in_callee(&self, stmt: &Stmt, source: &Abstraction) -> bool {
        let Some(inv) = stmt.invoke_expr() else {
            return false;
        };
        let aliasing = self.manager.aliasing();
        let ap = source.access_path();

        if ap.plain_value().is_some()
            && (ap.taint_sub_fields() || ap.is_local())
            && inv.args.iter().any(|arg| aliasing.may_alias_base(arg, ap))
        {
            return true;
        }
        if inv.base.is_some() && inv.base.as_ref() == ap.plain_value() {
            return true;
        }
        matches!(&stmt.kind, StmtKind::Assign { left, .. } if aliasing.may_alias_base(left, ap))
    }

    fn recording_stopped(&self) -> bool {
        self.manager.results().is_aborted()
    }
}

impl TaintPropagationRule for SourceRecordingRule {
    fn name(&self) -> &'static str {
        "source_recording"
    }

    fn propagate_normal_flow(&self, state: &FlowState<'_>, _dest: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        if let Some(value) = Self::checked_value(state.stmt) {
            if !self.check_for_source(state.source, state.stmt, &value) {
                kill.kill_all = true;
            }
        }
        FlowOutcome::none()
    }

    fn propagate_call_flow(&self, _state: &FlowState<'_>, _callee: &Method, kill: &mut KillFlags) -> FlowOutcome {
        kill.kill_all |= self.recording_stopped();
        FlowOutcome::none()
    }

    fn propagate_call_to_return_flow(&self, state: &FlowState<'_>, kill: &mut KillFlags) -> FlowOutcome {
        let source = state.source;
        let stmt = state.stmt;
        let ap = source.access_path();

        // Only active taints report leaks, never alias queries
        if source.is_abstraction_active() && !ap.is_static_field_ref() && !ap.is_empty() {
            let visible = self.is_taint_visible_in_callee(stmt, source);
            if !stmt.contains_invoke() || visible {
                if !self.record(source, stmt) {
                    kill.kill_all = true;
                }
            }
            if visible {
                if let Some(listener) = self.manager.secondary_flow_listener() {
                    listener.on_secondary_flow(state.d1, source, stmt);
                }
            }
        }

        kill.kill_all |= self.recording_stopped();
        FlowOutcome::none()
    }

    fn propagate_return_flow(
        &self,
        _state: &FlowState<'_>,
        _caller_d1s: &[Abstraction],
        _return_site: Option<&Stmt>,
        _call_site: &Stmt,
        kill: &mut KillFlags,
    ) -> FlowOutcome {
        kill.kill_all |= self.recording_stopped();
        FlowOutcome::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::taint_analysis::infrastructure::test_support::{Fixture, NoopSubmitter};

    #[test]
    fn test_fact_on_source_result_is_recorded_once() {
        let fx = Fixture::source_then_sink();
        let rule = SourceRecordingRule::new(fx.manager.clone());
        let fact = fx.fact_on("s");
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: fx.program.stmt(fx.stmt("source")),
            submitter: &NoopSubmitter,
        };

        let mut kill = KillFlags::default();
        rule.propagate_call_to_return_flow(&state, &mut kill);
        assert!(!kill.kill_all);
        assert_eq!(fx.manager.results().len(), 1);

        // the duplicate stops this fact only
        let mut kill = KillFlags::default();
        rule.propagate_call_to_return_flow(&state, &mut kill);
        assert!(kill.kill_all);
        assert_eq!(fx.manager.results().len(), 1);
        assert!(!fx.manager.is_terminated());
    }

    #[test]
    fn test_unrelated_fact_records_nothing() {
        let fx = Fixture::source_then_sink();
        let rule = SourceRecordingRule::new(fx.manager.clone());
        let fact = fx.fact_on("t");
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: fx.program.stmt(fx.stmt("source")),
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        rule.propagate_call_to_return_flow(&state, &mut kill);
        assert!(fx.manager.results().is_empty());
        assert!(!kill.kill_all);
    }

    #[test]
    fn test_inactive_fact_is_not_reported() {
        let fx = Fixture::source_then_sink();
        let rule = SourceRecordingRule::new(fx.manager.clone());
        let source_stmt = fx.stmt("source");
        let fact = fx.fact_on("s").derive_inactive_abstraction(source_stmt);
        let state = FlowState {
            d1: &fact,
            source: &fact,
            stmt: fx.program.stmt(source_stmt),
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        rule.propagate_call_to_return_flow(&state, &mut kill);
        assert!(fx.manager.results().is_empty());
    }
}
