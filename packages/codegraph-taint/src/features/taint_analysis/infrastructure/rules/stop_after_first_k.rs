//! Stops the search once enough results are known

use std::sync::Arc;

use crate::features::taint_analysis::domain::Abstraction;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::FlowOutcome;
use crate::shared::models::{Method, Stmt};

pub struct StopAfterFirstKFlowsRule {
    manager: Arc<InfoflowManager>,
    k: usize,
}

impl StopAfterFirstKFlowsRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        let k = manager.config().stop_after_first_k_flows;
        Self { manager, k }
    }

    fn check(&self, kill: &mut KillFlags) -> FlowOutcome {
        if self.k > 0 && self.manager.results().len() >= self.k {
            kill.kill_all = true;
        }
        FlowOutcome::none()
    }
}

impl TaintPropagationRule for StopAfterFirstKFlowsRule {
    fn name(&self) -> &'static str {
        "stop_after_first_k"
    }

    fn propagate_normal_flow(&self, _state: &FlowState<'_>, _dest: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        self.check(kill)
    }

    fn propagate_call_flow(&self, _state: &FlowState<'_>, _callee: &Method, kill: &mut KillFlags) -> FlowOutcome {
        self.check(kill)
    }

    fn propagate_call_to_return_flow(&self, _state: &FlowState<'_>, kill: &mut KillFlags) -> FlowOutcome {
        self.check(kill)
    }

    fn propagate_return_flow(
        &self,
        _state: &FlowState<'_>,
        _caller_d1s: &[Abstraction],
        _return_site: Option<&Stmt>,
        _call_site: &Stmt,
        kill: &mut KillFlags,
    ) -> FlowOutcome {
        self.check(kill)
    }
}
