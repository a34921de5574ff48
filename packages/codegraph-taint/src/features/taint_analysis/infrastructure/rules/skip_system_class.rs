//! Well-known system methods that never move taint

use std::sync::Arc;

use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::FlowOutcome;
use crate::shared::models::{
    Method, MethodSig, Type, CONSTRUCTOR_NAME, OBJECT_CLASS, STATIC_INITIALIZER_NAME,
};

const THREAD_CLASS: &str = "java.lang.Thread";

pub struct SkipSystemClassRule {
    manager: Arc<InfoflowManager>,
    system_methods: [MethodSig; 4],
}

impl SkipSystemClassRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        let system_methods = [
            MethodSig::new(OBJECT_CLASS, CONSTRUCTOR_NAME, vec![], Type::Void),
            MethodSig::new(OBJECT_CLASS, STATIC_INITIALIZER_NAME, vec![], Type::Void),
            MethodSig::new(OBJECT_CLASS, "getClass", vec![], Type::class("java.lang.Class")),
            MethodSig::new(THREAD_CLASS, CONSTRUCTOR_NAME, vec![], Type::Void),
        ];
        Self {
            manager,
            system_methods,
        }
    }

    fn is_system_method(&self, method: &Method) -> bool {
        self.system_methods.contains(&method.sig)
    }
}

impl TaintPropagationRule for SkipSystemClassRule {
    fn name(&self) -> &'static str {
        "skip_system_class"
    }

    fn propagate_call_flow(&self, _state: &FlowState<'_>, callee: &Method, kill: &mut KillFlags) -> FlowOutcome {
        kill.kill_all |= self.is_system_method(callee);
        FlowOutcome::none()
    }

    fn propagate_call_to_return_flow(&self, state: &FlowState<'_>, _kill: &mut KillFlags) -> FlowOutcome {
        let icfg = self.manager.icfg();
        let callees = icfg.callees_of_call_at(state.stmt.id);
        if callees.is_empty() {
            return FlowOutcome::none();
        }
        // What the call flow dropped has to pass over the call instead
        let all_system = callees
            .iter()
            .all(|&callee| self.is_system_method(icfg.program().method(callee)));
        if all_system {
            FlowOutcome::single(state.source.clone())
        } else {
            FlowOutcome::none()
        }
    }
}
