//! Turns the zero fact at a sink call into root facts on the checked
//! locations. The search starts here.

use std::sync::Arc;

use crate::features::taint_analysis::domain::Abstraction;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::FlowOutcome;
use crate::shared::models::{Method, Stmt};

pub struct SinkSeedingRule {
    manager: Arc<InfoflowManager>,
}

impl SinkSeedingRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }

    /// Seeds are never created inside a method that is only reached
    /// through calls the wrapper handles exclusively
    fn inside_exclusive_callee(&self, stmt: &Stmt) -> bool {
        let icfg = self.manager.icfg();
        let Some(wrapper) = self.manager.taint_wrapper() else {
            return false;
        };
        let callers = icfg.callers_of(stmt.method);
        let zero = Abstraction::zero();
        !callers.is_empty()
            && callers.iter().all(|&call| {
                let call_stmt = icfg.stmt(call);
                call_stmt.contains_invoke() && wrapper.is_exclusive(call_stmt, &zero)
            })
    }

    fn seed(&self, state: &FlowState<'_>, kill: &mut KillFlags, kill_all_on_miss: bool) -> FlowOutcome {
        if !state.source.is_zero() {
            return FlowOutcome::none();
        }
        let Some(ssm) = self.manager.source_sink_manager() else {
            return FlowOutcome::none();
        };
        // Zero never travels further than the sink
        kill.kill_source = true;

        let stmt = state.stmt;
        let sink_info = ssm.inverse_sink_info(stmt, self.manager.access_path_factory());
        match sink_info {
            Some(info) if !info.access_paths.is_empty() => {
                if self.inside_exclusive_callee(stmt) {
                    return FlowOutcome::none();
                }
                let arena = self.manager.arena();
                let seeds = info
                    .access_paths
                    .iter()
                    // Conditional seeds come from the implicit-flow rule
                    .filter(|ap| !ap.is_empty())
                    .map(|ap| {
                        let root = Abstraction::new_root(
                            info.definitions_for(ap),
                            ap.clone(),
                            stmt.id,
                            info.user_data.clone(),
                            false,
                            false,
                        )
                        .with_corresponding_call_site(Some(stmt.id));
                        let root = arena.register(root);
                        root.derive_new_abstraction_with_turn_unit(Some(stmt.id))
                            .with_corresponding_call_site(Some(stmt.id))
                    });
                let out = FlowOutcome::from_facts(seeds);
                tracing::debug!(stmt = %stmt, "sink seeded");
                out
            }
            _ => {
                if kill_all_on_miss {
                    kill.kill_all = true;
                }
                FlowOutcome::none()
            }
        }
    }
}

impl TaintPropagationRule for SinkSeedingRule {
    fn name(&self) -> &'static str {
        "sink_seeding"
    }

    fn propagate_normal_flow(&self, state: &FlowState<'_>, _dest: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
        self.seed(state, kill, true)
    }

    fn propagate_call_to_return_flow(&self, state: &FlowState<'_>, kill: &mut KillFlags) -> FlowOutcome {
        self.seed(state, kill, false)
    }

    fn propagate_call_flow(&self, state: &FlowState<'_>, _callee: &Method, kill: &mut KillFlags) -> FlowOutcome {
        let config = self.manager.config();
        if let Some(ssm) = self.manager.source_sink_manager() {
            kill.kill_all |= !config.inspect_sources && ssm.is_source_stmt(state.stmt);
            kill.kill_all |= !config.inspect_sinks && ssm.is_sink_stmt(state.stmt);
        }
        FlowOutcome::none()
    }
}
