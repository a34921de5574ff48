//! Static initializers
//!
//! A read of another class's static field may be the first use of that
//! class, so its `<clinit>` could have produced the value. Facts on such
//! fields are injected into the initializer body directly; whatever comes
//! back out of those injected edges is dropped.

use std::sync::Arc;

use crate::features::taint_analysis::infrastructure::alias_analyzer::base_matches;
use crate::features::taint_analysis::infrastructure::base_selector::select_base;
use crate::features::taint_analysis::infrastructure::manager::InfoflowManager;
use crate::features::taint_analysis::infrastructure::rule_chain::{
    FlowState, KillFlags, TaintPropagationRule,
};
use crate::features::taint_analysis::ports::{FlowOutcome, PathEdge};
use crate::features::taint_analysis::domain::Abstraction;
use crate::shared::models::{MethodId, Stmt, StmtKind, Type, Value};

pub struct ClinitPropagationRule {
    manager: Arc<InfoflowManager>,
}

impl ClinitPropagationRule {
    pub fn new(manager: Arc<InfoflowManager>) -> Self {
        Self { manager }
    }

    fn static_initializer_at(&self, stmt: &Stmt) -> Option<MethodId> {
        let icfg = self.manager.icfg();
        icfg.callees_of_call_at(stmt.id).iter().copied().find(|&callee| {
            let method = icfg.program().method(callee);
            method.has_body() && method.sig.is_static_initializer()
        })
    }

    fn inject(&self, state: &FlowState<'_>, abs: Abstraction, clinit: MethodId) {
        let icfg = self.manager.icfg();
        let used = abs
            .access_path()
            .first_field()
            .map(|field| icfg.is_static_field_used(clinit, field))
            .unwrap_or(false);
        if !used {
            return;
        }
        let abs = abs.with_corresponding_call_site(Some(state.stmt.id));
        for start in icfg.start_points_of(clinit) {
            tracing::trace!(stmt = %state.stmt, fact = %abs, "into static initializer");
            state
                .submitter
                .submit_edge(PathEdge::new(state.d1.clone(), start, abs.clone()));
        }
    }
}

impl TaintPropagationRule for ClinitPropagationRule {
    fn name(&self) -> &'static str {
        "clinit"
    }

    fn propagate_normal_flow(&self, state: &FlowState<'_>, _dest: &Stmt, _kill: &mut KillFlags) -> FlowOutcome {
        let stmt = state.stmt;
        let StmtKind::Assign { left, right } = &stmt.kind else {
            return FlowOutcome::none();
        };
        let Some(clinit) = self.static_initializer_at(stmt) else {
            return FlowOutcome::none();
        };

        let source = state.source;
        let ap = source.access_path();
        let own_class = &self.manager.icfg().program().method(stmt.method).sig.class;

        let new_abs = match right {
            Value::StaticField(field) if base_matches(&select_base(left, false), source) => {
                // The own class is initialized further up anyway
                if &field.declaring_class == own_class {
                    return FlowOutcome::none();
                }
                self.manager
                    .access_path_factory()
                    .copy_with_new_value(ap, right, Some(right.ty()), false)
                    .map(|new_ap| source.derive_new_abstraction(new_ap, Some(stmt.id)))
            }
            Value::New(Type::Ref(class)) if ap.is_static_field_ref() => {
                if class == own_class {
                    return FlowOutcome::none();
                }
                Some(source.derive_new_abstraction(ap.clone(), Some(stmt.id)))
            }
            _ => None,
        };

        if let Some(new_abs) = new_abs {
            self.inject(state, new_abs, clinit);
        }
        FlowOutcome::none()
    }

    fn propagate_return_flow(
        &self,
        state: &FlowState<'_>,
        _caller_d1s: &[Abstraction],
        _return_site: Option<&Stmt>,
        _call_site: &Stmt,
        kill: &mut KillFlags,
    ) -> FlowOutcome {
        let icfg = self.manager.icfg();
        let callee = icfg.program().method(state.stmt.method);
        if !callee.sig.is_static_initializer() {
            return FlowOutcome::none();
        }
        let injected = state
            .source
            .corresponding_call_site()
            .map(|call| {
                matches!(
                    icfg.stmt(call).kind,
                    StmtKind::Assign {
                        right: Value::StaticField(_),
                        ..
                    }
                )
            })
            .unwrap_or(false);
        kill.kill_all |= injected;
        FlowOutcome::none()
    }
}
