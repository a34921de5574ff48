/*
 * Propagation Rule Chain
 *
 * An ordered list of independent rules, each answering the four flow-function
 * callbacks for one concern (seeding, source recording, strong updates,
 * implicit flows, ...).
 *
 * Evaluation of one edge:
 *   1. Rules run in order; every rule sees the same incoming fact
 *   2. A rule may set `kill_source` (drop the incoming fact) or `kill_all`
 *      (drop everything this edge would produce)
 *   3. `kill_all` or a `Redirect` stops the chain immediately
 *   4. Otherwise the outputs are unioned; for normal flows the incoming
 *      fact is added back unless a rule killed it
 *
 * The chain also stops as soon as the run is terminated.
 */

use rustc_hash::FxHashSet;
use std::sync::Arc;

use super::manager::InfoflowManager;
use super::rules::{
    ArrayPropagationRule, ClinitPropagationRule, ExceptionPropagationRule,
    ImplicitPropagationRule, SinkSeedingRule, SkipSystemClassRule, SourceRecordingRule,
    StopAfterFirstKFlowsRule, StrongUpdatePropagationRule, WrapperPropagationRule,
};
use crate::features::taint_analysis::domain::Abstraction;
use crate::features::taint_analysis::ports::{EdgeSubmitter, FlowOutcome};
use crate::shared::models::{Method, Stmt};

/// Flags a rule raises for the edge under evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KillFlags {
    /// Drop the incoming fact
    pub kill_source: bool,
    /// Drop every fact this edge would produce
    pub kill_all: bool,
}

/// Incoming side of an edge
#[derive(Clone, Copy)]
pub struct FlowState<'a> {
    /// Context fact at the start point of the method
    pub d1: &'a Abstraction,
    /// Fact flowing into `stmt`
    pub source: &'a Abstraction,
    pub stmt: &'a Stmt,
    pub submitter: &'a dyn EdgeSubmitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowFunctionKind {
    Normal,
    Call,
    CallToReturn,
    Return,
}

/// Edge-kind specific inputs
#[derive(Clone, Copy)]
pub enum FlowEdge<'a> {
    /// Intraprocedural edge into `dest`
    Normal { dest: &'a Stmt },
    /// From a call into `callee`
    Call { callee: &'a Method },
    /// Across a call without entering it
    CallToReturn,
    /// From the exit of a callee back into its caller
    Return {
        caller_d1s: &'a [Abstraction],
        return_site: Option<&'a Stmt>,
        call_site: &'a Stmt,
    },
}

impl FlowEdge<'_> {
    pub fn kind(&self) -> FlowFunctionKind {
        match self {
            FlowEdge::Normal { .. } => FlowFunctionKind::Normal,
            FlowEdge::Call { .. } => FlowFunctionKind::Call,
            FlowEdge::CallToReturn => FlowFunctionKind::CallToReturn,
            FlowEdge::Return { .. } => FlowFunctionKind::Return,
        }
    }
}

/// One propagation concern; every callback defaults to "no opinion"
pub trait TaintPropagationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn propagate_normal_flow(
        &self,
        _state: &FlowState<'_>,
        _dest: &Stmt,
        _kill: &mut KillFlags,
    ) -> FlowOutcome {
        FlowOutcome::none()
    }

    fn propagate_call_flow(
        &self,
        _state: &FlowState<'_>,
        _callee: &Method,
        _kill: &mut KillFlags,
    ) -> FlowOutcome {
        FlowOutcome::none()
    }

    fn propagate_call_to_return_flow(
        &self,
        _state: &FlowState<'_>,
        _kill: &mut KillFlags,
    ) -> FlowOutcome {
        FlowOutcome::none()
    }

    /// `state.d1` is the callee-side context, `state.stmt` the callee exit
    fn propagate_return_flow(
        &self,
        _state: &FlowState<'_>,
        _caller_d1s: &[Abstraction],
        _return_site: Option<&Stmt>,
        _call_site: &Stmt,
        _kill: &mut KillFlags,
    ) -> FlowOutcome {
        FlowOutcome::none()
    }
}

fn dispatch(
    rule: &dyn TaintPropagationRule,
    state: &FlowState<'_>,
    edge: FlowEdge<'_>,
    kill: &mut KillFlags,
) -> FlowOutcome {
    match edge {
        FlowEdge::Normal { dest } => rule.propagate_normal_flow(state, dest, kill),
        FlowEdge::Call { callee } => rule.propagate_call_flow(state, callee, kill),
        FlowEdge::CallToReturn => rule.propagate_call_to_return_flow(state, kill),
        FlowEdge::Return {
            caller_d1s,
            return_site,
            call_site,
        } => rule.propagate_return_flow(state, caller_d1s, return_site, call_site, kill),
    }
}

pub struct RuleChain {
    manager: Arc<InfoflowManager>,
    rules: Vec<Box<dyn TaintPropagationRule>>,
}

impl RuleChain {
    /// Standard backward chain for the manager's configuration
    ///
    /// Rules run in this order:
    /// 1. sink seeding, then source recording
    /// 2. implicit flows (only with `AllImplicitFlows`)
    /// 3. class initializers, then strong updates
    /// 4. exceptions and arrays, each when enabled
    /// 5. the taint wrapper, when one is installed
    /// 6. system-class skipping
    /// 7. stop-after-first-k, when `stop_after_first_k_flows > 0`
    ///
    /// A redirect from the implicit-flow rule ends the edge before strong
    /// updates run.
    pub fn backward(manager: Arc<InfoflowManager>) -> Self {
        let config = manager.config();
        let mut rules: Vec<Box<dyn TaintPropagationRule>> = vec![
            Box::new(SinkSeedingRule::new(manager.clone())),
            Box::new(SourceRecordingRule::new(manager.clone())),
        ];
        if config.implicit_flow_mode.track_control_flow_dependencies() {
            rules.push(Box::new(ImplicitPropagationRule::new(manager.clone())));
        }
        rules.push(Box::new(ClinitPropagationRule::new(manager.clone())));
        rules.push(Box::new(StrongUpdatePropagationRule::new(manager.clone())));
        if config.enable_exception_tracking {
            rules.push(Box::new(ExceptionPropagationRule::new(manager.clone())));
        }
        if config.enable_array_tracking {
            rules.push(Box::new(ArrayPropagationRule::new(manager.clone())));
        }
        if manager.taint_wrapper().is_some() {
            rules.push(Box::new(WrapperPropagationRule::new(manager.clone())));
        }
        rules.push(Box::new(SkipSystemClassRule::new(manager.clone())));
        if config.stop_after_first_k_flows > 0 {
            rules.push(Box::new(StopAfterFirstKFlowsRule::new(manager.clone())));
        }
        Self::with_rules(manager, rules)
    }

    pub fn with_rules(manager: Arc<InfoflowManager>, rules: Vec<Box<dyn TaintPropagationRule>>) -> Self {
        tracing::debug!(
            rules = ?rules.iter().map(|r| r.name()).collect::<Vec<_>>(),
            "rule chain assembled"
        );
        Self { manager, rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Evaluate one edge against every rule
    pub fn apply(&self, state: &FlowState<'_>, edge: FlowEdge<'_>, kill: &mut KillFlags) -> FlowOutcome {
        let mut facts: FxHashSet<Abstraction> = FxHashSet::default();
        for rule in &self.rules {
            if self.manager.is_terminated() {
                kill.kill_all = true;
                return FlowOutcome::none();
            }
            match dispatch(rule.as_ref(), state, edge, kill) {
                FlowOutcome::Redirect(path_edge) => {
                    tracing::trace!(rule = rule.name(), "edge redirected");
                    return FlowOutcome::Redirect(path_edge);
                }
                FlowOutcome::Continue(out) => facts.extend(out),
            }
            if kill.kill_all {
                return FlowOutcome::none();
            }
        }

        if edge.kind() == FlowFunctionKind::Normal && !kill.kill_source {
            facts.insert(state.source.clone());
        }
        FlowOutcome::Continue(facts)
    }
}

impl std::fmt::Debug for RuleChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleChain")
            .field("rules", &self.rule_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::config::{ImplicitFlowMode, InfoflowConfig};
    use crate::features::taint_analysis::infrastructure::test_support::{Fixture, NoopSubmitter};
    use crate::features::taint_analysis::ports::PathEdge;

    /// Adds a fixed fact on every edge
    struct Emit(Abstraction);

    impl TaintPropagationRule for Emit {
        fn name(&self) -> &'static str {
            "emit"
        }

        fn propagate_normal_flow(&self, _: &FlowState<'_>, _: &Stmt, _: &mut KillFlags) -> FlowOutcome {
            FlowOutcome::single(self.0.clone())
        }

        fn propagate_call_to_return_flow(&self, _: &FlowState<'_>, _: &mut KillFlags) -> FlowOutcome {
            FlowOutcome::single(self.0.clone())
        }
    }

    struct Kill(KillFlags);

    impl TaintPropagationRule for Kill {
        fn name(&self) -> &'static str {
            "kill"
        }

        fn propagate_normal_flow(&self, _: &FlowState<'_>, _: &Stmt, kill: &mut KillFlags) -> FlowOutcome {
            kill.kill_source |= self.0.kill_source;
            kill.kill_all |= self.0.kill_all;
            FlowOutcome::none()
        }
    }

    struct Redirect(PathEdge);

    impl TaintPropagationRule for Redirect {
        fn name(&self) -> &'static str {
            "redirect"
        }

        fn propagate_normal_flow(&self, _: &FlowState<'_>, _: &Stmt, _: &mut KillFlags) -> FlowOutcome {
            FlowOutcome::Redirect(self.0.clone())
        }
    }

    /// Counts how often the chain reached it
    struct Counting(Arc<AtomicUsize>);

    impl TaintPropagationRule for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn propagate_normal_flow(&self, _: &FlowState<'_>, _: &Stmt, _: &mut KillFlags) -> FlowOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            FlowOutcome::none()
        }
    }

    fn normal_edge(
        fx: &Fixture,
        rules: Vec<Box<dyn TaintPropagationRule>>,
        source: &Abstraction,
    ) -> (FlowOutcome, KillFlags) {
        let chain = RuleChain::with_rules(fx.manager.clone(), rules);
        let state = FlowState {
            d1: source,
            source,
            stmt: fx.program.stmt(fx.stmt("copy")),
            submitter: &NoopSubmitter,
        };
        let dest = fx.program.stmt(fx.stmt("source"));
        let mut kill = KillFlags::default();
        let out = chain.apply(&state, FlowEdge::Normal { dest }, &mut kill);
        (out, kill)
    }

    #[test]
    fn test_outputs_are_unioned() {
        let fx = Fixture::source_then_sink();
        let (s, t) = (fx.fact_on("s"), fx.fact_on("t"));
        let chain = RuleChain::with_rules(
            fx.manager.clone(),
            vec![Box::new(Emit(s.clone())), Box::new(Emit(t.clone())), Box::new(Emit(s.clone()))],
        );
        let zero = Abstraction::zero();
        let state = FlowState {
            d1: &zero,
            source: &zero,
            stmt: fx.program.stmt(fx.stmt("sink")),
            submitter: &NoopSubmitter,
        };
        let mut kill = KillFlags::default();
        let facts = chain
            .apply(&state, FlowEdge::CallToReturn, &mut kill)
            .into_facts();

        // the incoming fact is only re-added on normal edges
        assert_eq!(facts.len(), 2);
        assert!(facts.contains(&s));
        assert!(facts.contains(&t));
    }

    #[test]
    fn test_incoming_fact_survives_normal_edge() {
        let fx = Fixture::source_then_sink();
        let (s, t) = (fx.fact_on("s"), fx.fact_on("t"));
        let (out, _) = normal_edge(&fx, vec![Box::new(Emit(t.clone()))], &s);
        let facts = out.into_facts();
        assert_eq!(facts.len(), 2);
        assert!(facts.contains(&s));
    }

    #[test]
    fn test_kill_source_drops_incoming_fact() {
        let fx = Fixture::source_then_sink();
        let (s, t) = (fx.fact_on("s"), fx.fact_on("t"));
        let kill_source = KillFlags {
            kill_source: true,
            kill_all: false,
        };
        let (out, kill) = normal_edge(
            &fx,
            vec![Box::new(Kill(kill_source)), Box::new(Emit(t.clone()))],
            &s,
        );
        assert!(kill.kill_source);
        let facts = out.into_facts();
        assert_eq!(facts.len(), 1);
        assert!(facts.contains(&t));
    }

    #[test]
    fn test_kill_all_stops_the_chain() {
        let fx = Fixture::source_then_sink();
        let (s, t) = (fx.fact_on("s"), fx.fact_on("t"));
        let calls = Arc::new(AtomicUsize::new(0));
        let kill_all = KillFlags {
            kill_source: false,
            kill_all: true,
        };
        let (out, kill) = normal_edge(
            &fx,
            vec![
                Box::new(Emit(t)),
                Box::new(Kill(kill_all)),
                Box::new(Counting(calls.clone())),
            ],
            &s,
        );
        assert!(kill.kill_all);
        assert!(out.into_facts().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_redirect_stops_later_rules() {
        let fx = Fixture::source_then_sink();
        let (s, t) = (fx.fact_on("s"), fx.fact_on("t"));
        let calls = Arc::new(AtomicUsize::new(0));
        let edge = PathEdge::new(s.clone(), fx.stmt("source"), t.clone());
        let (out, _) = normal_edge(
            &fx,
            vec![
                Box::new(Emit(t)),
                Box::new(Redirect(edge.clone())),
                Box::new(Counting(calls.clone())),
            ],
            &s,
        );
        match out {
            FlowOutcome::Redirect(redirected) => assert_eq!(redirected, edge),
            FlowOutcome::Continue(facts) => panic!("expected a redirect, got {:?}", facts),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminated_run_skips_every_rule() {
        let fx = Fixture::source_then_sink();
        let s = fx.fact_on("s");
        let calls = Arc::new(AtomicUsize::new(0));
        fx.manager.force_terminate();
        let (out, kill) = normal_edge(&fx, vec![Box::new(Counting(calls.clone()))], &s);
        assert!(kill.kill_all);
        assert!(out.into_facts().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backward_chain_order() {
        let fx = Fixture::source_then_sink();
        let chain = RuleChain::backward(fx.manager.clone());
        assert_eq!(
            chain.rule_names(),
            vec![
                "sink_seeding",
                "source_recording",
                "clinit",
                "strong_update",
                "exception",
                "array",
                "skip_system_class",
            ]
        );

        let fx = Fixture::source_then_sink_with(InfoflowConfig {
            implicit_flow_mode: ImplicitFlowMode::AllImplicitFlows,
            enable_exception_tracking: false,
            enable_array_tracking: false,
            stop_after_first_k_flows: 2,
            ..Fixture::config()
        });
        let chain = RuleChain::backward(fx.manager.clone());
        assert_eq!(
            chain.rule_names(),
            vec![
                "sink_seeding",
                "source_recording",
                "implicit_flow",
                "clinit",
                "strong_update",
                "skip_system_class",
                "stop_after_first_k",
            ]
        );
    }

    #[test]
    fn test_wrapper_joins_chain_when_installed() {
        let fx = Fixture::library_call();
        let names = RuleChain::backward(fx.manager.clone()).rule_names();
        let wrapper = names.iter().position(|n| *n == "wrapper");
        let skip = names.iter().position(|n| *n == "skip_system_class");
        assert!(wrapper.is_some());
        assert!(wrapper < skip);
    }
}
