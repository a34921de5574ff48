/*
 * Taint Analysis Infrastructure
 *
 * - rule_chain + rules/: the ordered propagation rules
 * - manager: everything a rule may consult during one run
 * - backwards_icfg, alias_analyzer, source_sink, summary_wrapper: in-memory
 *   implementations of the ports
 * - ifds_framework + ifds_solver: worklist tabulation driving a problem
 */

pub mod alias_analyzer;
pub mod backwards_icfg;
pub mod base_selector;
pub mod ifds_framework;
pub mod ifds_solver;
pub mod manager;
pub mod rule_chain;
pub mod rules;
pub mod source_sink;
pub mod summary_wrapper;
pub mod type_utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use alias_analyzer::AliasAnalyzer;
pub use backwards_icfg::BackwardsIcfg;
pub use ifds_framework::{IFDSProblem, IFDSStatistics};
pub use ifds_solver::IFDSSolver;
pub use manager::InfoflowManager;
pub use rule_chain::{FlowEdge, FlowFunctionKind, FlowState, KillFlags, RuleChain, TaintPropagationRule};
pub use source_sink::MethodSourceSinkManager;
pub use summary_wrapper::SummaryTaintWrapper;
pub use type_utils::TypeUtils;
