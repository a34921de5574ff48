//! Propagation results
//!
//! Terminal facts recorded by the rules. Running backward, a result is
//! recorded at the source statement and the path root names the sink.

use dashmap::DashSet;
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::abstraction::Abstraction;
use super::source_sink_definition::SourceSinkDefinition;
use crate::shared::models::StmtId;

/// Fact reaching a terminal statement
#[derive(Debug, Clone)]
pub struct AbstractionAtSink {
    pub definitions: Vec<Arc<SourceSinkDefinition>>,
    pub abstraction: Abstraction,
    pub stmt: StmtId,
}

impl AbstractionAtSink {
    pub fn new(
        definitions: Vec<Arc<SourceSinkDefinition>>,
        abstraction: Abstraction,
        stmt: StmtId,
    ) -> Self {
        // Turn units only matter during propagation
        let abstraction = if abstraction.turn_unit().is_some() {
            abstraction.derive_new_abstraction_with_turn_unit(None)
        } else {
            abstraction
        };
        Self {
            definitions,
            abstraction,
            stmt,
        }
    }
}

impl PartialEq for AbstractionAtSink {
    fn eq(&self, other: &Self) -> bool {
        self.stmt == other.stmt
            && self.abstraction == other.abstraction
            && self.definitions == other.definitions
    }
}

impl Eq for AbstractionAtSink {}

impl Hash for AbstractionAtSink {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.abstraction.hash(state);
        self.definitions.hash(state);
        self.stmt.hash(state);
    }
}

/// Notified for every newly recorded result; returning `false` asks the
/// analysis to stop
pub trait ResultListener: Send + Sync {
    fn on_result_available(&self, result: &AbstractionAtSink) -> bool;
}

#[derive(Default)]
pub struct TaintPropagationResults {
    results: DashSet<AbstractionAtSink>,
    listeners: RwLock<Vec<Arc<dyn ResultListener>>>,
    aborted: AtomicBool,
}

impl TaintPropagationResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result
    ///
    /// Returns `false` when the result was already known or a listener
    /// asked to stop, `true` otherwise.
    pub fn add_result(&self, result: AbstractionAtSink) -> bool {
        let abs = result
            .abstraction
            .derive_new_abstraction_mutable(result.abstraction.access_path().clone(), Some(result.stmt))
            .with_corresponding_call_site(Some(result.stmt));
        let result = AbstractionAtSink {
            abstraction: abs,
            ..result
        };

        if !self.results.insert(result.clone()) {
            tracing::trace!(stmt = %result.stmt, "duplicate result");
            return false;
        }
        tracing::debug!(stmt = %result.stmt, fact = %result.abstraction, "result recorded");

        let mut continue_analysis = true;
        for listener in self.listeners.read().iter() {
            if !listener.on_result_available(&result) {
                continue_analysis = false;
            }
        }
        if !continue_analysis {
            self.aborted.store(true, Ordering::SeqCst);
        }
        continue_analysis
    }

    /// A listener asked the analysis to stop
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    pub fn add_listener(&self, listener: Arc<dyn ResultListener>) {
        self.listeners.write().push(listener);
    }

    pub fn results(&self) -> Vec<AbstractionAtSink> {
        self.results.iter().map(|r| r.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl std::fmt::Debug for TaintPropagationResults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaintPropagationResults")
            .field("results", &self.results.len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
