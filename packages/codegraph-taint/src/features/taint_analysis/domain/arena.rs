//! Abstraction arena
//!
//! Append-only store of immutable facts indexed by [`AbstractionId`]. Ids
//! are handed out in registration order, so a fact's predecessor always has
//! a smaller id than the fact itself. Path reconstruction relies on that to
//! detect broken chains.

use parking_lot::RwLock;
use std::sync::Arc;

use super::abstraction::{Abstraction, AbstractionId};
use crate::errors::{Result, TaintError};

#[derive(Debug, Default)]
pub struct AbstractionArena {
    nodes: RwLock<Vec<Arc<Abstraction>>>,
}

impl AbstractionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a fact and return it with its id set. Facts that already carry
    /// an id are returned unchanged.
    pub fn register(&self, abs: Abstraction) -> Abstraction {
        if abs.id().is_some() {
            return abs;
        }
        let mut nodes = self.nodes.write();
        let id = AbstractionId(nodes.len() as u32);
        let registered = abs.with_id(id);
        nodes.push(Arc::new(registered.clone()));
        registered
    }

    pub fn get(&self, id: AbstractionId) -> Option<Arc<Abstraction>> {
        self.nodes.read().get(id.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Chain from `abs` back to its root, `abs` first
    ///
    /// Fails with `InvalidState` when a predecessor is missing, ids do not
    /// strictly decrease, or the root has no source context.
    pub fn path_to_root(&self, abs: &Abstraction) -> Result<Vec<Arc<Abstraction>>> {
        let nodes = self.nodes.read();
        let mut chain = vec![Arc::new(abs.clone())];
        let mut bound = abs.id();
        let mut next = abs.predecessor();

        while let Some(id) = next {
            if let Some(upper) = bound {
                if id >= upper {
                    return Err(TaintError::invalid_state(format!(
                        "predecessor {} of {} does not precede it",
                        id.0, upper.0
                    )));
                }
            }
            let node = nodes.get(id.0 as usize).cloned().ok_or_else(|| {
                TaintError::invalid_state(format!("predecessor {} not in arena", id.0))
            })?;
            bound = Some(id);
            next = node.predecessor();
            chain.push(node);
        }

        let root = chain.last().map(|n| n.source_context().is_some()).unwrap_or(false);
        if !root {
            return Err(TaintError::invalid_state(format!(
                "chain of {} ends without a source context",
                abs
            )));
        }
        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InfoflowConfig;
    use crate::features::taint_analysis::domain::access_path::AccessPathFactory;
    use crate::features::taint_analysis::domain::source_sink_definition::SourceSinkDefinition;
    use crate::shared::models::{Local, MethodSig, StmtId, Type, Value};

    fn root() -> Abstraction {
        let ap = AccessPathFactory::new(&InfoflowConfig::default())
            .create_access_path(&Value::local(&Local::new("s", Type::string())), false)
            .unwrap();
        let def = SourceSinkDefinition::sink("sink", MethodSig::new("M", "sink", vec![], Type::Void));
        Abstraction::new_root(vec![Arc::new(def)], ap, StmtId(9), None, false, false)
    }

    #[test]
    fn test_ids_increase() {
        let arena = AbstractionArena::new();
        let a = arena.register(root());
        let b = arena.register(a.derive_new_abstraction_with_turn_unit(Some(StmtId(9))));
        assert!(a.id().unwrap() < b.id().unwrap());
        assert_eq!(arena.len(), 2);
        // registering twice is a no-op
        let again = arena.register(b.clone());
        assert_eq!(again.id(), b.id());
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_path_to_root() {
        let arena = AbstractionArena::new();
        let r = arena.register(root());
        let child = arena.register(r.derive_new_abstraction_with_turn_unit(Some(StmtId(9))));
        let leaf = child.derive_new_abstraction_with_turn_unit(Some(StmtId(3)));

        let chain = arena.path_to_root(&leaf).unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain.last().unwrap().source_context().is_some());
    }

    #[test]
    fn test_missing_predecessor_is_invalid_state() {
        let arena = AbstractionArena::new();
        let orphan = root()
            .with_id(AbstractionId(5))
            .derive_new_abstraction_with_turn_unit(Some(StmtId(1)));
        let err = arena.path_to_root(&orphan).unwrap_err();
        assert!(matches!(err, TaintError::InvalidState(_)));
    }

    #[test]
    fn test_rootless_chain_is_invalid_state() {
        let arena = AbstractionArena::new();
        let zero = arena.register(Abstraction::zero());
        let derived = zero.derive_new_abstraction_with_turn_unit(Some(StmtId(1)));
        assert!(arena.path_to_root(&derived).is_err());
    }
}
