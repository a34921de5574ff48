//! Signature-based source/sink manager
//!
//! Matches call statements against definitions by the invoked method's
//! signature. A definition of kind `Both` is indexed on both sides.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::features::taint_analysis::domain::{
    AccessPath, AccessPathFactory, CallLocation, SourceSinkDefinition,
};
use crate::features::taint_analysis::ports::{ReversibleSourceSinkManager, SinkInfo, SourceInfo};
use crate::shared::models::{InvokeExpr, MethodSig, Stmt, StmtKind, Value};

#[derive(Debug, Default)]
pub struct MethodSourceSinkManager {
    sources: FxHashMap<MethodSig, Vec<Arc<SourceSinkDefinition>>>,
    sinks: FxHashMap<MethodSig, Vec<Arc<SourceSinkDefinition>>>,
}

impl MethodSourceSinkManager {
    pub fn new(definitions: impl IntoIterator<Item = SourceSinkDefinition>) -> Self {
        let mut manager = Self::default();
        for def in definitions {
            manager.add(def);
        }
        manager
    }

    pub fn add(&mut self, definition: SourceSinkDefinition) {
        let def = Arc::new(definition);
        if def.kind.is_source() {
            self.sources
                .entry(def.method.clone())
                .or_default()
                .push(def.clone());
        }
        if def.kind.is_sink() {
            self.sinks.entry(def.method.clone()).or_default().push(def);
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.values().map(Vec::len).sum()
    }

    fn matching<'a>(
        table: &'a FxHashMap<MethodSig, Vec<Arc<SourceSinkDefinition>>>,
        stmt: &'a Stmt,
    ) -> Option<(&'a InvokeExpr, &'a [Arc<SourceSinkDefinition>])> {
        let inv = stmt.invoke_expr()?;
        let defs = table.get(&inv.method)?;
        Some((inv, defs.as_slice()))
    }

    /// Values at the locations a definition names for this call
    fn location_values(
        def: &SourceSinkDefinition,
        stmt: &Stmt,
        inv: &InvokeExpr,
        as_source: bool,
    ) -> Vec<Value> {
        def.effective_locations(inv.arg_count(), inv.base.is_some(), as_source)
            .into_iter()
            .filter_map(|loc| match loc {
                CallLocation::Return => match &stmt.kind {
                    StmtKind::Assign { left, .. } => Some(left.clone()),
                    _ => None,
                },
                CallLocation::Base => inv.base.as_ref().map(|b| Value::Local(b.clone())),
                CallLocation::Parameter(i) => inv.args.get(i).cloned(),
            })
            .collect()
    }

    /// Access paths at the locations `defs` name, each with the definitions
    /// naming it
    fn access_paths(
        defs: &[Arc<SourceSinkDefinition>],
        stmt: &Stmt,
        inv: &InvokeExpr,
        as_source: bool,
        factory: &AccessPathFactory,
    ) -> (Vec<AccessPath>, Vec<Vec<Arc<SourceSinkDefinition>>>) {
        let mut paths: Vec<AccessPath> = vec![];
        let mut path_defs: Vec<Vec<Arc<SourceSinkDefinition>>> = vec![];
        for def in defs {
            for val in Self::location_values(def, stmt, inv, as_source) {
                if !AccessPath::can_contain_value(&val) {
                    continue;
                }
                let Some(ap) = factory.create_access_path(&val, true) else {
                    continue;
                };
                match paths.iter().position(|p| *p == ap) {
                    Some(i) => {
                        if !path_defs[i].contains(def) {
                            path_defs[i].push(def.clone());
                        }
                    }
                    None => {
                        paths.push(ap);
                        path_defs.push(vec![def.clone()]);
                    }
                }
            }
        }
        (paths, path_defs)
    }

    fn roots_at(value: &Value, ap: &AccessPath) -> bool {
        value.base_local().is_some() && value.base_local() == ap.plain_value()
    }
}

impl ReversibleSourceSinkManager for MethodSourceSinkManager {
    fn source_info(&self, stmt: &Stmt, factory: &AccessPathFactory) -> Option<SourceInfo> {
        let (inv, defs) = Self::matching(&self.sources, stmt)?;
        let (access_paths, path_definitions) = Self::access_paths(defs, stmt, inv, true, factory);
        if access_paths.is_empty() {
            return None;
        }
        Some(SourceInfo {
            definitions: defs.to_vec(),
            access_paths,
            path_definitions,
            user_data: None,
        })
    }

    fn sink_info(&self, stmt: &Stmt, ap: Option<&AccessPath>) -> Option<SinkInfo> {
        let (inv, defs) = Self::matching(&self.sinks, stmt)?;
        let hits: Vec<Arc<SourceSinkDefinition>> = defs
            .iter()
            .filter(|d| match ap {
                None => true,
                Some(ap) => Self::location_values(d, stmt, inv, false)
                    .iter()
                    .any(|v| Self::roots_at(v, ap)),
            })
            .cloned()
            .collect();
        (!hits.is_empty()).then_some(SinkInfo {
            definitions: hits,
            user_data: None,
        })
    }

    fn inverse_source_info(&self, stmt: &Stmt, ap: Option<&AccessPath>) -> Option<SinkInfo> {
        let (inv, defs) = Self::matching(&self.sources, stmt)?;
        let hits: Vec<Arc<SourceSinkDefinition>> = defs
            .iter()
            .filter(|d| match ap {
                None => true,
                Some(ap) => Self::location_values(d, stmt, inv, true)
                    .iter()
                    .any(|v| Self::roots_at(v, ap)),
            })
            .cloned()
            .collect();
        (!hits.is_empty()).then_some(SinkInfo {
            definitions: hits,
            user_data: None,
        })
    }

    fn inverse_sink_info(&self, stmt: &Stmt, factory: &AccessPathFactory) -> Option<SourceInfo> {
        let (inv, defs) = Self::matching(&self.sinks, stmt)?;
        let (access_paths, path_definitions) = Self::access_paths(defs, stmt, inv, false, factory);
        Some(SourceInfo {
            definitions: defs.to_vec(),
            access_paths,
            path_definitions,
            user_data: None,
        })
    }
}
