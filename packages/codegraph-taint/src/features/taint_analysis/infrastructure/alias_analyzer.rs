//! Intraprocedural must-alias oracle
//!
//! Locals alias when they resolve to the same definition through plain
//! `a = b` copies. Heap writes through one alias re-taint the others.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::config::InfoflowConfig;
use crate::features::taint_analysis::domain::{Abstraction, AccessPath, AccessPathFactory};
use crate::features::taint_analysis::ports::Aliasing;
use crate::shared::models::{Local, MethodId, Program, StmtId, StmtKind, Value};

/// `val` is the root of the fact, or the field reference it starts with
pub fn base_matches(val: &Value, source: &Abstraction) -> bool {
    let ap = source.access_path();
    match val {
        Value::Local(local) => ap.plain_value() == Some(local),
        Value::InstanceField { base, field } => {
            ap.plain_value() == Some(base) && ap.first_field_matches(field)
        }
        Value::StaticField(field) => ap.is_static_field_ref() && ap.first_field_matches(field),
        _ => false,
    }
}

/// Like [`base_matches`], but the fact must end exactly at `val`
pub fn base_matches_strict(val: &Value, source: &Abstraction) -> bool {
    if !base_matches(val, source) {
        return false;
    }
    match val {
        Value::Local(_) => source.access_path().is_local(),
        Value::InstanceField { .. } | Value::StaticField(_) => {
            source.access_path().field_count() == 1
        }
        _ => false,
    }
}

pub struct AliasAnalyzer {
    program: Arc<Program>,
    factory: AccessPathFactory,
}

impl AliasAnalyzer {
    pub fn new(program: Arc<Program>, config: &InfoflowConfig) -> Self {
        Self {
            program,
            factory: AccessPathFactory::new(config),
        }
    }

    /// Single definition of `local` in `method`, if there is exactly one
    fn single_definition<'a>(&'a self, method: MethodId, local: &Local) -> Option<&'a Value> {
        let mut defs = self
            .program
            .method(method)
            .stmts()
            .iter()
            .filter_map(|&s| match &self.program.stmt(s).kind {
                StmtKind::Assign {
                    left: Value::Local(l),
                    right,
                } if l == local => Some(right),
                StmtKind::Identity { left, right } if left == local => Some(right),
                _ => None,
            });
        let first = defs.next()?;
        defs.next().is_none().then_some(first)
    }

    /// Follow local-to-local copies back to the original local
    fn resolve(&self, method: MethodId, local: &Local) -> Local {
        let mut current = local.clone();
        let mut visited = FxHashSet::default();
        while visited.insert(current.clone()) {
            match self.single_definition(method, &current) {
                Some(Value::Local(source)) => current = source.clone(),
                _ => break,
            }
        }
        current
    }

    fn reference_locals(&self, method: MethodId) -> Vec<Local> {
        let mut seen = FxHashSet::default();
        let mut locals = vec![];
        for &s in self.program.method(method).stmts() {
            let stmt = self.program.stmt(s);
            let defined = match &stmt.kind {
                StmtKind::Assign {
                    left: Value::Local(l),
                    ..
                } => Some(l),
                StmtKind::Identity { left, .. } => Some(left),
                _ => None,
            };
            if let Some(l) = defined {
                if l.ty.is_reference() && seen.insert(l.clone()) {
                    locals.push(l.clone());
                }
            }
        }
        locals
    }
}

impl Aliasing for AliasAnalyzer {
    fn may_alias(&self, v1: &Value, v2: &Value) -> bool {
        if v1.is_constant() || v2.is_constant() {
            return false;
        }
        if !AccessPath::can_contain_value(v1) || !AccessPath::can_contain_value(v2) {
            return false;
        }
        v1 == v2
    }

    fn must_alias(&self, l1: &Local, l2: &Local, stmt: StmtId) -> bool {
        if l1 == l2 {
            return true;
        }
        if !l1.ty.is_reference() || !l2.ty.is_reference() {
            return false;
        }
        let method = self.program.method_of(stmt);
        self.resolve(method, l1) == self.resolve(method, l2)
    }

    fn compute_aliases(
        &self,
        _d1: &Abstraction,
        stmt: StmtId,
        _target: &Value,
        new_abs: &Abstraction,
    ) -> Vec<Abstraction> {
        let ap = new_abs.access_path();
        let Some(base) = ap.plain_value() else {
            return vec![];
        };
        if !ap.is_instance_field_ref() && !base.ty.is_array() {
            return vec![];
        }

        let method = self.program.method_of(stmt);
        self.reference_locals(method)
            .into_iter()
            .filter(|other| other != base && self.must_alias(base, other, stmt))
            .filter_map(|other| {
                self.factory
                    .copy_with_new_value(ap, &Value::Local(other), None, false)
            })
            .map(|alias_ap| new_abs.derive_new_abstraction(alias_ap, Some(stmt)))
            .collect()
    }
}

impl std::fmt::Debug for AliasAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasAnalyzer").finish_non_exhaustive()
    }
}
