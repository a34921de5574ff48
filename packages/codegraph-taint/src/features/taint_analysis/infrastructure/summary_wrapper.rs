//! Summary-based taint wrapper
//!
//! Library methods are described by flow rules `from -> to` between call
//! locations. Running backward, a fact on `to` after the call turns into a
//! fact on `from` before it.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::features::taint_analysis::domain::{
    Abstraction, AccessPath, AccessPathFactory, CallLocation,
};
use crate::features::taint_analysis::ports::ReversibleTaintWrapper;
use crate::shared::models::{InvokeExpr, MethodSig, Stmt, StmtKind, Value};

/// One modeled flow through a library method
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SummaryRule {
    pub method: MethodSig,
    pub from: CallLocation,
    pub to: CallLocation,
    /// The callee body is never analyzed for facts this rule covers
    #[serde(default)]
    pub exclusive: bool,
}

#[derive(Debug, Default)]
pub struct SummaryTaintWrapper {
    rules: FxHashMap<MethodSig, Vec<SummaryRule>>,
}

impl SummaryTaintWrapper {
    pub fn new(rules: impl IntoIterator<Item = SummaryRule>) -> Self {
        let mut wrapper = Self::default();
        for rule in rules {
            wrapper.rules.entry(rule.method.clone()).or_default().push(rule);
        }
        wrapper
    }

    pub fn rule_count(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    fn rules_for<'a>(&'a self, stmt: &'a Stmt) -> Option<(&'a InvokeExpr, &'a [SummaryRule])> {
        let inv = stmt.invoke_expr()?;
        let rules = self.rules.get(&inv.method)?;
        Some((inv, rules.as_slice()))
    }
}

fn location_value(stmt: &Stmt, inv: &InvokeExpr, loc: CallLocation) -> Option<Value> {
    match loc {
        CallLocation::Return => match &stmt.kind {
            StmtKind::Assign { left, .. } => Some(left.clone()),
            _ => None,
        },
        CallLocation::Base => inv.base.as_ref().map(|b| Value::Local(b.clone())),
        CallLocation::Parameter(i) => inv.args.get(i).cloned(),
    }
}

impl ReversibleTaintWrapper for SummaryTaintWrapper {
    fn supports_callee(&self, method: &MethodSig) -> bool {
        self.rules.contains_key(method)
    }

    fn is_exclusive(&self, stmt: &Stmt, _abs: &Abstraction) -> bool {
        self.rules_for(stmt)
            .map(|(_, rules)| rules.iter().any(|r| r.exclusive))
            .unwrap_or(false)
    }

    fn inverse_taints_for_method(
        &self,
        stmt: &Stmt,
        _d1: &Abstraction,
        abs: &Abstraction,
        factory: &AccessPathFactory,
    ) -> Option<FxHashSet<Abstraction>> {
        let (inv, rules) = self.rules_for(stmt)?;
        let ap = abs.access_path();
        let mut out = FxHashSet::default();

        for rule in rules {
            let Some(to) = location_value(stmt, inv, rule.to) else {
                continue;
            };
            if to.base_local().is_none() || to.base_local() != ap.plain_value() {
                continue;
            }
            let Some(from) = location_value(stmt, inv, rule.from) else {
                continue;
            };
            if !AccessPath::can_contain_value(&from) {
                continue;
            }
            if let Some(new_ap) = factory.copy_with_new_value(ap, &from, None, false) {
                out.insert(abs.derive_new_abstraction(new_ap, Some(stmt.id)));
            }
        }

        // The return value did not exist before the call
        let on_return = match &stmt.kind {
            StmtKind::Assign { left, .. } => {
                left.base_local().is_some() && left.base_local() == ap.plain_value()
            }
            _ => false,
        };
        if !on_return {
            out.insert(abs.clone());
        }
        Some(out)
    }
}
