/*
 * Abstraction (taint fact)
 *
 * One fact propagated by the solver: an access path plus provenance.
 *
 * Provenance is a tree. Every derived fact keeps the arena id of the fact it
 * was derived from (`predecessor`); roots carry a SourceContext instead.
 * Facts that never made it into the arena are skipped: a child of an
 * unregistered fact inherits that fact's own link, so every chain still ends
 * at a registered root.
 *
 * Identity for the solver (Eq/Hash) ignores the provenance fields (id,
 * predecessor, current statement, call site, path length): two facts that
 * describe the same taint state are the same fact.
 */

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::access_path::AccessPath;
use super::source_sink_definition::SourceSinkDefinition;
use crate::shared::models::StmtId;

/// Arena index of a registered abstraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AbstractionId(pub u32);

/// Origin of a root fact
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub definitions: Vec<Arc<SourceSinkDefinition>>,
    pub access_path: AccessPath,
    pub stmt: StmtId,
    pub user_data: Option<String>,
}

impl PartialEq for SourceContext {
    fn eq(&self, other: &Self) -> bool {
        self.stmt == other.stmt
            && self.access_path == other.access_path
            && self.definitions == other.definitions
            && self.user_data == other.user_data
    }
}

impl Eq for SourceContext {}

impl Hash for SourceContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.stmt.hash(state);
        self.access_path.hash(state);
        self.definitions.hash(state);
    }
}

impl fmt::Display for SourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} in {}", self.access_path, self.stmt)
    }
}

// ============================================================================
// Abstraction
// ============================================================================

#[derive(Debug, Clone)]
pub struct Abstraction {
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Provenance (ignored by Eq/Hash)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    id: Option<AbstractionId>,
    predecessor: Option<AbstractionId>,
    current_stmt: Option<StmtId>,
    corresponding_call_site: Option<StmtId>,
    path_length: usize,

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Taint state
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    access_path: AccessPath,
    source_context: Option<Arc<SourceContext>>,
    activation_unit: Option<StmtId>,
    turn_unit: Option<StmtId>,
    exception_thrown: bool,
    dominator: Option<StmtId>,
    is_implicit: bool,
    depends_on_cut_ap: bool,
}

impl Abstraction {
    /// Root fact at a source (or, running backward, a sink)
    pub fn new_root(
        definitions: Vec<Arc<SourceSinkDefinition>>,
        access_path: AccessPath,
        stmt: StmtId,
        user_data: Option<String>,
        exception_thrown: bool,
        is_implicit: bool,
    ) -> Self {
        let context = SourceContext {
            definitions,
            access_path: access_path.clone(),
            stmt,
            user_data,
        };
        Self {
            id: None,
            predecessor: None,
            current_stmt: Some(stmt),
            corresponding_call_site: None,
            path_length: 0,
            access_path,
            source_context: Some(Arc::new(context)),
            activation_unit: None,
            turn_unit: None,
            exception_thrown,
            dominator: None,
            is_implicit,
            depends_on_cut_ap: false,
        }
    }

    /// The fact that holds everywhere
    pub fn zero() -> Self {
        Self {
            id: None,
            predecessor: None,
            current_stmt: None,
            corresponding_call_site: None,
            path_length: 0,
            access_path: AccessPath::zero(),
            source_context: None,
            activation_unit: None,
            turn_unit: None,
            exception_thrown: false,
            dominator: None,
            is_implicit: false,
            depends_on_cut_ap: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn id(&self) -> Option<AbstractionId> {
        self.id
    }

    pub fn predecessor(&self) -> Option<AbstractionId> {
        self.predecessor
    }

    /// Nearest registered ancestor-or-self
    pub fn link(&self) -> Option<AbstractionId> {
        self.id.or(self.predecessor)
    }

    pub fn access_path(&self) -> &AccessPath {
        &self.access_path
    }

    pub fn source_context(&self) -> Option<&Arc<SourceContext>> {
        self.source_context.as_ref()
    }

    pub fn current_stmt(&self) -> Option<StmtId> {
        self.current_stmt
    }

    pub fn corresponding_call_site(&self) -> Option<StmtId> {
        self.corresponding_call_site
    }

    pub fn activation_unit(&self) -> Option<StmtId> {
        self.activation_unit
    }

    pub fn turn_unit(&self) -> Option<StmtId> {
        self.turn_unit
    }

    pub fn exception_thrown(&self) -> bool {
        self.exception_thrown
    }

    pub fn dominator(&self) -> Option<StmtId> {
        self.dominator
    }

    pub fn is_implicit(&self) -> bool {
        self.is_implicit
    }

    pub fn depends_on_cut_ap(&self) -> bool {
        self.depends_on_cut_ap
    }

    pub fn path_length(&self) -> usize {
        self.path_length
    }

    pub fn is_abstraction_active(&self) -> bool {
        self.activation_unit.is_none()
    }

    pub fn is_zero(&self) -> bool {
        self.access_path.is_zero()
    }

    pub fn is_dominator(&self, stmt: StmtId) -> bool {
        self.dominator == Some(stmt)
    }

    // ========================================================================
    // Derivations
    // ========================================================================

    /// Copy that points back at `self`
    fn child(&self) -> Self {
        Self {
            id: None,
            predecessor: self.link(),
            current_stmt: None,
            corresponding_call_site: None,
            path_length: self.path_length + 1,
            ..self.clone()
        }
    }

    pub(crate) fn with_id(mut self, id: AbstractionId) -> Self {
        self.id = Some(id);
        self
    }

    /// Fact on `ap` derived at `stmt`; `self` when nothing would change
    pub fn derive_new_abstraction(&self, ap: AccessPath, stmt: Option<StmtId>) -> Self {
        self.derive_new_abstraction_implicit(ap, stmt, self.is_implicit)
    }

    pub fn derive_new_abstraction_implicit(
        &self,
        ap: AccessPath,
        stmt: Option<StmtId>,
        is_implicit: bool,
    ) -> Self {
        if self.access_path == ap && self.current_stmt == stmt && self.is_implicit == is_implicit {
            return self.clone();
        }
        let mut abs = self.derive_new_abstraction_mutable(ap, stmt);
        abs.is_implicit = is_implicit;
        abs
    }

    /// Always a new fact; drops the source context unless only the
    /// statement is refreshed
    pub fn derive_new_abstraction_mutable(&self, ap: AccessPath, stmt: Option<StmtId>) -> Self {
        if self.access_path == ap && self.current_stmt == stmt {
            let mut abs = self.child();
            abs.current_stmt = stmt;
            return abs;
        }

        let mut abs = self.child();
        abs.current_stmt = stmt;
        if !abs.is_abstraction_active() {
            abs.depends_on_cut_ap |= ap.is_cut_off_approximation();
        }
        abs.access_path = ap;
        abs.source_context = None;
        abs
    }

    /// Pending-throw fact created at a caught exception
    pub fn derive_new_abstraction_on_throw(&self, stmt: StmtId) -> Self {
        let mut abs = self.child();
        abs.current_stmt = Some(stmt);
        abs.source_context = None;
        abs.exception_thrown = true;
        abs
    }

    /// Resolves a pending throw onto the thrown value
    pub fn derive_new_abstraction_on_catch(&self, ap: AccessPath) -> Self {
        let mut abs = self.derive_new_abstraction_mutable(ap, None);
        abs.exception_thrown = false;
        abs
    }

    pub fn derive_new_abstraction_with_turn_unit(&self, turn_unit: Option<StmtId>) -> Self {
        if self.turn_unit == turn_unit {
            return self.clone();
        }
        let mut abs = self.child();
        abs.current_stmt = self.current_stmt;
        abs.corresponding_call_site = self.corresponding_call_site;
        abs.source_context = None;
        abs.activation_unit = None;
        abs.turn_unit = turn_unit;
        abs
    }

    pub fn get_active_copy(&self) -> Self {
        if self.is_abstraction_active() {
            return self.clone();
        }
        let mut abs = self.child();
        abs.source_context = None;
        abs.activation_unit = None;
        abs
    }

    /// Inactive copy that becomes active at `activation_unit`
    pub fn derive_inactive_abstraction(&self, activation_unit: StmtId) -> Self {
        if !self.is_abstraction_active() {
            return self.clone();
        }
        let mut abs = self.derive_new_abstraction_mutable(self.access_path.clone(), None);
        abs.dominator = None;
        abs.activation_unit = Some(activation_unit);
        abs.depends_on_cut_ap |= abs.access_path.is_cut_off_approximation();
        abs
    }

    /// Attach a controlling branch; `self` if one is already attached
    pub fn derive_new_abstraction_with_dominator(
        &self,
        dominator: StmtId,
        stmt: Option<StmtId>,
    ) -> Self {
        if self.dominator.is_some() {
            return self.clone();
        }
        let mut abs = self.derive_new_abstraction_mutable(self.access_path.clone(), stmt);
        abs.dominator = Some(dominator);
        abs
    }

    /// Empty-path fact marking a write under the current dominator
    pub fn derive_conditional_update(&self, stmt: StmtId) -> Self {
        self.derive_new_abstraction_mutable(AccessPath::empty(), Some(stmt))
    }

    /// Fact on a condition operand, leaving the branch scope
    pub fn derive_condition(&self, ap: AccessPath, stmt: StmtId) -> Self {
        let mut abs = self.derive_new_abstraction_mutable(ap, Some(stmt));
        abs.turn_unit = Some(stmt);
        abs.dominator = None;
        abs
    }

    pub fn remove_dominator(&self, stmt: StmtId) -> Self {
        let mut abs = self.derive_new_abstraction_mutable(self.access_path.clone(), Some(stmt));
        abs.dominator = None;
        abs
    }

    // ========================================================================
    // Setters on fresh copies
    // ========================================================================

    pub fn with_corresponding_call_site(mut self, call_site: Option<StmtId>) -> Self {
        self.corresponding_call_site = call_site;
        self
    }

    pub fn with_dominator(mut self, dominator: Option<StmtId>) -> Self {
        self.dominator = dominator;
        self
    }

    pub fn with_current_stmt(mut self, stmt: Option<StmtId>) -> Self {
        self.current_stmt = stmt;
        self
    }
}

impl PartialEq for Abstraction {
    fn eq(&self, other: &Self) -> bool {
        self.access_path == other.access_path
            && self.source_context == other.source_context
            && self.activation_unit == other.activation_unit
            && self.turn_unit == other.turn_unit
            && self.exception_thrown == other.exception_thrown
            && self.dominator == other.dominator
            && self.depends_on_cut_ap == other.depends_on_cut_ap
            && self.is_implicit == other.is_implicit
    }
}

impl Eq for Abstraction {}

impl Hash for Abstraction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source_context.hash(state);
        self.access_path.hash(state);
        self.activation_unit.hash(state);
        self.turn_unit.hash(state);
        self.exception_thrown.hash(state);
        self.dominator.hash(state);
        self.depends_on_cut_ap.hash(state);
        self.is_implicit.hash(state);
    }
}

impl fmt::Display for Abstraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_abstraction_active() {
            write!(f, "_")?;
        }
        write!(f, "{}", self.access_path)?;
        if self.exception_thrown {
            write!(f, " (thrown)")?;
        }
        if let Some(dom) = self.dominator {
            write!(f, " dom={}", dom)?;
        }
        if let Some(turn) = self.turn_unit {
            write!(f, " | {}>>", turn)?;
        } else if let Some(act) = self.activation_unit {
            write!(f, " | {}>>", act)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InfoflowConfig;
    use crate::features::taint_analysis::domain::access_path::AccessPathFactory;
    use crate::shared::models::{Local, MethodSig, Type, Value};

    fn ap(name: &str) -> AccessPath {
        AccessPathFactory::new(&InfoflowConfig::default())
            .create_access_path(&Value::local(&Local::new(name, Type::string())), false)
            .unwrap()
    }

    fn root() -> Abstraction {
        let def = SourceSinkDefinition::sink(
            "sink",
            MethodSig::new("Main", "sink", vec![Type::string()], Type::Void),
        );
        Abstraction::new_root(vec![Arc::new(def)], ap("s"), StmtId(4), None, false, false)
    }

    #[test]
    fn test_root_has_source_context() {
        let r = root();
        assert!(r.source_context().is_some());
        assert_eq!(r.current_stmt(), Some(StmtId(4)));
        assert!(r.is_abstraction_active());
    }

    #[test]
    fn test_derivation_drops_source_context_and_links() {
        let r = root().with_id(AbstractionId(3));
        let d = r.derive_new_abstraction(ap("t"), Some(StmtId(2)));
        assert!(d.source_context().is_none());
        assert_eq!(d.predecessor(), Some(AbstractionId(3)));
        assert_eq!(d.path_length(), 1);
    }

    #[test]
    fn test_unchanged_derivation_returns_self() {
        let r = root();
        let same = r.derive_new_abstraction(ap("s"), Some(StmtId(4)));
        assert_eq!(same.predecessor(), None);
        assert!(same.source_context().is_some());
    }

    #[test]
    fn test_unregistered_intermediate_is_skipped() {
        let r = root().with_id(AbstractionId(0));
        let mid = r.derive_new_abstraction(ap("t"), Some(StmtId(3)));
        let leaf = mid.derive_new_abstraction(ap("u"), Some(StmtId(2)));
        assert_eq!(leaf.predecessor(), Some(AbstractionId(0)));
    }

    #[test]
    fn test_equality_ignores_provenance() {
        let r = root();
        let a = r.derive_new_abstraction(ap("t"), Some(StmtId(2)));
        let b = r.derive_new_abstraction(ap("t"), Some(StmtId(1)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_dominator_lifecycle() {
        let r = root();
        let dom = r.derive_new_abstraction_with_dominator(StmtId(1), Some(StmtId(3)));
        assert!(dom.is_dominator(StmtId(1)));
        // a second dominator does not replace the first
        let again = dom.derive_new_abstraction_with_dominator(StmtId(0), None);
        assert!(again.is_dominator(StmtId(1)));

        let update = dom.derive_conditional_update(StmtId(2));
        assert!(update.access_path().is_empty());
        assert!(update.is_dominator(StmtId(1)));

        let cond = update.derive_condition(ap("z"), StmtId(1));
        assert_eq!(cond.dominator(), None);
        assert_eq!(cond.turn_unit(), Some(StmtId(1)));
    }

    #[test]
    fn test_throw_and_catch() {
        let r = root();
        let thrown = r.derive_new_abstraction_on_throw(StmtId(5));
        assert!(thrown.exception_thrown());
        assert_ne!(thrown, r);
        let caught = thrown.derive_new_abstraction_on_catch(ap("e"));
        assert!(!caught.exception_thrown());
    }

    #[test]
    fn test_activation() {
        let r = root();
        let inactive = r.derive_inactive_abstraction(StmtId(7));
        assert!(!inactive.is_abstraction_active());
        assert_eq!(inactive.activation_unit(), Some(StmtId(7)));
        assert!(inactive.get_active_copy().is_abstraction_active());
    }

    #[test]
    fn test_zero() {
        assert!(Abstraction::zero().is_zero());
        assert!(!root().is_zero());
    }
}
