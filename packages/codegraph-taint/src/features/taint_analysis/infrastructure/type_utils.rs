//! Type compatibility checks
//!
//! Derivations whose declared types can never hold the same object are
//! dropped. Class-hierarchy answers are memoized for the run since the
//! same pairs come up on every edge.

use dashmap::DashMap;
use std::sync::Arc;

use crate::features::taint_analysis::domain::AccessPath;
use crate::shared::models::{Program, Type, OBJECT_CLASS};

const ARRAY_SUPERTYPES: [&str; 3] = [OBJECT_CLASS, "java.lang.Cloneable", "java.io.Serializable"];

pub struct TypeUtils {
    program: Arc<Program>,
    enabled: bool,
    hierarchy_cache: DashMap<(String, String), bool>,
}

impl TypeUtils {
    pub fn new(program: Arc<Program>, enabled: bool) -> Self {
        Self {
            program,
            enabled,
            hierarchy_cache: DashMap::new(),
        }
    }

    /// Whether the location `ap` denotes may be cast to `ty`
    pub fn check_cast(&self, ap: &AccessPath, ty: &Type) -> bool {
        if !self.enabled {
            return true;
        }
        if ap.is_static_field_ref() {
            let Some(field_type) = ap.first_field_type() else {
                return true;
            };
            if !self.check_cast_types(ty, field_type) {
                return false;
            }
            // A primitive array has no fields below it
            if ty.is_primitive_array() && ap.field_count() > 1 {
                return false;
            }
        } else {
            if !self.check_cast_types(ty, ap.base_type()) {
                return false;
            }
            if ty.is_primitive_array() && ap.field_count() > 0 {
                return false;
            }
        }
        true
    }

    /// Whether a value of `source` may be stored in a `dest` location
    pub fn check_cast_types(&self, dest: &Type, source: &Type) -> bool {
        if !self.enabled {
            return true;
        }
        if dest == source || *dest == Type::Unknown || *source == Type::Unknown {
            return true;
        }
        match (dest, source) {
            (d, s) if d.is_primitive() && s.is_primitive() => true,
            (Type::Null, s) | (s, Type::Null) => s.is_reference(),
            (Type::Ref(d), Type::Ref(s)) => self.can_store(d, s) || self.can_store(s, d),
            (Type::Array(d), Type::Array(s)) => {
                if d.is_primitive() || s.is_primitive() {
                    d == s
                } else {
                    self.check_cast_types(d, s)
                }
            }
            (Type::Array(_), Type::Ref(name)) | (Type::Ref(name), Type::Array(_)) => {
                ARRAY_SUPERTYPES.contains(&name.as_str())
            }
            _ => false,
        }
    }

    /// Whether a method of `class` can be invoked on the value of `ap`
    pub fn has_compatible_types_for_call(&self, ap: &AccessPath, class: &str) -> bool {
        if !self.enabled {
            return true;
        }
        let base = ap.base_type();
        if base.is_primitive() {
            return false;
        }
        if base.is_array() {
            return class == OBJECT_CLASS;
        }
        self.check_cast(ap, &Type::class(class))
    }

    /// `child` is assignable to `parent`; unknown hierarchies count as
    /// assignable
    fn can_store(&self, child: &str, parent: &str) -> bool {
        if parent == OBJECT_CLASS {
            return true;
        }
        let key = (child.to_string(), parent.to_string());
        if let Some(hit) = self.hierarchy_cache.get(&key) {
            return *hit;
        }
        let answer = self.program.is_subclass_of(child, parent).unwrap_or(true);
        self.hierarchy_cache.insert(key, answer);
        answer
    }
}

impl std::fmt::Debug for TypeUtils {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeUtils")
            .field("enabled", &self.enabled)
            .field("cached", &self.hierarchy_cache.len())
            .finish()
    }
}
