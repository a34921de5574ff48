/*
 * Access Paths
 *
 * Symbolic name of a tainted heap or stack location:
 *
 *   x            local
 *   x.f.g        instance field chain rooted at local x
 *   <C: T f>.g   static field chain (no base local)
 *   x.f *        taint_sub_fields: every extension of x.f is tainted too
 *
 * Paths are bounded by the configured length. When a path would grow past
 * the bound it is cut and marked with taint_sub_fields, which is sound
 * (over-approximate) and keeps the fact domain finite.
 */

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::config::InfoflowConfig;
use crate::shared::models::{Field, Local, Type, Value, OBJECT_CLASS};

/// Which part of an array is tainted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayTaintType {
    /// Location is not an array
    None,
    Contents,
    Length,
    ContentsAndLength,
}

static EMPTY_ACCESS_PATH: Lazy<AccessPath> = Lazy::new(|| AccessPath {
    value: None,
    base_type: Type::Unknown,
    fields: Vec::new(),
    taint_sub_fields: false,
    cut_off_approximation: false,
    array_taint_type: ArrayTaintType::None,
    can_have_immutable_aliases: false,
});

static ZERO_ACCESS_PATH: Lazy<AccessPath> = Lazy::new(|| AccessPath {
    value: Some(Local::new("<zero>", Type::Null)),
    base_type: Type::Null,
    fields: Vec::new(),
    taint_sub_fields: false,
    cut_off_approximation: false,
    array_taint_type: ArrayTaintType::None,
    can_have_immutable_aliases: false,
});

// ============================================================================
// AccessPath
// ============================================================================

/// Tainted location
///
/// Equality and hashing only consider the value, the field chain,
/// `taint_sub_fields` and the array taint type.
#[derive(Debug, Clone)]
pub struct AccessPath {
    value: Option<Local>,
    base_type: Type,
    fields: Vec<Field>,
    taint_sub_fields: bool,
    cut_off_approximation: bool,
    array_taint_type: ArrayTaintType,
    can_have_immutable_aliases: bool,
}

impl AccessPath {
    /// Path of a fact that names no location (conditional facts)
    pub fn empty() -> AccessPath {
        EMPTY_ACCESS_PATH.clone()
    }

    /// Path of the zero fact
    pub fn zero() -> AccessPath {
        ZERO_ACCESS_PATH.clone()
    }

    /// Whether a value can be the root of an access path
    pub fn can_contain_value(val: &Value) -> bool {
        matches!(
            val,
            Value::Local(_)
                | Value::InstanceField { .. }
                | Value::StaticField(_)
                | Value::ArrayRef { .. }
        )
    }

    pub fn plain_value(&self) -> Option<&Local> {
        self.value.as_ref()
    }

    pub fn base_type(&self) -> &Type {
        &self.base_type
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn first_field(&self) -> Option<&Field> {
        self.fields.first()
    }

    pub fn first_field_type(&self) -> Option<&Type> {
        self.fields.first().map(|f| &f.ty)
    }

    /// Type of the location the path denotes
    pub fn last_type(&self) -> &Type {
        self.fields.last().map(|f| &f.ty).unwrap_or(&self.base_type)
    }

    pub fn first_field_matches(&self, field: &Field) -> bool {
        self.fields.first() == Some(field)
    }

    pub fn taint_sub_fields(&self) -> bool {
        self.taint_sub_fields
    }

    pub fn is_cut_off_approximation(&self) -> bool {
        self.cut_off_approximation
    }

    pub fn array_taint_type(&self) -> ArrayTaintType {
        self.array_taint_type
    }

    pub fn can_have_immutable_aliases(&self) -> bool {
        self.can_have_immutable_aliases
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.fields.is_empty()
    }

    pub fn is_local(&self) -> bool {
        self.value.is_some() && self.fields.is_empty()
    }

    pub fn is_instance_field_ref(&self) -> bool {
        self.value.is_some() && !self.fields.is_empty()
    }

    pub fn is_static_field_ref(&self) -> bool {
        self.value.is_none() && !self.fields.is_empty()
    }

    pub fn is_field_ref(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        *self == *ZERO_ACCESS_PATH
    }

    /// Base local is a primitive or a string (immutable, cannot alias)
    pub fn is_primitive_or_string_base(&self) -> bool {
        self.value
            .as_ref()
            .map(|v| v.ty.is_primitive() || v.ty.is_string())
            .unwrap_or(false)
    }
}

impl PartialEq for AccessPath {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.fields == other.fields
            && self.taint_sub_fields == other.taint_sub_fields
            && self.array_taint_type == other.array_taint_type
    }
}

impl Eq for AccessPath {}

impl Hash for AccessPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
        self.fields.hash(state);
        self.taint_sub_fields.hash(state);
        self.array_taint_type.hash(state);
    }
}

impl fmt::Display for AccessPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "<empty>");
        }
        let mut parts: Vec<String> = Vec::new();
        if let Some(v) = &self.value {
            parts.push(v.name.clone());
        }
        for (i, field) in self.fields.iter().enumerate() {
            if i == 0 && self.value.is_none() {
                parts.push(format!("<{}: {}>", field.declaring_class, field.name));
            } else {
                parts.push(field.name.clone());
            }
        }
        write!(f, "{}", parts.join("."))?;
        if self.taint_sub_fields {
            write!(f, " *")?;
        }
        match self.array_taint_type {
            ArrayTaintType::Contents => write!(f, " <[]>"),
            ArrayTaintType::Length => write!(f, " <length>"),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// AccessPathFactory
// ============================================================================

/// Creates access paths under the configured bound and tracking modes
#[derive(Debug, Clone)]
pub struct AccessPathFactory {
    access_path_length: usize,
    type_checking: bool,
    static_fields: bool,
}

impl AccessPathFactory {
    pub fn new(config: &InfoflowConfig) -> Self {
        Self {
            access_path_length: config.access_path_length,
            type_checking: config.enable_type_checking,
            static_fields: config.static_field_tracking_mode.is_enabled(),
        }
    }

    pub fn access_path_length(&self) -> usize {
        self.access_path_length
    }

    /// Path for a value, tainting the whole array if it is one
    pub fn create_access_path(&self, val: &Value, taint_sub_fields: bool) -> Option<AccessPath> {
        self.create(
            val,
            None,
            &[],
            taint_sub_fields,
            false,
            ArrayTaintType::ContentsAndLength,
            false,
        )
    }

    pub fn create_access_path_typed(
        &self,
        val: &Value,
        val_type: Option<Type>,
        taint_sub_fields: bool,
        array_taint_type: ArrayTaintType,
    ) -> Option<AccessPath> {
        self.create(
            val,
            val_type,
            &[],
            taint_sub_fields,
            false,
            array_taint_type,
            false,
        )
    }

    /// Path for `val` extended by `appending`
    pub fn create_access_path_appending(
        &self,
        val: &Value,
        appending: &[Field],
        taint_sub_fields: bool,
    ) -> Option<AccessPath> {
        self.create(
            val,
            None,
            appending,
            taint_sub_fields,
            false,
            ArrayTaintType::ContentsAndLength,
            false,
        )
    }

    /// General constructor
    ///
    /// Returns `None` when the value cannot root a path, the path would be
    /// static while static tracking is off, or the shape is impossible
    /// (fields on a primitive base).
    pub fn create(
        &self,
        val: &Value,
        val_type: Option<Type>,
        appending: &[Field],
        mut taint_sub_fields: bool,
        cut_first_field: bool,
        array_taint_type: ArrayTaintType,
        can_have_immutable_aliases: bool,
    ) -> Option<AccessPath> {
        let val_type = if self.type_checking { val_type } else { None };

        let (value, base_type, mut fields) = match val {
            Value::Local(local) => {
                let base = more_precise(val_type.as_ref(), &local.ty);
                (Some(local.clone()), base, appending.to_vec())
            }
            Value::ArrayRef { base, .. } => {
                let base_type = more_precise(val_type.as_ref(), &base.ty);
                (Some(base.clone()), base_type, appending.to_vec())
            }
            Value::InstanceField { base, field } => {
                let mut fields = Vec::with_capacity(appending.len() + 1);
                fields.push(field.clone());
                fields.extend_from_slice(appending);
                (Some(base.clone()), base.ty.clone(), fields)
            }
            Value::StaticField(field) => {
                if !self.static_fields {
                    return None;
                }
                let mut fields = Vec::with_capacity(appending.len() + 1);
                fields.push(field.clone());
                fields.extend_from_slice(appending);
                (None, Type::Unknown, fields)
            }
            other => {
                tracing::warn!("access paths cannot be rooted in {}", other);
                return None;
            }
        };

        if cut_first_field && !fields.is_empty() {
            fields.remove(0);
            // Cutting the static field itself leaves no root
            if value.is_none() && fields.is_empty() {
                return None;
            }
        }

        let mut cut_off_approximation = false;
        if fields.len() > self.access_path_length {
            fields.truncate(self.access_path_length);
            taint_sub_fields = true;
            cut_off_approximation = true;
        }

        if !fields.is_empty() {
            if base_type.is_primitive() {
                tracing::debug!("primitive base {} cannot have fields", base_type);
                return None;
            }
            if value.as_ref().map(|v| v.ty.is_primitive_array()).unwrap_or(false) {
                return None;
            }
        }

        let denoted = fields.last().map(|f| &f.ty).unwrap_or(&base_type);
        let array_taint_type = if denoted.is_array() {
            match array_taint_type {
                ArrayTaintType::None => ArrayTaintType::ContentsAndLength,
                other => other,
            }
        } else {
            ArrayTaintType::None
        };

        Some(AccessPath {
            value,
            base_type,
            fields,
            taint_sub_fields,
            cut_off_approximation,
            array_taint_type,
            can_have_immutable_aliases,
        })
    }

    /// Same path rooted at a different value (the fields move along)
    pub fn copy_with_new_value(
        &self,
        original: &AccessPath,
        val: &Value,
        new_type: Option<Type>,
        cut_first_field: bool,
    ) -> Option<AccessPath> {
        self.copy_with_new_value_array(
            original,
            val,
            new_type,
            cut_first_field,
            original.array_taint_type,
        )
    }

    pub fn copy_with_new_value_array(
        &self,
        original: &AccessPath,
        val: &Value,
        new_type: Option<Type>,
        cut_first_field: bool,
        array_taint_type: ArrayTaintType,
    ) -> Option<AccessPath> {
        if let (Some(plain), Value::Local(local)) = (original.plain_value(), val) {
            let same_type = new_type.as_ref().map(|t| *t == original.base_type).unwrap_or(true);
            if plain == local
                && same_type
                && !cut_first_field
                && original.array_taint_type == array_taint_type
            {
                return Some(original.clone());
            }
        }

        let created = self.create(
            val,
            new_type,
            &original.fields,
            original.taint_sub_fields,
            cut_first_field,
            array_taint_type,
            original.can_have_immutable_aliases,
        )?;
        if created == *original {
            return Some(original.clone());
        }
        Some(created)
    }

    /// Path on the same root with a different array taint dimension
    pub fn with_array_taint_type(
        &self,
        original: &AccessPath,
        array_taint_type: ArrayTaintType,
    ) -> AccessPath {
        let mut ap = original.clone();
        if ap.last_type().is_array() {
            ap.array_taint_type = array_taint_type;
        }
        ap
    }
}

/// The more specific of a requested type and a declared type
fn more_precise(requested: Option<&Type>, declared: &Type) -> Type {
    match requested {
        None => declared.clone(),
        Some(req) if *req == Type::Unknown => declared.clone(),
        Some(Type::Ref(name)) if name == OBJECT_CLASS && declared.is_reference() => {
            declared.clone()
        }
        Some(req) => req.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InfoflowConfig, StaticFieldTrackingMode};

    fn factory() -> AccessPathFactory {
        AccessPathFactory::new(&InfoflowConfig {
            access_path_length: 2,
            ..Default::default()
        })
    }

    fn obj(name: &str) -> Local {
        Local::new(name, Type::class("Data"))
    }

    fn field(name: &str) -> Field {
        Field::instance("Data", name, Type::class("Data"))
    }

    #[test]
    fn test_local_path() {
        let ap = factory()
            .create_access_path(&Value::local(&obj("x")), false)
            .unwrap();
        assert!(ap.is_local());
        assert!(!ap.is_field_ref());
        assert_eq!(ap.array_taint_type(), ArrayTaintType::None);
    }

    #[test]
    fn test_field_chain_is_cut_at_bound() {
        let f = factory();
        let ap = f
            .create_access_path_appending(
                &Value::field(&obj("x"), &field("a")),
                &[field("b"), field("c")],
                false,
            )
            .unwrap();
        assert_eq!(ap.field_count(), 2);
        assert!(ap.taint_sub_fields());
        assert!(ap.is_cut_off_approximation());
        assert_eq!(ap.to_string(), "x.a.b *");
    }

    #[test]
    fn test_copy_with_new_value_cuts_first_field() {
        let f = factory();
        let ap = f
            .create_access_path(&Value::field(&obj("x"), &field("a")), false)
            .unwrap();
        let moved = f
            .copy_with_new_value(&ap, &Value::local(&obj("y")), None, true)
            .unwrap();
        assert!(moved.is_local());
        assert_eq!(moved.plain_value().unwrap().name, "y");
    }

    #[test]
    fn test_copy_to_field_prepends() {
        let f = factory();
        let ap = f.create_access_path(&Value::local(&obj("y")), false).unwrap();
        let moved = f
            .copy_with_new_value(&ap, &Value::field(&obj("x"), &field("a")), None, false)
            .unwrap();
        assert!(moved.first_field_matches(&field("a")));
    }

    #[test]
    fn test_array_paths_default_to_contents_and_length() {
        let a = Local::new("a", Type::array_of(Type::Int));
        let ap = factory().create_access_path(&Value::local(&a), false).unwrap();
        assert_eq!(ap.array_taint_type(), ArrayTaintType::ContentsAndLength);

        let len = factory().with_array_taint_type(&ap, ArrayTaintType::Length);
        assert_ne!(len, ap);
        assert_eq!(len.to_string(), "a <length>");
    }

    #[test]
    fn test_primitive_base_cannot_have_fields() {
        let i = Local::new("i", Type::Int);
        let ap = factory().create_access_path_appending(&Value::local(&i), &[field("a")], false);
        assert!(ap.is_none());
    }

    #[test]
    fn test_static_paths_respect_tracking_mode() {
        let sf = Field::static_field("Config", "KEY", Type::string());
        assert!(factory()
            .create_access_path(&Value::static_field(&sf), false)
            .unwrap()
            .is_static_field_ref());

        let off = AccessPathFactory::new(&InfoflowConfig {
            static_field_tracking_mode: StaticFieldTrackingMode::None,
            ..Default::default()
        });
        assert!(off
            .create_access_path(&Value::static_field(&sf), false)
            .is_none());
    }

    #[test]
    fn test_equality_ignores_base_type() {
        let f = factory();
        let x = obj("x");
        let a = f
            .create_access_path_typed(&Value::local(&x), Some(Type::class("Sub")), false, ArrayTaintType::None)
            .unwrap();
        let b = f.create_access_path(&Value::local(&x), false).unwrap();
        assert_eq!(a, b);
        assert_ne!(a.base_type(), b.base_type());
    }

    #[test]
    fn test_zero_and_empty() {
        assert!(AccessPath::zero().is_zero());
        assert!(AccessPath::empty().is_empty());
        assert!(!AccessPath::empty().is_zero());
    }
}
