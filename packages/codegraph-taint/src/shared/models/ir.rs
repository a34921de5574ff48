//! Statement-level IR
//!
//! A three-address representation of object-oriented method bodies. Every
//! operand of a compound value is an immediate (a local or a constant), so
//! the taint rules only ever look one level deep.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Statement identifier (unique within a program)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StmtId(pub u32);

/// Method identifier (unique within a program)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodId(pub u32);

impl StmtId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl MethodId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

// ============================================================================
// Types
// ============================================================================

pub const STRING_CLASS: &str = "java.lang.String";
pub const OBJECT_CLASS: &str = "java.lang.Object";
pub const THROWABLE_CLASS: &str = "java.lang.Throwable";

/// Value type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    /// Type of the `null` constant
    Null,
    /// Class or interface type
    Ref(String),
    /// Array of the element type
    Array(Box<Type>),
    /// Type not known (e.g. base of a static access path)
    Unknown,
}

impl Type {
    pub fn class(name: impl Into<String>) -> Self {
        Type::Ref(name.into())
    }

    pub fn string() -> Self {
        Type::Ref(STRING_CLASS.to_string())
    }

    pub fn object() -> Self {
        Type::Ref(OBJECT_CLASS.to_string())
    }

    pub fn array_of(element: Type) -> Self {
        Type::Array(Box::new(element))
    }

    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Boolean
                | Type::Byte
                | Type::Char
                | Type::Short
                | Type::Int
                | Type::Long
                | Type::Float
                | Type::Double
        )
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Ref(name) if name == STRING_CLASS)
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    /// Class, array and null types
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::Ref(_) | Type::Array(_) | Type::Null)
    }

    pub fn element_type(&self) -> Option<&Type> {
        match self {
            Type::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Innermost non-array type
    pub fn array_base(&self) -> &Type {
        match self {
            Type::Array(elem) => elem.array_base(),
            other => other,
        }
    }

    /// Array of primitives, at any dimension
    pub fn is_primitive_array(&self) -> bool {
        self.is_array() && self.array_base().is_primitive()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Boolean => write!(f, "boolean"),
            Type::Byte => write!(f, "byte"),
            Type::Char => write!(f, "char"),
            Type::Short => write!(f, "short"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null_type"),
            Type::Ref(name) => write!(f, "{}", name),
            Type::Array(elem) => write!(f, "{}[]", elem),
            Type::Unknown => write!(f, "unknown"),
        }
    }
}

// ============================================================================
// Locals, fields, constants
// ============================================================================

/// Method-local variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Local {
    pub name: String,
    pub ty: Type,
}

impl Local {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Field declared on a class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub declaring_class: String,
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
}

impl Field {
    pub fn instance(declaring_class: impl Into<String>, name: impl Into<String>, ty: Type) -> Self {
        Self {
            declaring_class: declaring_class.into(),
            name: name.into(),
            ty,
            is_static: false,
        }
    }

    pub fn static_field(
        declaring_class: impl Into<String>,
        name: impl Into<String>,
        ty: Type,
    ) -> Self {
        Self {
            is_static: true,
            ..Self::instance(declaring_class, name, ty)
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {} {}>", self.declaring_class, self.ty, self.name)
    }
}

/// Literal constant
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Int(i64),
    Long(i64),
    Str(String),
    Null,
    /// Class literal (`Foo.class`)
    Class(String),
}

impl Constant {
    pub fn ty(&self) -> Type {
        match self {
            Constant::Int(_) => Type::Int,
            Constant::Long(_) => Type::Long,
            Constant::Str(_) => Type::string(),
            Constant::Null => Type::Null,
            Constant::Class(_) => Type::class("java.lang.Class"),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int(v) => write!(f, "{}", v),
            Constant::Long(v) => write!(f, "{}L", v),
            Constant::Str(s) => write!(f, "\"{}\"", s),
            Constant::Null => write!(f, "null"),
            Constant::Class(c) => write!(f, "class \"{}\"", c),
        }
    }
}

// ============================================================================
// Methods and calls
// ============================================================================

pub const CONSTRUCTOR_NAME: &str = "<init>";
pub const STATIC_INITIALIZER_NAME: &str = "<clinit>";

/// Method signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodSig {
    pub class: String,
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

impl MethodSig {
    pub fn new(
        class: impl Into<String>,
        name: impl Into<String>,
        params: Vec<Type>,
        ret: Type,
    ) -> Self {
        Self {
            class: class.into(),
            name: name.into(),
            params,
            ret,
        }
    }

    /// `ret name(params)`, used for virtual dispatch
    pub fn sub_signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.to_string()).collect();
        format!("{} {}({})", self.ret, self.name, params.join(","))
    }

    pub fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR_NAME
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER_NAME
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {}>", self.class, self.sub_signature())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

/// Method invocation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvokeExpr {
    pub kind: InvokeKind,
    /// Receiver, absent for static calls
    pub base: Option<Local>,
    pub method: MethodSig,
    pub args: Vec<Value>,
}

impl InvokeExpr {
    pub fn static_call(method: MethodSig, args: Vec<Value>) -> Self {
        Self {
            kind: InvokeKind::Static,
            base: None,
            method,
            args,
        }
    }

    pub fn virtual_call(base: &Local, method: MethodSig, args: Vec<Value>) -> Self {
        Self {
            kind: InvokeKind::Virtual,
            base: Some(base.clone()),
            method,
            args,
        }
    }

    pub fn special_call(base: &Local, method: MethodSig, args: Vec<Value>) -> Self {
        Self {
            kind: InvokeKind::Special,
            base: Some(base.clone()),
            method,
            args,
        }
    }

    pub fn is_static(&self) -> bool {
        self.kind == InvokeKind::Static
    }

    pub fn arg_count(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for InvokeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
        match &self.base {
            Some(base) => write!(f, "{}.{}({})", base, self.method.name, args.join(", ")),
            None => write!(f, "{}({})", self.method.name, args.join(", ")),
        }
    }
}

// ============================================================================
// Values
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Cmp,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOperator {
    fn symbol(&self) -> &'static str {
        match self {
            BinOperator::Add => "+",
            BinOperator::Sub => "-",
            BinOperator::Mul => "*",
            BinOperator::Div => "/",
            BinOperator::Rem => "%",
            BinOperator::And => "&",
            BinOperator::Or => "|",
            BinOperator::Xor => "^",
            BinOperator::Shl => "<<",
            BinOperator::Shr => ">>",
            BinOperator::Cmp => "cmp",
            BinOperator::Eq => "==",
            BinOperator::Ne => "!=",
            BinOperator::Lt => "<",
            BinOperator::Le => "<=",
            BinOperator::Gt => ">",
            BinOperator::Ge => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOperator::Eq
                | BinOperator::Ne
                | BinOperator::Lt
                | BinOperator::Le
                | BinOperator::Gt
                | BinOperator::Ge
        )
    }
}

/// Operand or right-hand side expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Local(Local),
    Constant(Constant),
    InstanceField { base: Local, field: Field },
    StaticField(Field),
    ArrayRef { base: Local, index: Box<Value> },
    Length(Box<Value>),
    New(Type),
    NewArray { element: Type, size: Box<Value> },
    Invoke(InvokeExpr),
    BinOp {
        op: BinOperator,
        left: Box<Value>,
        right: Box<Value>,
        ty: Type,
    },
    Neg(Box<Value>),
    Cast { ty: Type, op: Box<Value> },
    InstanceOf { check: Type, op: Box<Value> },
    CaughtException(Type),
    ParameterRef { index: usize, ty: Type },
    ThisRef(Type),
}

impl Value {
    pub fn local(local: &Local) -> Self {
        Value::Local(local.clone())
    }

    pub fn int(v: i64) -> Self {
        Value::Constant(Constant::Int(v))
    }

    pub fn str(s: impl Into<String>) -> Self {
        Value::Constant(Constant::Str(s.into()))
    }

    pub fn null() -> Self {
        Value::Constant(Constant::Null)
    }

    pub fn field(base: &Local, field: &Field) -> Self {
        Value::InstanceField {
            base: base.clone(),
            field: field.clone(),
        }
    }

    pub fn static_field(field: &Field) -> Self {
        Value::StaticField(field.clone())
    }

    pub fn array_ref(base: &Local, index: Value) -> Self {
        Value::ArrayRef {
            base: base.clone(),
            index: Box::new(index),
        }
    }

    pub fn length(array: &Local) -> Self {
        Value::Length(Box::new(Value::local(array)))
    }

    pub fn new_array(element: Type, size: Value) -> Self {
        Value::NewArray {
            element,
            size: Box::new(size),
        }
    }

    pub fn binop(op: BinOperator, left: Value, right: Value) -> Self {
        let ty = if op.is_comparison() || op == BinOperator::Cmp {
            Type::Int
        } else {
            left.ty()
        };
        Value::BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        }
    }

    pub fn cast(ty: Type, op: Value) -> Self {
        Value::Cast {
            ty,
            op: Box::new(op),
        }
    }

    pub fn instance_of(check: Type, op: Value) -> Self {
        Value::InstanceOf {
            check,
            op: Box::new(op),
        }
    }

    pub fn static_call(method: MethodSig, args: Vec<Value>) -> Self {
        Value::Invoke(InvokeExpr::static_call(method, args))
    }

    pub fn virtual_call(base: &Local, method: MethodSig, args: Vec<Value>) -> Self {
        Value::Invoke(InvokeExpr::virtual_call(base, method, args))
    }

    pub fn special_call(base: &Local, method: MethodSig, args: Vec<Value>) -> Self {
        Value::Invoke(InvokeExpr::special_call(base, method, args))
    }

    /// Static type of the value
    pub fn ty(&self) -> Type {
        match self {
            Value::Local(l) => l.ty.clone(),
            Value::Constant(c) => c.ty(),
            Value::InstanceField { field, .. } | Value::StaticField(field) => field.ty.clone(),
            Value::ArrayRef { base, .. } => base.ty.element_type().cloned().unwrap_or(Type::Unknown),
            Value::Length(_) => Type::Int,
            Value::New(ty) => ty.clone(),
            Value::NewArray { element, .. } => Type::array_of(element.clone()),
            Value::Invoke(inv) => inv.method.ret.clone(),
            Value::BinOp { ty, .. } => ty.clone(),
            Value::Neg(op) => op.ty(),
            Value::Cast { ty, .. } => ty.clone(),
            Value::InstanceOf { .. } => Type::Boolean,
            Value::CaughtException(ty) => ty.clone(),
            Value::ParameterRef { ty, .. } => ty.clone(),
            Value::ThisRef(ty) => ty.clone(),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Value::Constant(_))
    }

    pub fn as_local(&self) -> Option<&Local> {
        match self {
            Value::Local(l) => Some(l),
            _ => None,
        }
    }

    /// Base local of a local, instance field or array reference
    pub fn base_local(&self) -> Option<&Local> {
        match self {
            Value::Local(l) => Some(l),
            Value::InstanceField { base, .. } | Value::ArrayRef { base, .. } => Some(base),
            _ => None,
        }
    }

    pub fn is_field_ref(&self) -> bool {
        matches!(self, Value::InstanceField { .. } | Value::StaticField(_))
    }

    /// Values read directly by this value, innermost operands included
    pub fn uses(&self) -> Vec<Value> {
        let mut out = Vec::new();
        self.collect_uses(&mut out);
        out
    }

    fn collect_uses(&self, out: &mut Vec<Value>) {
        let push = |v: &Value, out: &mut Vec<Value>| {
            out.push(v.clone());
            v.collect_uses(out);
        };
        match self {
            Value::InstanceField { base, .. } => out.push(Value::Local(base.clone())),
            Value::ArrayRef { base, index } => {
                out.push(Value::Local(base.clone()));
                push(index, out);
            }
            Value::Length(op) | Value::Neg(op) => push(op, out),
            Value::Cast { op, .. } | Value::InstanceOf { op, .. } => push(op, out),
            Value::NewArray { size, .. } => push(size, out),
            Value::BinOp { left, right, .. } => {
                push(left, out);
                push(right, out);
            }
            Value::Invoke(inv) => {
                if let Some(base) = &inv.base {
                    out.push(Value::Local(base.clone()));
                }
                for arg in &inv.args {
                    push(arg, out);
                }
            }
            _ => {}
        }
    }
}

impl From<Local> for Value {
    fn from(local: Local) -> Self {
        Value::Local(local)
    }
}

impl From<&Local> for Value {
    fn from(local: &Local) -> Self {
        Value::Local(local.clone())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(l) => write!(f, "{}", l),
            Value::Constant(c) => write!(f, "{}", c),
            Value::InstanceField { base, field } => write!(f, "{}.{}", base, field.name),
            Value::StaticField(field) => write!(f, "{}.{}", field.declaring_class, field.name),
            Value::ArrayRef { base, index } => write!(f, "{}[{}]", base, index),
            Value::Length(op) => write!(f, "lengthof {}", op),
            Value::New(ty) => write!(f, "new {}", ty),
            Value::NewArray { element, size } => write!(f, "newarray ({})[{}]", element, size),
            Value::Invoke(inv) => write!(f, "{}", inv),
            Value::BinOp {
                op, left, right, ..
            } => write!(f, "{} {} {}", left, op.symbol(), right),
            Value::Neg(op) => write!(f, "neg {}", op),
            Value::Cast { ty, op } => write!(f, "({}) {}", ty, op),
            Value::InstanceOf { check, op } => write!(f, "{} instanceof {}", op, check),
            Value::CaughtException(_) => write!(f, "@caughtexception"),
            Value::ParameterRef { index, ty } => write!(f, "@parameter{}: {}", index, ty),
            Value::ThisRef(ty) => write!(f, "@this: {}", ty),
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    Assign { left: Value, right: Value },
    /// Binds a parameter, `this`, or the caught exception
    Identity { left: Local, right: Value },
    If { condition: Value },
    Switch { key: Value },
    Goto,
    Invoke(InvokeExpr),
    Return(Option<Value>),
    Throw(Value),
    Nop,
}

/// Statement inside a method body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub id: StmtId,
    pub method: MethodId,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn invoke_expr(&self) -> Option<&InvokeExpr> {
        match &self.kind {
            StmtKind::Invoke(inv) => Some(inv),
            StmtKind::Assign {
                right: Value::Invoke(inv),
                ..
            } => Some(inv),
            _ => None,
        }
    }

    pub fn contains_invoke(&self) -> bool {
        self.invoke_expr().is_some()
    }

    /// Left operand of an assignment or identity statement
    pub fn left_op(&self) -> Option<Value> {
        match &self.kind {
            StmtKind::Assign { left, .. } => Some(left.clone()),
            StmtKind::Identity { left, .. } => Some(Value::Local(left.clone())),
            _ => None,
        }
    }

    pub fn right_op(&self) -> Option<&Value> {
        match &self.kind {
            StmtKind::Assign { right, .. } | StmtKind::Identity { right, .. } => Some(right),
            _ => None,
        }
    }

    /// If or switch
    pub fn is_branching(&self) -> bool {
        matches!(self.kind, StmtKind::If { .. } | StmtKind::Switch { .. })
    }

    /// Branch condition or switch key
    pub fn condition(&self) -> Option<&Value> {
        match &self.kind {
            StmtKind::If { condition } => Some(condition),
            StmtKind::Switch { key } => Some(key),
            _ => None,
        }
    }

    pub fn is_caught_exception_binding(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Identity {
                right: Value::CaughtException(_),
                ..
            }
        )
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StmtKind::Assign { left, right } => write!(f, "{} = {}", left, right),
            StmtKind::Identity { left, right } => write!(f, "{} := {}", left, right),
            StmtKind::If { condition } => write!(f, "if {}", condition),
            StmtKind::Switch { key } => write!(f, "switch({})", key),
            StmtKind::Goto => write!(f, "goto"),
            StmtKind::Invoke(inv) => write!(f, "{}", inv),
            StmtKind::Return(Some(v)) => write!(f, "return {}", v),
            StmtKind::Return(None) => write!(f, "return"),
            StmtKind::Throw(v) => write!(f, "throw {}", v),
            StmtKind::Nop => write!(f, "nop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_classification() {
        assert!(Type::Int.is_primitive());
        assert!(Type::string().is_string());
        assert!(!Type::string().is_primitive());
        assert!(Type::array_of(Type::array_of(Type::Int)).is_primitive_array());
        assert_eq!(Type::array_of(Type::Int).to_string(), "int[]");
    }

    #[test]
    fn test_method_sig_display() {
        let sig = MethodSig::new("Main", "sink", vec![Type::string()], Type::Void);
        assert_eq!(sig.to_string(), "<Main: void sink(java.lang.String)>");
        assert_eq!(sig.sub_signature(), "void sink(java.lang.String)");
    }

    #[test]
    fn test_uses_of_condition() {
        let z = Local::new("$z0", Type::Boolean);
        let cond = Value::binop(BinOperator::Eq, Value::local(&z), Value::int(0));
        let uses = cond.uses();
        assert_eq!(uses, vec![Value::local(&z), Value::int(0)]);
    }

    #[test]
    fn test_array_ref_type() {
        let a = Local::new("a", Type::array_of(Type::string()));
        assert_eq!(Value::array_ref(&a, Value::int(0)).ty(), Type::string());
        assert_eq!(Value::length(&a).ty(), Type::Int);
    }
}
