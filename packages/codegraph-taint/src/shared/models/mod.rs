//! Shared models
//!
//! The statement-level IR consumed by the taint analysis.

pub mod ir;
pub mod program;

pub use ir::{
    BinOperator, Constant, Field, InvokeExpr, InvokeKind, Local, MethodId, MethodSig, Stmt,
    StmtId, StmtKind, Type, Value, CONSTRUCTOR_NAME, OBJECT_CLASS, STATIC_INITIALIZER_NAME,
    STRING_CLASS, THROWABLE_CLASS,
};
pub use program::{Body, ClassInfo, Method, MethodBuilder, Program, ProgramBuilder, StmtHandle};
