//! Operand selection for compound right-hand sides
//!
//! Every compound value wraps immediates, so the value a taint moves to is
//! found by peeling at most one layer.

use crate::shared::models::Value;

/// Operand carrying the taint of `val`
///
/// Array references are reduced to their array unless `keep_array_ref` is
/// set.
pub fn select_base(val: &Value, keep_array_ref: bool) -> Value {
    match val {
        Value::ArrayRef { base, .. } if !keep_array_ref => Value::Local(base.clone()),
        Value::Cast { op, .. }
        | Value::InstanceOf { op, .. }
        | Value::Length(op)
        | Value::Neg(op) => (**op).clone(),
        Value::NewArray { size, .. } => (**size).clone(),
        other => other.clone(),
    }
}

/// Like [`select_base`], with both operands of a binary operation
pub fn select_base_list(val: &Value, keep_array_ref: bool) -> Vec<Value> {
    match val {
        Value::BinOp { left, right, .. } => {
            if left == right {
                vec![(**left).clone()]
            } else {
                vec![(**left).clone(), (**right).clone()]
            }
        }
        other => vec![select_base(other, keep_array_ref)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::models::{BinOperator, Local, Type};

    #[test]
    fn test_select_base() {
        let a = Local::new("a", Type::array_of(Type::Int));
        let i = Local::new("i", Type::Int);
        let aref = Value::array_ref(&a, Value::local(&i));
        assert_eq!(select_base(&aref, false), Value::local(&a));
        assert_eq!(select_base(&aref, true), aref);
        assert_eq!(select_base(&Value::length(&a), true), Value::local(&a));
        assert_eq!(
            select_base(&Value::cast(Type::Long, Value::local(&i)), true),
            Value::local(&i)
        );
    }

    #[test]
    fn test_select_base_list_of_binop() {
        let x = Local::new("x", Type::Int);
        let sum = Value::binop(BinOperator::Add, Value::local(&x), Value::int(1));
        assert_eq!(select_base_list(&sum, false), vec![Value::local(&x), Value::int(1)]);
        let twice = Value::binop(BinOperator::Add, Value::local(&x), Value::local(&x));
        assert_eq!(select_base_list(&twice, false).len(), 1);
    }
}
