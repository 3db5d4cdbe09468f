use thiserror::Error;

use crate::value::ValueType;

use super::BinaryOperator;

/// Errors raised while building or walking an [`super::ExpressionTree`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionError {
    #[error("Type mismatch for '{operator}': left operand is {left}, right operand is {right}")]
    TypeMismatch {
        operator: BinaryOperator,
        left: ValueType,
        right: ValueType,
    },
    #[error("Unknown expression node {id}, tree has {len} nodes")]
    UnknownNode { id: usize, len: usize },
}

pub type ExpressionResult<T> = Result<T, ExpressionError>;
