use thiserror::Error;

use crate::expression::ExpressionError;
use crate::value::ArithmeticError;

/// Typed errors produced by the tree-walking interpreter backend.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EvalError {
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error("Argument index out of bounds: index {index}, len {len}")]
    ArgumentOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

pub type EvalResult<T> = Result<T, EvalError>;
