use cranelift_module::ModuleError;
use thiserror::Error;

use crate::expression::ExpressionError;
use crate::value::ArithmeticError;

/// Errors produced while compiling or running a JIT-compiled expression.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("Expression compiler already consumed its module; compile may only be called once")]
    AlreadyCompiled,
    #[error("Expression has not been compiled")]
    NotCompiled,
    #[error("Argument index out of bounds: index {index}, len {len}")]
    ArgumentOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Arithmetic(#[from] ArithmeticError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("Invalid compiler option {name}='{value}'")]
    InvalidOption { name: &'static str, value: String },
    #[error("Host target is not supported: {0}")]
    Isa(String),
    #[error(transparent)]
    Module(#[from] ModuleError),
}

pub type JitResult<T> = Result<T, JitError>;
