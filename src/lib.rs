pub mod backend;
pub mod expression;
pub mod fixtures;
pub mod interpreter;
pub mod jit;
pub mod value;

#[cfg(test)]
mod harness;

pub use expression::{
    BinaryOperator, ExprId, ExpressionError, ExpressionKind, ExpressionTree, ExpressionVisitor,
};
pub use value::{ArithmeticError, Value, ValueType, Word64};
