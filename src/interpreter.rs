use anyhow::Result;

use crate::backend::{Backend, PreparedBackend};
use crate::expression::{BinaryOperator, ExprId, ExpressionError, ExpressionTree, ExpressionVisitor};
use crate::value::{ArithmeticError, Value, ValueType, Word64};

mod error;

pub use error::{EvalError, EvalResult};

/// Evaluates the expression rooted at `root` against `args`.
///
/// Children are evaluated before their parent, left before right. A node
/// reached through several parents is evaluated once per path.
pub fn evaluate(tree: &ExpressionTree, root: ExprId, args: &[Word64]) -> EvalResult<Word64> {
    Ok(evaluate_value(tree, root, args)?.to_word())
}

/// Same as [`evaluate`], with the result read according to the root type.
///
/// Every argument slot the expression reads is checked before evaluation
/// starts, so a short `args` is reported ahead of any arithmetic fault.
pub fn evaluate_value(tree: &ExpressionTree, root: ExprId, args: &[Word64]) -> EvalResult<Value> {
    match tree.highest_argument(root)? {
        Some(index) if index >= args.len() => Err(EvalError::ArgumentOutOfRange {
            index,
            len: args.len(),
        }),
        _ => tree.walk(root, &mut Evaluator { args }),
    }
}

struct Evaluator<'a> {
    args: &'a [Word64],
}

impl ExpressionVisitor for Evaluator<'_> {
    type Output = Value;
    type Error = EvalError;

    fn constant(&mut self, ty: ValueType, word: Word64) -> EvalResult<Value> {
        Ok(Value::from_word(ty, word))
    }

    fn argument(&mut self, ty: ValueType, index: usize) -> EvalResult<Value> {
        let word = self.args.get(index).ok_or(EvalError::ArgumentOutOfRange {
            index,
            len: self.args.len(),
        })?;
        Ok(Value::from_word(ty, *word))
    }

    fn cast(&mut self, _from: ValueType, to: ValueType, child: Value) -> EvalResult<Value> {
        Ok(child.cast(to))
    }

    fn binary(
        &mut self,
        _ty: ValueType,
        op: BinaryOperator,
        left: Value,
        right: Value,
    ) -> EvalResult<Value> {
        apply_binary(op, left, right)
    }
}

fn apply_binary(op: BinaryOperator, left: Value, right: Value) -> EvalResult<Value> {
    match (left, right) {
        (Value::Int64(lhs), Value::Int64(rhs)) => Ok(Value::Int64(int_binary(op, lhs, rhs)?)),
        (Value::Double(lhs), Value::Double(rhs)) => Ok(Value::Double(double_binary(op, lhs, rhs))),
        (left, right) => Err(ExpressionError::TypeMismatch {
            operator: op,
            left: left.value_type(),
            right: right.value_type(),
        }
        .into()),
    }
}

/// Two's-complement arithmetic. Add, sub and mul wrap like the native
/// instructions; division truncates toward zero and reports the two inputs
/// a native `sdiv` would trap on.
fn int_binary(op: BinaryOperator, lhs: i64, rhs: i64) -> Result<i64, ArithmeticError> {
    match op {
        BinaryOperator::Add => Ok(lhs.wrapping_add(rhs)),
        BinaryOperator::Sub => Ok(lhs.wrapping_sub(rhs)),
        BinaryOperator::Mul => Ok(lhs.wrapping_mul(rhs)),
        BinaryOperator::Div => {
            if rhs == 0 {
                return Err(ArithmeticError::DivisionByZero);
            }
            lhs.checked_div(rhs).ok_or(ArithmeticError::DivisionOverflow)
        }
    }
}

fn double_binary(op: BinaryOperator, lhs: f64, rhs: f64) -> f64 {
    match op {
        BinaryOperator::Add => lhs + rhs,
        BinaryOperator::Sub => lhs - rhs,
        BinaryOperator::Mul => lhs * rhs,
        BinaryOperator::Div => lhs / rhs,
    }
}

/// Tree-walking backend that evaluates expressions without compilation.
pub struct Interpreter;

impl Interpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// An expression bound to the interpreter, borrowing its tree.
pub struct PreparedInterpreter<'a> {
    tree: &'a ExpressionTree,
    root: ExprId,
    result_type: ValueType,
}

impl PreparedBackend for PreparedInterpreter<'_> {
    fn result_type(&self) -> ValueType {
        self.result_type
    }

    fn run(&self, args: &[Word64]) -> Result<Word64> {
        Ok(evaluate(self.tree, self.root, args)?)
    }
}

impl Backend for Interpreter {
    fn name(&self) -> &'static str {
        "interpreter"
    }

    fn prepare<'a>(
        &self,
        tree: &'a ExpressionTree,
        root: ExprId,
    ) -> Result<Box<dyn PreparedBackend + 'a>> {
        let result_type = tree.value_type(root)?;
        Ok(Box::new(PreparedInterpreter {
            tree,
            root,
            result_type,
        }))
    }
}
