use anyhow::Result;

use crate::expression::{ExprId, ExpressionTree};
use crate::value::{Value, ValueType, Word64};

pub use crate::interpreter;
pub use crate::jit;

/// Executable artifact produced by a backend `prepare` step.
///
/// This keeps compilation and execution separated so benchmarks and tests can
/// measure/validate prepare-vs-run phases independently.
pub trait PreparedBackend {
    /// Declared type of the root, used to read result words.
    fn result_type(&self) -> ValueType;

    fn run(&self, args: &[Word64]) -> Result<Word64>;

    fn run_value(&self, args: &[Word64]) -> Result<Value> {
        Ok(Value::from_word(self.result_type(), self.run(args)?))
    }
}

/// Common interface implemented by each execution backend.
///
/// `prepare` binds an expression to backend-owned executable state, while `run`
/// offers the convenience path for one-shot execution.
pub trait Backend {
    fn name(&self) -> &'static str;

    fn prepare<'a>(
        &self,
        tree: &'a ExpressionTree,
        root: ExprId,
    ) -> Result<Box<dyn PreparedBackend + 'a>>;

    fn run(&self, tree: &ExpressionTree, root: ExprId, args: &[Word64]) -> Result<Word64> {
        self.prepare(tree, root)?.run(args)
    }
}

pub fn backends() -> Vec<Box<dyn Backend>> {
    vec![
        Box::new(crate::interpreter::Interpreter::new()),
        Box::new(crate::jit::JIT::new()),
    ]
}
