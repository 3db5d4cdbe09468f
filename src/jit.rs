//! Cranelift backend.
//!
//! An [`ExpressionCompiler`] owns one `JITModule`. `compile` lowers an
//! expression into a single native function with the signature
//!
//! ```ignore
//! unsafe extern "C" fn(args: *const Word64) -> Word64
//! ```
//!
//! hands the module to the JIT for finalization and keeps the resulting
//! [`CompiledExpression`]. The module is consumed by the first `compile`.

use anyhow::Result;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_jit::{JITBuilder, JITModule};

use crate::backend::{Backend, PreparedBackend};
use crate::expression::{ExprId, ExpressionTree};
use crate::value::{Value, ValueType, Word64};

mod codegen;
mod error;
mod options;
mod runtime;

pub use error::{JitError, JitResult};
pub use options::{CompilerOptions, OPT_LEVEL_ENV, OptLevel, VERIFY_ENV};

use runtime::EntryFunction;

/// Binds one expression tree to one generated function.
///
/// Compiling is one-shot: the code module moves into the JIT on the first
/// call to [`ExpressionCompiler::compile`], whether or not that call succeeds.
pub struct ExpressionCompiler {
    module: Option<JITModule>,
    compiled: Option<CompiledExpression>,
}

impl ExpressionCompiler {
    pub fn new(options: CompilerOptions) -> JitResult<Self> {
        Ok(Self {
            module: Some(new_module(options)?),
            compiled: None,
        })
    }

    /// Generates, lowers and links the function for `root`.
    ///
    /// With `verbose` the Cranelift IR is logged at debug level and kept for
    /// [`CompiledExpression::ir`].
    #[tracing::instrument(skip(self, tree), fields(nodes = tree.len()))]
    pub fn compile(&mut self, tree: &ExpressionTree, root: ExprId, verbose: bool) -> JitResult<()> {
        let module = self.module.take().ok_or(JitError::AlreadyCompiled)?;
        let compiled = codegen::compile_module(module, tree, root, verbose)?;
        tracing::debug!(
            arity = compiled.arity(),
            result_type = %compiled.result_type,
            "compiled expression"
        );
        self.compiled = Some(compiled);
        Ok(())
    }

    pub fn run(&self, args: &[Word64]) -> JitResult<Word64> {
        self.compiled()?.run(args)
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    pub fn compiled(&self) -> JitResult<&CompiledExpression> {
        self.compiled.as_ref().ok_or(JitError::NotCompiled)
    }

    pub fn into_compiled(self) -> JitResult<CompiledExpression> {
        self.compiled.ok_or(JitError::NotCompiled)
    }
}

/// Compiles `root` with a fresh [`ExpressionCompiler`] and takes the result.
pub fn compile(
    tree: &ExpressionTree,
    root: ExprId,
    options: CompilerOptions,
) -> JitResult<CompiledExpression> {
    let mut compiler = ExpressionCompiler::new(options)?;
    compiler.compile(tree, root, false)?;
    compiler.into_compiled()
}

fn new_module(options: CompilerOptions) -> JitResult<JITModule> {
    let mut flag_builder = settings::builder();
    let flags = [
        ("use_colocated_libcalls", "false"),
        ("is_pic", "false"),
        ("opt_level", options.opt_level.as_setting()),
        ("enable_verifier", if options.verify { "true" } else { "false" }),
    ];
    for (name, value) in flags {
        flag_builder
            .set(name, value)
            .map_err(|err| JitError::Isa(format!("{name}={value}: {err}")))?;
    }

    let isa_builder = cranelift_native::builder().map_err(|err| JitError::Isa(err.to_string()))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|err| JitError::Isa(err.to_string()))?;

    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    runtime::register_runtime_symbols(&mut builder);
    Ok(JITModule::new(builder))
}

/// A finalized expression function and the JIT memory backing it.
pub struct CompiledExpression {
    module: Option<JITModule>,
    entry: EntryFunction,
    highest_argument: Option<usize>,
    result_type: ValueType,
    ir: Option<String>,
}

impl CompiledExpression {
    fn new(
        module: JITModule,
        entry: EntryFunction,
        highest_argument: Option<usize>,
        result_type: ValueType,
        ir: Option<String>,
    ) -> Self {
        Self {
            module: Some(module),
            entry,
            highest_argument,
            result_type,
            ir,
        }
    }

    /// Calls the compiled function on `args`.
    ///
    /// `args` must cover every argument slot the expression reads; integer
    /// division faults raised by the generated code are returned as errors.
    pub fn run(&self, args: &[Word64]) -> JitResult<Word64> {
        if let Some(index) = self.highest_argument.filter(|&index| index >= args.len()) {
            return Err(JitError::ArgumentOutOfRange {
                index,
                len: args.len(),
            });
        }
        runtime::clear_trap();
        // SAFETY: the module owning the code lives as long as `self`, and every
        // load the function performs reads a slot below `args.len()`.
        let result = unsafe { (self.entry)(args.as_ptr()) };
        match runtime::take_trap() {
            Some(trap) => Err(trap.into()),
            None => Ok(result),
        }
    }

    pub fn run_value(&self, args: &[Word64]) -> JitResult<Value> {
        Ok(Value::from_word(self.result_type, self.run(args)?))
    }

    /// Number of argument words the function reads.
    pub fn arity(&self) -> usize {
        self.highest_argument
            .map_or(0, |index| index.saturating_add(1))
    }

    pub fn result_type(&self) -> ValueType {
        self.result_type
    }

    /// Cranelift IR text, captured when compiled with `verbose`.
    pub fn ir(&self) -> Option<&str> {
        self.ir.as_deref()
    }
}

impl Drop for CompiledExpression {
    fn drop(&mut self) {
        if let Some(module) = self.module.take() {
            // SAFETY: `entry` points into this module and dies with `self`.
            unsafe { module.free_memory() };
        }
    }
}

/// Backend that compiles each prepared expression to native code.
pub struct JIT {
    options: CompilerOptions,
}

impl JIT {
    pub fn new() -> Self {
        Self::with_options(CompilerOptions::default())
    }

    pub fn with_options(options: CompilerOptions) -> Self {
        Self { options }
    }

    /// Backend configured by `EXPRJIT_OPT_LEVEL` and `EXPRJIT_VERIFY`.
    pub fn from_env() -> JitResult<Self> {
        Ok(Self::with_options(CompilerOptions::from_env()?))
    }
}

impl Default for JIT {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for JIT {
    fn name(&self) -> &'static str {
        "jit"
    }

    fn prepare<'a>(
        &self,
        tree: &'a ExpressionTree,
        root: ExprId,
    ) -> Result<Box<dyn PreparedBackend + 'a>> {
        Ok(Box::new(compile(tree, root, self.options)?))
    }
}

impl PreparedBackend for CompiledExpression {
    fn result_type(&self) -> ValueType {
        self.result_type
    }

    fn run(&self, args: &[Word64]) -> Result<Word64> {
        Ok(CompiledExpression::run(self, args)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ArithmeticError;

    fn int(value: i64) -> Word64 {
        Word64::from_i64(value)
    }

    fn compile_default(tree: &ExpressionTree, root: ExprId) -> CompiledExpression {
        compile(tree, root, CompilerOptions::default()).expect("compile")
    }

    #[test]
    fn adds_integer_constants() {
        let mut tree = ExpressionTree::new();
        let two = tree.constant_int(2);
        let three = tree.constant_int(3);
        let sum = tree.add(two, three).expect("add");
        let compiled = compile_default(&tree, sum);
        assert_eq!(compiled.arity(), 0);
        assert_eq!(compiled.run(&[]).expect("run"), int(5));
    }

    #[test]
    fn integer_division_truncates() {
        let mut tree = ExpressionTree::new();
        let seven = tree.constant_int(7);
        let two = tree.constant_int(2);
        let quotient = tree.div(seven, two).expect("div");
        assert_eq!(compile_default(&tree, quotient).run(&[]).expect("run"), int(3));
    }

    #[test]
    fn integer_division_faults_are_reported() {
        let mut tree = ExpressionTree::new();
        let lhs = tree.argument(0, ValueType::Int64);
        let rhs = tree.argument(1, ValueType::Int64);
        let quotient = tree.div(lhs, rhs).expect("div");
        let compiled = compile_default(&tree, quotient);

        assert!(matches!(
            compiled.run(&[int(1), int(0)]),
            Err(JitError::Arithmetic(ArithmeticError::DivisionByZero))
        ));
        assert!(matches!(
            compiled.run(&[int(i64::MIN), int(-1)]),
            Err(JitError::Arithmetic(ArithmeticError::DivisionOverflow))
        ));
        // A trap does not leak into the next call.
        assert_eq!(compiled.run(&[int(-9), int(2)]).expect("run"), int(-4));
    }

    #[test]
    fn double_arithmetic_follows_ieee() {
        let mut tree = ExpressionTree::new();
        let a = tree.constant_double(1.5);
        let b = tree.constant_double(2.0);
        let product = tree.mul(a, b).expect("mul");
        let one = tree.constant_double(1.0);
        let zero = tree.constant_double(0.0);
        let infinite = tree.div(one, zero).expect("div");

        let product = compile_default(&tree, product);
        assert_eq!(product.run_value(&[]).expect("run"), Value::Double(3.0));
        let infinite = compile_default(&tree, infinite);
        assert_eq!(
            infinite.run_value(&[]).expect("run"),
            Value::Double(f64::INFINITY)
        );
    }

    #[test]
    fn arguments_are_loaded_by_index() {
        let mut tree = ExpressionTree::new();
        let arg = tree.argument(0, ValueType::Int64);
        assert_eq!(compile_default(&tree, arg).run(&[int(42)]).expect("run"), int(42));

        let third = tree.argument(2, ValueType::Double);
        let word = Word64::from_f64(6.5);
        let compiled = compile_default(&tree, third);
        assert_eq!(compiled.arity(), 3);
        assert_eq!(compiled.run(&[int(0), int(0), word]).expect("run"), word);
    }

    #[test]
    fn short_argument_arrays_are_rejected() {
        let mut tree = ExpressionTree::new();
        let arg = tree.argument(1, ValueType::Int64);
        let compiled = compile_default(&tree, arg);
        assert!(matches!(
            compiled.run(&[int(1)]),
            Err(JitError::ArgumentOutOfRange { index: 1, len: 1 })
        ));
    }

    #[test]
    fn unaddressable_argument_fails_at_run_time() {
        let mut tree = ExpressionTree::new();
        let arg = tree.argument(usize::MAX, ValueType::Double);
        let compiled = compile_default(&tree, arg);
        assert_eq!(compiled.arity(), usize::MAX);
        assert!(matches!(
            compiled.run(&[int(1)]),
            Err(JitError::ArgumentOutOfRange { index: usize::MAX, len: 1 })
        ));
    }

    #[test]
    fn deep_left_chain_compiles() {
        const DEPTH: i64 = 5_000;

        let mut tree = ExpressionTree::new();
        let one = tree.constant_int(1);
        let mut root = tree.argument(0, ValueType::Int64);
        for _ in 0..DEPTH {
            root = tree.add(root, one).expect("add");
        }
        let options = CompilerOptions {
            opt_level: OptLevel::None,
            verify: false,
        };
        let compiled = compile(&tree, root, options).expect("compile");
        assert_eq!(compiled.run(&[int(7)]).expect("run"), int(DEPTH + 7));
    }

    #[test]
    fn casts_convert_numerically() {
        let mut tree = ExpressionTree::new();
        let arg = tree.argument(0, ValueType::Double);
        let truncated = tree.cast(arg, ValueType::Int64).expect("cast");
        let back = tree.cast(truncated, ValueType::Double).expect("cast");
        let compiled = compile_default(&tree, back);

        let run = |value: f64| compiled.run_value(&[Word64::from_f64(value)]).expect("run");
        assert_eq!(run(2.75), Value::Double(2.0));
        assert_eq!(run(-2.75), Value::Double(-2.0));
        assert_eq!(run(f64::NAN), Value::Double(0.0));
        assert_eq!(run(1e300), Value::Double(i64::MAX as f64));
    }

    #[test]
    fn second_compile_is_rejected_and_first_stays_callable() {
        let mut tree = ExpressionTree::new();
        let arg = tree.argument(0, ValueType::Int64);
        let one = tree.constant_int(1);
        let next = tree.add(arg, one).expect("add");

        let mut compiler = ExpressionCompiler::new(CompilerOptions::default()).expect("compiler");
        assert!(matches!(compiler.run(&[int(1)]), Err(JitError::NotCompiled)));
        compiler.compile(&tree, next, false).expect("first compile");
        assert!(matches!(
            compiler.compile(&tree, one, false),
            Err(JitError::AlreadyCompiled)
        ));
        assert!(compiler.is_compiled());
        assert_eq!(compiler.run(&[int(41)]).expect("run"), int(42));
    }

    #[test]
    fn failed_compile_leaves_compiler_unusable() {
        let mut other = ExpressionTree::new();
        other.constant_int(0);
        let foreign = other.constant_int(1);
        let tree = ExpressionTree::new();

        let mut compiler = ExpressionCompiler::new(CompilerOptions::default()).expect("compiler");
        assert!(matches!(
            compiler.compile(&tree, foreign, false),
            Err(JitError::Expression(_))
        ));
        assert!(!compiler.is_compiled());
        assert!(matches!(
            compiler.compile(&other, foreign, false),
            Err(JitError::AlreadyCompiled)
        ));
    }

    #[test]
    fn verbose_compile_keeps_ir_without_changing_results() {
        let mut tree = ExpressionTree::new();
        let arg = tree.argument(0, ValueType::Double);
        let half = tree.constant_double(0.5);
        let product = tree.mul(arg, half).expect("mul");

        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
        let mut verbose = ExpressionCompiler::new(CompilerOptions::default()).expect("compiler");
        verbose.compile(&tree, product, true).expect("compile");
        let quiet = compile_default(&tree, product);

        let compiled = verbose.compiled().expect("compiled");
        let ir = compiled.ir().expect("ir text");
        assert!(ir.contains("fmul"));
        assert!(quiet.ir().is_none());

        let args = [Word64::from_f64(9.0)];
        assert_eq!(compiled.run(&args).expect("run"), quiet.run(&args).expect("run"));
    }

    #[test]
    fn unoptimized_unverified_options_compile() {
        let options = CompilerOptions {
            opt_level: OptLevel::None,
            verify: false,
        };
        let mut tree = ExpressionTree::new();
        let a = tree.constant_int(6);
        let b = tree.constant_int(7);
        let product = tree.mul(a, b).expect("mul");
        let compiled = compile(&tree, product, options).expect("compile");
        assert_eq!(compiled.run(&[]).expect("run"), int(42));
    }
}
