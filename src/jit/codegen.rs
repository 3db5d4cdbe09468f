use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{self, AbiParam, FuncRef, InstBuilder, MemFlags, types};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::JITModule;
use cranelift_module::{Linkage, Module};

use crate::expression::{BinaryOperator, ExprId, ExpressionTree, ExpressionVisitor};
use crate::value::{Value, ValueType, Word64};

use super::CompiledExpression;
use super::error::{JitError, JitResult};
use super::runtime::{self, EntryFunction};

const ENTRY_SYMBOL: &str = "expression";
const WORD_SIZE: usize = std::mem::size_of::<Word64>();

/// Lowers `root` into a single `expression(args) -> i64` function, finalizes
/// `module` and resolves the entry point.
///
/// The module is consumed either way; on error nothing was finalized.
pub(super) fn compile_module(
    mut module: JITModule,
    tree: &ExpressionTree,
    root: ExprId,
    verbose: bool,
) -> JitResult<CompiledExpression> {
    let result_type = tree.value_type(root)?;
    let highest_argument = tree.highest_argument(root)?;
    let ptr_type = module.target_config().pointer_type();

    let mut signature = module.make_signature();
    signature.params.push(AbiParam::new(ptr_type));
    signature.returns.push(AbiParam::new(types::I64));
    let func_id = module.declare_function(ENTRY_SYMBOL, Linkage::Export, &signature)?;

    let mut raise_signature = module.make_signature();
    raise_signature.params.push(AbiParam::new(types::I64));
    let raise_id =
        module.declare_function(runtime::RAISE_SYMBOL, Linkage::Import, &raise_signature)?;

    let mut ctx = module.make_context();
    ctx.func.signature = signature;
    let raise = module.declare_func_in_func(raise_id, &mut ctx.func);

    let mut builder_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);
    let args = builder.block_params(entry_block)[0];

    let value = tree.walk(
        root,
        &mut ExpressionBuilder {
            builder: &mut builder,
            args,
            raise,
        },
    )?;
    // The calling convention returns a raw word; doubles keep their bit pattern.
    let word = match result_type {
        ValueType::Int64 => value,
        ValueType::Double => builder.ins().bitcast(types::I64, MemFlags::new(), value),
    };
    builder.ins().return_(&[word]);
    builder.finalize();

    let ir = verbose.then(|| ctx.func.display().to_string());
    if let Some(text) = &ir {
        tracing::debug!(expression = %tree.display(root), "generated IR:\n{text}");
    }

    module.define_function(func_id, &mut ctx)?;
    module.clear_context(&mut ctx);
    module.finalize_definitions()?;

    let code = module.get_finalized_function(func_id);
    // SAFETY: `code` was produced from the signature declared above, which
    // matches `EntryFunction` on the host calling convention.
    let entry = unsafe { std::mem::transmute::<*const u8, EntryFunction>(code) };

    Ok(CompiledExpression::new(module, entry, highest_argument, result_type, ir))
}

/// Emits the nodes handed over by [`ExpressionTree::walk`] into a function
/// under construction.
struct ExpressionBuilder<'a, 'b> {
    builder: &'a mut FunctionBuilder<'b>,
    /// Pointer to the caller's argument words.
    args: ir::Value,
    raise: FuncRef,
}

impl ExpressionVisitor for ExpressionBuilder<'_, '_> {
    type Output = ir::Value;
    type Error = JitError;

    fn constant(&mut self, ty: ValueType, word: Word64) -> JitResult<ir::Value> {
        Ok(match Value::from_word(ty, word) {
            Value::Int64(value) => self.builder.ins().iconst(types::I64, value),
            Value::Double(value) => self.builder.ins().f64const(value),
        })
    }

    fn argument(&mut self, ty: ValueType, index: usize) -> JitResult<ir::Value> {
        let offset = index
            .checked_mul(WORD_SIZE)
            .and_then(|offset| i64::try_from(offset).ok());
        let Some(offset) = offset else {
            // No slice of words is this long, so `run` rejects every call
            // before the load could happen.
            return self.constant(ty, Word64::default());
        };
        let address = self.builder.ins().iadd_imm(self.args, offset);
        Ok(self
            .builder
            .ins()
            .load(native_type(ty), MemFlags::trusted(), address, 0))
    }

    fn cast(&mut self, from: ValueType, to: ValueType, child: ir::Value) -> JitResult<ir::Value> {
        Ok(match (from, to) {
            (ValueType::Int64, ValueType::Double) => {
                self.builder.ins().fcvt_from_sint(types::F64, child)
            }
            (ValueType::Double, ValueType::Int64) => {
                self.builder.ins().fcvt_to_sint_sat(types::I64, child)
            }
            _ => child,
        })
    }

    fn binary(
        &mut self,
        ty: ValueType,
        op: BinaryOperator,
        left: ir::Value,
        right: ir::Value,
    ) -> JitResult<ir::Value> {
        Ok(match ty {
            ValueType::Int64 => self.int_binary(op, left, right),
            ValueType::Double => self.double_binary(op, left, right),
        })
    }
}

impl ExpressionBuilder<'_, '_> {
    fn int_binary(&mut self, op: BinaryOperator, lhs: ir::Value, rhs: ir::Value) -> ir::Value {
        match op {
            BinaryOperator::Add => self.builder.ins().iadd(lhs, rhs),
            BinaryOperator::Sub => self.builder.ins().isub(lhs, rhs),
            BinaryOperator::Mul => self.builder.ins().imul(lhs, rhs),
            BinaryOperator::Div => self.checked_sdiv(lhs, rhs),
        }
    }

    fn double_binary(&mut self, op: BinaryOperator, lhs: ir::Value, rhs: ir::Value) -> ir::Value {
        match op {
            BinaryOperator::Add => self.builder.ins().fadd(lhs, rhs),
            BinaryOperator::Sub => self.builder.ins().fsub(lhs, rhs),
            BinaryOperator::Mul => self.builder.ins().fmul(lhs, rhs),
            BinaryOperator::Div => self.builder.ins().fdiv(lhs, rhs),
        }
    }

    /// Signed division that never executes a faulting `sdiv`.
    ///
    /// A zero divisor or `i64::MIN / -1` reports the trap through the runtime
    /// hook and divides by 1 instead; the caller discards the result.
    fn checked_sdiv(&mut self, lhs: ir::Value, rhs: ir::Value) -> ir::Value {
        let is_zero = self.builder.ins().icmp_imm(IntCC::Equal, rhs, 0);
        let is_min = self.builder.ins().icmp_imm(IntCC::Equal, lhs, i64::MIN);
        let is_minus_one = self.builder.ins().icmp_imm(IntCC::Equal, rhs, -1);
        let overflows = self.builder.ins().band(is_min, is_minus_one);
        let faults = self.builder.ins().bor(is_zero, overflows);

        let trap_block = self.builder.create_block();
        let divide_block = self.builder.create_block();
        self.builder
            .ins()
            .brif(faults, trap_block, &[], divide_block, &[]);

        self.builder.switch_to_block(trap_block);
        self.builder.seal_block(trap_block);
        let zero_code = self
            .builder
            .ins()
            .iconst(types::I64, runtime::TRAP_DIVISION_BY_ZERO);
        let overflow_code = self
            .builder
            .ins()
            .iconst(types::I64, runtime::TRAP_DIVISION_OVERFLOW);
        let code = self.builder.ins().select(is_zero, zero_code, overflow_code);
        self.builder.ins().call(self.raise, &[code]);
        self.builder.ins().jump(divide_block, &[]);

        self.builder.switch_to_block(divide_block);
        self.builder.seal_block(divide_block);
        let one = self.builder.ins().iconst(types::I64, 1);
        let divisor = self.builder.ins().select(faults, one, rhs);
        self.builder.ins().sdiv(lhs, divisor)
    }
}

fn native_type(ty: ValueType) -> ir::Type {
    match ty {
        ValueType::Int64 => types::I64,
        ValueType::Double => types::F64,
    }
}
