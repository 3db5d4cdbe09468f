use std::cell::Cell;

use cranelift_jit::JITBuilder;

use crate::value::{ArithmeticError, Word64};

/// Native signature of every compiled expression.
pub(super) type EntryFunction = unsafe extern "C" fn(*const Word64) -> Word64;

pub(super) const RAISE_SYMBOL: &str = "exprjit_raise";

pub(super) const TRAP_NONE: i64 = 0;
pub(super) const TRAP_DIVISION_BY_ZERO: i64 = 1;
pub(super) const TRAP_DIVISION_OVERFLOW: i64 = 2;

thread_local! {
    // Written by generated code through `exprjit_raise`, drained after each call.
    static PENDING_TRAP: Cell<i64> = const { Cell::new(TRAP_NONE) };
}

/// Runtime hook called by generated code instead of executing a faulting
/// `sdiv`. Only the first trap of a call is kept.
extern "C" fn exprjit_raise(code: i64) {
    PENDING_TRAP.with(|trap| {
        if trap.get() == TRAP_NONE {
            trap.set(code);
        }
    });
}

pub(super) fn register_runtime_symbols(builder: &mut JITBuilder) {
    builder.symbol(RAISE_SYMBOL, exprjit_raise as *const u8);
}

pub(super) fn clear_trap() {
    PENDING_TRAP.with(|trap| trap.set(TRAP_NONE));
}

pub(super) fn take_trap() -> Option<ArithmeticError> {
    let code = PENDING_TRAP.with(|trap| trap.replace(TRAP_NONE));
    trap_error(code)
}

fn trap_error(code: i64) -> Option<ArithmeticError> {
    match code {
        TRAP_DIVISION_BY_ZERO => Some(ArithmeticError::DivisionByZero),
        TRAP_DIVISION_OVERFLOW => Some(ArithmeticError::DivisionOverflow),
        _ => None,
    }
}
