use std::fmt;

use thiserror::Error;

/// Declared type of an expression node.
///
/// Selects both the interpreted arithmetic and the Cranelift type used when
/// the node is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int64,
    Double,
}

impl ValueType {
    pub fn name(self) -> &'static str {
        match self {
            ValueType::Int64 => "int64",
            ValueType::Double => "double",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An opaque 64-bit cell holding either an `i64` or an `f64`.
///
/// The cell itself carries no type. Which reading is correct depends on the
/// declared [`ValueType`] of the node that produced it, and no numeric
/// promotion ever happens between the two readings.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Word64(u64);

impl Word64 {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }

    pub const fn from_i64(value: i64) -> Self {
        Self(value as u64)
    }

    pub fn from_f64(value: f64) -> Self {
        Self(value.to_bits())
    }

    pub const fn as_i64(self) -> i64 {
        self.0 as i64
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<i64> for Word64 {
    fn from(value: i64) -> Self {
        Self::from_i64(value)
    }
}

impl From<f64> for Word64 {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl fmt::Debug for Word64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word64({:#018x})", self.0)
    }
}

/// Typed view of a [`Word64`].
///
/// All arithmetic runs on this type; words are only reinterpreted at the
/// boundary where values enter or leave an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int64(i64),
    Double(f64),
}

impl Value {
    pub fn from_word(ty: ValueType, word: Word64) -> Self {
        match ty {
            ValueType::Int64 => Value::Int64(word.as_i64()),
            ValueType::Double => Value::Double(word.as_f64()),
        }
    }

    pub fn to_word(self) -> Word64 {
        match self {
            Value::Int64(value) => Word64::from_i64(value),
            Value::Double(value) => Word64::from_f64(value),
        }
    }

    pub fn value_type(self) -> ValueType {
        match self {
            Value::Int64(_) => ValueType::Int64,
            Value::Double(_) => ValueType::Double,
        }
    }

    pub fn as_double(self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(value),
            Value::Int64(_) => None,
        }
    }

    /// Numeric conversion into `target`.
    ///
    /// `int64 -> double` rounds to nearest. `double -> int64` truncates toward
    /// zero and saturates at the `i64` bounds, with NaN mapping to 0; this is
    /// exactly what Cranelift's `fcvt_to_sint_sat` does, so both backends
    /// agree on every input.
    pub fn cast(self, target: ValueType) -> Self {
        match (self, target) {
            (Value::Int64(value), ValueType::Double) => Value::Double(value as f64),
            (Value::Double(value), ValueType::Int64) => Value::Int64(value as i64),
            (value, _) => value,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int64(value) => write!(f, "{value}"),
            Value::Double(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

/// Arithmetic failures shared by the interpreter and the JIT.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("Integer division by zero")]
    DivisionByZero,
    #[error("Integer division overflow: -9223372036854775808 / -1")]
    DivisionOverflow,
}
