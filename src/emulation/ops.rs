//! Stack arithmetic, comparisons and conversions.
//!
//! Binary operations promote both operands to the wider stack type before operating:
//! `float64` over `native int` over `int64` over `int32`. Integer arithmetic wraps on
//! overflow. Object references take part only in equality comparisons and, once converted
//! with `conv.u`, in pointer arithmetic as native integers.

// CIL conversions are defined as truncating or reinterpreting casts.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]

use std::cmp::Ordering;

use crate::{
    assembly::OpCode,
    emulation::{EmValue, EmulationError},
    Result,
};

/// Binary arithmetic operations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// `add`
    Add,
    /// `sub`
    Sub,
    /// `mul`
    Mul,
    /// `div`; integer division by zero faults
    Div,
    /// `rem`; integer remainder by zero faults
    Rem,
}

impl BinaryOp {
    /// The operation performed by `opcode`, if it is a binary arithmetic operation
    #[must_use]
    pub fn from_opcode(opcode: OpCode) -> Option<Self> {
        Some(match opcode {
            OpCode::Add => BinaryOp::Add,
            OpCode::Sub => BinaryOp::Sub,
            OpCode::Mul => BinaryOp::Mul,
            OpCode::Div => BinaryOp::Div,
            OpCode::Rem => BinaryOp::Rem,
            _ => return None,
        })
    }
}

/// Comparison operations used by `ceq`/`cgt`/`clt` and the compare-and-branch family
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Equal (`ceq`, `beq`)
    Eq,
    /// Not equal or unordered (`bne.un`)
    NeUn,
    /// Greater than (`cgt`)
    Gt,
    /// Less than (`clt`, `blt`)
    Lt,
    /// Greater or equal (`bge`)
    Ge,
}

/// Target of a conversion instruction
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConversionType {
    /// `conv.i4`
    I4,
    /// `conv.i8`
    I8,
    /// `conv.r8`
    R8,
    /// `conv.i` and `conv.u`
    NativeInt,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Rank {
    I32,
    I64,
    Native,
    F64,
}

fn rank(value: &EmValue) -> Result<Rank> {
    Ok(match value {
        EmValue::I32(_) => Rank::I32,
        EmValue::I64(_) => Rank::I64,
        EmValue::NativeInt(_) => Rank::Native,
        EmValue::F64(_) => Rank::F64,
        other => {
            return Err(EmulationError::TypeMismatch {
                expected: "numeric value",
                found: other.kind_name(),
            }
            .into())
        }
    })
}

fn as_f64(value: &EmValue) -> Result<f64> {
    match value {
        EmValue::F64(value) => Ok(*value),
        other => Ok(other.as_i64()? as f64),
    }
}

macro_rules! integer_op {
    ($op:expr, $a:expr, $b:expr) => {{
        let (a, b) = ($a, $b);
        match $op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(EmulationError::DivideByZero.into())
            }
            BinaryOp::Div => a.wrapping_div(b),
            BinaryOp::Rem => a.wrapping_rem(b),
        }
    }};
}

impl EmValue {
    /// Applies a binary arithmetic operation.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for non-numeric operands and
    /// [`EmulationError::DivideByZero`] for integer division by zero.
    pub fn binary_op(&self, other: &EmValue, op: BinaryOp) -> Result<EmValue> {
        Ok(match rank(self)?.max(rank(other)?) {
            Rank::F64 => {
                let (a, b) = (as_f64(self)?, as_f64(other)?);
                EmValue::F64(match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Rem => a % b,
                })
            }
            Rank::Native => EmValue::NativeInt(integer_op!(op, self.as_i64()?, other.as_i64()?)),
            Rank::I64 => EmValue::I64(integer_op!(op, self.as_i64()?, other.as_i64()?)),
            Rank::I32 => EmValue::I32(integer_op!(op, self.as_i32()?, other.as_i32()?)),
        })
    }

    /// Negates a numeric value.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for non-numeric values.
    pub fn negate(&self) -> Result<EmValue> {
        Ok(match self {
            EmValue::I32(value) => EmValue::I32(value.wrapping_neg()),
            EmValue::I64(value) => EmValue::I64(value.wrapping_neg()),
            EmValue::NativeInt(value) => EmValue::NativeInt(value.wrapping_neg()),
            EmValue::F64(value) => EmValue::F64(-value),
            other => {
                return Err(EmulationError::TypeMismatch {
                    expected: "numeric value",
                    found: other.kind_name(),
                }
                .into())
            }
        })
    }

    /// Evaluates a comparison.
    ///
    /// References compare by identity and only for equality; value types compare their bytes.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for operands that cannot be compared.
    pub fn compare(&self, other: &EmValue, op: CompareOp) -> Result<bool> {
        let ordering = match (self, other) {
            (a, b) if a.is_reference() && b.is_reference() => {
                Some(a.as_address()?.cmp(&b.as_address()?))
            }
            (EmValue::ValueType { bytes: a, .. }, EmValue::ValueType { bytes: b, .. }) => {
                Some(if a == b { Ordering::Equal } else { Ordering::Less })
            }
            (a, b) if rank(a)?.max(rank(b)?) == Rank::F64 => as_f64(a)?.partial_cmp(&as_f64(b)?),
            (a, b) => Some(a.as_i64()?.cmp(&b.as_i64()?)),
        };
        Ok(match op {
            CompareOp::Eq => ordering == Some(Ordering::Equal),
            CompareOp::NeUn => ordering != Some(Ordering::Equal),
            CompareOp::Gt => ordering == Some(Ordering::Greater),
            CompareOp::Lt => ordering == Some(Ordering::Less),
            CompareOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        })
    }

    /// Converts to another stack type; object references convert to their address.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for value types.
    pub fn convert(&self, target: ConversionType) -> Result<EmValue> {
        let integer = || -> Result<i64> {
            match self {
                EmValue::F64(value) => Ok(*value as i64),
                other => Ok(other.as_address()? as i64),
            }
        };
        Ok(match target {
            ConversionType::I4 => EmValue::I32(integer()? as i32),
            ConversionType::I8 => EmValue::I64(integer()?),
            ConversionType::NativeInt => EmValue::NativeInt(integer()?),
            ConversionType::R8 => EmValue::F64(as_f64(self)?),
        })
    }
}
