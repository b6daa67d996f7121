//! Runtime values of the reference runtime.

use std::fmt;

use crate::{emulation::EmulationError, metadata::token::Token, Result};

/// A value on the evaluation stack or passed to and returned from [`crate::emulation::Runtime`].
///
/// # CIL Type Mapping
///
/// | CIL Type | EmValue Variant |
/// |----------|-----------------|
/// | `bool`, `int32` | [`EmValue::I32`] |
/// | `int64` | [`EmValue::I64`] |
/// | `float64` | [`EmValue::F64`] |
/// | `native int`, managed and unmanaged pointers | [`EmValue::NativeInt`] |
/// | Object reference | [`EmValue::ObjectRef`] |
/// | `null` | [`EmValue::Null`] |
/// | Value type (struct) | [`EmValue::ValueType`] |
///
/// Addresses are plain numbers in the runtime's flat address space, so pointer arithmetic on
/// object references and local addresses works the way generated code expects.
#[derive(Clone, Debug, PartialEq)]
pub enum EmValue {
    /// 32-bit signed integer, also `bool`
    I32(i32),
    /// 64-bit signed integer
    I64(i64),
    /// 64-bit floating point
    F64(f64),
    /// Native-sized integer; addresses, function pointers and type handles
    NativeInt(i64),
    /// Address of an object's header
    ObjectRef(u64),
    /// Null reference
    Null,
    /// Raw bytes of a value type instance
    ValueType {
        /// The value type
        ty: Token,
        /// Instance bytes in field layout order
        bytes: Vec<u8>,
    },
}

impl EmValue {
    /// Name of the stack type, used in diagnostics
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            EmValue::I32(_) => "int32",
            EmValue::I64(_) => "int64",
            EmValue::F64(_) => "float64",
            EmValue::NativeInt(_) => "native int",
            EmValue::ObjectRef(_) => "object",
            EmValue::Null => "null",
            EmValue::ValueType { .. } => "value type",
        }
    }

    /// Interprets the value as a condition, the way `brtrue` does
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            EmValue::I32(value) => *value != 0,
            EmValue::I64(value) | EmValue::NativeInt(value) => *value != 0,
            EmValue::F64(value) => *value != 0.0,
            EmValue::ObjectRef(address) => *address != 0,
            EmValue::Null => false,
            EmValue::ValueType { .. } => true,
        }
    }

    /// Returns true for object references, null included
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self, EmValue::ObjectRef(_) | EmValue::Null)
    }

    /// The value as `int32`.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for non-integral values.
    pub fn as_i32(&self) -> Result<i32> {
        match self {
            EmValue::I32(value) => Ok(*value),
            #[allow(clippy::cast_possible_truncation)]
            EmValue::I64(value) | EmValue::NativeInt(value) => Ok(*value as i32),
            other => Err(mismatch("int32", other)),
        }
    }

    /// The value as a 64-bit integer, widening `int32`.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for non-integral values.
    pub fn as_i64(&self) -> Result<i64> {
        match self {
            EmValue::I32(value) => Ok(i64::from(*value)),
            EmValue::I64(value) | EmValue::NativeInt(value) => Ok(*value),
            other => Err(mismatch("int64", other)),
        }
    }

    /// The value as an address: native integers and object references.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for values that cannot denote an address.
    pub fn as_address(&self) -> Result<u64> {
        match self {
            #[allow(clippy::cast_sign_loss)]
            EmValue::NativeInt(value) | EmValue::I64(value) => Ok(*value as u64),
            #[allow(clippy::cast_sign_loss)]
            EmValue::I32(value) => Ok(i64::from(*value) as u64),
            EmValue::ObjectRef(address) => Ok(*address),
            EmValue::Null => Ok(0),
            other => Err(mismatch("address", other)),
        }
    }

    /// The referenced object, `None` for null.
    ///
    /// # Errors
    /// Returns [`EmulationError::TypeMismatch`] for non-reference values.
    pub fn as_object(&self) -> Result<Option<u64>> {
        match self {
            EmValue::ObjectRef(0) | EmValue::Null => Ok(None),
            EmValue::ObjectRef(address) => Ok(Some(*address)),
            other => Err(mismatch("object", other)),
        }
    }
}

impl fmt::Display for EmValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmValue::I32(value) => write!(f, "{value}"),
            EmValue::I64(value) => write!(f, "{value}L"),
            EmValue::F64(value) => write!(f, "{value}"),
            EmValue::NativeInt(value) => write!(f, "0x{value:x}"),
            EmValue::ObjectRef(address) => write!(f, "object@0x{address:x}"),
            EmValue::Null => write!(f, "null"),
            EmValue::ValueType { ty, bytes } => write!(f, "{ty}{{{} bytes}}", bytes.len()),
        }
    }
}

impl From<i32> for EmValue {
    fn from(value: i32) -> Self {
        EmValue::I32(value)
    }
}

impl From<i64> for EmValue {
    fn from(value: i64) -> Self {
        EmValue::I64(value)
    }
}

impl From<f64> for EmValue {
    fn from(value: f64) -> Self {
        EmValue::F64(value)
    }
}

impl From<bool> for EmValue {
    fn from(value: bool) -> Self {
        EmValue::I32(i32::from(value))
    }
}

fn mismatch(expected: &'static str, found: &EmValue) -> crate::Error {
    EmulationError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditions_follow_brtrue() {
        assert!(EmValue::I32(3).is_truthy());
        assert!(!EmValue::I32(0).is_truthy());
        assert!(!EmValue::Null.is_truthy());
        assert!(!EmValue::ObjectRef(0).is_truthy());
        assert!(EmValue::ObjectRef(0x1000).is_truthy());
    }

    #[test]
    fn conversions() -> Result<()> {
        assert_eq!(EmValue::I32(-1).as_i64()?, -1);
        assert_eq!(EmValue::NativeInt(0x2000).as_address()?, 0x2000);
        assert_eq!(EmValue::ObjectRef(0x10).as_object()?, Some(0x10));
        assert_eq!(EmValue::Null.as_object()?, None);
        assert!(EmValue::F64(1.0).as_i32().is_err());
        assert_eq!(EmValue::from(true), EmValue::I32(1));
        Ok(())
    }
}
