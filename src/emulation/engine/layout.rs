//! Storage shapes and instance layouts.
//!
//! Every type is stored in one of a few shapes. Value types are laid out sequentially with
//! natural alignment capped at 8 bytes; classes append their own fields after their base
//! class's. Generic parameters and constructed reference types are stored as references.

use std::{collections::HashMap, sync::Arc};

use crate::{
    emulation::{engine::Runtime, EmValue, EmulationError},
    metadata::{members::TypeKind, token::Token},
    Result,
};

/// How values of a type are stored in memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Storage {
    Bool,
    I32,
    I64,
    F64,
    Native,
    Reference,
    Struct { ty: Token, size: usize },
}

impl Storage {
    pub fn size(&self) -> usize {
        match self {
            Storage::Bool => 1,
            Storage::I32 => 4,
            Storage::I64 | Storage::F64 | Storage::Native | Storage::Reference => 8,
            Storage::Struct { size, .. } => *size,
        }
    }

    fn alignment(&self) -> usize {
        match self {
            Storage::Struct { size, .. } => (*size).clamp(1, 8).next_power_of_two().min(8),
            other => other.size(),
        }
    }
}

/// Instance field offsets of one type
#[derive(Debug, Default)]
pub(crate) struct InstanceLayout {
    pub size: usize,
    pub offsets: HashMap<Token, usize>,
}

impl Runtime {
    /// Storage shape of `ty`
    pub(crate) fn storage(&mut self, ty: Token) -> Result<Storage> {
        let core = *self.registry.core();
        let primitive = match ty {
            t if t == core.boolean => Some(Storage::Bool),
            t if t == core.int32 => Some(Storage::I32),
            t if t == core.int64 => Some(Storage::I64),
            t if t == core.double => Some(Storage::F64),
            t if t == core.intptr => Some(Storage::Native),
            t if t == core.runtime_method_handle => Some(Storage::Struct { ty, size: 8 }),
            t if t == core.typed_reference => Some(Storage::Struct {
                ty,
                size: self.family.typed_reference_layout().size as usize,
            }),
            t if t == core.void => return Err(EmulationError::NoLayout(ty).into()),
            _ => None,
        };
        if let Some(storage) = primitive {
            return Ok(storage);
        }
        let kind = self.registry.type_def(ty)?.kind.clone();
        Ok(match kind {
            TypeKind::ByRef { .. } | TypeKind::Pointer { .. } => Storage::Native,
            TypeKind::Array { .. } | TypeKind::GenericParameter { .. } => Storage::Reference,
            TypeKind::Definition | TypeKind::Instantiation { .. } => {
                if self.registry.is_value_type(ty) {
                    let size = self.instance_layout(ty)?.size.max(1);
                    Storage::Struct { ty, size }
                } else {
                    Storage::Reference
                }
            }
        })
    }

    /// Field offsets of `ty`, base class fields first
    pub(crate) fn instance_layout(&mut self, ty: Token) -> Result<Arc<InstanceLayout>> {
        let definition = self.registry.generic_definition(ty);
        if let Some(layout) = self.layouts.get(&definition) {
            return Ok(layout.clone());
        }
        let ty_rc = self.registry.type_def(definition)?;
        let mut layout = InstanceLayout::default();
        if !self.registry.is_value_type(definition) {
            if let Some(base) = ty_rc.base() {
                let base = self.instance_layout(base)?;
                layout.size = base.size;
                layout.offsets.extend(base.offsets.iter().map(|(k, v)| (*k, *v)));
            }
        }
        for (_, field) in ty_rc.fields.iter() {
            let field = self.registry.field(*field)?;
            if field.is_static() {
                continue;
            }
            let field_type = field
                .field_type()
                .ok_or_else(|| malformed_error!("field {} has no type", field.token))?;
            let storage = self.storage(field_type)?;
            let offset = layout.size.next_multiple_of(storage.alignment());
            layout.offsets.insert(field.token, offset);
            layout.size = offset + storage.size();
        }
        let layout = Arc::new(layout);
        self.layouts.insert(definition, layout.clone());
        Ok(layout)
    }

    /// Offset of an instance field inside its declaring type's layout
    pub(crate) fn field_offset(&mut self, declaring: Token, field: Token) -> Result<usize> {
        self.instance_layout(declaring)?
            .offsets
            .get(&field)
            .copied()
            .ok_or_else(|| malformed_error!("{} is not an instance field of {}", field, declaring))
    }

    /// Reads a value of type `ty` stored at `address`
    pub(crate) fn read_value(&mut self, address: u64, ty: Token) -> Result<EmValue> {
        let storage = self.storage(ty)?;
        let bytes = self.memory.read(address, storage.size())?;
        Ok(match storage {
            Storage::Bool => EmValue::I32(i32::from(bytes[0] != 0)),
            Storage::I32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                EmValue::I32(i32::from_le_bytes(raw))
            }
            Storage::I64 | Storage::F64 | Storage::Native | Storage::Reference => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                match storage {
                    Storage::I64 => EmValue::I64(i64::from_le_bytes(raw)),
                    Storage::F64 => EmValue::F64(f64::from_le_bytes(raw)),
                    Storage::Native => EmValue::NativeInt(i64::from_le_bytes(raw)),
                    _ => match u64::from_le_bytes(raw) {
                        0 => EmValue::Null,
                        address => EmValue::ObjectRef(address),
                    },
                }
            }
            Storage::Struct { ty, .. } => EmValue::ValueType {
                ty,
                bytes: bytes.to_vec(),
            },
        })
    }

    /// Stores `value` as a `ty` at `address`, converting stack types the way `stloc` does
    pub(crate) fn write_value(&mut self, address: u64, ty: Token, value: &EmValue) -> Result<()> {
        let storage = self.storage(ty)?;
        match storage {
            Storage::Bool => self.memory.write(address, &[u8::from(value.is_truthy())]),
            Storage::I32 => self.memory.write(address, &value.as_i32()?.to_le_bytes()),
            Storage::I64 => self.memory.write(address, &value.as_i64()?.to_le_bytes()),
            Storage::F64 => {
                let float = match value {
                    EmValue::F64(float) => *float,
                    #[allow(clippy::cast_precision_loss)]
                    other => other.as_i64()? as f64,
                };
                self.memory.write(address, &float.to_le_bytes())
            }
            Storage::Native | Storage::Reference => {
                self.memory.write_u64(address, value.as_address()?)
            }
            Storage::Struct { size, .. } => match value {
                EmValue::ValueType { bytes, .. } if bytes.len() == size => {
                    self.memory.write(address, bytes)
                }
                other => Err(EmulationError::TypeMismatch {
                    expected: "value type",
                    found: other.kind_name(),
                }
                .into()),
            },
        }
    }
}
