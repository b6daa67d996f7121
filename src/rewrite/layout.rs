//! Runtime memory layout facts used by synthesized code.
//!
//! Two runtime families are supported. They differ in the object header that precedes a boxed
//! value's payload and in the field order of `System.TypedReference`. The family is detected
//! once per copy session through a [`RuntimeProbe`]; the payload offset of each boxed value
//! type is measured once per family and token space and cached process-wide.

use std::sync::OnceLock;

use dashmap::DashMap;
use strum::Display;

use crate::{metadata::token::Token, Result};

/// The runtime implementation generated code will execute on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum RuntimeFamily {
    /// Microsoft CoreCLR / .NET Framework: one method-table pointer before the payload
    #[strum(serialize = "coreclr")]
    CoreClr,
    /// Mono: vtable and synchronisation pointers before the payload
    #[strum(serialize = "mono")]
    Mono,
}

impl RuntimeFamily {
    /// Bytes between an object reference and the first byte of its payload
    #[must_use]
    pub fn object_header_size(&self) -> u32 {
        match self {
            RuntimeFamily::CoreClr => 8,
            RuntimeFamily::Mono => 16,
        }
    }

    /// Field layout of `System.TypedReference`
    #[must_use]
    pub fn typed_reference_layout(&self) -> TypedReferenceLayout {
        match self {
            RuntimeFamily::CoreClr => TypedReferenceLayout {
                value_offset: 0,
                type_offset: 8,
                klass_offset: None,
                size: 16,
            },
            RuntimeFamily::Mono => TypedReferenceLayout {
                type_offset: 0,
                value_offset: 8,
                klass_offset: Some(16),
                size: 24,
            },
        }
    }
}

/// Byte offsets inside a `System.TypedReference`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedReferenceLayout {
    /// Offset of the data pointer
    pub value_offset: i32,
    /// Offset of the type handle
    pub type_offset: i32,
    /// Offset of the class pointer duplicate, Mono only
    pub klass_offset: Option<i32>,
    /// Total size
    pub size: u32,
}

/// Measures layout facts on the runtime generated code will run on.
pub trait RuntimeProbe {
    /// The runtime family
    fn family(&self) -> RuntimeFamily;

    /// Measures the distance between a box's object reference and its payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::Layout`] if the measurement fails.
    fn measure_box_payload_offset(&self, value_type: Token) -> Result<i32>;
}

static BOX_PAYLOAD_OFFSETS: OnceLock<DashMap<(u64, RuntimeFamily, Token), i32>> = OnceLock::new();

/// Box payload offset of `value_type`, measured on first use and cached process-wide.
///
/// `scope` names the token space `value_type` belongs to (see
/// [`crate::metadata::host::MetadataHost::scope`]), so equal tokens of unrelated registries
/// never share an entry.
///
/// Concurrent first uses may measure twice; the first stored value wins and every caller
/// observes the same offset afterwards.
///
/// # Errors
/// Propagates probe failures; failed measurements are not cached.
pub fn box_payload_offset(
    probe: &dyn RuntimeProbe,
    scope: u64,
    value_type: Token,
) -> Result<i32> {
    let cache = BOX_PAYLOAD_OFFSETS.get_or_init(DashMap::new);
    let key = (scope, probe.family(), value_type);
    if let Some(offset) = cache.get(&key) {
        return Ok(*offset);
    }
    let measured = probe.measure_box_payload_offset(value_type)?;
    tracing::trace!(scope, family = %key.1, %value_type, measured, "measured box payload offset");
    Ok(*cache.entry(key).or_insert(measured))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProbe {
        family: RuntimeFamily,
        offset: i32,
        calls: AtomicUsize,
    }

    impl CountingProbe {
        fn new(family: RuntimeFamily, offset: i32) -> Self {
            CountingProbe {
                family,
                offset,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl RuntimeProbe for CountingProbe {
        fn family(&self) -> RuntimeFamily {
            self.family
        }

        fn measure_box_payload_offset(&self, _value_type: Token) -> Result<i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.offset)
        }
    }

    // Scopes far above anything a registry hands out in this test binary
    const SCOPE: u64 = u64::MAX - 1;
    const OTHER_SCOPE: u64 = u64::MAX - 2;

    #[test]
    fn offsets_are_measured_once_per_family_and_type() -> Result<()> {
        let probe = CountingProbe::new(RuntimeFamily::Mono, 16);
        let ty = Token::new(0x02FF_0001);
        assert_eq!(box_payload_offset(&probe, SCOPE, ty)?, 16);
        assert_eq!(box_payload_offset(&probe, SCOPE, ty)?, 16);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        let other = Token::new(0x02FF_0002);
        assert_eq!(box_payload_offset(&probe, SCOPE, other)?, 16);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        Ok(())
    }

    #[test]
    fn equal_tokens_of_different_scopes_are_measured_separately() -> Result<()> {
        let ty = Token::new(0x02FF_0003);
        let first = CountingProbe::new(RuntimeFamily::CoreClr, 8);
        let second = CountingProbe::new(RuntimeFamily::CoreClr, 24);
        assert_eq!(box_payload_offset(&first, SCOPE, ty)?, 8);
        assert_eq!(box_payload_offset(&second, OTHER_SCOPE, ty)?, 24);
        assert_eq!(box_payload_offset(&second, SCOPE, ty)?, 8);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn typed_reference_layouts_differ() {
        let core = RuntimeFamily::CoreClr.typed_reference_layout();
        let mono = RuntimeFamily::Mono.typed_reference_layout();
        assert_eq!((core.value_offset, core.type_offset, core.size), (0, 8, 16));
        assert_eq!((mono.type_offset, mono.value_offset, mono.size), (0, 8, 24));
        assert_eq!(mono.klass_offset, Some(16));
        assert_eq!(RuntimeFamily::Mono.object_header_size(), 16);
    }
}
