//! Runtime probe backed by the reference runtime.

use std::sync::{Arc, Mutex};

use crate::{
    emulation::Runtime,
    metadata::{registry::MemberRegistry, token::Token},
    rewrite::{RuntimeFamily, RuntimeProbe},
    Error, Result,
};

/// [`RuntimeProbe`] that measures layouts by executing on a private [`Runtime`].
///
/// # Examples
///
/// ```rust
/// use cilreplica::{emulation::EmulatedProbe, rewrite::{RuntimeFamily, RuntimeProbe}, MemberRegistry};
/// use std::sync::Arc;
///
/// let registry = Arc::new(MemberRegistry::new());
/// let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::Mono);
/// assert_eq!(probe.measure_box_payload_offset(registry.core().int32)?, 16);
/// # Ok::<(), cilreplica::Error>(())
/// ```
pub struct EmulatedProbe {
    family: RuntimeFamily,
    runtime: Mutex<Runtime>,
}

impl EmulatedProbe {
    /// Creates a probe for `family` over the types of `registry`
    #[must_use]
    pub fn new(registry: Arc<MemberRegistry>, family: RuntimeFamily) -> Self {
        EmulatedProbe {
            family,
            runtime: Mutex::new(Runtime::new(registry, family)),
        }
    }
}

impl RuntimeProbe for EmulatedProbe {
    fn family(&self) -> RuntimeFamily {
        self.family
    }

    fn measure_box_payload_offset(&self, value_type: Token) -> Result<i32> {
        let mut runtime = self
            .runtime
            .lock()
            .map_err(|_| Error::Layout("probe runtime lock poisoned".to_string()))?;
        runtime
            .measure_box_payload_offset(value_type)
            .map_err(|error| Error::Layout(format!("measuring {value_type}: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        attributes::FieldAttributes,
        builder::{FieldBuilder, TypeBuilder},
    };

    #[test]
    fn payload_offset_matches_the_object_header() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let point = TypeBuilder::new(registry.clone(), "Demo.dll")
            .value_type("Demo", "Point")
            .public()
            .build()?;
        for name in ["x", "y"] {
            FieldBuilder::new(registry.clone(), point.token, name)
                .field_type(registry.core().int64)
                .flags(FieldAttributes::PUBLIC)
                .build()?;
        }

        for family in [RuntimeFamily::CoreClr, RuntimeFamily::Mono] {
            let probe = EmulatedProbe::new(registry.clone(), family);
            let expected = i32::try_from(family.object_header_size()).unwrap_or(i32::MAX);
            assert_eq!(probe.measure_box_payload_offset(point.token)?, expected);
            assert_eq!(
                probe.measure_box_payload_offset(registry.core().int32)?,
                expected
            );
        }
        Ok(())
    }

    #[test]
    fn reference_types_cannot_be_measured() -> Result<()> {
        let registry = Arc::new(MemberRegistry::new());
        let probe = EmulatedProbe::new(registry.clone(), RuntimeFamily::CoreClr);
        assert!(matches!(
            probe.measure_box_payload_offset(registry.core().void),
            Err(Error::Layout(_))
        ));
        Ok(())
    }
}
