//! Flat simulated address space.
//!
//! Objects, locals, arguments and statics all live in one contiguous, bump-allocated byte
//! region starting at [`AddressSpace::BASE`]. Nothing is ever freed and nothing moves, so
//! every object is implicitly pinned and addresses taken by generated code stay valid for the
//! lifetime of the runtime.

use crate::{emulation::EmulationError, Result};

/// Alignment of every allocation
const ALIGNMENT: u64 = 8;

/// Bump-allocated byte region.
#[derive(Debug, Default)]
pub struct AddressSpace {
    bytes: Vec<u8>,
}

impl AddressSpace {
    /// Address of the first allocation; lower addresses are never valid
    pub const BASE: u64 = 0x1000;

    /// Creates an empty address space
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates `size` zeroed bytes and returns their address
    pub fn allocate(&mut self, size: usize) -> u64 {
        let address = Self::BASE + self.bytes.len() as u64;
        let padded = (size as u64).div_ceil(ALIGNMENT).max(1) * ALIGNMENT;
        #[allow(clippy::cast_possible_truncation)]
        self.bytes.resize(self.bytes.len() + padded as usize, 0);
        address
    }

    /// Bytes allocated so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true before the first allocation
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, address: u64, size: usize) -> Result<std::ops::Range<usize>> {
        let invalid = || EmulationError::InvalidAddress { address, size };
        let start = address
            .checked_sub(Self::BASE)
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or_else(invalid)?;
        let end = start.checked_add(size).ok_or_else(invalid)?;
        if end > self.bytes.len() {
            return Err(invalid().into());
        }
        Ok(start..end)
    }

    /// Reads `size` bytes.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidAddress`] outside the allocated region.
    pub fn read(&self, address: u64, size: usize) -> Result<&[u8]> {
        let range = self.range(address, size)?;
        Ok(&self.bytes[range])
    }

    /// Writes `data` at `address`.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidAddress`] outside the allocated region.
    pub fn write(&mut self, address: u64, data: &[u8]) -> Result<()> {
        let range = self.range(address, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Zeroes `size` bytes at `address`.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidAddress`] outside the allocated region.
    pub fn zero(&mut self, address: u64, size: usize) -> Result<()> {
        let range = self.range(address, size)?;
        self.bytes[range].fill(0);
        Ok(())
    }

    /// Copies `size` bytes between two addresses.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidAddress`] if either range is outside the region.
    pub fn copy(&mut self, from: u64, to: u64, size: usize) -> Result<()> {
        let source = self.range(from, size)?;
        let target = self.range(to, size)?;
        self.bytes.copy_within(source, target.start);
        Ok(())
    }

    /// Reads a little-endian `u64`.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidAddress`] outside the allocated region.
    pub fn read_u64(&self, address: u64) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.read(address, 8)?);
        Ok(u64::from_le_bytes(raw))
    }

    /// Writes a little-endian `u64`.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidAddress`] outside the allocated region.
    pub fn write_u64(&mut self, address: u64, value: u64) -> Result<()> {
        self.write(address, &value.to_le_bytes())
    }

    /// Reads a little-endian `i32`.
    ///
    /// # Errors
    /// Returns [`EmulationError::InvalidAddress`] outside the allocated region.
    pub fn read_i32(&self, address: u64) -> Result<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.read(address, 4)?);
        Ok(i32::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn allocations_are_aligned_and_zeroed() -> Result<()> {
        let mut memory = AddressSpace::new();
        let a = memory.allocate(3);
        let b = memory.allocate(8);
        assert_eq!(a, AddressSpace::BASE);
        assert_eq!(b, AddressSpace::BASE + 8);
        assert_eq!(memory.read(b, 8)?, &[0; 8]);

        memory.write_u64(b, 0xDEAD_BEEF)?;
        assert_eq!(memory.read_u64(b)?, 0xDEAD_BEEF);
        memory.copy(b, a, 4)?;
        assert_eq!(memory.read_i32(a)?, 0xDEAD_BEEF_u32 as i32);
        Ok(())
    }

    #[test]
    fn out_of_range_access_faults() {
        let mut memory = AddressSpace::new();
        let a = memory.allocate(8);
        assert!(matches!(
            memory.read(a + 4, 8),
            Err(Error::Emulation(EmulationError::InvalidAddress { .. }))
        ));
        assert!(memory.read(0, 1).is_err());
    }
}
