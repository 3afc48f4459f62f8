//! Batch-scoped scratch memory for decoded delta payloads.
//!
//! Allocations return [`ScratchSlice`] handles rather than references. A
//! handle is only valid until the next [`ScratchRegion::reset`]; after that,
//! [`ScratchRegion::get`] returns `None` for it. Anything that must outlive a
//! batch has to be copied out first.

use crate::error::ToolError;

pub const DEFAULT_SCRATCH_BYTES: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchSlice {
    generation: u64,
    offset: u32,
    len: u32,
}

impl ScratchSlice {
    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Bump allocator over a single reusable buffer.
pub struct ScratchRegion {
    buf: Vec<u8>,
    generation: u64,
    high_water: usize,
}

impl ScratchRegion {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SCRATCH_BYTES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            generation: 0,
            high_water: 0,
        }
    }

    /// Copies `bytes` into the region.
    pub fn alloc(&mut self, bytes: &[u8]) -> Result<ScratchSlice, ToolError> {
        let offset = self.buf.len();
        let end = offset.saturating_add(bytes.len());
        let (Ok(offset), Ok(len), Ok(_)) = (
            u32::try_from(offset),
            u32::try_from(bytes.len()),
            u32::try_from(end),
        ) else {
            return Err(ToolError::Encode(format!(
                "scratch region exhausted: {end} bytes in one batch"
            )));
        };
        self.buf.extend_from_slice(bytes);
        self.high_water = self.high_water.max(self.buf.len());
        Ok(ScratchSlice {
            generation: self.generation,
            offset,
            len,
        })
    }

    /// Bytes behind `slice`, or `None` if the region was reset since it was
    /// allocated.
    pub fn get(&self, slice: ScratchSlice) -> Option<&[u8]> {
        if slice.generation != self.generation {
            return None;
        }
        let start = slice.offset as usize;
        self.buf.get(start..start + slice.len as usize)
    }

    /// Drops every allocation while keeping the buffer's capacity.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn used(&self) -> usize {
        self.buf.len()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

impl Default for ScratchRegion {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScratchRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchRegion")
            .field("used", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::ScratchRegion;

    #[test]
    fn copied_output_survives_reset() {
        let mut scratch = ScratchRegion::with_capacity(16);
        let first = scratch.alloc(b"first batch payload").expect("alloc");
        let copied = scratch.get(first).expect("live").to_vec();
        scratch.reset();
        let second = scratch.alloc(b"second").expect("alloc");
        assert_eq!(copied, b"first batch payload");
        assert_eq!(scratch.get(second), Some(&b"second"[..]));
    }

    #[test]
    fn stale_handles_are_rejected_after_reset() {
        let mut scratch = ScratchRegion::new();
        let slice = scratch.alloc(b"abc").expect("alloc");
        scratch.reset();
        scratch.alloc(b"xyz").expect("alloc");
        assert_eq!(scratch.get(slice), None);
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut scratch = ScratchRegion::with_capacity(4);
        scratch.alloc(&[0u8; 4096]).expect("alloc");
        let cap = scratch.capacity();
        scratch.reset();
        assert_eq!(scratch.used(), 0);
        assert_eq!(scratch.capacity(), cap);
        assert_eq!(scratch.high_water(), 4096);
    }
}
