//! Per-borrow registry of host-owned buffers addressed by `i32` handles.
//!
//! A handle packs a 15-bit generation into the upper half and the 1-based
//! slot index into the lower half. The generation changes every time the
//! table is reset, which happens when the owning context goes back to the
//! pool, so a handle minted during one borrow is rejected in any later one.

use crate::error::{Result, SandboxError};
use bytes::Bytes;

/// Maximum number of live buffers per context.
pub const MAX_HANDLES: usize = 4096;

const GENERATION_MASK: u16 = 0x7fff;
const INDEX_MASK: i32 = 0xffff;

/// A buffer stored under a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    /// Raw message bytes.
    pub bytes: Bytes,
    /// Message type the host encoded, `None` for buffers the guest registered.
    pub message_type: Option<&'static str>,
}

/// Handle registry for one execution context.
#[derive(Debug)]
pub struct HandleTable {
    generation: u16,
    slots: Vec<Option<Buffer>>,
    free: Vec<usize>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Creates an empty table at generation 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            generation: 1,
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `buffer` and returns its handle.
    ///
    /// # Errors
    ///
    /// Returns a call failed error when [`MAX_HANDLES`] buffers are live.
    pub fn insert(&mut self, buffer: Buffer) -> Result<i32> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < MAX_HANDLES => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => {
                return Err(SandboxError::call_failed(
                    "interop.registerBuffer",
                    format!("more than {MAX_HANDLES} live buffers"),
                ))
            }
        };
        self.slots[index] = Some(buffer);
        Ok(self.encode(index))
    }

    /// Returns the buffer behind `handle` without consuming it.
    ///
    /// # Errors
    ///
    /// Returns a stale handle error for handles from another borrow,
    /// discarded handles, and values that were never handles.
    pub fn resolve(&self, handle: i32) -> Result<&Buffer> {
        let index = self.decode(handle)?;
        self.slots
            .get(index)
            .and_then(Option::as_ref)
            .ok_or_else(|| SandboxError::stale_handle(handle))
    }

    /// Drops the buffer behind `handle`. Returns false if it was not live.
    pub fn discard(&mut self, handle: i32) -> bool {
        let Ok(index) = self.decode(handle) else {
            return false;
        };
        match self.slots.get_mut(index).and_then(Option::take) {
            Some(_) => {
                self.free.push(index);
                true
            }
            None => false,
        }
    }

    /// Drops every buffer and advances the generation.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.generation = match self.generation.wrapping_add(1) & GENERATION_MASK {
            0 => 1,
            next => next,
        };
    }

    /// Number of live buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Returns true if no buffers are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(&self, index: usize) -> i32 {
        // index < MAX_HANDLES and generation <= 0x7fff, so this stays positive.
        (i32::from(self.generation) << 16) | (index as i32 + 1)
    }

    fn decode(&self, handle: i32) -> Result<usize> {
        if handle <= 0 {
            return Err(SandboxError::stale_handle(handle));
        }
        let generation = (handle >> 16) as u16;
        let index = (handle & INDEX_MASK) as usize;
        if generation != self.generation || index == 0 {
            return Err(SandboxError::stale_handle(handle));
        }
        Ok(index - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(data: &'static [u8]) -> Buffer {
        Buffer {
            bytes: Bytes::from_static(data),
            message_type: None,
        }
    }

    #[test]
    fn resolve_twice_returns_same_content() {
        let mut table = HandleTable::new();
        let handle = table.insert(buffer(b"payload")).unwrap();
        let first = table.resolve(handle).unwrap().clone();
        let second = table.resolve(handle).unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(&first.bytes[..], b"payload");
    }

    #[test]
    fn handle_is_rejected_after_reset() {
        let mut table = HandleTable::new();
        let handle = table.insert(buffer(b"x")).unwrap();
        table.reset();
        let err = table.resolve(handle).unwrap_err();
        assert!(err.is_invalid_argument());

        // The slot index is reused in the new generation, but the old handle
        // still must not reach it.
        let fresh = table.insert(buffer(b"y")).unwrap();
        assert_ne!(fresh, handle);
        assert!(table.resolve(handle).is_err());
        assert_eq!(&table.resolve(fresh).unwrap().bytes[..], b"y");
    }

    #[test]
    fn discard_frees_slot() {
        let mut table = HandleTable::new();
        let handle = table.insert(buffer(b"x")).unwrap();
        assert!(table.discard(handle));
        assert!(!table.discard(handle));
        assert!(table.resolve(handle).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn garbage_handles_are_rejected() {
        let table = HandleTable::new();
        assert!(table.resolve(0).is_err());
        assert!(table.resolve(-5).is_err());
        assert!(table.resolve(1 << 16).is_err());
    }

    #[test]
    fn table_is_bounded() {
        let mut table = HandleTable::new();
        for _ in 0..MAX_HANDLES {
            table.insert(buffer(b"x")).unwrap();
        }
        assert!(table.insert(buffer(b"x")).is_err());
    }

    #[test]
    fn generation_skips_zero_on_wrap() {
        let mut table = HandleTable::new();
        for _ in 0..GENERATION_MASK {
            table.reset();
        }
        assert_eq!(table.generation, 1);
        let handle = table.insert(buffer(b"x")).unwrap();
        assert!(handle > 0);
    }
}
