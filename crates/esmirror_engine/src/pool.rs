//! Recyclable buffer pool for bulk requests.

use crate::error::{MirrorError, MirrorResult};

/// An owned, growable request buffer plus the pool index it came from.
///
/// Exactly one slot is checked out as the active fill target at any time;
/// every other slot is either idle in the pool or handed to the transport
/// for an in-flight request.
#[derive(Debug)]
pub struct BufferSlot {
    /// Index of this slot in its pool.
    pub index: usize,
    /// The buffer itself.
    pub buf: String,
}

/// A fixed arena of reusable buffers addressed through an explicit
/// free-slot stack.
///
/// A pool of `concurrency + 1` slots can always satisfy a checkout while at
/// most `concurrency` requests are in flight, so [`checkout`](Self::checkout)
/// failing indicates a programming error, not an operational condition.
/// Buffers keep their capacity across recycling, so steady-state operation
/// does not allocate.
#[derive(Debug)]
pub struct BufferPool {
    slots: Vec<Option<String>>,
    free: Vec<usize>,
}

impl BufferPool {
    /// Creates a pool of `capacity` idle slots.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Some(String::new())).collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of idle slots.
    #[must_use]
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Checks out an idle slot.
    pub fn checkout(&mut self) -> MirrorResult<BufferSlot> {
        let index = self.free.pop().ok_or(MirrorError::PoolExhausted)?;
        let buf = self.slots[index].take().ok_or(MirrorError::PoolExhausted)?;
        Ok(BufferSlot { index, buf })
    }

    /// Returns a buffer to its slot, clearing it for reuse.
    pub fn release(&mut self, index: usize, mut buf: String) {
        debug_assert!(index < self.slots.len());
        debug_assert!(self.slots[index].is_none(), "slot released twice");
        buf.clear();
        self.slots[index] = Some(buf);
        self.free.push(index);
    }
}
