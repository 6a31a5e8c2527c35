//! Memory-mapped capture buffers and the per-subdevice pool that owns them.
//!
//! A [`Buffer`] has no `Drop` impl: it is released exactly once by handing it
//! back to the [`CaptureNode`](crate::CaptureNode) that mapped it, which the
//! owning [`Subdevice`](crate::Subdevice) does on every exit path.

use std::ptr::NonNull;

/// One mapped region backing a kernel buffer slot.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is exclusively owned by one pool, which only reads it
// through `&self` and hands it back to its node for release.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Wrap a mapped region.
    ///
    /// # Safety
    ///
    /// `ptr` must point to `len` readable bytes that stay valid until the
    /// buffer is passed back to the node that created it.
    pub unsafe fn from_raw_parts(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The first `used` bytes of the mapping (clamped to its length).
    pub(crate) fn filled(&self, used: usize) -> &[u8] {
        let used = used.min(self.len);
        // SAFETY: `used` is clamped to the mapped length, and the region stays
        // mapped for as long as `self` is borrowed.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), used) }
    }
}

/// Where a slot currently is in the capture cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotState {
    /// Mapped but not yet handed to the kernel.
    Idle,
    /// Owned by the kernel; user code must not read it.
    Queued,
    /// Dequeued and being delivered to the sink.
    Leased,
}

#[derive(Debug)]
struct Slot {
    buffer: Buffer,
    state: SlotState,
}

/// Arena of mapped buffers for one capture stream, indexed by kernel slot.
#[derive(Debug, Default)]
pub struct BufferPool {
    slots: Vec<Slot>,
    /// Buffers were requested from the driver and must be released.
    requested: bool,
}

impl BufferPool {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.requested
    }

    pub(crate) fn mark_requested(&mut self) {
        self.requested = true;
    }

    /// Add the buffer for the next slot index.
    pub(crate) fn push(&mut self, buffer: Buffer) {
        self.slots.push(Slot { buffer, state: SlotState::Idle });
    }

    pub(crate) fn get(&self, index: usize) -> Option<&Buffer> {
        self.slots.get(index).map(|slot| &slot.buffer)
    }

    pub(crate) fn state(&self, index: usize) -> Option<SlotState> {
        self.slots.get(index).map(|slot| slot.state)
    }

    pub(crate) fn set_state(&mut self, index: usize, state: SlotState) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.state = state;
        }
    }

    /// Remove every buffer from the pool for unmapping and forget the request.
    pub(crate) fn drain(&mut self) -> Vec<Buffer> {
        self.requested = false;
        self.slots.drain(..).map(|slot| slot.buffer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaked(len: usize) -> Buffer {
        let raw = Box::into_raw(vec![7u8; len].into_boxed_slice()) as *mut u8;
        // SAFETY: leaked boxed slice of `len` bytes, reclaimed by `reclaim`.
        unsafe { Buffer::from_raw_parts(NonNull::new(raw).unwrap(), len) }
    }

    fn reclaim(buffer: Buffer) {
        let slice = std::ptr::slice_from_raw_parts_mut(buffer.as_ptr(), buffer.len());
        // SAFETY: the slice was leaked by `leaked`.
        drop(unsafe { Box::from_raw(slice) });
    }

    #[test]
    fn filled_clamps_to_mapping() {
        let buffer = leaked(8);
        assert_eq!(buffer.filled(4), &[7, 7, 7, 7]);
        assert_eq!(buffer.filled(100).len(), 8);
        reclaim(buffer);
    }

    #[test]
    fn drain_empties_pool_and_clears_request() {
        let mut pool = BufferPool::default();
        pool.mark_requested();
        pool.push(leaked(4));
        pool.push(leaked(4));
        pool.set_state(1, SlotState::Queued);
        assert_eq!(pool.state(0), Some(SlotState::Idle));
        assert_eq!(pool.state(1), Some(SlotState::Queued));
        assert_eq!(pool.state(2), None);

        let buffers = pool.drain();
        assert_eq!(buffers.len(), 2);
        assert!(pool.is_empty());
        assert!(!pool.is_requested());
        buffers.into_iter().for_each(reclaim);
    }
}
