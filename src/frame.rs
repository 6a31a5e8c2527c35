//! Frames handed to consumers and the sink they are delivered to.

use std::time::Duration;

/// A completed frame, borrowed from the subdevice's buffer pool.
///
/// The borrow ends when the sink returns; the slot is re-queued to the kernel
/// immediately afterwards, so data must be copied out if it is needed later.
#[derive(Debug)]
pub struct Frame<'a> {
    /// The used part of the buffer (`bytes_used` bytes).
    pub data: &'a [u8],
    /// Kernel-reported used-byte count.
    pub bytes_used: usize,
    /// Buffer pool slot the frame was captured into.
    pub slot: usize,
    /// Driver frame sequence number.
    pub sequence: u32,
    /// Driver capture timestamp.
    pub timestamp: Duration,
}

/// Receiver of frames from one subdevice.
///
/// Called synchronously on the device's streaming thread, once per completed
/// frame. Implementations must return promptly and must not call back into
/// `start_streaming`/`stop_streaming` on the owning device.
pub trait FrameSink: Send {
    fn on_frame(&mut self, frame: &Frame<'_>);
}

impl<F> FrameSink for F
where
    F: FnMut(&Frame<'_>) + Send,
{
    fn on_frame(&mut self, frame: &Frame<'_>) {
        self(frame)
    }
}
