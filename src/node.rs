//! The kernel capture control protocol, as seen by a [`Subdevice`](crate::Subdevice).
//!
//! [`V4l2Node`](crate::V4l2Node) implements it over a real `/dev/videoN`
//! file descriptor; other backends (and the test mock) implement the same
//! contract. Every method returns the raw OS error so the caller can apply
//! its [`Tolerance`](crate::Tolerance) policy.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::buffer::Buffer;
use crate::format::StreamMode;

/// Capability flags reported by the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub driver: String,
    pub card: String,
    pub bus_info: String,
    pub can_capture: bool,
    pub can_stream: bool,
}

/// Geometry and offset of one driver buffer, from `VIDIOC_QUERYBUF`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    pub length: u32,
    pub offset: u32,
}

/// A buffer the driver has finished filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    pub timestamp: Duration,
}

/// Operations on one capture node.
pub trait CaptureNode: Send {
    /// File descriptor to wait on for readiness.
    fn raw_fd(&self) -> RawFd;

    fn query_capabilities(&self) -> io::Result<Capabilities>;

    /// Reset the crop rectangle to the driver's default.
    fn reset_crop(&self) -> io::Result<()>;

    /// Negotiate the pixel format; returns what the driver granted.
    fn set_format(&self, mode: &StreamMode) -> io::Result<StreamMode>;

    /// Request a frame interval of `1/fps`.
    fn set_frame_rate(&self, fps: u32) -> io::Result<()>;

    /// Request `count` mmap buffers (0 releases them); returns the granted count.
    fn request_buffers(&self, count: u32) -> io::Result<u32>;

    fn query_buffer(&self, index: u32) -> io::Result<BufferInfo>;

    fn map_buffer(&self, info: &BufferInfo) -> io::Result<Buffer>;

    /// Release a mapping created by [`map_buffer`](Self::map_buffer).
    fn unmap_buffer(&self, buffer: Buffer) -> io::Result<()>;

    fn queue_buffer(&self, index: u32) -> io::Result<()>;

    /// Dequeue a filled buffer; `WouldBlock` when none is ready.
    fn dequeue_buffer(&self) -> io::Result<Dequeued>;

    fn stream_on(&self) -> io::Result<()>;

    fn stream_off(&self) -> io::Result<()>;

    /// Issue a UVC extension-unit query (`UVC_GET_CUR` / `UVC_SET_CUR`).
    fn xu_query(&self, unit: u8, selector: u8, query: u8, data: &mut [u8]) -> io::Result<()>;

    /// Read a standard (processing-unit) control.
    fn get_control(&self, id: u32) -> io::Result<i32>;

    /// Write a standard (processing-unit) control.
    fn set_control(&self, id: u32, value: i32) -> io::Result<()>;

    /// Close the descriptor. Further calls fail with `EBADF`.
    fn close(&mut self) -> io::Result<()>;
}

/// Describe how the driver adjusted a requested mode, if it did.
pub(crate) fn describe_adjustment(requested: &StreamMode, granted: &StreamMode) -> Option<String> {
    if requested.width == granted.width
        && requested.height == granted.height
        && requested.fourcc == granted.fourcc
    {
        return None;
    }
    Some(format!(
        "{}x{} {} (requested {}x{} {})",
        granted.width,
        granted.height,
        granted.fourcc,
        requested.width,
        requested.height,
        requested.fourcc
    ))
}
