//! Error types for the capture backend.
//!
//! Construction-time and start-time failures surface as [`UvcError`] so
//! callers can tell a node that failed its capability checks from a USB
//! transport failure or a poll error on the streaming thread. Teardown never
//! returns errors; those paths log instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for all backend operations.
#[derive(Debug, Error)]
pub enum UvcError {
    /// A capture node failed one of the checks performed when it is opened.
    #[error("cannot open {}: {reason}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        reason: OpenFailure,
    },

    /// The device-metadata registry itself could not be read.
    #[error("cannot access {}: {source}", path.display())]
    Registry {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An extension-unit or processing-unit control query failed.
    #[error("control query 0x{control:02x} on {} failed: {source}", path.display())]
    ControlQuery {
        path: PathBuf,
        control: u32,
        #[source]
        source: io::Error,
    },

    /// `start_capture` was called before a stream mode and sink were set.
    #[error("{} has no stream mode configured", path.display())]
    NotConfigured { path: PathBuf },

    /// The subdevice is capturing; its configuration is frozen until it stops.
    #[error("{} is capturing; stop streaming before reconfiguring", path.display())]
    CaptureActive { path: PathBuf },

    /// One of the kernel calls in `start_capture` failed.
    #[error("{operation} on {} failed: {source}", path.display())]
    CaptureStart {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// The driver granted fewer buffers than streaming requires.
    #[error("insufficient buffer memory on {}: granted {granted}, need {required}", path.display())]
    InsufficientBuffers {
        path: PathBuf,
        granted: u32,
        required: u32,
    },

    /// The readiness wait or a dequeue / re-enqueue failed while polling.
    #[error("{operation} failed while polling: {source}")]
    Poll {
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// Claiming a USB interface failed.
    #[error("claiming USB interface {interface} failed: {source}")]
    InterfaceClaim {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    /// A USB bulk transfer failed.
    #[error("bulk transfer on endpoint 0x{endpoint:02x} failed: {source}")]
    Transfer {
        endpoint: u8,
        #[source]
        source: rusb::Error,
    },

    /// A USB/libusb error outside of claims and transfers.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// The registry emitted one physical device's nodes non-contiguously.
    #[error("nodes of USB device {vendor_id:04x}:{product_id:04x} are not contiguous in the registry")]
    NonContiguousGroup { vendor_id: u16, product_id: u16 },

    /// A subdevice index outside of the device's subdevice list.
    #[error("subdevice index {index} out of range (device has {count})")]
    SubdeviceIndex { index: usize, count: usize },

    /// `start_streaming` was called while the streaming thread is running.
    #[error("device is already streaming")]
    StreamingActive,

    /// The streaming thread could not be spawned.
    #[error("cannot spawn streaming thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    /// The streaming thread panicked (usually inside a frame sink).
    #[error("streaming thread panicked")]
    StreamThreadPanicked,
}

impl UvcError {
    /// The OS error code behind a kernel-originated failure, if any.
    pub fn os_error(&self) -> Option<i32> {
        match self {
            Self::ControlQuery { source, .. }
            | Self::CaptureStart { source, .. }
            | Self::Poll { source, .. }
            | Self::Registry { source, .. }
            | Self::ThreadSpawn(source) => source.raw_os_error(),
            Self::DeviceOpen { reason, .. } => reason.os_error(),
            _ => None,
        }
    }
}

/// Why a capture node could not be turned into a subdevice.
#[derive(Debug, Error)]
pub enum OpenFailure {
    #[error("cannot identify node: {0}")]
    Stat(#[source] io::Error),

    #[error("not a character device")]
    NotCharDevice,

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("cannot open node: {0}")]
    Open(#[source] io::Error),

    #[error("not a V4L2 device")]
    NotV4l2,

    #[error("VIDIOC_QUERYCAP failed: {0}")]
    QueryCapabilities(#[source] io::Error),

    #[error("VIDIOC_S_CROP failed: {0}")]
    ResetCrop(#[source] io::Error),

    #[error("not a video capture device")]
    NoCapture,

    #[error("does not support streaming I/O")]
    NoStreaming,
}

impl OpenFailure {
    fn os_error(&self) -> Option<i32> {
        match self {
            Self::Stat(e) | Self::Open(e) | Self::QueryCapabilities(e) | Self::ResetCrop(e) => {
                e.raw_os_error()
            }
            Self::Metadata(MetadataError::Read { source, .. }) => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Failures reading a node's identity from the device-metadata registry.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("not a usb format modalias: {0:?}")]
    NotUsb(String),

    #[error("failed to read vendor ID from {0:?}")]
    VendorId(String),

    #[error("failed to read product ID from {0:?}")]
    ProductId(String),

    #[error("failed to read interface number from {0:?}")]
    InterfaceNumber(String),
}

/// Which kernel failures count as normal control flow at a given call site.
///
/// Everything not tolerated here is fatal to the call that hit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tolerance {
    /// Resetting the crop rectangle: many devices do not implement cropping,
    /// so every failure is ignored.
    CropReset,
    /// Dequeueing a buffer: `EAGAIN` means no frame is ready yet.
    Dequeue,
    /// Waiting for readiness: `EINTR` means nothing is ready this round.
    Wait,
}

impl Tolerance {
    /// Returns `true` if `err` is expected at this call site.
    pub fn tolerates(self, err: &io::Error) -> bool {
        match self {
            Self::CropReset => true,
            Self::Dequeue => err.kind() == io::ErrorKind::WouldBlock,
            Self::Wait => err.kind() == io::ErrorKind::Interrupted,
        }
    }
}
