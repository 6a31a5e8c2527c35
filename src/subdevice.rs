//! One capture node: identity, buffer pool, stream configuration and sink.
//!
//! A [`Subdevice`] is opened during enumeration, configured by the caller with
//! [`set_format`](Subdevice::set_format), started by the owning
//! [`Device`](crate::Device) and torn down on drop. Teardown is best-effort:
//! every failure is logged so sibling subdevices still get cleaned up.

use std::fs;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

use tracing::{debug, error, trace, warn};

use crate::buffer::{BufferPool, SlotState};
use crate::config::BackendConfig;
use crate::error::{OpenFailure, Tolerance, UvcError};
use crate::format::StreamMode;
use crate::frame::{Frame, FrameSink};
use crate::node::{describe_adjustment, CaptureNode};
use crate::registry::{self, NodeIdentity, UsbLocation};
use crate::v4l2::V4l2Node;

/// Buffer and control settings copied from the [`BackendConfig`].
#[derive(Debug, Clone, Copy)]
struct CaptureSettings {
    buffer_count: u32,
    min_buffers: u32,
    extension_unit: u8,
}

impl From<&BackendConfig> for CaptureSettings {
    fn from(config: &BackendConfig) -> Self {
        Self {
            buffer_count: config.buffer_count,
            min_buffers: config.min_buffers,
            extension_unit: config.extension_unit,
        }
    }
}

/// A capture node belonging to a [`Device`](crate::Device).
pub struct Subdevice {
    identity: NodeIdentity,
    node: Box<dyn CaptureNode>,
    pool: BufferPool,
    mode: Option<StreamMode>,
    negotiated: Option<StreamMode>,
    sink: Option<Box<dyn FrameSink>>,
    settings: CaptureSettings,
    /// `VIDIOC_STREAMON` succeeded and no stream-off has happened since.
    streaming: bool,
    /// `start_capture` completed and the capture has not been stopped.
    capturing: bool,
}

impl Subdevice {
    /// Open registry entry `name` (`/dev/<name>`) and validate it.
    pub fn open(name: &str, config: &BackendConfig) -> Result<Self, UvcError> {
        let path = config.device_root.join(name);
        let fail = |reason: OpenFailure| UvcError::DeviceOpen {
            path: path.clone(),
            reason,
        };

        let metadata = fs::metadata(&path).map_err(|e| fail(OpenFailure::Stat(e)))?;
        if !metadata.file_type().is_char_device() {
            return Err(fail(OpenFailure::NotCharDevice));
        }

        let identity = registry::read_identity(config, name).map_err(|e| fail(e.into()))?;
        let node = V4l2Node::open(&path).map_err(|e| fail(OpenFailure::Open(e)))?;

        Self::from_node(identity, Box::new(node), config)
    }

    /// Wrap an already-open node, checking its capabilities.
    ///
    /// On failure the node is dropped, so nothing half-constructed survives.
    pub fn from_node(
        identity: NodeIdentity,
        node: Box<dyn CaptureNode>,
        config: &BackendConfig,
    ) -> Result<Self, UvcError> {
        let fail = |reason: OpenFailure| UvcError::DeviceOpen {
            path: identity.path.clone(),
            reason,
        };

        let caps = node.query_capabilities().map_err(|e| {
            if e.raw_os_error() == Some(libc::EINVAL) {
                fail(OpenFailure::NotV4l2)
            } else {
                fail(OpenFailure::QueryCapabilities(e))
            }
        })?;
        if !caps.can_capture {
            return Err(fail(OpenFailure::NoCapture));
        }
        if !caps.can_stream {
            return Err(fail(OpenFailure::NoStreaming));
        }

        if let Err(err) = node.reset_crop() {
            if !Tolerance::CropReset.tolerates(&err) {
                return Err(fail(OpenFailure::ResetCrop(err)));
            }
            trace!(path = %identity.path.display(), error = %err, "crop reset ignored");
        }

        debug!(
            path = %identity.path.display(),
            driver = %caps.driver,
            card = %caps.card,
            "opened capture node"
        );

        Ok(Self {
            identity,
            node,
            pool: BufferPool::default(),
            mode: None,
            negotiated: None,
            sink: None,
            settings: CaptureSettings::from(config),
            streaming: false,
            capturing: false,
        })
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn path(&self) -> &Path {
        &self.identity.path
    }

    pub fn vendor_id(&self) -> u16 {
        self.identity.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.identity.product_id
    }

    /// USB interface index of this node.
    pub fn interface(&self) -> u8 {
        self.identity.interface
    }

    pub fn location(&self) -> Option<UsbLocation> {
        self.identity.location
    }

    /// The mode requested with [`set_format`](Self::set_format).
    pub fn mode(&self) -> Option<StreamMode> {
        self.mode
    }

    /// The mode the driver granted during the last `start_capture`. Width and
    /// height may differ from the request.
    pub fn negotiated_mode(&self) -> Option<StreamMode> {
        self.negotiated
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Number of buffers currently mapped.
    pub fn mapped_buffers(&self) -> usize {
        self.pool.len()
    }

    pub(crate) fn node(&self) -> &dyn CaptureNode {
        self.node.as_ref()
    }

    pub(crate) fn extension_unit(&self) -> u8 {
        self.settings.extension_unit
    }

    pub(crate) fn raw_fd(&self) -> RawFd {
        self.node.raw_fd()
    }

    /// Configure the stream and register the frame sink.
    ///
    /// Nothing touches the hardware until `start_capture`. May be called
    /// again to replace the configuration, but not while capturing.
    pub fn set_format<S>(&mut self, mode: StreamMode, sink: S) -> Result<(), UvcError>
    where
        S: FrameSink + 'static,
    {
        if self.capturing {
            return Err(UvcError::CaptureActive {
                path: self.identity.path.clone(),
            });
        }
        self.mode = Some(mode);
        self.sink = Some(Box::new(sink));
        Ok(())
    }

    /// Negotiate the format, map the buffer pool, queue every buffer and turn
    /// streaming on.
    ///
    /// On failure, whatever was mapped stays in the pool and is released by
    /// [`stop_capture`](Self::stop_capture) or on drop.
    pub fn start_capture(&mut self) -> Result<(), UvcError> {
        if self.capturing {
            return Err(UvcError::CaptureActive {
                path: self.identity.path.clone(),
            });
        }
        let mode = self.mode.ok_or_else(|| UvcError::NotConfigured {
            path: self.identity.path.clone(),
        })?;

        // Leftovers from an earlier failed start.
        if self.pool.is_requested() || !self.pool.is_empty() {
            self.stop_capture();
        }

        let path = self.identity.path.clone();
        let fail = |operation: &'static str, source: io::Error| UvcError::CaptureStart {
            path: path.clone(),
            operation,
            source,
        };

        let granted = self
            .node
            .set_format(&mode)
            .map_err(|e| fail("VIDIOC_S_FMT", e))?;
        if let Some(adjusted) = describe_adjustment(&mode, &granted) {
            debug!(path = %path.display(), "driver adjusted format to {adjusted}");
        }
        self.negotiated = Some(granted);

        if mode.fps > 0 {
            self.node
                .set_frame_rate(mode.fps)
                .map_err(|e| fail("VIDIOC_S_PARM", e))?;
        }

        let count = self
            .node
            .request_buffers(self.settings.buffer_count)
            .map_err(|e| fail("VIDIOC_REQBUFS", e))?;
        self.pool.mark_requested();
        if count < self.settings.min_buffers {
            return Err(UvcError::InsufficientBuffers {
                path: path.clone(),
                granted: count,
                required: self.settings.min_buffers,
            });
        }

        for index in 0..count {
            let info = self
                .node
                .query_buffer(index)
                .map_err(|e| fail("VIDIOC_QUERYBUF", e))?;
            let buffer = self.node.map_buffer(&info).map_err(|e| fail("mmap", e))?;
            self.pool.push(buffer);
        }

        for index in 0..count {
            self.node
                .queue_buffer(index)
                .map_err(|e| fail("VIDIOC_QBUF", e))?;
            self.pool.set_state(index as usize, SlotState::Queued);
        }

        self.node
            .stream_on()
            .map_err(|e| fail("VIDIOC_STREAMON", e))?;
        self.streaming = true;
        self.capturing = true;

        debug!(path = %path.display(), buffers = count, mode = %granted, "capture started");
        Ok(())
    }

    /// Stream off, unmap every buffer and release the pool. Never fails;
    /// problems are logged.
    pub fn stop_capture(&mut self) {
        let path = self.identity.path.display();

        if let Err(err) = self.node.stream_off() {
            if self.streaming {
                warn!(path = %path, error = %err, "VIDIOC_STREAMOFF failed");
            } else {
                debug!(path = %path, error = %err, "VIDIOC_STREAMOFF on a node that never started");
            }
        }
        self.streaming = false;
        self.capturing = false;

        let requested = self.pool.is_requested();
        for (slot, buffer) in self.pool.drain().into_iter().enumerate() {
            if let Err(err) = self.node.unmap_buffer(buffer) {
                warn!(path = %path, slot, error = %err, "munmap failed");
            }
        }

        // Requesting zero buffers hands the (now unmapped) pool back to the driver.
        if let Err(err) = self.node.request_buffers(0) {
            if requested {
                error!(path = %path, error = %err, "releasing buffer pool failed");
            } else {
                debug!(path = %path, error = %err, "VIDIOC_REQBUFS(0) on an idle node");
            }
        }
    }

    /// Dequeue one completed buffer, hand it to the sink and re-queue it.
    ///
    /// Returns `Ok(false)` when the driver had nothing ready.
    pub(crate) fn dispatch_ready(&mut self) -> Result<bool, UvcError> {
        let dequeued = match self.node.dequeue_buffer() {
            Ok(dequeued) => dequeued,
            Err(err) if Tolerance::Dequeue.tolerates(&err) => return Ok(false),
            Err(source) => {
                return Err(UvcError::Poll {
                    operation: "VIDIOC_DQBUF",
                    source,
                });
            }
        };

        let slot = dequeued.index as usize;
        let state = self.pool.state(slot);
        if state != Some(SlotState::Queued) {
            return Err(UvcError::Poll {
                operation: "VIDIOC_DQBUF",
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("driver returned slot {slot} in state {state:?}"),
                ),
            });
        }
        self.pool.set_state(slot, SlotState::Leased);

        if let (Some(sink), Some(buffer)) = (self.sink.as_mut(), self.pool.get(slot)) {
            let bytes_used = dequeued.bytes_used as usize;
            let frame = Frame {
                data: buffer.filled(bytes_used),
                bytes_used,
                slot,
                sequence: dequeued.sequence,
                timestamp: dequeued.timestamp,
            };
            sink.on_frame(&frame);
        }

        self.node
            .queue_buffer(dequeued.index)
            .map_err(|source| UvcError::Poll {
                operation: "VIDIOC_QBUF",
                source,
            })?;
        self.pool.set_state(slot, SlotState::Queued);
        Ok(true)
    }
}

impl Drop for Subdevice {
    fn drop(&mut self) {
        self.stop_capture();
        debug!(path = %self.identity.path.display(), "closing capture node");
        if let Err(err) = self.node.close() {
            warn!(path = %self.identity.path.display(), error = %err, "close failed");
        }
    }
}

impl std::fmt::Debug for Subdevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subdevice")
            .field("identity", &self.identity)
            .field("mode", &self.mode)
            .field("negotiated", &self.negotiated)
            .field("buffers", &self.pool.len())
            .field("capturing", &self.capturing)
            .finish_non_exhaustive()
    }
}
