//! UVC camera capture backend for Linux.
//!
//! Discovers capture nodes through the video4linux registry, groups them into
//! physical USB devices, streams frames from memory-mapped V4L2 buffers on a
//! background thread and exposes the device's control plane (UVC
//! extension-unit queries, interface claims, bulk transfers over libusb).
//!
//! # Quick Start
//!
//! ```no_run
//! use uvc_v4l2::{Context, FourCc, Frame, StreamMode};
//!
//! let context = Context::new()?;
//! let mut devices = context.query_devices()?;
//! let device = devices.first_mut().ok_or("no camera")?;
//!
//! device.set_subdevice_mode(0, StreamMode::new(640, 480, FourCc::YUYV, 30), |frame: &Frame<'_>| {
//!     println!("frame {} ({} bytes)", frame.sequence, frame.bytes_used);
//! })?;
//! device.start_streaming()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! device.stop_streaming()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod buffer;
mod config;
mod context;
mod device;
mod error;
mod format;
mod frame;
mod grouping;
#[cfg(test)]
mod mock;
mod node;
mod poll;
mod protocol;
mod registry;
mod subdevice;
mod uvc;
mod v4l2;

pub use buffer::Buffer;
pub use config::BackendConfig;
pub use context::Context;
pub use device::Device;
pub use error::{MetadataError, OpenFailure, Tolerance, UvcError};
pub use format::{FourCc, ParseFourCcError, StreamMode};
pub use frame::{Frame, FrameSink};
pub use grouping::{UsbIdentity, check_contiguous, group_by_interface};
pub use node::{BufferInfo, Capabilities, CaptureNode, Dequeued};
pub use poll::{SharedSubdevice, poll};
pub use registry::{NodeIdentity, UsbLocation, list_nodes, parse_interface_number, parse_modalias, read_identity};
pub use subdevice::Subdevice;
pub use v4l2::V4l2Node;
