//! Protocol constants for UVC extension units, the sysfs device registry and
//! the capture buffer pool.
//!
//! All magic numbers live here so the rest of the codebase references named
//! constants instead of raw hex. V4L2 enums and request numbers come from the
//! `v4l` crate; the one uvcvideo request it lacks is defined in
//! [`crate::v4l2`].

use std::time::Duration;

// ---------------------------------------------------------------------------
// UVC extension-unit queries (linux/usb/video.h)
// ---------------------------------------------------------------------------

/// SET_CUR request code.
pub const UVC_SET_CUR: u8 = 0x01;
/// GET_CUR request code.
pub const UVC_GET_CUR: u8 = 0x81;
/// Extension unit addressed by control queries unless configured otherwise.
pub const DEFAULT_EXTENSION_UNIT: u8 = 2;

// ---------------------------------------------------------------------------
// Device-metadata registry (sysfs)
// ---------------------------------------------------------------------------

/// Directory listing every registered video4linux node.
pub const DEFAULT_REGISTRY_ROOT: &str = "/sys/class/video4linux";
/// Directory holding the device nodes themselves.
pub const DEFAULT_DEVICE_ROOT: &str = "/dev";
/// USB modalias prefix, followed by 4 hex digits of vendor id.
pub const MODALIAS_PREFIX: &str = "usb:v";
/// Offset of the `p` separating vendor and product ids in a USB modalias.
pub const MODALIAS_PRODUCT_MARKER: usize = 9;
/// Shortest modalias carrying both ids: `usb:vVVVVpPPPP`.
pub const MODALIAS_MIN_LEN: usize = 14;

// ---------------------------------------------------------------------------
// Buffer pool / polling
// ---------------------------------------------------------------------------

/// Number of capture buffers requested from the driver.
pub const DEFAULT_BUFFER_COUNT: u32 = 4;
/// Fewer granted buffers than this cannot sustain streaming.
pub const MIN_BUFFER_COUNT: u32 = 2;
/// Upper bound on a single readiness wait; also bounds stop latency.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// USB
// ---------------------------------------------------------------------------

/// Endpoint address bit marking a device-to-host (IN) endpoint.
pub const USB_ENDPOINT_DIR_IN: u8 = 0x80;
