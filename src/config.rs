//! Backend configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::*;

/// Immutable settings shared by a [`Context`](crate::Context) and every
/// subdevice it enumerates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Directory of registered video4linux nodes (sysfs class directory).
    pub registry_root: PathBuf,
    /// Directory holding the device nodes.
    pub device_root: PathBuf,
    /// Buffers requested from the driver by `start_capture`.
    pub buffer_count: u32,
    /// Minimum number of granted buffers needed to stream.
    pub min_buffers: u32,
    /// Upper bound on a single readiness wait in the streaming thread.
    pub poll_timeout: Duration,
    /// UVC extension unit id addressed by control queries.
    pub extension_unit: u8,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            registry_root: PathBuf::from(DEFAULT_REGISTRY_ROOT),
            device_root: PathBuf::from(DEFAULT_DEVICE_ROOT),
            buffer_count: DEFAULT_BUFFER_COUNT,
            min_buffers: MIN_BUFFER_COUNT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            extension_unit: DEFAULT_EXTENSION_UNIT,
        }
    }
}

impl BackendConfig {
    #[must_use]
    pub fn with_registry_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.registry_root = root.into();
        self
    }

    #[must_use]
    pub fn with_device_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.device_root = root.into();
        self
    }

    /// Set the requested buffer count. Values below `min_buffers` are kept
    /// as-is; the driver decides what it grants.
    #[must_use]
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    #[must_use]
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_extension_unit(mut self, unit: u8) -> Self {
        self.extension_unit = unit;
        self
    }
}
