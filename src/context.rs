//! Backend root: configuration, the USB library session and enumeration.

use std::sync::Arc;

use tracing::debug;

use crate::config::BackendConfig;
use crate::device::Device;
use crate::error::UvcError;
use crate::grouping::{check_contiguous, group_by_interface};
use crate::registry;
use crate::subdevice::Subdevice;

/// Shared root of the backend.
///
/// Every [`Device`] keeps the context alive, so the USB session outlives all
/// handles opened through it.
pub struct Context {
    config: BackendConfig,
    usb: Option<rusb::Context>,
}

impl Context {
    /// Initialize the backend with the default configuration.
    pub fn new() -> Result<Arc<Self>, UvcError> {
        Self::with_config(BackendConfig::default())
    }

    pub fn with_config(config: BackendConfig) -> Result<Arc<Self>, UvcError> {
        let usb = rusb::Context::new()?;
        Ok(Arc::new(Self {
            config,
            usb: Some(usb),
        }))
    }

    /// A context without a USB session; devices get no USB handle.
    #[cfg(test)]
    pub(crate) fn without_usb(config: BackendConfig) -> Arc<Self> {
        Arc::new(Self { config, usb: None })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub(crate) fn usb(&self) -> Option<&rusb::Context> {
        self.usb.as_ref()
    }

    /// Open every registered capture node and group the nodes into devices.
    ///
    /// Any node that fails to open aborts the whole enumeration; nodes opened
    /// before it are closed again.
    pub fn query_devices(self: &Arc<Self>) -> Result<Vec<Device>, UvcError> {
        let root = &self.config.registry_root;
        let names = registry::list_nodes(root).map_err(|source| UvcError::Registry {
            path: root.clone(),
            source,
        })?;

        let subdevices = names
            .iter()
            .map(|name| Subdevice::open(name, &self.config))
            .collect::<Result<Vec<_>, _>>()?;

        let groups = group_by_interface(subdevices);
        check_contiguous(&groups)?;
        debug!(nodes = names.len(), devices = groups.len(), "enumerated capture devices");

        groups
            .into_iter()
            .map(|group| Device::new(Arc::clone(self), group))
            .collect()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("usb", &self.usb.is_some())
            .finish()
    }
}
