//! Physical devices: grouped subdevices, the USB control plane and the
//! streaming thread.
//!
//! A [`Device`] is produced by [`Context::query_devices`]. It opens the USB
//! device its nodes belong to, claims interfaces on request and runs one
//! background thread while streaming. The [`Drop`] impl stops that thread
//! before releasing interfaces and closing the USB handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use rusb::{DeviceHandle, UsbContext};
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::error::UvcError;
use crate::format::StreamMode;
use crate::frame::FrameSink;
use crate::poll::{SharedSubdevice, poll};
use crate::protocol::*;
use crate::registry::{NodeIdentity, UsbLocation};
use crate::subdevice::Subdevice;

type UsbDevice = rusb::Device<rusb::Context>;
type UsbHandle = DeviceHandle<rusb::Context>;

/// The running streaming thread and the subdevices it polls.
struct StreamWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Result<(), UvcError>>,
    active: Vec<SharedSubdevice>,
}

/// One physical USB product and its capture nodes.
pub struct Device {
    context: Arc<Context>,
    vendor_id: u16,
    product_id: u16,
    subdevices: Vec<SharedSubdevice>,
    usb_device: Option<UsbDevice>,
    handle: Option<UsbHandle>,
    claimed: Vec<u8>,
    worker: Option<StreamWorker>,
}

impl Device {
    /// Build a device from one group of subdevices and open its USB handle.
    ///
    /// A USB device that cannot be opened (usually permissions) is logged and
    /// leaves the device without a handle; capture still works.
    pub(crate) fn new(context: Arc<Context>, subdevices: Vec<Subdevice>) -> Result<Self, UvcError> {
        let (vendor_id, product_id) = subdevices
            .first()
            .map(|sub| (sub.vendor_id(), sub.product_id()))
            .unwrap_or_default();
        let location = subdevices.iter().find_map(Subdevice::location);

        let (usb_device, handle) = match context.usb() {
            Some(usb) => open_usb(usb, vendor_id, product_id, location)?,
            None => (None, None),
        };

        Ok(Self {
            context,
            vendor_id,
            product_id,
            subdevices: subdevices
                .into_iter()
                .map(|sub| Arc::new(Mutex::new(sub)))
                .collect(),
            usb_device,
            handle,
            claimed: Vec::new(),
            worker: None,
        })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Vendor id shared by all subdevices.
    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    /// Product id shared by all subdevices.
    pub fn product_id(&self) -> u16 {
        self.product_id
    }

    pub fn subdevice_count(&self) -> usize {
        self.subdevices.len()
    }

    /// Identity of subdevice `index`, in enumeration order.
    pub fn subdevice_identity(&self, index: usize) -> Result<NodeIdentity, UvcError> {
        Ok(self.subdevice(index)?.lock().identity().clone())
    }

    /// The mode the driver granted to subdevice `index` at its last start.
    pub fn negotiated_mode(&self, index: usize) -> Result<Option<StreamMode>, UvcError> {
        Ok(self.subdevice(index)?.lock().negotiated_mode())
    }

    fn subdevice(&self, index: usize) -> Result<&SharedSubdevice, UvcError> {
        self.subdevices.get(index).ok_or(UvcError::SubdeviceIndex {
            index,
            count: self.subdevices.len(),
        })
    }

    // --- Subdevice configuration and controls ---

    /// Configure subdevice `index` and register its frame sink.
    ///
    /// Takes effect at the next [`start_streaming`](Self::start_streaming).
    pub fn set_subdevice_mode<S>(&self, index: usize, mode: StreamMode, sink: S) -> Result<(), UvcError>
    where
        S: FrameSink + 'static,
    {
        self.subdevice(index)?.lock().set_format(mode, sink)
    }

    pub fn get_control(&self, index: usize, control: u8, data: &mut [u8]) -> Result<(), UvcError> {
        self.subdevice(index)?.lock().get_control(control, data)
    }

    pub fn set_control(&self, index: usize, control: u8, data: &[u8]) -> Result<(), UvcError> {
        self.subdevice(index)?.lock().set_control(control, data)
    }

    pub fn get_pu_control(&self, index: usize, id: u32) -> Result<i32, UvcError> {
        self.subdevice(index)?.lock().get_pu_control(id)
    }

    pub fn set_pu_control(&self, index: usize, id: u32, value: i32) -> Result<(), UvcError> {
        self.subdevice(index)?.lock().set_pu_control(id, value)
    }

    // --- USB control plane ---

    /// Claim USB interface `interface`; it is released when the device drops.
    ///
    /// The kernel driver is not detached, so interfaces bound to `uvcvideo`
    /// fail with [`rusb::Error::Busy`].
    pub fn claim_interface(&mut self, interface: u8) -> Result<(), UvcError> {
        let handle = self.handle.as_ref().ok_or(UvcError::InterfaceClaim {
            interface,
            source: rusb::Error::NoDevice,
        })?;
        handle
            .claim_interface(interface)
            .map_err(|source| UvcError::InterfaceClaim { interface, source })?;
        if !self.claimed.contains(&interface) {
            self.claimed.push(interface);
        }
        debug!(interface, "claimed USB interface");
        Ok(())
    }

    /// Synchronous bulk transfer. Reads into `data` for IN endpoints, writes
    /// it otherwise. Returns the number of bytes transferred.
    pub fn bulk_transfer(&self, endpoint: u8, data: &mut [u8], timeout: Duration) -> Result<usize, UvcError> {
        let handle = self.handle.as_ref().ok_or(UvcError::Transfer {
            endpoint,
            source: rusb::Error::NoDevice,
        })?;
        let result = if endpoint & USB_ENDPOINT_DIR_IN != 0 {
            handle.read_bulk(endpoint, data, timeout)
        } else {
            handle.write_bulk(endpoint, data, timeout)
        };
        result.map_err(|source| UvcError::Transfer { endpoint, source })
    }

    /// USB serial number string, if the device has one and is open.
    pub fn serial_number(&self) -> Result<Option<String>, UvcError> {
        let (Some(device), Some(handle)) = (&self.usb_device, &self.handle) else {
            return Ok(None);
        };
        let desc = device.device_descriptor()?;
        if desc.serial_number_string_index().is_none() {
            return Ok(None);
        }
        Ok(Some(handle.read_serial_number_string_ascii(&desc)?))
    }

    // --- Streaming ---

    /// Start capture on every subdevice with a sink and spawn the streaming
    /// thread.
    ///
    /// If any subdevice fails to start, the ones already started are stopped
    /// again and the error is returned.
    pub fn start_streaming(&mut self) -> Result<(), UvcError> {
        if self.worker.is_some() {
            return Err(UvcError::StreamingActive);
        }

        let mut active: Vec<SharedSubdevice> = Vec::new();
        for sub in &self.subdevices {
            let mut guard = sub.lock();
            if !guard.has_sink() {
                continue;
            }
            if let Err(err) = guard.start_capture() {
                guard.stop_capture();
                drop(guard);
                release_capture(&active);
                return Err(err);
            }
            active.push(Arc::clone(sub));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_active = active.clone();
        let timeout = self.context.config().poll_timeout;
        let spawned = thread::Builder::new()
            .name(format!("uvc-{:04x}:{:04x}", self.vendor_id, self.product_id))
            .spawn(move || stream_loop(&thread_active, &thread_stop, timeout));

        match spawned {
            Ok(handle) => {
                debug!(subdevices = active.len(), "streaming started");
                self.worker = Some(StreamWorker { stop, handle, active });
                Ok(())
            }
            Err(err) => {
                release_capture(&active);
                Err(UvcError::ThreadSpawn(err))
            }
        }
    }

    /// Stop the streaming thread, join it and stop capture on every active
    /// subdevice. A no-op when not streaming.
    ///
    /// Returns the error that ended the thread early, if any.
    pub fn stop_streaming(&mut self) -> Result<(), UvcError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.stop.store(true, Ordering::Release);
        let outcome = worker.handle.join();
        release_capture(&worker.active);
        debug!("streaming stopped");

        match outcome {
            Ok(result) => result,
            Err(_) => Err(UvcError::StreamThreadPanicked),
        }
    }

    /// `true` while the streaming thread is running. Turns `false` when the
    /// thread ends on its own after an error; call
    /// [`stop_streaming`](Self::stop_streaming) to collect it.
    pub fn is_streaming(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = self.stop_streaming() {
            warn!(error = %err, "streaming thread ended with an error");
        }

        if let Some(handle) = &self.handle {
            for &interface in &self.claimed {
                if let Err(err) = handle.release_interface(interface) {
                    warn!(interface, error = %err, "failed to release USB interface");
                }
            }
        }
        self.claimed.clear();

        // Close the handle before dropping the device reference.
        drop(self.handle.take());
        drop(self.usb_device.take());
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("vendor_id", &format_args!("{:04x}", self.vendor_id))
            .field("product_id", &format_args!("{:04x}", self.product_id))
            .field("subdevices", &self.subdevices.len())
            .field("usb_open", &self.handle.is_some())
            .field("claimed", &self.claimed)
            .field("streaming", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

fn stream_loop(subdevices: &[SharedSubdevice], stop: &AtomicBool, timeout: Duration) -> Result<(), UvcError> {
    while !stop.load(Ordering::Acquire) {
        if let Err(err) = poll(subdevices, timeout) {
            error!(error = %err, "streaming thread stopped by poll error");
            return Err(err);
        }
    }
    Ok(())
}

fn release_capture(subdevices: &[SharedSubdevice]) {
    for sub in subdevices {
        sub.lock().stop_capture();
    }
}

/// Find the USB device behind a group of nodes and open it.
///
/// With a known location only the device at that bus/address matches;
/// otherwise the first device with the right ids is used.
fn open_usb(
    usb: &rusb::Context,
    vendor_id: u16,
    product_id: u16,
    location: Option<UsbLocation>,
) -> Result<(Option<UsbDevice>, Option<UsbHandle>), UvcError> {
    let mut found = None;
    for device in usb.devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if desc.vendor_id() != vendor_id || desc.product_id() != product_id {
            continue;
        }
        let here = UsbLocation {
            bus: device.bus_number(),
            address: device.address(),
        };
        if location.is_none_or(|wanted| wanted == here) {
            found = Some(device);
            break;
        }
    }

    let Some(device) = found else {
        debug!(
            vid = format_args!("{:04x}", vendor_id),
            pid = format_args!("{:04x}", product_id),
            location = ?location,
            "no matching USB device"
        );
        return Ok((None, None));
    };

    match device.open() {
        Ok(handle) => Ok((Some(device), Some(handle))),
        Err(err) => {
            warn!(
                vid = format_args!("{:04x}", vendor_id),
                pid = format_args!("{:04x}", product_id),
                error = %err,
                "cannot open USB device; USB control unavailable"
            );
            Ok((Some(device), None))
        }
    }
}
