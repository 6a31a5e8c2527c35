//! Device-metadata registry: the sysfs `video4linux` class directory.
//!
//! Each entry `<root>/<name>` describes one capture node `/dev/<name>`. The
//! entry's `device` link points at the USB interface the node belongs to,
//! whose `modalias` encodes the USB vendor and product ids and whose
//! `bInterfaceNumber` holds the interface index (hex). The parent of the
//! interface is the USB device itself, carrying `busnum` and `devnum`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::BackendConfig;
use crate::error::MetadataError;
use crate::protocol::*;

/// Physical position of a USB device on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbLocation {
    pub bus: u8,
    pub address: u8,
}

/// What the registry knows about one capture node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Registry entry name, e.g. `video0`.
    pub name: String,
    /// Device node path, e.g. `/dev/video0`.
    pub path: PathBuf,
    pub vendor_id: u16,
    pub product_id: u16,
    /// USB interface index (`bInterfaceNumber`).
    pub interface: u8,
    /// Bus/address of the owning USB device, when the registry exposes it.
    pub location: Option<UsbLocation>,
}

/// List the registry's node names, ordered by name with numeric suffixes
/// compared as numbers (`video2` before `video10`).
pub fn list_nodes(root: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(root)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        // `read_dir` never yields `.`/`..`; guard anyway for foreign registries.
        if name == "." || name == ".." {
            continue;
        }
        names.push(name);
    }
    names.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    Ok(names)
}

fn sort_key(name: &str) -> (&str, Option<u64>, &str) {
    let split = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (prefix, digits) = name.split_at(split);
    (prefix, digits.parse().ok(), name)
}

/// Parse vendor and product ids from a USB modalias (`usb:vVVVVpPPPP...`).
pub fn parse_modalias(modalias: &str) -> Result<(u16, u16), MetadataError> {
    let bytes = modalias.as_bytes();
    if bytes.len() < MODALIAS_MIN_LEN
        || !modalias.starts_with(MODALIAS_PREFIX)
        || bytes[MODALIAS_PRODUCT_MARKER] != b'p'
    {
        return Err(MetadataError::NotUsb(modalias.to_owned()));
    }

    let vendor_id = modalias
        .get(5..9)
        .and_then(parse_hex_u16)
        .ok_or_else(|| MetadataError::VendorId(modalias.to_owned()))?;
    let product_id = modalias
        .get(10..14)
        .and_then(parse_hex_u16)
        .ok_or_else(|| MetadataError::ProductId(modalias.to_owned()))?;

    Ok((vendor_id, product_id))
}

fn parse_hex_u16(digits: &str) -> Option<u16> {
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Parse a `bInterfaceNumber` attribute (hex, usually two digits).
pub fn parse_interface_number(text: &str) -> Result<u8, MetadataError> {
    let digits = text.trim();
    u8::from_str_radix(digits, 16).map_err(|_| MetadataError::InterfaceNumber(digits.to_owned()))
}

fn read_attribute(path: PathBuf) -> Result<String, MetadataError> {
    match fs::read_to_string(&path) {
        Ok(text) => Ok(text),
        Err(source) => Err(MetadataError::Read { path, source }),
    }
}

/// Read the identity of registry entry `name`.
pub fn read_identity(config: &BackendConfig, name: &str) -> Result<NodeIdentity, MetadataError> {
    let interface_dir = config.registry_root.join(name).join("device");

    let modalias = read_attribute(interface_dir.join("modalias"))?;
    let modalias = modalias.split_whitespace().next().unwrap_or_default();
    let (vendor_id, product_id) = parse_modalias(modalias)?;
    let interface = parse_interface_number(&read_attribute(interface_dir.join("bInterfaceNumber"))?)?;
    let location = read_location(&interface_dir);

    let identity = NodeIdentity {
        name: name.to_owned(),
        path: config.device_root.join(name),
        vendor_id,
        product_id,
        interface,
        location,
    };
    debug!(
        path = %identity.path.display(),
        vid = format_args!("{:04x}", vendor_id),
        pid = format_args!("{:04x}", product_id),
        interface,
        location = ?location,
        "read node identity"
    );
    Ok(identity)
}

/// `busnum`/`devnum` of the USB device owning `interface_dir`, if present.
fn read_location(interface_dir: &Path) -> Option<UsbLocation> {
    let usb_device = fs::canonicalize(interface_dir).ok()?.parent()?.to_owned();
    let read = |attr: &str| -> Option<u8> {
        fs::read_to_string(usb_device.join(attr)).ok()?.trim().parse().ok()
    };
    Some(UsbLocation {
        bus: read("busnum")?,
        address: read("devnum")?,
    })
}
