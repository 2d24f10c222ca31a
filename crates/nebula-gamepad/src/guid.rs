//! Device GUID derivation.
//!
//! Every backend turns whatever identity the OS exposes into the 32 hex
//! character GUID used by the community mapping format, so the same mapping
//! line matches a device on every host that reports it the same way.

use std::fmt::Write;

/// Bus type the mapping format uses for USB devices.
pub const BUS_USB: u16 = 0x03;

/// Bus type the mapping format uses for devices identified by name only.
pub const BUS_NAME_ONLY: u16 = 0x05;

fn push_u16(out: &mut String, value: u16) {
    let [lo, hi] = value.to_le_bytes();
    let _ = write!(out, "{lo:02x}{hi:02x}");
}

/// The first 11 bytes of `name`, zero padded.
fn name_bytes(name: &str) -> [u8; 11] {
    let mut bytes = [0u8; 11];
    for (dst, src) in bytes.iter_mut().zip(name.bytes()) {
        *dst = src;
    }
    bytes
}

fn push_name(out: &mut String, name: &str) {
    for b in name_bytes(name) {
        let _ = write!(out, "{b:02x}");
    }
    out.push_str("00");
}

/// GUID for an evdev node.
///
/// Uses bus, vendor, product and version when all three IDs are known, and
/// falls back to bus plus the first 11 bytes of the device name.
pub fn from_input_id(bus: u16, vendor: u16, product: u16, version: u16, name: &str) -> String {
    let mut guid = String::with_capacity(32);
    push_u16(&mut guid, bus);
    guid.push_str("0000");
    if vendor != 0 && product != 0 && version != 0 {
        push_u16(&mut guid, vendor);
        guid.push_str("0000");
        push_u16(&mut guid, product);
        guid.push_str("0000");
        push_u16(&mut guid, version);
        guid.push_str("0000");
    } else {
        push_name(&mut guid, name);
    }
    guid
}

/// GUID for a device known by vendor and product ID (IOKit, DirectInput
/// `PIDVID` product GUIDs).
pub fn from_vendor_product(vendor: u16, product: u16) -> String {
    let mut guid = String::with_capacity(32);
    push_u16(&mut guid, BUS_USB);
    guid.push_str("0000");
    push_u16(&mut guid, vendor);
    guid.push_str("0000");
    push_u16(&mut guid, product);
    guid.push_str("000000000000");
    guid
}

/// GUID for a device known only by name.
pub fn from_name(name: &str) -> String {
    let mut guid = String::with_capacity(32);
    push_u16(&mut guid, BUS_NAME_ONLY);
    guid.push_str("0000");
    push_name(&mut guid, name);
    guid
}

/// GUID for an XInput slot: `"xinput"` in hex followed by the device subtype.
pub fn from_xinput_subtype(subtype: u8) -> String {
    format!("78696e707574{subtype:02x}000000000000000000")
}
