//! DirectInput object-list decoding.
//!
//! The Windows backend enumerates a device's objects, keeps the ones it can
//! read from the `DIJOYSTATE` block, and orders them the same way on every
//! run. This module holds that ordering and the value conversions so they can
//! be tested without a device.

use crate::registry::HatState;

/// Byte offsets into `DIJOYSTATE`.
pub mod offsets {
    pub const X: u32 = 0;
    pub const Y: u32 = 4;
    pub const Z: u32 = 8;
    pub const RX: u32 = 12;
    pub const RY: u32 = 16;
    pub const RZ: u32 = 20;
    pub const SLIDER0: u32 = 24;
    pub const SLIDER1: u32 = 28;
    pub const POV0: u32 = 32;
    pub const BUTTON0: u32 = 48;
    pub const POV_COUNT: u32 = 4;
    pub const BUTTON_COUNT: u32 = 32;
}

/// Axis offsets in the order they may appear in `DIJOYSTATE`.
pub const AXIS_OFFSETS: [u32; 8] = [
    offsets::X,
    offsets::Y,
    offsets::Z,
    offsets::RX,
    offsets::RY,
    offsets::RZ,
    offsets::SLIDER0,
    offsets::SLIDER1,
];

/// Logical range every axis is configured to before reading.
pub const AXIS_MIN: i32 = -32768;
pub const AXIS_MAX: i32 = 32767;

/// Sentinel a centred POV reports in its low word.
const POV_CENTERED: u32 = 0xFFFF;

/// Kind of a readable object. The derive order is the sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ObjectKind {
    Axis,
    Slider,
    Button,
    Pov,
}

/// One enumerated object and where its value lives in `DIJOYSTATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceObject {
    pub kind: ObjectKind,
    pub offset: u32,
}

/// Objects sorted by kind and then offset, plus the per-kind counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectLayout {
    pub objects: Vec<DeviceObject>,
    pub axis_count: usize,
    pub button_count: usize,
    pub pov_count: usize,
}

impl ObjectLayout {
    pub fn new(mut objects: Vec<DeviceObject>) -> Self {
        objects.sort_by_key(|o| (o.kind, o.offset));
        objects.dedup();

        let mut layout = Self::default();
        for object in &objects {
            match object.kind {
                ObjectKind::Axis | ObjectKind::Slider => layout.axis_count += 1,
                ObjectKind::Button => layout.button_count += 1,
                ObjectKind::Pov => layout.pov_count += 1,
            }
        }
        layout.objects = objects;
        layout
    }
}

/// Assign a `DIJOYSTATE` offset to an enumerated axis by its GUID-derived
/// kind. `sliders_seen` counts sliders already placed.
pub fn axis_offset(axis_guid_index: usize, sliders_seen: &mut u32) -> Option<DeviceObject> {
    match axis_guid_index {
        0..=5 => Some(DeviceObject {
            kind: ObjectKind::Axis,
            offset: AXIS_OFFSETS[axis_guid_index],
        }),
        6 if *sliders_seen < 2 => {
            let offset = AXIS_OFFSETS[6 + *sliders_seen as usize];
            *sliders_seen += 1;
            Some(DeviceObject {
                kind: ObjectKind::Slider,
                offset,
            })
        }
        _ => None,
    }
}

/// Offset of the `n`th button, if `DIJOYSTATE` has room for it.
pub fn button_offset(n: u32) -> Option<DeviceObject> {
    (n < offsets::BUTTON_COUNT).then(|| DeviceObject {
        kind: ObjectKind::Button,
        offset: offsets::BUTTON0 + n,
    })
}

/// Offset of the `n`th POV, if `DIJOYSTATE` has room for it.
pub fn pov_offset(n: u32) -> Option<DeviceObject> {
    (n < offsets::POV_COUNT).then(|| DeviceObject {
        kind: ObjectKind::Pov,
        offset: offsets::POV0 + n * 4,
    })
}

/// Map a `[AXIS_MIN, AXIS_MAX]` reading to `[-1, 1]`.
pub fn axis_value(raw: i32) -> f32 {
    (raw as f32 + 0.5) / 32767.5
}

pub fn button_pressed(raw: u8) -> bool {
    raw & 0x80 != 0
}

/// Decode a POV reading (hundredths of a degree, clockwise from north).
///
/// The low word is checked so drivers that only fill 16 bits still read as
/// centred. Other angles round down to the previous 45 degree step; 36000 and
/// above are centred.
pub fn pov_state(raw: u32) -> HatState {
    let angle = raw & 0xFFFF;
    if angle == POV_CENTERED {
        return HatState::CENTERED;
    }
    let step = angle / 4500;
    if step >= 8 {
        return HatState::CENTERED;
    }
    HatState::from_position(i64::from(step))
}

/// Drop objects at any of `rejected` offsets.
pub fn without_offsets(mut objects: Vec<DeviceObject>, rejected: &[u32]) -> Vec<DeviceObject> {
    objects.retain(|o| !rejected.contains(&o.offset));
    objects
}

/// Read an object's value out of a raw `DIJOYSTATE` byte block.
pub fn read_i32(block: &[u8], offset: u32) -> Option<i32> {
    let start = offset as usize;
    let bytes = block.get(start..start + 4)?;
    Some(i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub fn read_u8(block: &[u8], offset: u32) -> Option<u8> {
    block.get(offset as usize).copied()
}
