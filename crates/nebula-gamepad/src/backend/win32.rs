//! Windows backend: XInput for Xbox-class pads, DirectInput8 for the rest.
//!
//! Neither API delivers hot-plug notifications here, so `detect` re-enumerates
//! both every `rescan_interval_ticks` calls.

use std::ffi::c_void;

use nebula_config::GamepadConfig;
use tracing::{debug, warn};
use windows::Win32::Devices::HumanInterfaceDevice::{
    DIDATAFORMAT, DIDEVCAPS, DIDEVICEINSTANCEW, DIDEVICEOBJECTINSTANCEW, DIOBJECTDATAFORMAT,
    DIPROPHEADER, DIPROPRANGE, DirectInput8Create, GUID_POV, GUID_RxAxis, GUID_RyAxis,
    GUID_RzAxis, GUID_Slider, GUID_XAxis, GUID_YAxis, GUID_ZAxis, IDirectInput8W,
    IDirectInputDevice8W,
};
use windows::Win32::Foundation::{HANDLE, HINSTANCE};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::Input::XboxController::{
    XINPUT_CAPABILITIES, XINPUT_FLAG_GAMEPAD, XINPUT_STATE, XInputGetCapabilities, XInputGetState,
};
use windows::Win32::UI::Input::{
    GetRawInputDeviceInfoW, GetRawInputDeviceList, RAWINPUTDEVICELIST, RID_DEVICE_INFO,
    RIDI_DEVICEINFO, RIDI_DEVICENAME, RIM_TYPEHID,
};
use windows::core::{BOOL, GUID, Interface};

use super::dinput_objects::{
    self, AXIS_MAX, AXIS_MIN, DeviceObject, ObjectKind, ObjectLayout, axis_offset, button_offset,
    offsets, pov_offset,
};
use super::{Backend, PollMode};
use crate::guid;
use crate::registry::{DeviceDescriptor, HatState, JoystickId, MAX_JOYSTICKS, Registry};

const DIRECTINPUT_VERSION: u32 = 0x0800;
const DI8DEVCLASS_GAMECTRL: u32 = 4;
const DIEDFL_ALLDEVICES: u32 = 0;
const DIDFT_ALL: u32 = 0;
const DIDFT_AXIS: u32 = 0x03;
const DIDFT_BUTTON: u32 = 0x0C;
const DIDFT_POV: u32 = 0x10;
const DIDFT_ANYINSTANCE: u32 = 0x00FF_FF00;
const DIDFT_OPTIONAL: u32 = 0x8000_0000;
const DIDOI_ASPECTPOSITION: u32 = 0x100;
const DIDF_ABSAXIS: u32 = 1;
const DIPH_BYID: u32 = 2;
const DIENUM_CONTINUE: BOOL = BOOL(1);
const DIJOYSTATE_SIZE: usize = 80;

const DIERR_INPUTLOST: i32 = 0x8007_001E_u32 as i32;
const DIERR_NOTACQUIRED: i32 = 0x8007_000C_u32 as i32;

/// `MAKEDIPROP(4)`.
const DIPROP_RANGE: *const GUID = 4 as *const GUID;

const XUSER_MAX_COUNT: u32 = 4;
const XINPUT_CAPS_WIRELESS: u16 = 0x0002;
const XINPUT_DEVSUBTYPE_GAMEPAD: u8 = 0x01;
const XINPUT_AXIS_COUNT: usize = 6;
const XINPUT_BUTTON_COUNT: usize = 10;

/// XInput button bits in canonical raw order.
const XINPUT_BUTTONS: [u16; XINPUT_BUTTON_COUNT] = [
    0x1000, // A
    0x2000, // B
    0x4000, // X
    0x8000, // Y
    0x0100, // LB
    0x0200, // RB
    0x0020, // BACK
    0x0010, // START
    0x0040, // LTHUMB
    0x0080, // RTHUMB
];

const XINPUT_DPAD: [(u16, HatState); 4] = [
    (0x0001, HatState::UP),
    (0x0008, HatState::RIGHT),
    (0x0002, HatState::DOWN),
    (0x0004, HatState::LEFT),
];

static AXIS_GUIDS: [GUID; 7] = [
    GUID_XAxis,
    GUID_YAxis,
    GUID_ZAxis,
    GUID_RxAxis,
    GUID_RyAxis,
    GUID_RzAxis,
    GUID_Slider,
];
static POV_GUID: GUID = GUID_POV;

/// Object formats matching the 80-byte `DIJOYSTATE` block.
fn joystate_format() -> Vec<DIOBJECTDATAFORMAT> {
    let axis = DIDFT_AXIS | DIDFT_OPTIONAL | DIDFT_ANYINSTANCE;
    let mut formats: Vec<DIOBJECTDATAFORMAT> = dinput_objects::AXIS_OFFSETS
        .iter()
        .enumerate()
        .map(|(i, offset)| DIOBJECTDATAFORMAT {
            pguid: &AXIS_GUIDS[i.min(6)],
            dwOfs: *offset,
            dwType: axis,
            dwFlags: DIDOI_ASPECTPOSITION,
        })
        .collect();
    formats.extend((0..offsets::POV_COUNT).map(|n| DIOBJECTDATAFORMAT {
        pguid: &POV_GUID,
        dwOfs: offsets::POV0 + n * 4,
        dwType: DIDFT_POV | DIDFT_OPTIONAL | DIDFT_ANYINSTANCE,
        dwFlags: 0,
    }));
    formats.extend((0..offsets::BUTTON_COUNT).map(|n| DIOBJECTDATAFORMAT {
        pguid: std::ptr::null(),
        dwOfs: offsets::BUTTON0 + n,
        dwType: DIDFT_BUTTON | DIDFT_OPTIONAL | DIDFT_ANYINSTANCE,
        dwFlags: 0,
    }));
    formats
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|c| *c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

fn xinput_name(subtype: u8, flags: u16) -> &'static str {
    match subtype {
        XINPUT_DEVSUBTYPE_GAMEPAD if flags & XINPUT_CAPS_WIRELESS != 0 => "Wireless Xbox Controller",
        XINPUT_DEVSUBTYPE_GAMEPAD => "Xbox Controller",
        0x02 => "XInput Wheel",
        0x03 => "XInput Arcade Stick",
        0x04 => "XInput Flight Stick",
        0x05 => "XInput Dance Pad",
        0x06 => "XInput Guitar",
        0x08 => "XInput Drum Kit",
        _ => "Unknown XInput Device",
    }
}

/// Whether a DirectInput product is really an XInput pad. XInput devices
/// expose an `IG_` marker in their raw input device path.
fn supports_xinput(product: &GUID) -> bool {
    let entry_size = std::mem::size_of::<RAWINPUTDEVICELIST>() as u32;
    let mut count = 0u32;
    // SAFETY: size query with no output buffer.
    if unsafe { GetRawInputDeviceList(None, &mut count, entry_size) } == u32::MAX || count == 0 {
        return false;
    }
    let mut list = vec![RAWINPUTDEVICELIST::default(); count as usize];
    // SAFETY: `list` has room for `count` entries.
    if unsafe { GetRawInputDeviceList(Some(list.as_mut_ptr()), &mut count, entry_size) } == u32::MAX {
        return false;
    }

    list.iter().take(count as usize).any(|entry| {
        entry.dwType == RIM_TYPEHID && raw_device_matches(entry.hDevice, product)
    })
}

fn raw_device_matches(handle: HANDLE, product: &GUID) -> bool {
    let mut info = RID_DEVICE_INFO {
        cbSize: std::mem::size_of::<RID_DEVICE_INFO>() as u32,
        ..Default::default()
    };
    let mut size = info.cbSize;
    // SAFETY: `info` is sized as declared in `cbSize`.
    let read = unsafe {
        GetRawInputDeviceInfoW(
            Some(handle),
            RIDI_DEVICEINFO,
            Some(&mut info as *mut RID_DEVICE_INFO as *mut c_void),
            &mut size,
        )
    };
    if read == u32::MAX || info.dwType != RIM_TYPEHID {
        return false;
    }
    // SAFETY: `dwType` says the union holds HID info.
    let hid = unsafe { info.Anonymous.hid };
    if (hid.dwProductId << 16) | hid.dwVendorId != product.data1 {
        return false;
    }

    let mut name = [0u16; 256];
    let mut size = name.len() as u32;
    // SAFETY: `size` is the buffer length in characters.
    let read = unsafe {
        GetRawInputDeviceInfoW(Some(handle), RIDI_DEVICENAME, Some(name.as_mut_ptr().cast()), &mut size)
    };
    read != u32::MAX && wide_to_string(&name).contains("IG_")
}

unsafe extern "system" fn collect_devices(instance: *mut DIDEVICEINSTANCEW, context: *mut c_void) -> BOOL {
    // SAFETY: `context` is the Vec passed to EnumDevices, `instance` is valid
    // for the duration of the callback.
    unsafe {
        let found = &mut *(context as *mut Vec<DIDEVICEINSTANCEW>);
        found.push(*instance);
    }
    DIENUM_CONTINUE
}

#[derive(Default)]
struct ObjectScan {
    objects: Vec<DeviceObject>,
    /// `dwType` and `DIJOYSTATE` offset of every kept axis.
    axis_types: Vec<(u32, u32)>,
    sliders: u32,
    buttons: u32,
    povs: u32,
}

unsafe extern "system" fn collect_objects(object: *mut DIDEVICEOBJECTINSTANCEW, context: *mut c_void) -> BOOL {
    // SAFETY: as in `collect_devices`.
    let (scan, object) = unsafe { (&mut *(context as *mut ObjectScan), &*object) };
    let kind = object.dwType & 0xFF;

    if kind & DIDFT_AXIS != 0 {
        let index = AXIS_GUIDS.iter().position(|g| *g == object.guidType);
        if let Some(entry) = index.and_then(|i| axis_offset(i, &mut scan.sliders)) {
            scan.axis_types.push((object.dwType, entry.offset));
            scan.objects.push(entry);
        }
    } else if kind & DIDFT_BUTTON != 0 {
        if let Some(entry) = button_offset(scan.buttons) {
            scan.objects.push(entry);
            scan.buttons += 1;
        }
    } else if kind & DIDFT_POV != 0
        && let Some(entry) = pov_offset(scan.povs)
    {
        scan.objects.push(entry);
        scan.povs += 1;
    }
    DIENUM_CONTINUE
}

enum Win32Joystick {
    XInput {
        index: u32,
    },
    DirectInput {
        device: IDirectInputDevice8W,
        instance: GUID,
        layout: ObjectLayout,
    },
}

/// XInput + DirectInput8 backend.
pub struct WindowsBackend {
    dinput: Option<IDirectInput8W>,
    devices: [Option<Win32Joystick>; MAX_JOYSTICKS],
    rescan_interval: u32,
    ticks_until_rescan: u32,
}

impl WindowsBackend {
    fn has_xinput(&self, index: u32) -> bool {
        self.devices
            .iter()
            .flatten()
            .any(|d| matches!(d, Win32Joystick::XInput { index: i } if *i == index))
    }

    fn has_instance(&self, guid: &GUID) -> bool {
        self.devices
            .iter()
            .flatten()
            .any(|d| matches!(d, Win32Joystick::DirectInput { instance, .. } if instance == guid))
    }

    fn scan_xinput(&mut self, registry: &mut Registry) {
        for index in 0..XUSER_MAX_COUNT {
            if self.has_xinput(index) {
                continue;
            }
            let mut caps = XINPUT_CAPABILITIES::default();
            // SAFETY: plain query into a caller-owned struct.
            if unsafe { XInputGetCapabilities(index, XINPUT_FLAG_GAMEPAD, &mut caps) } != 0 {
                continue;
            }
            let desc = DeviceDescriptor {
                name: xinput_name(caps.SubType.0, caps.Flags.0).to_string(),
                guid: guid::from_xinput_subtype(caps.SubType.0),
                axis_count: XINPUT_AXIS_COUNT,
                button_count: XINPUT_BUTTON_COUNT,
                hat_count: 1,
            };
            let Some(id) = registry.alloc_slot(&desc) else {
                warn!(index, "No free joystick slot for XInput device");
                return;
            };
            registry.connect(id);
            self.devices[id.index()] = Some(Win32Joystick::XInput { index });
        }
    }

    fn scan_dinput(&mut self, registry: &mut Registry) {
        let Some(dinput) = self.dinput.clone() else {
            return;
        };
        let mut found: Vec<DIDEVICEINSTANCEW> = Vec::new();
        // SAFETY: `found` outlives the synchronous enumeration.
        let result = unsafe {
            dinput.EnumDevices(
                DI8DEVCLASS_GAMECTRL,
                Some(collect_devices),
                &mut found as *mut _ as *mut c_void,
                DIEDFL_ALLDEVICES,
            )
        };
        if let Err(e) = result {
            debug!(error = %e, "DirectInput device enumeration failed");
            return;
        }

        for instance in found {
            if self.has_instance(&instance.guidInstance) || supports_xinput(&instance.guidProduct) {
                continue;
            }
            let name = wide_to_string(&instance.tszInstanceName);
            match self.open_dinput(&dinput, &instance) {
                Ok((device, layout)) => {
                    let desc = DeviceDescriptor {
                        guid: dinput_guid(&instance.guidProduct, &name),
                        name,
                        axis_count: layout.axis_count,
                        button_count: layout.button_count,
                        hat_count: layout.pov_count,
                    };
                    let Some(id) = registry.alloc_slot(&desc) else {
                        warn!(name = %desc.name, "No free joystick slot for DirectInput device");
                        return;
                    };
                    registry.connect(id);
                    self.devices[id.index()] = Some(Win32Joystick::DirectInput {
                        device,
                        instance: instance.guidInstance,
                        layout,
                    });
                }
                Err(e) => warn!(name = %name, error = %e, "Could not open DirectInput device"),
            }
        }
    }

    fn open_dinput(
        &self,
        dinput: &IDirectInput8W,
        instance: &DIDEVICEINSTANCEW,
    ) -> windows::core::Result<(IDirectInputDevice8W, ObjectLayout)> {
        let mut device: Option<IDirectInputDevice8W> = None;
        // SAFETY: every pointer below refers to a local that outlives the call.
        unsafe {
            dinput.CreateDevice(&instance.guidInstance, &mut device, None)?;
        }
        let device = device.ok_or_else(windows::core::Error::empty)?;

        let mut formats = joystate_format();
        let format = DIDATAFORMAT {
            dwSize: std::mem::size_of::<DIDATAFORMAT>() as u32,
            dwObjSize: std::mem::size_of::<DIOBJECTDATAFORMAT>() as u32,
            dwFlags: DIDF_ABSAXIS,
            dwDataSize: DIJOYSTATE_SIZE as u32,
            dwNumObjs: formats.len() as u32,
            rgodf: formats.as_mut_ptr(),
        };
        let mut caps = DIDEVCAPS {
            dwSize: std::mem::size_of::<DIDEVCAPS>() as u32,
            ..Default::default()
        };
        let mut scan = ObjectScan::default();

        unsafe {
            device.SetDataFormat(&format)?;
            device.GetCapabilities(&mut caps)?;
            device.EnumObjects(
                Some(collect_objects),
                &mut scan as *mut ObjectScan as *mut c_void,
                DIDFT_AXIS | DIDFT_BUTTON | DIDFT_POV | DIDFT_ALL,
            )?;
        }

        let mut rejected = Vec::new();
        for &(object_type, offset) in &scan.axis_types {
            let mut range = DIPROPRANGE {
                diph: DIPROPHEADER {
                    dwSize: std::mem::size_of::<DIPROPRANGE>() as u32,
                    dwHeaderSize: std::mem::size_of::<DIPROPHEADER>() as u32,
                    dwObj: object_type,
                    dwHow: DIPH_BYID,
                },
                lMin: AXIS_MIN,
                lMax: AXIS_MAX,
            };
            // SAFETY: `range` outlives the call.
            if let Err(e) = unsafe { device.SetProperty(DIPROP_RANGE, &mut range.diph) } {
                debug!(offset, error = %e, "Axis refused range, skipping it");
                rejected.push(offset);
            }
        }

        let objects = dinput_objects::without_offsets(scan.objects, &rejected);
        Ok((device, ObjectLayout::new(objects)))
    }

    fn close(&mut self, registry: &mut Registry, id: JoystickId) {
        if let Some(Win32Joystick::DirectInput { device, .. }) = self.devices[id.index()].take() {
            // SAFETY: releasing our own acquisition.
            let _ = unsafe { device.Unacquire() };
        }
        registry.free_slot(id);
    }

    fn rescan(&mut self, registry: &mut Registry) {
        self.scan_xinput(registry);
        self.scan_dinput(registry);
    }
}

fn dinput_guid(product: &GUID, name: &str) -> String {
    if &product.data4[2..8] == b"PIDVID" {
        guid::from_vendor_product(product.data1 as u16, (product.data1 >> 16) as u16)
    } else {
        guid::from_name(name)
    }
}

fn poll_xinput(registry: &mut Registry, id: JoystickId, index: u32, mode: PollMode) -> bool {
    let mut state = XINPUT_STATE::default();
    // SAFETY: plain query into a caller-owned struct.
    if unsafe { XInputGetState(index, &mut state) } != 0 {
        return false;
    }
    let pad = state.Gamepad;
    let slot = registry.slot_mut(id);

    if mode.wants_axes() {
        let stick = |v: i16| (f32::from(v) + 0.5) / 32767.5;
        let trigger = |v: u8| f32::from(v) / 127.5 - 1.0;
        slot.set_axis(0, stick(pad.sThumbLX));
        slot.set_axis(1, -stick(pad.sThumbLY));
        slot.set_axis(2, stick(pad.sThumbRX));
        slot.set_axis(3, -stick(pad.sThumbRY));
        slot.set_axis(4, trigger(pad.bLeftTrigger));
        slot.set_axis(5, trigger(pad.bRightTrigger));
    }
    if mode.wants_buttons() {
        let bits = pad.wButtons.0;
        for (index, mask) in XINPUT_BUTTONS.iter().enumerate() {
            slot.set_button(index, bits & mask != 0);
        }
        let hat = XINPUT_DPAD
            .iter()
            .filter(|(mask, _)| bits & mask != 0)
            .fold(HatState::CENTERED, |acc, (_, dir)| acc | *dir);
        slot.set_hat(0, hat);
    }
    true
}

fn poll_dinput(
    registry: &mut Registry,
    id: JoystickId,
    device: &IDirectInputDevice8W,
    layout: &ObjectLayout,
) -> bool {
    // SAFETY: `device` is a live interface owned by the backend.
    let mut result = unsafe { device.Poll() };
    if let Err(e) = &result
        && matches!(e.code().0, DIERR_NOTACQUIRED | DIERR_INPUTLOST)
    {
        result = unsafe { device.Acquire().and_then(|()| device.Poll()) };
    }
    if result.is_err() {
        return false;
    }

    let mut block = [0u8; DIJOYSTATE_SIZE];
    // SAFETY: `block` is exactly the data format size.
    if unsafe { device.GetDeviceState(block.len() as u32, block.as_mut_ptr().cast()) }.is_err() {
        return false;
    }

    let slot = registry.slot_mut(id);
    let (mut axis, mut button, mut pov) = (0, 0, 0);
    for object in &layout.objects {
        match object.kind {
            ObjectKind::Axis | ObjectKind::Slider => {
                let raw = dinput_objects::read_i32(&block, object.offset).unwrap_or(0);
                slot.set_axis(axis, dinput_objects::axis_value(raw));
                axis += 1;
            }
            ObjectKind::Button => {
                let raw = dinput_objects::read_u8(&block, object.offset).unwrap_or(0);
                slot.set_button(button, dinput_objects::button_pressed(raw));
                button += 1;
            }
            ObjectKind::Pov => {
                let raw = dinput_objects::read_i32(&block, object.offset).unwrap_or(-1);
                slot.set_hat(pov, dinput_objects::pov_state(raw as u32));
                pov += 1;
            }
        }
    }
    true
}

impl Backend for WindowsBackend {
    const MAX_SUPPORTED_GAMEPADS: usize = 4;

    fn new(config: &GamepadConfig) -> Self {
        Self {
            dinput: None,
            devices: std::array::from_fn(|_| None),
            rescan_interval: config.rescan_interval_ticks.max(1),
            ticks_until_rescan: 0,
        }
    }

    fn init(&mut self, registry: &mut Registry) -> bool {
        let created = unsafe {
            GetModuleHandleW(None).and_then(|module| {
                let mut raw: *mut c_void = std::ptr::null_mut();
                DirectInput8Create(
                    HINSTANCE::from(module),
                    DIRECTINPUT_VERSION,
                    &IDirectInput8W::IID,
                    &mut raw,
                    None,
                )
                .map(|()| IDirectInput8W::from_raw(raw))
            })
        };
        match created {
            Ok(dinput) => self.dinput = Some(dinput),
            Err(e) => {
                // XInput still works without DirectInput.
                warn!(error = %e, "DirectInput8Create failed");
            }
        }

        self.rescan(registry);
        self.ticks_until_rescan = self.rescan_interval;
        true
    }

    fn terminate(&mut self, registry: &mut Registry) {
        for index in 0..MAX_JOYSTICKS {
            if self.devices[index].is_some()
                && let Some(id) = JoystickId::new(index)
            {
                self.close(registry, id);
            }
        }
        self.dinput = None;
    }

    fn detect(&mut self, registry: &mut Registry) {
        self.ticks_until_rescan = self.ticks_until_rescan.saturating_sub(1);
        if self.ticks_until_rescan == 0 {
            self.rescan(registry);
            self.ticks_until_rescan = self.rescan_interval;
        }
    }

    fn poll(&mut self, registry: &mut Registry, id: JoystickId, mode: PollMode) -> bool {
        let alive = match &self.devices[id.index()] {
            None => return false,
            Some(Win32Joystick::XInput { index }) => poll_xinput(registry, id, *index, mode),
            Some(Win32Joystick::DirectInput { device, layout, .. }) => {
                poll_dinput(registry, id, device, layout)
            }
        };
        if !alive {
            self.close(registry, id);
        }
        alive
    }
}
