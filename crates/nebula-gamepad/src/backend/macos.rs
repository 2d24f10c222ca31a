//! macOS backend: IOHIDManager with run-loop callbacks.
//!
//! Match and removal callbacks only queue work; [`Backend::detect`] applies it
//! to the registry. The callbacks fire whenever the host pumps its run loop, so
//! `init` pumps it once to pick up devices that are already attached.

use std::cell::RefCell;
use std::ffi::c_void;
use std::time::Duration;

use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::base::{CFIndex, CFType, CFTypeID, CFTypeRef, TCFType, kCFAllocatorDefault};
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::number::CFNumber;
use core_foundation::runloop::{
    CFRunLoop, CFRunLoopRef, CFRunLoopRunResult, kCFRunLoopDefaultMode,
};
use core_foundation::string::{CFString, CFStringRef};
use nebula_config::GamepadConfig;
use tracing::{debug, trace, warn};

use super::hid_calibration::{AxisCalibration, ElementClass, classify, hat_state, sort_by_usage};
use super::{Backend, PollMode};
use crate::guid;
use crate::registry::{DeviceDescriptor, JoystickId, MAX_JOYSTICKS, Registry};

type IOReturn = i32;
type IOHIDManagerRef = *mut c_void;
type IOHIDDeviceRef = *mut c_void;
type IOHIDElementRef = *mut c_void;
type IOHIDValueRef = *mut c_void;
type IOHIDDeviceCallback =
    extern "C" fn(context: *mut c_void, result: IOReturn, sender: *mut c_void, device: IOHIDDeviceRef);

const IO_RETURN_SUCCESS: IOReturn = 0;
const IO_RETURN_NO_DEVICE: IOReturn = 0xE000_02C0_u32 as i32;
const IO_RETURN_NOT_ATTACHED: IOReturn = 0xE000_02D9_u32 as i32;

const ELEMENT_TYPE_INPUT_MISC: u32 = 1;
const ELEMENT_TYPE_INPUT_BUTTON: u32 = 2;
const ELEMENT_TYPE_INPUT_AXIS: u32 = 3;

const USAGE_JOYSTICK: i32 = 0x04;
const USAGE_GAMEPAD: i32 = 0x05;
const USAGE_MULTI_AXIS_CONTROLLER: i32 = 0x08;

#[link(name = "IOKit", kind = "framework")]
unsafe extern "C" {
    fn IOHIDManagerCreate(allocator: CFTypeRef, options: u32) -> IOHIDManagerRef;
    fn IOHIDManagerSetDeviceMatchingMultiple(manager: IOHIDManagerRef, multiple: CFArrayRef);
    fn IOHIDManagerRegisterDeviceMatchingCallback(
        manager: IOHIDManagerRef,
        callback: IOHIDDeviceCallback,
        context: *mut c_void,
    );
    fn IOHIDManagerRegisterDeviceRemovalCallback(
        manager: IOHIDManagerRef,
        callback: IOHIDDeviceCallback,
        context: *mut c_void,
    );
    fn IOHIDManagerScheduleWithRunLoop(manager: IOHIDManagerRef, run_loop: CFRunLoopRef, mode: CFStringRef);
    fn IOHIDManagerUnscheduleFromRunLoop(manager: IOHIDManagerRef, run_loop: CFRunLoopRef, mode: CFStringRef);
    fn IOHIDManagerOpen(manager: IOHIDManagerRef, options: u32) -> IOReturn;
    fn IOHIDManagerClose(manager: IOHIDManagerRef, options: u32) -> IOReturn;

    fn IOHIDDeviceGetProperty(device: IOHIDDeviceRef, key: CFStringRef) -> CFTypeRef;
    fn IOHIDDeviceCopyMatchingElements(
        device: IOHIDDeviceRef,
        matching: CFDictionaryRef,
        options: u32,
    ) -> CFArrayRef;
    fn IOHIDDeviceGetValue(device: IOHIDDeviceRef, element: IOHIDElementRef, value: *mut IOHIDValueRef) -> IOReturn;

    fn IOHIDElementGetTypeID() -> CFTypeID;
    fn IOHIDElementGetType(element: IOHIDElementRef) -> u32;
    fn IOHIDElementGetUsagePage(element: IOHIDElementRef) -> u32;
    fn IOHIDElementGetUsage(element: IOHIDElementRef) -> u32;
    fn IOHIDElementGetLogicalMin(element: IOHIDElementRef) -> CFIndex;

    fn IOHIDValueGetIntegerValue(value: IOHIDValueRef) -> CFIndex;
}

enum HidEvent {
    Matched(CFType),
    Removed(usize),
}

type EventQueue = RefCell<Vec<HidEvent>>;

extern "C" fn device_matched(context: *mut c_void, _result: IOReturn, _sender: *mut c_void, device: IOHIDDeviceRef) {
    if context.is_null() || device.is_null() {
        return;
    }
    // SAFETY: `context` points at the backend's boxed queue, which outlives
    // the manager's registration. `device` is a live IOHIDDevice.
    let (queue, device) = unsafe { (&*(context as *const EventQueue), CFType::wrap_under_get_rule(device as CFTypeRef)) };
    queue.borrow_mut().push(HidEvent::Matched(device));
}

extern "C" fn device_removed(context: *mut c_void, _result: IOReturn, _sender: *mut c_void, device: IOHIDDeviceRef) {
    if context.is_null() {
        return;
    }
    // SAFETY: as in `device_matched`.
    let queue = unsafe { &*(context as *const EventQueue) };
    queue.borrow_mut().push(HidEvent::Removed(device as usize));
}

struct MacElement {
    element: CFType,
    usage: u32,
    logical_min: i64,
    calibration: AxisCalibration,
}

impl MacElement {
    fn raw(&self) -> IOHIDElementRef {
        self.element.as_CFTypeRef() as IOHIDElementRef
    }
}

struct MacJoystick {
    device: CFType,
    axes: Vec<MacElement>,
    buttons: Vec<MacElement>,
    hats: Vec<MacElement>,
}

impl MacJoystick {
    fn raw(&self) -> IOHIDDeviceRef {
        self.device.as_CFTypeRef() as IOHIDDeviceRef
    }

    fn from_device(device: CFType) -> Self {
        let mut joystick = Self {
            device,
            axes: Vec::new(),
            buttons: Vec::new(),
            hats: Vec::new(),
        };

        // SAFETY: the device is retained by `joystick`; a null matching
        // dictionary returns every element under the create rule.
        let elements = unsafe { IOHIDDeviceCopyMatchingElements(joystick.raw(), std::ptr::null(), 0) };
        if elements.is_null() {
            return joystick;
        }
        let elements: CFArray<CFType> = unsafe { CFArray::wrap_under_create_rule(elements) };
        let element_type_id = unsafe { IOHIDElementGetTypeID() };

        for item in elements.iter() {
            let element: CFType = (*item).clone();
            if element.type_of() != element_type_id {
                continue;
            }
            let raw = element.as_CFTypeRef() as IOHIDElementRef;
            // SAFETY: `raw` is a live IOHIDElement held by `element`.
            let (kind, page, usage, logical_min) = unsafe {
                (
                    IOHIDElementGetType(raw),
                    IOHIDElementGetUsagePage(raw),
                    IOHIDElementGetUsage(raw),
                    IOHIDElementGetLogicalMin(raw),
                )
            };
            if !matches!(
                kind,
                ELEMENT_TYPE_INPUT_MISC | ELEMENT_TYPE_INPUT_BUTTON | ELEMENT_TYPE_INPUT_AXIS
            ) {
                continue;
            }
            let Some(class) = classify(page, usage) else {
                continue;
            };
            let entry = MacElement {
                element,
                usage,
                logical_min: logical_min as i64,
                calibration: AxisCalibration::default(),
            };
            match class {
                ElementClass::Axis => joystick.axes.push(entry),
                ElementClass::Button => joystick.buttons.push(entry),
                ElementClass::Hat => joystick.hats.push(entry),
            }
        }

        sort_by_usage(&mut joystick.axes, |e| e.usage);
        sort_by_usage(&mut joystick.buttons, |e| e.usage);
        sort_by_usage(&mut joystick.hats, |e| e.usage);
        joystick
    }

    fn string_property(&self, key: &str) -> Option<String> {
        let key = CFString::new(key);
        // SAFETY: get rule; the value is retained by the wrapper.
        let value = unsafe { IOHIDDeviceGetProperty(self.raw(), key.as_concrete_TypeRef()) };
        if value.is_null() {
            return None;
        }
        unsafe { CFType::wrap_under_get_rule(value) }
            .downcast::<CFString>()
            .map(|s| s.to_string())
    }

    fn number_property(&self, key: &str) -> u16 {
        let key = CFString::new(key);
        // SAFETY: as in `string_property`.
        let value = unsafe { IOHIDDeviceGetProperty(self.raw(), key.as_concrete_TypeRef()) };
        if value.is_null() {
            return 0;
        }
        unsafe { CFType::wrap_under_get_rule(value) }
            .downcast::<CFNumber>()
            .and_then(|n| n.to_i32())
            .map(|n| n as u16)
            .unwrap_or(0)
    }

    fn read(&self, element: IOHIDElementRef) -> Result<i64, IOReturn> {
        read_element(&self.device, element)
    }
}

fn matching_dictionary(usage: i32) -> CFDictionary<CFString, CFType> {
    CFDictionary::from_CFType_pairs(&[
        (CFString::new("DeviceUsagePage"), CFNumber::from(0x01).as_CFType()),
        (CFString::new("DeviceUsage"), CFNumber::from(usage).as_CFType()),
    ])
}

fn is_detached(result: IOReturn) -> bool {
    result == IO_RETURN_NO_DEVICE || result == IO_RETURN_NOT_ATTACHED
}

/// IOHIDManager backend.
pub struct MacBackend {
    manager: IOHIDManagerRef,
    queue: Box<EventQueue>,
    devices: [Option<MacJoystick>; MAX_JOYSTICKS],
}

impl MacBackend {
    fn add_device(&mut self, registry: &mut Registry, device: CFType) {
        let ptr = device.as_CFTypeRef() as usize;
        if self
            .devices
            .iter()
            .flatten()
            .any(|d| d.device.as_CFTypeRef() as usize == ptr)
        {
            return;
        }

        let joystick = MacJoystick::from_device(device);
        let name = joystick.string_property("Product").unwrap_or_else(|| "Unknown".to_string());
        let vendor = joystick.number_property("VendorID");
        let product = joystick.number_property("ProductID");
        let guid = if vendor != 0 && product != 0 {
            guid::from_vendor_product(vendor, product)
        } else {
            guid::from_name(&name)
        };
        let desc = DeviceDescriptor {
            name,
            guid,
            axis_count: joystick.axes.len(),
            button_count: joystick.buttons.len(),
            hat_count: joystick.hats.len(),
        };

        let Some(id) = registry.alloc_slot(&desc) else {
            warn!(name = %desc.name, "No free joystick slot");
            return;
        };
        registry.connect(id);
        self.devices[id.index()] = Some(joystick);
    }

    fn remove_device(&mut self, registry: &mut Registry, ptr: usize) {
        let found = self.devices.iter().position(|d| {
            d.as_ref()
                .is_some_and(|d| d.device.as_CFTypeRef() as usize == ptr)
        });
        if let Some(id) = found.and_then(JoystickId::new) {
            self.close(registry, id);
        }
    }

    fn close(&mut self, registry: &mut Registry, id: JoystickId) {
        self.devices[id.index()] = None;
        registry.free_slot(id);
    }

    fn drain_queue(&mut self, registry: &mut Registry) {
        let events = std::mem::take(&mut *self.queue.borrow_mut());
        for event in events {
            match event {
                HidEvent::Matched(device) => self.add_device(registry, device),
                HidEvent::Removed(ptr) => self.remove_device(registry, ptr),
            }
        }
    }
}

impl Backend for MacBackend {
    const MAX_SUPPORTED_GAMEPADS: usize = 4;

    fn new(_config: &GamepadConfig) -> Self {
        Self {
            manager: std::ptr::null_mut(),
            queue: Box::new(RefCell::new(Vec::new())),
            devices: std::array::from_fn(|_| None),
        }
    }

    fn init(&mut self, registry: &mut Registry) -> bool {
        // SAFETY: default allocator, no options.
        let manager = unsafe { IOHIDManagerCreate(kCFAllocatorDefault as CFTypeRef, 0) };
        if manager.is_null() {
            warn!("IOHIDManagerCreate failed");
            return false;
        }
        self.manager = manager;

        let matching = CFArray::from_CFTypes(&[
            matching_dictionary(USAGE_JOYSTICK),
            matching_dictionary(USAGE_GAMEPAD),
            matching_dictionary(USAGE_MULTI_AXIS_CONTROLLER),
        ]);
        let context = &*self.queue as *const EventQueue as *mut c_void;
        // SAFETY: `manager` is live; `context` is boxed and outlives it.
        unsafe {
            IOHIDManagerSetDeviceMatchingMultiple(manager, matching.as_concrete_TypeRef());
            IOHIDManagerRegisterDeviceMatchingCallback(manager, device_matched, context);
            IOHIDManagerRegisterDeviceRemovalCallback(manager, device_removed, context);
            IOHIDManagerScheduleWithRunLoop(
                manager,
                CFRunLoop::get_current().as_concrete_TypeRef(),
                kCFRunLoopDefaultMode,
            );
            let result = IOHIDManagerOpen(manager, 0);
            if result != IO_RETURN_SUCCESS {
                debug!(result, "IOHIDManagerOpen reported an error");
            }
        }

        // Deliver match callbacks for devices already attached.
        while CFRunLoop::run_in_mode(unsafe { kCFRunLoopDefaultMode }, Duration::ZERO, true)
            == CFRunLoopRunResult::HandledSource
        {}
        self.drain_queue(registry);
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
        if !self.manager.is_null() {
            // SAFETY: `manager` was created in `init` and is released once.
            unsafe {
                IOHIDManagerUnscheduleFromRunLoop(
                    self.manager,
                    CFRunLoop::get_current().as_concrete_TypeRef(),
                    kCFRunLoopDefaultMode,
                );
                IOHIDManagerClose(self.manager, 0);
                core_foundation::base::CFRelease(self.manager as CFTypeRef);
            }
            self.manager = std::ptr::null_mut();
        }
        self.queue.borrow_mut().clear();
    }

    fn detect(&mut self, registry: &mut Registry) {
        self.drain_queue(registry);
    }

    fn poll(&mut self, registry: &mut Registry, id: JoystickId, mode: PollMode) -> bool {
        let Some(joystick) = self.devices[id.index()].as_mut() else {
            return false;
        };
        let slot = registry.slot_mut(id);
        let mut failure = None;

        if mode.wants_axes() {
            for (index, axis) in joystick.axes.iter_mut().enumerate() {
                let raw = axis.raw();
                let value = match read_element(&joystick.device, raw) {
                    Ok(v) => v,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };
                slot.set_axis(index, axis.calibration.apply(value));
            }
        }
        if mode.wants_buttons() && failure.is_none() {
            for (index, button) in joystick.buttons.iter().enumerate() {
                match joystick.read(button.raw()) {
                    Ok(v) => slot.set_button(index, v > 0),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
            for (index, hat) in joystick.hats.iter().enumerate() {
                match joystick.read(hat.raw()) {
                    Ok(v) => slot.set_hat(index, hat_state(v, hat.logical_min)),
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        if mode == PollMode::Presence {
            if let Some(first) = joystick.buttons.first().or(joystick.axes.first()) {
                failure = joystick.read(first.raw()).err();
            }
        }

        match failure {
            Some(result) if is_detached(result) => {
                self.close(registry, id);
                false
            }
            Some(result) => {
                trace!(slot = id.index(), result, "HID element read failed");
                true
            }
            None => true,
        }
    }
}

/// Read one element. `Err` carries the IOReturn of a failed read.
fn read_element(device: &CFType, element: IOHIDElementRef) -> Result<i64, IOReturn> {
    let mut value: IOHIDValueRef = std::ptr::null_mut();
    // SAFETY: both handles are retained by the caller.
    let result = unsafe { IOHIDDeviceGetValue(device.as_CFTypeRef() as IOHIDDeviceRef, element, &mut value) };
    if result != IO_RETURN_SUCCESS {
        return Err(result);
    }
    if value.is_null() {
        return Ok(0);
    }
    Ok(unsafe { IOHIDValueGetIntegerValue(value) } as i64)
}

impl Drop for MacBackend {
    fn drop(&mut self) {
        if !self.manager.is_null() {
            // SAFETY: created in `init`, not yet released.
            unsafe { core_foundation::base::CFRelease(self.manager as CFTypeRef) };
        }
    }
}
