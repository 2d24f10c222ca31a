//! Public per-gamepad snapshot types.
//!
//! [`CanonicalGamepadState`] is a plain value type: it is filled once per
//! [`record_state`](crate::GamepadSystem::record_state) and copied out by
//! [`get_gamepad_state`](crate::GamepadSystem::get_gamepad_state).

use bitflags::bitflags;

bitflags! {
    /// Digital buttons reported in [`CanonicalGamepadState::digital_inputs`].
    ///
    /// Bit values follow the XInput button layout so hosts that already speak
    /// XInput can consume the mask unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DigitalInputs: u16 {
        const DPAD_UP = 0x0001;
        const DPAD_DOWN = 0x0002;
        const DPAD_LEFT = 0x0004;
        const DPAD_RIGHT = 0x0008;
        const START = 0x0010;
        const BACK = 0x0020;
        const LEFT_THUMB = 0x0040;
        const RIGHT_THUMB = 0x0080;
        const A = 0x1000;
        const B = 0x2000;
        const X = 0x4000;
        const Y = 0x8000;
    }
}

/// Analog stick after radial dead-zone processing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnalogStickState {
    /// `direction_x * magnitude`.
    pub normalized_x: f32,
    /// `direction_y * magnitude`. Positive is down, as reported by the device.
    pub normalized_y: f32,
    /// Unit direction, or `0.0` inside the dead zone.
    pub direction_x: f32,
    /// Unit direction, or `0.0` inside the dead zone.
    pub direction_y: f32,
    /// Rescaled magnitude in `[0.0, 1.0]`.
    pub magnitude: f32,
}

/// Snapshot of one gamepad in the canonical layout.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanonicalGamepadState {
    pub digital_inputs: DigitalInputs,
    pub left_stick: AnalogStickState,
    pub right_stick: AnalogStickState,
    /// `0.0` or `1.0`.
    pub left_shoulder: f32,
    /// `0.0` or `1.0`.
    pub right_shoulder: f32,
    /// `[0.0, 1.0]` after activation threshold.
    pub left_trigger: f32,
    /// `[0.0, 1.0]` after activation threshold.
    pub right_trigger: f32,
}

impl CanonicalGamepadState {
    /// Whether every button in `buttons` is held.
    pub fn is_pressed(&self, buttons: DigitalInputs) -> bool {
        self.digital_inputs.contains(buttons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digital_bits_fit_twelve_flags() {
        assert_eq!(DigitalInputs::all().bits().count_ones(), 12);
        assert_eq!(DigitalInputs::A.bits(), 0x1000);
        assert_eq!(DigitalInputs::DPAD_RIGHT.bits(), 0x0008);
    }

    #[test]
    fn test_default_state_is_idle() {
        let state = CanonicalGamepadState::default();
        assert!(state.digital_inputs.is_empty());
        assert_eq!(state.left_stick.magnitude, 0.0);
        assert_eq!(state.right_trigger, 0.0);
    }

    #[test]
    fn test_is_pressed_requires_all_bits() {
        let state = CanonicalGamepadState {
            digital_inputs: DigitalInputs::A | DigitalInputs::START,
            ..Default::default()
        };
        assert!(state.is_pressed(DigitalInputs::A));
        assert!(state.is_pressed(DigitalInputs::A | DigitalInputs::START));
        assert!(!state.is_pressed(DigitalInputs::A | DigitalInputs::B));
    }
}
