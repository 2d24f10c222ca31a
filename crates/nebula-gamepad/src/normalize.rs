//! Mapping resolution and analog normalisation.
//!
//! [`resolve`] reads a slot's raw buffers through its mapping into the
//! canonical 15 buttons / 6 axes; [`canonical_state`] then applies the radial
//! stick dead zone and trigger activation to produce the public snapshot.

use glam::Vec2;
use nebula_config::GamepadConfig;

use crate::mapping::{
    CANONICAL_AXIS_COUNT, CANONICAL_BUTTON_COUNT, CanonicalAxis, CanonicalButton, MapElement,
    Mapping,
};
use crate::registry::JoystickSlot;
use crate::state::{AnalogStickState, CanonicalGamepadState, DigitalInputs};

/// Analog tuning applied by [`canonical_state`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeSettings {
    pub left_dead_zone: f32,
    pub right_dead_zone: f32,
    pub max_magnitude: f32,
    pub trigger_activation: f32,
    pub trigger_max: f32,
}

impl Default for NormalizeSettings {
    fn default() -> Self {
        Self::from(&GamepadConfig::default())
    }
}

impl From<&GamepadConfig> for NormalizeSettings {
    fn from(config: &GamepadConfig) -> Self {
        Self {
            left_dead_zone: config.left_stick_dead_zone,
            right_dead_zone: config.right_stick_dead_zone,
            max_magnitude: config.stick_max_magnitude,
            trigger_activation: config.trigger_activation,
            trigger_max: config.trigger_max,
        }
    }
}

/// Canonical buttons and axes read through a mapping, before normalisation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResolvedInputs {
    pub buttons: [bool; CANONICAL_BUTTON_COUNT],
    /// `[-1.0, 1.0]`.
    pub axes: [f32; CANONICAL_AXIS_COUNT],
}

impl ResolvedInputs {
    pub fn button(&self, button: CanonicalButton) -> bool {
        self.buttons[button as usize]
    }

    pub fn axis(&self, axis: CanonicalAxis) -> f32 {
        self.axes[axis as usize]
    }
}

fn hat_bit(slot: &JoystickSlot, hat: u8, mask: u8) -> bool {
    slot.hats()
        .get(usize::from(hat))
        .is_some_and(|h| h & mask != 0)
}

fn raw_axis(slot: &JoystickSlot, index: u8) -> f32 {
    slot.axes().get(usize::from(index)).copied().unwrap_or(0.0)
}

fn raw_button(slot: &JoystickSlot, index: u8) -> bool {
    slot.buttons()
        .get(usize::from(index))
        .is_some_and(|b| *b != 0)
}

fn resolve_button(slot: &JoystickSlot, element: MapElement) -> bool {
    match element {
        MapElement::Axis {
            index,
            scale,
            offset,
        } => {
            let value = raw_axis(slot, index) * scale + offset;
            // The pressed side of the axis follows the transform's direction.
            if offset < 0.0 || (offset == 0.0 && scale > 0.0) {
                value >= 0.0
            } else {
                value <= 0.0
            }
        }
        MapElement::HatBit { hat, mask } => hat_bit(slot, hat, mask),
        MapElement::Button { index } => raw_button(slot, index),
    }
}

fn resolve_axis(slot: &JoystickSlot, element: MapElement) -> f32 {
    match element {
        MapElement::Axis {
            index,
            scale,
            offset,
        } => (raw_axis(slot, index) * scale + offset).clamp(-1.0, 1.0),
        MapElement::HatBit { hat, mask } => {
            if hat_bit(slot, hat, mask) {
                1.0
            } else {
                -1.0
            }
        }
        MapElement::Button { index } => {
            if raw_button(slot, index) {
                1.0
            } else {
                -1.0
            }
        }
    }
}

/// Read a slot through `mapping`. Unbound canonical inputs stay released / `0.0`.
pub fn resolve(slot: &JoystickSlot, mapping: &Mapping) -> ResolvedInputs {
    let mut out = ResolvedInputs::default();
    for (dst, element) in out.buttons.iter_mut().zip(mapping.buttons.iter()) {
        if let Some(e) = element {
            *dst = resolve_button(slot, *e);
        }
    }
    for (dst, element) in out.axes.iter_mut().zip(mapping.axes.iter()) {
        if let Some(e) = element {
            *dst = resolve_axis(slot, *e);
        }
    }
    out
}

/// Radial dead zone for one stick.
///
/// Inside `dead_zone` everything is zero. Outside it the direction is the unit
/// vector of `(x, y)` and the magnitude is rescaled linearly from
/// `[dead_zone, max_magnitude]` to `[0, 1]`, saturating at 1.
pub fn generate_analog_stick_state(
    x: f32,
    y: f32,
    max_magnitude: f32,
    dead_zone: f32,
) -> AnalogStickState {
    let magnitude = x.hypot(y);
    if magnitude <= dead_zone || magnitude == 0.0 {
        return AnalogStickState::default();
    }

    let direction = Vec2::new(x, y) / magnitude;
    let range = max_magnitude - dead_zone;
    let scaled = if range > 0.0 {
        ((magnitude.min(max_magnitude) - dead_zone) / range).clamp(0.0, 1.0)
    } else {
        1.0
    };

    AnalogStickState {
        normalized_x: direction.x * scaled,
        normalized_y: direction.y * scaled,
        direction_x: direction.x,
        direction_y: direction.y,
        magnitude: scaled,
    }
}

/// Zero below `activation_value`, otherwise `[activation_value, max_value]`
/// rescaled linearly to `[0, 1]`.
pub fn normalize_trigger(value: f32, max_value: f32, activation_value: f32) -> f32 {
    if value < activation_value {
        return 0.0;
    }
    let range = max_value - activation_value;
    if range <= 0.0 {
        return 1.0;
    }
    ((value.min(max_value) - activation_value) / range).clamp(0.0, 1.0)
}

const DIGITAL_BUTTONS: [(CanonicalButton, DigitalInputs); 12] = [
    (CanonicalButton::DpadUp, DigitalInputs::DPAD_UP),
    (CanonicalButton::DpadDown, DigitalInputs::DPAD_DOWN),
    (CanonicalButton::DpadLeft, DigitalInputs::DPAD_LEFT),
    (CanonicalButton::DpadRight, DigitalInputs::DPAD_RIGHT),
    (CanonicalButton::Start, DigitalInputs::START),
    (CanonicalButton::Back, DigitalInputs::BACK),
    (CanonicalButton::LeftThumb, DigitalInputs::LEFT_THUMB),
    (CanonicalButton::RightThumb, DigitalInputs::RIGHT_THUMB),
    (CanonicalButton::A, DigitalInputs::A),
    (CanonicalButton::B, DigitalInputs::B),
    (CanonicalButton::X, DigitalInputs::X),
    (CanonicalButton::Y, DigitalInputs::Y),
];

/// Build the public snapshot from resolved inputs.
pub fn canonical_state(inputs: &ResolvedInputs, settings: &NormalizeSettings) -> CanonicalGamepadState {
    let mut digital = DigitalInputs::empty();
    for (button, bit) in DIGITAL_BUTTONS {
        digital.set(bit, inputs.button(button));
    }

    let shoulder = |b| if inputs.button(b) { 1.0 } else { 0.0 };
    // Trigger axes rest at -1.0; remap to [0, 1] before activation.
    let trigger = |a| {
        let unit = (inputs.axis(a) + 1.0) * 0.5;
        normalize_trigger(unit, settings.trigger_max, settings.trigger_activation)
    };

    CanonicalGamepadState {
        digital_inputs: digital,
        left_stick: generate_analog_stick_state(
            inputs.axis(CanonicalAxis::LeftX),
            inputs.axis(CanonicalAxis::LeftY),
            settings.max_magnitude,
            settings.left_dead_zone,
        ),
        right_stick: generate_analog_stick_state(
            inputs.axis(CanonicalAxis::RightX),
            inputs.axis(CanonicalAxis::RightY),
            settings.max_magnitude,
            settings.right_dead_zone,
        ),
        left_shoulder: shoulder(CanonicalButton::LeftShoulder),
        right_shoulder: shoulder(CanonicalButton::RightShoulder),
        left_trigger: trigger(CanonicalAxis::LeftTrigger),
        right_trigger: trigger(CanonicalAxis::RightTrigger),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceDescriptor, HatState};

    const EPS: f32 = 1e-5;

    fn slot(axes: usize, buttons: usize, hats: usize) -> JoystickSlot {
        JoystickSlot::with_descriptor(&DeviceDescriptor {
            name: "Pad".to_string(),
            guid: "00".to_string(),
            axis_count: axes,
            button_count: buttons,
            hat_count: hats,
        })
    }

    #[test]
    fn test_stick_inside_dead_zone_is_zero() {
        for r in [0.0_f32, 0.1, 0.2, 0.25] {
            let s = generate_analog_stick_state(r * 0.6, r * 0.8, 1.0, 0.25);
            assert_eq!(s, AnalogStickState::default(), "r = {r}");
        }
    }

    #[test]
    fn test_stick_magnitude_monotonic_between_dead_zone_and_max() {
        let (d, m) = (0.2_f32, 0.9_f32);
        let mut previous = 0.0;
        for step in 1..=70 {
            let r = d + (m - d) * step as f32 / 70.0;
            let s = generate_analog_stick_state(r, 0.0, m, d);
            assert!(s.magnitude > 0.0 && s.magnitude <= 1.0, "r = {r}");
            assert!(s.magnitude > previous, "not increasing at r = {r}");
            previous = s.magnitude;
        }
    }

    #[test]
    fn test_stick_saturates_past_max() {
        let s = generate_analog_stick_state(0.9, 0.9, 1.0, 0.2);
        assert_eq!(s.magnitude, 1.0);
        let s = generate_analog_stick_state(1.0, 0.0, 0.8, 0.2);
        assert_eq!(s.magnitude, 1.0);
    }

    #[test]
    fn test_stick_direction_is_unit_length() {
        for (x, y) in [(0.3_f32, 0.4_f32), (-0.9, 0.1), (0.5, -0.5), (-0.01, -0.99)] {
            let s = generate_analog_stick_state(x, y, 1.0, 0.1);
            assert!(s.magnitude > 0.0);
            let len = s.direction_x.hypot(s.direction_y);
            assert!((len - 1.0).abs() < EPS, "len = {len}");
            assert!((s.normalized_x - s.direction_x * s.magnitude).abs() < EPS);
        }
    }

    #[test]
    fn test_diagonal_keeps_direction() {
        let s = generate_analog_stick_state(0.5, 0.5, 1.0, 0.2);
        assert!((s.direction_x - s.direction_y).abs() < EPS);
        assert!((s.direction_x - std::f32::consts::FRAC_1_SQRT_2).abs() < EPS);
    }

    #[test]
    fn test_trigger_below_activation_is_zero() {
        assert_eq!(normalize_trigger(0.05, 1.0, 0.1), 0.0);
        assert_eq!(normalize_trigger(0.0, 1.0, 0.1), 0.0);
    }

    #[test]
    fn test_trigger_at_max_is_one() {
        assert_eq!(normalize_trigger(1.0, 1.0, 0.1176), 1.0);
        assert_eq!(normalize_trigger(0.75, 0.75, 0.3), 1.0);
        assert_eq!(normalize_trigger(2.0, 0.75, 0.3), 1.0);
    }

    #[test]
    fn test_trigger_linear_between() {
        let v = normalize_trigger(0.55, 1.0, 0.1);
        assert!((v - 0.5).abs() < EPS, "got {v}");
    }

    #[test]
    fn test_resolve_button_sources() {
        let mapping = Mapping::parse_for_platform(
            "0000000000000000000000000000000a,Pad,a:b0,b:h0.2,x:+a0,y:-a0,lefttrigger:a1,",
            "Linux",
        )
        .unwrap();
        let mut s = slot(2, 1, 1);
        s.set_button(0, true);
        s.set_hat(0, HatState::RIGHT_UP);
        s.set_axis(0, 0.6);
        s.set_axis(1, 0.2);

        let r = resolve(&s, &mapping);
        assert!(r.button(CanonicalButton::A));
        assert!(r.button(CanonicalButton::B));
        assert!(r.button(CanonicalButton::X));
        assert!(!r.button(CanonicalButton::Y));
        assert!(!r.button(CanonicalButton::Start));
        assert!((r.axis(CanonicalAxis::LeftTrigger) - 0.2).abs() < EPS);

        s.set_axis(0, -0.6);
        let r = resolve(&s, &mapping);
        assert!(!r.button(CanonicalButton::X));
        assert!(r.button(CanonicalButton::Y));
    }

    #[test]
    fn test_resolve_axis_sources() {
        let mapping = Mapping::parse_for_platform(
            "0000000000000000000000000000000a,Pad,leftx:h0.2,lefty:b0,rightx:a0,righty:a1~,",
            "Linux",
        )
        .unwrap();
        let mut s = slot(2, 1, 1);
        s.set_axis(0, 3.0);
        s.set_axis(1, 0.25);

        let r = resolve(&s, &mapping);
        assert_eq!(r.axis(CanonicalAxis::LeftX), -1.0);
        assert_eq!(r.axis(CanonicalAxis::LeftY), -1.0);
        assert_eq!(r.axis(CanonicalAxis::RightX), 1.0);
        assert!((r.axis(CanonicalAxis::RightY) + 0.25).abs() < EPS);

        s.set_hat(0, HatState::RIGHT);
        s.set_button(0, true);
        let r = resolve(&s, &mapping);
        assert_eq!(r.axis(CanonicalAxis::LeftX), 1.0);
        assert_eq!(r.axis(CanonicalAxis::LeftY), 1.0);
    }

    #[test]
    fn test_canonical_state_from_resolved() {
        let mut inputs = ResolvedInputs::default();
        inputs.buttons[CanonicalButton::A as usize] = true;
        inputs.buttons[CanonicalButton::DpadLeft as usize] = true;
        inputs.buttons[CanonicalButton::RightShoulder as usize] = true;
        inputs.buttons[CanonicalButton::Guide as usize] = true;
        inputs.axes[CanonicalAxis::LeftX as usize] = 1.0;
        inputs.axes[CanonicalAxis::LeftTrigger as usize] = -1.0;
        inputs.axes[CanonicalAxis::RightTrigger as usize] = 1.0;

        let state = canonical_state(&inputs, &NormalizeSettings::default());
        assert_eq!(
            state.digital_inputs,
            DigitalInputs::A | DigitalInputs::DPAD_LEFT
        );
        assert_eq!(state.left_shoulder, 0.0);
        assert_eq!(state.right_shoulder, 1.0);
        assert_eq!(state.left_trigger, 0.0);
        assert_eq!(state.right_trigger, 1.0);
        assert_eq!(state.left_stick.magnitude, 1.0);
        assert_eq!(state.left_stick.direction_x, 1.0);
        assert_eq!(state.right_stick, AnalogStickState::default());
    }
}
