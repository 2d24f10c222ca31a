//! HID element classification and adaptive axis calibration.

use crate::registry::HatState;

pub const PAGE_GENERIC_DESKTOP: u32 = 0x01;
pub const PAGE_SIMULATION: u32 = 0x02;
pub const PAGE_BUTTON: u32 = 0x09;
pub const PAGE_CONSUMER: u32 = 0x0C;

mod usage {
    pub const X: u32 = 0x30;
    pub const WHEEL: u32 = 0x38;
    pub const HATSWITCH: u32 = 0x39;
    pub const START: u32 = 0x3D;
    pub const SELECT: u32 = 0x3E;
    pub const SYSTEM_MAIN_MENU: u32 = 0x85;
    pub const DPAD_UP: u32 = 0x90;
    pub const DPAD_LEFT: u32 = 0x93;

    pub const RUDDER: u32 = 0xBA;
    pub const THROTTLE: u32 = 0xBB;
    pub const ACCELERATOR: u32 = 0xC4;
    pub const BRAKE: u32 = 0xC5;
    pub const STEERING: u32 = 0xC8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementClass {
    Axis,
    Button,
    Hat,
}

/// Classify a HID input element by usage page and usage. Elements nothing
/// reads are `None`.
pub fn classify(page: u32, usage: u32) -> Option<ElementClass> {
    match page {
        PAGE_GENERIC_DESKTOP => match usage {
            usage::X..=usage::WHEEL => Some(ElementClass::Axis),
            usage::HATSWITCH => Some(ElementClass::Hat),
            usage::START | usage::SELECT | usage::SYSTEM_MAIN_MENU => Some(ElementClass::Button),
            usage::DPAD_UP..=usage::DPAD_LEFT => Some(ElementClass::Button),
            _ => None,
        },
        PAGE_SIMULATION => match usage {
            usage::ACCELERATOR
            | usage::BRAKE
            | usage::THROTTLE
            | usage::RUDDER
            | usage::STEERING => Some(ElementClass::Axis),
            _ => None,
        },
        PAGE_BUTTON | PAGE_CONSUMER => Some(ElementClass::Button),
        _ => None,
    }
}

/// Running raw range of one axis element.
///
/// The range starts at the first reading, so a freshly attached axis reports
/// 0 until it has moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AxisCalibration {
    range: Option<(i64, i64)>,
}

impl AxisCalibration {
    /// Widen the range with `raw` and return its position in `[-1, 1]`.
    pub fn apply(&mut self, raw: i64) -> f32 {
        let (min, max) = match self.range {
            Some((min, max)) => (min.min(raw), max.max(raw)),
            None => (raw, raw),
        };
        self.range = Some((min, max));
        if max == min {
            return 0.0;
        }
        (2.0 * (raw - min) as f64 / (max - min) as f64 - 1.0) as f32
    }

    pub fn range(&self) -> Option<(i64, i64)> {
        self.range
    }
}

/// Decode a hat element value relative to its logical minimum.
pub fn hat_state(raw: i64, logical_min: i64) -> HatState {
    HatState::from_position(raw - logical_min)
}

/// Sort key shared by every element category.
pub fn sort_by_usage<T>(elements: &mut [T], usage_of: impl Fn(&T) -> u32) {
    elements.sort_by_key(|e| usage_of(e));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(classify(PAGE_GENERIC_DESKTOP, 0x30), Some(ElementClass::Axis));
        assert_eq!(classify(PAGE_GENERIC_DESKTOP, 0x35), Some(ElementClass::Axis));
        assert_eq!(classify(PAGE_GENERIC_DESKTOP, 0x39), Some(ElementClass::Hat));
        assert_eq!(classify(PAGE_GENERIC_DESKTOP, 0x3D), Some(ElementClass::Button));
        assert_eq!(classify(PAGE_GENERIC_DESKTOP, 0x92), Some(ElementClass::Button));
        assert_eq!(classify(PAGE_GENERIC_DESKTOP, 0x05), None);
        assert_eq!(classify(PAGE_SIMULATION, 0xC4), Some(ElementClass::Axis));
        assert_eq!(classify(PAGE_SIMULATION, 0x01), None);
        assert_eq!(classify(PAGE_BUTTON, 7), Some(ElementClass::Button));
        assert_eq!(classify(PAGE_CONSUMER, 0x223), Some(ElementClass::Button));
        assert_eq!(classify(0xFF00, 1), None);
    }

    #[test]
    fn test_first_reading_is_zero() {
        let mut cal = AxisCalibration::default();
        assert_eq!(cal.apply(200), 0.0);
        assert_eq!(cal.range(), Some((200, 200)));
    }

    #[test]
    fn test_range_expands() {
        let mut cal = AxisCalibration::default();
        cal.apply(128);
        assert_eq!(cal.apply(0), -1.0);
        assert_eq!(cal.apply(255), 1.0);
        assert!((cal.apply(128) - 0.0039).abs() < 1e-3);
        assert_eq!(cal.range(), Some((0, 255)));
        // Readings inside the learned range leave it alone.
        cal.apply(60);
        assert_eq!(cal.range(), Some((0, 255)));
    }

    #[test]
    fn test_hat_values() {
        assert_eq!(hat_state(0, 0), HatState::UP);
        assert_eq!(hat_state(3, 1), HatState::RIGHT);
        assert_eq!(hat_state(8, 0), HatState::CENTERED);
        assert_eq!(hat_state(15, 0), HatState::CENTERED);
        assert_eq!(hat_state(0, 1), HatState::CENTERED);
    }

    #[test]
    fn test_sort_by_usage() {
        let mut usages = vec![(0x35u32, "rz"), (0x30, "x"), (0x31, "y")];
        sort_by_usage(&mut usages, |e| e.0);
        let names: Vec<&str> = usages.iter().map(|e| e.1).collect();
        assert_eq!(names, vec!["x", "y", "rz"]);
    }
}
