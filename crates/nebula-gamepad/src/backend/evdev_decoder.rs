//! evdev event decoding, independent of the device node.
//!
//! The kernel reports sparse key and axis codes; [`EvdevLayout`] compacts them
//! into dense slot indices once, at open time, and then applies the event
//! stream to a [`JoystickSlot`]. It also tracks the `SYN_DROPPED` recovery
//! protocol: after a drop every event is discarded until the next
//! `SYN_REPORT`, which asks the caller to re-read the full device state.

use crate::registry::{HatState, JoystickSlot};

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_ABS: u16 = 0x03;

pub const SYN_REPORT: u16 = 0;
pub const SYN_DROPPED: u16 = 3;

/// First key code treated as a joystick button.
pub const BTN_MISC: u16 = 0x100;
pub const KEY_CNT: usize = 0x300;
pub const ABS_CNT: usize = 0x40;
pub const ABS_HAT0X: u16 = 0x10;
pub const ABS_HAT3Y: u16 = 0x17;

const HAT_COUNT: usize = 4;

/// Hat state indexed by `[x][y]` sign state (0 centred, 1 negative, 2 positive).
const HAT_STATE_MAP: [[HatState; 3]; 3] = [
    [HatState::CENTERED, HatState::UP, HatState::DOWN],
    [HatState::LEFT, HatState::LEFT_UP, HatState::LEFT_DOWN],
    [HatState::RIGHT, HatState::RIGHT_UP, HatState::RIGHT_DOWN],
];

/// Logical range of an absolute axis, from `EVIOCGABS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbsRange {
    pub minimum: i32,
    pub maximum: i32,
}

/// What the caller has to do after feeding one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    Ignored,
    /// A drop just ended: re-read absolute and key state.
    Resync,
}

fn is_hat(code: u16) -> bool {
    (ABS_HAT0X..=ABS_HAT3Y).contains(&code)
}

fn sign_state(value: i32) -> usize {
    match value.signum() {
        0 => 0,
        -1 => 1,
        _ => 2,
    }
}

/// Per-device code-to-index tables and decoder state.
#[derive(Debug, Clone)]
pub struct EvdevLayout {
    key_map: Vec<Option<usize>>,
    abs_map: [Option<usize>; ABS_CNT],
    abs_ranges: [AbsRange; ABS_CNT],
    hat_signs: [[usize; 2]; HAT_COUNT],
    axis_count: usize,
    button_count: usize,
    hat_count: usize,
    dropped: bool,
}

impl EvdevLayout {
    /// Build the tables from the device's advertised key codes and absolute
    /// axes. Codes are assigned dense indices in ascending order; each hat's
    /// X/Y pair shares one hat index.
    pub fn new(
        key_codes: impl IntoIterator<Item = u16>,
        abs_axes: impl IntoIterator<Item = (u16, AbsRange)>,
    ) -> Self {
        let mut layout = Self {
            key_map: vec![None; KEY_CNT - usize::from(BTN_MISC)],
            abs_map: [None; ABS_CNT],
            abs_ranges: [AbsRange::default(); ABS_CNT],
            hat_signs: [[0; 2]; HAT_COUNT],
            axis_count: 0,
            button_count: 0,
            hat_count: 0,
            dropped: false,
        };

        let mut keys: Vec<u16> = key_codes
            .into_iter()
            .filter(|c| *c >= BTN_MISC && usize::from(*c) < KEY_CNT)
            .collect();
        keys.sort_unstable();
        keys.dedup();
        for code in keys {
            layout.key_map[usize::from(code - BTN_MISC)] = Some(layout.button_count);
            layout.button_count += 1;
        }

        let mut axes: Vec<(u16, AbsRange)> = abs_axes
            .into_iter()
            .filter(|(c, _)| usize::from(*c) < ABS_CNT)
            .collect();
        axes.sort_unstable_by_key(|(c, _)| *c);
        axes.dedup_by_key(|(c, _)| *c);

        let mut hat_index: [Option<usize>; HAT_COUNT] = [None; HAT_COUNT];
        for (code, range) in axes {
            let slot = usize::from(code);
            if is_hat(code) {
                let hat = usize::from(code - ABS_HAT0X) / 2;
                let index = *hat_index[hat].get_or_insert_with(|| {
                    layout.hat_count += 1;
                    layout.hat_count - 1
                });
                layout.abs_map[slot] = Some(index);
            } else {
                layout.abs_map[slot] = Some(layout.axis_count);
                layout.abs_ranges[slot] = range;
                layout.axis_count += 1;
            }
        }

        layout
    }

    pub fn axis_count(&self) -> usize {
        self.axis_count
    }

    pub fn button_count(&self) -> usize {
        self.button_count
    }

    pub fn hat_count(&self) -> usize {
        self.hat_count
    }

    /// Whether events are currently being discarded after a `SYN_DROPPED`.
    pub fn is_dropping(&self) -> bool {
        self.dropped
    }

    /// Feed one raw event.
    pub fn handle_event(
        &mut self,
        slot: &mut JoystickSlot,
        event_type: u16,
        code: u16,
        value: i32,
    ) -> EventOutcome {
        if event_type == EV_SYN {
            return match code {
                SYN_DROPPED => {
                    self.dropped = true;
                    EventOutcome::Ignored
                }
                SYN_REPORT if self.dropped => {
                    self.dropped = false;
                    EventOutcome::Resync
                }
                _ => EventOutcome::Ignored,
            };
        }

        if self.dropped {
            return EventOutcome::Ignored;
        }

        match event_type {
            EV_KEY => self.handle_key(slot, code, value),
            EV_ABS => self.handle_abs(slot, code, value),
            _ => EventOutcome::Ignored,
        }
    }

    fn handle_key(&mut self, slot: &mut JoystickSlot, code: u16, value: i32) -> EventOutcome {
        let Some(index) = code
            .checked_sub(BTN_MISC)
            .and_then(|c| self.key_map.get(usize::from(c)).copied().flatten())
        else {
            return EventOutcome::Ignored;
        };
        slot.set_button(index, value != 0);
        EventOutcome::Applied
    }

    fn handle_abs(&mut self, slot: &mut JoystickSlot, code: u16, value: i32) -> EventOutcome {
        let Some(index) = self.abs_map.get(usize::from(code)).copied().flatten() else {
            return EventOutcome::Ignored;
        };

        if is_hat(code) {
            let hat = usize::from(code - ABS_HAT0X) / 2;
            let axis = usize::from(code - ABS_HAT0X) % 2;
            self.hat_signs[hat][axis] = sign_state(value);
            let [x, y] = self.hat_signs[hat];
            slot.set_hat(index, HAT_STATE_MAP[x][y]);
        } else {
            let range = self.abs_ranges[usize::from(code)];
            slot.set_axis(index, normalize_abs(value, range));
        }
        EventOutcome::Applied
    }

    /// Apply a full absolute-state snapshot, `(code, value)` per axis.
    pub fn apply_abs_state(
        &mut self,
        slot: &mut JoystickSlot,
        values: impl IntoIterator<Item = (u16, i32)>,
    ) {
        for (code, value) in values {
            self.handle_abs(slot, code, value);
        }
    }

    /// Apply a full key-state snapshot: every mapped button not listed in
    /// `pressed` is released.
    pub fn apply_key_state(&mut self, slot: &mut JoystickSlot, pressed: &[u16]) {
        for (offset, index) in self.key_map.iter().enumerate() {
            if let Some(index) = index {
                let code = BTN_MISC + offset as u16;
                slot.set_button(*index, pressed.contains(&code));
            }
        }
    }
}

/// Whether a `/dev/input` entry name is an event node (`^event[0-9]+$`).
pub fn is_event_node(name: &str) -> bool {
    name.strip_prefix("event")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Map a raw absolute value to `[-1, 1]`; a zero-width range passes the raw
/// value through.
pub fn normalize_abs(value: i32, range: AbsRange) -> f32 {
    let span = i64::from(range.maximum) - i64::from(range.minimum);
    if span == 0 {
        return value as f32;
    }
    let unit = (i64::from(value) - i64::from(range.minimum)) as f32 / span as f32;
    unit * 2.0 - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DeviceDescriptor;

    const BTN_SOUTH: u16 = 0x130;
    const BTN_EAST: u16 = 0x131;
    const ABS_X: u16 = 0x00;
    const ABS_Y: u16 = 0x01;
    const ABS_RZ: u16 = 0x05;
    const ABS_HAT0Y: u16 = 0x11;

    const STICK: AbsRange = AbsRange {
        minimum: -32768,
        maximum: 32767,
    };

    fn layout() -> EvdevLayout {
        EvdevLayout::new(
            [BTN_EAST, BTN_SOUTH, 0x1e],
            [
                (ABS_RZ, AbsRange { minimum: 0, maximum: 255 }),
                (ABS_X, STICK),
                (ABS_HAT0X, AbsRange { minimum: -1, maximum: 1 }),
                (ABS_HAT0Y, AbsRange { minimum: -1, maximum: 1 }),
                (ABS_Y, STICK),
            ],
        )
    }

    fn slot_for(layout: &EvdevLayout) -> JoystickSlot {
        JoystickSlot::with_descriptor(&DeviceDescriptor {
            name: "evdev".to_string(),
            guid: "00".to_string(),
            axis_count: layout.axis_count(),
            button_count: layout.button_count(),
            hat_count: layout.hat_count(),
        })
    }

    #[test]
    fn test_sparse_codes_compacted() {
        let l = layout();
        // KEY_A (0x1e) is below BTN_MISC and is not a joystick button.
        assert_eq!(l.button_count(), 2);
        assert_eq!(l.axis_count(), 3);
        assert_eq!(l.hat_count(), 1);
    }

    #[test]
    fn test_key_events_use_dense_indices() {
        let mut l = layout();
        let mut s = slot_for(&l);
        assert_eq!(l.handle_event(&mut s, EV_KEY, BTN_EAST, 1), EventOutcome::Applied);
        assert_eq!(&s.buttons()[..2], &[0, 1]);
        assert_eq!(l.handle_event(&mut s, EV_KEY, 0x1e, 1), EventOutcome::Ignored);
        l.handle_event(&mut s, EV_KEY, BTN_EAST, 0);
        assert_eq!(&s.buttons()[..2], &[0, 0]);
    }

    #[test]
    fn test_abs_normalization() {
        let mut l = layout();
        let mut s = slot_for(&l);
        l.handle_event(&mut s, EV_ABS, ABS_X, 32767);
        l.handle_event(&mut s, EV_ABS, ABS_Y, -32768);
        l.handle_event(&mut s, EV_ABS, ABS_RZ, 255);
        assert_eq!(s.axes(), &[1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_zero_range_passes_raw_value() {
        assert_eq!(normalize_abs(5, AbsRange::default()), 5.0);
    }

    #[test]
    fn test_hat_sign_table() {
        let mut l = layout();
        let mut s = slot_for(&l);

        l.handle_event(&mut s, EV_ABS, ABS_HAT0X, -1);
        assert_eq!(s.hats()[0], HatState::LEFT.bits());
        l.handle_event(&mut s, EV_ABS, ABS_HAT0Y, 1);
        assert_eq!(s.hats()[0], HatState::LEFT_DOWN.bits());
        l.handle_event(&mut s, EV_ABS, ABS_HAT0X, 7);
        assert_eq!(s.hats()[0], HatState::RIGHT_DOWN.bits());
        l.handle_event(&mut s, EV_ABS, ABS_HAT0X, 0);
        l.handle_event(&mut s, EV_ABS, ABS_HAT0Y, -3);
        assert_eq!(s.hats()[0], HatState::UP.bits());
        // Synthesized hat buttons follow the two real buttons.
        assert_eq!(&s.buttons()[2..6], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_syn_dropped_discards_partial_frame_then_resyncs() {
        let mut l = layout();
        let mut s = slot_for(&l);
        l.handle_event(&mut s, EV_ABS, ABS_X, 0);
        l.handle_event(&mut s, EV_SYN, SYN_REPORT, 0);
        let before = s.axes().to_vec();

        assert_eq!(l.handle_event(&mut s, EV_SYN, SYN_DROPPED, 0), EventOutcome::Ignored);
        assert!(l.is_dropping());
        assert_eq!(l.handle_event(&mut s, EV_ABS, ABS_X, 32767), EventOutcome::Ignored);
        assert_eq!(l.handle_event(&mut s, EV_KEY, BTN_SOUTH, 1), EventOutcome::Ignored);
        assert_eq!(s.axes(), before.as_slice());
        assert_eq!(s.buttons()[0], 0);

        assert_eq!(l.handle_event(&mut s, EV_SYN, SYN_REPORT, 0), EventOutcome::Resync);
        assert!(!l.is_dropping());

        // The kernel's current state, as a full re-read would return it.
        l.apply_abs_state(&mut s, [(ABS_X, -32768), (ABS_Y, 32767), (ABS_RZ, 0)]);
        l.apply_key_state(&mut s, &[BTN_SOUTH]);
        assert_eq!(s.axes(), &[-1.0, 1.0, -1.0]);
        assert_eq!(&s.buttons()[..2], &[1, 0]);
    }

    #[test]
    fn test_report_without_drop_needs_no_resync() {
        let mut l = layout();
        let mut s = slot_for(&l);
        assert_eq!(l.handle_event(&mut s, EV_SYN, SYN_REPORT, 0), EventOutcome::Ignored);
    }

    #[test]
    fn test_event_node_names() {
        assert!(is_event_node("event0"));
        assert!(is_event_node("event17"));
        assert!(!is_event_node("event"));
        assert!(!is_event_node("event1a"));
        assert!(!is_event_node("js0"));
        assert!(!is_event_node("by-id"));
    }

    #[test]
    fn test_lone_hat_y_axis_gets_a_hat() {
        let l = EvdevLayout::new([], [(ABS_HAT0Y, AbsRange::default())]);
        assert_eq!(l.hat_count(), 1);
        assert_eq!(l.axis_count(), 0);
    }
}
