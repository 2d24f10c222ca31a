//! Fixed-capacity joystick registry.
//!
//! The registry is a small slot map: [`MAX_JOYSTICKS`] slots, allocated by a
//! linear scan for the first free one. Slot indices are stable for as long as
//! a device stays attached, and the first `max_gamepads` of them are the
//! indices the public API reports.

use tracing::{debug, info};

use crate::mapping::{ElementCounts, Mapping, MappingDatabase, MappingId, truncate_name};

/// Number of raw devices the registry tracks.
pub const MAX_JOYSTICKS: usize = 16;

/// Number of synthesized buttons appended per hat (up, right, down, left).
pub const HAT_BUTTONS: usize = 4;

bitflags::bitflags! {
    /// Direction bits of a hat switch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HatState: u8 {
        const UP = 0x01;
        const RIGHT = 0x02;
        const DOWN = 0x04;
        const LEFT = 0x08;
        const RIGHT_UP = Self::RIGHT.bits() | Self::UP.bits();
        const RIGHT_DOWN = Self::RIGHT.bits() | Self::DOWN.bits();
        const LEFT_UP = Self::LEFT.bits() | Self::UP.bits();
        const LEFT_DOWN = Self::LEFT.bits() | Self::DOWN.bits();
    }
}

impl HatState {
    pub const CENTERED: Self = Self::empty();

    /// Hat states for the 8 compass positions clockwise from north, then
    /// centred. Used by backends that report hats as a position index.
    pub const POSITIONS: [Self; 9] = [
        Self::UP,
        Self::RIGHT_UP,
        Self::RIGHT,
        Self::RIGHT_DOWN,
        Self::DOWN,
        Self::LEFT_DOWN,
        Self::LEFT,
        Self::LEFT_UP,
        Self::CENTERED,
    ];

    /// Decode a position index; anything outside `0..=7` is centred.
    pub fn from_position(position: i64) -> Self {
        usize::try_from(position)
            .ok()
            .and_then(|p| Self::POSITIONS.get(p).copied())
            .unwrap_or(Self::CENTERED)
    }
}

/// Stable index of a registry slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoystickId(usize);

impl JoystickId {
    /// Wrap a raw slot index. Returns `None` past the registry capacity.
    pub fn new(index: usize) -> Option<Self> {
        (index < MAX_JOYSTICKS).then_some(Self(index))
    }

    pub fn index(self) -> usize {
        self.0
    }
}

/// Identity and shape of a device a backend wants to register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub guid: String,
    pub axis_count: usize,
    pub button_count: usize,
    pub hat_count: usize,
}

/// One registry slot.
#[derive(Debug, Clone, Default)]
pub struct JoystickSlot {
    allocated: bool,
    connected: bool,
    axes: Vec<f32>,
    /// Real buttons followed by [`HAT_BUTTONS`] synthesized buttons per hat.
    buttons: Vec<u8>,
    button_count: usize,
    hats: Vec<u8>,
    name: String,
    guid: String,
    mapping: Option<MappingId>,
}

impl JoystickSlot {
    pub(crate) fn with_descriptor(desc: &DeviceDescriptor) -> Self {
        Self {
            allocated: true,
            connected: false,
            axes: vec![0.0; desc.axis_count],
            buttons: vec![0; desc.button_count + desc.hat_count * HAT_BUTTONS],
            button_count: desc.button_count,
            hats: vec![0; desc.hat_count],
            name: truncate_name(&desc.name),
            guid: desc.guid.to_ascii_lowercase(),
            mapping: None,
        }
    }

    pub fn is_allocated(&self) -> bool {
        self.allocated
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    /// Raw axis values in `[-1.0, 1.0]`.
    pub fn axes(&self) -> &[f32] {
        &self.axes
    }

    /// Raw buttons, including synthesized hat buttons after the real ones.
    pub fn buttons(&self) -> &[u8] {
        &self.buttons
    }

    /// Raw hat bitfields, see [`HatState`].
    pub fn hats(&self) -> &[u8] {
        &self.hats
    }

    /// Axis, real button and hat counts (without synthesized hat buttons).
    pub fn counts(&self) -> ElementCounts {
        ElementCounts {
            axes: self.axes.len(),
            buttons: self.button_count,
            hats: self.hats.len(),
        }
    }

    pub fn mapping(&self) -> Option<MappingId> {
        self.mapping
    }

    /// Store a raw axis value. Out-of-range indices are ignored.
    pub fn set_axis(&mut self, index: usize, value: f32) {
        if let Some(axis) = self.axes.get_mut(index) {
            *axis = value;
        }
    }

    /// Store a raw button value. Out-of-range indices are ignored.
    pub fn set_button(&mut self, index: usize, pressed: bool) {
        if index < self.button_count {
            self.buttons[index] = u8::from(pressed);
        }
    }

    /// Store a hat and refresh its four synthesized buttons.
    pub fn set_hat(&mut self, index: usize, state: HatState) {
        if index >= self.hats.len() {
            return;
        }
        let base = self.button_count + index * HAT_BUTTONS;
        let directions = [HatState::UP, HatState::RIGHT, HatState::DOWN, HatState::LEFT];
        for (offset, direction) in directions.into_iter().enumerate() {
            self.buttons[base + offset] = u8::from(state.contains(direction));
        }
        self.hats[index] = state.bits();
    }
}

/// Table of joystick slots plus the mapping database used to resolve them.
pub struct Registry {
    slots: [JoystickSlot; MAX_JOYSTICKS],
    mappings: MappingDatabase,
}

impl Registry {
    pub fn new(mappings: MappingDatabase) -> Self {
        Self {
            slots: std::array::from_fn(|_| JoystickSlot::default()),
            mappings,
        }
    }

    /// Claim the first free slot for `desc` and resolve its mapping.
    ///
    /// Returns `None` when every slot is allocated. The slot starts
    /// disconnected; the backend marks it connected once its native handle is
    /// ready.
    pub fn alloc_slot(&mut self, desc: &DeviceDescriptor) -> Option<JoystickId> {
        let index = self.slots.iter().position(|s| !s.allocated)?;
        let mut slot = JoystickSlot::with_descriptor(desc);
        slot.mapping = self.mappings.find_valid(&slot.guid, slot.counts());
        debug!(
            slot = index,
            guid = %slot.guid,
            name = %slot.name,
            mapped = slot.mapping.is_some(),
            "Allocated joystick slot"
        );
        self.slots[index] = slot;
        Some(JoystickId(index))
    }

    /// Mark a slot connected.
    pub fn connect(&mut self, id: JoystickId) {
        let slot = &mut self.slots[id.0];
        if slot.allocated && !slot.connected {
            slot.connected = true;
            info!(slot = id.0, name = %slot.name, guid = %slot.guid, "Joystick connected");
        }
    }

    /// Zero a slot and return it to the pool.
    pub fn free_slot(&mut self, id: JoystickId) {
        let slot = &mut self.slots[id.0];
        if slot.allocated {
            info!(slot = id.0, name = %slot.name, "Joystick disconnected");
        }
        *slot = JoystickSlot::default();
    }

    pub fn slot(&self, id: JoystickId) -> &JoystickSlot {
        &self.slots[id.0]
    }

    pub fn slot_mut(&mut self, id: JoystickId) -> &mut JoystickSlot {
        &mut self.slots[id.0]
    }

    /// Ids of every allocated slot, in index order.
    pub fn allocated(&self) -> impl Iterator<Item = JoystickId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.allocated)
            .map(|(i, _)| JoystickId(i))
    }

    /// Find the allocated slot whose GUID equals `guid`.
    pub fn find_by_guid(&self, guid: &str) -> Option<JoystickId> {
        self.allocated()
            .find(|id| self.slots[id.0].guid.eq_ignore_ascii_case(guid))
    }

    /// The mapping attached to a slot, if any.
    pub fn mapping_for(&self, id: JoystickId) -> Option<&Mapping> {
        self.slots[id.0]
            .mapping
            .and_then(|m| self.mappings.get(m))
    }

    pub fn mappings(&self) -> &MappingDatabase {
        &self.mappings
    }

    /// Add mappings from `text` and re-resolve every allocated slot.
    pub fn update_mappings(&mut self, text: &str) -> usize {
        let count = self.mappings.load(text);
        for slot in self.slots.iter_mut().filter(|s| s.allocated) {
            slot.mapping = self.mappings.find_valid(&slot.guid, slot.counts());
        }
        count
    }

    /// Free every slot. Native handles must already be released.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = JoystickSlot::default();
        }
    }
}
