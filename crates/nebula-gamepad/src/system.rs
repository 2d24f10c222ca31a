//! The public polling API.
//!
//! [`GamepadSystem`] owns the registry and one platform backend. The host
//! calls [`record_state`](GamepadSystem::record_state) once per tick on the
//! thread that runs its event loop, then reads snapshots with
//! [`get_gamepad_state`](GamepadSystem::get_gamepad_state). Nothing here
//! blocks, spawns threads, or returns an error: failures become log lines and
//! empty snapshots.

use nebula_config::GamepadConfig;
use tracing::{debug, info, warn};

use crate::backend::{Backend, PlatformBackend, PollMode};
use crate::error::GamepadError;
use crate::mapping::MappingDatabase;
use crate::normalize::{NormalizeSettings, canonical_state, resolve};
use crate::registry::{JoystickId, MAX_JOYSTICKS, Registry};
use crate::state::CanonicalGamepadState;

/// Diagnostic view of one allocated registry slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoystickInfo {
    pub id: JoystickId,
    pub name: String,
    pub guid: String,
    pub axis_count: usize,
    pub button_count: usize,
    pub hat_count: usize,
    pub connected: bool,
    /// A mapping passed validation for this device.
    pub mapped: bool,
}

/// Gamepad discovery, polling and normalisation for one process.
pub struct GamepadSystem<B: Backend = PlatformBackend> {
    backend: B,
    registry: Registry,
    settings: NormalizeSettings,
    enabled: bool,
    initialized: bool,
    max_gamepads: usize,
    states: Vec<Option<CanonicalGamepadState>>,
}

impl<B: Backend> GamepadSystem<B> {
    /// Build the system and its mapping database. No device is touched until
    /// [`init`](Self::init).
    pub fn new(config: &GamepadConfig) -> Self {
        let mut mappings = MappingDatabase::builtin();
        for line in &config.extra_mappings {
            mappings.load(line);
        }

        let max_gamepads = if B::MAX_SUPPORTED_GAMEPADS == 0 {
            0
        } else {
            config.max_gamepads.min(MAX_JOYSTICKS)
        };

        Self {
            backend: B::new(config),
            registry: Registry::new(mappings),
            settings: NormalizeSettings::from(config),
            enabled: config.enabled,
            initialized: false,
            max_gamepads,
            states: vec![None; max_gamepads],
        }
    }

    /// Bring up the platform backend and enumerate attached devices.
    ///
    /// Failure only disables gamepad support for this system.
    pub fn init(&mut self) {
        if self.initialized || !self.enabled {
            return;
        }
        if self.backend.init(&mut self.registry) {
            self.initialized = true;
            info!(
                max_gamepads = self.max_gamepads,
                mappings = self.registry.mappings().len(),
                "Gamepad support initialised"
            );
        } else {
            let err = GamepadError::BackendUnavailable(std::any::type_name::<B>().to_string());
            warn!(error = %err, "Gamepad support disabled");
            self.backend.terminate(&mut self.registry);
            self.registry.clear();
        }
    }

    /// Release every native handle and free every slot.
    pub fn shutdown(&mut self) {
        if !self.initialized {
            return;
        }
        self.backend.terminate(&mut self.registry);
        self.registry.clear();
        self.states.fill(None);
        self.initialized = false;
        debug!("Gamepad support shut down");
    }

    /// Whether the backend is up and polling.
    pub fn is_enabled(&self) -> bool {
        self.initialized
    }

    /// Number of gamepad indices [`get_gamepad_state`](Self::get_gamepad_state)
    /// answers for.
    pub fn get_max_supported_gamepads(&self) -> usize {
        self.max_gamepads
    }

    /// Snapshot every connected, mapped gamepad slot.
    ///
    /// Previous snapshots are cleared first, so a device that disconnected or
    /// failed its poll reads as absent afterwards. Every other connected
    /// device is polled for presence only.
    pub fn record_state(&mut self) {
        self.states.fill(None);
        if !self.initialized {
            return;
        }
        self.backend.detect(&mut self.registry);

        let ids: Vec<JoystickId> = self.registry.allocated().collect();
        for id in ids {
            let index = id.index();
            let slot = self.registry.slot(id);
            if !slot.is_connected() {
                continue;
            }

            // Unreported devices are only checked for presence.
            let reported = index < self.max_gamepads && slot.mapping().is_some();
            if !reported {
                self.backend.poll(&mut self.registry, id, PollMode::Presence);
                continue;
            }
            if !self.backend.poll(&mut self.registry, id, PollMode::All) {
                continue;
            }
            if let Some(mapping) = self.registry.mapping_for(id) {
                let inputs = resolve(self.registry.slot(id), mapping);
                self.states[index] = Some(canonical_state(&inputs, &self.settings));
            }
        }
    }

    /// The last snapshot for gamepad `index`, or `None` when the index is out
    /// of range or nothing usable is attached there.
    pub fn get_gamepad_state(&self, index: usize) -> Option<CanonicalGamepadState> {
        self.states.get(index).copied().flatten()
    }

    /// Add or replace mappings and re-resolve every attached device.
    /// Returns the number of lines accepted.
    pub fn update_mappings(&mut self, text: &str) -> usize {
        let count = self.registry.update_mappings(text);
        info!(count, "Updated gamepad mappings");
        count
    }

    /// Every allocated registry slot, including ones past the gamepad cap and
    /// devices without a mapping.
    pub fn joysticks(&self) -> Vec<JoystickInfo> {
        self.registry
            .allocated()
            .map(|id| {
                let slot = self.registry.slot(id);
                let counts = slot.counts();
                JoystickInfo {
                    id,
                    name: slot.name().to_string(),
                    guid: slot.guid().to_string(),
                    axis_count: counts.axes,
                    button_count: counts.buttons,
                    hat_count: counts.hats,
                    connected: slot.is_connected(),
                    mapped: slot.mapping().is_some(),
                }
            })
            .collect()
    }

    /// Whether the device in `id` still answers.
    pub fn joystick_present(&mut self, id: JoystickId) -> bool {
        self.poll_raw(id, PollMode::Presence)
    }

    /// Raw axes of `id`, refreshed now.
    pub fn joystick_axes(&mut self, id: JoystickId) -> Option<&[f32]> {
        self.poll_raw(id, PollMode::Axes)
            .then(|| self.registry.slot(id).axes())
    }

    /// Raw buttons of `id` (hat buttons appended), refreshed now.
    pub fn joystick_buttons(&mut self, id: JoystickId) -> Option<&[u8]> {
        self.poll_raw(id, PollMode::Buttons)
            .then(|| self.registry.slot(id).buttons())
    }

    /// Raw hat bitfields of `id`, refreshed now.
    pub fn joystick_hats(&mut self, id: JoystickId) -> Option<&[u8]> {
        self.poll_raw(id, PollMode::Buttons)
            .then(|| self.registry.slot(id).hats())
    }

    fn poll_raw(&mut self, id: JoystickId, mode: PollMode) -> bool {
        self.initialized
            && self.registry.slot(id).is_allocated()
            && self.backend.poll(&mut self.registry, id, mode)
    }

    #[cfg(test)]
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: Backend> Drop for GamepadSystem<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Test backend ────────────────────────────────────────────────────────────

/// A scripted backend that needs no hardware.
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::registry::{DeviceDescriptor, HatState};

    #[derive(Debug, Clone)]
    pub struct FakeDevice {
        pub desc: DeviceDescriptor,
        pub axes: Vec<f32>,
        pub buttons: Vec<bool>,
        pub hats: Vec<HatState>,
        /// The next poll fails as if the device was pulled.
        pub fail_next_poll: bool,
    }

    impl FakeDevice {
        pub fn new(guid: &str, axes: usize, buttons: usize, hats: usize) -> Self {
            Self {
                desc: DeviceDescriptor {
                    name: "Fake Pad".to_string(),
                    guid: guid.to_string(),
                    axis_count: axes,
                    button_count: buttons,
                    hat_count: hats,
                },
                axes: vec![0.0; axes],
                buttons: vec![false; buttons],
                hats: vec![HatState::CENTERED; hats],
                fail_next_poll: false,
            }
        }
    }

    pub struct FakeBackend {
        pub init_ok: bool,
        /// Devices attached at the next `init` or `detect`.
        pub plugged: Vec<FakeDevice>,
        /// Slots to remove at the next `detect`.
        pub unplugged: Vec<JoystickId>,
        pub devices: [Option<FakeDevice>; MAX_JOYSTICKS],
        pub polls: usize,
    }

    impl FakeBackend {
        pub fn device_mut(&mut self, index: usize) -> &mut FakeDevice {
            self.devices[index].as_mut().unwrap()
        }

        fn attach_pending(&mut self, registry: &mut Registry) {
            for device in std::mem::take(&mut self.plugged) {
                if let Some(id) = registry.alloc_slot(&device.desc) {
                    registry.connect(id);
                    self.devices[id.index()] = Some(device);
                }
            }
        }
    }

    impl Backend for FakeBackend {
        const MAX_SUPPORTED_GAMEPADS: usize = 4;

        fn new(_config: &GamepadConfig) -> Self {
            Self {
                init_ok: true,
                plugged: Vec::new(),
                unplugged: Vec::new(),
                devices: std::array::from_fn(|_| None),
                polls: 0,
            }
        }

        fn init(&mut self, registry: &mut Registry) -> bool {
            if !self.init_ok {
                return false;
            }
            self.attach_pending(registry);
            true
        }

        fn terminate(&mut self, registry: &mut Registry) {
            for id in registry.allocated().collect::<Vec<_>>() {
                self.devices[id.index()] = None;
                registry.free_slot(id);
            }
        }

        fn detect(&mut self, registry: &mut Registry) {
            for id in std::mem::take(&mut self.unplugged) {
                self.devices[id.index()] = None;
                registry.free_slot(id);
            }
            self.attach_pending(registry);
        }

        fn poll(&mut self, registry: &mut Registry, id: JoystickId, mode: PollMode) -> bool {
            self.polls += 1;
            let Some(device) = self.devices[id.index()].as_mut() else {
                return false;
            };
            if device.fail_next_poll {
                self.devices[id.index()] = None;
                registry.free_slot(id);
                return false;
            }
            let slot = registry.slot_mut(id);
            if mode.wants_axes() {
                for (i, v) in device.axes.iter().enumerate() {
                    slot.set_axis(i, *v);
                }
            }
            if mode.wants_buttons() {
                for (i, b) in device.buttons.iter().enumerate() {
                    slot.set_button(i, *b);
                }
                for (i, h) in device.hats.iter().enumerate() {
                    slot.set_hat(i, *h);
                }
            }
            true
        }
    }
}
