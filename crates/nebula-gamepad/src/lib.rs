//! Cross-platform gamepad input for Nebula.
//!
//! Devices are discovered and polled by a platform backend (XInput and
//! DirectInput8 on Windows, IOHIDManager on macOS, evdev on Linux, nothing
//! elsewhere), tracked in a fixed-capacity [`Registry`], translated to a
//! canonical 15-button / 6-axis layout through community-format GUID mappings,
//! and normalised into [`CanonicalGamepadState`] snapshots.
//!
//! ```no_run
//! use nebula_config::GamepadConfig;
//! use nebula_gamepad::{DigitalInputs, GamepadSystem};
//!
//! let mut gamepads: GamepadSystem = GamepadSystem::new(&GamepadConfig::default());
//! gamepads.init();
//! loop {
//!     gamepads.record_state();
//!     if let Some(pad) = gamepads.get_gamepad_state(0)
//!         && pad.is_pressed(DigitalInputs::START)
//!     {
//!         break;
//!     }
//! }
//! ```

pub mod backend;
pub mod error;
pub mod guid;
pub mod mapping;
pub mod normalize;
pub mod registry;
pub mod state;
mod system;

pub use backend::{Backend, PlatformBackend, PollMode};
pub use error::{GamepadError, MappingError};
pub use mapping::{
    CanonicalAxis, CanonicalButton, MAPPING_DB_VERSION, MapElement, Mapping, MappingDatabase,
};
pub use registry::{HatState, JoystickId, MAX_JOYSTICKS, Registry};
pub use state::{AnalogStickState, CanonicalGamepadState, DigitalInputs};
pub use system::{GamepadSystem, JoystickInfo};
