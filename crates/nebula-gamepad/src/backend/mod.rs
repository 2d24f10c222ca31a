//! Platform backends.
//!
//! Each backend owns device discovery, hot-plug and raw polling for one OS
//! input stack. Exactly one is compiled in as [`PlatformBackend`]; all of them
//! write into the shared [`Registry`] through the same slot lifecycle:
//!
//! `unallocated -> allocated (disconnected) -> connected -> unallocated`
//!
//! A device leaves the registry either because the OS reported its removal or
//! because a poll failed; both paths end in [`Registry::free_slot`].

use nebula_config::GamepadConfig;

use crate::registry::{JoystickId, Registry};

pub mod dinput_objects;
pub mod evdev_decoder;
pub mod hid_calibration;

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
mod stub;
#[cfg(windows)]
mod win32;

#[cfg(target_os = "linux")]
pub use linux::LinuxBackend as PlatformBackend;
#[cfg(target_os = "macos")]
pub use macos::MacBackend as PlatformBackend;
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
pub use stub::StubBackend as PlatformBackend;
#[cfg(windows)]
pub use win32::WindowsBackend as PlatformBackend;

/// Which part of a device's state a poll must refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Only confirm the device is still attached.
    Presence,
    Axes,
    Buttons,
    All,
}

impl PollMode {
    pub fn wants_axes(self) -> bool {
        matches!(self, Self::Axes | Self::All)
    }

    pub fn wants_buttons(self) -> bool {
        matches!(self, Self::Buttons | Self::All)
    }
}

/// One OS input stack.
///
/// All methods run on the thread that owns the host event loop and must not
/// block.
pub trait Backend {
    /// Number of gamepads the public API may report on this platform.
    const MAX_SUPPORTED_GAMEPADS: usize;

    fn new(config: &GamepadConfig) -> Self
    where
        Self: Sized;

    /// One-time bring-up. Registers hot-plug hooks and enumerates devices that
    /// are already attached. Returns `false` if the OS service is unusable.
    fn init(&mut self, registry: &mut Registry) -> bool;

    /// Release every native handle and free every slot this backend owns.
    fn terminate(&mut self, registry: &mut Registry);

    /// Process pending hot-plug work. Called once per tick before polling.
    fn detect(&mut self, registry: &mut Registry);

    /// Refresh one slot's raw state.
    ///
    /// Returns `false`, after freeing the slot, if the device errored or went
    /// away.
    fn poll(&mut self, registry: &mut Registry, id: JoystickId, mode: PollMode) -> bool;
}
