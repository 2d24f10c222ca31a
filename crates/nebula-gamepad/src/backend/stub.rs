use nebula_config::GamepadConfig;

use super::{Backend, PollMode};
use crate::registry::{JoystickId, Registry};

/// Backend for targets without a supported input stack. Never finds a device.
pub struct StubBackend;

impl Backend for StubBackend {
    const MAX_SUPPORTED_GAMEPADS: usize = 0;

    fn new(_config: &GamepadConfig) -> Self {
        Self
    }

    fn init(&mut self, _registry: &mut Registry) -> bool {
        true
    }

    fn terminate(&mut self, _registry: &mut Registry) {}

    fn detect(&mut self, _registry: &mut Registry) {}

    fn poll(&mut self, _registry: &mut Registry, _id: JoystickId, _mode: PollMode) -> bool {
        false
    }
}
