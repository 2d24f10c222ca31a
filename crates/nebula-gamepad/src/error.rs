//! Error types used inside the gamepad layer.
//!
//! None of these cross the public polling API; `GamepadSystem` turns them into
//! log lines and booleans.

/// Errors raised while parsing a community-format mapping string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// The GUID field is not 32 hexadecimal characters.
    #[error("invalid GUID {0:?}")]
    InvalidGuid(String),

    /// The line ended before the name field.
    #[error("mapping is missing a name")]
    MissingName,

    /// An element value such as `b3` or `h0.4` could not be parsed.
    #[error("invalid element {value:?} for {key}")]
    InvalidElement { key: String, value: String },

    /// The mapping targets another operating system.
    #[error("mapping is for platform {0:?}")]
    OtherPlatform(String),
}

/// Errors raised by platform backends while bringing up or opening devices.
#[derive(Debug, thiserror::Error)]
pub enum GamepadError {
    /// The OS input service could not be initialised.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// A device node could not be opened or queried.
    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A device does not look like a joystick.
    #[error("device is not a joystick: {0}")]
    NotAJoystick(String),

    /// Every registry slot is in use.
    #[error("joystick registry is full")]
    RegistryFull,
}
