//! Probe binary that polls gamepads at a fixed 60 Hz tick and logs what it sees.
//!
//! Configuration is loaded from `gamepad.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p nebula-gamepad-probe -- --ticks 600` for a ten second capture.

use std::time::{Duration, Instant};

use clap::Parser;
use nebula_config::{CliArgs, Config, default_config_dir};
use nebula_gamepad::{CanonicalGamepadState, DigitalInputs, GamepadSystem, JoystickInfo, MAPPING_DB_VERSION};
use tracing::{debug, info, warn};

const TICK: Duration = Duration::from_micros(16_667);

const BUTTON_NAMES: [(DigitalInputs, &str); 12] = [
    (DigitalInputs::A, "A"),
    (DigitalInputs::B, "B"),
    (DigitalInputs::X, "X"),
    (DigitalInputs::Y, "Y"),
    (DigitalInputs::START, "Start"),
    (DigitalInputs::BACK, "Back"),
    (DigitalInputs::LEFT_THUMB, "L3"),
    (DigitalInputs::RIGHT_THUMB, "R3"),
    (DigitalInputs::DPAD_UP, "Up"),
    (DigitalInputs::DPAD_DOWN, "Down"),
    (DigitalInputs::DPAD_LEFT, "Left"),
    (DigitalInputs::DPAD_RIGHT, "Right"),
];

/// One-line summary of a snapshot.
fn describe(state: &CanonicalGamepadState) -> String {
    let held: Vec<&str> = BUTTON_NAMES
        .iter()
        .filter(|(bit, _)| state.is_pressed(*bit))
        .map(|(_, name)| *name)
        .collect();
    format!(
        "buttons=[{}] left=({:+.2},{:+.2}) right=({:+.2},{:+.2}) shoulders=({},{}) triggers=({:.2},{:.2})",
        held.join(" "),
        state.left_stick.normalized_x,
        state.left_stick.normalized_y,
        state.right_stick.normalized_x,
        state.right_stick.normalized_y,
        state.left_shoulder,
        state.right_shoulder,
        state.left_trigger,
        state.right_trigger,
    )
}

/// Remembers the previous snapshot per gamepad index so only changes are logged.
struct ChangeTracker {
    last: Vec<Option<CanonicalGamepadState>>,
}

impl ChangeTracker {
    fn new(gamepads: usize) -> Self {
        Self {
            last: vec![None; gamepads],
        }
    }

    /// A log line if `state` differs from the previous one at `index`.
    fn update(&mut self, index: usize, state: Option<CanonicalGamepadState>) -> Option<String> {
        let previous = self.last.get_mut(index)?;
        if *previous == state {
            return None;
        }
        let line = match (&previous, &state) {
            (None, Some(s)) => format!("attached {}", describe(s)),
            (Some(_), None) => "detached".to_string(),
            (_, Some(s)) => describe(s),
            (None, None) => return None,
        };
        *previous = state;
        Some(line)
    }
}

fn log_joysticks(joysticks: &[JoystickInfo]) {
    if joysticks.is_empty() {
        info!("No joysticks attached");
    }
    for j in joysticks {
        info!(
            slot = j.id.index(),
            name = %j.name,
            guid = %j.guid,
            axes = j.axis_count,
            buttons = j.button_count,
            hats = j.hat_count,
            mapped = j.mapped,
            "Joystick"
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = match args.config.clone() {
        Some(dir) => dir,
        None => default_config_dir()?,
    };

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    let mut gamepads: GamepadSystem = GamepadSystem::new(&config.gamepad);
    gamepads.init();
    if !gamepads.is_enabled() {
        warn!("Gamepad support is unavailable, nothing to probe");
    }
    let max = gamepads.get_max_supported_gamepads();
    info!(max_gamepads = max, mappings = MAPPING_DB_VERSION, "Probe started");

    let mut tracker = ChangeTracker::new(max);
    let mut known: Option<Vec<JoystickInfo>> = None;
    let mut tick: u64 = 0;

    while args.ticks.is_none_or(|limit| tick < limit) {
        let started = Instant::now();
        gamepads.record_state();

        let joysticks = gamepads.joysticks();
        if known.as_ref() != Some(&joysticks) {
            log_joysticks(&joysticks);
            known = Some(joysticks);
        }

        for index in 0..max {
            if let Some(line) = tracker.update(index, gamepads.get_gamepad_state(index)) {
                info!(gamepad = index, tick, "{line}");
            }
        }

        if config.debug.dump_raw_state {
            for j in known.iter().flatten() {
                if let Some(axes) = gamepads.joystick_axes(j.id) {
                    debug!(slot = j.id.index(), ?axes, "Raw axes");
                }
            }
        }

        tick += 1;
        if let Some(rest) = TICK.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    gamepads.shutdown();
    info!(ticks = tick, "Probe finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_lists_held_buttons() {
        let state = CanonicalGamepadState {
            digital_inputs: DigitalInputs::A | DigitalInputs::DPAD_LEFT,
            right_trigger: 0.5,
            ..Default::default()
        };
        let line = describe(&state);
        assert!(line.contains("buttons=[A Left]"), "{line}");
        assert!(line.contains("triggers=(0.00,0.50)"), "{line}");
    }

    #[test]
    fn test_tracker_reports_only_changes() {
        let mut tracker = ChangeTracker::new(2);
        let idle = CanonicalGamepadState::default();
        let pressed = CanonicalGamepadState {
            digital_inputs: DigitalInputs::START,
            ..Default::default()
        };

        assert_eq!(tracker.update(0, None), None);
        assert!(tracker.update(0, Some(idle)).unwrap().starts_with("attached"));
        assert_eq!(tracker.update(0, Some(idle)), None);
        assert!(tracker.update(0, Some(pressed)).unwrap().contains("Start"));
        assert_eq!(tracker.update(0, None).as_deref(), Some("detached"));
    }

    #[test]
    fn test_tracker_ignores_indices_past_cap() {
        let mut tracker = ChangeTracker::new(1);
        assert_eq!(tracker.update(3, Some(CanonicalGamepadState::default())), None);
    }
}
