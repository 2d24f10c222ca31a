//! Command-line argument parsing for the gamepad probe.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Gamepad probe command-line arguments.
///
/// CLI values override settings loaded from `gamepad.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "nebula-gamepad-probe", about = "Poll and log connected gamepads")]
pub struct CliArgs {
    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of gamepads to expose.
    #[arg(long)]
    pub max_gamepads: Option<usize>,

    /// Radial dead zone applied to both sticks.
    #[arg(long)]
    pub dead_zone: Option<f32>,

    /// Stop after this many ticks (runs until interrupted when absent).
    #[arg(long)]
    pub ticks: Option<u64>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
        if let Some(max) = args.max_gamepads {
            self.gamepad.max_gamepads = max;
        }
        if let Some(dz) = args.dead_zone {
            self.gamepad.left_stick_dead_zone = dz;
            self.gamepad.right_stick_dead_zone = dz;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            max_gamepads: Some(2),
            dead_zone: Some(0.3),
            log_level: Some("debug".to_string()),
            ..Default::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.gamepad.max_gamepads, 2);
        assert_eq!(config.gamepad.left_stick_dead_zone, 0.3);
        assert_eq!(config.gamepad.right_stick_dead_zone, 0.3);
        assert_eq!(config.debug.log_level, "debug");
        // Non-overridden fields retain defaults
        assert_eq!(config.gamepad.rescan_interval_ticks, 60);
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_cli_parses_flags() {
        let args = CliArgs::parse_from([
            "nebula-gamepad-probe",
            "--max-gamepads",
            "3",
            "--dead-zone",
            "0.25",
            "--ticks",
            "120",
        ]);
        assert_eq!(args.max_gamepads, Some(3));
        assert_eq!(args.dead_zone, Some(0.25));
        assert_eq!(args.ticks, Some(120));
        assert!(args.config.is_none());
    }
}
