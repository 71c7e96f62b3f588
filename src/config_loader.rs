use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::kinematics::{ConverterMode, MachineConfig, WorkspaceBounds};
use crate::wire::WireFormat;

pub const CONFIG_FILE_NAME: &str = "psamathe.yaml";
pub const CONFIG_ENV_VAR: &str = "PSAMATHE_CONFIG";

// -------------------- Serial (table controller) config --------------------

fn default_baud_rate() -> u32 { 115200 }
fn default_timeout_ms() -> u64 { 1000 }
fn default_reset_delay_ms() -> u64 { 2000 }

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SerialSettings {
    // None means no table attached to this host; sends report TransportUnavailable
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    // Opening the port resets the Arduino
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            reset_delay_ms: default_reset_delay_ms(),
        }
    }
}

// -------------------- Timing config --------------------

fn default_pre_send_ms() -> u64 { 1000 }
fn default_settle_ms() -> u64 { 2000 }

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct TimingSettings {
    #[serde(default = "default_pre_send_ms")]
    pub pre_send_ms: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

impl TimingSettings {
    pub const IMMEDIATE: TimingSettings = TimingSettings { pre_send_ms: 0, settle_ms: 0 };

    pub fn pre_send(&self) -> Duration {
        Duration::from_millis(self.pre_send_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self { pre_send_ms: default_pre_send_ms(), settle_ms: default_settle_ms() }
    }
}

// -------------------- Tool profiles --------------------

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ToolProfile {
    pub machine: MachineConfig,
    pub mode: ConverterMode,
    // Absent means no annulus check on relative moves
    #[serde(default)]
    pub workspace: Option<WorkspaceBounds>,
    #[serde(default)]
    pub wire_format: WireFormat,
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub position_db: Option<PathBuf>,
    #[serde(default)]
    pub journal: Option<PathBuf>,
}

impl ToolProfile {
    /// Profile with the reference relative-move settings and no side files.
    pub fn reference() -> Self {
        Self {
            machine: MachineConfig::reference(),
            mode: ConverterMode::RELATIVE_MOVE,
            workspace: Some(WorkspaceBounds::default()),
            wire_format: WireFormat::AxisLines,
            serial: SerialSettings::default(),
            timing: TimingSettings::default(),
            position_db: None,
            journal: None,
        }
    }

    /// Fails loudly on nonsense numbers rather than sending garbage to the table.
    pub fn validate(&self, name: &str) -> Result<()> {
        self.machine
            .validate()
            .with_context(|| format!("Invalid MACHINE block in profile '{}'", name))?;
        if let Some(ws) = &self.workspace {
            if !(ws.inner_limit_radius_mm.is_finite() && ws.workspace_radius_mm.is_finite())
                || ws.inner_limit_radius_mm < 0.0
                || ws.inner_limit_radius_mm >= ws.workspace_radius_mm
            {
                return Err(anyhow!(
                    "WORKSPACE in profile '{}' must satisfy 0 <= INNER_LIMIT_RADIUS_MM < WORKSPACE_RADIUS_MM",
                    name
                ));
            }
        }
        if self.serial.baud_rate == 0 {
            return Err(anyhow!("SERIAL.BAUD_RATE must be non-zero in profile '{}'", name));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    pub profiles: BTreeMap<String, ToolProfile>,
    // hostname -> profile name
    #[serde(default)]
    pub hosts: BTreeMap<String, String>,
    #[serde(default)]
    pub default_profile: Option<String>,
}

/// A profile chosen for this run, with the name it was chosen under.
#[derive(Debug, Clone)]
pub struct SelectedProfile {
    pub name: String,
    pub profile: ToolProfile,
}

/// Resolve the config path: explicit flag, then $PSAMATHE_CONFIG, then psamathe.yaml beside Cargo.toml.
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    // Ensure .env is loaded once here so all env-based config is centralized
    let _ = dotenv();
    if let Ok(p) = env::var(CONFIG_ENV_VAR) {
        if !p.trim().is_empty() {
            return PathBuf::from(p);
        }
    }
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(CONFIG_FILE_NAME)
}

pub fn parse_config(text: &str) -> Result<Config> {
    let cfg: Config = serde_yaml::from_str(text)?;
    if cfg.profiles.is_empty() {
        return Err(anyhow!("PROFILES is empty"));
    }
    for (name, profile) in &cfg.profiles {
        profile.validate(name)?;
    }
    Ok(cfg)
}

pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    // Single source of truth: one psamathe.yaml
    let path = config_path(explicit);
    let file = File::open(&path)
        .map_err(|e| anyhow!("Missing required {} at {:?}: {}", CONFIG_FILE_NAME, path, e))?;
    let text = std::io::read_to_string(file)
        .with_context(|| format!("Failed to read {:?}", path))?;
    let cfg = parse_config(&text).with_context(|| format!("Invalid config {:?}", path))?;
    log::info!(target: "config_loader", "Loaded {} profile(s) from {:?}", cfg.profiles.len(), path);
    Ok(cfg)
}

impl Config {
    /// Pick a profile: explicit name, then this host's entry, then DEFAULT_PROFILE.
    pub fn select(&self, requested: Option<&str>, hostname: &str) -> Result<SelectedProfile> {
        let name = match requested {
            Some(name) => name.to_string(),
            None => match self.hosts.get(hostname) {
                Some(name) => name.clone(),
                None => self.default_profile.clone().ok_or_else(|| {
                    anyhow!("No profile requested, no HOSTS entry for '{}' and no DEFAULT_PROFILE", hostname)
                })?,
            },
        };
        let profile = self
            .profiles
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("Profile '{}' not found in PROFILES", name))?;
        log::info!(target: "config_loader", "Using profile '{}' (hostname={})", name, hostname);
        Ok(SelectedProfile { name, profile })
    }
}

pub fn current_hostname() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematics::Rounding;

    const SAMPLE: &str = r#"
DEFAULT_PROFILE: point_to_point
HOSTS:
  sandtable-1: lin_rot
PROFILES:
  lin_rot:
    MACHINE:
      INOUT_STEPS_PER_MM: 33.0
      ROTATION_DEG_PER_STEP: 0.0679
      COMPENSATION_RATIO: 0.3167
      MAX_IN_OUT_STEPS: 4280
    MODE:
      ROUNDING: truncate
    SERIAL:
      PORT: /dev/ttyACM0
  point_to_point:
    MACHINE:
      INOUT_STEPS_PER_MM: 33.0
      ROTATION_DEG_PER_STEP: 0.0675
      COMPENSATION_RATIO: 0.3167
      INVERT_WIRING: true
    MODE:
      ROUNDING: round
      WRAP_ANGLE: true
    WORKSPACE:
      INNER_LIMIT_RADIUS_MM: 30.0
      WORKSPACE_RADIUS_MM: 130.0
    WIRE_FORMAT: combined_move
    TIMING:
      PRE_SEND_MS: 0
      SETTLE_MS: 500
"#;

    #[test]
    fn test_parse_and_defaults() {
        let cfg = parse_config(SAMPLE).unwrap();
        let lin = &cfg.profiles["lin_rot"];
        assert_eq!(lin.mode.rounding, Rounding::Truncate);
        assert!(!lin.mode.wrap_angle);
        assert_eq!(lin.machine.max_in_out_steps, Some(4280));
        assert_eq!(lin.serial.baud_rate, 115200);
        assert_eq!(lin.serial.reset_delay_ms, 2000);
        assert_eq!(lin.timing, TimingSettings::default());
        assert_eq!(lin.wire_format, WireFormat::AxisLines);

        let p2p = &cfg.profiles["point_to_point"];
        assert!(p2p.machine.invert_wiring);
        assert_eq!(p2p.wire_format, WireFormat::CombinedMove);
        assert_eq!(p2p.timing.settle_ms, 500);
        assert_eq!(p2p.serial.port, None);
    }

    #[test]
    fn test_profile_selection_order() {
        let cfg = parse_config(SAMPLE).unwrap();
        assert_eq!(cfg.select(Some("point_to_point"), "sandtable-1").unwrap().name, "point_to_point");
        assert_eq!(cfg.select(None, "sandtable-1").unwrap().name, "lin_rot");
        assert_eq!(cfg.select(None, "laptop").unwrap().name, "point_to_point");
        assert!(cfg.select(Some("missing"), "laptop").is_err());
    }

    #[test]
    fn test_missing_keys_fail_loudly() {
        let no_machine = "PROFILES:\n  broken:\n    MODE:\n      ROUNDING: round\n";
        assert!(parse_config(no_machine).is_err());

        let bad_workspace = SAMPLE.replace("INNER_LIMIT_RADIUS_MM: 30.0", "INNER_LIMIT_RADIUS_MM: 300.0");
        assert!(parse_config(&bad_workspace).is_err());

        let no_default = "PROFILES:\n  only:\n    MACHINE:\n      INOUT_STEPS_PER_MM: 33.0\n      ROTATION_DEG_PER_STEP: 0.0679\n      COMPENSATION_RATIO: 0.3167\n    MODE:\n      ROUNDING: round\n";
        let cfg = parse_config(no_default).unwrap();
        assert!(cfg.select(None, "anywhere").is_err());
    }

    #[test]
    fn test_shipped_config_parses() {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(CONFIG_FILE_NAME);
        let cfg = load_config(Some(path.as_path())).unwrap();
        for name in ["lin_rot", "point_to_point", "point_to_point_v1", "pattern_stepper"] {
            assert!(cfg.profiles.contains_key(name), "missing profile {}", name);
        }
    }
}
