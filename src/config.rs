//! TOML config file loading and validation: control timing, alert transport,
//! and the wiring tables mapping logical sensors/outputs to BCM GPIO pins.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;

use crate::io::{OutputId, SensorId};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub(crate) control: ControlSettings,
    #[serde(default)]
    pub(crate) mqtt: MqttSettings,
    #[serde(default)]
    pub(crate) sensors: Vec<SensorEntry>,
    #[serde(default)]
    pub(crate) outputs: Vec<OutputEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct ControlSettings {
    /// Control loop period in milliseconds.
    pub(crate) tick_ms: u64,
    /// Consecutive identical raw reads before a debounced value changes.
    pub(crate) debounce_ticks: u32,
    /// Blink half-period in ticks (outputs toggle every this many ticks).
    pub(crate) blink_ticks: u64,
    /// Dry-run fault recovery policy.
    pub(crate) dry_run_clear: DryRunClear,
    /// Consecutive non-empty sump ticks before an auto dry-run clear.
    pub(crate) dry_run_clear_ticks: u32,
    /// Consecutive consistent ticks before a sensor fault clears.
    pub(crate) inconsistency_clear_ticks: u32,
    /// Consecutive ticks at FULL or below before an overflow fault clears.
    pub(crate) overflow_clear_ticks: u32,
    /// Outbound alert queue capacity; oldest alerts are dropped beyond it.
    pub(crate) alert_queue_capacity: usize,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            tick_ms: 500,
            debounce_ticks: 3,
            blink_ticks: 1,
            dry_run_clear: DryRunClear::Auto,
            dry_run_clear_ticks: 5,
            inconsistency_clear_ticks: 5,
            overflow_clear_ticks: 5,
            alert_queue_capacity: 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DryRunClear {
    /// Clear once the sump level has recovered for `dry_run_clear_ticks`.
    Auto,
    /// Latch until an acknowledgement command arrives.
    Manual,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub(crate) struct MqttSettings {
    pub(crate) enabled: bool,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) topic_prefix: String,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1883,
            topic_prefix: "pumphouse".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SensorEntry {
    pub(crate) id: SensorId,
    pub(crate) bcm_pin: u8,
    pub(crate) pull: Pull,
    #[serde(default)]
    pub(crate) active_low: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OutputEntry {
    pub(crate) id: OutputId,
    pub(crate) bcm_pin: u8,
    #[serde(default)]
    pub(crate) active_low: bool,
}

/// Internal pull resistor direction for an input pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Pull {
    Up,
    Down,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins available on the Raspberry Pi 40-pin header for general
/// use. GPIO 0-1 are reserved for the ID EEPROM and must never be used.
/// GPIO 28+ are not exposed on the standard header.
const VALID_GPIO_PINS: &[u8] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub(crate) fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_control(&mut errors);
        self.validate_pins(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_control(&self, errors: &mut Vec<String>) {
        let c = &self.control;

        if !(50..=5000).contains(&c.tick_ms) {
            errors.push(format!(
                "control: tick_ms {} out of range [50, 5000]",
                c.tick_ms
            ));
        }
        if c.debounce_ticks == 0 {
            errors.push("control: debounce_ticks must be positive".to_string());
        }
        if c.blink_ticks == 0 {
            errors.push("control: blink_ticks must be positive".to_string());
        }
        if c.dry_run_clear_ticks == 0 {
            errors.push("control: dry_run_clear_ticks must be positive".to_string());
        }
        if c.inconsistency_clear_ticks == 0 {
            errors.push("control: inconsistency_clear_ticks must be positive".to_string());
        }
        if c.overflow_clear_ticks == 0 {
            errors.push("control: overflow_clear_ticks must be positive".to_string());
        }
        if c.alert_queue_capacity == 0 {
            errors.push("control: alert_queue_capacity must be positive".to_string());
        }
    }

    fn validate_pins(&self, errors: &mut Vec<String>) {
        let mut seen_pins: HashSet<u8> = HashSet::new();
        let mut seen_sensors: HashSet<SensorId> = HashSet::new();
        let mut seen_outputs: HashSet<OutputId> = HashSet::new();

        for s in &self.sensors {
            if !seen_sensors.insert(s.id) {
                errors.push(format!("sensor '{}': duplicate entry", s.id));
            }
            if !VALID_GPIO_PINS.contains(&s.bcm_pin) {
                errors.push(format!(
                    "sensor '{}': bcm_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    s.id, s.bcm_pin
                ));
            } else if !seen_pins.insert(s.bcm_pin) {
                errors.push(format!(
                    "sensor '{}': bcm_pin {} is already in use",
                    s.id, s.bcm_pin
                ));
            }
        }

        for o in &self.outputs {
            if !seen_outputs.insert(o.id) {
                errors.push(format!("output '{}': duplicate entry", o.id));
            }
            if !VALID_GPIO_PINS.contains(&o.bcm_pin) {
                errors.push(format!(
                    "output '{}': bcm_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    o.id, o.bcm_pin
                ));
            } else if !seen_pins.insert(o.bcm_pin) {
                errors.push(format!(
                    "output '{}': bcm_pin {} is already in use",
                    o.id, o.bcm_pin
                ));
            }
        }

        // Every logical sensor and output must be wired exactly once.
        for id in SensorId::ALL {
            if !seen_sensors.contains(&id) {
                errors.push(format!("sensor '{id}': no pin mapping"));
            }
        }
        for id in OutputId::ALL {
            if !seen_outputs.contains(&id) {
                errors.push(format!("output '{id}': no pin mapping"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub(crate) fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
