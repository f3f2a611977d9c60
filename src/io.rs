//! Digital I/O capability seams. The `gpio` feature gates the real rppal
//! banks; without it, in-memory banks stand in so the control core runs and
//! tests on any host without Raspberry Pi hardware.

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "gpio")]
use crate::config::Pull;
#[cfg(feature = "gpio")]
use rppal::gpio::Gpio;

// ---------------------------------------------------------------------------
// Logical identities
// ---------------------------------------------------------------------------

/// Logical identity of each discrete input. Wiring (BCM pin, pull direction,
/// active level) is config, not code — see `config::SensorEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SensorId {
    #[serde(rename = "tank_25")]
    Tank25,
    #[serde(rename = "tank_50")]
    Tank50,
    #[serde(rename = "tank_100")]
    Tank100,
    TankOverflow,
    TankInlet,
    SumpEmpty,
    #[serde(rename = "sump_50")]
    Sump50,
    #[serde(rename = "sump_100")]
    Sump100,
    ModeSwitch,
}

impl SensorId {
    pub(crate) const ALL: [SensorId; 9] = [
        SensorId::Tank25,
        SensorId::Tank50,
        SensorId::Tank100,
        SensorId::TankOverflow,
        SensorId::TankInlet,
        SensorId::SumpEmpty,
        SensorId::Sump50,
        SensorId::Sump100,
        SensorId::ModeSwitch,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SensorId::Tank25 => "tank_25",
            SensorId::Tank50 => "tank_50",
            SensorId::Tank100 => "tank_100",
            SensorId::TankOverflow => "tank_overflow",
            SensorId::TankInlet => "tank_inlet",
            SensorId::SumpEmpty => "sump_empty",
            SensorId::Sump50 => "sump_50",
            SensorId::Sump100 => "sump_100",
            SensorId::ModeSwitch => "mode_switch",
        }
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logical identity of each discrete output (relays, LEDs, buzzer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum OutputId {
    MotorRelay,
    BorewellRelay,
    #[serde(rename = "led_tank_25")]
    LedTank25,
    #[serde(rename = "led_tank_50")]
    LedTank50,
    #[serde(rename = "led_tank_100")]
    LedTank100,
    #[serde(rename = "led_sump_50")]
    LedSump50,
    #[serde(rename = "led_sump_100")]
    LedSump100,
    LedFlow,
    LedError,
    LedTankLow,
    LedSumpLow,
    Buzzer,
}

impl OutputId {
    pub(crate) const ALL: [OutputId; 12] = [
        OutputId::MotorRelay,
        OutputId::BorewellRelay,
        OutputId::LedTank25,
        OutputId::LedTank50,
        OutputId::LedTank100,
        OutputId::LedSump50,
        OutputId::LedSump100,
        OutputId::LedFlow,
        OutputId::LedError,
        OutputId::LedTankLow,
        OutputId::LedSumpLow,
        OutputId::Buzzer,
    ];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            OutputId::MotorRelay => "motor_relay",
            OutputId::BorewellRelay => "borewell_relay",
            OutputId::LedTank25 => "led_tank_25",
            OutputId::LedTank50 => "led_tank_50",
            OutputId::LedTank100 => "led_tank_100",
            OutputId::LedSump50 => "led_sump_50",
            OutputId::LedSump100 => "led_sump_100",
            OutputId::LedFlow => "led_flow",
            OutputId::LedError => "led_error",
            OutputId::LedTankLow => "led_tank_low",
            OutputId::LedSumpLow => "led_sump_low",
            OutputId::Buzzer => "buzzer",
        }
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Non-blocking read of one discrete sensor. `true` means the sensor is
/// asserted in its logical sense (wet / switch closed), with any active-low
/// wiring already inverted by the implementation.
pub(crate) trait DigitalInput {
    fn read(&mut self, id: SensorId) -> Result<bool>;
}

/// Non-blocking write of one discrete output. `true` means energized / lit,
/// with active-low relay boards handled by the implementation.
pub(crate) trait DigitalOutput {
    fn write(&mut self, id: OutputId, on: bool) -> Result<()>;

    /// Fail-safe: every output off, relays included.
    fn all_off(&mut self) -> Result<()> {
        for id in OutputId::ALL {
            self.write(id, false)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory banks (development + tests — no hardware)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct MemInputs {
    levels: HashMap<SensorId, bool>,
}

impl MemInputs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Drive a simulated sensor. Unset sensors read `false` (dry/open).
    pub(crate) fn set(&mut self, id: SensorId, wet: bool) {
        self.levels.insert(id, wet);
    }
}

impl DigitalInput for MemInputs {
    fn read(&mut self, id: SensorId) -> Result<bool> {
        Ok(self.levels.get(&id).copied().unwrap_or(false))
    }
}

#[derive(Default)]
pub(crate) struct MemOutputs {
    states: HashMap<OutputId, bool>,
}

impl MemOutputs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, id: OutputId) -> bool {
        self.states.get(&id).copied().unwrap_or(false)
    }
}

impl DigitalOutput for MemOutputs {
    fn write(&mut self, id: OutputId, on: bool) -> Result<()> {
        self.states.insert(id, on);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Real GPIO banks (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub(crate) struct GpioInputs {
    pins: HashMap<SensorId, (rppal::gpio::InputPin, bool)>, // pin, active_low
}

#[cfg(feature = "gpio")]
impl GpioInputs {
    pub(crate) fn new(entries: &[(SensorId, u8, Pull, bool)]) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for &(id, bcm_pin, pull, active_low) in entries {
            let pin = gpio.get(bcm_pin)?;
            let pin = match pull {
                Pull::Up => pin.into_input_pullup(),
                Pull::Down => pin.into_input_pulldown(),
            };
            pins.insert(id, (pin, active_low));
        }

        Ok(Self { pins })
    }
}

#[cfg(feature = "gpio")]
impl DigitalInput for GpioInputs {
    fn read(&mut self, id: SensorId) -> Result<bool> {
        match self.pins.get(&id) {
            Some((pin, active_low)) => Ok(pin.is_high() != *active_low),
            None => anyhow::bail!("sensor '{id}' has no GPIO pin mapped"),
        }
    }
}

#[cfg(feature = "gpio")]
pub(crate) struct GpioOutputs {
    pins: HashMap<OutputId, (rppal::gpio::OutputPin, bool)>, // pin, active_low
}

#[cfg(feature = "gpio")]
impl GpioOutputs {
    pub(crate) fn new(entries: &[(OutputId, u8, bool)]) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();

        for &(id, bcm_pin, active_low) in entries {
            let mut pin = gpio.get(bcm_pin)?.into_output();

            // Fail-safe: ensure "OFF" at startup
            if active_low {
                pin.set_high();
            } else {
                pin.set_low();
            }

            pins.insert(id, (pin, active_low));
        }

        Ok(Self { pins })
    }
}

#[cfg(feature = "gpio")]
impl DigitalOutput for GpioOutputs {
    fn write(&mut self, id: OutputId, on: bool) -> Result<()> {
        match self.pins.get_mut(&id) {
            Some((pin, active_low)) => {
                if on != *active_low {
                    pin.set_high();
                } else {
                    pin.set_low();
                }
                Ok(())
            }
            None => anyhow::bail!("output '{id}' has no GPIO pin mapped"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
