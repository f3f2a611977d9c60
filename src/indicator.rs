//! Maps one tick's sensor bits, levels, and fault state to the LED/buzzer
//! outputs. Pure computation: blink phase comes from the tick count modulo
//! the configured half-period, so every blinking output stays in phase and
//! the whole pattern is reproducible in tests.

use anyhow::Result;

use crate::io::{DigitalOutput, OutputId};
use crate::level::{Levels, SumpLevel, TankLevel};
use crate::pump::PumpFault;
use crate::sensor::SensorFrame;

// ---------------------------------------------------------------------------
// Indicator frame
// ---------------------------------------------------------------------------

/// Desired state of every indicator output for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IndicatorFrame {
    // Steady green LEDs mirroring the threshold sensors.
    pub(crate) led_tank_25: bool,
    pub(crate) led_tank_50: bool,
    pub(crate) led_tank_100: bool,
    pub(crate) led_sump_50: bool,
    pub(crate) led_sump_100: bool,
    // Steady red critical-low LEDs.
    pub(crate) led_tank_low: bool,
    pub(crate) led_sump_low: bool,
    // Blinking outputs.
    pub(crate) led_flow: bool,
    pub(crate) led_error: bool,
    pub(crate) buzzer: bool,
}

impl IndicatorFrame {
    pub(crate) fn compute(
        tick: u64,
        blink_ticks: u64,
        frame: &SensorFrame,
        levels: &Levels,
        fault: Option<PumpFault>,
    ) -> Self {
        let blink_on = (tick / blink_ticks) % 2 == 0;
        let erroring = fault.is_some();

        Self {
            led_tank_25: frame.tank_25,
            led_tank_50: frame.tank_50,
            led_tank_100: frame.tank_100,
            led_sump_50: frame.sump.is_some_and(|s| s.half),
            led_sump_100: frame.sump.is_some_and(|s| s.full),
            led_tank_low: levels.tank == TankLevel::Empty,
            led_sump_low: levels.sump == Some(SumpLevel::Empty),
            led_flow: frame.tank_inlet && blink_on,
            led_error: erroring && blink_on,
            buzzer: erroring && blink_on,
        }
    }

    /// Write every indicator output. Relays are not indicators and are
    /// driven separately by the control loop.
    pub(crate) fn apply(&self, out: &mut impl DigitalOutput) -> Result<()> {
        out.write(OutputId::LedTank25, self.led_tank_25)?;
        out.write(OutputId::LedTank50, self.led_tank_50)?;
        out.write(OutputId::LedTank100, self.led_tank_100)?;
        out.write(OutputId::LedSump50, self.led_sump_50)?;
        out.write(OutputId::LedSump100, self.led_sump_100)?;
        out.write(OutputId::LedTankLow, self.led_tank_low)?;
        out.write(OutputId::LedSumpLow, self.led_sump_low)?;
        out.write(OutputId::LedFlow, self.led_flow)?;
        out.write(OutputId::LedError, self.led_error)?;
        out.write(OutputId::Buzzer, self.buzzer)?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
