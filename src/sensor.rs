//! Per-tick sensor sampling with debouncing. Float switches bounce; a raw
//! reading must hold for `debounce_ticks` consecutive ticks before the
//! filtered value is allowed to change.

use anyhow::Result;
use std::collections::HashMap;

use crate::io::{DigitalInput, SensorId};

// ---------------------------------------------------------------------------
// Debounced signal
// ---------------------------------------------------------------------------

/// One filtered boolean signal. The stable value changes only after the raw
/// value has disagreed with it for `window` consecutive updates; any tick
/// that reverts to the stable value resets the counter.
#[derive(Debug, Clone)]
pub(crate) struct DebouncedSignal {
    stable: bool,
    candidate: bool,
    run: u32,
    window: u32,
}

impl DebouncedSignal {
    pub(crate) fn new(window: u32, initial: bool) -> Self {
        Self {
            stable: initial,
            candidate: initial,
            run: 0,
            window,
        }
    }

    /// Feed one raw reading; returns the (possibly updated) stable value.
    pub(crate) fn update(&mut self, raw: bool) -> bool {
        if raw == self.stable {
            self.candidate = raw;
            self.run = 0;
            return self.stable;
        }

        if raw == self.candidate {
            self.run += 1;
        } else {
            self.candidate = raw;
            self.run = 1;
        }

        if self.run >= self.window {
            self.stable = raw;
            self.run = 0;
        }
        self.stable
    }

    pub(crate) fn value(&self) -> bool {
        self.stable
    }
}

// ---------------------------------------------------------------------------
// Per-tick snapshot
// ---------------------------------------------------------------------------

/// Debounced sensor bits for one tick. `sump` is `None` while the mode
/// switch selects Borewell: the sump pins are not sampled at all in that
/// mode, matching the wiring where they are repurposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SensorFrame {
    pub(crate) tank_25: bool,
    pub(crate) tank_50: bool,
    pub(crate) tank_100: bool,
    pub(crate) tank_overflow: bool,
    pub(crate) tank_inlet: bool,
    pub(crate) sump: Option<SumpFrame>,
    /// Debounced mode switch: `true` = Borewell, `false` = Motor.
    pub(crate) borewell_switch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SumpFrame {
    /// Dedicated empty switch: asserted means no water at the pump intake.
    pub(crate) empty: bool,
    pub(crate) half: bool,
    pub(crate) full: bool,
}

// ---------------------------------------------------------------------------
// Sampler
// ---------------------------------------------------------------------------

/// Reads every registered sensor once per tick and maintains its debounce
/// state. Interpretation of the bits happens downstream; the sampler only
/// filters.
pub(crate) struct SensorSampler {
    signals: HashMap<SensorId, DebouncedSignal>,
}

impl SensorSampler {
    pub(crate) fn new(window: u32) -> Self {
        let signals = SensorId::ALL
            .iter()
            .map(|&id| (id, DebouncedSignal::new(window, false)))
            .collect();
        Self { signals }
    }

    /// One full sampling pass. The mode switch is debounced first so sump
    /// sampling can be gated on the switch position within the same tick.
    pub(crate) fn sample(&mut self, input: &mut impl DigitalInput) -> Result<SensorFrame> {
        let borewell_switch = self.update(SensorId::ModeSwitch, input)?;

        let tank_25 = self.update(SensorId::Tank25, input)?;
        let tank_50 = self.update(SensorId::Tank50, input)?;
        let tank_100 = self.update(SensorId::Tank100, input)?;
        let tank_overflow = self.update(SensorId::TankOverflow, input)?;
        let tank_inlet = self.update(SensorId::TankInlet, input)?;

        let sump = if borewell_switch {
            None
        } else {
            Some(SumpFrame {
                empty: self.update(SensorId::SumpEmpty, input)?,
                half: self.update(SensorId::Sump50, input)?,
                full: self.update(SensorId::Sump100, input)?,
            })
        };

        Ok(SensorFrame {
            tank_25,
            tank_50,
            tank_100,
            tank_overflow,
            tank_inlet,
            sump,
            borewell_switch,
        })
    }

    fn update(&mut self, id: SensorId, input: &mut impl DigitalInput) -> Result<bool> {
        let raw = input.read(id)?;
        let signal = self.signals.get_mut(&id).expect("all sensors registered");
        Ok(signal.update(raw))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
