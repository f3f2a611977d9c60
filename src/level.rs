//! Converts debounced threshold bits into ordered discrete levels. Threshold
//! sensors are physically stacked, so a higher sensor reading wet while a
//! lower one reads dry is a wiring/sensor failure, not a level — the
//! interpreter flags it and holds the last valid level instead of guessing.

use crate::sensor::{SensorFrame, SumpFrame};

// ---------------------------------------------------------------------------
// Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TankLevel {
    Empty,
    Quarter,
    Half,
    Full,
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SumpLevel {
    Empty,
    Half,
    Full,
}

/// Interpreted levels for one tick. `sump` is `None` in Borewell mode.
/// `consistent` is `false` when any sensor set contradicted itself this
/// tick; the affected level then carries the previous valid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Levels {
    pub(crate) tank: TankLevel,
    pub(crate) sump: Option<SumpLevel>,
    pub(crate) consistent: bool,
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

pub(crate) struct LevelInterpreter {
    last_tank: TankLevel,
    last_sump: SumpLevel,
}

impl LevelInterpreter {
    pub(crate) fn new() -> Self {
        Self {
            last_tank: TankLevel::Empty,
            last_sump: SumpLevel::Empty,
        }
    }

    pub(crate) fn interpret(&mut self, frame: &SensorFrame) -> Levels {
        let tank_ok = tank_consistent(frame);
        let tank = if frame.tank_overflow {
            // The overflow sensor sits above the ordered thresholds and is
            // authoritative on its own.
            TankLevel::Overflow
        } else if tank_ok {
            tank_from_thresholds(frame)
        } else {
            self.last_tank
        };
        if tank_ok || frame.tank_overflow {
            self.last_tank = tank;
        }

        let (sump, sump_ok) = match frame.sump {
            None => (None, true),
            Some(s) => {
                let ok = sump_consistent(&s);
                let level = if ok { sump_from_bits(&s) } else { self.last_sump };
                if ok {
                    self.last_sump = level;
                }
                (Some(level), ok)
            }
        };

        Levels {
            tank,
            sump,
            consistent: tank_ok && sump_ok,
        }
    }
}

/// Monotonicity: every threshold below the highest wet one must be wet too.
fn tank_consistent(frame: &SensorFrame) -> bool {
    let bits = [frame.tank_25, frame.tank_50, frame.tank_100];
    ordered_bits_consistent(&bits)
}

fn tank_from_thresholds(frame: &SensorFrame) -> TankLevel {
    if frame.tank_100 {
        TankLevel::Full
    } else if frame.tank_50 {
        TankLevel::Half
    } else if frame.tank_25 {
        TankLevel::Quarter
    } else {
        TankLevel::Empty
    }
}

fn sump_consistent(s: &SumpFrame) -> bool {
    // The empty switch asserting while any threshold reads wet is a
    // contradiction, as is a gap in the ordered thresholds.
    if s.empty && (s.half || s.full) {
        return false;
    }
    ordered_bits_consistent(&[s.half, s.full])
}

fn sump_from_bits(s: &SumpFrame) -> SumpLevel {
    if s.empty {
        SumpLevel::Empty
    } else if s.full {
        SumpLevel::Full
    } else {
        // Water is above the empty switch but below 100%; the dedicated
        // empty switch is the sole dry-run authority, so this is not Empty.
        SumpLevel::Half
    }
}

fn ordered_bits_consistent(bits: &[bool]) -> bool {
    let highest_wet = bits.iter().rposition(|&b| b);
    match highest_wet {
        None => true,
        Some(top) => bits[..top].iter().all(|&b| b),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
