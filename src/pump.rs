//! Pump/mode state machine: decides relay state from levels, mode, and
//! fault latches. Safety interlocks pre-empt the normal start/stop logic
//! every tick, in fixed priority:
//!
//! ```text
//! sensor inconsistency > overflow > dry run > start > stop
//! ```
//!
//! A fault forces the relay IDLE within the same tick it is detected and
//! latches until its recovery condition has held for a configured number of
//! consecutive ticks (or, for dry run under the manual policy, until an
//! acknowledgement arrives).

use tracing::{info, warn};

use crate::config::{ControlSettings, DryRunClear};
use crate::level::{Levels, SumpLevel, TankLevel};

// ---------------------------------------------------------------------------
// Modes, faults, relay
// ---------------------------------------------------------------------------

/// Which pump source the selector switch has chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpMode {
    Motor,
    Borewell,
}

impl PumpMode {
    /// Switch ON selects Borewell, OFF selects Motor (the wiring default).
    pub(crate) fn from_switch(borewell: bool) -> Self {
        if borewell {
            PumpMode::Borewell
        } else {
            PumpMode::Motor
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpFault {
    DryRun,
    Overflow,
    SensorInconsistency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelayState {
    Idle,
    Running,
}

/// Commanded relay outputs for one tick. At most one is ever `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RelayCommand {
    pub(crate) motor: bool,
    pub(crate) borewell: bool,
}

impl RelayCommand {
    const IDLE: RelayCommand = RelayCommand {
        motor: false,
        borewell: false,
    };
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpState {
    Idle,
    Running,
    DryRunFault,
    OverflowFault,
    SensorFault,
}

pub(crate) struct PumpStateMachine {
    state: PumpState,
    mode: PumpMode,
    dry_run_clear: DryRunClear,
    dry_run_clear_ticks: u32,
    inconsistency_clear_ticks: u32,
    overflow_clear_ticks: u32,
    /// Consecutive ticks the active fault's recovery condition has held.
    recovery_run: u32,
}

impl PumpStateMachine {
    pub(crate) fn new(settings: &ControlSettings) -> Self {
        Self {
            state: PumpState::Idle,
            mode: PumpMode::Motor,
            dry_run_clear: settings.dry_run_clear,
            dry_run_clear_ticks: settings.dry_run_clear_ticks,
            inconsistency_clear_ticks: settings.inconsistency_clear_ticks,
            overflow_clear_ticks: settings.overflow_clear_ticks,
            recovery_run: 0,
        }
    }

    pub(crate) fn state(&self) -> PumpState {
        self.state
    }

    pub(crate) fn relay(&self) -> RelayState {
        if self.state == PumpState::Running {
            RelayState::Running
        } else {
            RelayState::Idle
        }
    }

    pub(crate) fn fault(&self) -> Option<PumpFault> {
        match self.state {
            PumpState::DryRunFault => Some(PumpFault::DryRun),
            PumpState::OverflowFault => Some(PumpFault::Overflow),
            PumpState::SensorFault => Some(PumpFault::SensorInconsistency),
            PumpState::Idle | PumpState::Running => None,
        }
    }

    /// Evaluate one tick. `ack` is the manual dry-run acknowledgement edge.
    pub(crate) fn step(&mut self, levels: &Levels, mode: PumpMode, ack: bool) -> RelayCommand {
        // 1. Sensor inconsistency pre-empts everything.
        if !levels.consistent {
            if self.state != PumpState::SensorFault {
                warn!(prev = ?self.state, "sensor inconsistency — relay forced idle");
                self.state = PumpState::SensorFault;
            }
            self.recovery_run = 0;
            self.mode = mode;
            return RelayCommand::IDLE;
        }
        if self.state == PumpState::SensorFault {
            self.recovery_run += 1;
            if self.recovery_run >= self.inconsistency_clear_ticks {
                info!(
                    ticks = self.recovery_run,
                    "sensor readings consistent again — fault cleared"
                );
                self.enter_idle();
            }
            self.mode = mode;
            return RelayCommand::IDLE;
        }

        // 2. Overflow.
        if levels.tank == TankLevel::Overflow {
            if self.state != PumpState::OverflowFault {
                warn!(prev = ?self.state, "tank overflow — relay forced idle");
                self.state = PumpState::OverflowFault;
            }
            self.recovery_run = 0;
            self.mode = mode;
            return RelayCommand::IDLE;
        }
        if self.state == PumpState::OverflowFault {
            // Tank is at FULL or below here.
            self.recovery_run += 1;
            if self.recovery_run >= self.overflow_clear_ticks {
                info!(ticks = self.recovery_run, "overflow receded — fault cleared");
                self.enter_idle();
            }
            self.mode = mode;
            return RelayCommand::IDLE;
        }

        // 3. Dry run: pump running from the sump with nothing to pump.
        if mode == PumpMode::Motor
            && self.state == PumpState::Running
            && levels.sump == Some(SumpLevel::Empty)
        {
            warn!("sump empty while motor running — dry run, relay cut off");
            self.state = PumpState::DryRunFault;
            self.recovery_run = 0;
            self.mode = mode;
            return RelayCommand::IDLE;
        }
        if self.state == PumpState::DryRunFault {
            match self.dry_run_clear {
                DryRunClear::Manual => {
                    if ack {
                        info!("dry-run fault acknowledged — returning to idle");
                        self.enter_idle();
                    }
                }
                DryRunClear::Auto => {
                    // Sump above empty (or not applicable in Borewell mode)
                    // counts toward recovery.
                    let recovered = levels.sump.map_or(true, |s| s > SumpLevel::Empty);
                    if recovered {
                        self.recovery_run += 1;
                        if self.recovery_run >= self.dry_run_clear_ticks {
                            info!(
                                ticks = self.recovery_run,
                                "sump level recovered — dry-run fault cleared"
                            );
                            self.enter_idle();
                        }
                    } else {
                        self.recovery_run = 0;
                    }
                }
            }
            self.mode = mode;
            return RelayCommand::IDLE;
        }

        // Accepted mode flip while running: de-energize the old relay this
        // tick; the start rule re-evaluates on the new relay next tick. The
        // two relays are never energized in the same tick.
        if self.state == PumpState::Running && mode != self.mode {
            info!(from = ?self.mode, to = ?mode, "pump source changed while running — stopping");
            self.state = PumpState::Idle;
            self.mode = mode;
            return RelayCommand::IDLE;
        }
        self.mode = mode;

        // 4. Start: tank below full and the selected source has water.
        if self.state == PumpState::Idle && levels.tank < TankLevel::Full && self.source_ok(levels)
        {
            info!(?mode, tank = ?levels.tank, sump = ?levels.sump, "starting pump");
            self.state = PumpState::Running;
        }
        // 5. Stop: tank reached full.
        else if self.state == PumpState::Running && levels.tank >= TankLevel::Full {
            info!("tank full — stopping pump");
            self.state = PumpState::Idle;
        }

        self.command()
    }

    fn source_ok(&self, levels: &Levels) -> bool {
        match self.mode {
            PumpMode::Borewell => true,
            PumpMode::Motor => levels.sump.is_some_and(|s| s > SumpLevel::Empty),
        }
    }

    fn enter_idle(&mut self) {
        self.state = PumpState::Idle;
        self.recovery_run = 0;
    }

    fn command(&self) -> RelayCommand {
        RelayCommand {
            motor: self.state == PumpState::Running && self.mode == PumpMode::Motor,
            borewell: self.state == PumpState::Running && self.mode == PumpMode::Borewell,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
