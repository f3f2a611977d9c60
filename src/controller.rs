//! The fixed-period control loop: one sample → interpret → decide → drive
//! pass per tick. The loop owns every piece of mutable control state; the
//! alert worker only ever sees the queue, so the hot path needs no locking.

use anyhow::Result;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::alert::{AlertDispatcher, AlertQueue};
use crate::config::ControlSettings;
use crate::indicator::IndicatorFrame;
use crate::io::{DigitalInput, DigitalOutput, OutputId};
use crate::level::LevelInterpreter;
use crate::pump::{PumpMode, PumpStateMachine};
use crate::sensor::SensorSampler;

pub(crate) struct Controller<I: DigitalInput, O: DigitalOutput> {
    inputs: I,
    outputs: O,
    sampler: SensorSampler,
    interpreter: LevelInterpreter,
    pump: PumpStateMachine,
    dispatcher: AlertDispatcher,
    blink_ticks: u64,
    tick_period: Duration,
    tick: u64,
}

impl<I: DigitalInput, O: DigitalOutput> Controller<I, O> {
    pub(crate) fn new(settings: &ControlSettings, inputs: I, outputs: O, queue: AlertQueue) -> Self {
        Self {
            inputs,
            outputs,
            sampler: SensorSampler::new(settings.debounce_ticks),
            interpreter: LevelInterpreter::new(),
            pump: PumpStateMachine::new(settings),
            dispatcher: AlertDispatcher::new(queue),
            blink_ticks: settings.blink_ticks,
            tick_period: Duration::from_millis(settings.tick_ms),
            tick: 0,
        }
    }

    /// One full control pass. `ack` is a pending manual dry-run
    /// acknowledgement, consumed by the state machine this tick.
    pub(crate) fn tick(&mut self, ack: bool) -> Result<()> {
        let frame = self.sampler.sample(&mut self.inputs)?;
        let mode = PumpMode::from_switch(frame.borewell_switch);
        let levels = self.interpreter.interpret(&frame);

        let cmd = self.pump.step(&levels, mode, ack);
        self.outputs.write(OutputId::MotorRelay, cmd.motor)?;
        self.outputs.write(OutputId::BorewellRelay, cmd.borewell)?;

        IndicatorFrame::compute(self.tick, self.blink_ticks, &frame, &levels, self.pump.fault())
            .apply(&mut self.outputs)?;

        self.dispatcher.observe(self.pump.fault(), mode, &levels);

        debug!(
            tick = self.tick,
            ?mode,
            tank = ?levels.tank,
            sump = ?levels.sump,
            state = ?self.pump.state(),
            relay = ?self.pump.relay(),
            "tick"
        );

        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }

    /// Run until shutdown is signalled. The current tick always completes;
    /// the relay is forced idle before the loop returns.
    pub(crate) async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut ack_rx: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            period_ms = self.tick_period.as_millis() as u64,
            "control loop started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut ack = false;
                    while ack_rx.try_recv().is_ok() {
                        ack = true;
                    }
                    // I/O trouble must not kill the loop; faults are states,
                    // and a transient read error just costs one tick.
                    if let Err(e) = self.tick(ack) {
                        error!("control tick failed: {e:#}");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        self.outputs.all_off()?;
        info!(ticks = self.tick, "control loop stopped — all outputs off");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{MemInputs, MemOutputs, SensorId};

    fn settings() -> ControlSettings {
        ControlSettings {
            debounce_ticks: 2,
            blink_ticks: 1,
            ..ControlSettings::default()
        }
    }

    fn controller(settings: &ControlSettings) -> Controller<MemInputs, MemOutputs> {
        Controller::new(
            settings,
            MemInputs::new(),
            MemOutputs::new(),
            AlertQueue::new(8),
        )
    }

    fn run_ticks(c: &mut Controller<MemInputs, MemOutputs>, n: u32) {
        for _ in 0..n {
            c.tick(false).unwrap();
        }
    }

    /// Motor mode, tank at half, sump at half (empty switch open).
    fn set_half_half(inputs: &mut MemInputs) {
        inputs.set(SensorId::Tank25, true);
        inputs.set(SensorId::Tank50, true);
        inputs.set(SensorId::Sump50, true);
    }

    // -- End-to-end fill ----------------------------------------------------

    #[test]
    fn motor_runs_while_tank_below_full() {
        let mut c = controller(&settings());
        set_half_half(&mut c.inputs);

        run_ticks(&mut c, 3);
        assert!(c.outputs.get(OutputId::MotorRelay));
        assert!(!c.outputs.get(OutputId::BorewellRelay));
        assert!(c.outputs.get(OutputId::LedTank25));
        assert!(c.outputs.get(OutputId::LedTank50));
    }

    #[test]
    fn pump_stops_when_tank_reaches_full() {
        let mut c = controller(&settings());
        set_half_half(&mut c.inputs);
        run_ticks(&mut c, 3);
        assert!(c.outputs.get(OutputId::MotorRelay));

        c.inputs.set(SensorId::Tank100, true);
        run_ticks(&mut c, 3);
        assert!(!c.outputs.get(OutputId::MotorRelay));
        assert!(c.outputs.get(OutputId::LedTank100));
    }

    // -- Dry run end to end -------------------------------------------------

    #[test]
    fn dry_run_cuts_relay_and_queues_one_alert() {
        let queue = AlertQueue::new(8);
        let mut c = Controller::new(
            &settings(),
            MemInputs::new(),
            MemOutputs::new(),
            queue.clone(),
        );
        set_half_half(&mut c.inputs);
        run_ticks(&mut c, 3);
        assert!(c.outputs.get(OutputId::MotorRelay));

        // Sump runs dry: empty switch asserts, 50% drops.
        c.inputs.set(SensorId::Sump50, false);
        c.inputs.set(SensorId::SumpEmpty, true);
        run_ticks(&mut c, 5);

        assert!(!c.outputs.get(OutputId::MotorRelay));
        assert!(c.outputs.get(OutputId::LedSumpLow));
        // One dry-run alert and one sump-low alert, once each, despite the
        // condition persisting for several ticks.
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn borewell_ignores_sump_and_raises_no_alert() {
        let queue = AlertQueue::new(8);
        let mut c = Controller::new(
            &settings(),
            MemInputs::new(),
            MemOutputs::new(),
            queue.clone(),
        );
        c.inputs.set(SensorId::ModeSwitch, true);
        c.inputs.set(SensorId::Tank25, true);
        c.inputs.set(SensorId::SumpEmpty, true); // irrelevant in borewell

        run_ticks(&mut c, 4);
        assert!(c.outputs.get(OutputId::BorewellRelay));
        assert!(!c.outputs.get(OutputId::MotorRelay));
        assert!(!c.outputs.get(OutputId::LedSumpLow));
        assert_eq!(queue.len(), 0);
    }

    // -- Overflow end to end ------------------------------------------------

    #[test]
    fn overflow_forces_idle_and_blinks_error() {
        let mut c = controller(&settings());
        set_half_half(&mut c.inputs);
        run_ticks(&mut c, 3);

        c.inputs.set(SensorId::TankOverflow, true);
        run_ticks(&mut c, 2); // debounce

        assert!(!c.outputs.get(OutputId::MotorRelay));
        // Blink phase: tick counter is at 5 after five ticks, so the next
        // tick writes phase for tick 5 → off, then tick 6 → on.
        c.tick(false).unwrap();
        assert!(!c.outputs.get(OutputId::LedError));
        c.tick(false).unwrap();
        assert!(c.outputs.get(OutputId::LedError));
        assert!(c.outputs.get(OutputId::Buzzer));
    }

    // -- Sensor inconsistency end to end -------------------------------------

    #[test]
    fn contradictory_tank_pattern_freezes_relay() {
        let mut c = controller(&settings());
        set_half_half(&mut c.inputs);
        run_ticks(&mut c, 3);
        assert!(c.outputs.get(OutputId::MotorRelay));

        // 50% dry while 100% wet: physically impossible.
        c.inputs.set(SensorId::Tank50, false);
        c.inputs.set(SensorId::Tank100, true);
        run_ticks(&mut c, 4);

        assert!(!c.outputs.get(OutputId::MotorRelay));
        assert!(!c.outputs.get(OutputId::BorewellRelay));
    }

    // -- Invariants over a whole scenario ------------------------------------

    #[test]
    fn relays_never_both_energized_across_mode_flips() {
        let mut c = controller(&settings());
        set_half_half(&mut c.inputs);

        for tick in 0..40 {
            // Flip the mode switch every 7 ticks.
            c.inputs.set(SensorId::ModeSwitch, (tick / 7) % 2 == 1);
            c.tick(false).unwrap();
            assert!(
                !(c.outputs.get(OutputId::MotorRelay) && c.outputs.get(OutputId::BorewellRelay)),
                "both relays energized at tick {tick}"
            );
        }
    }

    // -- Shutdown -----------------------------------------------------------

    #[tokio::test]
    async fn run_forces_outputs_off_on_shutdown() {
        let mut settings = settings();
        settings.tick_ms = 50;

        let mut c = controller(&settings);
        set_half_half(&mut c.inputs);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_ack_tx, ack_rx) = mpsc::channel(4);

        let handle = tokio::spawn(c.run(shutdown_rx, ack_rx));
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown_tx.send(true).unwrap();

        let res = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("controller did not stop")
            .unwrap();
        res.unwrap();
    }
}
