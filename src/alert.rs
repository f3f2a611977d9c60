//! Alert policy and delivery. The control loop decides *whether* an alert is
//! warranted (edge-triggered on fault entry, with Borewell-mode suppression)
//! and pushes it into a bounded queue; a separate worker owns delivery, so a
//! slow or failing transport can never stall a control tick. When the queue
//! is full the oldest undelivered alert is dropped and counted.

use anyhow::Result;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{watch, Notify};
use tracing::{error, info, warn};

use crate::level::{Levels, SumpLevel};
use crate::pump::{PumpFault, PumpMode};

/// Delivery attempts per alert before it is abandoned.
const DELIVERY_ATTEMPTS: u32 = 3;

/// Base backoff between delivery attempts (doubles per retry).
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Alert messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum AlertKind {
    DryRun,
    Overflow,
    SensorInconsistency,
    SumpLow,
}

impl AlertKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            AlertKind::DryRun => "dry_run",
            AlertKind::Overflow => "overflow",
            AlertKind::SensorInconsistency => "sensor_inconsistency",
            AlertKind::SumpLow => "sump_low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct AlertMessage {
    pub(crate) kind: AlertKind,
    pub(crate) detail: String,
    #[serde(with = "time::serde::rfc3339")]
    pub(crate) ts: OffsetDateTime,
}

impl AlertMessage {
    fn new(kind: AlertKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            ts: OffsetDateTime::now_utc(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bounded drop-oldest queue
// ---------------------------------------------------------------------------

struct QueueInner {
    messages: Mutex<VecDeque<AlertMessage>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

/// Producer side lives on the control loop, consumer side on the worker.
/// `push` never blocks: at capacity the oldest message makes room.
#[derive(Clone)]
pub(crate) struct AlertQueue {
    inner: Arc<QueueInner>,
}

impl AlertQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                messages: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                capacity,
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn push(&self, msg: AlertMessage) {
        {
            let mut q = self.inner.messages.lock().expect("alert queue poisoned");
            if q.len() >= self.inner.capacity {
                let old = q.pop_front();
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    kind = old.map(|m| m.kind.as_str()).unwrap_or(""),
                    total_dropped = dropped,
                    "alert queue full — dropped oldest undelivered alert"
                );
            }
            q.push_back(msg);
        }
        self.inner.notify.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<AlertMessage> {
        self.inner
            .messages
            .lock()
            .expect("alert queue poisoned")
            .pop_front()
    }

    /// Wait until a message is available. Single-consumer.
    pub(crate) async fn recv(&self) -> AlertMessage {
        loop {
            if let Some(msg) = self.pop() {
                return msg;
            }
            self.inner.notify.notified().await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.messages.lock().expect("alert queue poisoned").len()
    }

    /// Total alerts discarded because the queue was full.
    pub(crate) fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Dispatch policy
// ---------------------------------------------------------------------------

/// Edge-triggered alert policy. A fault alerts once on entry and not again
/// until it has cleared and recurred. Sump-low alerts follow the same edge
/// rule. Dry-run and sump-low alerts are suppressed while in Borewell mode,
/// where the sump is deliberately out of service.
pub(crate) struct AlertDispatcher {
    queue: AlertQueue,
    prev_fault: Option<PumpFault>,
    prev_sump_empty: bool,
}

impl AlertDispatcher {
    pub(crate) fn new(queue: AlertQueue) -> Self {
        Self {
            queue,
            prev_fault: None,
            prev_sump_empty: false,
        }
    }

    pub(crate) fn observe(&mut self, fault: Option<PumpFault>, mode: PumpMode, levels: &Levels) {
        if fault != self.prev_fault {
            if let Some(f) = fault {
                self.on_fault_entry(f, mode, levels);
            }
            self.prev_fault = fault;
        }

        let sump_empty = levels.sump == Some(SumpLevel::Empty);
        if sump_empty && !self.prev_sump_empty && mode == PumpMode::Motor {
            self.queue.push(AlertMessage::new(
                AlertKind::SumpLow,
                "sump water level is critically low",
            ));
        }
        self.prev_sump_empty = sump_empty;
    }

    fn on_fault_entry(&mut self, fault: PumpFault, mode: PumpMode, levels: &Levels) {
        let msg = match fault {
            PumpFault::DryRun => {
                if mode == PumpMode::Borewell {
                    return; // sump is out of service in Borewell mode
                }
                AlertMessage::new(
                    AlertKind::DryRun,
                    "pump was running with an empty sump — relay cut off",
                )
            }
            PumpFault::Overflow => {
                AlertMessage::new(AlertKind::Overflow, "overhead tank overflow detected")
            }
            PumpFault::SensorInconsistency => AlertMessage::new(
                AlertKind::SensorInconsistency,
                format!(
                    "level sensors report a contradictory pattern (tank {:?}, sump {:?})",
                    levels.tank, levels.sump
                ),
            ),
        };
        self.queue.push(msg);
    }
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// Outbound notification seam. Implementations may be slow or fallible;
/// only the worker ever calls them.
pub(crate) trait NotificationTransport {
    async fn send(&mut self, msg: &AlertMessage) -> Result<()>;
}

/// Fallback transport: alerts land in the log only.
pub(crate) struct LogTransport;

impl NotificationTransport for LogTransport {
    async fn send(&mut self, msg: &AlertMessage) -> Result<()> {
        info!(kind = msg.kind.as_str(), detail = %msg.detail, "ALERT");
        Ok(())
    }
}

/// Publishes alerts as JSON to `<prefix>/alert/<kind>`.
pub(crate) struct MqttTransport {
    client: rumqttc::AsyncClient,
    topic_prefix: String,
}

impl MqttTransport {
    pub(crate) fn new(client: rumqttc::AsyncClient, topic_prefix: String) -> Self {
        Self {
            client,
            topic_prefix,
        }
    }
}

impl NotificationTransport for MqttTransport {
    async fn send(&mut self, msg: &AlertMessage) -> Result<()> {
        let topic = format!("{}/alert/{}", self.topic_prefix, msg.kind.as_str());
        let payload = serde_json::to_vec(msg)?;
        self.client
            .publish(topic, rumqttc::QoS::AtLeastOnce, false, payload)
            .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Delivery worker
// ---------------------------------------------------------------------------

/// Consume the queue until shutdown, then drain what remains with one final
/// attempt per message. Intended to be `tokio::spawn`-ed from main.
pub(crate) async fn run_worker<T: NotificationTransport>(
    queue: AlertQueue,
    mut transport: T,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("alert worker started");

    loop {
        tokio::select! {
            msg = queue.recv() => {
                deliver(&mut transport, &msg, RETRY_BACKOFF).await;
            }
            _ = shutdown.changed() => break,
        }
    }

    // Drain: one attempt each, no retries — shutdown must not hang on a
    // dead transport.
    let mut drained = 0usize;
    while let Some(msg) = queue.pop() {
        if let Err(e) = transport.send(&msg).await {
            warn!(kind = msg.kind.as_str(), "alert discarded at shutdown: {e}");
        }
        drained += 1;
    }
    info!(drained, dropped = queue.dropped(), "alert worker stopped");
}

/// Bounded-backoff delivery: the control loop never sees these failures.
async fn deliver<T: NotificationTransport>(
    transport: &mut T,
    msg: &AlertMessage,
    backoff: Duration,
) {
    for attempt in 1..=DELIVERY_ATTEMPTS {
        match transport.send(msg).await {
            Ok(()) => {
                info!(kind = msg.kind.as_str(), attempt, "alert delivered");
                return;
            }
            Err(e) if attempt < DELIVERY_ATTEMPTS => {
                warn!(
                    kind = msg.kind.as_str(),
                    attempt, "alert delivery failed, retrying: {e}"
                );
                tokio::time::sleep(backoff * attempt).await;
            }
            Err(e) => {
                error!(
                    kind = msg.kind.as_str(),
                    attempts = DELIVERY_ATTEMPTS,
                    "alert delivery abandoned: {e}"
                );
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::level::TankLevel;

    fn levels(tank: TankLevel, sump: Option<SumpLevel>) -> Levels {
        Levels {
            tank,
            sump,
            consistent: true,
        }
    }

    fn msg(kind: AlertKind) -> AlertMessage {
        AlertMessage::new(kind, "test")
    }

    // -- AlertQueue ---------------------------------------------------------

    #[test]
    fn queue_fifo_order() {
        let q = AlertQueue::new(4);
        q.push(msg(AlertKind::DryRun));
        q.push(msg(AlertKind::Overflow));
        assert_eq!(q.pop().unwrap().kind, AlertKind::DryRun);
        assert_eq!(q.pop().unwrap().kind, AlertKind::Overflow);
        assert!(q.pop().is_none());
    }

    #[test]
    fn queue_full_drops_oldest_and_counts() {
        let q = AlertQueue::new(2);
        q.push(msg(AlertKind::DryRun));
        q.push(msg(AlertKind::Overflow));
        q.push(msg(AlertKind::SumpLow)); // evicts DryRun

        assert_eq!(q.len(), 2);
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.pop().unwrap().kind, AlertKind::Overflow);
        assert_eq!(q.pop().unwrap().kind, AlertKind::SumpLow);
    }

    #[tokio::test]
    async fn queue_recv_wakes_on_push() {
        let q = AlertQueue::new(4);
        let consumer = q.clone();
        let handle = tokio::spawn(async move { consumer.recv().await });

        tokio::task::yield_now().await;
        q.push(msg(AlertKind::Overflow));

        let got = handle.await.unwrap();
        assert_eq!(got.kind, AlertKind::Overflow);
    }

    // -- AlertDispatcher ----------------------------------------------------

    #[test]
    fn fault_entry_alerts_once_per_episode() {
        let q = AlertQueue::new(8);
        let mut d = AlertDispatcher::new(q.clone());
        let lv = levels(TankLevel::Overflow, Some(SumpLevel::Half));

        for _ in 0..5 {
            d.observe(Some(PumpFault::Overflow), PumpMode::Motor, &lv);
        }
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn fault_clear_and_recur_alerts_again() {
        let q = AlertQueue::new(8);
        let mut d = AlertDispatcher::new(q.clone());
        let lv = levels(TankLevel::Overflow, Some(SumpLevel::Half));
        let ok = levels(TankLevel::Half, Some(SumpLevel::Half));

        d.observe(Some(PumpFault::Overflow), PumpMode::Motor, &lv);
        d.observe(None, PumpMode::Motor, &ok);
        d.observe(Some(PumpFault::Overflow), PumpMode::Motor, &lv);
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn dry_run_suppressed_in_borewell_mode() {
        let q = AlertQueue::new(8);
        let mut d = AlertDispatcher::new(q.clone());

        d.observe(
            Some(PumpFault::DryRun),
            PumpMode::Borewell,
            &levels(TankLevel::Half, None),
        );
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn sump_low_edge_triggered_in_motor_mode() {
        let q = AlertQueue::new(8);
        let mut d = AlertDispatcher::new(q.clone());
        let low = levels(TankLevel::Half, Some(SumpLevel::Empty));

        for _ in 0..4 {
            d.observe(None, PumpMode::Motor, &low);
        }
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop().unwrap().kind, AlertKind::SumpLow);
    }

    #[test]
    fn sump_low_suppressed_in_borewell_mode() {
        let q = AlertQueue::new(8);
        let mut d = AlertDispatcher::new(q.clone());

        // Borewell frames carry no sump level at all, so there is nothing to
        // alert on — but even a stale Empty must not alert.
        d.observe(None, PumpMode::Borewell, &levels(TankLevel::Half, None));
        assert_eq!(q.len(), 0);
    }

    #[test]
    fn sump_refill_and_drain_alerts_again() {
        let q = AlertQueue::new(8);
        let mut d = AlertDispatcher::new(q.clone());
        let low = levels(TankLevel::Half, Some(SumpLevel::Empty));
        let ok = levels(TankLevel::Half, Some(SumpLevel::Half));

        d.observe(None, PumpMode::Motor, &low);
        d.observe(None, PumpMode::Motor, &ok);
        d.observe(None, PumpMode::Motor, &low);
        assert_eq!(q.len(), 2);
    }

    // -- Delivery worker ----------------------------------------------------

    /// Transport that fails a fixed number of times, then records deliveries.
    struct FlakyTransport {
        failures_left: u32,
        delivered: Vec<AlertKind>,
    }

    impl FlakyTransport {
        fn new(failures: u32) -> Self {
            Self {
                failures_left: failures,
                delivered: Vec::new(),
            }
        }
    }

    impl NotificationTransport for FlakyTransport {
        async fn send(&mut self, msg: &AlertMessage) -> Result<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                anyhow::bail!("transport down");
            }
            self.delivered.push(msg.kind);
            Ok(())
        }
    }

    #[tokio::test]
    async fn deliver_retries_until_success() {
        let mut t = FlakyTransport::new(2);
        deliver(&mut t, &msg(AlertKind::Overflow), Duration::ZERO).await;
        assert_eq!(t.delivered, vec![AlertKind::Overflow]);
    }

    #[tokio::test]
    async fn deliver_abandons_after_bounded_attempts() {
        let mut t = FlakyTransport::new(10);
        deliver(&mut t, &msg(AlertKind::Overflow), Duration::ZERO).await;
        assert!(t.delivered.is_empty());
        // Exactly DELIVERY_ATTEMPTS were consumed, no unbounded retry.
        assert_eq!(t.failures_left, 10 - DELIVERY_ATTEMPTS);
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown_after_drain() {
        let q = AlertQueue::new(8);
        q.push(msg(AlertKind::DryRun));
        q.push(msg(AlertKind::SumpLow));

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        // Shutdown already signalled: worker drains both messages and exits.
        let worker = run_worker(q.clone(), FlakyTransport::new(0), rx);
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop");
        assert_eq!(q.len(), 0);
    }

    // -- Serialization ------------------------------------------------------

    #[test]
    fn alert_message_serializes_kind_and_rfc3339_ts() {
        let m = AlertMessage {
            kind: AlertKind::SensorInconsistency,
            detail: "x".to_string(),
            ts: time::macros::datetime!(2024-06-01 12:00:00 UTC),
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["kind"], "sensor_inconsistency");
        assert_eq!(json["ts"], "2024-06-01T12:00:00Z");
        assert_eq!(json["detail"], "x");
    }
}
