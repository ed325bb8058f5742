//! Fire Scheduler - the timed terminal action of each archer.

use archers_env::{ArcherContext, NodeId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// One archer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireEvent {
    pub archer: NodeId,

    /// Counter value the delay was derived from
    pub value: i64,

    /// Time since the shared start timestamp
    pub elapsed: Duration,
}

impl std::fmt::Display for FireEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "FIRE {} {:.3}", self.archer, self.elapsed.as_secs_f64())
    }
}

/// Where fire events are reported.
pub type FireSink = mpsc::UnboundedSender<FireEvent>;

/// Waits out the counter, then fires.
pub struct FireScheduler<Ctx: ArcherContext> {
    context: Arc<Ctx>,
    archer: NodeId,

    /// Shared start timestamp on the context's clock
    start: Duration,

    /// Length of one counter unit
    unit: Duration,

    sink: FireSink,
}

impl<Ctx: ArcherContext> FireScheduler<Ctx> {
    pub fn new(context: Arc<Ctx>, archer: NodeId, start: Duration, unit: Duration, sink: FireSink) -> Self {
        Self {
            context,
            archer,
            start,
            unit,
            sink,
        }
    }

    /// How long `value` makes the archer wait. Non-positive values fire at once.
    pub fn delay_for(&self, value: i64) -> Duration {
        let units = u32::try_from(value.max(0)).unwrap_or(u32::MAX);
        self.unit.saturating_mul(units)
    }

    /// Blocks for `value` units, then records the fire.
    pub async fn fire(&self, value: i64) -> FireEvent {
        let delay = self.delay_for(value);
        if !delay.is_zero() {
            self.context.sleep(delay).await;
        }

        let event = FireEvent {
            archer: self.archer,
            value,
            elapsed: self.context.now().saturating_sub(self.start),
        };
        info!(archer = %self.archer, value, elapsed_secs = event.elapsed.as_secs_f64(), "FIRE");

        if self.sink.send(event).is_err() {
            debug!("Fire sink for {} closed, event not recorded", self.archer);
        }
        event
    }
}
