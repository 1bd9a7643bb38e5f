//! [`PulseEmitter`] – liveness cadence for one client identity.

use std::time::Duration;

use tokio::time::{self, Interval, MissedTickBehavior};
use vigil_types::{ClientId, wire};

pub const DEFAULT_PULSE_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct PulseEmitter {
    id: ClientId,
    interval: Duration,
    line: String,
}

impl PulseEmitter {
    pub fn new(id: ClientId, interval: Duration) -> Self {
        let line = wire::encode_pulse(&id);
        Self { id, interval, line }
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The newline-terminated `PULSE:<id>` line written on every tick.
    pub fn line(&self) -> &str {
        &self.line
    }

    /// A ticker firing immediately and then every interval.  Late ticks are
    /// delayed rather than bunched, so a stalled writer never bursts pulses.
    pub fn ticker(&self) -> Interval {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}
