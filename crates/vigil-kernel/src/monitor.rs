//! [`TimeoutMonitor`] – periodic stale-client detector.
//!
//! A single task that wakes every `poll_interval`, copies the
//! [`LivenessRegistry`] and raises a [`StaleAlert`] for every client whose
//! last pulse is strictly older than `deadline`.  It is not driven by inbound
//! traffic, so detection latency does not depend on message arrival rate.
//!
//! The per-client state machine is purely observational and recomputed on
//! every cycle from `last_seen`:
//!
//! ```text
//! UNKNOWN --first pulse--> LIVE --elapsed > deadline--> STALE --new pulse--> LIVE
//! ```
//!
//! The monitor never mutates the registry, never closes connections and never
//! evicts records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use vigil_middleware::EventBus;
use vigil_types::{ClientId, EventPayload, HealthStatus, StaleAlert};

use crate::registry::LivenessRegistry;

const SOURCE: &str = "vigil-kernel::monitor";

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// When stale-client alerts are raised.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMode {
    /// Alert on every cycle while a client stays stale.
    #[default]
    Repeat,
    /// Alert once when a client goes stale and report once when it recovers.
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub deadline: Duration,
    pub poll_interval: Duration,
    pub mode: AlertMode,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            mode: AlertMode::default(),
        }
    }
}

/// Scans a shared [`LivenessRegistry`] and publishes alerts on an
/// [`EventBus`].
pub struct TimeoutMonitor {
    registry: Arc<LivenessRegistry>,
    bus: EventBus,
    config: MonitorConfig,
    /// Last classification per client; private to the monitor.
    health: HashMap<ClientId, HealthStatus>,
}

impl TimeoutMonitor {
    pub fn new(registry: Arc<LivenessRegistry>, bus: EventBus, config: MonitorConfig) -> Self {
        Self {
            registry,
            bus,
            config,
            health: HashMap::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Last classification of `client`, `None` before its first cycle.
    pub fn health(&self, client: &ClientId) -> Option<HealthStatus> {
        self.health.get(client).copied()
    }

    /// Run one detection cycle against the registry as of `now`.
    ///
    /// Returns the payloads produced by the cycle, in registry order.  They
    /// are not published; [`TimeoutMonitor::run`] does that.
    pub fn evaluate(&mut self, now: Instant) -> Vec<EventPayload> {
        let mut out = Vec::new();

        for record in self.registry.snapshot() {
            let elapsed = now.saturating_duration_since(record.last_seen);
            let stale = elapsed > self.config.deadline;
            let previous = self.health.get(&record.client).copied();

            let status = match (stale, previous) {
                (true, _) => HealthStatus::Dead,
                (false, Some(HealthStatus::Dead)) => HealthStatus::Recovering,
                (false, _) => HealthStatus::Healthy,
            };

            if stale {
                let fresh_transition = previous != Some(HealthStatus::Dead);
                if self.config.mode == AlertMode::Repeat || fresh_transition {
                    out.push(EventPayload::StaleClient(StaleAlert {
                        client: record.client.clone(),
                        elapsed,
                    }));
                }
            } else if previous == Some(HealthStatus::Dead) && self.config.mode == AlertMode::Edge {
                out.push(EventPayload::ClientRecovered {
                    client: record.client.clone(),
                });
            }

            if previous != Some(status) {
                out.push(EventPayload::HealthChanged {
                    client: record.client.clone(),
                    status,
                });
                self.health.insert(record.client, status);
            }
        }

        out
    }

    /// Loop forever, one [`evaluate`](Self::evaluate) per tick.
    pub async fn run(mut self) {
        info!(
            deadline_ms = self.config.deadline.as_millis() as u64,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            mode = ?self.config.mode,
            "timeout monitor started"
        );

        let mut ticker = time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // A delayed tick reports its scheduled time; measure from now.
            ticker.tick().await;
            for payload in self.evaluate(Instant::now()) {
                match &payload {
                    EventPayload::StaleClient(alert) => warn!(
                        client = %alert.client,
                        elapsed_s = alert.elapsed.as_secs(),
                        "[ALERT] client {} has died, last seen {}s ago",
                        alert.client,
                        alert.elapsed.as_secs()
                    ),
                    EventPayload::ClientRecovered { client } => {
                        info!(client = %client, "client recovered")
                    }
                    EventPayload::HealthChanged { client, status } => {
                        debug!(client = %client, status = %status, "health changed")
                    }
                    _ => {}
                }
                self.bus.emit(SOURCE, payload);
            }
        }
    }

    /// Spawn [`run`](Self::run) onto the current Tokio runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
