//! [`LivenessRegistry`] – last-pulse table shared by every connection handler.
//!
//! Every accepted `PULSE:<id>` line ends in a call to
//! [`LivenessRegistry::record`].  The timeout monitor reads the table through
//! [`LivenessRegistry::snapshot`], which copies it out under the lock so that
//! alert evaluation never blocks a handler.
//!
//! Records are never deleted.  A client that stops pulsing keeps its record
//! and simply becomes stale.
//!
//! # Out-of-order pulses
//!
//! Two handlers may read the clock in one order and take the lock in the
//! other.  [`RecordPolicy`] decides what happens to the older timestamp:
//! [`RecordPolicy::Monotonic`] (the default) keeps `last_seen`
//! non-decreasing and reports the late write as [`RecordOutcome::Stale`];
//! [`RecordPolicy::LastWriteWins`] overwrites unconditionally.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use vigil_types::ClientId;

/// How [`LivenessRegistry::record`] treats a timestamp older than the one
/// already stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPolicy {
    /// Reject timestamps older than the stored one.
    #[default]
    Monotonic,
    /// Overwrite with whatever arrives last.
    LastWriteWins,
}

/// Result of a single [`LivenessRegistry::record`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First pulse ever seen for this identity.
    Inserted,
    /// Existing record updated.
    Refreshed,
    /// Timestamp was older than the stored one and was dropped.
    Stale,
}

/// Point-in-time copy of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessRecord {
    pub client: ClientId,
    pub last_seen: Instant,
}

/// Thread-safe map from [`ClientId`] to last-pulse [`Instant`].
///
/// # Example
///
/// ```
/// use vigil_kernel::registry::{LivenessRegistry, RecordOutcome};
/// use tokio::time::Instant;
///
/// let registry = LivenessRegistry::default();
/// assert_eq!(registry.record("Store-A".into(), Instant::now()), RecordOutcome::Inserted);
/// assert_eq!(registry.snapshot().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct LivenessRegistry {
    policy: RecordPolicy,
    records: Mutex<BTreeMap<ClientId, Instant>>,
}

impl LivenessRegistry {
    pub fn new(policy: RecordPolicy) -> Self {
        Self {
            policy,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn policy(&self) -> RecordPolicy {
        self.policy
    }

    /// Upsert the record for `client` with `at` as its last-seen instant.
    pub fn record(&self, client: ClientId, at: Instant) -> RecordOutcome {
        let mut records = self.lock();
        match records.get_mut(&client) {
            None => {
                records.insert(client, at);
                RecordOutcome::Inserted
            }
            Some(last_seen) if self.policy == RecordPolicy::Monotonic && at < *last_seen => {
                RecordOutcome::Stale
            }
            Some(last_seen) => {
                *last_seen = at;
                RecordOutcome::Refreshed
            }
        }
    }

    /// Consistent copy of every record, ordered by client identity.
    pub fn snapshot(&self) -> Vec<LivenessRecord> {
        self.lock()
            .iter()
            .map(|(client, last_seen)| LivenessRecord {
                client: client.clone(),
                last_seen: *last_seen,
            })
            .collect()
    }

    /// Last-seen instant for `client`, if it has ever pulsed.
    pub fn last_seen(&self, client: &ClientId) -> Option<Instant> {
        self.lock().get(client).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // No critical section can panic half-way through an update, so a
    // poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, BTreeMap<ClientId, Instant>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
