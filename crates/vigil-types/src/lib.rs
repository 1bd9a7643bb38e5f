//! `vigil-types` – Shared Data Model
//!
//! Identities, wire messages, events and the error type used by every vigil
//! crate.  [`wire`] holds the line codec for the hub protocol.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub mod wire;

/// Opaque name of a connected producer (a store, a car unit, a camera node).
///
/// Identities are unique among active registrations but may be reused when a
/// producer reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Validate an identity a producer will send on the wire.
    ///
    /// Surrounding whitespace is trimmed.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::InvalidClientId`] when the id is empty or
    /// contains `:`, `\r` or `\n`; the hub would record such an id under a
    /// different name.
    pub fn parse(id: &str) -> Result<Self, VigilError> {
        let trimmed = id.trim();
        let reason = if trimmed.is_empty() {
            Some("empty id")
        } else if trimmed.contains(':') {
            Some("id must not contain ':'")
        } else if trimmed.contains(['\r', '\n']) {
            Some("id must not contain a line break")
        } else {
            None
        };
        match reason {
            Some(reason) => Err(VigilError::InvalidClientId {
                id: id.to_string(),
                reason: reason.to_string(),
            }),
            None => Ok(Self(trimmed.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ClientId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A relayed order: `ORDER:<store_id>:<product>:<quantity>` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub store_id: ClientId,
    pub product: String,
    pub quantity: u32,
}

/// One parsed line of the hub wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum InboundMessage {
    /// `PULSE:<client_id>` liveness signal.
    Pulse { id: ClientId },
    /// `ORDER:<store_id>:<product>:<quantity>` relay message.
    Order(Order),
    /// Any other line. Logged and otherwise ignored.
    Unknown { raw: String },
}

/// Raised by the timeout monitor when a client's last pulse is older than
/// the configured deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleAlert {
    pub client: ClientId,
    /// Time since the last pulse, measured when the alert was raised.
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Coarse health classification of a monitored client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Damaged,
    Dead,
    Recovering,
}

impl HealthStatus {
    /// Severity level, `0` being nominal.
    pub fn level(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Damaged => 1,
            HealthStatus::Dead => 2,
            HealthStatus::Recovering => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Healthy",
            HealthStatus::Damaged => "Damaged",
            HealthStatus::Dead => "Unresponsive",
            HealthStatus::Recovering => "Recovering",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            HealthStatus::Healthy => "Operating normally",
            HealthStatus::Damaged => "Experiencing partial failure",
            HealthStatus::Dead => "No heartbeat detected",
            HealthStatus::Recovering => "Service is restarting or reconnecting",
        }
    }

    /// `true` for [`HealthStatus::Healthy`] and [`HealthStatus::Recovering`].
    pub fn is_healthy(self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Recovering)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.description())
    }
}

/// Unified event wrapper for the hub's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "vigil-hub::handler"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Everything the hub reports to its logging/alert sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Pulse { client: ClientId },
    Order(Order),
    Unknown { raw: String },
    Malformed { raw: String, reason: String },
    StaleClient(StaleAlert),
    ClientRecovered { client: ClientId },
    HealthChanged { client: ClientId, status: HealthStatus },
    ConnectionOpened { peer: String },
    ConnectionClosed { peer: String, reason: Option<String> },
}

/// Error type shared by every vigil crate.
#[derive(Error, Debug)]
pub enum VigilError {
    #[error("Bind Error on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Connection Error with {peer}: {reason}")]
    Connection { peer: String, reason: String },

    #[error("Malformed Message {line:?}: {reason}")]
    MalformedMessage { line: String, reason: String },

    #[error("Invalid Client Id {id:?}: {reason}")]
    InvalidClientId { id: String, reason: String },

    #[error("Event Bus Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
