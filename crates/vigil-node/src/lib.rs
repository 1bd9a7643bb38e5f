//! `vigil-node` – Producer Side of the Hub Protocol
//!
//! What a store or car unit runs to stay visible to the hub: it keeps one
//! connection open, writes a `PULSE:` line every pulse interval and forwards
//! locally placed orders.
//!
//! # Modules
//!
//! - [`pulse`] – [`PulseEmitter`][pulse::PulseEmitter]: pulse line and
//!   cadence for one client identity.
//! - [`order`] – [`OrderRelay`][order::OrderRelay]: turns local
//!   `ORDER:<product>:<quantity>` lines into hub orders stamped with the
//!   store id.
//! - [`node`] – [`Node`][node::Node]: connects to the hub and drives both
//!   over a single connection.

pub mod node;
pub mod order;
pub mod pulse;

pub use node::{Node, NodeConfig};
pub use order::OrderRelay;
pub use pulse::{DEFAULT_PULSE_INTERVAL, PulseEmitter};
