//! `vigil-hub` – The Liveness Hub Server
//!
//! Boots a plain TCP listener (default port `6355`) that:
//!
//! 1. **Accepts** any number of concurrent producer connections and hands
//!    each one to its own [`ConnectionHandler`] task.
//!
//! 2. **Ingests** newline-delimited `PULSE:<id>` and
//!    `ORDER:<store>:<product>:<qty>` lines.  Pulses update the shared
//!    [`LivenessRegistry`]; orders are relayed onto the [`EventBus`].
//!
//! 3. **Watches** the registry with exactly one [`TimeoutMonitor`] and
//!    publishes stale-client alerts.
//!
//! # Usage
//!
//! ```rust,no_run
//! use vigil_hub::HubServer;
//!
//! #[tokio::main]
//! async fn main() {
//!     HubServer::default()
//!         .with_port(6355)
//!         .run()
//!         .await
//!         .expect("hub failed");
//! }
//! ```
//!
//! [`LivenessRegistry`]: vigil_kernel::LivenessRegistry
//! [`TimeoutMonitor`]: vigil_kernel::TimeoutMonitor
//! [`EventBus`]: vigil_middleware::EventBus

pub mod handler;
pub mod server;

pub use handler::{ConnectionHandler, MAX_LINE_BYTES};
pub use server::{BoundHub, DEFAULT_PORT, HubServer};
