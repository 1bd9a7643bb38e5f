//! [`HubServer`] – TCP listener and per-connection dispatcher.
//!
//! Listens on `0.0.0.0:6355` (configurable via [`HubServer::with_port`] and
//! [`HubServer::with_host`]).
//!
//! * Every accepted connection → its own [`ConnectionHandler`] task; the
//!   accept loop never waits on a handler.
//! * Exactly one [`TimeoutMonitor`] task per served listener, sharing the
//!   server's [`LivenessRegistry`].
//!
//! Handlers are unbounded by default.  [`HubServer::with_max_connections`]
//! caps concurrent handlers; connections over the cap are closed on accept.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{error, info, warn};
use vigil_kernel::{LivenessRegistry, MonitorConfig, RecordPolicy, TimeoutMonitor};
use vigil_middleware::EventBus;
use vigil_types::VigilError;

use crate::handler::ConnectionHandler;

/// Default TCP port for the hub.
pub const DEFAULT_PORT: u16 = 6355;

/// Pause after a failed `accept` (e.g. out of file descriptors) before
/// trying again.
pub const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// HubServer
// ---------------------------------------------------------------------------

/// Builder for the liveness hub.
///
/// # Example
///
/// ```rust,no_run
/// use std::time::Duration;
/// use vigil_hub::HubServer;
/// use vigil_kernel::MonitorConfig;
///
/// #[tokio::main]
/// async fn main() {
///     HubServer::default()
///         .with_monitor(MonitorConfig {
///             deadline: Duration::from_secs(10),
///             ..MonitorConfig::default()
///         })
///         .run()
///         .await
///         .expect("hub failed");
/// }
/// ```
pub struct HubServer {
    bus: EventBus,
    registry: Arc<LivenessRegistry>,
    host: IpAddr,
    port: u16,
    monitor: MonitorConfig,
    max_connections: Option<usize>,
}

impl HubServer {
    /// Create a server publishing onto `bus`, with an empty registry using
    /// the default [`RecordPolicy`].
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            registry: Arc::new(LivenessRegistry::default()),
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            monitor: MonitorConfig::default(),
            max_connections: None,
        }
    }

    /// Override the listening port (builder-style).  `0` picks an ephemeral
    /// port; read it back from [`BoundHub::local_addr`].
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the listening address (builder-style).
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Override deadline, poll interval and alert mode (builder-style).
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Replace the registry with an empty one using `policy` (builder-style).
    pub fn with_record_policy(mut self, policy: RecordPolicy) -> Self {
        self.registry = Arc::new(LivenessRegistry::new(policy));
        self
    }

    /// Cap concurrent connection handlers (builder-style).
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Shared handle to the registry the handlers and monitor will use.
    pub fn registry(&self) -> Arc<LivenessRegistry> {
        Arc::clone(&self.registry)
    }

    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Bind`] if the address is unavailable.
    pub async fn bind(self) -> Result<BoundHub, VigilError> {
        let addr = SocketAddr::new(self.host, self.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| VigilError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
        let local_addr = listener.local_addr().map_err(|e| VigilError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        info!(addr = %local_addr, "vigil hub listening");

        Ok(BoundHub {
            listener,
            local_addr,
            bus: self.bus,
            registry: self.registry,
            monitor: self.monitor,
            admission: self.max_connections.map(|n| Arc::new(Semaphore::new(n))),
        })
    }

    /// Bind and serve until the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Bind`] if the address is unavailable.
    pub async fn run(self) -> Result<(), VigilError> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.bind().await?.serve(shutdown).await
    }

    /// Bind and serve until `shutdown` turns `true` or its sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Bind`] if the address is unavailable.
    pub async fn run_until(self, shutdown: watch::Receiver<bool>) -> Result<(), VigilError> {
        self.bind().await?.serve(shutdown).await
    }
}

impl Default for HubServer {
    fn default() -> Self {
        Self::new(EventBus::default())
    }
}

// ---------------------------------------------------------------------------
// BoundHub
// ---------------------------------------------------------------------------

enum Step {
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Reaped(Result<(), tokio::task::JoinError>),
}

/// A hub whose listening socket is already bound.
pub struct BoundHub {
    listener: TcpListener,
    local_addr: SocketAddr,
    bus: EventBus,
    registry: Arc<LivenessRegistry>,
    monitor: MonitorConfig,
    admission: Option<Arc<Semaphore>>,
}

impl BoundHub {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<LivenessRegistry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` turns `true` or its sender is
    /// dropped.
    ///
    /// On return the listening socket is closed, the monitor is stopped and
    /// in-flight handlers are aborted, which drops their streams.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) -> Result<(), VigilError> {
        let monitor = TimeoutMonitor::new(
            Arc::clone(&self.registry),
            self.bus.clone(),
            self.monitor,
        )
        .spawn();
        let mut handlers = JoinSet::new();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let step = tokio::select! {
                changed = shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => break,
                },
                accepted = self.listener.accept() => Step::Accepted(accepted),
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => Step::Reaped(joined),
            };
            match step {
                Step::Accepted(Ok((stream, peer))) => self.dispatch(&mut handlers, stream, peer),
                Step::Accepted(Err(e)) => accept_failed(&e).await,
                Step::Reaped(Err(e)) if e.is_panic() => {
                    error!(error = %e, "connection handler panicked");
                }
                Step::Reaped(_) => {}
            }
        }

        info!(addr = %self.local_addr, open = handlers.len(), "vigil hub shutting down");
        drop(self.listener);
        monitor.abort();
        handlers.shutdown().await;
        Ok(())
    }

    fn dispatch(&self, handlers: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let permit = match &self.admission {
            None => None,
            Some(slots) => match Arc::clone(slots).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(peer = %peer, "connection limit reached; closing connection");
                    return;
                }
            },
        };

        let handler = ConnectionHandler::new(
            peer.to_string(),
            Arc::clone(&self.registry),
            self.bus.clone(),
        );
        handlers.spawn(async move {
            let _permit = permit;
            // Errors are already logged and published by the handler.
            let _ = handler.run(stream).await;
        });
    }
}

async fn accept_failed(e: &std::io::Error) {
    error!(error = %e, backoff_ms = ACCEPT_ERROR_BACKOFF.as_millis() as u64, "accept error");
    time::sleep(ACCEPT_ERROR_BACKOFF).await;
}
