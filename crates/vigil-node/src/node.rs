//! [`Node`] – a producer connected to the hub.
//!
//! One connection carries both traffic kinds: a `PULSE:` line on every tick
//! of the [`PulseEmitter`] and an `ORDER:` line for every valid local order
//! read from the optional order source.  Malformed local orders are logged
//! and dropped; they never reach the hub.
//!
//! The node stops when its shutdown flag turns `true` or when a write to the
//! hub fails.  It does not reconnect.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vigil_types::{ClientId, VigilError, wire};

use crate::order::OrderRelay;
use crate::pulse::{DEFAULT_PULSE_INTERVAL, PulseEmitter};

pub const DEFAULT_HUB_ADDR: &str = "127.0.0.1:6355";

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: ClientId,
    /// `host:port` of the hub.
    pub hub_addr: String,
    pub pulse_interval: Duration,
}

impl NodeConfig {
    pub fn new(id: ClientId) -> Self {
        Self {
            id,
            hub_addr: DEFAULT_HUB_ADDR.to_string(),
            pulse_interval: DEFAULT_PULSE_INTERVAL,
        }
    }
}

/// What a node sent before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NodeStats {
    pub pulses: u64,
    pub orders: u64,
    /// Local order lines dropped as malformed.
    pub rejected: u64,
}

pub struct Node {
    config: NodeConfig,
    emitter: PulseEmitter,
    relay: OrderRelay,
}

enum Step {
    Stop,
    Pulse,
    OrderLine(std::io::Result<Option<String>>),
}

impl Node {
    pub fn new(config: NodeConfig) -> Self {
        let emitter = PulseEmitter::new(config.id.clone(), config.pulse_interval);
        let relay = OrderRelay::new(config.id.clone());
        Self {
            config,
            emitter,
            relay,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Open the connection to the hub.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Connection`] when the hub is unreachable.
    pub async fn connect(&self) -> Result<TcpStream, VigilError> {
        let stream = TcpStream::connect(&self.config.hub_addr)
            .await
            .map_err(|e| VigilError::Connection {
                peer: self.config.hub_addr.clone(),
                reason: e.to_string(),
            })?;
        info!(client = %self.config.id, hub = %self.config.hub_addr, "connected to hub");
        Ok(stream)
    }

    /// Connect, then [`drive`](Self::drive) the connection.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Connection`] if connecting or writing fails.
    pub async fn run<R>(
        &self,
        orders: Option<R>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<NodeStats, VigilError>
    where
        R: AsyncBufRead + Unpin,
    {
        let stream = self.connect().await?;
        self.drive(stream, orders, shutdown).await
    }

    /// Pulse and relay orders over `writer` until shutdown.
    ///
    /// When the order source reaches EOF the node keeps pulsing.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Connection`] if a write to the hub fails.
    pub async fn drive<W, R>(
        &self,
        mut writer: W,
        orders: Option<R>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<NodeStats, VigilError>
    where
        W: AsyncWrite + Unpin,
        R: AsyncBufRead + Unpin,
    {
        let mut stats = NodeStats::default();
        let mut ticker = self.emitter.ticker();
        let mut orders: Option<Lines<R>> = orders.map(AsyncBufReadExt::lines);

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            let step = tokio::select! {
                changed = shutdown.changed() => match changed {
                    Ok(()) => continue,
                    Err(_) => Step::Stop,
                },
                _ = ticker.tick() => Step::Pulse,
                line = next_line(orders.as_mut()) => Step::OrderLine(line),
            };

            match step {
                Step::Stop => break,
                Step::Pulse => {
                    self.send(&mut writer, self.emitter.line()).await?;
                    stats.pulses += 1;
                    debug!(client = %self.config.id, "pulse sent");
                }
                Step::OrderLine(Ok(Some(line))) => match self.relay.translate(&line) {
                    Ok(Some(order)) => {
                        self.send(&mut writer, &wire::encode_order(&order)).await?;
                        stats.orders += 1;
                        info!(
                            store = %order.store_id,
                            product = %order.product,
                            quantity = order.quantity,
                            "order sent"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        stats.rejected += 1;
                        warn!(client = %self.config.id, error = %e, "local order rejected");
                    }
                },
                Step::OrderLine(Ok(None)) => {
                    info!(client = %self.config.id, "order source closed; pulsing only");
                    orders = None;
                }
                Step::OrderLine(Err(e)) => {
                    warn!(client = %self.config.id, error = %e, "order source failed; pulsing only");
                    orders = None;
                }
            }
        }

        let _ = writer.shutdown().await;
        info!(
            client = %self.config.id,
            pulses = stats.pulses,
            orders = stats.orders,
            "node stopped"
        );
        Ok(stats)
    }

    async fn send<W>(&self, writer: &mut W, line: &str) -> Result<(), VigilError>
    where
        W: AsyncWrite + Unpin,
    {
        let to_conn = |e: std::io::Error| VigilError::Connection {
            peer: self.config.hub_addr.clone(),
            reason: e.to_string(),
        };
        writer.write_all(line.as_bytes()).await.map_err(to_conn)?;
        writer.flush().await.map_err(to_conn)
    }
}

async fn next_line<R>(lines: Option<&mut Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, BufReader};
    use tokio::time;

    fn node(id: &str) -> Node {
        Node::new(NodeConfig {
            pulse_interval: Duration::from_millis(1000),
            ..NodeConfig::new(ClientId::from(id))
        })
    }

    #[test]
    fn config_defaults() {
        let cfg = NodeConfig::new(ClientId::from("Store-A"));
        assert_eq!(cfg.hub_addr, "127.0.0.1:6355");
        assert_eq!(cfg.pulse_interval, Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn pulses_every_interval_until_shutdown() {
        let (client, mut hub) = tokio::io::duplex(4096);
        let (tx, rx) = watch::channel(false);
        let node = node("Store-A");

        let task = tokio::spawn(async move {
            node.drive(client, None::<BufReader<&[u8]>>, rx).await
        });

        // Ticks at 0, 1, 2 s.
        time::sleep(Duration::from_millis(2_500)).await;
        tx.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.pulses, 3);

        let mut sent = String::new();
        hub.read_to_string(&mut sent).await.unwrap();
        assert_eq!(sent, "PULSE:Store-A\n".repeat(3));
    }

    #[tokio::test(start_paused = true)]
    async fn relays_valid_orders_and_drops_bad_ones() {
        let (client, mut hub) = tokio::io::duplex(4096);
        let (tx, rx) = watch::channel(false);
        let node = node("Store-A");
        let source = BufReader::new(&b"ORDER:Widget:3\nnonsense\n\nORDER:Gadget:x\n"[..]);

        let task = tokio::spawn(async move { node.drive(client, Some(source), rx).await });

        time::sleep(Duration::from_millis(500)).await;
        tx.send(true).unwrap();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.orders, 1);
        assert_eq!(stats.rejected, 2);

        let mut sent = String::new();
        hub.read_to_string(&mut sent).await.unwrap();
        assert!(sent.contains("ORDER:Store-A:Widget:3\n"));
        assert!(!sent.contains("Gadget"));
    }

    #[tokio::test]
    async fn write_failure_stops_the_node() {
        let (client, hub) = tokio::io::duplex(64);
        drop(hub);
        let (_tx, rx) = watch::channel(false);

        let result = node("Car-1")
            .drive(client, None::<BufReader<&[u8]>>, rx)
            .await;
        assert!(matches!(result, Err(VigilError::Connection { .. })));
    }

    #[tokio::test]
    async fn connect_to_closed_port_is_a_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let node = Node::new(NodeConfig {
            hub_addr: addr.to_string(),
            ..NodeConfig::new(ClientId::from("Car-1"))
        });
        assert!(matches!(
            node.connect().await,
            Err(VigilError::Connection { .. })
        ));
    }
}
