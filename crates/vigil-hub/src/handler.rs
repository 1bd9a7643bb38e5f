//! [`ConnectionHandler`] – owns one accepted connection for its lifetime.
//!
//! Reads newline-delimited lines until EOF or an I/O error, classifies each
//! one with [`vigil_types::wire::parse_line`] and dispatches it:
//!
//! * `PULSE:` → [`LivenessRegistry::record`] with the current instant.
//! * `ORDER:` → relayed onto the [`EventBus`]; the registry is untouched.
//! * malformed or unknown → logged and published as an alert; the connection
//!   stays open.
//! * longer than [`MAX_LINE_BYTES`] → reported as malformed and discarded up
//!   to the next newline; the connection stays open.
//!
//! The stream is dropped, and therefore closed, exactly once when
//! [`ConnectionHandler::run`] returns or its task is aborted.

use std::sync::Arc;

use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vigil_kernel::{LivenessRegistry, RecordOutcome};
use vigil_middleware::EventBus;
use vigil_types::{EventPayload, InboundMessage, VigilError, wire};

const SOURCE: &str = "vigil-hub::handler";

/// Longest accepted line, newline included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// How much of an oversized line is kept in the malformed report.
const OVERSIZED_PREVIEW_BYTES: usize = 64;

/// Per-connection line reader and dispatcher.
pub struct ConnectionHandler {
    peer: String,
    registry: Arc<LivenessRegistry>,
    bus: EventBus,
}

impl ConnectionHandler {
    pub fn new(peer: impl Into<String>, registry: Arc<LivenessRegistry>, bus: EventBus) -> Self {
        Self {
            peer: peer.into(),
            registry,
            bus,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Drive `stream` to completion.
    ///
    /// # Errors
    ///
    /// Returns [`VigilError::Connection`] when reading fails mid-stream.  A
    /// clean EOF is `Ok(())`.  Either way the handler is finished; there is
    /// no retry.
    pub async fn run<S>(self, stream: S) -> Result<(), VigilError>
    where
        S: AsyncRead + Unpin,
    {
        info!(peer = %self.peer, "connection opened");
        self.bus.emit(
            SOURCE,
            EventPayload::ConnectionOpened {
                peer: self.peer.clone(),
            },
        );

        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        let result = loop {
            buf.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut buf)
                .await;
            match read {
                Ok(0) => break Ok(()),
                Ok(n) if n == MAX_LINE_BYTES && buf.last() != Some(&b'\n') => {
                    let preview = String::from_utf8_lossy(&buf[..OVERSIZED_PREVIEW_BYTES]);
                    self.report_malformed(
                        preview.into_owned(),
                        format!("line exceeds {MAX_LINE_BYTES} bytes"),
                    );
                    match skip_past_newline(&mut reader).await {
                        Ok(true) => {}
                        Ok(false) => break Ok(()),
                        Err(e) => {
                            break Err(VigilError::Connection {
                                peer: self.peer.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                Ok(_) => match std::str::from_utf8(&buf) {
                    Ok(line) => {
                        self.handle_line(line);
                    }
                    Err(e) => {
                        let raw = String::from_utf8_lossy(&buf).trim_end().to_string();
                        self.report_malformed(raw, format!("invalid UTF-8: {e}"));
                    }
                },
                Err(e) => {
                    break Err(VigilError::Connection {
                        peer: self.peer.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        };
        drop(reader);

        match &result {
            Ok(()) => info!(peer = %self.peer, "connection closed"),
            Err(e) => warn!(peer = %self.peer, error = %e, "connection dropped"),
        }
        self.bus.emit(
            SOURCE,
            EventPayload::ConnectionClosed {
                peer: self.peer.clone(),
                reason: result.as_ref().err().map(ToString::to_string),
            },
        );
        result
    }

    /// Classify and dispatch a single line.
    ///
    /// Returns the parsed message, or `None` when the line was malformed.
    pub fn handle_line(&self, line: &str) -> Option<InboundMessage> {
        let message = match wire::parse_line(line) {
            Ok(message) => message,
            Err(VigilError::MalformedMessage { line, reason }) => {
                self.report_malformed(line, reason);
                return None;
            }
            Err(e) => {
                self.report_malformed(line.trim_end().to_string(), e.to_string());
                return None;
            }
        };

        match &message {
            InboundMessage::Pulse { id } => {
                let outcome = self.registry.record(id.clone(), Instant::now());
                if outcome == RecordOutcome::Stale {
                    debug!(peer = %self.peer, client = %id, "out-of-order pulse ignored");
                } else {
                    debug!(peer = %self.peer, client = %id, ?outcome, "pulse received");
                }
                self.bus
                    .emit(SOURCE, EventPayload::Pulse { client: id.clone() });
            }
            InboundMessage::Order(order) => {
                info!(
                    peer = %self.peer,
                    store = %order.store_id,
                    product = %order.product,
                    quantity = order.quantity,
                    "order relayed"
                );
                self.bus.emit(SOURCE, EventPayload::Order(order.clone()));
            }
            InboundMessage::Unknown { raw } => {
                warn!(peer = %self.peer, line = %raw, "unknown message");
                self.bus
                    .emit(SOURCE, EventPayload::Unknown { raw: raw.clone() });
            }
        }

        Some(message)
    }

    fn report_malformed(&self, raw: String, reason: String) {
        warn!(peer = %self.peer, line = %raw, %reason, "malformed message skipped");
        self.bus
            .emit(SOURCE, EventPayload::Malformed { raw, reason });
    }
}

/// Consume input through the next `\n` without buffering it.  Returns
/// `false` on EOF.
async fn skip_past_newline<R>(reader: &mut R) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let chunk = reader.fill_buf().await?;
        if chunk.is_empty() {
            return Ok(false);
        }
        match chunk.iter().position(|&b| b == b'\n') {
            Some(i) => {
                reader.consume(i + 1);
                return Ok(true);
            }
            None => {
                let len = chunk.len();
                reader.consume(len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncWriteExt, ReadBuf};
    use vigil_middleware::Topic;
    use vigil_types::{ClientId, Order};

    fn make_handler() -> (ConnectionHandler, Arc<LivenessRegistry>, EventBus) {
        let registry = Arc::new(LivenessRegistry::default());
        let bus = EventBus::default();
        let handler = ConnectionHandler::new("test-peer", Arc::clone(&registry), bus.clone());
        (handler, registry, bus)
    }

    #[test]
    fn pulse_line_records_client() {
        let (handler, registry, _bus) = make_handler();
        handler.handle_line("PULSE:Store-A\n");
        assert!(registry.last_seen(&ClientId::from("Store-A")).is_some());
    }

    #[tokio::test]
    async fn order_line_is_relayed_without_touching_registry() {
        let (handler, registry, bus) = make_handler();
        let mut orders = bus.subscribe_to(Topic::Orders);

        handler.handle_line("ORDER:Store-A:Widget:3");

        let event = orders.recv().await.unwrap();
        assert_eq!(event.source, SOURCE);
        assert_eq!(
            event.payload,
            EventPayload::Order(Order {
                store_id: ClientId::from("Store-A"),
                product: "Widget".to_string(),
                quantity: 3,
            })
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn malformed_order_is_reported_and_skipped() {
        let (handler, registry, bus) = make_handler();
        let mut alerts = bus.subscribe_to(Topic::Alerts);

        assert!(handler.handle_line("ORDER:Store-A:Widget:lots").is_none());

        let event = alerts.recv().await.unwrap();
        let EventPayload::Malformed { raw, .. } = event.payload else {
            panic!("expected Malformed, got {:?}", event.payload);
        };
        assert_eq!(raw, "ORDER:Store-A:Widget:lots");
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unknown_line_is_reported() {
        let (handler, _registry, bus) = make_handler();
        let mut alerts = bus.subscribe_to(Topic::Alerts);

        handler.handle_line("HEARTBEAT");

        let event = alerts.recv().await.unwrap();
        assert_eq!(
            event.payload,
            EventPayload::Unknown {
                raw: "HEARTBEAT".to_string()
            }
        );
    }

    #[tokio::test]
    async fn run_survives_bad_lines_until_eof() {
        let (handler, registry, bus) = make_handler();
        let mut conns = bus.subscribe_to(Topic::Connections);
        let (mut client, server) = tokio::io::duplex(1024);

        let task = tokio::spawn(handler.run(server));

        client
            .write_all(
                b"ORDER:bad\nORDER:Store-A:Widget:x\n\xff\xfe\nnoise\nPULSE:Store-A\nPULSE:Store-B",
            )
            .await
            .unwrap();
        drop(client);

        task.await.unwrap().expect("clean EOF");

        let ids: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| r.client.to_string())
            .collect();
        assert_eq!(ids, ["Store-A", "Store-B"]);

        let opened = conns.recv().await.unwrap();
        assert!(matches!(opened.payload, EventPayload::ConnectionOpened { .. }));
        let closed = conns.recv().await.unwrap();
        assert_eq!(
            closed.payload,
            EventPayload::ConnectionClosed {
                peer: "test-peer".to_string(),
                reason: None
            }
        );
    }

    #[tokio::test]
    async fn oversized_line_is_reported_and_skipped() {
        let (handler, registry, bus) = make_handler();
        let mut alerts = bus.subscribe_to(Topic::Alerts);
        let (mut client, server) = tokio::io::duplex(8 * 1024);

        let task = tokio::spawn(handler.run(server));

        client
            .write_all(&vec![b'A'; MAX_LINE_BYTES * 4])
            .await
            .unwrap();
        client.write_all(b"\nPULSE:Store-A\n").await.unwrap();
        drop(client);

        task.await.unwrap().expect("clean EOF");

        let event = alerts.recv().await.unwrap();
        let EventPayload::Malformed { raw, reason } = event.payload else {
            panic!("expected Malformed, got {:?}", event.payload);
        };
        assert_eq!(raw.len(), OVERSIZED_PREVIEW_BYTES);
        assert!(reason.contains("exceeds"), "{reason}");
        // Nothing else from the oversized line reached the bus.
        assert!(alerts.try_next().is_none());

        let ids: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|r| r.client.to_string())
            .collect();
        assert_eq!(ids, ["Store-A"]);
    }

    #[tokio::test]
    async fn line_of_exactly_max_length_is_accepted() {
        let (handler, registry, _bus) = make_handler();
        let mut line = b"PULSE:Store-A".to_vec();
        line.resize(MAX_LINE_BYTES - 1, b' ');
        line.push(b'\n');

        handler.run(&line[..]).await.expect("clean EOF");
        assert!(registry.last_seen(&ClientId::from("Store-A")).is_some());
    }

    /// Yields an I/O error on every read.
    struct Reset;

    impl AsyncRead for Reset {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )))
        }
    }

    #[tokio::test]
    async fn read_error_ends_the_connection_but_keeps_records() {
        let (handler, registry, bus) = make_handler();
        let mut conns = bus.subscribe_to(Topic::Connections);
        let stream = (&b"PULSE:Store-A\nPULSE:Store-B\n"[..]).chain(Reset);

        match handler.run(stream).await {
            Err(VigilError::Connection { peer, reason }) => {
                assert_eq!(peer, "test-peer");
                assert!(reason.contains("reset"), "{reason}");
            }
            other => panic!("expected a connection error, got {other:?}"),
        }

        assert_eq!(registry.len(), 2);
        assert!(registry.last_seen(&ClientId::from("Store-A")).is_some());

        let opened = conns.recv().await.unwrap();
        assert!(matches!(opened.payload, EventPayload::ConnectionOpened { .. }));
        let closed = conns.recv().await.unwrap();
        let EventPayload::ConnectionClosed { reason: Some(reason), .. } = closed.payload else {
            panic!("expected a close with a reason, got {:?}", closed.payload);
        };
        assert!(reason.contains("reset"), "{reason}");
    }
}
