//! Network log fan-out.
//!
//! Every log record the service emits is additionally published as a
//! JSON line to any TCP subscriber, tagged with service name and
//! hostname, so the head node's aggregator can watch the whole fleet
//! without polling per-node files. The relay binds the first free port
//! in a fixed range; subscribers scan that range.

use std::fmt::Write as _;

use chrono::Utc;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use daq_core::{DaqError, Result};

/// Buffered records per subscriber; slow subscribers lose the oldest.
const RELAY_BUFFER: usize = 1024;

/// Handle to a running relay.
pub struct LogRelay {
    port: u16,
    tx: broadcast::Sender<String>,
}

impl LogRelay {
    /// Bind the first free port in `[port_base, port_base + span)` and
    /// start the subscriber accept loop.
    pub async fn spawn(port_base: u16, span: u16) -> Result<Self> {
        let mut bound = None;
        for port in port_base..port_base.saturating_add(span) {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    bound = Some((listener, port));
                    break;
                }
                Err(_) => continue,
            }
        }
        let (listener, port) = bound.ok_or_else(|| {
            DaqError::Configuration(format!(
                "no free log relay port in {}..{}",
                port_base,
                port_base.saturating_add(span)
            ))
        })?;

        let (tx, _) = broadcast::channel::<String>(RELAY_BUFFER);
        let fanout = tx.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _peer)) = listener.accept().await else {
                    continue;
                };
                let mut rx = fanout.subscribe();
                tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(line) => {
                                if socket.write_all(line.as_bytes()).await.is_err() {
                                    return;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => return,
                        }
                    }
                });
            }
        });

        Ok(Self { port, tx })
    }

    /// Port the relay is publishing on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Build the tracing layer that feeds this relay.
    pub fn layer(&self, service: impl Into<String>) -> LogRelayLayer {
        LogRelayLayer {
            tx: self.tx.clone(),
            service: service.into(),
            host: hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".into()),
        }
    }
}

/// `tracing` layer publishing every event to the relay.
pub struct LogRelayLayer {
    tx: broadcast::Sender<String>,
    service: String,
    host: String,
}

impl<S: Subscriber> Layer<S> for LogRelayLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        // No subscribers, no work.
        if self.tx.receiver_count() == 0 {
            return;
        }
        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);

        let record = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": event.metadata().level().to_string(),
            "target": event.metadata().target(),
            "message": visitor.message,
            "fields": visitor.fields,
            "service": self.service,
            "host": self.host,
        });
        let mut line = record.to_string();
        let _ = writeln!(line);
        let _ = self.tx.send(line);
    }
}

#[derive(Default)]
struct RecordVisitor {
    message: String,
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Visit for RecordVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().into(), json!(format!("{:?}", value)));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().into(), json!(value));
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().into(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().into(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().into(), json!(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn subscriber_receives_tagged_records() {
        let relay = LogRelay::spawn(18500, 4).await.unwrap();
        let port = relay.port();
        let layer = relay.layer("unit-test");

        let mut socket = tokio::net::TcpStream::connect(("127.0.0.1", port))
            .await
            .unwrap();
        // Let the accept loop pick up the subscription.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(run = 7u64, "relay check");
        });

        let mut buf = vec![0u8; 4096];
        let n = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            socket.read(&mut buf),
        )
        .await
        .unwrap()
        .unwrap();
        let line = String::from_utf8_lossy(&buf[..n]);
        let record: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(record["message"], "relay check");
        assert_eq!(record["service"], "unit-test");
        assert_eq!(record["fields"]["run"], 7);
        assert!(record["host"].as_str().is_some());
    }
}
