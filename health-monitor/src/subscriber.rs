//! Telemetry ingestion from the NATS transport
//!
//! Every payload received on the telemetry subject is decoded as a partial
//! record and merged into the shared state. A bad payload is logged and
//! dropped; it never ends the subscription.

use crate::config::Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use std::future::Future;
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use telemetry_store::{PartialRecord, RecordError, StateError, TelemetryRecord, TelemetryState};
use thiserror::Error;
use tracing::{debug, error, info, warn};

const SUBSCRIBE_BACKOFF_MS: u64 = 500;
const SUBSCRIBE_BACKOFF_MAX_MS: u64 = 30_000;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Undecodable telemetry payload on {subject}: {source}")]
    Parse {
        subject: String,
        #[source]
        source: RecordError,
    },

    #[error(transparent)]
    Storage(#[from] StateError),
}

/// A payload as received from the transport, stamped on receipt
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub subject: String,
    pub payload: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }
}

impl From<async_nats::Message> for InboundMessage {
    fn from(message: async_nats::Message) -> Self {
        Self::new(message.subject.to_string(), message.payload.to_vec())
    }
}

/// Connect to NATS. Reconnection and backoff are left to the client; a
/// broker that is down at startup is retried rather than failing the process.
pub async fn connect_nats(config: &Config) -> Result<async_nats::Client> {
    info!("Connecting to NATS at {}", config.nats_url);

    let mut options = async_nats::ConnectOptions::new()
        .retry_on_initial_connect()
        .event_callback(|event| async move {
            match event {
                async_nats::Event::Connected => info!("NATS connection established"),
                async_nats::Event::Disconnected => {
                    warn!("NATS connection lost, client will reconnect")
                }
                other => debug!(event = ?other, "NATS client event"),
            }
        });

    if let Some(creds_path) = &config.nats_creds_path {
        info!("Using credentials file: {}", creds_path);
        options = options
            .credentials_file(creds_path)
            .await
            .context("Failed to load NATS credentials")?;
    } else {
        warn!("No NATS credentials provided, connecting without auth");
    }

    options
        .connect(&config.nats_url)
        .await
        .context("Failed to connect to NATS")
}

/// Source of telemetry messages for one subject
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Open a subscription. Dropping the returned stream unsubscribes.
    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, InboundMessage>>;
}

#[async_trait]
impl TelemetrySource for async_nats::Client {
    async fn subscribe(&self, subject: &str) -> Result<BoxStream<'static, InboundMessage>> {
        let subscription = async_nats::Client::subscribe(self, subject.to_string())
            .await
            .context("Failed to subscribe to telemetry subject")?;
        Ok(subscription.map(InboundMessage::from).boxed())
    }
}

/// Why a consume loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stopped {
    Shutdown,
    StreamClosed,
}

/// Background subscriber merging telemetry payloads into [`TelemetryState`]
pub struct TelemetrySubscriber {
    state: Arc<TelemetryState>,
    subject: String,
    subscribed: AtomicBool,
}

impl TelemetrySubscriber {
    pub fn new(state: Arc<TelemetryState>, subject: impl Into<String>) -> Self {
        Self {
            state,
            subject: subject.into(),
            subscribed: AtomicBool::new(false),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Subscribe and merge messages until `shutdown` resolves. A subscription
    /// that ends on its own is re-established after a backoff.
    pub async fn run<T, F>(&self, source: &T, shutdown: F) -> Result<()>
    where
        T: TelemetrySource + ?Sized,
        F: Future,
    {
        let mut shutdown = pin!(shutdown);
        let mut attempt = 0u32;

        loop {
            let messages = match source.subscribe(&self.subject).await {
                Ok(messages) => messages,
                Err(e) => {
                    attempt += 1;
                    warn!(
                        subject = %self.subject,
                        attempt = attempt,
                        error = %e,
                        "Failed to subscribe, retrying after backoff"
                    );
                    if !self.backoff(attempt, shutdown.as_mut()).await {
                        info!("Shutdown requested before subscription was established");
                        return Ok(());
                    }
                    continue;
                }
            };

            self.subscribed.store(true, Ordering::SeqCst);
            info!(subject = %self.subject, "Subscribed to telemetry subject");

            let (merged, stopped) = self.drain(messages, shutdown.as_mut()).await;

            self.subscribed.store(false, Ordering::SeqCst);
            info!(merged = merged, "Telemetry subscription ended");

            match stopped {
                Stopped::Shutdown => return Ok(()),
                Stopped::StreamClosed => {
                    attempt = if merged > 0 { 1 } else { attempt + 1 };
                    error!(
                        subject = %self.subject,
                        attempt = attempt,
                        "Telemetry subscription closed unexpectedly, resubscribing"
                    );
                    if !self.backoff(attempt, shutdown.as_mut()).await {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Sleep for the backoff of `attempt`. Returns `false` if shutdown won.
    async fn backoff<F: Future>(&self, attempt: u32, shutdown: Pin<&mut F>) -> bool {
        let exponent = attempt.saturating_sub(1).min(6);
        let backoff = Duration::from_millis(
            (SUBSCRIBE_BACKOFF_MS << exponent).min(SUBSCRIBE_BACKOFF_MAX_MS),
        );
        debug!(backoff_ms = backoff.as_millis(), "Waiting before resubscribing");

        tokio::select! {
            _ = shutdown => false,
            _ = tokio::time::sleep(backoff) => true,
        }
    }

    /// Merge messages from `messages` until the stream ends or `shutdown`
    /// resolves. A message already being merged is always finished. Returns
    /// the number of messages merged without error.
    pub async fn consume<S, F>(&self, messages: S, shutdown: F) -> usize
    where
        S: Stream<Item = InboundMessage>,
        F: Future,
    {
        let shutdown = pin!(shutdown);
        self.drain(messages, shutdown).await.0
    }

    async fn drain<S, F>(&self, messages: S, mut shutdown: Pin<&mut F>) -> (usize, Stopped)
    where
        S: Stream<Item = InboundMessage>,
        F: Future,
    {
        let mut messages = pin!(messages);
        let mut merged = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Telemetry subscriber: shutdown signal received");
                    return (merged, Stopped::Shutdown);
                }
                next = messages.next() => match next {
                    Some(message) => {
                        if self.handle_message(message).await.is_ok() {
                            merged += 1;
                        }
                    }
                    None => {
                        warn!(subject = %self.subject, "Telemetry subscription closed");
                        return (merged, Stopped::StreamClosed);
                    }
                }
            }
        }
    }

    /// Decode one payload and merge it, stamped with its receipt time.
    pub async fn handle_message(
        &self,
        message: InboundMessage,
    ) -> Result<TelemetryRecord, IngestError> {
        debug!(
            subject = %message.subject,
            payload_size = message.payload.len(),
            "Processing telemetry message"
        );

        let partial = match PartialRecord::from_slice(&message.payload) {
            Ok(partial) => partial,
            Err(source) => {
                warn!(
                    subject = %message.subject,
                    error = %source,
                    "Dropping undecodable telemetry payload"
                );
                return Err(IngestError::Parse {
                    subject: message.subject,
                    source,
                });
            }
        };

        let record = self.state.merge_at(&partial, message.received_at).await?;
        debug!(subject = %message.subject, "Telemetry merged");
        Ok(record)
    }
}
