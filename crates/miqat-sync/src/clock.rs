//! Remote clock synchronization.
//!
//! A bad local clock shifts every countdown, so the offset to a trusted
//! remote clock is measured periodically and persisted for both contexts.
//! Nothing here ever fails the caller: any problem falls back to local time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miqat_core::config::{ClockConfig, MAX_REMOTE_TIMEOUT_MS};
use miqat_core::types::ClockOffset;
use miqat_scheduler::{StateStore, WallClock};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum TimeSourceError {
    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("unreachable: {0}")]
    Network(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// A trusted remote clock.
#[async_trait]
pub trait TimeSource: Send + Sync {
    fn name(&self) -> &str;

    /// Current remote time in epoch milliseconds.
    async fn fetch_remote_time(&self) -> Result<i64, TimeSourceError>;
}

/// worldtimeapi-style JSON endpoint.
pub struct HttpTimeSource {
    client: reqwest::Client,
    url: String,
}

impl HttpTimeSource {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorldTimeResponse {
    #[serde(default)]
    utc_datetime: Option<String>,
    #[serde(default)]
    unixtime: Option<i64>,
}

/// `utc_datetime` carries milliseconds; `unixtime` is the whole-second fallback.
fn parse_world_time(body: &str) -> Result<i64, TimeSourceError> {
    let resp: WorldTimeResponse =
        serde_json::from_str(body).map_err(|e| TimeSourceError::Malformed(e.to_string()))?;

    if let Some(ref raw) = resp.utc_datetime {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.timestamp_millis());
        }
    }
    resp.unixtime
        .map(|secs| secs * 1000)
        .ok_or_else(|| TimeSourceError::Malformed("no utc_datetime or unixtime".to_string()))
}

#[async_trait]
impl TimeSource for HttpTimeSource {
    fn name(&self) -> &str {
        &self.url
    }

    async fn fetch_remote_time(&self) -> Result<i64, TimeSourceError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| TimeSourceError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(TimeSourceError::Network(format!("HTTP {}", resp.status())));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| TimeSourceError::Network(e.to_string()))?;
        parse_world_time(&body)
    }
}

/// Measures and persists the offset between a remote clock and the local one.
pub struct ClockSync {
    sources: Vec<Arc<dyn TimeSource>>,
    /// Index into `sources` of the next attempt; advances on each failure.
    attempt: AtomicUsize,
    timeout: Duration,
    store: StateStore,
    clock: Arc<dyn WallClock>,
}

impl ClockSync {
    pub fn new(
        sources: Vec<Arc<dyn TimeSource>>,
        timeout: Duration,
        store: StateStore,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            sources,
            attempt: AtomicUsize::new(0),
            timeout: timeout.min(Duration::from_millis(MAX_REMOTE_TIMEOUT_MS)),
            store,
            clock,
        }
    }

    /// HTTP sources for every configured URL.
    pub fn from_config(
        config: &ClockConfig,
        client: reqwest::Client,
        store: StateStore,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|url| {
                Arc::new(HttpTimeSource::new(client.clone(), url.clone())) as Arc<dyn TimeSource>
            })
            .collect();
        Self::new(
            sources,
            Duration::from_millis(config.effective_timeout_ms()),
            store,
            clock,
        )
    }

    /// One synchronization attempt. Returns corrected "now" in epoch millis,
    /// or plain local time when the remote could not be used.
    pub async fn sync(&self) -> i64 {
        if self.sources.is_empty() {
            return self.clock.now_millis();
        }

        let index = self.attempt.load(Ordering::Relaxed) % self.sources.len();
        let source = &self.sources[index];

        let sent_at = self.clock.now_millis();
        let result = match tokio::time::timeout(self.timeout, source.fetch_remote_time()).await {
            Ok(r) => r,
            Err(_) => Err(TimeSourceError::Timeout(self.timeout.as_millis() as u64)),
        };
        let received_at = self.clock.now_millis();

        match result {
            Ok(remote) => {
                // The remote stamp was taken roughly halfway through the round trip.
                let local = sent_at + (received_at - sent_at) / 2;
                let offset_ms = remote - local;
                match self.record(offset_ms) {
                    Some(offset) => offset.apply(received_at),
                    None => received_at,
                }
            }
            Err(e) => {
                self.attempt.fetch_add(1, Ordering::Relaxed);
                debug!(source = source.name(), "clock sync failed, using local time: {e}");
                received_at
            }
        }
    }

    /// Persist a significant offset, or clear a stored one the new
    /// measurement shows is no longer needed.
    fn record(&self, offset_ms: i64) -> Option<ClockOffset> {
        let validated_at = DateTime::<Utc>::from_timestamp_millis(self.clock.now_millis())
            .unwrap_or_else(Utc::now);

        match ClockOffset::accept(offset_ms, validated_at) {
            Some(offset) => {
                match self.store.save_clock_offset(&offset) {
                    Ok(()) => info!(offset_ms, "local clock offset stored"),
                    Err(e) => warn!(offset_ms, "could not persist clock offset: {e}"),
                }
                Some(offset)
            }
            None => {
                debug!(offset_ms, "clock offset within noise threshold");
                if let Err(e) = self.store.clear_clock_offset() {
                    warn!("could not clear clock offset: {e}");
                }
                None
            }
        }
    }

    /// Re-sync every `interval` until cancelled.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sync().await;
                }
            }
        }
        debug!("clock sync stopped");
    }
}
