use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use miqat_core::config::SCHEDULE_REFRESH_SECS;
use miqat_core::types::{Location, StateKey};
use miqat_scheduler::{ContextLink, StateStore, WallClock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::router::{Fetched, ProviderRouter};

/// Why the stored schedule needs replacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    NoSchedule,
    /// Never stamped, or the location changed since.
    Unstamped,
    Expired,
    /// Fetched for an earlier local date.
    DateRolled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Fresh,
    Refreshed(Fetched),
}

/// Keeps the stored schedule current for the selected location.
pub struct ScheduleRefresher {
    router: ProviderRouter,
    store: StateStore,
    clock: Arc<dyn WallClock>,
    default_location: Location,
    max_age: chrono::Duration,
    push: Option<ContextLink>,
}

impl ScheduleRefresher {
    pub fn new(
        router: ProviderRouter,
        store: StateStore,
        clock: Arc<dyn WallClock>,
        default_location: Location,
    ) -> Self {
        Self {
            router,
            store,
            clock,
            default_location,
            max_age: chrono::Duration::seconds(SCHEDULE_REFRESH_SECS as i64),
            push: None,
        }
    }

    /// Also push every new schedule to another context as `STORE_DATA`.
    pub fn with_push(mut self, link: ContextLink) -> Self {
        self.push = Some(link);
        self
    }

    /// The location chosen by the user, else the configured one.
    pub fn location(&self) -> Result<Location> {
        Ok(self
            .store
            .location()?
            .unwrap_or_else(|| self.default_location.clone()))
    }

    /// Corrected "now" as a UTC instant and as a local date.
    fn now(&self) -> Result<(DateTime<Utc>, NaiveDate)> {
        let offset = self.store.clock_offset()?;
        let now_ms = self.clock.now_millis();
        let corrected = offset.map_or(now_ms, |o| o.apply(now_ms));
        let utc = DateTime::<Utc>::from_timestamp_millis(corrected).ok_or(SyncError::ClockRange)?;
        let local = self.clock.local(corrected).ok_or(SyncError::ClockRange)?;
        Ok((utc, local.date()))
    }

    pub fn staleness(&self, now: DateTime<Utc>, today: NaiveDate) -> Result<Option<Staleness>> {
        if self.store.schedule()?.is_none() {
            return Ok(Some(Staleness::NoSchedule));
        }
        let Some(last) = self.store.last_updated()? else {
            return Ok(Some(Staleness::Unstamped));
        };
        if now - last >= self.max_age {
            return Ok(Some(Staleness::Expired));
        }
        let fetched_for = self.clock.local(last.timestamp_millis()).map(|dt| dt.date());
        if fetched_for != Some(today) {
            return Ok(Some(Staleness::DateRolled));
        }
        Ok(None)
    }

    pub async fn refresh_if_stale(&self) -> Result<RefreshOutcome> {
        let (now, today) = self.now()?;
        match self.staleness(now, today)? {
            None => Ok(RefreshOutcome::Fresh),
            Some(reason) => {
                debug!(?reason, "stored schedule is stale");
                Ok(RefreshOutcome::Refreshed(self.refresh().await?))
            }
        }
    }

    /// Fetch today's schedule and replace the stored one. On failure the
    /// stored schedule is left as it was.
    pub async fn refresh(&self) -> Result<Fetched> {
        let (now, today) = self.now()?;
        let location = self.location()?;
        let fetched = self.router.fetch(&location, today).await?;

        self.store.save_schedule(&fetched.schedule, &location, now)?;
        info!(provider = %fetched.provider, %location, date = %today, "schedule refreshed");

        if let Some(ref link) = self.push {
            match serde_json::to_string(&fetched.schedule) {
                Ok(json) => {
                    link.store_data(StateKey::Schedule, json);
                }
                Err(e) => warn!("could not encode schedule for push: {e}"),
            }
        }
        Ok(fetched)
    }

    /// Check staleness every `every` until cancelled.
    pub async fn run(&self, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_if_stale().await {
                        warn!("schedule refresh failed, retrying at next check: {e}");
                    }
                }
            }
        }
        debug!("schedule refresher stopped");
    }
}
