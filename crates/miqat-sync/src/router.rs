use std::time::Duration;

use chrono::NaiveDate;
use miqat_core::types::{Location, Schedule};
use tracing::{info, warn};

use crate::provider::{PrayerTimeProvider, ProviderError};

/// One provider in the fallback chain.
pub struct ProviderSlot {
    pub provider: Box<dyn PrayerTimeProvider>,
    /// Extra attempts on network failure before moving to the next provider.
    pub max_retries: u32,
}

impl ProviderSlot {
    pub fn new(provider: Box<dyn PrayerTimeProvider>, max_retries: u32) -> Self {
        Self {
            provider,
            max_retries,
        }
    }
}

/// A usable schedule and the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    pub schedule: Schedule,
    pub provider: String,
}

/// Tries providers in priority order until one yields a complete schedule.
///
/// Network errors are retried on the same provider with a short back-off.
/// Malformed or missing data skips straight to the next provider.
pub struct ProviderRouter {
    slots: Vec<ProviderSlot>,
}

impl ProviderRouter {
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        Self { slots }
    }

    pub async fn fetch(&self, location: &Location, date: NaiveDate) -> Result<Fetched, ProviderError> {
        let mut last_err: Option<ProviderError> = None;

        for slot in &self.slots {
            let provider_name = slot.provider.name();

            for attempt in 0..=slot.max_retries {
                let result = slot
                    .provider
                    .fetch_schedule(location, date)
                    .await
                    .and_then(|schedule| finish(slot.provider.as_ref(), schedule));

                match result {
                    Ok(schedule) => {
                        if attempt > 0 {
                            info!(provider = %provider_name, attempt, "fetch succeeded after retry");
                        }
                        return Ok(Fetched {
                            schedule,
                            provider: provider_name.to_string(),
                        });
                    }
                    Err(e) => {
                        warn!(provider = %provider_name, attempt, err = %e, "schedule fetch failed");
                        let retriable = e.is_retriable();
                        last_err = Some(e);

                        if !retriable {
                            break;
                        }
                        if attempt < slot.max_retries {
                            tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1)))
                                .await;
                        }
                    }
                }
            }

            info!(provider = %provider_name, "provider exhausted, trying next provider");
        }

        Err(last_err.unwrap_or_else(|| ProviderError::Network("no providers configured".to_string())))
    }
}

/// Apply the provider's adjustment and reject partial schedules.
fn finish(provider: &dyn PrayerTimeProvider, schedule: Schedule) -> Result<Schedule, ProviderError> {
    let schedule = match provider.adjustment() {
        Some(adjustment) => schedule.adjusted(adjustment),
        None => schedule,
    };
    if !schedule.is_ready() {
        return Err(ProviderError::Malformed(format!(
            "{} returned {} of 6 prayers",
            provider.name(),
            schedule.len()
        )));
    }
    Ok(schedule)
}
