//! `miqat-sync`: the network edge: remote clock offset and schedule fetching.
//!
//! | Module      | Role                                                   |
//! |-------------|--------------------------------------------------------|
//! | `clock`     | [`clock::ClockSync`] over one or more [`clock::TimeSource`]s |
//! | `provider`  | [`provider::PrayerTimeProvider`] boundary              |
//! | `onehadith` | Primary provider (country timetable, Fajr from imsak)  |
//! | `aladhan`   | Fallback provider (monthly calendar by city)           |
//! | `router`    | Priority fallback chain with retries                   |
//! | `refresh`   | [`refresh::ScheduleRefresher`]: staleness + refetch    |

pub mod aladhan;
pub mod clock;
pub mod error;
pub mod onehadith;
pub mod provider;
pub mod refresh;
pub mod router;

use std::time::Duration;

use miqat_core::config::ProvidersConfig;

pub use aladhan::AladhanProvider;
pub use clock::{ClockSync, HttpTimeSource, TimeSource, TimeSourceError};
pub use error::{Result, SyncError};
pub use onehadith::OneHadithProvider;
pub use provider::{PrayerTimeProvider, ProviderError};
pub use refresh::{RefreshOutcome, ScheduleRefresher, Staleness};
pub use router::{Fetched, ProviderRouter, ProviderSlot};

/// Network retries per provider before falling through to the next one.
const PROVIDER_RETRIES: u32 = 1;

/// OneHadith first, Aladhan as fallback.
pub fn default_router(config: &ProvidersConfig, client: &reqwest::Client) -> ProviderRouter {
    ProviderRouter::new(vec![
        ProviderSlot::new(
            Box::new(OneHadithProvider::new(client.clone(), config.onehadith_url.clone())),
            PROVIDER_RETRIES,
        ),
        ProviderSlot::new(
            Box::new(AladhanProvider::new(
                client.clone(),
                config.aladhan_url.clone(),
                config.aladhan_method,
            )),
            PROVIDER_RETRIES,
        ),
    ])
}

/// Shared HTTP client with the configured request timeout.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("falling back to default HTTP client: {e}");
            reqwest::Client::new()
        })
}
