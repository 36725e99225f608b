use async_trait::async_trait;
use chrono::NaiveDate;
use miqat_core::types::{Adjustment, Location, Schedule, TimeOfDay};

/// Common interface for upstream prayer-time sources.
#[async_trait]
pub trait PrayerTimeProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Fetch the day schedule for `location` on `date`, as published.
    async fn fetch_schedule(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Schedule, ProviderError>;

    /// Shift to apply to the published schedule before use.
    fn adjustment(&self) -> Option<Adjustment> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no schedule for {location} on {date}")]
    NotFound { location: String, date: NaiveDate },

    #[error("provider unreachable: {0}")]
    Network(String),

    #[error("malformed schedule: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Network problems may clear up on retry; bad data will not.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProviderError::Network(_))
    }
}

/// Parse a published time such as `"04:35"` or `"04:35 (CET)"`.
pub(crate) fn parse_time(field: &str, raw: &str) -> Result<TimeOfDay, ProviderError> {
    let clock = raw.split_whitespace().next().unwrap_or_default();
    clock
        .parse()
        .map_err(|e| ProviderError::Malformed(format!("{field}: {e}")))
}

/// GET `base` with `params` and return the body, mapping transport failures
/// to `Network`.
pub(crate) async fn get_text(
    client: &reqwest::Client,
    base: &str,
    params: &[(&str, String)],
    provider: &str,
) -> Result<String, ProviderError> {
    let url = reqwest::Url::parse_with_params(base, params)
        .map_err(|e| ProviderError::Network(format!("{provider}: bad url {base}: {e}")))?;
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| ProviderError::Network(format!("{provider}: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(ProviderError::Network(format!("{provider}: HTTP {status}")));
    }
    resp.text()
        .await
        .map_err(|e| ProviderError::Network(format!("{provider}: {e}")))
}
