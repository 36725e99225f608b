use async_trait::async_trait;
use chrono::NaiveDate;
use miqat_core::types::{Adjustment, Location, PrayerName, Schedule};
use serde::Deserialize;
use tracing::debug;

use crate::provider::{get_text, parse_time, PrayerTimeProvider, ProviderError};

/// Country-level daily timetable. Publishes `imsak` rather than Fajr; the
/// Fajr time is derived from it by [`Adjustment::FAJR_FROM_IMSAK`].
pub struct OneHadithProvider {
    client: reqwest::Client,
    url: String,
}

impl OneHadithProvider {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    timings: Timings,
}

#[derive(Debug, Deserialize)]
struct Timings {
    imsak: String,
    #[serde(default)]
    sunrise: Option<String>,
    dhuhr: String,
    asr: String,
    maghrib: String,
    isha: String,
}

const DEFAULT_SUNRISE: &str = "06:00";

fn parse_schedule(body: &str) -> Result<Schedule, ProviderError> {
    let resp: ApiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;
    let t = resp.timings;
    let sunrise = t.sunrise.as_deref().unwrap_or(DEFAULT_SUNRISE);

    Ok(Schedule::new()
        .with(PrayerName::Fajr, parse_time("imsak", &t.imsak)?)
        .with(PrayerName::Sunrise, parse_time("sunrise", sunrise)?)
        .with(PrayerName::Dhuhr, parse_time("dhuhr", &t.dhuhr)?)
        .with(PrayerName::Asr, parse_time("asr", &t.asr)?)
        .with(PrayerName::Maghrib, parse_time("maghrib", &t.maghrib)?)
        .with(PrayerName::Isha, parse_time("isha", &t.isha)?))
}

#[async_trait]
impl PrayerTimeProvider for OneHadithProvider {
    fn name(&self) -> &str {
        "onehadith"
    }

    async fn fetch_schedule(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Schedule, ProviderError> {
        // Midday avoids landing on the neighbouring day in any timezone.
        let timestamp = date
            .and_hms_opt(12, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();

        debug!(country = %location.country, %date, "requesting onehadith timetable");
        let params = [
            ("lan", "al".to_string()),
            ("country", location.country.clone()),
            ("timestamp", timestamp.to_string()),
        ];
        let body = get_text(&self.client, &self.url, &params, self.name()).await?;
        parse_schedule(&body)
    }

    fn adjustment(&self) -> Option<Adjustment> {
        Some(Adjustment::FAJR_FROM_IMSAK)
    }
}
