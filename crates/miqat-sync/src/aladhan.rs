use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use miqat_core::types::{Location, PrayerName, Schedule};
use serde::Deserialize;
use tracing::debug;

use crate::provider::{get_text, parse_time, PrayerTimeProvider, ProviderError};

/// Monthly calendar by city. Times come suffixed with a zone, e.g. `"04:35 (CET)"`.
pub struct AladhanProvider {
    client: reqwest::Client,
    base_url: String,
    method: u8,
}

impl AladhanProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, method: u8) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            method,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CalendarResponse {
    data: Vec<CalendarDay>,
}

#[derive(Debug, Deserialize)]
struct CalendarDay {
    timings: Timings,
    date: DateInfo,
}

#[derive(Debug, Deserialize)]
struct DateInfo {
    gregorian: Gregorian,
}

#[derive(Debug, Deserialize)]
struct Gregorian {
    /// Zero-padded day of month, e.g. `"07"`.
    day: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Timings {
    fajr: String,
    sunrise: String,
    dhuhr: String,
    asr: String,
    maghrib: String,
    isha: String,
}

fn parse_day(body: &str, location: &Location, date: NaiveDate) -> Result<Schedule, ProviderError> {
    let resp: CalendarResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Malformed(e.to_string()))?;

    let day = resp
        .data
        .into_iter()
        .find(|d| d.date.gregorian.day.trim().parse::<u32>().ok() == Some(date.day()))
        .ok_or_else(|| ProviderError::NotFound {
            location: location.to_string(),
            date,
        })?;

    let t = day.timings;
    Ok(Schedule::new()
        .with(PrayerName::Fajr, parse_time("Fajr", &t.fajr)?)
        .with(PrayerName::Sunrise, parse_time("Sunrise", &t.sunrise)?)
        .with(PrayerName::Dhuhr, parse_time("Dhuhr", &t.dhuhr)?)
        .with(PrayerName::Asr, parse_time("Asr", &t.asr)?)
        .with(PrayerName::Maghrib, parse_time("Maghrib", &t.maghrib)?)
        .with(PrayerName::Isha, parse_time("Isha", &t.isha)?))
}

#[async_trait]
impl PrayerTimeProvider for AladhanProvider {
    fn name(&self) -> &str {
        "aladhan"
    }

    async fn fetch_schedule(
        &self,
        location: &Location,
        date: NaiveDate,
    ) -> Result<Schedule, ProviderError> {
        let url = format!(
            "{}/calendarByCity/{}/{}",
            self.base_url.trim_end_matches('/'),
            date.year(),
            date.month()
        );
        let params = [
            ("city", location.city.clone()),
            ("country", location.country_name().to_string()),
            ("method", self.method.to_string()),
            ("adjustment", "1".to_string()),
        ];

        debug!(%location, %date, "requesting aladhan calendar");
        let body = get_text(&self.client, &url, &params, self.name()).await?;
        parse_day(&body, location, date)
    }
}
