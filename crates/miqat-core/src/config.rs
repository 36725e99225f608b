use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::Location;

pub const SCHEDULE_REFRESH_SECS: u64 = 6 * 60 * 60; // refetch every 6 hours
pub const SCHEDULE_CHECK_SECS: u64 = 60;
pub const CLOCK_NOISE_THRESHOLD_MS: u64 = 1_000; // smaller deltas are discarded
pub const MAX_CLOCK_SYNC_INTERVAL_SECS: u64 = 30 * 60;
pub const DEFAULT_CLOCK_SYNC_INTERVAL_SECS: u64 = 5 * 60;
pub const MAX_REMOTE_TIMEOUT_MS: u64 = 5_000;
pub const REMINDER_MIN_MINUTES: u32 = 1;
pub const REMINDER_MAX_MINUTES: u32 = 30;
pub const FOREGROUND_POLL_MS: u64 = 1_000;
pub const BOUNDARY_WINDOW_MS: u64 = 1_000; // the whole second of the event counts as "now"
pub const BACKGROUND_RECHECK_SECS: u64 = 60;
pub const BACKGROUND_CATCH_UP_SECS: u64 = 60;
pub const FOREGROUND_WAIT_MS: u64 = 1_000;

/// Host notification tags; one live notification per tag.
pub const ADHAN_TAG: &str = "prayer-time";
pub const REMINDER_TAG: &str = "prayer-reminder";

/// Top-level config (miqat.toml + MIQAT_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiqatConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub location: LocationConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub foreground: ForegroundConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Location used until the user picks one (stored under `location`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_city")]
    pub city: String,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            country: default_country(),
            city: default_city(),
        }
    }
}

impl LocationConfig {
    pub fn to_location(&self) -> Location {
        Location::new(self.country.clone(), self.city.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Remote time endpoints, tried round-robin on consecutive failures.
    #[serde(default = "default_time_sources")]
    pub sources: Vec<String>,
    /// Per-request budget. Values above 5 s are capped.
    #[serde(default = "default_remote_timeout_ms")]
    pub timeout_ms: u64,
    /// Re-sync cadence. Values above 30 minutes are capped.
    #[serde(default = "default_clock_sync_interval")]
    pub sync_interval_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sources: default_time_sources(),
            timeout_ms: default_remote_timeout_ms(),
            sync_interval_secs: default_clock_sync_interval(),
        }
    }
}

impl ClockConfig {
    pub fn effective_timeout_ms(&self) -> u64 {
        self.timeout_ms.min(MAX_REMOTE_TIMEOUT_MS)
    }

    pub fn effective_sync_interval_secs(&self) -> u64 {
        self.sync_interval_secs.clamp(1, MAX_CLOCK_SYNC_INTERVAL_SECS)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_onehadith_url")]
    pub onehadith_url: String,
    #[serde(default = "default_aladhan_url")]
    pub aladhan_url: String,
    /// Calculation method passed to Aladhan (4 = Umm al-Qura).
    #[serde(default = "default_aladhan_method")]
    pub aladhan_method: u8,
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            onehadith_url: default_onehadith_url(),
            aladhan_url: default_aladhan_url(),
            aladhan_method: default_aladhan_method(),
            timeout_ms: default_provider_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForegroundConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_boundary_window_ms")]
    pub boundary_window_ms: u64,
}

impl Default for ForegroundConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            boundary_window_ms: default_boundary_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundConfig {
    /// Fallback fixed-interval re-check while the process is alive.
    #[serde(default = "default_recheck_interval")]
    pub recheck_interval_secs: u64,
    /// How long after an event a coarse wake may still deliver its adhan.
    #[serde(default = "default_catch_up_secs")]
    pub catch_up_secs: u64,
    /// Bounded wait for a foreground context to answer GET_DATA.
    #[serde(default = "default_foreground_wait_ms")]
    pub foreground_wait_ms: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            recheck_interval_secs: default_recheck_interval(),
            catch_up_secs: default_catch_up_secs(),
            foreground_wait_ms: default_foreground_wait_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsConfig {
    /// Desktop notifier binary; invoked as `<cmd> <title> <body>`.
    #[serde(default = "default_notify_command")]
    pub notify_command: Option<String>,
    /// Audio player binary; invoked as `<cmd> <file>`. Audio is off when unset.
    #[serde(default)]
    pub audio_command: Option<String>,
    /// Adhan recordings, used in rotation.
    #[serde(default)]
    pub adhan_files: Vec<String>,
    /// Default for the `audioEnabled` toggle until the user flips it.
    #[serde(default = "bool_true")]
    pub audio_enabled: bool,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            notify_command: default_notify_command(),
            audio_command: None,
            adhan_files: Vec::new(),
            audio_enabled: true,
        }
    }
}

fn bool_true() -> bool {
    true
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.miqat/miqat.db", home)
}
fn default_country() -> String {
    "XK".to_string()
}
fn default_city() -> String {
    "Pristina".to_string()
}
fn default_time_sources() -> Vec<String> {
    vec![
        "https://worldtimeapi.org/api/ip".to_string(),
        "https://worldtimeapi.org/api/timezone/Etc/UTC".to_string(),
    ]
}
fn default_remote_timeout_ms() -> u64 {
    MAX_REMOTE_TIMEOUT_MS
}
fn default_clock_sync_interval() -> u64 {
    DEFAULT_CLOCK_SYNC_INTERVAL_SECS
}
fn default_onehadith_url() -> String {
    "https://onehadith.org/api/random".to_string()
}
fn default_aladhan_url() -> String {
    "https://api.aladhan.com/v1".to_string()
}
fn default_aladhan_method() -> u8 {
    4
}
fn default_provider_timeout_ms() -> u64 {
    10_000
}
fn default_poll_interval_ms() -> u64 {
    FOREGROUND_POLL_MS
}
fn default_boundary_window_ms() -> u64 {
    BOUNDARY_WINDOW_MS
}
fn default_recheck_interval() -> u64 {
    BACKGROUND_RECHECK_SECS
}
fn default_catch_up_secs() -> u64 {
    BACKGROUND_CATCH_UP_SECS
}
fn default_foreground_wait_ms() -> u64 {
    FOREGROUND_WAIT_MS
}
fn default_notify_command() -> Option<String> {
    Some("notify-send".to_string())
}

impl MiqatConfig {
    /// Load config from a TOML file with MIQAT_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g. `MIQAT_LOCATION__CITY=Prizren`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: MiqatConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MIQAT_").split("__"))
            .extract()
            .map_err(|e| crate::error::MiqatError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.miqat/miqat.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = MiqatConfig::load(Some("/nonexistent/miqat.toml")).unwrap();
        assert_eq!(config.location.country, "XK");
        assert_eq!(config.foreground.poll_interval_ms, 1_000);
        assert_eq!(config.background.foreground_wait_ms, 1_000);
        assert_eq!(config.clock.sources.len(), 2);
    }

    #[test]
    fn toml_sections_override_defaults() {
        let config: MiqatConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [location]
                country = "AL"
                city = "Tirana"

                [clock]
                timeout_ms = 30000
                sync_interval_secs = 7200
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.location.to_location().city, "Tirana");
        assert_eq!(config.clock.effective_timeout_ms(), MAX_REMOTE_TIMEOUT_MS);
        assert_eq!(
            config.clock.effective_sync_interval_secs(),
            MAX_CLOCK_SYNC_INTERVAL_SECS
        );
        assert_eq!(config.background.recheck_interval_secs, 60);
    }
}
