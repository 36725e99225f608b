use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{CLOCK_NOISE_THRESHOLD_MS, REMINDER_MAX_MINUTES, REMINDER_MIN_MINUTES};

const MINUTES_PER_DAY: i32 = 24 * 60;

/// The six daily markers, in their declared order.
///
/// `Ord` follows declaration order, which is also the tie-break order when two
/// entries share a time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PrayerName {
    Fajr,
    Sunrise,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl PrayerName {
    pub const ALL: [PrayerName; 6] = [
        PrayerName::Fajr,
        PrayerName::Sunrise,
        PrayerName::Dhuhr,
        PrayerName::Asr,
        PrayerName::Maghrib,
        PrayerName::Isha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PrayerName::Fajr => "Fajr",
            PrayerName::Sunrise => "Sunrise",
            PrayerName::Dhuhr => "Dhuhr",
            PrayerName::Asr => "Asr",
            PrayerName::Maghrib => "Maghrib",
            PrayerName::Isha => "Isha",
        }
    }
}

impl fmt::Display for PrayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrayerName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrayerName::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown prayer name: {s}"))
    }
}

impl TryFrom<String> for PrayerName {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PrayerName> for String {
    fn from(p: PrayerName) -> Self {
        p.as_str().to_string()
    }
}

/// Wall-clock time of day at minute resolution, serialised as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    pub fn millis_since_midnight(&self) -> i64 {
        (self.hour as i64 * 60 + self.minute as i64) * 60_000
    }

    /// Shift by `minutes`, wrapping around midnight.
    pub fn shifted(&self, minutes: i32) -> Self {
        let total = (self.hour as i32 * 60 + self.minute as i32 + minutes).rem_euclid(MINUTES_PER_DAY);
        Self {
            hour: (total / 60) as u8,
            minute: (total % 60) as u8,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got {s:?}"))?;
        let hour: u8 = h.parse().map_err(|_| format!("bad hour in {s:?}"))?;
        let minute: u8 = m.parse().map_err(|_| format!("bad minute in {s:?}"))?;
        TimeOfDay::new(hour, minute).ok_or_else(|| format!("time out of range: {s:?}"))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Today's prayer times. Replaced wholesale on every successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    times: BTreeMap<PrayerName, TimeOfDay>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: PrayerName, time: TimeOfDay) {
        self.times.insert(name, time);
    }

    pub fn with(mut self, name: PrayerName, time: TimeOfDay) -> Self {
        self.insert(name, time);
        self
    }

    pub fn get(&self, name: PrayerName) -> Option<TimeOfDay> {
        self.times.get(&name).copied()
    }

    /// Entries in declared name order.
    pub fn iter(&self) -> impl Iterator<Item = (PrayerName, TimeOfDay)> + '_ {
        self.times.iter().map(|(n, t)| (*n, *t))
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// True once all six markers are present.
    pub fn is_ready(&self) -> bool {
        PrayerName::ALL.iter().all(|p| self.times.contains_key(p))
    }

    pub fn adjusted(mut self, adjustment: Adjustment) -> Self {
        if let Some(t) = self.times.get_mut(&adjustment.prayer) {
            *t = t.shifted(adjustment.minutes);
        }
        self
    }
}

/// Fixed post-fetch shift applied to exactly one named entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub prayer: PrayerName,
    pub minutes: i32,
}

impl Adjustment {
    /// Imsak is published in place of Fajr; Fajr itself is 30 minutes later.
    pub const FAJR_FROM_IMSAK: Adjustment = Adjustment {
        prayer: PrayerName::Fajr,
        minutes: 30,
    };
}

/// User reminder preference, owned by the settings collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderConfig {
    pub enabled: bool,
    pub minutes_before: u32,
}

impl ReminderConfig {
    pub fn new(enabled: bool, minutes_before: u32) -> Self {
        Self {
            enabled,
            minutes_before,
        }
        .clamped()
    }

    /// Force `minutes_before` into the supported range.
    pub fn clamped(self) -> Self {
        Self {
            enabled: self.enabled,
            minutes_before: self
                .minutes_before
                .clamp(REMINDER_MIN_MINUTES, REMINDER_MAX_MINUTES),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.minutes_before as u64 * 60_000
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            minutes_before: 5,
        }
    }
}

/// Accepted correction between a trusted remote clock and the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockOffset {
    /// `server - local`, in milliseconds.
    pub offset_ms: i64,
    pub validated_at: DateTime<Utc>,
}

impl ClockOffset {
    /// Returns `None` when the delta is within the noise threshold.
    pub fn accept(offset_ms: i64, validated_at: DateTime<Utc>) -> Option<Self> {
        Self::is_significant(offset_ms).then_some(Self {
            offset_ms,
            validated_at,
        })
    }

    pub fn is_significant(offset_ms: i64) -> bool {
        offset_ms.unsigned_abs() > CLOCK_NOISE_THRESHOLD_MS
    }

    pub fn apply(&self, local_ms: i64) -> i64 {
        local_ms + self.offset_ms
    }
}

/// Identity of one concrete occurrence of a daily marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Occurrence {
    pub name: PrayerName,
    pub at: NaiveDateTime,
}

impl Occurrence {
    /// Same prayer on the same day, whatever its exact time. A refetched
    /// timetable shifting an entry by a minute keeps its slot.
    pub fn same_slot(&self, other: &Occurrence) -> bool {
        self.name == other.name && self.at.date() == other.at.date()
    }
}

impl Ord for Occurrence {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then(self.name.cmp(&other.name))
    }
}

impl PartialOrd for Occurrence {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Occurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.at.format("%Y-%m-%dT%H:%M"))
    }
}

/// Which alerts have already gone out for the current next-event occurrence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub occurrence: Option<Occurrence>,
    #[serde(default)]
    pub adhan_sent: bool,
    #[serde(default)]
    pub reminder_sent: bool,
    /// Latest occurrence whose adhan went out, from either context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_adhan: Option<Occurrence>,
}

impl DispatchRecord {
    /// Move on to `occurrence` with both flags cleared.
    pub fn rolled_to(&self, occurrence: Occurrence) -> Self {
        Self {
            occurrence: Some(occurrence),
            adhan_sent: false,
            reminder_sent: false,
            last_adhan: self.last_adhan,
        }
    }

    /// Whether the adhan for `occurrence` (or a later one) already went out.
    pub fn adhan_delivered(&self, occurrence: &Occurrence) -> bool {
        self.last_adhan.is_some_and(|last| last >= *occurrence)
    }
}

/// A country/city pair as understood by the providers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
}

impl Location {
    pub fn new(country: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            country: country.into(),
            city: city.into(),
        }
    }

    /// Full country name for providers that want it spelled out.
    pub fn country_name(&self) -> &str {
        KNOWN_COUNTRIES
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(&self.country))
            .map(|c| c.name)
            .unwrap_or(&self.country)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.country, self.city)
    }
}

pub struct KnownCountry {
    pub code: &'static str,
    pub name: &'static str,
    pub cities: &'static [&'static str],
}

pub const KNOWN_COUNTRIES: &[KnownCountry] = &[
    KnownCountry {
        code: "XK",
        name: "Kosovo",
        cities: &["Pristina", "Prizren", "Peja", "Gjakova", "Ferizaj"],
    },
    KnownCountry {
        code: "AL",
        name: "Albania",
        cities: &["Tirana", "Durres", "Vlore", "Shkoder", "Elbasan"],
    },
    KnownCountry {
        code: "MK",
        name: "North Macedonia",
        cities: &["Skopje", "Bitola", "Kumanovo", "Tetovo", "Ohrid"],
    },
];

/// Keys of the durable state shared by both scheduler contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StateKey {
    Schedule,
    ReminderSettings,
    TimeDiff,
    DispatchState,
    LastUpdated,
    Location,
    AudioEnabled,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Schedule => "schedule",
            StateKey::ReminderSettings => "reminderSettings",
            StateKey::TimeDiff => "timeDiff",
            StateKey::DispatchState => "dispatchState",
            StateKey::LastUpdated => "lastUpdated",
            StateKey::Location => "location",
            StateKey::AudioEnabled => "audioEnabled",
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StateKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(StateKey::Schedule),
            "reminderSettings" => Ok(StateKey::ReminderSettings),
            "timeDiff" => Ok(StateKey::TimeDiff),
            "dispatchState" => Ok(StateKey::DispatchState),
            "lastUpdated" => Ok(StateKey::LastUpdated),
            "location" => Ok(StateKey::Location),
            "audioEnabled" => Ok(StateKey::AudioEnabled),
            other => Err(format!("unknown state key: {other}")),
        }
    }
}

impl TryFrom<String> for StateKey {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StateKey> for String {
    fn from(k: StateKey) -> Self {
        k.as_str().to_string()
    }
}
