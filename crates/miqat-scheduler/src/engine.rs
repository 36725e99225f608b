use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Timelike, Utc};
use miqat_core::config::BOUNDARY_WINDOW_MS;
use miqat_core::types::{ClockOffset, Occurrence, PrayerName, Schedule};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// The upcoming (or just-reached) event and the distance to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextEvent {
    pub name: PrayerName,
    pub occurrence: Occurrence,
    /// Zero exactly while the event is inside the boundary window.
    pub millis_until: u64,
    /// How far past the event time `now` is; only non-zero when due.
    pub late_by_ms: u64,
}

impl NextEvent {
    pub fn is_due(&self) -> bool {
        self.millis_until == 0
    }

    /// `HH:MM:SS`, rounded up so the display reaches zero at the event.
    pub fn countdown(&self) -> String {
        format_countdown(self.millis_until)
    }
}

pub fn format_countdown(millis: u64) -> String {
    let secs = millis.div_ceil(1000);
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// Picks the next event from a day schedule.
///
/// An entry whose time passed less than `boundary_window` ago is still
/// reported, with `millis_until == 0`, so a poller at coarser cadence than
/// the millisecond clock can observe the exact-time crossing.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleEngine {
    boundary_window_ms: i64,
}

impl Default for ScheduleEngine {
    fn default() -> Self {
        Self::new(Duration::from_millis(BOUNDARY_WINDOW_MS))
    }
}

impl ScheduleEngine {
    pub fn new(boundary_window: Duration) -> Self {
        Self {
            boundary_window_ms: boundary_window.as_millis().min(DAY_MS as u128 / 2) as i64,
        }
    }

    pub fn boundary_window(&self) -> Duration {
        Duration::from_millis(self.boundary_window_ms as u64)
    }

    /// Returns `None` for an empty or incomplete schedule.
    pub fn next_event(&self, schedule: &Schedule, now: NaiveDateTime) -> Option<NextEvent> {
        if !schedule.is_ready() {
            return None;
        }
        let now_ms = millis_since_midnight(now.time());

        // (millis_until, late_by, name, day shift, time) of the best candidate.
        // Strict `<` keeps the first declared name on ties.
        let mut best: Option<(u64, u64, PrayerName, i64, NaiveTime)> = None;

        for (name, time) in schedule.iter() {
            let Some(naive) = NaiveTime::from_hms_opt(time.hour() as u32, time.minute() as u32, 0)
            else {
                continue;
            };
            let delta = time.millis_since_midnight() - now_ms;

            // Yesterday's occurrence can still be inside the window just after midnight.
            for (day_shift, distance) in [(-1, delta - DAY_MS), (0, delta), (1, delta + DAY_MS)] {
                if distance <= -self.boundary_window_ms {
                    continue;
                }
                let key = if distance >= 0 {
                    (distance as u64, 0)
                } else {
                    (0, distance.unsigned_abs())
                };
                if best.map_or(true, |(until, late, ..)| key < (until, late)) {
                    best = Some((key.0, key.1, name, day_shift, naive));
                }
                // Later shifts of the same entry are only further away.
                break;
            }
        }

        let (millis_until, late_by_ms, name, day_shift, time) = best?;
        let date = now.date() + chrono::Duration::days(day_shift);
        Some(NextEvent {
            name,
            occurrence: Occurrence {
                name,
                at: date.and_time(time),
            },
            millis_until,
            late_by_ms,
        })
    }
}

fn millis_since_midnight(t: NaiveTime) -> i64 {
    // Leap-second nanos (>= 1e9) are folded into the last millisecond.
    let sub_ms = (t.nanosecond() / 1_000_000).min(999) as i64;
    t.num_seconds_from_midnight() as i64 * 1000 + sub_ms
}

/// Source of "now" for the schedulers, in epoch millis plus local conversion.
pub trait WallClock: Send + Sync {
    fn now_millis(&self) -> i64;

    /// Convert an epoch instant to the wall-clock time the schedule is written in.
    fn local(&self, epoch_ms: i64) -> Option<NaiveDateTime>;

    /// Local wall-clock time after applying a stored correction.
    fn corrected_local(&self, offset: Option<&ClockOffset>) -> Option<NaiveDateTime> {
        let now = self.now_millis();
        self.local(offset.map_or(now, |o| o.apply(now)))
    }
}

/// Host clock in the host's local timezone.
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn local(&self, epoch_ms: i64) -> Option<NaiveDateTime> {
        DateTime::<Utc>::from_timestamp_millis(epoch_ms)
            .map(|utc| utc.with_timezone(&Local).naive_local())
    }
}

/// Settable clock that treats UTC as local time. Used to replay scenarios.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn at(local: NaiveDateTime) -> Self {
        Self {
            now_ms: AtomicI64::new(local.and_utc().timestamp_millis()),
        }
    }

    pub fn set(&self, local: NaiveDateTime) {
        self.now_ms
            .store(local.and_utc().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl WallClock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn local(&self, epoch_ms: i64) -> Option<NaiveDateTime> {
        DateTime::<Utc>::from_timestamp_millis(epoch_ms).map(|utc| utc.naive_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use miqat_core::types::{Adjustment, TimeOfDay};

    fn t(h: u8, m: u8) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    /// Fajr is published as 05:00 and shifted to 05:30 before use.
    fn scenario_schedule() -> Schedule {
        Schedule::new()
            .with(PrayerName::Fajr, t(5, 0))
            .with(PrayerName::Sunrise, t(6, 45))
            .with(PrayerName::Dhuhr, t(12, 10))
            .with(PrayerName::Asr, t(15, 40))
            .with(PrayerName::Maghrib, t(18, 20))
            .with(PrayerName::Isha, t(19, 50))
            .adjusted(Adjustment::FAJR_FROM_IMSAK)
    }

    #[test]
    fn one_second_before_maghrib() {
        let next = ScheduleEngine::default()
            .next_event(&scenario_schedule(), at(18, 19, 59))
            .unwrap();
        assert_eq!(next.name, PrayerName::Maghrib);
        assert_eq!(next.millis_until, 1000);
        assert_eq!(next.countdown(), "00:00:01");
    }

    #[test]
    fn exact_event_time_is_due() {
        let next = ScheduleEngine::default()
            .next_event(&scenario_schedule(), at(19, 50, 0))
            .unwrap();
        assert_eq!(next.name, PrayerName::Isha);
        assert!(next.is_due());
        assert_eq!(next.late_by_ms, 0);
        assert_eq!(next.occurrence.at, at(19, 50, 0));
    }

    #[test]
    fn one_second_past_rolls_over() {
        let next = ScheduleEngine::default()
            .next_event(&scenario_schedule(), at(12, 10, 1))
            .unwrap();
        assert_eq!(next.name, PrayerName::Asr);
    }

    #[test]
    fn sub_second_lateness_stays_due() {
        let now = at(12, 10, 0) + chrono::Duration::milliseconds(400);
        let next = ScheduleEngine::default()
            .next_event(&scenario_schedule(), now)
            .unwrap();
        assert_eq!(next.name, PrayerName::Dhuhr);
        assert!(next.is_due());
        assert_eq!(next.late_by_ms, 400);
    }

    #[test]
    fn wraps_to_tomorrows_fajr_after_isha() {
        let now = NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        let next = ScheduleEngine::default()
            .next_event(&scenario_schedule(), now)
            .unwrap();
        assert_eq!(next.name, PrayerName::Fajr);
        let expected = (5 * 60 + 30 + 24 * 60 - (23 * 60 + 59)) as u64 * 60_000;
        assert_eq!(next.millis_until, expected);
        assert_eq!(
            next.occurrence.at,
            NaiveDate::from_ymd_opt(2026, 3, 15)
                .unwrap()
                .and_hms_opt(5, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn incomplete_schedule_has_no_next_event() {
        let engine = ScheduleEngine::default();
        assert!(engine.next_event(&Schedule::new(), at(12, 0, 0)).is_none());
        let partial = Schedule::new().with(PrayerName::Dhuhr, t(12, 10));
        assert!(engine.next_event(&partial, at(12, 0, 0)).is_none());
    }

    #[test]
    fn identical_times_resolve_in_declared_order() {
        let schedule = scenario_schedule().with(PrayerName::Asr, t(12, 10));
        let next = ScheduleEngine::default()
            .next_event(&schedule, at(11, 0, 0))
            .unwrap();
        assert_eq!(next.name, PrayerName::Dhuhr);
    }

    #[test]
    fn result_is_minimal_non_negative_distance() {
        let engine = ScheduleEngine::default();
        let schedule = scenario_schedule();
        for minute in (0..24 * 60).step_by(7) {
            let now = at(0, 0, 0) + chrono::Duration::minutes(minute) + chrono::Duration::seconds(13);
            let next = engine.next_event(&schedule, now).unwrap();
            let now_ms = millis_since_midnight(now.time());
            let min = schedule
                .iter()
                .map(|(_, tod)| (tod.millis_since_midnight() - now_ms).rem_euclid(DAY_MS) as u64)
                .min()
                .unwrap();
            assert_eq!(next.millis_until, min, "at {now}");
        }
    }

    #[test]
    fn wide_window_catches_up_across_midnight() {
        let schedule = scenario_schedule().with(PrayerName::Isha, t(23, 59));
        let engine = ScheduleEngine::new(Duration::from_secs(120));
        let now = NaiveDate::from_ymd_opt(2026, 3, 15)
            .unwrap()
            .and_hms_opt(0, 0, 30)
            .unwrap();
        let next = engine.next_event(&schedule, now).unwrap();
        assert_eq!(next.name, PrayerName::Isha);
        assert!(next.is_due());
        assert_eq!(next.late_by_ms, 90_000);
        assert_eq!(next.occurrence.at.date(), NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
    }

    #[test]
    fn countdown_formatting() {
        assert_eq!(format_countdown(0), "00:00:00");
        assert_eq!(format_countdown(1), "00:00:01");
        assert_eq!(format_countdown(3_723_000), "01:02:03");
    }

    #[test]
    fn manual_clock_applies_offset() {
        let clock = ManualClock::at(at(10, 0, 0));
        let offset = ClockOffset::accept(5_000, Utc::now()).unwrap();
        assert_eq!(clock.corrected_local(Some(&offset)), Some(at(10, 0, 5)));
        clock.advance(Duration::from_secs(60));
        assert_eq!(clock.corrected_local(None), Some(at(10, 1, 0)));
    }
}
