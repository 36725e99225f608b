use miqat_core::types::ReminderConfig;
use tracing::{debug, info, warn};

use crate::{
    alerts::Alerter,
    dispatch::{evaluate, minutes_left},
    engine::{NextEvent, ScheduleEngine, WallClock},
    error::{Result, SchedulerError},
    store::{Snapshot, StateStore},
};

/// Result of one engine + dispatcher pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No usable schedule is stored yet.
    NoSchedule,
    /// Nothing to send right now.
    Idle(NextEvent),
    /// The other context updated the dispatch record first; nothing was sent.
    Superseded(NextEvent),
    /// At least one alert went out.
    Fired {
        next: NextEvent,
        adhan: bool,
        reminder: bool,
    },
}

impl CycleOutcome {
    pub fn next_event(&self) -> Option<&NextEvent> {
        match self {
            CycleOutcome::NoSchedule => None,
            CycleOutcome::Idle(next) | CycleOutcome::Superseded(next) => Some(next),
            CycleOutcome::Fired { next, .. } => Some(next),
        }
    }
}

/// Everything a context brings to a cycle.
pub struct CycleContext<'a> {
    pub store: &'a StateStore,
    pub engine: &'a ScheduleEngine,
    pub clock: &'a dyn WallClock,
    pub alerter: &'a Alerter,
    /// Whether this context plays the adhan audio itself.
    pub play_audio: bool,
    /// Fallback for `audioEnabled` when the user never set it.
    pub audio_default: bool,
    /// Context name for log fields.
    pub name: &'static str,
}

/// Decide from `snap`, claim the decision in the store, then apply it.
///
/// The dispatch record is swapped in before any alert is emitted, so of two
/// contexts racing on the same occurrence only the one whose swap lands
/// sends anything.
pub async fn run_cycle(ctx: &CycleContext<'_>, snap: Snapshot) -> Result<CycleOutcome> {
    let Some(ref schedule) = snap.schedule else {
        debug!(context = ctx.name, "no schedule stored yet");
        return Ok(CycleOutcome::NoSchedule);
    };

    let now = ctx
        .clock
        .corrected_local(snap.offset.as_ref())
        .ok_or_else(|| SchedulerError::InvalidState("clock out of range".to_string()))?;

    let Some(next) = ctx.engine.next_event(schedule, now) else {
        debug!(context = ctx.name, entries = schedule.len(), "stored schedule is incomplete");
        return Ok(CycleOutcome::NoSchedule);
    };

    let reminder = snap.reminder.unwrap_or_else(ReminderConfig::default);
    let decision = evaluate(&next, &reminder, &snap.dispatch);
    if decision.record == snap.dispatch {
        return Ok(CycleOutcome::Idle(next));
    }

    if !ctx
        .store
        .swap_dispatch(snap.dispatch_raw.as_deref(), &decision.record)?
    {
        debug!(context = ctx.name, occurrence = %next.occurrence, "dispatch state moved under us");
        return Ok(CycleOutcome::Superseded(next));
    }

    if let Some(missed) = decision.missed {
        warn!(context = ctx.name, occurrence = %missed, "adhan missed: occurrence passed without a notification");
    }

    if decision.fire_adhan {
        let play = ctx.play_audio && snap.audio_enabled.unwrap_or(ctx.audio_default);
        ctx.alerter.adhan(next.name, play).await;
        if next.late_by_ms > 0 {
            info!(context = ctx.name, prayer = %next.name, late_by_ms = next.late_by_ms, "adhan fired late");
        } else {
            info!(context = ctx.name, prayer = %next.name, "adhan fired");
        }
    }

    if decision.fire_reminder {
        let minutes = minutes_left(next.millis_until);
        ctx.alerter.reminder(next.name, minutes).await;
        info!(context = ctx.name, prayer = %next.name, minutes, "reminder fired");
    }

    if decision.fires() {
        Ok(CycleOutcome::Fired {
            next,
            adhan: decision.fire_adhan,
            reminder: decision.fire_reminder,
        })
    } else {
        Ok(CycleOutcome::Idle(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{testing::RecordingSink, Permission, Silent};
    use crate::engine::ManualClock;
    use crate::store::SqliteStore;
    use chrono::{NaiveDate, Utc};
    use miqat_core::types::{Location, PrayerName, Schedule, TimeOfDay};
    use std::sync::Arc;

    fn seeded_store() -> StateStore {
        let store = StateStore::new(Arc::new(SqliteStore::in_memory().unwrap()));
        let t = |h, m| TimeOfDay::new(h, m).unwrap();
        let schedule = Schedule::new()
            .with(PrayerName::Fajr, t(5, 30))
            .with(PrayerName::Sunrise, t(6, 45))
            .with(PrayerName::Dhuhr, t(12, 10))
            .with(PrayerName::Asr, t(15, 40))
            .with(PrayerName::Maghrib, t(18, 20))
            .with(PrayerName::Isha, t(19, 50));
        store
            .save_schedule(&schedule, &Location::new("XK", "Pristina"), Utc::now())
            .unwrap();
        store
    }

    #[tokio::test]
    async fn stale_snapshot_loses_the_swap_and_sends_nothing() {
        let store = seeded_store();
        let engine = ScheduleEngine::default();
        let clock = ManualClock::at(
            NaiveDate::from_ymd_opt(2026, 3, 14)
                .unwrap()
                .and_hms_opt(18, 20, 0)
                .unwrap(),
        );
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let alerter = Alerter::new(sink.clone(), Arc::new(Silent));
        let ctx = CycleContext {
            store: &store,
            engine: &engine,
            clock: &clock,
            alerter: &alerter,
            play_audio: false,
            audio_default: false,
            name: "test",
        };

        // Read before the other context claims the adhan.
        let stale = store.snapshot().unwrap();
        let first = run_cycle(&ctx, store.snapshot().unwrap()).await.unwrap();
        assert!(matches!(first, CycleOutcome::Fired { adhan: true, .. }));

        let second = run_cycle(&ctx, stale).await.unwrap();
        match second {
            CycleOutcome::Superseded(next) => assert_eq!(next.name, PrayerName::Maghrib),
            other => panic!("expected a lost swap, got {other:?}"),
        }
        assert_eq!(sink.tags(), vec!["prayer-time"]);
    }
}
