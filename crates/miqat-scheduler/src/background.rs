use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::{
    alerts::Alerter,
    channel::{answer_from_store, ContextLink},
    cycle::{run_cycle, CycleContext, CycleOutcome},
    engine::{ScheduleEngine, WallClock},
    error::Result,
    store::StateStore,
    tick::{TickSource, Wake},
};

/// Wake-driven scheduler with its own lifecycle. Everything it knows comes
/// from the store, or from a foreground context when the store is empty.
pub struct BackgroundScheduler {
    store: StateStore,
    engine: ScheduleEngine,
    clock: Arc<dyn WallClock>,
    alerter: Arc<Alerter>,
    foreground: Option<ContextLink>,
    foreground_wait: Duration,
}

impl BackgroundScheduler {
    pub fn new(
        store: StateStore,
        engine: ScheduleEngine,
        clock: Arc<dyn WallClock>,
        alerter: Arc<Alerter>,
        foreground_wait: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            clock,
            alerter,
            foreground: None,
            foreground_wait,
        }
    }

    /// Allow wakes to ask an active foreground context for missing state.
    pub fn with_foreground(mut self, link: ContextLink) -> Self {
        self.foreground = Some(link);
        self
    }

    /// One wake: without a stored schedule, ask the foreground for one first;
    /// then run the cycle. Missing reminder settings mean the defaults.
    pub async fn wake(&self) -> Result<CycleOutcome> {
        let mut snap = self.store.snapshot()?;
        if snap.schedule.is_none() && self.pull_from_foreground().await? > 0 {
            snap = self.store.snapshot()?;
        }

        let ctx = CycleContext {
            store: &self.store,
            engine: &self.engine,
            clock: self.clock.as_ref(),
            alerter: &self.alerter,
            // Host-level notification only; sound is the foreground's job.
            play_audio: false,
            audio_default: false,
            name: "background",
        };
        run_cycle(&ctx, snap).await
    }

    /// Returns how many keys were filled in.
    async fn pull_from_foreground(&self) -> Result<usize> {
        let Some(ref link) = self.foreground else {
            return Ok(0);
        };
        match link.request_data(self.foreground_wait).await {
            Some(data) if !data.is_empty() => {
                let written = data.persist(&self.store)?;
                debug!(written, "state received from foreground");
                Ok(written)
            }
            _ => {
                debug!("no state available from foreground this wake");
                Ok(0)
            }
        }
    }

    /// Handle wakes until the tick source stops.
    pub async fn run<T>(self, mut ticks: T)
    where
        T: TickSource<Tick = Wake>,
    {
        info!(
            catch_up_ms = self.engine.boundary_window().as_millis() as u64,
            "background scheduler started"
        );
        while let Some(wake) = ticks.next_tick().await {
            match wake {
                Wake::Periodic | Wake::Signal => {}
                Wake::Message(msg) => match answer_from_store(&self.store, msg) {
                    // GET_DATA answered; no state changed.
                    Ok(None) => continue,
                    Ok(Some(key)) => debug!(%key, "stored value pushed by foreground"),
                    Err(e) => {
                        warn!("background could not apply context message: {e}");
                        continue;
                    }
                },
            }
            match self.wake().await {
                Ok(CycleOutcome::NoSchedule) => debug!("wake skipped: no schedule"),
                Ok(_) => {}
                Err(e) => error!("background wake error: {e}"),
            }
        }
        info!("background scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{testing::RecordingSink, Permission, Silent};
    use crate::channel::{context_channel, ContextData, ContextMessage};
    use crate::engine::ManualClock;
    use crate::store::SqliteStore;
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use miqat_core::types::{Location, PrayerName, ReminderConfig, Schedule, StateKey, TimeOfDay};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn schedule() -> Schedule {
        let t = |h, m| TimeOfDay::new(h, m).unwrap();
        Schedule::new()
            .with(PrayerName::Fajr, t(5, 30))
            .with(PrayerName::Sunrise, t(6, 45))
            .with(PrayerName::Dhuhr, t(12, 10))
            .with(PrayerName::Asr, t(15, 40))
            .with(PrayerName::Maghrib, t(18, 20))
            .with(PrayerName::Isha, t(19, 50))
    }

    fn empty_store() -> StateStore {
        StateStore::new(Arc::new(SqliteStore::in_memory().unwrap()))
    }

    fn scheduler(
        store: StateStore,
        now: NaiveDateTime,
        sink: Arc<RecordingSink>,
    ) -> BackgroundScheduler {
        BackgroundScheduler::new(
            store,
            ScheduleEngine::new(Duration::from_secs(60)),
            Arc::new(ManualClock::at(now)),
            Arc::new(Alerter::new(sink, Arc::new(Silent))),
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn wake_without_schedule_is_a_no_op() {
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let bg = scheduler(empty_store(), at(12, 0, 0), sink.clone());
        assert_eq!(bg.wake().await.unwrap(), CycleOutcome::NoSchedule);
        assert!(sink.tags().is_empty());
    }

    #[tokio::test]
    async fn wake_pulls_missing_state_from_foreground() {
        let (link, mut inbox) = context_channel(4);
        tokio::spawn(async move {
            if let Some(ContextMessage::GetData { reply }) = inbox.recv().await {
                let _ = reply.send(ContextData {
                    schedule: Some(schedule()),
                    reminder_settings: Some(ReminderConfig::new(true, 5)),
                    time_diff: None,
                });
            }
        });

        let store = empty_store();
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let bg = scheduler(store.clone(), at(12, 6, 0), sink.clone()).with_foreground(link);

        let outcome = bg.wake().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Fired { reminder: true, .. }));
        assert_eq!(store.schedule().unwrap(), Some(schedule()));
        assert_eq!(sink.tags(), vec!["prayer-reminder"]);
    }

    #[tokio::test]
    async fn wake_keeps_fresh_schedule_when_reminder_unset() {
        let t = |h, m| TimeOfDay::new(h, m).unwrap();
        let fresh = schedule()
            .with(PrayerName::Fajr, t(5, 29))
            .with(PrayerName::Dhuhr, t(12, 5));
        let store = empty_store();
        store
            .save_schedule(&fresh, &Location::new("XK", "Pristina"), Utc::now())
            .unwrap();

        // A foreground whose last poll still holds the previous timetable.
        let (link, mut inbox) = context_channel(4);
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let bg = scheduler(store.clone(), at(9, 0, 0), sink).with_foreground(link);

        assert!(matches!(bg.wake().await.unwrap(), CycleOutcome::Idle(_)));
        assert!(inbox.try_recv().is_err());
        assert_eq!(store.schedule().unwrap(), Some(fresh));
        assert!(store.last_updated().unwrap().is_some());
    }

    #[tokio::test]
    async fn silent_foreground_does_not_stall_wake() {
        let (link, _inbox) = context_channel(4);
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let bg = scheduler(empty_store(), at(12, 0, 0), sink).with_foreground(link);

        let started = tokio::time::Instant::now();
        assert_eq!(bg.wake().await.unwrap(), CycleOutcome::NoSchedule);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn coarse_wake_delivers_late_adhan_once() {
        let store = empty_store();
        store
            .raw()
            .put(StateKey::Schedule, &serde_json::to_string(&schedule()).unwrap())
            .unwrap();
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let bg = scheduler(store, at(19, 50, 40), sink.clone());

        match bg.wake().await.unwrap() {
            CycleOutcome::Fired { next, adhan: true, .. } => {
                assert_eq!(next.name, PrayerName::Isha);
                assert_eq!(next.late_by_ms, 40_000);
            }
            other => panic!("expected late adhan, got {other:?}"),
        }
        assert!(matches!(bg.wake().await.unwrap(), CycleOutcome::Idle(_)));
        assert_eq!(sink.tags(), vec!["prayer-time"]);
    }
}
