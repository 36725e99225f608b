use std::sync::Arc;

use miqat_core::types::Occurrence;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::{
    alerts::Alerter,
    channel::{ContextData, ContextMessage},
    cycle::{run_cycle, CycleContext, CycleOutcome},
    engine::{ScheduleEngine, WallClock},
    error::Result,
    store::StateStore,
    tick::TickSource,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundState {
    Idle,
    Polling,
}

/// What the presentation layer renders every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Countdown {
    pub occurrence: Occurrence,
    pub millis_until: u64,
    /// `HH:MM:SS`.
    pub display: String,
}

/// Polling loop that runs only while the application is active.
pub struct ForegroundScheduler {
    store: StateStore,
    engine: ScheduleEngine,
    clock: Arc<dyn WallClock>,
    alerter: Arc<Alerter>,
    audio_default: bool,
    state: ForegroundState,
    current: Option<Occurrence>,
    /// State as of the last poll; what `GetData` is answered with.
    view: ContextData,
    display: watch::Sender<Option<Countdown>>,
}

impl ForegroundScheduler {
    pub fn new(
        store: StateStore,
        engine: ScheduleEngine,
        clock: Arc<dyn WallClock>,
        alerter: Arc<Alerter>,
        audio_default: bool,
    ) -> Self {
        let (display, _) = watch::channel(None);
        Self {
            store,
            engine,
            clock,
            alerter,
            audio_default,
            state: ForegroundState::Idle,
            current: None,
            view: ContextData::default(),
            display,
        }
    }

    pub fn state(&self) -> ForegroundState {
        self.state
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Countdown>> {
        self.display.subscribe()
    }

    /// One tick: run the shared cycle and refresh the countdown.
    pub async fn poll(&mut self) -> Result<CycleOutcome> {
        let snap = self.store.snapshot()?;
        self.view = ContextData {
            schedule: snap.schedule.clone(),
            reminder_settings: snap.reminder,
            time_diff: snap.offset,
        };

        let ctx = CycleContext {
            store: &self.store,
            engine: &self.engine,
            clock: self.clock.as_ref(),
            alerter: &self.alerter,
            play_audio: true,
            audio_default: self.audio_default,
            name: "foreground",
        };
        let outcome = run_cycle(&ctx, snap).await?;

        let countdown = outcome.next_event().map(|next| Countdown {
            occurrence: next.occurrence,
            millis_until: next.millis_until,
            display: next.countdown(),
        });

        let identity = countdown.as_ref().map(|c| c.occurrence);
        if identity != self.current {
            if let Some(occ) = identity {
                info!(next = %occ, "next prayer changed");
            }
            self.current = identity;
        }
        self.display.send_replace(countdown);
        Ok(outcome)
    }

    fn answer(&self, msg: ContextMessage) {
        match msg {
            ContextMessage::GetData { reply } => {
                // The requester may have given up already.
                let _ = reply.send(self.view.clone());
            }
            ContextMessage::StoreData { key, value } => {
                // Picked up by the next poll's snapshot.
                if let Err(e) = self.store.raw().put(key, &value) {
                    warn!(%key, "foreground could not store pushed value: {e}");
                }
            }
        }
    }

    /// Poll on every tick until the tick source stops, answering requests
    /// from the background context in between.
    pub async fn run<T>(mut self, mut ticks: T, mut inbox: mpsc::Receiver<ContextMessage>)
    where
        T: TickSource<Tick = ()>,
    {
        self.state = ForegroundState::Polling;
        info!("foreground polling started");
        let mut inbox_open = true;

        loop {
            tokio::select! {
                tick = ticks.next_tick() => {
                    if tick.is_none() {
                        break;
                    }
                    if let Err(e) = self.poll().await {
                        error!("foreground tick error: {e}");
                    }
                }
                msg = inbox.recv(), if inbox_open => match msg {
                    Some(msg) => self.answer(msg),
                    None => inbox_open = false,
                },
            }
        }

        self.state = ForegroundState::Idle;
        self.display.send_replace(None);
        info!("foreground polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{testing::RecordingSink, Permission, Silent};
    use crate::engine::ManualClock;
    use crate::store::SqliteStore;
    use crate::tick::IntervalTicks;
    use chrono::{NaiveDate, NaiveDateTime, Utc};
    use miqat_core::types::{Location, PrayerName, Schedule, TimeOfDay};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 14)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

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
    async fn poll_publishes_countdown_and_fires_at_boundary() {
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let clock = Arc::new(ManualClock::at(at(18, 19, 58)));
        let mut fg = ForegroundScheduler::new(
            seeded_store(),
            ScheduleEngine::default(),
            clock.clone(),
            Arc::new(Alerter::new(sink.clone(), Arc::new(Silent))),
            true,
        );
        let view = fg.subscribe();

        fg.poll().await.unwrap();
        let shown = view.borrow().clone().unwrap();
        assert_eq!(shown.occurrence.name, PrayerName::Maghrib);
        assert_eq!(shown.display, "00:00:02");

        clock.advance(Duration::from_secs(2));
        let outcome = fg.poll().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Fired { adhan: true, .. }));

        // Same second, second poll: nothing new.
        let again = fg.poll().await.unwrap();
        assert!(matches!(again, CycleOutcome::Idle(_)));
        assert_eq!(sink.tags(), vec!["prayer-time"]);
    }

    #[tokio::test]
    async fn get_data_is_answered_from_last_poll() {
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let mut fg = ForegroundScheduler::new(
            seeded_store(),
            ScheduleEngine::default(),
            Arc::new(ManualClock::at(at(9, 0, 0))),
            Arc::new(Alerter::new(sink, Arc::new(Silent))),
            true,
        );

        let (reply, rx) = tokio::sync::oneshot::channel();
        fg.answer(ContextMessage::GetData { reply });
        assert!(rx.await.unwrap().is_empty());

        fg.poll().await.unwrap();
        let (reply, rx) = tokio::sync::oneshot::channel();
        fg.answer(ContextMessage::GetData { reply });
        let data = rx.await.unwrap();
        assert!(data.schedule.is_some_and(|s| s.is_ready()));
    }

    #[tokio::test]
    async fn run_stops_on_cancel_and_returns_to_idle() {
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let fg = ForegroundScheduler::new(
            seeded_store(),
            ScheduleEngine::default(),
            Arc::new(ManualClock::at(at(9, 0, 0))),
            Arc::new(Alerter::new(sink, Arc::new(Silent))),
            true,
        );
        let view = fg.subscribe();
        let cancel = CancellationToken::new();
        let ticks = IntervalTicks::new(Duration::from_millis(5), cancel.clone());
        let (_tx, inbox) = mpsc::channel(4);

        let handle = tokio::spawn(fg.run(ticks, inbox));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(view.borrow().is_none());
    }
}
