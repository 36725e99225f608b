//! Tick sources: the host-specific part of each scheduler loop.
//!
//! The cycle logic is the same in both contexts; only what wakes it differs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::channel::ContextMessage;

/// Why a background cycle is running.
#[derive(Debug)]
pub enum Wake {
    /// Fallback fixed-interval re-check.
    Periodic,
    /// Externally delivered wake signal.
    Signal,
    /// A message from the other context.
    Message(ContextMessage),
}

#[async_trait]
pub trait TickSource: Send {
    type Tick: Send;

    /// Wait for the next tick. `None` means the source has stopped.
    async fn next_tick(&mut self) -> Option<Self::Tick>;
}

/// Fixed-cadence ticks until cancelled. Drives the foreground loop.
pub struct IntervalTicks {
    interval: Interval,
    cancel: CancellationToken,
}

impl IntervalTicks {
    pub fn new(period: Duration, cancel: CancellationToken) -> Self {
        let mut interval = interval(period);
        // Catch-up bursts would replay stale seconds; skip them instead.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval, cancel }
    }
}

#[async_trait]
impl TickSource for IntervalTicks {
    type Tick = ();

    async fn next_tick(&mut self) -> Option<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = self.interval.tick() => Some(()),
        }
    }
}

/// Periodic re-checks plus wake signals and inbound messages. Drives the
/// background loop.
pub struct WakeTicks {
    interval: Interval,
    signals: mpsc::Receiver<()>,
    inbox: mpsc::Receiver<ContextMessage>,
    shutdown: CancellationToken,
    signals_open: bool,
    inbox_open: bool,
}

impl WakeTicks {
    pub fn new(
        recheck: Duration,
        signals: mpsc::Receiver<()>,
        inbox: mpsc::Receiver<ContextMessage>,
        shutdown: CancellationToken,
    ) -> Self {
        let mut interval = interval(recheck);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            signals,
            inbox,
            shutdown,
            signals_open: true,
            inbox_open: true,
        }
    }
}

#[async_trait]
impl TickSource for WakeTicks {
    type Tick = Wake;

    async fn next_tick(&mut self) -> Option<Wake> {
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return None,
                msg = self.inbox.recv(), if self.inbox_open => match msg {
                    Some(msg) => return Some(Wake::Message(msg)),
                    None => self.inbox_open = false,
                },
                signal = self.signals.recv(), if self.signals_open => match signal {
                    Some(()) => return Some(Wake::Signal),
                    None => self.signals_open = false,
                },
                _ = self.interval.tick() => return Some(Wake::Periodic),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interval_ticks_stop_on_cancel() {
        let cancel = CancellationToken::new();
        let mut ticks = IntervalTicks::new(Duration::from_millis(10), cancel.clone());
        assert!(ticks.next_tick().await.is_some());
        cancel.cancel();
        assert!(ticks.next_tick().await.is_none());
    }

    #[tokio::test]
    async fn wake_ticks_prefer_messages_and_signals() {
        let (signal_tx, signal_rx) = mpsc::channel(4);
        let (inbox_tx, inbox_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();
        let mut ticks = WakeTicks::new(Duration::from_secs(3600), signal_rx, inbox_rx, shutdown.clone());

        // The first interval tick completes immediately.
        assert!(matches!(ticks.next_tick().await, Some(Wake::Periodic)));

        signal_tx.send(()).await.unwrap();
        assert!(matches!(ticks.next_tick().await, Some(Wake::Signal)));

        inbox_tx
            .send(ContextMessage::StoreData {
                key: miqat_core::types::StateKey::TimeDiff,
                value: "{}".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(ticks.next_tick().await, Some(Wake::Message(_))));

        drop(signal_tx);
        drop(inbox_tx);
        shutdown.cancel();
        assert!(ticks.next_tick().await.is_none());
    }
}
