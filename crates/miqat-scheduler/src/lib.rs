//! `miqat-scheduler`: prayer-time scheduling core with SQLite persistence.
//!
//! # Overview
//!
//! Two contexts share one durable [`store::StateStore`]: a foreground poller
//! that runs while the application is active, and a background scheduler
//! that wakes on signals or a periodic re-check. Both run the same cycle:
//! [`engine::ScheduleEngine`] picks the next event, [`dispatch::evaluate`]
//! decides what to send, and the decision is claimed in the store with a
//! compare-and-swap before any alert goes out. Each occurrence therefore
//! produces at most one adhan and at most one reminder, whichever context
//! gets there first.
//!
//! # Contexts
//!
//! | Context      | Driven by                        | Audio | Boundary window      |
//! |--------------|----------------------------------|-------|----------------------|
//! | `Foreground` | [`tick::IntervalTicks`], 1 s     | yes   | 1 s                  |
//! | `Background` | [`tick::WakeTicks`]              | no    | catch-up, default 60 s |

pub mod alerts;
pub mod background;
pub mod channel;
pub mod cycle;
pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod foreground;
pub mod store;
pub mod tick;

pub use alerts::{Alerter, AudioSink, NotificationSink, Permission, PermissionState};
pub use background::BackgroundScheduler;
pub use channel::{context_channel, ContextData, ContextLink, ContextMessage};
pub use cycle::CycleOutcome;
pub use engine::{ManualClock, NextEvent, ScheduleEngine, SystemClock, WallClock};
pub use error::{Result, SchedulerError};
pub use foreground::{Countdown, ForegroundScheduler, ForegroundState};
pub use store::{SqliteStore, StateStore, Store};
pub use tick::{IntervalTicks, TickSource, Wake, WakeTicks};
