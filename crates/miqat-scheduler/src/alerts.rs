//! Notification and audio side effects, behind host-provided sinks.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use miqat_core::config::{ADHAN_TAG, REMINDER_TAG};
use miqat_core::types::PrayerName;
use tracing::{debug, info, warn};

/// Host answer to a notification permission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Granted,
    Denied,
}

/// Notification permission as seen by one context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionState {
    #[default]
    Unrequested,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionEvent {
    /// The host answered a request.
    Answered(Permission),
    /// The host reports the permission was withdrawn or reset.
    Revoked,
}

impl PermissionState {
    pub fn transition(self, event: PermissionEvent) -> Self {
        match (self, event) {
            (_, PermissionEvent::Answered(Permission::Granted)) => PermissionState::Granted,
            (_, PermissionEvent::Answered(Permission::Denied)) => PermissionState::Denied,
            (_, PermissionEvent::Revoked) => PermissionState::Unrequested,
        }
    }
}

/// Host notification layer. Emissions with the same `tag` replace each other.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, title: &str, body: &str, tag: &str);

    async fn request_permission(&self) -> Permission;
}

/// Host audio layer. Must swallow and log its own failures.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn play_alert(&self, prayer: PrayerName);
}

/// Audio sink for contexts that never play sound.
pub struct Silent;

#[async_trait]
impl AudioSink for Silent {
    async fn play_alert(&self, _prayer: PrayerName) {}
}

pub fn adhan_text(prayer: PrayerName) -> (&'static str, String) {
    ("Prayer Time", format!("It's time for {prayer} prayer."))
}

pub fn reminder_text(prayer: PrayerName, minutes_left: u64) -> (&'static str, String) {
    let unit = if minutes_left == 1 { "minute" } else { "minutes" };
    (
        "Prayer Time Reminder",
        format!("{prayer} prayer will start in {minutes_left} {unit}."),
    )
}

/// Applies alert side effects for one scheduler context.
pub struct Alerter {
    notifier: Arc<dyn NotificationSink>,
    audio: Arc<dyn AudioSink>,
    permission: Mutex<PermissionState>,
}

impl Alerter {
    pub fn new(notifier: Arc<dyn NotificationSink>, audio: Arc<dyn AudioSink>) -> Self {
        Self {
            notifier,
            audio,
            permission: Mutex::new(PermissionState::Unrequested),
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.permission
            .lock()
            .map(|p| *p)
            .unwrap_or(PermissionState::Denied)
    }

    pub fn apply(&self, event: PermissionEvent) -> PermissionState {
        match self.permission.lock() {
            Ok(mut state) => {
                *state = state.transition(event);
                *state
            }
            Err(_) => PermissionState::Denied,
        }
    }

    /// Ask the host at most once; later calls return the remembered answer.
    pub async fn ensure_permission(&self) -> PermissionState {
        let current = self.permission();
        if current != PermissionState::Unrequested {
            return current;
        }
        let answer = self.notifier.request_permission().await;
        let state = self.apply(PermissionEvent::Answered(answer));
        info!(?state, "notification permission resolved");
        state
    }

    async fn emit(&self, title: &str, body: &str, tag: &str) -> bool {
        if self.ensure_permission().await != PermissionState::Granted {
            debug!(tag, "notifications not permitted; alert suppressed");
            return false;
        }
        self.notifier.notify(title, body, tag).await;
        true
    }

    pub async fn adhan(&self, prayer: PrayerName, play_audio: bool) -> bool {
        if play_audio {
            self.audio.play_alert(prayer).await;
        }
        let (title, body) = adhan_text(prayer);
        self.emit(title, &body, ADHAN_TAG).await
    }

    pub async fn reminder(&self, prayer: PrayerName, minutes_left: u64) -> bool {
        let (title, body) = reminder_text(prayer, minutes_left);
        let shown = self.emit(title, &body, REMINDER_TAG).await;
        if !shown {
            warn!(%prayer, minutes_left, "reminder suppressed: notifications denied");
        }
        shown
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;

    #[test]
    fn permission_transitions() {
        let s = PermissionState::Unrequested;
        let granted = s.transition(PermissionEvent::Answered(Permission::Granted));
        assert_eq!(granted, PermissionState::Granted);
        let denied = granted.transition(PermissionEvent::Answered(Permission::Denied));
        assert_eq!(denied, PermissionState::Denied);
        assert_eq!(denied.transition(PermissionEvent::Revoked), PermissionState::Unrequested);
    }

    #[test]
    fn reminder_text_pluralises() {
        assert_eq!(
            reminder_text(PrayerName::Dhuhr, 1).1,
            "Dhuhr prayer will start in 1 minute."
        );
        assert_eq!(
            reminder_text(PrayerName::Asr, 5).1,
            "Asr prayer will start in 5 minutes."
        );
    }

    #[tokio::test]
    async fn denied_permission_is_asked_once_and_silences_alerts() {
        let sink = Arc::new(RecordingSink::new(Permission::Denied));
        let alerter = Alerter::new(sink.clone(), Arc::new(Silent));

        assert!(!alerter.adhan(PrayerName::Isha, false).await);
        assert!(!alerter.reminder(PrayerName::Isha, 3).await);
        assert_eq!(*sink.requests.lock().unwrap(), 1);
        assert!(sink.tags().is_empty());
    }

    #[tokio::test]
    async fn granted_alerts_use_stable_tags() {
        let sink = Arc::new(RecordingSink::new(Permission::Granted));
        let alerter = Alerter::new(sink.clone(), Arc::new(Silent));

        assert!(alerter.reminder(PrayerName::Maghrib, 5).await);
        assert!(alerter.adhan(PrayerName::Maghrib, false).await);
        assert_eq!(sink.tags(), vec![REMINDER_TAG, ADHAN_TAG]);
    }
}
