//! Adhan playback through an external player.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use miqat_core::config::AlertsConfig;
use miqat_core::types::PrayerName;
use miqat_scheduler::AudioSink;
use tracing::{debug, info, warn};

/// Plays the configured adhan recordings in turn with `<command> <file>`.
/// Playback runs detached; a new alert while one is playing is skipped.
pub struct CommandAudio {
    command: Option<String>,
    files: Vec<String>,
    next: AtomicUsize,
    playing: Arc<AtomicBool>,
}

impl CommandAudio {
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self {
            command: config.audio_command.clone().filter(|c| !c.trim().is_empty()),
            files: config.adhan_files.clone(),
            next: AtomicUsize::new(0),
            playing: Arc::new(AtomicBool::new(false)),
        }
    }

    fn next_file(&self) -> Option<&str> {
        if self.files.is_empty() {
            return None;
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.files.len();
        Some(&self.files[i])
    }
}

#[async_trait]
impl AudioSink for CommandAudio {
    async fn play_alert(&self, prayer: PrayerName) {
        let Some(ref command) = self.command else {
            debug!(%prayer, "no audio command configured");
            return;
        };
        if self.playing.swap(true, Ordering::SeqCst) {
            debug!(%prayer, "adhan already playing");
            return;
        }
        let Some(file) = self.next_file() else {
            self.playing.store(false, Ordering::SeqCst);
            debug!(%prayer, "no adhan files configured");
            return;
        };

        let child = tokio::process::Command::new(command).arg(file).spawn();
        let mut child = match child {
            Ok(c) => c,
            Err(e) => {
                self.playing.store(false, Ordering::SeqCst);
                warn!(%prayer, command = %command, "could not start audio player: {e}");
                return;
            }
        };

        info!(%prayer, file, "playing adhan");
        let playing = self.playing.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(s) if !s.success() => warn!("audio player exited with {s}"),
                Err(e) => warn!("audio player failed: {e}"),
                Ok(_) => {}
            }
            playing.store(false, Ordering::SeqCst);
        });
    }
}
