//! Desktop notifications through an external command (`notify-send` by default).

use std::process::ExitStatus;
use std::time::Duration;

use async_trait::async_trait;
use miqat_core::config::AlertsConfig;
use miqat_scheduler::{NotificationSink, Permission};
use tracing::{debug, info, warn};

/// A notifier stuck on the session bus must not hold up the poll loop.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(3);

/// Runs `<command> --app-name=miqat -h string:x-canonical-private-synchronous:<tag> <title> <body>`.
/// The synchronous hint makes a second notification with the same tag
/// replace the first on servers that support it.
pub struct CommandNotifier {
    command: Option<String>,
}

impl CommandNotifier {
    pub fn from_config(config: &AlertsConfig) -> Self {
        Self {
            command: config.notify_command.clone().filter(|c| !c.trim().is_empty()),
        }
    }

    fn args(title: &str, body: &str, tag: &str) -> Vec<String> {
        vec![
            "--app-name=miqat".to_string(),
            "-h".to_string(),
            format!("string:x-canonical-private-synchronous:{tag}"),
            title.to_string(),
            body.to_string(),
        ]
    }
}

#[async_trait]
impl NotificationSink for CommandNotifier {
    async fn notify(&self, title: &str, body: &str, tag: &str) {
        let Some(ref command) = self.command else {
            return;
        };
        let mut cmd = tokio::process::Command::new(command);
        cmd.args(Self::args(title, body, tag));
        match run_bounded(cmd, NOTIFY_TIMEOUT).await {
            Ok(Some(s)) if s.success() => debug!(tag, "notification shown"),
            Ok(Some(s)) => warn!(tag, command = %command, "notify command exited with {s}"),
            Ok(None) => warn!(tag, command = %command, "notify command timed out; killed"),
            Err(e) => warn!(tag, command = %command, "notify command failed: {e}"),
        }
    }

    /// Granted when the configured command resolves on `PATH`.
    async fn request_permission(&self) -> Permission {
        match self.command {
            Some(ref command) if which::which(command).is_ok() => Permission::Granted,
            Some(ref command) => {
                warn!(command = %command, "notify command not found; notifications disabled");
                Permission::Denied
            }
            None => {
                info!("no notify command configured; notifications disabled");
                Permission::Denied
            }
        }
    }
}

/// Wait for `cmd` at most `limit`; `Ok(None)` means it was killed.
async fn run_bounded(
    mut cmd: tokio::process::Command,
    limit: Duration,
) -> std::io::Result<Option<ExitStatus>> {
    let mut child = cmd.kill_on_drop(true).spawn()?;
    match tokio::time::timeout(limit, child.wait()).await {
        Ok(status) => status.map(Some),
        Err(_) => {
            let _ = child.kill().await;
            Ok(None)
        }
    }
}
