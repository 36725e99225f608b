use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use miqat_core::config::{MiqatConfig, SCHEDULE_CHECK_SECS};
use miqat_core::types::{Location, ReminderConfig, KNOWN_COUNTRIES};
use miqat_scheduler::alerts::Silent;
use miqat_scheduler::{
    context_channel, Alerter, BackgroundScheduler, CycleOutcome, ForegroundScheduler,
    IntervalTicks, NotificationSink, ScheduleEngine, SqliteStore, StateStore, SystemClock,
    WakeTicks, WallClock,
};
use miqat_sync::{ClockSync, ScheduleRefresher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod audio;
mod notifier;

use audio::CommandAudio;
use notifier::CommandNotifier;

/// Miqat: prayer-time countdown and adhan notifications.
#[derive(Parser)]
#[command(name = "miqat", version)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the foreground poller and the background scheduler until Ctrl+C.
    Run,
    /// Perform a single background wake and exit.
    Wake,
    /// Show today's schedule and the next prayer.
    Next,
    /// Select the location; its schedule is fetched on the next check.
    Location { country: String, city: String },
    /// Show or change reminder settings.
    Reminder {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Minutes before each prayer (1-30).
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// Turn adhan audio on or off.
    Audio { state: Toggle },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "miqat=info,miqat_scheduler=info,miqat_sync=info".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: explicit path > MIQAT_CONFIG env > ~/.miqat/miqat.toml
    let config_path = cli.config.or_else(|| std::env::var("MIQAT_CONFIG").ok());
    let config = MiqatConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        MiqatConfig::default()
    });

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Wake => wake(config).await,
        Command::Next => next(config).await,
        Command::Location { country, city } => set_location(&config, &country, &city),
        Command::Reminder {
            enable,
            disable,
            minutes,
        } => set_reminder(&config, enable, disable, minutes),
        Command::Audio { state } => {
            let store = open_store(&config)?;
            store.save_audio_enabled(matches!(state, Toggle::On))?;
            println!("Adhan audio {}", if matches!(state, Toggle::On) { "on" } else { "off" });
            Ok(())
        }
    }
}

/// Each context gets its own connection to the shared database file.
fn open_store(config: &MiqatConfig) -> anyhow::Result<StateStore> {
    let path = &config.database.path;
    ensure_parent_dir(path);
    Ok(StateStore::new(Arc::new(SqliteStore::open(path)?)))
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn refresher(config: &MiqatConfig, clock: Arc<dyn WallClock>) -> anyhow::Result<ScheduleRefresher> {
    let client = miqat_sync::http_client(millis(config.providers.timeout_ms));
    Ok(ScheduleRefresher::new(
        miqat_sync::default_router(&config.providers, &client),
        open_store(config)?,
        clock,
        config.location.to_location(),
    ))
}

fn background(
    config: &MiqatConfig,
    clock: Arc<dyn WallClock>,
    notifier: Arc<dyn NotificationSink>,
) -> anyhow::Result<BackgroundScheduler> {
    Ok(BackgroundScheduler::new(
        open_store(config)?,
        ScheduleEngine::new(secs(config.background.catch_up_secs)),
        clock,
        Arc::new(Alerter::new(notifier, Arc::new(Silent))),
        millis(config.background.foreground_wait_ms),
    ))
}

async fn run(config: MiqatConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let clock: Arc<dyn WallClock> = Arc::new(SystemClock);
    let notifier: Arc<dyn NotificationSink> = Arc::new(CommandNotifier::from_config(&config.alerts));

    // background -> foreground (GET_DATA) and refresher -> background (STORE_DATA)
    let (to_foreground, foreground_inbox) = context_channel(16);
    let (to_background, background_inbox) = context_channel(16);
    let (wake_tx, wake_rx) = mpsc::channel::<()>(4);

    let foreground = ForegroundScheduler::new(
        open_store(&config)?,
        ScheduleEngine::new(millis(config.foreground.boundary_window_ms)),
        clock.clone(),
        Arc::new(Alerter::new(
            notifier.clone(),
            Arc::new(CommandAudio::from_config(&config.alerts)),
        )),
        config.alerts.audio_enabled,
    );
    let fg_ticks = IntervalTicks::new(millis(config.foreground.poll_interval_ms), cancel.clone());
    let fg_task = tokio::spawn(foreground.run(fg_ticks, foreground_inbox));

    let background = background(&config, clock.clone(), notifier)?.with_foreground(to_foreground);
    let bg_ticks = WakeTicks::new(
        secs(config.background.recheck_interval_secs),
        wake_rx,
        background_inbox,
        cancel.clone(),
    );
    let bg_task = tokio::spawn(background.run(bg_ticks));

    let client = miqat_sync::http_client(millis(config.clock.effective_timeout_ms()));
    let clock_sync = ClockSync::from_config(&config.clock, client, open_store(&config)?, clock.clone());
    let sync_every = secs(config.clock.effective_sync_interval_secs());
    let sync_cancel = cancel.clone();
    let sync_task = tokio::spawn(async move { clock_sync.run(sync_every, sync_cancel).await });

    let refresher = refresher(&config, clock.clone())?.with_push(to_background);
    let refresh_cancel = cancel.clone();
    let refresh_task = tokio::spawn(async move {
        refresher.run(secs(SCHEDULE_CHECK_SECS), refresh_cancel).await
    });

    forward_wake_signals(wake_tx, cancel.clone());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        location = %config.location.to_location(),
        db = %config.database.path,
        "miqat running"
    );
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("received Ctrl+C, shutting down...");
    }
    cancel.cancel();

    for task in [fg_task, bg_task, sync_task, refresh_task] {
        if let Err(e) = task.await {
            warn!("task ended abnormally: {e}");
        }
    }
    Ok(())
}

/// SIGUSR1 asks the background scheduler for an immediate wake.
#[cfg(unix)]
fn forward_wake_signals(tx: mpsc::Sender<()>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sig = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            warn!("SIGUSR1 wake unavailable: {e}");
            return;
        }
    };
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = sig.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("wake signal received");
                    let _ = tx.try_send(());
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn forward_wake_signals(_tx: mpsc::Sender<()>, _cancel: CancellationToken) {}

async fn wake(config: MiqatConfig) -> anyhow::Result<()> {
    let notifier: Arc<dyn NotificationSink> = Arc::new(CommandNotifier::from_config(&config.alerts));
    let background = background(&config, Arc::new(SystemClock), notifier)?;

    match background.wake().await? {
        CycleOutcome::NoSchedule => info!("no schedule stored yet; nothing to do"),
        CycleOutcome::Fired {
            next,
            adhan,
            reminder,
        } => info!(prayer = %next.name, adhan, reminder, "wake delivered alerts"),
        outcome => {
            if let Some(next) = outcome.next_event() {
                info!(prayer = %next.name, countdown = %next.countdown(), "wake: nothing due");
            }
        }
    }
    Ok(())
}

async fn next(config: MiqatConfig) -> anyhow::Result<()> {
    let clock: Arc<dyn WallClock> = Arc::new(SystemClock);
    if let Err(e) = refresher(&config, clock.clone())?.refresh_if_stale().await {
        warn!("could not refresh schedule: {e}");
    }

    let store = open_store(&config)?;
    let Some(schedule) = store.schedule()? else {
        println!("No schedule stored yet.");
        return Ok(());
    };
    let location = store.location()?.unwrap_or_else(|| config.location.to_location());
    println!("{} ({})", location.city, location.country_name());
    for (name, time) in schedule.iter() {
        println!("  {:<8} {}", name.as_str(), time);
    }

    let offset = store.clock_offset()?;
    let now = clock
        .corrected_local(offset.as_ref())
        .ok_or_else(|| anyhow::anyhow!("local clock out of range"))?;
    match ScheduleEngine::default().next_event(&schedule, now) {
        Some(next) => println!("Next: {} in {}", next.name, next.countdown()),
        None => println!("Stored schedule is incomplete."),
    }
    Ok(())
}

fn set_location(config: &MiqatConfig, country: &str, city: &str) -> anyhow::Result<()> {
    let location = Location::new(country.to_ascii_uppercase(), city);
    match KNOWN_COUNTRIES
        .iter()
        .find(|c| c.code == location.country)
    {
        None => warn!(country = %location.country, "unknown country code; providers may reject it"),
        Some(known) if !known.cities.iter().any(|c| c.eq_ignore_ascii_case(city)) => {
            warn!(%city, country = known.name, "city not in the known list")
        }
        Some(_) => {}
    }

    open_store(config)?.change_location(&location)?;
    println!(
        "Location set to {} ({}); schedule will be refetched.",
        location.city,
        location.country_name()
    );
    Ok(())
}

fn set_reminder(
    config: &MiqatConfig,
    enable: bool,
    disable: bool,
    minutes: Option<u32>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let current = store.reminder()?.unwrap_or_default();

    let enabled = if enable {
        true
    } else if disable {
        false
    } else {
        current.enabled
    };
    let updated = ReminderConfig::new(enabled, minutes.unwrap_or(current.minutes_before));
    if let Some(m) = minutes {
        if m != updated.minutes_before {
            warn!(requested = m, used = updated.minutes_before, "reminder minutes clamped");
        }
    }

    if enable || disable || minutes.is_some() {
        store.save_reminder(&updated)?;
    }
    println!(
        "Reminders {}, {} minutes before each prayer",
        if updated.enabled { "enabled" } else { "disabled" },
        updated.minutes_before
    );
    Ok(())
}
