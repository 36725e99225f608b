use miqat_core::types::{DispatchRecord, Occurrence, ReminderConfig};

use crate::engine::NextEvent;

/// What a scheduler context should do for the current next event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub fire_adhan: bool,
    pub fire_reminder: bool,
    /// Record to persist before any side effect runs.
    pub record: DispatchRecord,
    /// The previous occurrence, when it rolled over without its adhan going out.
    pub missed: Option<Occurrence>,
}

impl Decision {
    pub fn fires(&self) -> bool {
        self.fire_adhan || self.fire_reminder
    }
}

/// Decide which alerts fire for `next`, given what has already been sent.
///
/// Pure: two contexts evaluating the same inputs reach the same decision.
///
/// - Same slot as the record (same prayer, same day): flags carry over, even
///   when a refetch moved the time by a minute.
/// - Later than the record: flags reset, and an undelivered previous adhan is
///   reported as missed.
/// - Earlier than the record and already due: the caller is a coarse wake
///   catching up on an occurrence the other context rolled past. Only the
///   adhan can fire, and only if it never went out.
/// - Earlier than the record and still ahead: a refetched timetable moved the
///   next event; it is treated as a fresh occurrence.
pub fn evaluate(next: &NextEvent, reminder: &ReminderConfig, record: &DispatchRecord) -> Decision {
    let occurrence = next.occurrence;

    let (base, missed) = match record.occurrence {
        Some(prev) if prev.same_slot(&occurrence) => (
            DispatchRecord {
                occurrence: Some(occurrence),
                ..*record
            },
            None,
        ),
        Some(prev) if prev > occurrence && next.is_due() => {
            return catch_up(occurrence, record);
        }
        Some(prev) if prev > occurrence => (record.rolled_to(occurrence), None),
        prev => (
            record.rolled_to(occurrence),
            prev.filter(|p| !record.adhan_sent && !record.adhan_delivered(p)),
        ),
    };

    let fire_adhan = next.is_due() && !base.adhan_sent && !base.adhan_delivered(&occurrence);
    let fire_reminder = reminder.enabled
        && !base.reminder_sent
        && next.millis_until > 0
        && next.millis_until <= reminder.window_ms();

    Decision {
        fire_adhan,
        fire_reminder,
        record: DispatchRecord {
            occurrence: Some(occurrence),
            adhan_sent: base.adhan_sent || fire_adhan,
            reminder_sent: base.reminder_sent || fire_reminder,
            last_adhan: if fire_adhan {
                Some(occurrence)
            } else {
                base.last_adhan
            },
        },
        missed,
    }
}

/// Late adhan for an occurrence the record already rolled past. The record
/// keeps tracking the later occurrence.
fn catch_up(occurrence: Occurrence, record: &DispatchRecord) -> Decision {
    let fire_adhan = !record.adhan_delivered(&occurrence);
    Decision {
        fire_adhan,
        fire_reminder: false,
        record: DispatchRecord {
            last_adhan: if fire_adhan {
                Some(occurrence)
            } else {
                record.last_adhan
            },
            ..*record
        },
        missed: None,
    }
}

/// Whole minutes left, rounded up, for reminder text.
pub fn minutes_left(millis_until: u64) -> u64 {
    millis_until.div_ceil(60_000)
}
