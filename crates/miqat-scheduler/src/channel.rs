//! Message passing between the foreground and background contexts.
//!
//! The contexts share no memory. The background side can ask an active
//! foreground for its current state (`GetData`), and either side can push a
//! value it just changed (`StoreData`).

use std::time::Duration;

use miqat_core::types::{ClockOffset, ReminderConfig, Schedule, StateKey};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::Result;
use crate::store::StateStore;

#[derive(Debug)]
pub enum ContextMessage {
    GetData { reply: oneshot::Sender<ContextData> },
    StoreData { key: StateKey, value: String },
}

/// State a foreground context can hand to a background wake.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminder_settings: Option<ReminderConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_diff: Option<ClockOffset>,
}

impl ContextData {
    pub fn from_store(store: &StateStore) -> Result<Self> {
        Ok(Self {
            schedule: store.schedule()?,
            reminder_settings: store.reminder()?,
            time_diff: store.clock_offset()?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.schedule.is_none() && self.reminder_settings.is_none() && self.time_diff.is_none()
    }

    /// Fill in the fields the store has no value for. A key written since
    /// this data was captured is newer and wins. Returns how many were written.
    pub fn persist(&self, store: &StateStore) -> Result<usize> {
        let mut written = 0;
        if let Some(ref schedule) = self.schedule {
            written += fill(store, StateKey::Schedule, &serde_json::to_string(schedule)?)?;
        }
        if let Some(ref reminder) = self.reminder_settings {
            written += fill(
                store,
                StateKey::ReminderSettings,
                &serde_json::to_string(&reminder.clamped())?,
            )?;
        }
        if let Some(ref offset) = self.time_diff {
            written += fill(store, StateKey::TimeDiff, &serde_json::to_string(offset)?)?;
        }
        Ok(written)
    }
}

/// Write `value` only while `key` is absent.
fn fill(store: &StateStore, key: StateKey, value: &str) -> Result<usize> {
    if store.raw().compare_and_swap(key, None, value)? {
        Ok(1)
    } else {
        debug!(%key, "kept newer stored value");
        Ok(0)
    }
}

/// Sending half towards another context.
#[derive(Clone)]
pub struct ContextLink {
    tx: mpsc::Sender<ContextMessage>,
}

pub fn context_channel(capacity: usize) -> (ContextLink, mpsc::Receiver<ContextMessage>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ContextLink { tx }, rx)
}

impl ContextLink {
    /// Ask the other side for its state, giving up after `wait`.
    pub async fn request_data(&self, wait: Duration) -> Option<ContextData> {
        let (reply, rx) = oneshot::channel();
        if self.tx.try_send(ContextMessage::GetData { reply }).is_err() {
            debug!("no context listening for GET_DATA");
            return None;
        }
        match tokio::time::timeout(wait, rx).await {
            Ok(Ok(data)) => Some(data),
            Ok(Err(_)) => None,
            Err(_) => {
                debug!(wait_ms = wait.as_millis() as u64, "GET_DATA timed out");
                None
            }
        }
    }

    /// Push an updated value. Never blocks; a full or closed channel drops it.
    pub fn store_data(&self, key: StateKey, value: String) -> bool {
        match self.tx.try_send(ContextMessage::StoreData { key, value }) {
            Ok(()) => true,
            Err(e) => {
                warn!(%key, "STORE_DATA not delivered: {e}");
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Answer a message addressed to a context whose state lives in `store`.
pub fn answer_from_store(store: &StateStore, msg: ContextMessage) -> Result<Option<StateKey>> {
    match msg {
        ContextMessage::GetData { reply } => {
            let data = ContextData::from_store(store)?;
            // The requester may have given up already.
            let _ = reply.send(data);
            Ok(None)
        }
        ContextMessage::StoreData { key, value } => {
            store.raw().put(key, &value)?;
            Ok(Some(key))
        }
    }
}
