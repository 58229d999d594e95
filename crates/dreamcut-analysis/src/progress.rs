//! Per-query progress events and the in-process broadcaster that fans them
//! out to live subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Buffered events per subscriber before the slowest one starts lagging.
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Init,
    Analyzing,
    Merging,
    Complete,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Analyzing => "analyzing",
            Stage::Merging => "merging",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Failed)
    }
}

/// Outcome of one asset, attached to `analyzing` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetProgress {
    pub asset_id: String,
    pub success: bool,
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub query_id: String,
    pub stage: Stage,
    pub message: String,
    /// Fraction of the run completed, 0.0 to 1.0.
    pub progress: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<AssetProgress>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(
        query_id: impl Into<String>,
        stage: Stage,
        message: impl Into<String>,
        progress: f32,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            stage,
            message: message.into(),
            progress: progress.clamp(0.0, 1.0),
            asset: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_asset(mut self, asset: AssetProgress) -> Self {
        self.asset = Some(asset);
        self
    }
}

/// Channel name subscribers use for one query.
pub fn channel_name(query_id: &str) -> String {
    format!("analysis:{query_id}")
}

/// Fire-and-forget sink for progress events.
///
/// Implementations must never block the pipeline or surface delivery errors.
pub trait ProgressPublisher: Send + Sync {
    fn publish(&self, query_id: &str, event: ProgressEvent);
}

impl<T: ProgressPublisher + ?Sized> ProgressPublisher for Arc<T> {
    fn publish(&self, query_id: &str, event: ProgressEvent) {
        (**self).publish(query_id, event)
    }
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl ProgressPublisher for NoopPublisher {
    fn publish(&self, _query_id: &str, _event: ProgressEvent) {}
}

/// In-process broadcaster keyed by query id.
///
/// Events published while nobody is subscribed are dropped; there is no
/// replay. A terminal event closes the query's channel after delivery.
#[derive(Clone, Default)]
pub struct RealtimeHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>>,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for `query_id` from this point forward.
    pub fn subscribe(&self, query_id: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(query_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, query_id: &str) -> usize {
        self.channels
            .lock()
            .ok()
            .and_then(|c| c.get(query_id).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Drop the channel for a query, closing any open subscriptions.
    pub fn close(&self, query_id: &str) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.remove(query_id);
        }
    }

    /// Drop the channel for a query once its last receiver is gone.
    pub fn close_if_idle(&self, query_id: &str) {
        let Ok(mut channels) = self.channels.lock() else {
            return;
        };
        if channels.get(query_id).is_some_and(|tx| tx.receiver_count() == 0) {
            channels.remove(query_id);
        }
    }

    pub fn is_open(&self, query_id: &str) -> bool {
        self.channels
            .lock()
            .map(|c| c.contains_key(query_id))
            .unwrap_or(false)
    }
}

impl ProgressPublisher for RealtimeHub {
    fn publish(&self, query_id: &str, event: ProgressEvent) {
        let terminal = event.stage.is_terminal();
        let Ok(mut channels) = self.channels.lock() else {
            return;
        };
        if let Some(tx) = channels.get(query_id) {
            // An error only means every receiver has gone away.
            if tx.send(event).is_err() {
                tracing::trace!(query_id, "no live subscribers");
            }
        }
        if terminal {
            channels.remove(query_id);
        }
    }
}
