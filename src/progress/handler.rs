//! Progress handler trait and events

use crate::batch::BatchId;
use crate::unit::{AggregateKey, UnitId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Events emitted while a file moves through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted {
        file: String,
        units: usize,
        batches: usize,
        at: DateTime<Utc>,
    },

    /// A unit's summary is durable and its completion signal has fired
    UnitApplied {
        file: String,
        unit_id: UnitId,
        batch_id: BatchId,
        degraded: bool,
        at: DateTime<Utc>,
    },

    BatchApplied {
        file: String,
        batch_id: BatchId,
        units: usize,
        degraded: bool,
        at: DateTime<Utc>,
    },

    AggregateFinalized {
        file: String,
        key: AggregateKey,
        name: String,
        success: bool,
        at: DateTime<Utc>,
    },

    RunCompleted {
        file: String,
        applied_batches: usize,
        degraded_batches: usize,
        duration: Duration,
        at: DateTime<Utc>,
    },

    RunFailed {
        file: String,
        error: String,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    RunStarted,
    UnitApplied,
    BatchApplied,
    AggregateFinalized,
    RunCompleted,
    RunFailed,
}

impl ProgressEvent {
    pub fn kind(&self) -> ProgressKind {
        match self {
            ProgressEvent::RunStarted { .. } => ProgressKind::RunStarted,
            ProgressEvent::UnitApplied { .. } => ProgressKind::UnitApplied,
            ProgressEvent::BatchApplied { .. } => ProgressKind::BatchApplied,
            ProgressEvent::AggregateFinalized { .. } => ProgressKind::AggregateFinalized,
            ProgressEvent::RunCompleted { .. } => ProgressKind::RunCompleted,
            ProgressEvent::RunFailed { .. } => ProgressKind::RunFailed,
        }
    }

    /// Identifies the subject of the event: `file`, `file#batch`, `file:u3` or `file:a1`
    pub fn key(&self) -> String {
        match self {
            ProgressEvent::UnitApplied { file, unit_id, .. } => format!("{}:{}", file, unit_id),
            ProgressEvent::BatchApplied { file, batch_id, .. } => format!("{}{}", file, batch_id),
            ProgressEvent::AggregateFinalized { file, key, .. } => format!("{}:{}", file, key),
            ProgressEvent::RunStarted { file, .. }
            | ProgressEvent::RunCompleted { file, .. }
            | ProgressEvent::RunFailed { file, .. } => file.clone(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ProgressEvent::RunStarted { at, .. }
            | ProgressEvent::UnitApplied { at, .. }
            | ProgressEvent::BatchApplied { at, .. }
            | ProgressEvent::AggregateFinalized { at, .. }
            | ProgressEvent::RunCompleted { at, .. }
            | ProgressEvent::RunFailed { at, .. } => *at,
        }
    }

    pub fn file(&self) -> &str {
        match self {
            ProgressEvent::RunStarted { file, .. }
            | ProgressEvent::UnitApplied { file, .. }
            | ProgressEvent::BatchApplied { file, .. }
            | ProgressEvent::AggregateFinalized { file, .. }
            | ProgressEvent::RunCompleted { file, .. }
            | ProgressEvent::RunFailed { file, .. } => file,
        }
    }
}

/// Receives progress events; called inline from pipeline tasks, so keep it cheap
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

/// Forwards events to an unbounded channel; a dropped receiver is ignored
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressHandler for ChannelHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        let _ = self.tx.send(event.clone());
    }
}

/// Keeps every event in memory, in emission order
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn of_kind(&self, kind: ProgressKind) -> Vec<ProgressEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.kind() == kind)
            .collect()
    }
}

impl ProgressHandler for RecordingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}
