//! Pipeline lifecycle events and the listener set they fan out to.
//!
//! Delivery is best effort: each listener owns an unbounded channel, a send
//! to a closed channel drops that listener, and nothing is replayed.

pub mod sse;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::db::achievements::DiscoveryRow;
use crate::discovery::{RunScope, RunSummary};
use crate::run_state::RunStatus;

/// What a freshly connected client sees first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: RunStatus,
    pub schedule_enabled: bool,
    pub discoveries_today: i64,
    pub active_sources: i64,
    pub run_count: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_scheduled_run: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Status(StatusSnapshot),
    Heartbeat {
        status: RunStatus,
        timestamp: DateTime<Utc>,
    },
    PipelineStarted {
        scope: RunScope,
        timestamp: DateTime<Utc>,
    },
    PipelineCompleted {
        summary: RunSummary,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
    },
    PipelineError {
        message: String,
        summary: Option<RunSummary>,
        timestamp: DateTime<Utc>,
    },
    NewDiscovery(DiscoveryRow),
}

impl PipelineEvent {
    /// Event name on the push channel.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineEvent::Status(_) => "status",
            PipelineEvent::Heartbeat { .. } => "heartbeat",
            PipelineEvent::PipelineStarted { .. } => "pipeline_started",
            PipelineEvent::PipelineCompleted { .. } => "pipeline_completed",
            PipelineEvent::PipelineError { .. } => "pipeline_error",
            PipelineEvent::NewDiscovery(_) => "new_discovery",
        }
    }
}

type ListenerMap = HashMap<u64, UnboundedSender<PipelineEvent>>;

#[derive(Clone, Default)]
pub struct Broadcaster {
    listeners: Arc<Mutex<ListenerMap>>,
    next_id: Arc<AtomicU64>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, ListenerMap> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.listeners.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Register a listener. `snapshot`, if any, is queued before anything else.
    pub fn connect(&self, snapshot: Option<PipelineEvent>) -> Listener {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = unbounded_channel();
        if let Some(ev) = snapshot {
            // rx is alive here, so this cannot fail
            let _ = tx.send(ev);
        }
        let count = {
            let mut map = self.map();
            map.insert(id, tx);
            map.len()
        };
        tracing::debug!(listener = id, listeners = count, "listener connected");
        Listener {
            id,
            rx,
            owner: self.clone(),
        }
    }

    pub fn disconnect(&self, id: u64) {
        if self.map().remove(&id).is_some() {
            tracing::debug!(listener = id, "listener disconnected");
        }
    }

    /// Deliver to every listener; closed ones are dropped. Returns the number
    /// of listeners reached.
    pub fn broadcast(&self, event: PipelineEvent) -> usize {
        let mut map = self.map();
        map.retain(|id, tx| {
            let ok = tx.send(event.clone()).is_ok();
            if !ok {
                tracing::debug!(listener = *id, "dropping closed listener");
            }
            ok
        });
        map.len()
    }

    pub fn listener_count(&self) -> usize {
        self.map().len()
    }
}

/// Receiving end for one client. Dropping it disconnects.
pub struct Listener {
    id: u64,
    rx: UnboundedReceiver<PipelineEvent>,
    owner: Broadcaster,
}

impl Listener {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PipelineEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.owner.disconnect(self.id);
    }
}
