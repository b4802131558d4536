//! The per-stream finite-state automaton (§4.3). Each stream is owned by
//! exactly one actor task; this module exposes the registry that hands out
//! handles to it and the message types used to talk to it.

mod actor;

pub use actor::{run_stream_actor, StreamContext};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_protocol::StreamState;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

/// The externally-observable state of a stream, published by its actor on
/// every transition.
#[derive(Debug, Clone)]
pub struct StreamSnapshot {
    pub state: StreamState,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub producer_ref: Option<Uuid>,
    pub sfu_producer_id: Option<String>,
    pub sfu_transport_id: Option<String>,
    pub assigned_port: Option<u16>,
    pub captured_ssrc: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

impl StreamSnapshot {
    pub fn initializing() -> Self {
        Self {
            state: StreamState::Initializing,
            last_error: None,
            retry_count: 0,
            producer_ref: None,
            sfu_producer_id: None,
            sfu_transport_id: None,
            assigned_port: None,
            captured_ssrc: None,
            started_at: None,
        }
    }
}

/// Messages delivered to a stream actor's single mailbox, in order:
/// operator commands and health-monitor ticks. Transcoder and SFU events
/// are observed by the actor directly off their own channels (see
/// `run_live`), since both are already per-stream; only cross-cutting
/// signals go through the mailbox (§5 ordering guarantee).
pub enum Mailbox {
    Stop { reply: oneshot::Sender<()> },
    HealthTick { media_flowing: bool },
}

pub struct StreamHandle {
    pub stream_id: Uuid,
    pub device_id: Uuid,
    mailbox: mpsc::Sender<Mailbox>,
    snapshot: watch::Receiver<StreamSnapshot>,
}

impl StreamHandle {
    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn snapshot_watch(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshot.clone()
    }

    pub async fn send(&self, msg: Mailbox) {
        let _ = self.mailbox.send(msg).await;
    }

    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.mailbox.send(Mailbox::Stop { reply: tx }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Keyed by both `stream_id` and `device_id`. The `device_active` map is
/// the compare-and-insert guard enforcing "at most one non-terminal Stream
/// per Device" (§3, §5).
pub struct StreamRegistry {
    streams: DashMap<Uuid, Arc<StreamHandle>>,
    device_active: DashMap<Uuid, Uuid>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            streams: DashMap::new(),
            device_active: DashMap::new(),
        }
    }

    pub fn get(&self, stream_id: Uuid) -> Option<Arc<StreamHandle>> {
        self.streams.get(&stream_id).map(|e| e.value().clone())
    }

    pub fn active_for_device(&self, device_id: Uuid) -> Option<Arc<StreamHandle>> {
        let stream_id = *self.device_active.get(&device_id)?;
        self.get(stream_id)
    }

    /// Attempts to register a brand-new active stream for `device_id`.
    /// Returns `Err(existing_handle)` if one is already registered, without
    /// mutating anything — the caller treats that as the `reconnect` path.
    pub fn try_activate(
        &self,
        device_id: Uuid,
        stream_id: Uuid,
        mailbox: mpsc::Sender<Mailbox>,
        snapshot: watch::Receiver<StreamSnapshot>,
    ) -> Result<Arc<StreamHandle>, Arc<StreamHandle>> {
        match self.device_active.entry(device_id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                let existing_id = *entry.get();
                Err(self.get(existing_id).expect("active device mapping with no stream handle"))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let handle = Arc::new(StreamHandle {
                    stream_id,
                    device_id,
                    mailbox,
                    snapshot,
                });
                entry.insert(stream_id);
                self.streams.insert(stream_id, handle.clone());
                Ok(handle)
            }
        }
    }

    /// Called when a stream reaches a terminal state so the device slot
    /// frees up for a future `start_stream`.
    pub fn deactivate(&self, device_id: Uuid) {
        self.device_active.remove(&device_id);
    }

    pub fn remove(&self, stream_id: Uuid) {
        self.streams.remove(&stream_id);
    }

    pub fn all(&self) -> Vec<Arc<StreamHandle>> {
        self.streams.iter().map(|e| e.value().clone()).collect()
    }
}
