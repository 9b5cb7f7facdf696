use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    TableUpdated,
    SessionUpdated,
    ReservationUpdated,
    ReservationCreated,
    BlackoutStarted,
    BlackoutEnded,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::TableUpdated => "TABLE_UPDATED",
            EventKind::SessionUpdated => "SESSION_UPDATED",
            EventKind::ReservationUpdated => "RESERVATION_UPDATED",
            EventKind::ReservationCreated => "RESERVATION_CREATED",
            EventKind::BlackoutStarted => "BLACKOUT_STARTED",
            EventKind::BlackoutEnded => "BLACKOUT_ENDED",
        }
    }
}

/// Wire envelope: `{"event": "TABLE_UPDATED", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub event: EventKind,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn to_json(&self) -> String {
        // Serializing a Value-backed struct cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub struct Subscription {
    pub id: Ulid,
    pub rx: mpsc::Receiver<Notification>,
}

/// Fan-out hub for state-change notifications.
///
/// Delivery is at-most-once: a subscriber whose buffer is full misses the
/// notification, and a subscriber whose receiver is gone is dropped.
pub struct Broadcaster {
    subscribers: DashMap<Ulid, mpsc::Sender<Notification>>,
    capacity: usize,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Ulid::new();
        self.subscribers.insert(id, tx);
        self.update_gauge();
        Subscription { id, rx }
    }

    /// Returns false if the subscription was already gone.
    pub fn unsubscribe(&self, id: &Ulid) -> bool {
        let removed = self.subscribers.remove(id).is_some();
        self.update_gauge();
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Serialize `payload` and send it to every subscriber. Returns how many
    /// subscribers accepted it. No-op if nobody is listening.
    pub fn publish<T: Serialize>(&self, kind: EventKind, payload: &T) -> usize {
        if self.subscribers.is_empty() {
            return 0;
        }
        let data = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("dropping {} notification: {e}", kind.as_str());
                return 0;
            }
        };
        let note = Notification { event: kind, data };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(note.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    metrics::counter!(crate::observability::BROADCAST_DROPPED_TOTAL).increment(1);
                    tracing::debug!("subscriber {} lagging, dropped {}", entry.key(), kind.as_str());
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        if !closed.is_empty() {
            for id in &closed {
                self.subscribers.remove(id);
            }
            self.update_gauge();
        }
        delivered
    }

    fn update_gauge(&self) {
        metrics::gauge!(crate::observability::BROADCAST_SUBSCRIBERS).set(self.subscribers.len() as f64);
    }
}
