//! Per-client timeline cache keyed by session.

use std::{collections::HashMap, sync::Arc};

use shared::domain::SessionId;
use tokio::sync::{broadcast, Mutex};

use crate::reconcile::{empty_timeline, Timeline};

#[derive(Debug, Clone)]
pub struct TimelineUpdate {
    pub session_id: SessionId,
    pub timeline: Timeline,
}

/// Owns the authoritative timeline of every cached session. Transforms run
/// under one mutex so two updates never race on the same list.
pub struct SessionStore {
    slots: Mutex<HashMap<SessionId, Timeline>>,
    updates: broadcast::Sender<TimelineUpdate>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            slots: Mutex::new(HashMap::new()),
            updates,
        }
    }

    pub async fn get(&self, session_id: &SessionId) -> Timeline {
        self.slots
            .lock()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_else(empty_timeline)
    }

    pub async fn set(&self, session_id: &SessionId, timeline: Timeline) {
        self.update(session_id, |_| timeline).await;
    }

    /// Apply `transform` to the session's timeline atomically and return the
    /// result. Subscribers hear about it only if the timeline changed.
    pub async fn update<F>(&self, session_id: &SessionId, transform: F) -> Timeline
    where
        F: FnOnce(&Timeline) -> Timeline,
    {
        let mut slots = self.slots.lock().await;
        let current = slots
            .get(session_id)
            .cloned()
            .unwrap_or_else(empty_timeline);
        let next = transform(&current);
        if Arc::ptr_eq(&current, &next) {
            return next;
        }

        slots.insert(session_id.clone(), Arc::clone(&next));
        // Publishing while still holding the lock keeps update order equal to
        // store order.
        let _ = self.updates.send(TimelineUpdate {
            session_id: session_id.clone(),
            timeline: Arc::clone(&next),
        });
        next
    }

    pub async fn invalidate(&self, session_id: &SessionId) {
        let removed = self.slots.lock().await.remove(session_id).is_some();
        if removed {
            let _ = self.updates.send(TimelineUpdate {
                session_id: session_id.clone(),
                timeline: empty_timeline(),
            });
        }
    }

    pub async fn sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.slots.lock().await.keys().cloned().collect();
        sessions.sort();
        sessions
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TimelineUpdate> {
        self.updates.subscribe()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
