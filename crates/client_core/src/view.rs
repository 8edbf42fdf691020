//! A mounted observer of one session's timeline.
//!
//! Sends started from a view keep running after the view is closed; their
//! results still land in the store, but view effects are only delivered while
//! the view is mounted.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use futures::{Stream, StreamExt};
use shared::{
    domain::{MessageId, SessionId},
    protocol::{FileUpload, Message},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::debug;

use crate::{reconcile::Timeline, ChatClient, ClientError, OutgoingDraft, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEffect {
    ScrollToLatest { message_id: MessageId },
    SendFailed { message_id: MessageId, reason: String },
}

/// Cloneable link from an in-flight operation back to the view that started it.
#[derive(Clone)]
pub struct ViewHandle {
    session_id: SessionId,
    mounted: Arc<AtomicBool>,
    effects: mpsc::UnboundedSender<ViewEffect>,
}

impl ViewHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Returns whether the effect reached the view.
    pub fn emit(&self, effect: ViewEffect) -> bool {
        if !self.is_mounted() {
            debug!(session_id = %self.session_id, ?effect, "view closed; effect dropped");
            return false;
        }
        self.effects.send(effect).is_ok()
    }
}

pub struct SessionView {
    client: Arc<ChatClient>,
    session_id: SessionId,
    peer_id: String,
    handle: ViewHandle,
    effects: mpsc::UnboundedReceiver<ViewEffect>,
}

impl SessionView {
    pub(crate) fn new(client: Arc<ChatClient>, session_id: SessionId, peer_id: String) -> Self {
        let (tx, effects) = mpsc::unbounded_channel();
        let handle = ViewHandle {
            session_id: session_id.clone(),
            mounted: Arc::new(AtomicBool::new(true)),
            effects: tx,
        };
        Self {
            client,
            session_id,
            peer_id,
            handle,
            effects,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn handle(&self) -> ViewHandle {
        self.handle.clone()
    }

    pub fn is_mounted(&self) -> bool {
        self.handle.is_mounted()
    }

    /// Tear the view down. In-flight sends finish, but no longer emit effects.
    pub fn close(&self) {
        if self.handle.mounted.swap(false, Ordering::AcqRel) {
            debug!(session_id = %self.session_id, "view closed");
        }
    }

    pub async fn timeline(&self) -> Timeline {
        self.client.store().get(&self.session_id).await
    }

    pub fn send_text(&self, content: impl Into<String>) -> JoinHandle<Result<Message, ClientError>> {
        let draft = OutgoingDraft::text(self.session_id.clone(), self.peer_id.clone(), content);
        let client = Arc::clone(&self.client);
        let handle = self.handle.clone();
        tokio::spawn(async move { client.send(draft, Some(&handle)).await })
    }

    pub fn send_file(&self, upload: FileUpload) -> JoinHandle<Result<Message, ClientError>> {
        let client = Arc::clone(&self.client);
        let handle = self.handle.clone();
        let session_id = self.session_id.clone();
        let peer_id = self.peer_id.clone();
        tokio::spawn(async move {
            client
                .send_file(session_id, peer_id, upload, Some(&handle))
                .await
        })
    }

    pub fn retry(&self, failed: Message) -> JoinHandle<Result<Message, ClientError>> {
        let client = Arc::clone(&self.client);
        let handle = self.handle.clone();
        tokio::spawn(async move { client.retry(&failed, Some(&handle)).await })
    }

    pub async fn next_effect(&mut self) -> Option<ViewEffect> {
        self.effects.recv().await
    }

    pub fn try_next_effect(&mut self) -> Option<ViewEffect> {
        self.effects.try_recv().ok()
    }

    /// Timelines of this session as they change. A lagging reader skips ahead
    /// to the current snapshot.
    pub fn updates(&self) -> impl Stream<Item = Timeline> + Send + 'static {
        let client = Arc::clone(&self.client);
        let session_id = self.session_id.clone();
        BroadcastStream::new(self.client.store().subscribe()).filter_map(move |item| {
            let client = Arc::clone(&client);
            let session_id = session_id.clone();
            async move {
                match item {
                    Ok(update) if update.session_id == session_id => Some(update.timeline),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        debug!(session_id = %session_id, skipped, "timeline updates lagged");
                        Some(client.store().get(&session_id).await)
                    }
                }
            }
        })
    }

    /// Run `on_change` for every new timeline until the subscription is dropped.
    pub fn watch<F>(&self, mut on_change: F) -> Subscription
    where
        F: FnMut(Timeline) + Send + 'static,
    {
        let updates = self.updates();
        let task = tokio::spawn(async move {
            futures::pin_mut!(updates);
            while let Some(timeline) = updates.next().await {
                on_change(timeline);
            }
        });
        Subscription::new("timeline", task)
    }
}

impl Drop for SessionView {
    fn drop(&mut self) {
        self.close();
    }
}
