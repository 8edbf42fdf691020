use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{MessageId, MessageKind, MessageStatus, SessionId},
    protocol::{BridgeEvent, FileUpload, InboundMessage, Message, SendRequest, UploadedFileRef},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

pub mod config;
pub mod error;
pub mod reconcile;
pub mod store;
pub mod subscription;
pub mod view;

pub use config::{load_settings, load_settings_from, ClientSettings};
pub use error::ClientError;
pub use reconcile::Timeline;
pub use store::{SessionStore, TimelineUpdate};
pub use subscription::Subscription;
pub use view::{SessionView, ViewEffect, ViewHandle};

use reconcile::{
    append_or_replace, discard_failed, mark_failed, matches, merge_page, retry_failed,
};

/// Host-side operations the timeline depends on.
#[async_trait]
pub trait MessageApi: Send + Sync {
    /// Most recent `limit` messages of a session.
    async fn fetch_page(&self, session_id: &SessionId, limit: u32) -> Result<Vec<Message>>;
    async fn send(&self, request: SendRequest) -> Result<Message>;
    async fn upload_file(&self, upload: FileUpload) -> Result<UploadedFileRef>;
}

pub struct MissingMessageApi;

#[async_trait]
impl MessageApi for MissingMessageApi {
    async fn fetch_page(&self, session_id: &SessionId, _limit: u32) -> Result<Vec<Message>> {
        Err(anyhow!("message api unavailable for session {session_id}"))
    }

    async fn send(&self, request: SendRequest) -> Result<Message> {
        Err(anyhow!(
            "message api unavailable for session {}",
            request.session_id
        ))
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<UploadedFileRef> {
        Err(anyhow!(
            "file upload unavailable for {}",
            upload.path.display()
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// One of our own sends was acknowledged by the host.
    MessageConfirmed {
        session_id: SessionId,
        message_id: MessageId,
    },
    SendFailed {
        session_id: SessionId,
        message_id: MessageId,
        reason: String,
    },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct OutgoingDraft {
    pub session_id: SessionId,
    pub to_id: String,
    pub kind: MessageKind,
    pub content: String,
}

impl OutgoingDraft {
    pub fn text(session_id: SessionId, to_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id,
            to_id: to_id.into(),
            kind: MessageKind::Text,
            content: content.into(),
        }
    }
}

type PendingKey = (SessionId, MessageId);

pub struct ChatClient {
    api: Arc<dyn MessageApi>,
    settings: ClientSettings,
    local_user_id: String,
    store: SessionStore,
    events: broadcast::Sender<ClientEvent>,
    last_created_at: AtomicI64,
    /// Attachments whose message failed, kept so a retry can upload again.
    pending_uploads: Mutex<HashMap<PendingKey, FileUpload>>,
}

impl ChatClient {
    pub fn new(local_user_id: impl Into<String>, api: Arc<dyn MessageApi>) -> Arc<Self> {
        Self::new_with_settings(local_user_id, api, ClientSettings::default())
    }

    pub fn new_with_settings(
        local_user_id: impl Into<String>,
        api: Arc<dyn MessageApi>,
        settings: ClientSettings,
    ) -> Arc<Self> {
        let settings = settings.normalized();
        let (events, _) = broadcast::channel(settings.event_capacity);
        Arc::new(Self {
            api,
            store: SessionStore::new(settings.event_capacity),
            settings,
            local_user_id: local_user_id.into(),
            events,
            last_created_at: AtomicI64::new(0),
            pending_uploads: Mutex::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Load the first page of a session and fold it into the cache, keeping
    /// any live updates that arrived first.
    pub async fn open_session(&self, session_id: &SessionId) -> Result<Timeline, ClientError> {
        let page = self
            .api
            .fetch_page(session_id, self.settings.page_size)
            .await
            .with_context(|| format!("failed to load messages for session {session_id}"))?;
        let fetched = page.len();
        let page: Vec<Message> = page
            .into_iter()
            .filter(|message| &message.session_id == session_id)
            .collect();
        if page.len() != fetched {
            warn!(
                session_id = %session_id,
                dropped = fetched - page.len(),
                "page contained messages of other sessions"
            );
        }

        let timeline = self
            .store
            .update(session_id, |current| merge_page(current, page))
            .await;
        debug!(session_id = %session_id, len = timeline.len(), "session opened");
        Ok(timeline)
    }

    pub async fn open_view(
        self: &Arc<Self>,
        session_id: SessionId,
        peer_id: impl Into<String>,
    ) -> Result<SessionView, ClientError> {
        self.open_session(&session_id).await?;
        Ok(SessionView::new(Arc::clone(self), session_id, peer_id.into()))
    }

    pub async fn send(
        &self,
        draft: OutgoingDraft,
        view: Option<&ViewHandle>,
    ) -> Result<Message, ClientError> {
        let placeholder = self.insert_placeholder(draft).await;
        self.deliver(placeholder, view).await
    }

    pub async fn send_file(
        &self,
        session_id: SessionId,
        to_id: impl Into<String>,
        upload: FileUpload,
        view: Option<&ViewHandle>,
    ) -> Result<Message, ClientError> {
        let kind = match upload.mime_type.as_deref() {
            Some(mime) if mime.starts_with("image/") => MessageKind::Image,
            _ => MessageKind::File,
        };
        let placeholder = self
            .insert_placeholder(OutgoingDraft {
                session_id,
                to_id: to_id.into(),
                kind,
                content: upload.file_name.clone(),
            })
            .await;
        self.upload_and_deliver(placeholder, upload, view).await
    }

    /// Re-send a failed message under a fresh placeholder id.
    pub async fn retry(
        &self,
        failed: &Message,
        view: Option<&ViewHandle>,
    ) -> Result<Message, ClientError> {
        let now = self.next_created_at();
        let mut fresh = None;
        self.store
            .update(&failed.session_id, |current| {
                match retry_failed(current, failed, now) {
                    Some((next, placeholder)) => {
                        fresh = Some(placeholder);
                        next
                    }
                    None => Arc::clone(current),
                }
            })
            .await;
        let placeholder =
            fresh.ok_or_else(|| ClientError::NoFailedMessage(failed.message_id.clone()))?;
        info!(
            session_id = %placeholder.session_id,
            failed_id = %failed.message_id,
            message_id = %placeholder.message_id,
            "retrying message"
        );

        let upload = self
            .pending_uploads
            .lock()
            .await
            .remove(&(failed.session_id.clone(), failed.message_id.clone()));
        match upload {
            Some(upload) => self.upload_and_deliver(placeholder, upload, view).await,
            None => self.deliver(placeholder, view).await,
        }
    }

    /// Drop a failed message the user gave up on.
    pub async fn discard(&self, failed: &Message) -> Result<(), ClientError> {
        let mut removed = false;
        self.store
            .update(&failed.session_id, |current| {
                let next = discard_failed(current, failed);
                removed = !Arc::ptr_eq(current, &next);
                next
            })
            .await;
        if !removed {
            return Err(ClientError::NoFailedMessage(failed.message_id.clone()));
        }
        self.pending_uploads
            .lock()
            .await
            .remove(&(failed.session_id.clone(), failed.message_id.clone()));
        Ok(())
    }

    pub async fn handle_bridge_event(&self, event: BridgeEvent) -> Result<(), ClientError> {
        match event {
            BridgeEvent::MessageReceived { message } => {
                let message = validate_inbound(message)?;
                self.apply(message).await;
            }
            BridgeEvent::MessageAcked { message } => {
                let mut message = validate_inbound(message)?;
                if message.status == MessageStatus::Sending {
                    message.status = MessageStatus::Sent;
                }
                self.confirm(message).await;
            }
            BridgeEvent::MessageFailed { message, error } => {
                let message = validate_inbound(message)?;
                self.record_failure(&message, error.message, None).await;
            }
        }
        Ok(())
    }

    /// Feed bridge events into the cache until the returned handle is dropped.
    pub fn attach_bridge(self: &Arc<Self>, mut events: broadcast::Receiver<BridgeEvent>) -> Subscription {
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(err) = client.handle_bridge_event(event).await {
                            let _ = client.events.send(ClientEvent::Error(err.to_string()));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "bridge listener lagged; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::new("bridge", task)
    }

    async fn insert_placeholder(&self, draft: OutgoingDraft) -> Message {
        let created_at = self.next_created_at();
        let placeholder = Message {
            session_id: draft.session_id,
            message_id: MessageId::placeholder(created_at),
            created_at,
            updated_at: created_at,
            status: MessageStatus::Sending,
            kind: draft.kind,
            content: draft.content,
            from_id: self.local_user_id.clone(),
            to_id: draft.to_id,
        };
        self.store
            .update(&placeholder.session_id, |current| {
                append_or_replace(current, placeholder.clone())
            })
            .await;
        placeholder
    }

    async fn deliver(
        &self,
        placeholder: Message,
        view: Option<&ViewHandle>,
    ) -> Result<Message, ClientError> {
        let request = SendRequest {
            session_id: placeholder.session_id.clone(),
            kind: placeholder.kind,
            content: placeholder.content.clone(),
            created_at: placeholder.created_at,
            from_id: placeholder.from_id.clone(),
            to_id: placeholder.to_id.clone(),
        };
        self.deliver_request(&placeholder, request, None, view).await
    }

    async fn deliver_request(
        &self,
        placeholder: &Message,
        request: SendRequest,
        upload: Option<FileUpload>,
        view: Option<&ViewHandle>,
    ) -> Result<Message, ClientError> {
        match self.api.send(request).await {
            Ok(mut confirmed) => {
                // The ack answers this placeholder, whatever the server echoed.
                confirmed.session_id = placeholder.session_id.clone();
                confirmed.created_at = placeholder.created_at;
                if confirmed.status == MessageStatus::Sending {
                    confirmed.status = MessageStatus::Sent;
                }
                self.confirm(confirmed.clone()).await;
                info!(
                    session_id = %confirmed.session_id,
                    placeholder_id = %placeholder.message_id,
                    message_id = %confirmed.message_id,
                    "message confirmed"
                );
                if let Some(view) = view {
                    view.emit(ViewEffect::ScrollToLatest {
                        message_id: confirmed.message_id.clone(),
                    });
                }
                Ok(confirmed)
            }
            Err(source) => {
                self.fail_send(placeholder, format!("{source:#}"), upload, view)
                    .await;
                Err(ClientError::Send {
                    message_id: placeholder.message_id.clone(),
                    source,
                })
            }
        }
    }

    async fn upload_and_deliver(
        &self,
        placeholder: Message,
        upload: FileUpload,
        view: Option<&ViewHandle>,
    ) -> Result<Message, ClientError> {
        let encoded = match self.api.upload_file(upload.clone()).await {
            Ok(uploaded) => encode_file_ref(&uploaded),
            Err(err) => Err(err),
        };
        let content = match encoded {
            Ok(content) => content,
            Err(source) => {
                self.fail_send(&placeholder, format!("{source:#}"), Some(upload), view)
                    .await;
                return Err(ClientError::Upload {
                    message_id: placeholder.message_id,
                    source,
                });
            }
        };

        let request = SendRequest {
            session_id: placeholder.session_id.clone(),
            kind: placeholder.kind,
            content,
            created_at: placeholder.created_at,
            from_id: placeholder.from_id.clone(),
            to_id: placeholder.to_id.clone(),
        };
        self.deliver_request(&placeholder, request, Some(upload), view)
            .await
    }

    async fn apply(&self, message: Message) {
        let session_id = message.session_id.clone();
        self.store
            .update(&session_id, |current| append_or_replace(current, message))
            .await;
    }

    /// Apply an ack of one of our own sends.
    async fn confirm(&self, message: Message) {
        let session_id = message.session_id.clone();
        let message_id = message.message_id.clone();
        self.apply(message).await;
        if message_id.is_confirmed() {
            let _ = self.events.send(ClientEvent::MessageConfirmed {
                session_id,
                message_id,
            });
        }
    }

    /// Record a failed send. An upload is only kept while a failed entry
    /// exists for `retry` or `discard` to pick it up.
    async fn fail_send(
        &self,
        placeholder: &Message,
        reason: String,
        upload: Option<FileUpload>,
        view: Option<&ViewHandle>,
    ) {
        let key = (placeholder.session_id.clone(), placeholder.message_id.clone());
        let retained = upload.is_some();
        if let Some(upload) = upload {
            self.pending_uploads.lock().await.insert(key.clone(), upload);
        }
        let marked = self.record_failure(placeholder, reason, view).await;
        if retained && !marked {
            self.pending_uploads.lock().await.remove(&key);
        }
    }

    /// Returns whether the placeholder is now shown as failed.
    async fn record_failure(
        &self,
        placeholder: &Message,
        reason: String,
        view: Option<&ViewHandle>,
    ) -> bool {
        let mut mark = FailureMark::Missing;
        self.store
            .update(&placeholder.session_id, |current| {
                mark = match current.iter().find(|existing| matches(existing, placeholder)) {
                    None => FailureMark::Missing,
                    Some(existing) if existing.status == MessageStatus::Failed => {
                        FailureMark::AlreadyFailed
                    }
                    Some(_) => FailureMark::Marked,
                };
                mark_failed(current, placeholder)
            })
            .await;

        match mark {
            FailureMark::Missing => {
                debug!(
                    session_id = %placeholder.session_id,
                    message_id = %placeholder.message_id,
                    "failure for a message no longer pending; ignoring"
                );
                return false;
            }
            FailureMark::Marked => {
                warn!(
                    session_id = %placeholder.session_id,
                    message_id = %placeholder.message_id,
                    reason = %reason,
                    "message failed"
                );
                let _ = self.events.send(ClientEvent::SendFailed {
                    session_id: placeholder.session_id.clone(),
                    message_id: placeholder.message_id.clone(),
                    reason: reason.clone(),
                });
            }
            // The bridge got there first and already published the event.
            FailureMark::AlreadyFailed => {
                debug!(
                    session_id = %placeholder.session_id,
                    message_id = %placeholder.message_id,
                    "message already marked failed"
                );
            }
        }

        if let Some(view) = view {
            view.emit(ViewEffect::SendFailed {
                message_id: placeholder.message_id.clone(),
                reason,
            });
        }
        true
    }

    /// Strictly increasing across the client, so no two placeholders of a
    /// session ever share a `created_at`.
    fn next_created_at(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let previous = match self.last_created_at.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |last| Some(now.max(last + 1)),
        ) {
            Ok(previous) | Err(previous) => previous,
        };
        now.max(previous + 1)
    }
}

enum FailureMark {
    Missing,
    Marked,
    AlreadyFailed,
}

fn validate_inbound(message: InboundMessage) -> Result<Message, ClientError> {
    Message::try_from(message).map_err(|err| {
        warn!(error = %err, "rejecting malformed bridge message");
        ClientError::from(err)
    })
}

fn encode_file_ref(uploaded: &UploadedFileRef) -> Result<String> {
    serde_json::to_string(uploaded).context("failed to encode uploaded file reference")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
