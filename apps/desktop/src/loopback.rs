//! In-process stand-in for the host bridge: confirms sends, echoes them back
//! over the bridge like the host does, and can be told to fail.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use client_core::MessageApi;
use shared::{
    domain::{MessageId, MessageStatus, SessionId},
    protocol::{BridgeEvent, FileUpload, Message, SendRequest, UploadedFileRef},
};
use tokio::sync::broadcast;

pub struct LoopbackHost {
    bridge: broadcast::Sender<BridgeEvent>,
    fail_every: AtomicU64,
    sends: AtomicU64,
    next_id: AtomicU64,
    history: Vec<Message>,
}

impl LoopbackHost {
    pub fn new(fail_every: u64, history: Vec<Message>) -> Self {
        let (bridge, _) = broadcast::channel(256);
        Self {
            bridge,
            fail_every: AtomicU64::new(fail_every),
            sends: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            history,
        }
    }

    pub fn bridge(&self) -> broadcast::Receiver<BridgeEvent> {
        self.bridge.subscribe()
    }

    pub fn set_fail_every(&self, fail_every: u64) {
        self.fail_every.store(fail_every, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageApi for LoopbackHost {
    async fn fetch_page(&self, session_id: &SessionId, limit: u32) -> Result<Vec<Message>> {
        Ok(self
            .history
            .iter()
            .filter(|m| &m.session_id == session_id)
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn send(&self, request: SendRequest) -> Result<Message> {
        let attempt = self.sends.fetch_add(1, Ordering::SeqCst) + 1;
        let fail_every = self.fail_every.load(Ordering::SeqCst);
        if fail_every > 0 && attempt % fail_every == 0 {
            return Err(anyhow!("loopback host dropped send #{attempt}"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let confirmed = Message {
            session_id: request.session_id,
            message_id: MessageId::new(format!("m-{id}")),
            created_at: request.created_at,
            updated_at: request.created_at + 1,
            status: MessageStatus::Sent,
            kind: request.kind,
            content: request.content,
            from_id: request.from_id,
            to_id: request.to_id,
        };
        // The host echoes every accepted message to all listeners, racing the ack.
        let _ = self.bridge.send(BridgeEvent::MessageReceived {
            message: confirmed.clone().into(),
        });
        Ok(confirmed)
    }

    async fn upload_file(&self, upload: FileUpload) -> Result<UploadedFileRef> {
        let metadata = tokio::fs::metadata(&upload.path)
            .await
            .with_context(|| format!("cannot read attachment {}", upload.path.display()))?;
        Ok(UploadedFileRef {
            file_id: format!("f-{}", self.next_id.fetch_add(1, Ordering::SeqCst)),
            file_name: upload.file_name,
            size_bytes: metadata.len(),
            url: None,
        })
    }
}
