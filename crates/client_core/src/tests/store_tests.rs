use super::*;
use crate::reconcile::append_or_replace;
use shared::{
    domain::{MessageId, MessageKind, MessageStatus},
    protocol::Message,
};

fn message(session: &str, id: &str, at: i64) -> Message {
    Message {
        session_id: SessionId::from(session),
        message_id: MessageId::from(id),
        created_at: at,
        updated_at: at,
        status: MessageStatus::Sent,
        kind: MessageKind::Text,
        content: String::new(),
        from_id: String::new(),
        to_id: String::new(),
    }
}

#[tokio::test]
async fn missing_session_reads_as_empty() {
    let store = SessionStore::default();
    assert!(store.get(&SessionId::from("nobody")).await.is_empty());
    assert!(store.sessions().await.is_empty());
}

#[tokio::test]
async fn update_publishes_new_timeline() {
    let store = SessionStore::new(16);
    let mut updates = store.subscribe();
    let session = SessionId::from("S");

    let next = store
        .update(&session, |t| append_or_replace(t, message("S", "m-1", 1)))
        .await;

    let update = updates.recv().await.expect("update");
    assert_eq!(update.session_id, session);
    assert!(Arc::ptr_eq(&update.timeline, &next));
    assert!(Arc::ptr_eq(&store.get(&session).await, &next));
}

#[tokio::test]
async fn unchanged_timeline_is_not_published() {
    let store = SessionStore::new(16);
    let session = SessionId::from("S");
    store
        .set(&session, Arc::new(vec![message("S", "m-1", 1)]))
        .await;

    let mut updates = store.subscribe();
    store.update(&session, Arc::clone).await;

    assert!(matches!(
        updates.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn replayed_record_is_not_published() {
    let store = SessionStore::new(16);
    let session = SessionId::from("S");
    store
        .update(&session, |t| append_or_replace(t, message("S", "m-1", 1)))
        .await;

    let mut updates = store.subscribe();
    store
        .update(&session, |t| append_or_replace(t, message("S", "m-1", 1)))
        .await;

    assert!(matches!(
        updates.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn sessions_are_isolated() {
    let store = SessionStore::new(16);
    let a = SessionId::from("A");
    let b = SessionId::from("B");
    store
        .update(&a, |t| append_or_replace(t, message("A", "m-1", 1)))
        .await;
    store
        .update(&b, |t| append_or_replace(t, message("B", "m-1", 1)))
        .await;

    assert_eq!(store.get(&a).await.len(), 1);
    assert_eq!(store.get(&b).await.len(), 1);
    assert_eq!(store.sessions().await, vec![a, b]);
}

#[tokio::test]
async fn invalidate_drops_slot_and_notifies() {
    let store = SessionStore::new(16);
    let session = SessionId::from("S");
    store
        .set(&session, Arc::new(vec![message("S", "m-1", 1)]))
        .await;
    let mut updates = store.subscribe();

    store.invalidate(&session).await;

    assert!(store.get(&session).await.is_empty());
    let update = updates.recv().await.expect("update");
    assert!(update.timeline.is_empty());
}

#[tokio::test]
async fn concurrent_updates_are_all_applied() {
    let store = Arc::new(SessionStore::new(256));
    let session = SessionId::from("S");

    let mut tasks = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            store
                .update(&session, |t| {
                    append_or_replace(t, message("S", &format!("m-{i:02}"), i))
                })
                .await;
        }));
    }
    for task in tasks {
        task.await.expect("join");
    }

    let timeline = store.get(&session).await;
    assert_eq!(timeline.len(), 32);
    assert!(crate::reconcile::is_ordered(&timeline));
}
