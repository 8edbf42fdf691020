//! Pure timeline transforms.
//!
//! Every function takes the current [`Timeline`] by reference and hands back a
//! new one; the input is never touched. When nothing changes the same `Arc` is
//! returned, so callers can use [`Arc::ptr_eq`] as a change check.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use shared::{
    domain::{MessageId, MessageStatus},
    protocol::Message,
};

pub type Timeline = Arc<Vec<Message>>;

pub fn empty_timeline() -> Timeline {
    Arc::new(Vec::new())
}

/// Timeline order: `updated_at` ascending, ties broken by `message_id`.
pub fn timeline_order(a: &Message, b: &Message) -> Ordering {
    a.updated_at
        .cmp(&b.updated_at)
        .then_with(|| a.message_id.cmp(&b.message_id))
}

pub fn is_ordered(list: &[Message]) -> bool {
    list.windows(2)
        .all(|pair| timeline_order(&pair[0], &pair[1]) != Ordering::Greater)
}

/// Does `existing` stand for the same logical message as `incoming`?
///
/// Until the server has assigned an id, `(created_at, session_id)` is the only
/// correlation key, so any placeholder with that key matches.
pub fn matches(existing: &Message, incoming: &Message) -> bool {
    existing.created_at == incoming.created_at
        && existing.session_id == incoming.session_id
        && (existing.message_id.is_placeholder() || existing.message_id == incoming.message_id)
}

fn find_match(list: &[Message], incoming: &Message) -> Option<usize> {
    list.iter()
        .position(|existing| matches(existing, incoming))
        .or_else(|| {
            // An echo with a drifted created_at must still not duplicate a
            // confirmed id.
            if !incoming.message_id.is_confirmed() {
                return None;
            }
            list.iter().position(|existing| {
                existing.session_id == incoming.session_id
                    && existing.message_id == incoming.message_id
            })
        })
}

fn sorted(mut list: Vec<Message>) -> Vec<Message> {
    list.sort_by(timeline_order);
    list
}

fn has_stale_copy(list: &[Message], index: usize) -> bool {
    let kept = &list[index];
    kept.message_id.is_confirmed()
        && list.iter().enumerate().any(|(position, existing)| {
            position != index
                && existing.session_id == kept.session_id
                && existing.message_id == kept.message_id
        })
}

/// Replace the entry `incoming` supersedes, or append it, then re-sort.
pub fn append_or_replace(current: &Timeline, incoming: Message) -> Timeline {
    let found = find_match(current, &incoming);
    if let Some(index) = found {
        if current[index] == incoming && !has_stale_copy(current, index) {
            return Arc::clone(current);
        }
    }

    let mut next = current.as_ref().clone();
    let index = match found {
        Some(index) => {
            next[index] = incoming;
            index
        }
        None => {
            next.push(incoming);
            next.len() - 1
        }
    };

    if next[index].message_id.is_confirmed() {
        let session_id = next[index].session_id.clone();
        let message_id = next[index].message_id.clone();
        let mut position = 0;
        next.retain(|existing| {
            let keep = position == index
                || existing.session_id != session_id
                || existing.message_id != message_id;
            position += 1;
            keep
        });
    }

    Arc::new(sorted(next))
}

/// Flag the entry matching `placeholder` as failed. A missing entry means the
/// confirmation already won the race; the timeline comes back untouched.
pub fn mark_failed(current: &Timeline, placeholder: &Message) -> Timeline {
    let Some(index) = current
        .iter()
        .position(|existing| matches(existing, placeholder))
    else {
        return Arc::clone(current);
    };
    if current[index].status == MessageStatus::Failed {
        return Arc::clone(current);
    }

    let mut next = current.as_ref().clone();
    next[index].status = MessageStatus::Failed;
    Arc::new(next)
}

/// Collapse entries sharing a `message_id`. The first occurrence keeps its
/// position; a later duplicate only overwrites its fields when strictly newer.
pub fn dedupe_by_message_id(list: Vec<Message>) -> Vec<Message> {
    let mut positions: HashMap<MessageId, usize> = HashMap::with_capacity(list.len());
    let mut out: Vec<Message> = Vec::with_capacity(list.len());

    for message in list {
        match positions.get(&message.message_id) {
            Some(&index) => {
                if message.updated_at > out[index].updated_at {
                    out[index] = message;
                }
            }
            None => {
                positions.insert(message.message_id.clone(), out.len());
                out.push(message);
            }
        }
    }

    out
}

/// Fold a freshly fetched page into whatever live updates are already cached.
pub fn merge_page(current: &Timeline, page: Vec<Message>) -> Timeline {
    if page.is_empty() {
        return Arc::clone(current);
    }
    // A page may already carry the confirmed form of a pending placeholder.
    let superseded = |existing: &Message| {
        existing.message_id.is_placeholder()
            && page
                .iter()
                .any(|fetched| fetched.message_id.is_confirmed() && matches(existing, fetched))
    };
    let live: Vec<Message> = current
        .iter()
        .filter(|&existing| !superseded(existing))
        .cloned()
        .collect();
    let mut combined = page;
    combined.extend(live);
    Arc::new(sorted(dedupe_by_message_id(combined)))
}

/// Turn the failed entry matching `failed` into a fresh placeholder stamped
/// `now`, keeping its payload. Returns `None` when no failed entry matches.
pub fn retry_failed(current: &Timeline, failed: &Message, now: i64) -> Option<(Timeline, Message)> {
    let index = current.iter().position(|existing| {
        existing.status == MessageStatus::Failed && matches(existing, failed)
    })?;

    let mut placeholder = current[index].clone();
    placeholder.message_id = MessageId::placeholder(now);
    placeholder.created_at = now;
    placeholder.updated_at = now;
    placeholder.status = MessageStatus::Sending;

    let mut next = current.as_ref().clone();
    next[index] = placeholder.clone();
    Some((Arc::new(sorted(next)), placeholder))
}

/// Remove the failed entry matching `failed`. Anything not failed stays.
pub fn discard_failed(current: &Timeline, failed: &Message) -> Timeline {
    let Some(index) = current.iter().position(|existing| {
        existing.status == MessageStatus::Failed && matches(existing, failed)
    }) else {
        return Arc::clone(current);
    };

    let mut next = current.as_ref().clone();
    next.remove(index);
    Arc::new(next)
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
