//! Paginated reads: inbox windows (newest-first reverse scan with an
//! older-than-id cursor) and trace windows over the event logs.
//!
//! Readers take no lock; appends are line-atomic under their writer's lock
//! and a torn tail line is skipped by the reverse scanner.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::core::{AgentId, Envelope, EventRecord};

use super::{StoreResult, TeamStore, acks, jsonl};

#[derive(Clone, Debug, Default)]
pub struct MessagePage {
    /// Oldest first within the page.
    pub messages: Vec<Envelope>,
    pub next_cursor: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct EventPage {
    /// Chronological within the page.
    pub events: Vec<EventRecord>,
    pub next_cursor: Option<String>,
}

/// Window over one agent's inbox. `cursor` names the message id to resume
/// below; an unknown cursor yields an empty page rather than restarting
/// from the top.
pub fn read_window(
    store: &TeamStore,
    agent: &AgentId,
    unread_only: bool,
    limit: usize,
    cursor: Option<&str>,
) -> StoreResult<MessagePage> {
    let acked: BTreeSet<String> = if unread_only {
        acks::load(store).into_keys().collect()
    } else {
        BTreeSet::new()
    };

    let mut started = cursor.is_none();
    let mut cursor_found = cursor.is_none();
    let mut collected: Vec<Envelope> = Vec::new();
    let target = if limit > 0 { Some(limit + 1) } else { None };

    for map in jsonl::ReverseJsonl::open(&store.inbox_path(agent))? {
        let Some(id) = map.get("id").and_then(Value::as_str).map(String::from) else {
            continue;
        };

        if !started {
            if Some(id.as_str()) == cursor {
                started = true;
                cursor_found = true;
            }
            continue;
        }

        if unread_only && acked.contains(&id) {
            continue;
        }
        let Ok(envelope) = serde_json::from_value::<Envelope>(Value::Object(map)) else {
            continue;
        };

        collected.push(envelope);
        if let Some(target) = target
            && collected.len() >= target
        {
            break;
        }
    }

    if cursor.is_some() && !cursor_found {
        return Ok(MessagePage::default());
    }

    let (mut page, has_more) = if limit == 0 {
        (collected, false)
    } else {
        let has_more = collected.len() > limit;
        collected.truncate(limit);
        (collected, has_more)
    };
    page.reverse();

    let next_cursor = if has_more {
        page.first().map(|m| m.id.as_str().to_string())
    } else {
        None
    };
    Ok(MessagePage {
        messages: page,
        next_cursor,
    })
}

fn matches_trace(event: &EventRecord, trace_id: &str) -> bool {
    if event.trace_id.as_deref() == Some(trace_id) {
        return true;
    }
    if event.attr_str("trace_id") == Some(trace_id) {
        return true;
    }
    event
        .attrs
        .get("message")
        .and_then(|m| m.get("trace_id"))
        .and_then(Value::as_str)
        == Some(trace_id)
}

/// Window over the event logs for one trace, newest day files scanned
/// first, page returned in chronological order.
pub fn trace_window(
    store: &TeamStore,
    trace_id: &str,
    limit: usize,
    cursor: Option<&str>,
) -> StoreResult<EventPage> {
    let mut files = store.list_event_files()?;
    files.reverse();

    let mut started = cursor.is_none();
    let mut cursor_found = cursor.is_none();
    let mut collected: Vec<EventRecord> = Vec::new();
    let target = if limit > 0 { Some(limit + 1) } else { None };

    'files: for path in files {
        for map in jsonl::ReverseJsonl::open(&path)? {
            let Ok(event) = serde_json::from_value::<EventRecord>(Value::Object(map)) else {
                continue;
            };

            if !started {
                if Some(event.id.as_str()) == cursor {
                    started = true;
                    cursor_found = true;
                }
                continue;
            }

            if !matches_trace(&event, trace_id) {
                continue;
            }

            collected.push(event);
            if let Some(target) = target
                && collected.len() >= target
            {
                break 'files;
            }
        }
    }

    if cursor.is_some() && !cursor_found {
        return Ok(EventPage::default());
    }

    let (mut page, has_more) = if limit == 0 {
        (collected, false)
    } else {
        let has_more = collected.len() > limit;
        collected.truncate(limit);
        (collected, has_more)
    };
    page.reverse();

    let next_cursor = if has_more {
        page.first().map(|e| e.id.clone())
    } else {
        None
    };
    Ok(EventPage {
        events: page,
        next_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MessageId, MessageType, TeamId};
    use crate::store::inbox;
    use serde_json::Map;

    fn seeded_store(count: usize) -> (tempfile::TempDir, TeamStore, AgentId) {
        let dir = tempfile::tempdir().unwrap();
        let store = TeamStore::open(dir.path(), TeamId::parse("demo").unwrap());
        store.ensure_layout().unwrap();
        let dev = AgentId::parse("dev").unwrap();
        for i in 0..count {
            let mut env = Envelope::new(
                MessageType::IdleNotification,
                AgentId::parse("lead").unwrap(),
                dev.clone(),
                Map::new(),
            );
            env.id = MessageId::parse(format!("msg_{i:03}")).unwrap();
            inbox::append_message(&store, &env).unwrap();
        }
        (dir, store, dev)
    }

    #[test]
    fn pages_walk_backwards_through_the_inbox() {
        let (_dir, store, dev) = seeded_store(5);

        let first = read_window(&store, &dev, false, 2, None).unwrap();
        let ids: Vec<&str> = first.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["msg_003", "msg_004"]);
        assert_eq!(first.next_cursor.as_deref(), Some("msg_003"));

        let second = read_window(&store, &dev, false, 2, first.next_cursor.as_deref()).unwrap();
        let ids: Vec<&str> = second.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["msg_001", "msg_002"]);

        let third = read_window(&store, &dev, false, 2, second.next_cursor.as_deref()).unwrap();
        let ids: Vec<&str> = third.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["msg_000"]);
        assert!(third.next_cursor.is_none());
    }

    #[test]
    fn unknown_cursor_yields_empty_page() {
        let (_dir, store, dev) = seeded_store(3);
        let page = read_window(&store, &dev, false, 2, Some("msg_999")).unwrap();
        assert!(page.messages.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn unread_filter_consults_ack_index() {
        let (_dir, store, dev) = seeded_store(3);
        acks::record(
            &store,
            acks::AckRecord {
                message_id: MessageId::parse("msg_001").unwrap(),
                acked_by: dev.clone(),
                acked_at: crate::core::Timestamp::now(),
                trace_id: None,
            },
        )
        .unwrap();

        let page = read_window(&store, &dev, true, 0, None).unwrap();
        let ids: Vec<&str> = page.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["msg_000", "msg_002"]);
    }
}
