//! Event log writer: deduped appends to the per-UTC-day JSONL file.

use crate::core::EventRecord;

use super::index::{EventLocator, ShardedIndex};
use super::lock::{LockResource, with_lock};
use super::{StoreResult, TeamStore, atomic, jsonl};

/// Append `event` to its day file unless the id is already indexed.
/// Returns true when the event was written.
pub fn append_event(store: &TeamStore, event: &EventRecord) -> StoreResult<bool> {
    let path = store.event_path(&event.ts.day());
    let index = ShardedIndex::events(store);

    with_lock(store, LockResource::Events, || {
        if index.has::<EventLocator>(&event.id) {
            return Ok(false);
        }
        let (offset, _line) = atomic::append_jsonl(&path, event)?;
        index.put(
            &event.id,
            EventLocator {
                file: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                offset,
            },
        )?;
        Ok(true)
    })
}

/// All decodable events across day files, oldest file first, log order
/// within a file. Lines that fail to decode as events are skipped.
pub fn read_all(store: &TeamStore) -> StoreResult<Vec<EventRecord>> {
    let mut events = Vec::new();
    for path in store.list_event_files()? {
        let outcome = jsonl::read_objects(&path)?;
        for record in outcome.records {
            if let Ok(event) =
                serde_json::from_value::<EventRecord>(serde_json::Value::Object(record.value))
            {
                events.push(event);
            }
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EventKind, TeamId, Timestamp};

    #[test]
    fn events_land_in_their_day_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = TeamStore::open(dir.path(), TeamId::parse("demo").unwrap());
        store.ensure_layout().unwrap();

        let event = EventRecord::new(EventKind::Sent)
            .at(Timestamp::parse("2025-03-04T12:00:00Z").unwrap())
            .subject("msg_1");

        assert!(append_event(&store, &event).unwrap());
        assert!(!append_event(&store, &event).unwrap());

        let body = std::fs::read_to_string(store.event_path("2025-03-04")).unwrap();
        assert_eq!(body.lines().count(), 1);

        let all = read_all(&store).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, event.id);
    }
}
