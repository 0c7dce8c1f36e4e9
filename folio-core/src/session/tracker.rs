//! Snapshot-based change detection
//!
//! Nothing observes the document objects while the caller holds them;
//! instead, every non-deleted, non-read-only tracked document is
//! re-encoded at flush and compared byte-for-byte against its snapshot.
//! The cost is one re-serialization per tracked document per flush; the
//! gain is that document types need no machinery at all and the contract
//! is deterministic.

use crate::codec::Codec;
use crate::error::Result;
use crate::types::DocumentState;

use super::identity::{FlushKind, IdentityMap};

/// Outcome of a scan: ids needing DML, classified.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    /// State `New`, nothing emitted yet.
    pub new: Vec<i64>,
    /// Snapshot diff found changed bytes (includes in-transaction inserts
    /// mutated again before commit).
    pub modified: Vec<i64>,
    /// State `Deleted`, delete not yet emitted.
    pub deleted: Vec<i64>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Scan the identity map. Re-encodes live objects, stores the fresh bytes
/// on the entry (`pending`) for the flush to consume, and tags entries
/// whose bytes changed as Modified.
pub(crate) fn detect_changes(map: &mut IdentityMap, codec: &dyn Codec) -> Result<ChangeSet> {
    let mut changes = ChangeSet::default();

    for (id, entry) in map.iter_mut() {
        match entry.state {
            DocumentState::Detached => continue,
            DocumentState::Deleted => {
                if matches!(&entry.flushed, Some(f) if f.kind == FlushKind::Delete) {
                    continue;
                }
                changes.deleted.push(id);
                continue;
            }
            DocumentState::New if entry.flushed.is_none() => {
                let (Some(encode), Some(live)) = (entry.encode, entry.live.as_ref()) else {
                    continue;
                };
                let value = encode(live.as_ref())?;
                entry.pending = Some(codec.encode(&value)?);
                changes.new.push(id);
                continue;
            }
            // Clean, Modified, or an in-transaction insert: diff against
            // the effective snapshot.
            _ => {}
        }

        if entry.read_only {
            continue;
        }
        let (Some(encode), Some(live)) = (entry.encode, entry.live.as_ref()) else {
            continue;
        };
        let value = encode(live.as_ref())?;
        let bytes = codec.encode(&value)?;
        // A document revived after an uncommitted delete must be written
        // again even when its bytes match the old snapshot: the row is gone
        // in the open transaction.
        let revived = matches!(&entry.flushed, Some(f) if f.kind == FlushKind::Delete);
        if !revived && entry.effective_snapshot() == Some(bytes.as_slice()) {
            entry.pending = None;
            continue;
        }
        entry.pending = Some(bytes);
        if entry.state == DocumentState::Clean {
            entry.state = DocumentState::Modified;
        }
        changes.modified.push(id);
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::session::identity::{encode_erased, set_id_erased, Entry};
    use crate::types::Document;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Person {
        id: i64,
        name: String,
    }

    impl Document for Person {
        const TYPE: &'static str = "Person";
        fn id(&self) -> i64 {
            self.id
        }
        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    fn tracked(doc: Person, state: DocumentState, snapshot: Option<Vec<u8>>) -> Entry {
        Entry {
            doc_type: Person::TYPE,
            collection: Person::COLLECTION,
            live: Some(Box::new(doc)),
            encode: Some(encode_erased::<Person>),
            set_id: Some(set_id_erased::<Person>),
            snapshot,
            version: 1,
            state,
            read_only: false,
            probe: false,
            pending: None,
            flushed: None,
        }
    }

    fn snapshot_of(doc: &Person) -> Vec<u8> {
        JsonCodec
            .encode(&serde_json::to_value(doc).unwrap())
            .unwrap()
    }

    #[test]
    fn unchanged_clean_documents_produce_no_work() {
        let doc = Person { id: 1, name: "a".into() };
        let snap = snapshot_of(&doc);
        let mut map = IdentityMap::default();
        map.insert(1, tracked(doc, DocumentState::Clean, Some(snap)));

        let changes = detect_changes(&mut map, &JsonCodec).unwrap();
        assert!(changes.is_empty());
        assert_eq!(map.get(1).unwrap().state, DocumentState::Clean);
    }

    #[test]
    fn mutated_documents_are_detected() {
        let original = Person { id: 1, name: "a".into() };
        let snap = snapshot_of(&original);
        let mut map = IdentityMap::default();
        map.insert(
            1,
            tracked(Person { id: 1, name: "b".into() }, DocumentState::Clean, Some(snap)),
        );

        let changes = detect_changes(&mut map, &JsonCodec).unwrap();
        assert_eq!(changes.modified, vec![1]);
        assert_eq!(map.get(1).unwrap().state, DocumentState::Modified);
        assert!(map.get(1).unwrap().pending.is_some());
    }

    #[test]
    fn bytes_equal_mutation_is_not_a_change() {
        // A different instance with identical field values encodes to the
        // same bytes and must not flush.
        let doc = Person { id: 1, name: "same".into() };
        let snap = snapshot_of(&doc);
        let mut map = IdentityMap::default();
        map.insert(
            1,
            tracked(Person { id: 1, name: "same".into() }, DocumentState::Clean, Some(snap)),
        );

        let changes = detect_changes(&mut map, &JsonCodec).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn read_only_documents_are_excluded_from_the_scan() {
        let original = Person { id: 1, name: "a".into() };
        let snap = snapshot_of(&original);
        let mut entry = tracked(
            Person { id: 1, name: "mutated".into() },
            DocumentState::Clean,
            Some(snap),
        );
        entry.read_only = true;
        let mut map = IdentityMap::default();
        map.insert(1, entry);

        let changes = detect_changes(&mut map, &JsonCodec).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn new_and_deleted_are_classified() {
        let mut map = IdentityMap::default();
        map.insert(
            1,
            tracked(Person { id: 1, name: "n".into() }, DocumentState::New, None),
        );
        let mut gone = tracked(Person { id: 2, name: "d".into() }, DocumentState::Deleted, None);
        gone.snapshot = Some(b"old".to_vec());
        map.insert(2, gone);

        let changes = detect_changes(&mut map, &JsonCodec).unwrap();
        assert_eq!(changes.new, vec![1]);
        assert_eq!(changes.deleted, vec![2]);
        assert!(map.get(1).unwrap().pending.is_some());
    }
}
