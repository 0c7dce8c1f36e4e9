//! Per-session identity map
//!
//! One entry per tracked document, keyed by id alone — ids are unique
//! across the store, so the type tag lives on the entry and id-only lookup
//! (the query hydration path) needs no second map. Entries hold the live
//! boxed object, the snapshot for change detection, the persisted version
//! for the compare-and-set update, and erased function pointers that give
//! the session typed access without knowing the type.
//!
//! The map is intra-session only; nothing here survives the session.

use std::any::Any;
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{Document, DocumentState};

/// Re-encode the live object as JSON; monomorphized per document type at
/// save/load time.
pub(crate) type EncodeFn = fn(&(dyn Any + Send)) -> Result<serde_json::Value>;

/// Write an assigned id back into the live object.
pub(crate) type SetIdFn = fn(&mut (dyn Any + Send), i64);

pub(crate) fn encode_erased<T: Document>(any: &(dyn Any + Send)) -> Result<serde_json::Value> {
    let doc = any
        .downcast_ref::<T>()
        .ok_or_else(|| Error::Configuration("identity map entry holds a different type".to_string()))?;
    Ok(serde_json::to_value(doc)?)
}

pub(crate) fn set_id_erased<T: Document>(any: &mut (dyn Any + Send), id: i64) {
    if let Some(doc) = any.downcast_mut::<T>() {
        doc.set_id(id);
    }
}

/// DML already emitted for this entry inside the open, uncommitted
/// transaction. Committed state moves into the entry proper on commit;
/// rollback just drops this.
#[derive(Debug)]
pub(crate) struct FlushState {
    pub kind: FlushKind,
    pub bytes: Option<Vec<u8>>,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushKind {
    Insert,
    Update,
    Delete,
}

/// A tracked document.
pub(crate) struct Entry {
    pub doc_type: &'static str,
    pub collection: &'static str,
    /// The live object; absent for delete stubs of untracked ids.
    pub live: Option<Box<dyn Any + Send>>,
    pub encode: Option<EncodeFn>,
    pub set_id: Option<SetIdFn>,
    /// Encoded payload at load or last flush.
    pub snapshot: Option<Vec<u8>>,
    /// Persisted `Version`; zero means no row is known to exist.
    pub version: i64,
    pub state: DocumentState,
    /// Excluded from the mutation scan.
    pub read_only: bool,
    /// Saved or deleted with an explicit id the session never loaded;
    /// existence is resolved at flush.
    pub probe: bool,
    /// Fresh encoding produced by the change scan, consumed by the flush.
    pub pending: Option<Vec<u8>>,
    pub flushed: Option<FlushState>,
}

impl Entry {
    /// The bytes the next diff compares against: what the open transaction
    /// wrote if anything, else the committed snapshot.
    pub fn effective_snapshot(&self) -> Option<&[u8]> {
        match &self.flushed {
            Some(f) if f.bytes.is_some() => f.bytes.as_deref(),
            _ => self.snapshot.as_deref(),
        }
    }

    /// The version the next compare-and-set must match.
    pub fn effective_version(&self) -> i64 {
        match &self.flushed {
            Some(f) => f.version,
            None => self.version,
        }
    }
}

/// The per-session registry of tracked documents.
#[derive(Default)]
pub(crate) struct IdentityMap {
    entries: BTreeMap<i64, Entry>,
}

impl IdentityMap {
    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: i64) -> Option<&Entry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut Entry> {
        self.entries.get_mut(&id)
    }

    pub fn insert(&mut self, id: i64, entry: Entry) {
        self.entries.insert(id, entry);
    }

    pub fn remove(&mut self, id: i64) -> Option<Entry> {
        self.entries.remove(&id)
    }

    /// Move an entry to a new id (temp id resolution at flush).
    pub fn rekey(&mut self, old: i64, new: i64) {
        if let Some(mut entry) = self.entries.remove(&old) {
            if let (Some(set_id), Some(live)) = (entry.set_id, entry.live.as_mut()) {
                set_id(live.as_mut(), new);
            }
            self.entries.insert(new, entry);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (i64, &Entry)> {
        self.entries.iter().map(|(id, e)| (*id, e))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (i64, &mut Entry)> {
        self.entries.iter_mut().map(|(id, e)| (*id, e))
    }

    /// Ids currently in the given state.
    pub fn enumerate(&self, state: DocumentState) -> Vec<i64> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state == state)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids with a provisional (negative) id awaiting assignment.
    pub fn temp_ids(&self) -> Vec<i64> {
        // Descending so the first-saved document (-1) gets the first real
        // id.
        self.entries
            .range(..0)
            .rev()
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn detach_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.state = DocumentState::Detached;
            entry.flushed = None;
            entry.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn entry(doc: Person) -> Entry {
        Entry {
            doc_type: Person::TYPE,
            collection: Person::COLLECTION,
            live: Some(Box::new(doc)),
            encode: Some(encode_erased::<Person>),
            set_id: Some(set_id_erased::<Person>),
            snapshot: None,
            version: 0,
            state: DocumentState::New,
            read_only: false,
            probe: false,
            pending: None,
            flushed: None,
        }
    }

    #[test]
    fn rekey_writes_the_id_back_into_the_live_object() {
        let mut map = IdentityMap::default();
        map.insert(-1, entry(Person { id: -1, name: "a".into() }));
        map.rekey(-1, 42);

        let live = map.get(42).unwrap().live.as_ref().unwrap();
        let person = live.downcast_ref::<Person>().unwrap();
        assert_eq!(person.id, 42);
        assert!(!map.contains(-1));
    }

    #[test]
    fn temp_ids_come_back_in_save_order() {
        let mut map = IdentityMap::default();
        map.insert(-1, entry(Person { id: -1, name: "first".into() }));
        map.insert(-2, entry(Person { id: -2, name: "second".into() }));
        map.insert(7, entry(Person { id: 7, name: "real".into() }));
        assert_eq!(map.temp_ids(), vec![-1, -2]);
    }

    #[test]
    fn enumerate_filters_by_state() {
        let mut map = IdentityMap::default();
        map.insert(1, entry(Person { id: 1, name: "a".into() }));
        let mut e = entry(Person { id: 2, name: "b".into() });
        e.state = DocumentState::Deleted;
        map.insert(2, e);

        assert_eq!(map.enumerate(DocumentState::New), vec![1]);
        assert_eq!(map.enumerate(DocumentState::Deleted), vec![2]);
    }

    #[test]
    fn erased_encode_round_trips() {
        let e = entry(Person { id: 3, name: "x".into() });
        let value = (e.encode.unwrap())(e.live.as_ref().unwrap().as_ref()).unwrap();
        assert_eq!(value["name"], "x");
    }
}
