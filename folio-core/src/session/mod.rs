//! Sessions: the unit-of-work surface
//!
//! A session tracks document identity, detects mutations by snapshot diff,
//! and flushes everything — document rows, index rows, bridge rows — as one
//! atomic transaction. `save`/`delete` and query building are pure in-memory
//! operations; `get`, queries and `save_changes` may suspend.
//!
//! A session holds at most one open transaction, started lazily by the
//! first flush (queries flush pending mutations into it so a session always
//! observes its own writes). Reads with no pending writes use a short-lived
//! connection. Sessions are single-context: hand one between tasks
//! sequentially, never share it.

mod flush;
mod identity;
mod tracker;

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::backend::Connection;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::store::ids::IdBlock;
use crate::store::Store;
use crate::types::{Document, DocumentState, Row, Value};

use identity::{encode_erased, set_id_erased, Entry, IdentityMap};

/// A unit of work against a [`Store`].
pub struct Session<'a> {
    store: &'a Store,
    map: IdentityMap,
    /// Reserved document-id block; temp (negative) ids are handed out once
    /// it runs dry and resolved at flush.
    ids: IdBlock,
    temp_next: i64,
    tx: Option<Box<dyn Connection>>,
    /// Reserved blocks for reduce-row ids, one per index dimension.
    reduce_blocks: HashMap<String, IdBlock>,
    cancelled: bool,
    cancel: Option<CancellationToken>,
}

impl<'a> Session<'a> {
    pub(crate) fn new(store: &'a Store, ids: IdBlock, cancel: Option<CancellationToken>) -> Self {
        Self {
            store,
            map: IdentityMap::default(),
            ids,
            temp_next: 0,
            tx: None,
            reduce_blocks: HashMap::new(),
            cancelled: false,
            cancel,
        }
    }

    pub(crate) fn store(&self) -> &'a Store {
        self.store
    }

    /// True once a flush has failed and rolled back; the session accepts no
    /// further work.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Ids currently tracked in the given state.
    pub fn tracked(&self, state: DocumentState) -> Vec<i64> {
        self.map.enumerate(state)
    }

    // ============================================
    // Writes (in-memory; never suspend)
    // ============================================

    /// Track `doc` for insertion or update. A document without an id gets
    /// one from the session's reserved range immediately; past the range, a
    /// provisional id (negative) is used until flush assigns the real one.
    /// Returns the current id.
    ///
    /// Saving over a pending delete revives the document: the last call
    /// wins.
    pub fn save<T: Document>(&mut self, mut doc: T) -> Result<i64> {
        if self.cancelled {
            return Err(Error::SessionCancelled);
        }
        if !self.store.collections().iter().any(|c| c == T::COLLECTION) {
            return Err(Error::Configuration(format!(
                "collection '{}' is not declared on the store",
                T::COLLECTION
            )));
        }

        let mut id = doc.id();
        let fresh = id == 0;
        if fresh {
            id = self.ids.take().unwrap_or_else(|| {
                self.temp_next -= 1;
                self.temp_next
            });
            doc.set_id(id);
        }

        match self.map.get_mut(id) {
            Some(entry) => {
                if entry.doc_type != T::TYPE {
                    return Err(Error::Configuration(format!(
                        "id {id} is already tracked as {}",
                        entry.doc_type
                    )));
                }
                entry.live = Some(Box::new(doc));
                entry.encode = Some(encode_erased::<T>);
                entry.set_id = Some(set_id_erased::<T>);
                if entry.state == DocumentState::Deleted {
                    // Revive: a row known to exist diffs like any loaded
                    // document; anything else goes (back) through the
                    // insert/probe path.
                    entry.state = if entry.version > 0 || entry.flushed.is_some() {
                        DocumentState::Clean
                    } else {
                        DocumentState::New
                    };
                }
            }
            None => {
                self.map.insert(
                    id,
                    Entry {
                        doc_type: T::TYPE,
                        collection: T::COLLECTION,
                        live: Some(Box::new(doc)),
                        encode: Some(encode_erased::<T>),
                        set_id: Some(set_id_erased::<T>),
                        snapshot: None,
                        version: 0,
                        state: DocumentState::New,
                        read_only: false,
                        // An explicit id the session never loaded may
                        // already exist; flush resolves it.
                        probe: !fresh,
                        pending: None,
                        flushed: None,
                    },
                );
            }
        }
        Ok(id)
    }

    /// Mark a document for deletion at flush. Untracked ids are accepted;
    /// their payload is loaded during flush so index rows can be cleaned
    /// up.
    pub fn delete<T: Document>(&mut self, id: i64) -> Result<()> {
        if self.cancelled {
            return Err(Error::SessionCancelled);
        }
        match self.map.get_mut(id) {
            Some(entry) => {
                entry.state = DocumentState::Deleted;
            }
            None => {
                self.map.insert(
                    id,
                    Entry {
                        doc_type: T::TYPE,
                        collection: T::COLLECTION,
                        live: None,
                        encode: None,
                        set_id: None,
                        snapshot: None,
                        version: 0,
                        state: DocumentState::Deleted,
                        read_only: false,
                        probe: true,
                        pending: None,
                        flushed: None,
                    },
                );
            }
        }
        Ok(())
    }

    // ============================================
    // Reads
    // ============================================

    /// The tracked instance for `id`, loading, snapshotting and tracking it
    /// as Clean on a miss. Within a session, repeated gets return the same
    /// instance.
    pub async fn get<T: Document>(&mut self, id: i64) -> Result<Option<&T>> {
        if self.cancelled {
            return Err(Error::SessionCancelled);
        }
        if self.map.contains(id) {
            return self.tracked_ref::<T>(id);
        }
        if self.load_into_map::<T>(id, false).await? {
            return self.tracked_ref::<T>(id);
        }
        Ok(None)
    }

    /// Mutable access to the tracked instance; mutations are picked up by
    /// the snapshot diff at flush.
    pub async fn get_mut<T: Document>(&mut self, id: i64) -> Result<Option<&mut T>> {
        if self.cancelled {
            return Err(Error::SessionCancelled);
        }
        if self.map.contains(id) {
            return self.tracked_mut::<T>(id);
        }
        if self.load_into_map::<T>(id, false).await? {
            return self.tracked_mut::<T>(id);
        }
        Ok(None)
    }

    /// Like [`Session::get`], but the document is excluded from the
    /// mutation scan — cheaper for documents the caller promises not to
    /// change.
    pub async fn load_read_only<T: Document>(&mut self, id: i64) -> Result<Option<&T>> {
        if self.cancelled {
            return Err(Error::SessionCancelled);
        }
        if self.map.contains(id) {
            return self.tracked_ref::<T>(id);
        }
        if self.load_into_map::<T>(id, true).await? {
            return self.tracked_ref::<T>(id);
        }
        Ok(None)
    }

    /// Start a typed query against a registered index.
    pub fn query<'q, T: Document>(&'q mut self, index: &str) -> Query<'q, 'a, T> {
        Query::new(self, index)
    }

    // ============================================
    // Flush and teardown
    // ============================================

    /// Flush all pending mutations — new documents, snapshot-diffed
    /// updates, deletes, and every affected index row — in one transaction,
    /// then refresh snapshots. With nothing to do this issues zero DML.
    ///
    /// On failure the transaction is rolled back, in-memory state is kept
    /// for inspection, and the session is cancelled (cancellation via the
    /// token rolls back too but leaves the session usable for a retry).
    pub async fn save_changes(&mut self) -> Result<()> {
        self.flush_internal(true).await
    }

    /// Roll back anything pending and detach all entries. Dropping the
    /// session without calling this rolls back through the connection
    /// adapter; `close` is the checked form.
    pub async fn close(mut self) -> Result<()> {
        if let Some(mut tx) = self.tx.take() {
            tx.rollback().await?;
        }
        self.revert_flush_marks();
        self.map.detach_all();
        Ok(())
    }

    // ============================================
    // Internals shared with the query layer
    // ============================================

    pub(crate) fn is_deleted(&self, id: i64) -> bool {
        matches!(self.map.get(id), Some(e) if e.state == DocumentState::Deleted)
    }

    /// Execute a compiled query, first flushing pending mutations (without
    /// committing) so the result observes this session's writes.
    pub(crate) async fn query_rows(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        if self.cancelled {
            return Err(Error::SessionCancelled);
        }
        self.check_cancel()?;
        self.flush_internal(false).await?;
        self.run_query(sql, params).await
    }

    /// Materialize document rows, reusing tracked instances and skipping
    /// documents deleted in this session.
    pub(crate) fn hydrate<T: Document>(&mut self, rows: Vec<Row>) -> Result<Vec<T>> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for row in rows {
            let id = row.i64("Id")?;
            if !seen.insert(id) {
                continue;
            }
            if let Some(entry) = self.map.get(id) {
                if entry.state == DocumentState::Deleted {
                    continue;
                }
                if let Some(doc) = entry.live.as_ref().and_then(|l| l.downcast_ref::<T>()) {
                    out.push(doc.clone());
                }
                continue;
            }
            let bytes = row.blob("Content")?;
            let version = row.i64("Version")?;
            let value = self.store.codec().decode(&bytes)?;
            let doc: T = serde_json::from_value(value)?;
            out.push(doc.clone());
            self.track_loaded(id, doc, bytes, version, false);
        }
        Ok(out)
    }

    /// Run a read on the open transaction if there is one, else on a
    /// short-lived connection.
    pub(crate) async fn run_query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        match self.tx.as_mut() {
            Some(tx) => tx.query(sql, params).await,
            None => {
                let mut conn = self.store.factory().connect().await?;
                conn.query(sql, params).await
            }
        }
    }

    pub(crate) fn check_cancel(&self) -> Result<()> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(Error::Cancelled),
            _ => Ok(()),
        }
    }

    // ============================================
    // Loading
    // ============================================

    async fn load_into_map<T: Document>(&mut self, id: i64, read_only: bool) -> Result<bool> {
        self.check_cancel()?;
        let Some((bytes, version)) = self.fetch_document(T::COLLECTION, T::TYPE, id).await? else {
            return Ok(false);
        };
        let value = self.store.codec().decode(&bytes)?;
        let doc: T = serde_json::from_value(value)?;
        self.track_loaded(id, doc, bytes, version, read_only);
        Ok(true)
    }

    fn track_loaded<T: Document>(
        &mut self,
        id: i64,
        doc: T,
        snapshot: Vec<u8>,
        version: i64,
        read_only: bool,
    ) {
        self.map.insert(
            id,
            Entry {
                doc_type: T::TYPE,
                collection: T::COLLECTION,
                live: Some(Box::new(doc)),
                encode: Some(encode_erased::<T>),
                set_id: Some(set_id_erased::<T>),
                snapshot: Some(snapshot),
                version,
                state: DocumentState::Clean,
                read_only,
                probe: false,
                pending: None,
                flushed: None,
            },
        );
    }

    async fn fetch_document(
        &mut self,
        collection: &str,
        doc_type: &str,
        id: i64,
    ) -> Result<Option<(Vec<u8>, i64)>> {
        let dialect = self.store.dialect();
        let naming = self.store.naming();
        let sql = format!(
            "SELECT {c} AS {c}, {v} AS {v} FROM {t} WHERE {i} = {p1} AND {ty} = {p2}",
            c = dialect.quote("Content"),
            v = dialect.quote("Version"),
            t = dialect.table(naming.schema(), &naming.document_table(collection)),
            i = dialect.quote("Id"),
            ty = dialect.quote("Type"),
            p1 = dialect.placeholder(1),
            p2 = dialect.placeholder(2),
        );
        let rows = self
            .run_query(&sql, &[Value::Int(id), Value::Text(doc_type.to_string())])
            .await?;
        match rows.first() {
            Some(row) => Ok(Some((row.blob("Content")?, row.i64("Version")?))),
            None => Ok(None),
        }
    }

    fn tracked_ref<T: Document>(&self, id: i64) -> Result<Option<&T>> {
        let Some(entry) = self.map.get(id) else {
            return Ok(None);
        };
        if entry.doc_type != T::TYPE {
            return Err(Error::Configuration(format!(
                "id {id} is tracked as {}, requested as {}",
                entry.doc_type,
                T::TYPE
            )));
        }
        if entry.state == DocumentState::Deleted {
            return Ok(None);
        }
        Ok(entry.live.as_ref().and_then(|l| l.downcast_ref::<T>()))
    }

    fn tracked_mut<T: Document>(&mut self, id: i64) -> Result<Option<&mut T>> {
        let Some(entry) = self.map.get_mut(id) else {
            return Ok(None);
        };
        if entry.doc_type != T::TYPE {
            return Err(Error::Configuration(format!(
                "id {id} is tracked as {}, requested as {}",
                entry.doc_type,
                T::TYPE
            )));
        }
        if entry.state == DocumentState::Deleted {
            return Ok(None);
        }
        Ok(entry.live.as_mut().and_then(|l| l.downcast_mut::<T>()))
    }
}
