//! Flush pipeline
//!
//! Turns the change scan into ordered DML inside one transaction:
//!
//! 1. assign real ids to provisionally-saved documents;
//! 2. INSERT new documents (batched per collection);
//! 3. UPDATE modified payloads under a `Version` compare-and-set;
//! 4. per index: DELETE removed map rows, INSERT added ones; for reduce
//!    indexes, bridge inserts/deletes first, then reduce-row upserts;
//! 5. DELETE removed documents.
//!
//! DML is recorded against each entry but snapshots only move forward on
//! commit; a rollback (error or cancellation) drops the marks and leaves
//! in-memory state exactly as it was before the flush.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::dialect::insert_batches;
use crate::error::{Error, Result};
use crate::index::{engine, IndexRow, IndexSpec, ReduceSpec};
use crate::store::ids::DOCUMENT_DIMENSION;
use crate::types::{DocumentState, Value};

use super::identity::{FlushKind, FlushState};
use super::tracker::{self, ChangeSet};
use super::Session;

/// One document's contribution to the flush.
struct DocWork {
    id: i64,
    doc_type: &'static str,
    collection: &'static str,
    kind: FlushKind,
    /// Decoded payload the store currently holds (absent for inserts).
    old: Option<serde_json::Value>,
    new_bytes: Option<Vec<u8>>,
    new_value: Option<serde_json::Value>,
    old_version: i64,
}

struct MapDml {
    spec: Arc<IndexSpec>,
    removed: Vec<(i64, IndexRow)>,
    added: Vec<(i64, IndexRow)>,
}

#[derive(Default)]
struct GroupDelta {
    added: Vec<IndexRow>,
    removed: Vec<IndexRow>,
    /// Documents that start contributing to this group key.
    doc_added: Vec<i64>,
    /// Documents that stop contributing.
    doc_removed: Vec<i64>,
}

struct ReduceDml {
    spec: Arc<IndexSpec>,
    groups: BTreeMap<Vec<Value>, GroupDelta>,
    /// Current map output of every document in this flush, for the
    /// re-aggregation path.
    new_rows_by_doc: BTreeMap<i64, Vec<IndexRow>>,
}

impl<'a> Session<'a> {
    pub(crate) async fn flush_internal(&mut self, commit: bool) -> Result<()> {
        if self.cancelled {
            return Err(Error::SessionCancelled);
        }
        let result = self.flush_pipeline(commit).await;
        if let Err(e) = &result {
            if let Some(tx) = self.tx.as_mut() {
                let _ = tx.rollback().await;
            }
            self.tx = None;
            self.reduce_blocks.clear();
            self.revert_flush_marks();
            if matches!(e, Error::Cancelled) {
                tracing::debug!("Flush cancelled; rolled back, session still usable");
            } else {
                self.cancelled = true;
                tracing::warn!(error = %e, "Flush failed; transaction rolled back, session cancelled");
            }
        }
        result
    }

    async fn flush_pipeline(&mut self, commit: bool) -> Result<()> {
        self.check_cancel()?;

        // Ids first, so the payload encodings carry them.
        if !self.map.temp_ids().is_empty() {
            self.open_tx().await?;
            self.assign_pending_ids().await?;
        }

        let changes = tracker::detect_changes(&mut self.map, self.store.codec())?;
        if changes.is_empty() {
            if commit {
                self.commit_open_tx().await?;
            }
            return Ok(());
        }

        self.open_tx().await?;
        let work = self.resolve_work(changes).await?;
        if work.is_empty() {
            if commit {
                self.commit_open_tx().await?;
            }
            return Ok(());
        }

        let (map_dml, reduce_dml) = self.plan_index_dml(&work)?;
        tracing::debug!(
            inserts = work.iter().filter(|w| w.kind == FlushKind::Insert).count(),
            updates = work.iter().filter(|w| w.kind == FlushKind::Update).count(),
            deletes = work.iter().filter(|w| w.kind == FlushKind::Delete).count(),
            indexes = map_dml.len() + reduce_dml.len(),
            "Flushing session"
        );

        self.check_cancel()?;
        self.emit_document_inserts(&work).await?;
        self.emit_document_updates(&work).await?;
        self.check_cancel()?;
        for dml in map_dml {
            self.emit_map_index(dml).await?;
        }
        for dml in reduce_dml {
            self.emit_reduce_index(dml).await?;
        }
        self.check_cancel()?;
        self.emit_document_deletes(&work).await?;
        self.mark_flushed(&work);

        if commit {
            self.check_cancel()?;
            self.commit_open_tx().await?;
        }
        Ok(())
    }

    // ============================================
    // Transaction plumbing
    // ============================================

    async fn open_tx(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Ok(());
        }
        let store = self.store;
        let dialect = store.dialect();
        let mut conn = store.factory().connect().await?;
        let isolation = dialect.isolation(store.options().isolation);
        if let Some(sql) = &isolation {
            if !dialect.isolation_after_begin() {
                conn.execute(sql, &[]).await?;
            }
        }
        conn.begin().await?;
        if let Some(sql) = &isolation {
            if dialect.isolation_after_begin() {
                conn.execute(sql, &[]).await?;
            }
        }
        self.tx = Some(conn);
        Ok(())
    }

    async fn commit_open_tx(&mut self) -> Result<()> {
        if let Some(mut tx) = self.tx.take() {
            tx.commit().await?;
            self.finalize_commit();
        }
        Ok(())
    }

    async fn tx_execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| Error::Database("no open transaction".to_string()))?;
        tx.execute(sql, params).await
    }

    async fn tx_query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<crate::types::Row>> {
        let tx = self
            .tx
            .as_mut()
            .ok_or_else(|| Error::Database("no open transaction".to_string()))?;
        tx.query(sql, params).await
    }

    fn finalize_commit(&mut self) {
        let mut dropped = Vec::new();
        for (id, entry) in self.map.iter_mut() {
            match entry.flushed.take() {
                Some(f) => match f.kind {
                    FlushKind::Delete => dropped.push(id),
                    FlushKind::Insert | FlushKind::Update => {
                        entry.snapshot = f.bytes;
                        entry.version = f.version;
                        entry.state = DocumentState::Clean;
                        entry.pending = None;
                        entry.probe = false;
                    }
                },
                None => entry.pending = None,
            }
        }
        for id in dropped {
            self.map.remove(id);
        }
    }

    pub(super) fn revert_flush_marks(&mut self) {
        for (_, entry) in self.map.iter_mut() {
            entry.flushed = None;
            entry.pending = None;
        }
    }

    // ============================================
    // Id assignment
    // ============================================

    async fn assign_pending_ids(&mut self) -> Result<()> {
        let temps = self.map.temp_ids();
        if temps.is_empty() {
            return Ok(());
        }
        let store = self.store;
        for temp in temps {
            let real = match self.ids.take() {
                Some(id) => id,
                None => {
                    let block = {
                        let tx = self
                            .tx
                            .as_mut()
                            .ok_or_else(|| Error::Database("no open transaction".to_string()))?;
                        store
                            .allocator()
                            .reserve(
                                tx.as_mut(),
                                store.dialect(),
                                store.naming(),
                                DOCUMENT_DIMENSION,
                            )
                            .await?
                    };
                    self.ids = block;
                    self.ids
                        .take()
                        .ok_or_else(|| Error::Database("reserved an empty id block".to_string()))?
                }
            };
            self.map.rekey(temp, real);
        }
        self.temp_next = 0;
        Ok(())
    }

    async fn next_reduce_id(&mut self, dimension: &str) -> Result<i64> {
        if let Some(block) = self.reduce_blocks.get_mut(dimension) {
            if let Some(id) = block.take() {
                return Ok(id);
            }
        }
        let store = self.store;
        let mut block = {
            let tx = self
                .tx
                .as_mut()
                .ok_or_else(|| Error::Database("no open transaction".to_string()))?;
            store
                .allocator()
                .reserve(tx.as_mut(), store.dialect(), store.naming(), dimension)
                .await?
        };
        let id = block
            .take()
            .ok_or_else(|| Error::Database("reserved an empty id block".to_string()))?;
        self.reduce_blocks.insert(dimension.to_string(), block);
        Ok(id)
    }

    // ============================================
    // Work resolution
    // ============================================

    async fn resolve_work(&mut self, changes: ChangeSet) -> Result<Vec<DocWork>> {
        let mut work = Vec::new();

        for id in changes.new {
            let Some((probe, collection, doc_type)) = self
                .map
                .get(id)
                .map(|e| (e.probe, e.collection, e.doc_type))
            else {
                continue;
            };
            if probe {
                // Saved with an explicit id the session never loaded: the
                // row may already exist.
                let existing = self.fetch_document(collection, doc_type, id).await?;
                let Some(entry) = self.map.get_mut(id) else {
                    continue;
                };
                entry.probe = false;
                if let Some((bytes, version)) = existing {
                    entry.snapshot = Some(bytes);
                    entry.version = version;
                    if entry.pending.as_deref() == entry.snapshot.as_deref() {
                        entry.state = DocumentState::Clean;
                        entry.pending = None;
                        continue;
                    }
                    entry.state = DocumentState::Modified;
                    work.push(self.doc_work(id, FlushKind::Update)?);
                    continue;
                }
            }
            work.push(self.doc_work(id, FlushKind::Insert)?);
        }

        for id in changes.modified {
            // After an uncommitted delete the row no longer exists in the
            // transaction; a revived document inserts instead of updating.
            let deleted_in_tx = matches!(
                self.map.get(id).and_then(|e| e.flushed.as_ref()),
                Some(f) if f.kind == FlushKind::Delete
            );
            let kind = if deleted_in_tx {
                FlushKind::Insert
            } else {
                FlushKind::Update
            };
            work.push(self.doc_work(id, kind)?);
        }

        for id in changes.deleted {
            let Some((probe, collection, doc_type, persisted)) = self.map.get(id).map(|e| {
                (
                    e.probe,
                    e.collection,
                    e.doc_type,
                    e.version > 0 || e.snapshot.is_some() || e.flushed.is_some(),
                )
            }) else {
                continue;
            };
            if probe {
                let existing = self.fetch_document(collection, doc_type, id).await?;
                match existing {
                    None => {
                        // Deleting something that was never stored is a
                        // no-op.
                        self.map.remove(id);
                        continue;
                    }
                    Some((bytes, version)) => {
                        if let Some(entry) = self.map.get_mut(id) {
                            entry.probe = false;
                            entry.snapshot = Some(bytes);
                            entry.version = version;
                        }
                    }
                }
            } else if !persisted {
                // Saved and deleted in the same session before any flush:
                // nothing ever reached the database.
                self.map.remove(id);
                continue;
            }
            work.push(self.doc_work(id, FlushKind::Delete)?);
        }

        Ok(work)
    }

    fn doc_work(&self, id: i64, kind: FlushKind) -> Result<DocWork> {
        let codec = self.store.codec();
        let entry = self
            .map
            .get(id)
            .ok_or_else(|| Error::Configuration(format!("id {id} vanished from the identity map")))?;
        let old = match kind {
            FlushKind::Insert => None,
            _ => entry
                .effective_snapshot()
                .map(|b| codec.decode(b))
                .transpose()?,
        };
        let (new_bytes, new_value) = match kind {
            FlushKind::Delete => (None, None),
            _ => {
                let bytes = entry.pending.clone().ok_or_else(|| {
                    Error::Serialization(format!("no pending payload for document {id}"))
                })?;
                let value = codec.decode(&bytes)?;
                (Some(bytes), Some(value))
            }
        };
        Ok(DocWork {
            id,
            doc_type: entry.doc_type,
            collection: entry.collection,
            kind,
            old,
            new_bytes,
            new_value,
            old_version: entry.effective_version(),
        })
    }

    // ============================================
    // Index planning
    // ============================================

    fn plan_index_dml(&self, work: &[DocWork]) -> Result<(Vec<MapDml>, Vec<ReduceDml>)> {
        let registry = self.store.registry();
        let mut map_dml: BTreeMap<String, MapDml> = BTreeMap::new();
        let mut reduce_dml: BTreeMap<String, ReduceDml> = BTreeMap::new();

        for doc in work {
            for spec in registry.for_type(doc.doc_type) {
                let old_rows = match &doc.old {
                    Some(v) => spec.compute(v)?,
                    None => Vec::new(),
                };
                let new_rows = match &doc.new_value {
                    Some(v) => spec.compute(v)?,
                    None => Vec::new(),
                };

                match spec.reduce_spec() {
                    None => {
                        let delta = engine::diff(&old_rows, &new_rows);
                        if delta.is_empty() {
                            continue;
                        }
                        let dml = map_dml.entry(spec.name().to_string()).or_insert_with(|| {
                            MapDml {
                                spec: Arc::clone(spec),
                                removed: Vec::new(),
                                added: Vec::new(),
                            }
                        });
                        dml.removed
                            .extend(delta.removed.into_iter().map(|r| (doc.id, r)));
                        dml.added.extend(delta.added.into_iter().map(|r| (doc.id, r)));
                    }
                    Some(reduce) => {
                        let dml = reduce_dml.entry(spec.name().to_string()).or_insert_with(|| {
                            ReduceDml {
                                spec: Arc::clone(spec),
                                groups: BTreeMap::new(),
                                new_rows_by_doc: BTreeMap::new(),
                            }
                        });
                        dml.new_rows_by_doc.insert(doc.id, new_rows.clone());

                        let old_groups = engine::group_by_key(&old_rows, reduce.key_len);
                        let new_groups = engine::group_by_key(&new_rows, reduce.key_len);
                        let keys: BTreeSet<&Vec<Value>> =
                            old_groups.keys().chain(new_groups.keys()).collect();
                        for key in keys {
                            let old_g = old_groups.get(key).map(Vec::as_slice).unwrap_or(&[]);
                            let new_g = new_groups.get(key).map(Vec::as_slice).unwrap_or(&[]);
                            let delta = engine::diff(old_g, new_g);
                            let joined = old_g.is_empty() && !new_g.is_empty();
                            let left = !old_g.is_empty() && new_g.is_empty();
                            if delta.is_empty() && !joined && !left {
                                continue;
                            }
                            let group = dml.groups.entry(key.clone()).or_default();
                            if joined {
                                group.doc_added.push(doc.id);
                            }
                            if left {
                                group.doc_removed.push(doc.id);
                            }
                            group.added.extend(delta.added);
                            group.removed.extend(delta.removed);
                        }
                    }
                }
            }
        }

        Ok((
            map_dml.into_values().collect(),
            reduce_dml.into_values().collect(),
        ))
    }

    // ============================================
    // Document DML
    // ============================================

    async fn emit_document_inserts(&mut self, work: &[DocWork]) -> Result<()> {
        let store = self.store;
        let dialect = store.dialect();
        let naming = store.naming();

        let mut by_collection: BTreeMap<&str, Vec<Vec<Value>>> = BTreeMap::new();
        for doc in work.iter().filter(|w| w.kind == FlushKind::Insert) {
            by_collection.entry(doc.collection).or_default().push(vec![
                Value::Int(doc.id),
                Value::Text(doc.doc_type.to_string()),
                Value::Blob(doc.new_bytes.clone().unwrap_or_default()),
                Value::Int(1),
            ]);
        }

        let columns = vec![
            "Id".to_string(),
            "Type".to_string(),
            "Content".to_string(),
            "Version".to_string(),
        ];
        for (collection, rows) in by_collection {
            let table = naming.document_table(collection);
            for (sql, params) in insert_batches(
                dialect,
                store.options().max_parameters,
                naming.schema(),
                &table,
                &columns,
                rows,
            ) {
                self.tx_execute(&sql, &params).await?;
            }
        }
        Ok(())
    }

    async fn emit_document_updates(&mut self, work: &[DocWork]) -> Result<()> {
        let store = self.store;
        let dialect = store.dialect();
        let naming = store.naming();

        for doc in work.iter().filter(|w| w.kind == FlushKind::Update) {
            let sql = format!(
                "UPDATE {t} SET {content} = {p1}, {version} = {p2} WHERE {id} = {p3} AND {version} = {p4}",
                t = dialect.table(naming.schema(), &naming.document_table(doc.collection)),
                content = dialect.quote("Content"),
                version = dialect.quote("Version"),
                id = dialect.quote("Id"),
                p1 = dialect.placeholder(1),
                p2 = dialect.placeholder(2),
                p3 = dialect.placeholder(3),
                p4 = dialect.placeholder(4),
            );
            let affected = self
                .tx_execute(
                    &sql,
                    &[
                        Value::Blob(doc.new_bytes.clone().unwrap_or_default()),
                        Value::Int(doc.old_version + 1),
                        Value::Int(doc.id),
                        Value::Int(doc.old_version),
                    ],
                )
                .await?;
            if affected != 1 {
                return Err(Error::Concurrency {
                    doc_type: doc.doc_type.to_string(),
                    id: doc.id,
                });
            }
        }
        Ok(())
    }

    async fn emit_document_deletes(&mut self, work: &[DocWork]) -> Result<()> {
        let store = self.store;
        let dialect = store.dialect();
        let naming = store.naming();

        let mut by_collection: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
        for doc in work.iter().filter(|w| w.kind == FlushKind::Delete) {
            by_collection.entry(doc.collection).or_default().push(doc.id);
        }

        let ceiling = if store.options().max_parameters == 0 {
            dialect.max_parameters()
        } else {
            store.options().max_parameters
        };
        for (collection, ids) in by_collection {
            let table = dialect.table(naming.schema(), &naming.document_table(collection));
            for chunk in ids.chunks(ceiling.max(1)) {
                let mut params = Vec::with_capacity(chunk.len());
                let mut placeholders = Vec::with_capacity(chunk.len());
                for id in chunk {
                    params.push(Value::Int(*id));
                    placeholders.push(dialect.placeholder(params.len()));
                }
                let sql = format!(
                    "DELETE FROM {table} WHERE {id} IN ({})",
                    placeholders.join(", "),
                    id = dialect.quote("Id"),
                );
                self.tx_execute(&sql, &params).await?;
            }
        }
        Ok(())
    }

    // ============================================
    // Index DML
    // ============================================

    async fn emit_map_index(&mut self, dml: MapDml) -> Result<()> {
        let store = self.store;
        let dialect = store.dialect();
        let naming = store.naming();
        let spec = Arc::clone(&dml.spec);
        let table = naming.map_table(spec.name());
        let table_sql = dialect.table(naming.schema(), &table);

        // Removed rows first; map rows have no identity beyond their
        // contents, so deletion matches every column.
        for (doc_id, row) in &dml.removed {
            let mut params = vec![Value::Int(*doc_id)];
            let mut sql = format!(
                "DELETE FROM {table_sql} WHERE {} = {}",
                dialect.quote("DocumentId"),
                dialect.placeholder(1)
            );
            for (col, value) in spec.columns().iter().zip(row.values()) {
                if value.is_null() {
                    sql.push_str(&format!(" AND {} IS NULL", dialect.quote(&col.name)));
                } else {
                    params.push(value.clone());
                    sql.push_str(&format!(
                        " AND {} = {}",
                        dialect.quote(&col.name),
                        dialect.placeholder(params.len())
                    ));
                }
            }
            self.tx_execute(&sql, &params).await?;
        }

        let mut columns = vec!["DocumentId".to_string()];
        columns.extend(spec.columns().iter().map(|c| c.name.clone()));
        let rows: Vec<Vec<Value>> = dml
            .added
            .into_iter()
            .map(|(doc_id, row)| {
                let mut values = vec![Value::Int(doc_id)];
                values.extend(row.into_values());
                values
            })
            .collect();
        for (sql, params) in insert_batches(
            dialect,
            store.options().max_parameters,
            naming.schema(),
            &table,
            &columns,
            rows,
        ) {
            self.tx_execute(&sql, &params).await?;
        }
        Ok(())
    }

    async fn emit_reduce_index(&mut self, dml: ReduceDml) -> Result<()> {
        let store = self.store;
        let dialect = store.dialect();
        let naming = store.naming();
        let spec = Arc::clone(&dml.spec);
        let Some(reduce) = spec.reduce_spec() else {
            return Ok(());
        };
        let reduced_sql = dialect.table(naming.schema(), &naming.reduced_table(spec.name()));
        let bridge_sql = dialect.table(naming.schema(), &naming.bridge_table(spec.name()));
        let key_cols = &spec.columns()[..reduce.key_len];
        let agg_cols = &spec.columns()[reduce.key_len..];

        let bridge_insert = format!(
            "INSERT INTO {bridge_sql} ({}, {}) VALUES ({}, {})",
            dialect.quote("DocumentId"),
            dialect.quote("ReducedId"),
            dialect.placeholder(1),
            dialect.placeholder(2)
        );
        let bridge_delete = format!(
            "DELETE FROM {bridge_sql} WHERE {} = {} AND {} = {}",
            dialect.quote("ReducedId"),
            dialect.placeholder(1),
            dialect.quote("DocumentId"),
            dialect.placeholder(2)
        );
        let bridge_count = format!(
            "SELECT COUNT(*) AS {} FROM {bridge_sql} WHERE {} = {}",
            dialect.quote("Total"),
            dialect.quote("ReducedId"),
            dialect.placeholder(1)
        );

        for (key, group) in dml.groups {
            self.check_cancel()?;

            // Locate the existing reduce row for this key.
            let mut params: Vec<Value> = Vec::new();
            let mut cond = String::new();
            for (col, value) in key_cols.iter().zip(&key) {
                if !cond.is_empty() {
                    cond.push_str(" AND ");
                }
                if value.is_null() {
                    cond.push_str(&format!("{} IS NULL", dialect.quote(&col.name)));
                } else {
                    params.push(value.clone());
                    cond.push_str(&format!(
                        "{} = {}",
                        dialect.quote(&col.name),
                        dialect.placeholder(params.len())
                    ));
                }
            }
            if cond.is_empty() {
                cond.push_str("1 = 1");
            }
            let mut select_cols = vec![format!("{q} AS {q}", q = dialect.quote("Id"))];
            for col in agg_cols {
                select_cols.push(format!("{q} AS {q}", q = dialect.quote(&col.name)));
            }
            let select = format!(
                "SELECT {} FROM {reduced_sql} WHERE {cond}",
                select_cols.join(", ")
            );
            let rows = self.tx_query(&select, &params).await?;
            let existing = match rows.first() {
                Some(row) => {
                    let rid = row.i64("Id")?;
                    let current: Vec<Value> = agg_cols
                        .iter()
                        .map(|c| row.value(&c.name).cloned().unwrap_or(Value::Null))
                        .collect();
                    Some((rid, current))
                }
                None => None,
            };

            match existing {
                None => {
                    if group.added.is_empty() {
                        continue;
                    }
                    let rid = self.next_reduce_id(spec.name()).await?;
                    for doc_id in &group.doc_added {
                        self.tx_execute(&bridge_insert, &[Value::Int(*doc_id), Value::Int(rid)])
                            .await?;
                    }
                    let aggs = engine::aggregate(reduce, &group.added);
                    let mut insert_cols = vec![dialect.quote("Id")];
                    let mut insert_params = vec![Value::Int(rid)];
                    for (col, value) in key_cols.iter().zip(&key) {
                        insert_cols.push(dialect.quote(&col.name));
                        insert_params.push(value.clone());
                    }
                    for (col, value) in agg_cols.iter().zip(&aggs) {
                        insert_cols.push(dialect.quote(&col.name));
                        insert_params.push(value.clone());
                    }
                    let placeholders: Vec<String> = (1..=insert_params.len())
                        .map(|i| dialect.placeholder(i))
                        .collect();
                    let sql = format!(
                        "INSERT INTO {reduced_sql} ({}) VALUES ({})",
                        insert_cols.join(", "),
                        placeholders.join(", ")
                    );
                    self.tx_execute(&sql, &insert_params).await?;
                }
                Some((rid, current)) => {
                    let rows = self.tx_query(&bridge_count, &[Value::Int(rid)]).await?;
                    let contributors = match rows.first() {
                        Some(row) => row.i64("Total")?,
                        None => 0,
                    };
                    let remaining = contributors - group.doc_removed.len() as i64
                        + group.doc_added.len() as i64;

                    for doc_id in &group.doc_removed {
                        self.tx_execute(&bridge_delete, &[Value::Int(rid), Value::Int(*doc_id)])
                            .await?;
                    }
                    for doc_id in &group.doc_added {
                        self.tx_execute(&bridge_insert, &[Value::Int(*doc_id), Value::Int(rid)])
                            .await?;
                    }

                    if remaining <= 0 {
                        let sql = format!(
                            "DELETE FROM {reduced_sql} WHERE {} = {}",
                            dialect.quote("Id"),
                            dialect.placeholder(1)
                        );
                        self.tx_execute(&sql, &[Value::Int(rid)]).await?;
                        continue;
                    }

                    let aggs = if reduce.invertible() || group.removed.is_empty() {
                        engine::merge(reduce, &current, &group.added, &group.removed)?
                    } else {
                        let group_rows = self
                            .reread_group(&spec, reduce, rid, &key, &dml.new_rows_by_doc)
                            .await?;
                        engine::aggregate(reduce, &group_rows)
                    };

                    let mut sets = Vec::new();
                    let mut update_params = Vec::new();
                    for (col, value) in agg_cols.iter().zip(&aggs) {
                        update_params.push(value.clone());
                        sets.push(format!(
                            "{} = {}",
                            dialect.quote(&col.name),
                            dialect.placeholder(update_params.len())
                        ));
                    }
                    update_params.push(Value::Int(rid));
                    let sql = format!(
                        "UPDATE {reduced_sql} SET {} WHERE {} = {}",
                        sets.join(", "),
                        dialect.quote("Id"),
                        dialect.placeholder(update_params.len())
                    );
                    self.tx_execute(&sql, &update_params).await?;
                }
            }
        }
        Ok(())
    }

    /// Recompute a group's map rows from its current contributors: flushed
    /// documents use their in-memory output, everything else is re-read and
    /// re-mapped.
    async fn reread_group(
        &mut self,
        spec: &IndexSpec,
        reduce: &ReduceSpec,
        rid: i64,
        key: &[Value],
        new_rows_by_doc: &BTreeMap<i64, Vec<IndexRow>>,
    ) -> Result<Vec<IndexRow>> {
        let store = self.store;
        let dialect = store.dialect();
        let naming = store.naming();

        let sql = format!(
            "SELECT {} AS {} FROM {} WHERE {} = {}",
            dialect.quote("DocumentId"),
            dialect.quote("Id"),
            dialect.table(naming.schema(), &naming.bridge_table(spec.name())),
            dialect.quote("ReducedId"),
            dialect.placeholder(1)
        );
        let rows = self.tx_query(&sql, &[Value::Int(rid)]).await?;
        let doc_ids: Vec<i64> = rows.iter().map(|r| r.i64("Id")).collect::<Result<_>>()?;

        let doc_select = format!(
            "SELECT {c} AS {c} FROM {t} WHERE {i} = {p}",
            c = dialect.quote("Content"),
            t = dialect.table(naming.schema(), &naming.document_table(spec.collection())),
            i = dialect.quote("Id"),
            p = dialect.placeholder(1),
        );

        let mut out = Vec::new();
        for doc_id in doc_ids {
            if let Some(rows) = new_rows_by_doc.get(&doc_id) {
                out.extend(
                    rows.iter()
                        .filter(|r| &r.values()[..reduce.key_len] == key)
                        .cloned(),
                );
                continue;
            }
            let rows = self.tx_query(&doc_select, &[Value::Int(doc_id)]).await?;
            if let Some(row) = rows.first() {
                let bytes = row.blob("Content")?;
                let value = store.codec().decode(&bytes)?;
                let computed = spec.compute(&value)?;
                out.extend(
                    computed
                        .into_iter()
                        .filter(|r| &r.values()[..reduce.key_len] == key),
                );
            }
        }
        Ok(out)
    }

    fn mark_flushed(&mut self, work: &[DocWork]) {
        for doc in work {
            let Some(entry) = self.map.get_mut(doc.id) else {
                continue;
            };
            entry.flushed = Some(FlushState {
                kind: doc.kind,
                bytes: doc.new_bytes.clone(),
                version: match doc.kind {
                    FlushKind::Insert => 1,
                    FlushKind::Update => doc.old_version + 1,
                    FlushKind::Delete => 0,
                },
            });
            entry.pending = None;
        }
    }
}
