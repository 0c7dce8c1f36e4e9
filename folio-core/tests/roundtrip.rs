//! End-to-end tests for the session, index maintenance and query pipeline
//!
//! These run against the bundled SQLite backend on a temp-file database so
//! assertions can read the raw tables through a separate connection.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use folio_core::backend::SqliteFactory;
use folio_core::dialect::SqliteDialect;
use folio_core::{
    Aggregate, Document, DocumentState, Error, IndexColumn, IndexRow, IndexSpec, Predicate,
    SqlType, Store, StoreOptions, Value,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Person {
    id: i64,
    name: String,
    age: i64,
    tag: String,
    amount: i64,
    created_at: DateTime<Utc>,
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

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap()
}

fn person(name: &str, age: i64, tag: &str, amount: i64) -> Person {
    Person {
        id: 0,
        name: name.to_string(),
        age,
        tag: tag.to_string(),
        amount,
        created_at: epoch(),
    }
}

fn indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::map::<Person, _>(
            "ByName",
            vec![IndexColumn::new("Name", SqlType::Text)],
            |p| vec![IndexRow::new(vec![p.name.clone().into()])],
        ),
        IndexSpec::map::<Person, _>(
            "ByAge",
            vec![IndexColumn::new("Age", SqlType::Int64)],
            |p| vec![IndexRow::new(vec![p.age.into()])],
        ),
        IndexSpec::map::<Person, _>(
            "ByCreated",
            vec![IndexColumn::new("Created", SqlType::DateTime)],
            |p| vec![IndexRow::new(vec![p.created_at.into()])],
        ),
        IndexSpec::reduce::<Person, _>(
            "CountByTag",
            vec![IndexColumn::new("Tag", SqlType::Text)],
            vec![
                (IndexColumn::new("Count", SqlType::Int64), Aggregate::Count),
                (IndexColumn::new("Total", SqlType::Int64), Aggregate::Sum),
            ],
            |p| {
                vec![IndexRow::new(vec![
                    p.tag.clone().into(),
                    Value::Int(1),
                    p.amount.into(),
                ])]
            },
        ),
        IndexSpec::reduce::<Person, _>(
            "MaxByTag",
            vec![IndexColumn::new("Tag", SqlType::Text)],
            vec![(IndexColumn::new("Highest", SqlType::Int64), Aggregate::Max)],
            |p| vec![IndexRow::new(vec![p.tag.clone().into(), p.amount.into()])],
        ),
    ]
}

struct Fixture {
    _dir: TempDir,
    store: Store,
    path: PathBuf,
}

async fn fixture() -> Fixture {
    fixture_with(StoreOptions::default()).await
}

async fn fixture_with(options: StoreOptions) -> Fixture {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("folio.db");
    let mut builder = Store::builder()
        .dialect(SqliteDialect)
        .factory(SqliteFactory::open(&path).unwrap())
        .options(options);
    for index in indexes() {
        builder = builder.register_index(index);
    }
    let store = builder.build().unwrap();
    store.initialize().await.unwrap();
    Fixture {
        _dir: dir,
        store,
        path,
    }
}

fn raw(path: &Path) -> rusqlite::Connection {
    rusqlite::Connection::open(path).unwrap()
}

fn count_rows(path: &Path, table: &str) -> i64 {
    raw(path)
        .query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |r| r.get(0))
        .unwrap()
}

fn document_version(path: &Path, id: i64) -> i64 {
    raw(path)
        .query_row("SELECT \"Version\" FROM \"Document\" WHERE \"Id\" = ?", [id], |r| {
            r.get(0)
        })
        .unwrap()
}

// ============================================
// Basic CRUD
// ============================================

#[tokio::test]
async fn save_assigns_id_and_flush_persists() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();

    let id = session.save(person("a", 30, "t", 10)).unwrap();
    assert!(id > 0);
    assert_eq!(session.tracked(DocumentState::New), vec![id]);

    session.save_changes().await.unwrap();
    assert_eq!(session.tracked(DocumentState::Clean), vec![id]);
    assert_eq!(count_rows(&fx.path, "Document"), 1);
    assert_eq!(document_version(&fx.path, id), 1);
}

#[tokio::test]
async fn mutation_is_detected_and_updates_in_place() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let id = session.save(person("a", 30, "t", 10)).unwrap();
    session.save_changes().await.unwrap();

    session.get_mut::<Person>(id).await.unwrap().unwrap().name = "b".to_string();
    session.save_changes().await.unwrap();

    assert_eq!(document_version(&fx.path, id), 2);
    assert_eq!(count_rows(&fx.path, "Document"), 1);

    let mut fresh = fx.store.create_session().await.unwrap();
    let loaded = fresh.get::<Person>(id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "b");
}

#[tokio::test]
async fn flush_without_changes_issues_no_dml() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let id = session.save(person("a", 30, "t", 10)).unwrap();
    session.save_changes().await.unwrap();

    // Idempotent: nothing changed, so the version must not move.
    session.save_changes().await.unwrap();
    assert_eq!(document_version(&fx.path, id), 1);
}

#[tokio::test]
async fn bytes_equal_mutation_is_not_flushed() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let id = session.save(person("same", 30, "t", 10)).unwrap();
    session.save_changes().await.unwrap();

    // Overwrite a field with an identical value: the snapshot diff sees
    // equal bytes.
    session.get_mut::<Person>(id).await.unwrap().unwrap().name = "same".to_string();
    session.save_changes().await.unwrap();
    assert_eq!(document_version(&fx.path, id), 1);
}

#[tokio::test]
async fn repeated_gets_return_the_tracked_instance() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let id = session.save(person("a", 30, "t", 10)).unwrap();
    session.save_changes().await.unwrap();

    // Mutate through one handle, observe through the next: same instance.
    session.get_mut::<Person>(id).await.unwrap().unwrap().age = 31;
    let seen = session.get::<Person>(id).await.unwrap().unwrap();
    assert_eq!(seen.age, 31);
}

#[tokio::test]
async fn save_then_delete_in_one_session_stores_nothing() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let id = session.save(person("ghost", 30, "t", 10)).unwrap();
    session.delete::<Person>(id).unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(count_rows(&fx.path, "Document"), 0);
    assert_eq!(count_rows(&fx.path, "ByName_Document"), 0);
}

#[tokio::test]
async fn untracked_delete_cleans_index_rows() {
    let fx = fixture().await;
    let id = {
        let mut session = fx.store.create_session().await.unwrap();
        let id = session.save(person("a", 30, "t", 10)).unwrap();
        session.save_changes().await.unwrap();
        id
    };

    // A different session that never loaded the document.
    let mut session = fx.store.create_session().await.unwrap();
    session.delete::<Person>(id).unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(count_rows(&fx.path, "Document"), 0);
    assert_eq!(count_rows(&fx.path, "ByName_Document"), 0);
    assert_eq!(count_rows(&fx.path, "CountByTag_Reduced"), 0);
}

#[tokio::test]
async fn uncommitted_work_is_discarded_on_close() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    session.save(person("a", 30, "t", 10)).unwrap();

    // Query flushes into the transaction without committing.
    let found = session
        .query::<Person>("ByName")
        .filter(Predicate::eq("Name", "a"))
        .list()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    session.close().await.unwrap();
    assert_eq!(count_rows(&fx.path, "Document"), 0);
}

// ============================================
// Map indexes and queries
// ============================================

#[tokio::test]
async fn map_index_filters_documents() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    session.save(person("x", 20, "t", 1)).unwrap();
    session.save(person("y", 40, "u", 2)).unwrap();
    session.save_changes().await.unwrap();

    let mut session = fx.store.create_session().await.unwrap();
    let found = session
        .query::<Person>("ByName")
        .filter(Predicate::eq("Name", "x"))
        .list()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "x");
}

#[tokio::test]
async fn empty_predicate_returns_all_documents_of_the_type() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    for i in 0..5 {
        session.save(person(&format!("p{i}"), 20 + i, "t", i)).unwrap();
    }
    session.save_changes().await.unwrap();

    let all = session.query::<Person>("ByName").list().await.unwrap();
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn queries_observe_unflushed_session_writes() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    session.save(person("pending", 20, "t", 1)).unwrap();

    let ids = session
        .query::<Person>("ByName")
        .filter(Predicate::eq("Name", "pending"))
        .ids()
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);

    // And deletions hide documents before the flush commits.
    session.delete::<Person>(ids[0]).unwrap();
    let ids = session
        .query::<Person>("ByName")
        .filter(Predicate::eq("Name", "pending"))
        .ids()
        .await
        .unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn joins_require_rows_in_every_index() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    session.save(person("ada", 36, "t", 1)).unwrap();
    session.save(person("ada", 17, "t", 1)).unwrap();
    session.save_changes().await.unwrap();

    let found = session
        .query::<Person>("ByName")
        .filter(Predicate::eq("Name", "ada"))
        .join("ByAge")
        .filter(Predicate::ge("Age", 18))
        .list()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].age, 36);
}

#[tokio::test]
async fn paging_skips_and_takes_in_order() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    for i in 0..10 {
        session.save(person(&format!("p{i:02}"), i, "t", i)).unwrap();
    }
    session.save_changes().await.unwrap();

    let page = session
        .query::<Person>("ByName")
        .order_by("Name")
        .skip(4)
        .take(3)
        .list()
        .await
        .unwrap();
    assert_eq!(
        page.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
        vec!["p04", "p05", "p06"]
    );

    // Skip beyond the total: an empty page, not an error.
    let empty = session
        .query::<Person>("ByName")
        .order_by("Name")
        .skip(100)
        .take(5)
        .list()
        .await
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn count_reflects_matching_rows() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    session.save(person("a", 30, "t", 1)).unwrap();
    session.save(person("b", 40, "t", 1)).unwrap();
    session.save_changes().await.unwrap();

    let n = session
        .query::<Person>("ByAge")
        .filter(Predicate::ge("Age", 35))
        .count()
        .await
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
async fn date_filter_text_selects_the_window() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();

    let mut old = person("old", 50, "t", 1);
    old.created_at = epoch() - Duration::days(30);
    let mut recent = person("recent", 50, "t", 1);
    recent.created_at = epoch() - Duration::days(3);
    session.save(old).unwrap();
    session.save(recent).unwrap();
    session.save_changes().await.unwrap();

    let found = session
        .query::<Person>("ByCreated")
        .with_clock(epoch())
        .filter_text("Created", "@now-7..@now")
        .list()
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "recent");
}

#[tokio::test]
async fn unparseable_filter_surfaces_at_compile_time() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let err = session
        .query::<Person>("ByCreated")
        .filter_text("Created", "not-a-date")
        .list()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Filter { .. }));
}

#[tokio::test]
async fn unknown_column_surfaces_at_compile_time() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let err = session
        .query::<Person>("ByName")
        .filter(Predicate::eq("Nope", 1))
        .list()
        .await
        .unwrap_err();
    assert!(matches!(err, Error::QueryCompile(_)));
}

// ============================================
// Reduce indexes
// ============================================

fn tag_row(path: &Path, tag: &str) -> Option<(i64, i64)> {
    raw(path)
        .query_row(
            "SELECT \"Count\", \"Total\" FROM \"CountByTag_Reduced\" WHERE \"Tag\" = ?",
            [tag],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .ok()
}

#[tokio::test]
async fn reduce_index_aggregates_across_documents() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let mut t_ids = Vec::new();
    for i in 0..3 {
        t_ids.push(session.save(person(&format!("t{i}"), 20, "t", 10)).unwrap());
    }
    session.save(person("u0", 20, "u", 7)).unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(tag_row(&fx.path, "t"), Some((3, 30)));
    assert_eq!(tag_row(&fx.path, "u"), Some((1, 7)));

    // Removing one contributor un-merges it.
    session.delete::<Person>(t_ids[0]).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(tag_row(&fx.path, "t"), Some((2, 20)));
}

#[tokio::test]
async fn reduce_row_is_deleted_with_its_last_contributor() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let id = session.save(person("solo", 20, "only", 5)).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(tag_row(&fx.path, "only"), Some((1, 5)));

    session.delete::<Person>(id).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(tag_row(&fx.path, "only"), None);
    assert_eq!(count_rows(&fx.path, "CountByTag_Document"), 0);
}

#[tokio::test]
async fn changing_the_group_key_moves_the_contribution() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let id = session.save(person("mover", 20, "t", 10)).unwrap();
    session.save(person("stay", 20, "t", 10)).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(tag_row(&fx.path, "t"), Some((2, 20)));

    session.get_mut::<Person>(id).await.unwrap().unwrap().tag = "u".to_string();
    session.save_changes().await.unwrap();

    assert_eq!(tag_row(&fx.path, "t"), Some((1, 10)));
    assert_eq!(tag_row(&fx.path, "u"), Some((1, 10)));
}

#[tokio::test]
async fn non_invertible_aggregate_reaggregates_on_removal() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let top = session.save(person("top", 20, "t", 100)).unwrap();
    session.save(person("mid", 20, "t", 60)).unwrap();
    session.save(person("low", 20, "t", 10)).unwrap();
    session.save_changes().await.unwrap();

    let highest = |path: &Path| -> Option<i64> {
        raw(path)
            .query_row(
                "SELECT \"Highest\" FROM \"MaxByTag_Reduced\" WHERE \"Tag\" = ?",
                ["t"],
                |r| r.get(0),
            )
            .ok()
    };
    assert_eq!(highest(&fx.path), Some(100));

    // Max has no inverse; removing the top contributor forces a rescan of
    // the group.
    session.delete::<Person>(top).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(highest(&fx.path), Some(60));
}

#[tokio::test]
async fn reduce_count_query_goes_through_the_reduced_table() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    session.save(person("a", 20, "t", 1)).unwrap();
    session.save(person("b", 20, "u", 1)).unwrap();
    session.save_changes().await.unwrap();

    let groups = session
        .query::<Person>("CountByTag")
        .count()
        .await
        .unwrap();
    assert_eq!(groups, 2);

    // Documents are reachable through the bridge.
    let docs = session
        .query::<Person>("CountByTag")
        .filter(Predicate::eq("Tag", "t"))
        .list()
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].name, "a");
}

// ============================================
// Concurrency and atomicity
// ============================================

#[tokio::test]
async fn stale_version_raises_a_concurrency_error() {
    let fx = fixture().await;
    let id = {
        let mut session = fx.store.create_session().await.unwrap();
        let id = session.save(person("shared", 30, "t", 1)).unwrap();
        session.save_changes().await.unwrap();
        id
    };

    let mut a = fx.store.create_session().await.unwrap();
    let mut b = fx.store.create_session().await.unwrap();
    a.get::<Person>(id).await.unwrap().unwrap();
    b.get::<Person>(id).await.unwrap().unwrap();

    a.get_mut::<Person>(id).await.unwrap().unwrap().name = "from-a".to_string();
    a.save_changes().await.unwrap();

    b.get_mut::<Person>(id).await.unwrap().unwrap().name = "from-b".to_string();
    let err = b.save_changes().await.unwrap_err();
    assert!(matches!(err, Error::Concurrency { .. }));
    assert!(b.is_cancelled());
    assert!(matches!(
        b.save(person("later", 1, "t", 1)),
        Err(Error::SessionCancelled)
    ));

    let mut fresh = fx.store.create_session().await.unwrap();
    assert_eq!(fresh.get::<Person>(id).await.unwrap().unwrap().name, "from-a");
}

#[tokio::test]
async fn failed_flush_rolls_back_everything_it_wrote() {
    let fx = fixture().await;
    let id = {
        let mut session = fx.store.create_session().await.unwrap();
        let id = session.save(person("shared", 30, "t", 1)).unwrap();
        session.save_changes().await.unwrap();
        id
    };

    let mut a = fx.store.create_session().await.unwrap();
    let mut b = fx.store.create_session().await.unwrap();
    a.get::<Person>(id).await.unwrap().unwrap();
    b.get::<Person>(id).await.unwrap().unwrap();

    a.get_mut::<Person>(id).await.unwrap().unwrap().amount = 999;
    a.save_changes().await.unwrap();

    // B both inserts a new document and carries a stale update; the insert
    // must not survive the failed flush.
    b.save(person("casualty", 1, "x", 1)).unwrap();
    b.get_mut::<Person>(id).await.unwrap().unwrap().amount = 5;
    assert!(b.save_changes().await.is_err());

    let mut fresh = fx.store.create_session().await.unwrap();
    assert_eq!(fresh.get::<Person>(id).await.unwrap().unwrap().amount, 999);
    let casualties = fresh
        .query::<Person>("ByName")
        .filter(Predicate::eq("Name", "casualty"))
        .ids()
        .await
        .unwrap();
    assert!(casualties.is_empty());
    assert_eq!(tag_row(&fx.path, "x"), None);
}

#[tokio::test]
async fn cancellation_rolls_back_but_keeps_the_session_usable() {
    let fx = fixture().await;
    let token = tokio_util::sync::CancellationToken::new();
    let mut session = fx.store.create_session_with_cancel(token.clone()).await.unwrap();
    session.save(person("retry-me", 30, "t", 1)).unwrap();

    token.cancel();
    let err = session.save_changes().await.unwrap_err();
    assert!(matches!(err, Error::Cancelled));

    // Rolled back, not cancelled: the pending write is still tracked.
    assert!(!session.is_cancelled());
    assert_eq!(session.tracked(DocumentState::New).len(), 1);
    assert_eq!(count_rows(&fx.path, "Document"), 0);

    drop(session);
    let mut session = fx.store.create_session().await.unwrap();
    session.save(person("retry-me", 30, "t", 1)).unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(count_rows(&fx.path, "Document"), 1);
}

// ============================================
// Collections and prefixes
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuditEntry {
    id: i64,
    action: String,
}

impl Document for AuditEntry {
    const TYPE: &'static str = "AuditEntry";
    const COLLECTION: &'static str = "audit";
    fn id(&self) -> i64 {
        self.id
    }
    fn set_id(&mut self, id: i64) {
        self.id = id;
    }
}

#[tokio::test]
async fn collections_get_their_own_document_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("folio.db");
    let store = Store::builder()
        .dialect(SqliteDialect)
        .factory(SqliteFactory::open(&path).unwrap())
        .collection("audit")
        .build()
        .unwrap();
    store.initialize().await.unwrap();

    let mut session = store.create_session().await.unwrap();
    let id = session.save(AuditEntry { id: 0, action: "login".into() }).unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(count_rows(&path, "Document_audit"), 1);
    assert_eq!(count_rows(&path, "Document"), 0);

    let mut fresh = store.create_session().await.unwrap();
    let loaded = fresh.get::<AuditEntry>(id).await.unwrap().unwrap();
    assert_eq!(loaded.action, "login");
}

#[tokio::test]
async fn undeclared_collection_is_rejected_at_save() {
    let fx = fixture().await;
    let mut session = fx.store.create_session().await.unwrap();
    let err = session.save(AuditEntry { id: 0, action: "x".into() }).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[tokio::test]
async fn table_prefix_applies_to_every_table() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("folio.db");
    let store = Store::builder()
        .dialect(SqliteDialect)
        .factory(SqliteFactory::open(&path).unwrap())
        .options(StoreOptions {
            table_prefix: "App_".to_string(),
            ..StoreOptions::default()
        })
        .register_index(IndexSpec::map::<Person, _>(
            "ByName",
            vec![IndexColumn::new("Name", SqlType::Text)],
            |p| vec![IndexRow::new(vec![p.name.clone().into()])],
        ))
        .build()
        .unwrap();
    store.initialize().await.unwrap();

    let mut session = store.create_session().await.unwrap();
    session.save(person("prefixed", 1, "t", 1)).unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(count_rows(&path, "App_Document"), 1);
    assert_eq!(count_rows(&path, "App_ByName_Document"), 1);
    assert_eq!(count_rows(&path, "App_Identifiers"), 1);
}

// ============================================
// Batching
// ============================================

#[tokio::test]
async fn inserts_exceeding_the_parameter_ceiling_are_chunked() {
    // Four columns per document row and a ceiling of 8 forces two rows per
    // statement; everything still commits as one transaction.
    let fx = fixture_with(StoreOptions {
        max_parameters: 8,
        ..StoreOptions::default()
    })
    .await;

    let mut session = fx.store.create_session().await.unwrap();
    for i in 0..11 {
        session.save(person(&format!("bulk{i:02}"), i, "bulk", 1)).unwrap();
    }
    session.save_changes().await.unwrap();

    assert_eq!(count_rows(&fx.path, "Document"), 11);
    assert_eq!(count_rows(&fx.path, "ByName_Document"), 11);
    assert_eq!(tag_row(&fx.path, "bulk"), Some((11, 11)));
}

#[tokio::test]
async fn sessions_overflow_their_id_block_via_flush_assignment() {
    let fx = fixture_with(StoreOptions {
        id_block_size: 4,
        ..StoreOptions::default()
    })
    .await;

    let mut session = fx.store.create_session().await.unwrap();
    for i in 0..10 {
        session.save(person(&format!("many{i}"), i, "m", 1)).unwrap();
    }
    session.save_changes().await.unwrap();

    assert_eq!(count_rows(&fx.path, "Document"), 10);
    // All ids ended up positive and distinct.
    let distinct: i64 = raw(&fx.path)
        .query_row(
            "SELECT COUNT(DISTINCT \"Id\") FROM \"Document\" WHERE \"Id\" > 0",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert_eq!(distinct, 10);
}
