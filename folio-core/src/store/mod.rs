//! Store: process-wide configuration and session factory
//!
//! One store per configured database. It holds the dialect, the connection
//! factory, the codec, the index registry and the declared collections —
//! all immutable after [`StoreBuilder::build`] — plus the id allocator.
//! Stores are `Send + Sync`; sessions are produced per unit of work and
//! borrow the store.

pub mod ids;

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::{Connection, ConnectionFactory};
use crate::codec::{Codec, JsonCodec};
use crate::config::StoreOptions;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::index::{IndexRegistry, IndexSpec};
use crate::schema::{bootstrap_plan, Naming, SchemaManager};
use crate::session::Session;

use ids::{IdAllocator, DOCUMENT_DIMENSION};

/// Entry point: configuration plus session factory.
pub struct Store {
    dialect: Arc<dyn Dialect>,
    factory: Arc<dyn ConnectionFactory>,
    codec: Arc<dyn Codec>,
    options: StoreOptions,
    naming: Naming,
    collections: Vec<String>,
    registry: IndexRegistry,
    allocator: IdAllocator,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("collections", &self.collections)
            .finish()
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    pub(crate) fn factory(&self) -> &dyn ConnectionFactory {
        self.factory.as_ref()
    }

    pub(crate) fn codec(&self) -> &dyn Codec {
        self.codec.as_ref()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub(crate) fn allocator(&self) -> &IdAllocator {
        &self.allocator
    }

    /// A description of everything the store was configured with.
    pub fn configuration(&self) -> Configuration<'_> {
        Configuration {
            table_prefix: &self.options.table_prefix,
            collections: &self.collections,
            indexes: self
                .registry
                .iter()
                .map(|spec| IndexInfo {
                    name: spec.name(),
                    doc_type: spec.doc_type(),
                    table: if spec.reduce_spec().is_some() {
                        self.naming.reduced_table(spec.name())
                    } else {
                        self.naming.map_table(spec.name())
                    },
                    reduced: spec.reduce_spec().is_some(),
                })
                .collect(),
        }
    }

    /// Create the bootstrap tables that are missing: the document table per
    /// collection, the `Identifiers` table, and the tables behind every
    /// registered index. Idempotent; runs in one transaction.
    pub async fn initialize(&self) -> Result<()> {
        let mut conn = self.factory.connect().await?;
        conn.begin().await?;
        match self.bootstrap(conn.as_mut()).await {
            Ok(created) => {
                conn.commit().await?;
                tracing::info!(created, dialect = self.dialect.name(), "Store initialized");
                Ok(())
            }
            Err(e) => {
                let _ = conn.rollback().await;
                Err(e)
            }
        }
    }

    async fn bootstrap(&self, conn: &mut dyn Connection) -> Result<usize> {
        let specs: Vec<Arc<IndexSpec>> = self.registry.iter().cloned().collect();
        let plan = bootstrap_plan(&self.naming, &self.collections, &specs);

        let mut mgr = SchemaManager::new(self.dialect.as_ref(), self.naming.schema(), conn);
        let mut created = HashSet::new();
        for def in &plan.tables {
            if mgr.ensure_table(def).await? {
                created.insert(def.name.clone());
            }
        }
        for ddl in &plan.indexes {
            if created.contains(&ddl.table) {
                let cols: Vec<&str> = ddl.columns.iter().map(String::as_str).collect();
                mgr.create_index(&ddl.table, &cols, ddl.unique).await?;
            }
        }
        Ok(created.len())
    }

    /// Open a session. Reserves the session's document-id block, which is
    /// the one suspension here.
    pub async fn create_session(&self) -> Result<Session<'_>> {
        self.session_inner(None).await
    }

    /// Open a session carrying a cancellation token; every suspending
    /// session operation observes it.
    pub async fn create_session_with_cancel(
        &self,
        cancel: CancellationToken,
    ) -> Result<Session<'_>> {
        self.session_inner(Some(cancel)).await
    }

    async fn session_inner(&self, cancel: Option<CancellationToken>) -> Result<Session<'_>> {
        let mut conn = self.factory.connect().await?;
        let block = self
            .allocator
            .reserve(
                conn.as_mut(),
                self.dialect.as_ref(),
                &self.naming,
                DOCUMENT_DIMENSION,
            )
            .await?;
        Ok(Session::new(self, block, cancel))
    }
}

/// Store description: prefix, collections and registered indexes.
#[derive(Debug)]
pub struct Configuration<'a> {
    pub table_prefix: &'a str,
    pub collections: &'a [String],
    pub indexes: Vec<IndexInfo<'a>>,
}

/// One registered index as seen from the outside.
#[derive(Debug)]
pub struct IndexInfo<'a> {
    pub name: &'a str,
    pub doc_type: &'static str,
    pub table: String,
    pub reduced: bool,
}

// ============================================
// Builder
// ============================================

/// Collects configuration; validation happens in [`StoreBuilder::build`].
pub struct StoreBuilder {
    dialect: Option<Arc<dyn Dialect>>,
    factory: Option<Arc<dyn ConnectionFactory>>,
    codec: Arc<dyn Codec>,
    options: StoreOptions,
    indexes: Vec<IndexSpec>,
    collections: Vec<String>,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            dialect: None,
            factory: None,
            codec: Arc::new(JsonCodec),
            options: StoreOptions::default(),
            indexes: Vec::new(),
            // The default collection always exists.
            collections: vec![String::new()],
        }
    }
}

impl StoreBuilder {
    pub fn dialect(mut self, dialect: impl Dialect + 'static) -> Self {
        self.dialect = Some(Arc::new(dialect));
        self
    }

    pub fn factory(mut self, factory: impl ConnectionFactory + 'static) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    pub fn codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Declare a named collection (the default collection needs no
    /// declaration).
    pub fn collection(mut self, name: &str) -> Self {
        if !self.collections.iter().any(|c| c == name) {
            self.collections.push(name.to_string());
        }
        self
    }

    pub fn register_index(mut self, spec: IndexSpec) -> Self {
        self.indexes.push(spec);
        self
    }

    pub fn build(self) -> Result<Store> {
        let dialect = self
            .dialect
            .ok_or_else(|| Error::Configuration("a dialect is required".to_string()))?;
        let factory = self
            .factory
            .ok_or_else(|| Error::Configuration("a connection factory is required".to_string()))?;
        if self.options.id_block_size < 1 {
            return Err(Error::Configuration(
                "id_block_size must be at least 1".to_string(),
            ));
        }

        let mut registry = IndexRegistry::default();
        for spec in self.indexes {
            if !self.collections.iter().any(|c| c == spec.collection()) {
                return Err(Error::Configuration(format!(
                    "index {} targets undeclared collection '{}'",
                    spec.name(),
                    spec.collection()
                )));
            }
            registry.register(spec)?;
        }

        let naming = Naming::new(
            self.options.table_prefix.clone(),
            self.options.schema.clone(),
        );
        let allocator = IdAllocator::new(self.options.id_block_size);

        Ok(Store {
            dialect,
            factory,
            codec: self.codec,
            options: self.options,
            naming,
            collections: self.collections,
            registry,
            allocator,
        })
    }
}
