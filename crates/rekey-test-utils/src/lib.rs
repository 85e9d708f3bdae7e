//! Testing utilities for rekey workspace
//!
//! Shared fixtures, an in-memory migration harness, and instrumented
//! collaborators for concurrency and failure-injection tests.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rekey_core::memory::{Document, JsonCodec, KeySchema, MemoryStore, MemoryWritePath};
use rekey_core::{
    CanonicalWriter, ContinuationToken, KeyValueStore, MigrationConfig, Migrator, Projection,
    RecordCodec, ScanPage, StoreError, StoreOperation, StoredRecord, TableName, UniqueKey,
    UpsertOptions, UpsertOutcome, WriteError,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const UNIQUE_INDEX: &str = "unique_index";
pub const ENTITIES: &str = "entities";

pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

pub fn user(tenant: &str, email: &str, updated_secs: i64) -> Document {
    Document::new(ts(updated_secs))
        .with_attribute("tenant", tenant)
        .with_attribute("email", email)
}

/// Keys by email only
pub fn legacy_schema() -> KeySchema {
    KeySchema::new(["email"])
}

/// Keys by tenant and email under a namespace prefix
pub fn current_schema() -> KeySchema {
    KeySchema::new(["tenant", "email"]).with_prefix("user#")
}

pub type MemoryMigrator = Migrator<MemoryStore, JsonCodec, MemoryWritePath>;

/// A memory store plus the collaborators a migration needs
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub codec: Arc<JsonCodec>,
    pub writer: Arc<MemoryWritePath>,
    pub config: MigrationConfig,
}

impl Harness {
    pub fn new(schema: KeySchema) -> Self {
        Self::with_page_size(schema, MemoryStore::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(schema: KeySchema, page_size: usize) -> Self {
        let store = Arc::new(MemoryStore::with_page_size(page_size));
        let codec = Arc::new(JsonCodec::new(schema));
        let writer = Arc::new(MemoryWritePath::new(
            Arc::clone(&store),
            (*codec).clone(),
            UNIQUE_INDEX,
            ENTITIES,
        ));
        Self {
            store,
            codec,
            writer,
            config: MigrationConfig::new().with_unique_index_table(UNIQUE_INDEX),
        }
    }

    pub fn unique_index(&self) -> TableName {
        TableName::from(UNIQUE_INDEX)
    }

    /// Store `docs` in `table` keyed by `schema`
    pub fn seed(&self, table: &str, schema: &KeySchema, docs: &[Document]) {
        let codec = JsonCodec::new(schema.clone());
        for doc in docs {
            let record = codec.encode(doc).unwrap();
            self.store.insert(table, record);
        }
    }

    /// Store `docs` in the unique index keyed by [`legacy_schema`]
    pub fn seed_legacy(&self, docs: &[Document]) {
        self.seed(UNIQUE_INDEX, &legacy_schema(), docs);
    }

    /// Store `docs` in the unique index keyed by the harness's schema
    pub fn seed_current(&self, docs: &[Document]) {
        for doc in docs {
            self.store.insert(UNIQUE_INDEX, self.codec.encode(doc).unwrap());
        }
    }

    pub fn migrator(&self) -> MemoryMigrator {
        Migrator::new(
            Arc::clone(&self.store),
            Arc::clone(&self.codec),
            Arc::clone(&self.writer),
            &self.config,
        )
        .unwrap()
    }

    /// Decoded document stored at `key` in the unique index
    pub fn lookup(&self, key: &str) -> Option<Document> {
        self.store
            .records(&self.unique_index())
            .into_iter()
            .find(|r| r.unique_key.as_str() == key)
            .map(|r| self.codec.decode(&r).unwrap())
    }

    pub fn current_key(&self, doc: &Document) -> UniqueKey {
        self.codec.unique_key(doc).unwrap()
    }
}

/// Counts how many calls are inside an instrumented collaborator at once
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    entries: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> usize {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ProbeGuard<'_> {
        self.entries.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard { probe: self }
    }
}

struct ProbeGuard<'a> {
    probe: &'a ConcurrencyProbe,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probe.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Store wrapper that records concurrent entries and holds each call open
pub struct ProbedStore<S> {
    inner: S,
    probe: Arc<ConcurrencyProbe>,
    delay: Duration,
}

impl<S> ProbedStore<S> {
    pub fn new(inner: S, probe: Arc<ConcurrencyProbe>, delay: Duration) -> Self {
        Self {
            inner,
            probe,
            delay,
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for ProbedStore<S> {
    async fn scan(
        &self,
        table: &TableName,
        projection: Projection,
        continuation: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError> {
        self.inner.scan(table, projection, continuation).await
    }

    async fn query_unique(
        &self,
        table: &TableName,
        key: &UniqueKey,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let _guard = self.probe.enter();
        tokio::time::sleep(self.delay).await;
        self.inner.query_unique(table, key).await
    }

    async fn put_unique_index_record(
        &self,
        table: &TableName,
        key: &UniqueKey,
        record: StoredRecord,
    ) -> Result<(), StoreError> {
        let _guard = self.probe.enter();
        tokio::time::sleep(self.delay).await;
        self.inner.put_unique_index_record(table, key, record).await
    }
}

/// Writer wrapper that records concurrent entries and holds each call open
pub struct ProbedWriter<W> {
    inner: W,
    probe: Arc<ConcurrencyProbe>,
    delay: Duration,
}

impl<W> ProbedWriter<W> {
    pub fn new(inner: W, probe: Arc<ConcurrencyProbe>, delay: Duration) -> Self {
        Self {
            inner,
            probe,
            delay,
        }
    }
}

#[async_trait]
impl<W: CanonicalWriter<Document>> CanonicalWriter<Document> for ProbedWriter<W> {
    async fn upsert(
        &self,
        entity: &Document,
        options: UpsertOptions,
    ) -> Result<UpsertOutcome, WriteError> {
        let _guard = self.probe.enter();
        tokio::time::sleep(self.delay).await;
        self.inner.upsert(entity, options).await
    }
}

/// Store wrapper that injects transport failures
pub struct FaultyStore<S> {
    inner: S,
    fail_scan_page: Option<usize>,
    fail_lookups: HashSet<UniqueKey>,
    fail_puts: HashSet<UniqueKey>,
    pages_served: AtomicUsize,
    puts: Mutex<Vec<UniqueKey>>,
}

impl<S> FaultyStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            fail_scan_page: None,
            fail_lookups: HashSet::new(),
            fail_puts: HashSet::new(),
            pages_served: AtomicUsize::new(0),
            puts: Mutex::new(Vec::new()),
        }
    }

    /// Fail the `page`-th scan call (1-based)
    pub fn failing_scan_page(mut self, page: usize) -> Self {
        self.fail_scan_page = Some(page);
        self
    }

    pub fn failing_lookup(mut self, key: impl Into<String>) -> Self {
        self.fail_lookups.insert(UniqueKey::new(key));
        self
    }

    pub fn failing_put(mut self, key: impl Into<String>) -> Self {
        self.fail_puts.insert(UniqueKey::new(key));
        self
    }

    /// Keys successfully written through this wrapper
    pub fn puts(&self) -> Vec<UniqueKey> {
        self.puts.lock().clone()
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for FaultyStore<S> {
    async fn scan(
        &self,
        table: &TableName,
        projection: Projection,
        continuation: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError> {
        let page = self.pages_served.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_scan_page == Some(page) {
            return Err(StoreError::transport(
                StoreOperation::Scan,
                table.clone(),
                format!("injected failure on page {page}"),
            ));
        }
        self.inner.scan(table, projection, continuation).await
    }

    async fn query_unique(
        &self,
        table: &TableName,
        key: &UniqueKey,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        if self.fail_lookups.contains(key) {
            return Err(StoreError::transport(
                StoreOperation::Lookup,
                table.clone(),
                format!("injected failure for {key}"),
            ));
        }
        self.inner.query_unique(table, key).await
    }

    async fn put_unique_index_record(
        &self,
        table: &TableName,
        key: &UniqueKey,
        record: StoredRecord,
    ) -> Result<(), StoreError> {
        if self.fail_puts.contains(key) {
            return Err(StoreError::transport(
                StoreOperation::Put,
                table.clone(),
                format!("injected failure for {key}"),
            ));
        }
        self.inner.put_unique_index_record(table, key, record).await?;
        self.puts.lock().push(key.clone());
        Ok(())
    }
}

/// Store wrapper that returns every scan page in a caller-chosen key order
pub struct ReorderedStore<S> {
    inner: S,
    rank: HashMap<UniqueKey, usize>,
}

impl<S> ReorderedStore<S> {
    /// Keys missing from `order` sort last
    pub fn new(inner: S, order: impl IntoIterator<Item = UniqueKey>) -> Self {
        Self {
            inner,
            rank: order.into_iter().enumerate().map(|(i, k)| (k, i)).collect(),
        }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for ReorderedStore<S> {
    async fn scan(
        &self,
        table: &TableName,
        projection: Projection,
        continuation: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError> {
        let mut page = self.inner.scan(table, projection, continuation).await?;
        page.records
            .sort_by_key(|r| self.rank.get(&r.unique_key).copied().unwrap_or(usize::MAX));
        Ok(page)
    }

    async fn query_unique(
        &self,
        table: &TableName,
        key: &UniqueKey,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        self.inner.query_unique(table, key).await
    }

    async fn put_unique_index_record(
        &self,
        table: &TableName,
        key: &UniqueKey,
        record: StoredRecord,
    ) -> Result<(), StoreError> {
        self.inner.put_unique_index_record(table, key, record).await
    }
}
