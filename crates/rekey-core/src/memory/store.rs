//! In-process key-value store

use super::snapshot::Snapshot;
use crate::error::StoreError;
use crate::store::KeyValueStore;
use crate::types::{
    ContinuationToken, Projection, RecordAddress, ScanPage, StoredRecord, TableName, UniqueKey,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;

type RowKey = (String, Option<String>);
type Table = BTreeMap<RowKey, StoredRecord>;

/// Tables of records addressed by `(hash_key, range_key)`
///
/// Scans return at most `page_size` records per page and hand back the last
/// evaluated row key as the continuation token.
#[derive(Debug)]
pub struct MemoryStore {
    tables: RwLock<BTreeMap<TableName, Table>>,
    page_size: usize,
}

impl MemoryStore {
    /// Default scan page size
    pub const DEFAULT_PAGE_SIZE: usize = 100;

    /// Empty store with the default page size
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(Self::DEFAULT_PAGE_SIZE)
    }

    /// Empty store returning at most `page_size` records per scan page (minimum 1)
    #[must_use]
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            page_size: page_size.max(1),
        }
    }

    /// Store seeded from a snapshot
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot, page_size: usize) -> Self {
        let store = Self::with_page_size(page_size);
        for (table, records) in snapshot.tables {
            for record in records {
                store.insert(table.clone(), record);
            }
        }
        store
    }

    /// Records per scan page
    #[inline]
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Insert or replace a record
    ///
    /// Records without addressing are addressed by their unique key.
    pub fn insert(&self, table: impl Into<TableName>, record: StoredRecord) {
        let address = record
            .address
            .clone()
            .unwrap_or_else(|| RecordAddress::hash(record.unique_key.as_str()));
        let row = (address.hash_key.clone(), address.range_key.clone());
        self.tables
            .write()
            .entry(table.into())
            .or_default()
            .insert(row, record.with_address(address));
    }

    /// Every record of `table` in row-key order
    #[must_use]
    pub fn records(&self, table: &TableName) -> Vec<StoredRecord> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records in `table`
    #[must_use]
    pub fn len(&self, table: &TableName) -> usize {
        self.tables.read().get(table).map_or(0, BTreeMap::len)
    }

    /// True when `table` is absent or empty
    #[must_use]
    pub fn is_empty(&self, table: &TableName) -> bool {
        self.len(table) == 0
    }

    /// Names of every table
    #[must_use]
    pub fn table_names(&self) -> Vec<TableName> {
        self.tables.read().keys().cloned().collect()
    }

    /// Copy of every table
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let tables = self
            .tables
            .read()
            .iter()
            .map(|(name, rows)| (name.clone(), rows.values().cloned().collect()))
            .collect();
        Snapshot { tables }
    }

    fn encode_token(row: &RowKey) -> Result<ContinuationToken, StoreError> {
        serde_json::to_string(row)
            .map(ContinuationToken::new)
            .map_err(|e| StoreError::InvalidContinuation(e.to_string()))
    }

    fn decode_token(token: &ContinuationToken) -> Result<RowKey, StoreError> {
        serde_json::from_str(token.as_str())
            .map_err(|e| StoreError::InvalidContinuation(format!("{}: {e}", token.as_str())))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn scan(
        &self,
        table: &TableName,
        projection: Projection,
        continuation: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError> {
        let start = match &continuation {
            Some(token) => Bound::Excluded(Self::decode_token(token)?),
            None => Bound::Unbounded,
        };

        let tables = self.tables.read();
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::TableNotFound(table.clone()))?;

        let mut window = rows.range((start, Bound::Unbounded));
        let page: Vec<(&RowKey, &StoredRecord)> = window.by_ref().take(self.page_size).collect();
        let has_more = window.next().is_some();

        let next = match page.last() {
            Some((row, _)) if has_more => Some(Self::encode_token(row)?),
            _ => None,
        };

        Ok(ScanPage {
            records: page.into_iter().map(|(_, r)| projection.apply(r)).collect(),
            next,
        })
    }

    async fn query_unique(
        &self,
        table: &TableName,
        key: &UniqueKey,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let tables = self.tables.read();
        let Some(rows) = tables.get(table) else {
            return Ok(Vec::new());
        };

        Ok(rows
            .range((key.as_str().to_string(), None)..)
            .take_while(|((hash_key, _), _)| hash_key == key.as_str())
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn put_unique_index_record(
        &self,
        table: &TableName,
        key: &UniqueKey,
        record: StoredRecord,
    ) -> Result<(), StoreError> {
        let record = record.with_address(RecordAddress::hash(key.as_str()));
        self.tables
            .write()
            .entry(table.clone())
            .or_default()
            .insert((key.as_str().to_string(), None), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;

    fn record(key: &str) -> StoredRecord {
        StoredRecord::new(UniqueKey::from(key), Payload::new(format!("\"{key}\"")))
    }

    fn table() -> TableName {
        TableName::from("t")
    }

    #[tokio::test]
    async fn scan_pages_through_every_record_once() {
        let store = MemoryStore::with_page_size(3);
        for i in 0..8 {
            store.insert(table(), record(&format!("k{i:02}")));
        }

        let mut seen = Vec::new();
        let mut pages = 0;
        let mut token = None;
        loop {
            let page = store.scan(&table(), Projection::KeyAndPayload, token.take()).await.unwrap();
            pages += 1;
            assert!(page.records.iter().all(|r| r.address.is_none()));
            seen.extend(page.records.into_iter().map(|r| r.unique_key));
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert_eq!(pages, 3);
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.first().unwrap().as_str(), "k00");
        assert_eq!(seen.last().unwrap().as_str(), "k07");
    }

    #[tokio::test]
    async fn exact_multiple_of_page_size_has_no_trailing_page() {
        let store = MemoryStore::with_page_size(2);
        for key in ["a", "b", "c", "d"] {
            store.insert(table(), record(key));
        }

        let first = store.scan(&table(), Projection::Full, None).await.unwrap();
        let second = store.scan(&table(), Projection::Full, first.next).await.unwrap();
        assert_eq!(second.records.len(), 2);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn scan_of_missing_table_fails() {
        let store = MemoryStore::new();
        let err = store.scan(&table(), Projection::Full, None).await.unwrap_err();
        assert_eq!(err, StoreError::TableNotFound(table()));
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let store = MemoryStore::new();
        store.insert(table(), record("a"));
        let err = store
            .scan(&table(), Projection::Full, Some(ContinuationToken::new("nope")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidContinuation(_)));
    }

    #[tokio::test]
    async fn query_unique_returns_every_range_under_a_hash_key() {
        let store = MemoryStore::new();
        store.insert(table(), record("a").with_address(RecordAddress::with_range("a", "1")));
        store.insert(table(), record("a").with_address(RecordAddress::with_range("a", "2")));
        store.insert(table(), record("ab"));
        store.insert(table(), record("b"));

        let found = store.query_unique(&table(), &UniqueKey::from("a")).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(store
            .query_unique(&TableName::from("missing"), &UniqueKey::from("a"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn put_replaces_in_place() {
        let store = MemoryStore::new();
        let key = UniqueKey::from("a");
        store.put_unique_index_record(&table(), &key, record("a")).await.unwrap();
        store
            .put_unique_index_record(
                &table(),
                &key,
                StoredRecord::new(key.clone(), Payload::new("\"v2\"")),
            )
            .await
            .unwrap();

        let records = store.records(&table());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload.as_str(), "\"v2\"");
        assert_eq!(records[0].address, Some(RecordAddress::hash("a")));
    }

    #[test]
    fn snapshot_round_trip_preserves_tables() {
        let store = MemoryStore::with_page_size(5);
        store.insert(table(), record("a"));
        store.insert(TableName::from("other"), record("b"));

        let restored = MemoryStore::from_snapshot(store.snapshot(), 5);
        assert_eq!(restored.table_names(), store.table_names());
        assert_eq!(restored.records(&table()), store.records(&table()));
    }
}
