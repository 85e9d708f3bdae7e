//! Full-table scan driver

use crate::error::StoreError;
use crate::store::KeyValueStore;
use crate::types::{Projection, StoredRecord, TableName};

/// Records accumulated by a completed scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Every record, in the order the store returned them
    pub records: Vec<StoredRecord>,
    /// Pages fetched
    pub pages: usize,
}

/// Drives a paginated scan until the store stops issuing continuation tokens
#[derive(Debug)]
pub struct PageScanner<'a, S: ?Sized> {
    store: &'a S,
    projection: Projection,
}

impl<'a, S: KeyValueStore + ?Sized> PageScanner<'a, S> {
    /// Scanner requesting only `p` and `o`
    #[must_use]
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            projection: Projection::KeyAndPayload,
        }
    }

    /// With a different projection
    #[must_use]
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    /// Read every record of `table`
    ///
    /// # Errors
    /// The first failing page aborts the scan; nothing read so far is returned.
    pub async fn scan_all(&self, table: &TableName) -> Result<ScanResult, StoreError> {
        let mut result = ScanResult::default();
        let mut continuation = None;

        loop {
            let page = self.store.scan(table, self.projection, continuation.take()).await?;
            result.pages += 1;
            result.records.extend(page.records.iter().map(|r| self.projection.apply(r)));

            tracing::debug!(
                table = %table,
                page = result.pages,
                page_records = page.records.len(),
                total_records = result.records.len(),
                "scan page fetched"
            );

            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreOperation;
    use crate::store::MockKeyValueStore;
    use crate::types::{ContinuationToken, Payload, ScanPage, UniqueKey};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn record(key: &str) -> StoredRecord {
        StoredRecord::new(UniqueKey::from(key), Payload::new("{}"))
    }

    #[tokio::test]
    async fn follows_tokens_until_exhausted() {
        let mut store = MockKeyValueStore::new();
        let mut seq = Sequence::new();

        store
            .expect_scan()
            .with(
                eq(TableName::from("t")),
                eq(Projection::KeyAndPayload),
                eq(None::<ContinuationToken>),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(ScanPage {
                    records: vec![record("a"), record("b")],
                    next: Some(ContinuationToken::new("b")),
                })
            });
        store
            .expect_scan()
            .with(
                eq(TableName::from("t")),
                eq(Projection::KeyAndPayload),
                eq(Some(ContinuationToken::new("b"))),
            )
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(ScanPage {
                    records: vec![record("c")],
                    next: None,
                })
            });

        let result = PageScanner::new(&store).scan_all(&TableName::from("t")).await.unwrap();
        assert_eq!(result.pages, 2);
        let keys: Vec<_> = result.records.iter().map(|r| r.unique_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn empty_table_is_one_empty_page() {
        let mut store = MockKeyValueStore::new();
        store
            .expect_scan()
            .times(1)
            .returning(|_, _, _| Ok(ScanPage::default()));

        let result = PageScanner::new(&store).scan_all(&TableName::from("t")).await.unwrap();
        assert_eq!(result.pages, 1);
        assert!(result.records.is_empty());
    }

    #[tokio::test]
    async fn page_failure_aborts_scan() {
        let mut store = MockKeyValueStore::new();
        let mut seq = Sequence::new();

        store
            .expect_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(ScanPage {
                    records: vec![record("a")],
                    next: Some(ContinuationToken::new("a")),
                })
            });
        store
            .expect_scan()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|table, _, _| {
                Err(StoreError::transport(StoreOperation::Scan, table.clone(), "throttled"))
            });

        let err = PageScanner::new(&store)
            .scan_all(&TableName::from("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Transport { operation: StoreOperation::Scan, .. }));
    }
}
