//! Persistence of index records
//!
//! The store only needs to look records up by identity and write them back
//! in batches. Anything from a database to a JSON file can sit behind
//! [`IndexRepository`].

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::record::{FileIndexRecord, FileKind};

/// Identity of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    /// Tree level
    pub file_type: FileKind,
    /// Game build
    pub game_build: u32,
    /// Key within the parent
    pub key: u32,
    /// Owning archive
    pub archive_key: u32,
    /// Owning group
    pub group_key: u32,
}

/// Storage for index records
#[async_trait]
pub trait IndexRepository: Send + Sync {
    /// Fetch the record with this identity
    async fn get(&self, filter: &RecordFilter) -> Result<Option<FileIndexRecord>>;

    /// Insert or replace records
    async fn upsert(&self, records: Vec<FileIndexRecord>) -> Result<()>;
}

/// In-memory repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    records: RwLock<HashMap<RecordFilter, FileIndexRecord>>,
}

impl MemoryRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no records are stored
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of every record
    pub fn records(&self) -> Vec<FileIndexRecord> {
        self.records.read().values().cloned().collect()
    }
}

#[async_trait]
impl IndexRepository for MemoryRepository {
    async fn get(&self, filter: &RecordFilter) -> Result<Option<FileIndexRecord>> {
        Ok(self.records.read().get(filter).cloned())
    }

    async fn upsert(&self, records: Vec<FileIndexRecord>) -> Result<()> {
        let mut stored = self.records.write();
        for record in records {
            stored.insert(record.filter(), record);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repository = MemoryRepository::new();
        let mut record = FileIndexRecord::new(FileKind::Group, 435, 5, 3, 3);
        record.version = 2;

        repository.upsert(vec![record.clone()]).await.unwrap();
        assert_eq!(repository.len(), 1);
        assert_eq!(repository.get(&record.filter()).await.unwrap(), Some(record.clone()));

        record.version = 3;
        repository.upsert(vec![record.clone()]).await.unwrap();
        assert_eq!(repository.len(), 1);
        assert_eq!(
            repository.get(&record.filter()).await.unwrap().unwrap().version,
            3
        );
    }

    #[tokio::test]
    async fn test_identity_includes_build() {
        let repository = MemoryRepository::new();
        let record = FileIndexRecord::new(FileKind::Archive, 435, 5, 0, 5);
        repository.upsert(vec![record.clone()]).await.unwrap();

        let other_build = RecordFilter {
            game_build: 436,
            ..record.filter()
        };
        assert_eq!(repository.get(&other_build).await.unwrap(), None);
    }
}
