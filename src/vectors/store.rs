//! The vector record store.
//!
//! A named, append-only collection of records on disk, mirrored in memory
//! for scans. The handle is either uninitialized or open; clearing closes it
//! and deletes the collection, after which it must be initialized again.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::lock::{self, FileLock};
use crate::vectors::index::{self, QueryError, QueryResult, SearchFilter};
use crate::vectors::storage::{self, CollectionFile, StorageError};

/// One stored item.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Assigned by the store, strictly increasing from 1
    pub key: u64,
    /// Display label (file name or text)
    pub content: String,
    pub embedding: Vec<f32>,
    pub tags: BTreeSet<String>,
}

/// Where a store lives and what it expects.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Collection name; files are `<name>.vec` and `<name>.lock`
    pub name: String,
    /// Directory holding the collection files
    pub dir: PathBuf,
    /// Fixed dimensionality, or `None` to take it from the first insert
    pub dimensions: Option<usize>,
}

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Vector store '{0}' is not initialized")]
    NotInitialized(String),

    #[error("Failed to initialize vector store: {0}")]
    InitFailure(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store an empty embedding")]
    EmptyEmbedding,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Collection '{0}' is still open in another session")]
    ClearBlocked(String),
}

struct OpenCollection {
    file: CollectionFile,
    records: Vec<Record>,
    // held for as long as the collection is open
    _lock: FileLock,
}

/// Handle to a named vector collection.
pub struct VectorStore {
    config: StoreConfig,
    open: Option<OpenCollection>,
}

impl VectorStore {
    /// Create an uninitialized handle. Nothing touches disk until
    /// [`VectorStore::initialize`].
    pub fn new(config: StoreConfig) -> Self {
        Self { config, open: None }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn collection_path(&self) -> PathBuf {
        self.config.dir.join(format!("{}.vec", self.config.name))
    }

    fn lock_path(&self) -> PathBuf {
        self.config.dir.join(format!("{}.lock", self.config.name))
    }

    pub fn is_initialized(&self) -> bool {
        self.open.is_some()
    }

    /// Number of stored records; 0 while uninitialized.
    pub fn len(&self) -> usize {
        self.open.as_ref().map(|o| o.records.len()).unwrap_or(0)
    }

    /// The established dimensionality, if any.
    pub fn dimensions(&self) -> Option<usize> {
        match &self.open {
            Some(open) => open.file.dimensions(),
            None => self.config.dimensions,
        }
    }

    /// Open or create the backing collection. No-op when already open.
    pub fn initialize(&mut self) -> Result<(), StoreError> {
        if self.open.is_some() {
            return Ok(());
        }

        std::fs::create_dir_all(&self.config.dir).map_err(|e| {
            StoreError::InitFailure(format!(
                "cannot create {}: {e}",
                self.config.dir.display()
            ))
        })?;

        let lock = FileLock::try_shared(&self.lock_path()).map_err(|e| {
            if lock::is_contended(&e) {
                StoreError::InitFailure(format!(
                    "collection '{}' is being cleared by another session",
                    self.config.name
                ))
            } else {
                StoreError::InitFailure(format!("cannot lock collection: {e}"))
            }
        })?;

        let path = self.collection_path();
        let (mut file, mut records) = CollectionFile::open_or_create(&path)
            .map_err(|e| StoreError::InitFailure(format!("{}: {e}", path.display())))?;

        if let Some(configured) = self.config.dimensions {
            let _append = file.lock_for_append()?;
            records.extend(file.catch_up(records.last().map(|r| r.key))?);

            match file.dimensions() {
                Some(stored) if stored != configured => {
                    return Err(StoreError::InitFailure(format!(
                        "collection holds {stored}-dimensional vectors but {configured} are configured"
                    )));
                }
                Some(_) => {}
                None => file.set_dimensions(configured)?,
            }
        }

        log::info!(
            "Opened vector store '{}' with {} records",
            self.config.name,
            records.len()
        );

        self.open = Some(OpenCollection {
            file,
            records,
            _lock: lock,
        });
        Ok(())
    }

    /// Append a record and return its key.
    ///
    /// The record is synced to disk before this returns. A vector whose
    /// length differs from the established dimensionality is rejected.
    /// Records other sessions appended in the meantime are picked up first,
    /// so the new key follows theirs.
    pub fn insert(
        &mut self,
        content: &str,
        embedding: Vec<f32>,
        tags: BTreeSet<String>,
    ) -> Result<u64, StoreError> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| StoreError::NotInitialized(self.config.name.clone()))?;

        if embedding.is_empty() {
            return Err(StoreError::EmptyEmbedding);
        }

        let _append = open.file.lock_for_append()?;
        let appended = open.file.catch_up(open.records.last().map(|r| r.key))?;
        if !appended.is_empty() {
            log::debug!(
                "Picked up {} records appended to '{}' by another session",
                appended.len(),
                self.config.name
            );
            open.records.extend(appended);
        }

        if let Some(expected) = open.file.dimensions() {
            if expected != embedding.len() {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                });
            }
        }

        let key = open.records.last().map(|r| r.key + 1).unwrap_or(1);
        let record = Record {
            key,
            content: content.to_string(),
            embedding,
            tags,
        };

        open.file.append(&record)?;
        open.records.push(record);

        log::debug!("Inserted record {key} into '{}'", self.config.name);
        Ok(key)
    }

    /// Iterate over every record in key order.
    pub fn scan(&self) -> Result<std::slice::Iter<'_, Record>, StoreError> {
        self.open
            .as_ref()
            .map(|open| open.records.iter())
            .ok_or_else(|| StoreError::NotInitialized(self.config.name.clone()))
    }

    /// Rank stored records against `query`, best first.
    pub fn rank(
        &self,
        query: &[f32],
        k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<QueryResult>, StoreError> {
        let records = self.scan()?;
        Ok(index::rank(records, query, self.dimensions(), k, filter)?)
    }

    /// Delete the whole collection.
    ///
    /// The handle is closed first, so it is uninitialized afterwards whatever
    /// the outcome. If another session keeps the collection open the result is
    /// [`StoreError::ClearBlocked`] and nothing is deleted.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        // drop our own shared lock before asking for the exclusive one
        self.open = None;

        let _exclusive = FileLock::try_exclusive(&self.lock_path()).map_err(|e| {
            if lock::is_contended(&e) {
                StoreError::ClearBlocked(self.config.name.clone())
            } else {
                StoreError::Storage(StorageError::Io(e))
            }
        })?;

        storage::delete(&self.collection_path())?;

        log::info!("Cleared vector store '{}'", self.config.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &std::path::Path) -> StoreConfig {
        StoreConfig {
            name: "test".to_string(),
            dir: dir.to_path_buf(),
            dimensions: None,
        }
    }

    fn tags(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_operations_require_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));

        assert!(!store.is_initialized());
        assert!(matches!(
            store.insert("a", vec![1.0], BTreeSet::new()),
            Err(StoreError::NotInitialized(_))
        ));
        assert!(matches!(store.scan(), Err(StoreError::NotInitialized(_))));
    }

    #[test]
    fn test_insert_scan_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();

        let v = vec![0.1, -2.5, 3.75, f32::MIN_POSITIVE];
        let key = store.insert("clip.wav", v.clone(), tags(&["audio"])).unwrap();

        let found = store.scan().unwrap().find(|r| r.key == key).unwrap();
        assert_eq!(found.embedding, v);
        assert_eq!(found.content, "clip.wav");
        assert_eq!(found.tags, tags(&["audio"]));
    }

    #[test]
    fn test_keys_increase_in_insert_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();

        let keys: Vec<u64> = ["a", "b", "c"]
            .iter()
            .map(|c| store.insert(c, vec![1.0, 0.0], BTreeSet::new()).unwrap())
            .collect();

        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn test_dimension_mismatch_leaves_store_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();

        store.insert("a", vec![1.0, 0.0], BTreeSet::new()).unwrap();
        let result = store.insert("b", vec![1.0, 0.0, 0.0], BTreeSet::new());

        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_configured_dimensions_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.dimensions = Some(4);
        let mut store = VectorStore::new(cfg);
        store.initialize().unwrap();

        assert_eq!(store.dimensions(), Some(4));
        assert!(matches!(
            store.insert("a", vec![1.0, 0.0], BTreeSet::new()),
            Err(StoreError::DimensionMismatch { expected: 4, got: 2 })
        ));
        assert!(matches!(
            store.insert("a", vec![], BTreeSet::new()),
            Err(StoreError::EmptyEmbedding)
        ));
    }

    #[test]
    fn test_reopen_conflicting_dimensions_fails() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = VectorStore::new(config(dir.path()));
            store.initialize().unwrap();
            store.insert("a", vec![1.0, 0.0], BTreeSet::new()).unwrap();
        }

        let mut cfg = config(dir.path());
        cfg.dimensions = Some(3);
        let mut store = VectorStore::new(cfg);
        assert!(matches!(store.initialize(), Err(StoreError::InitFailure(_))));
        assert!(!store.is_initialized());
    }

    #[test]
    fn test_records_persist_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = VectorStore::new(config(dir.path()));
            store.initialize().unwrap();
            store.insert("a", vec![1.0, 0.0], tags(&["x"])).unwrap();
            store.insert("b", vec![0.0, 1.0], BTreeSet::new()).unwrap();
        }

        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.dimensions(), Some(2));

        // keys continue after the persisted ones
        let key = store.insert("c", vec![1.0, 1.0], BTreeSet::new()).unwrap();
        assert_eq!(key, 3);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();
        store.insert("a", vec![1.0], BTreeSet::new()).unwrap();
        store.initialize().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_then_reinitialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();
        store.insert("a", vec![1.0, 0.0], BTreeSet::new()).unwrap();

        store.clear().unwrap();
        assert!(!store.is_initialized());
        assert!(!store.collection_path().exists());
        assert!(matches!(
            store.insert("b", vec![1.0, 0.0], BTreeSet::new()),
            Err(StoreError::NotInitialized(_))
        ));

        store.initialize().unwrap();
        assert_eq!(store.len(), 0);
        // a cleared collection forgets its dimensionality
        store.insert("b", vec![1.0, 0.0, 0.0], BTreeSet::new()).unwrap();
        assert_eq!(store.scan().unwrap().count(), 1);
    }

    #[test]
    fn test_rank_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();
        store.insert("a", vec![1.0, 0.0], BTreeSet::new()).unwrap();
        store.insert("b", vec![0.0, 1.0], BTreeSet::new()).unwrap();
        store.insert("c", vec![1.0, 1.0], BTreeSet::new()).unwrap();

        let results = store.rank(&[1.0, 0.0], 2, &SearchFilter::default()).unwrap();
        let contents: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "c"]);

        assert!(matches!(
            store.rank(&[1.0], 2, &SearchFilter::default()),
            Err(StoreError::Query(QueryError::DimensionMismatch { .. }))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_clear_blocked_by_other_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut ours = VectorStore::new(config(dir.path()));
        ours.initialize().unwrap();
        ours.insert("a", vec![1.0], BTreeSet::new()).unwrap();

        let mut theirs = VectorStore::new(config(dir.path()));
        theirs.initialize().unwrap();

        assert!(matches!(ours.clear(), Err(StoreError::ClearBlocked(_))));
        assert!(ours.collection_path().exists());
        assert!(!ours.is_initialized());

        drop(theirs);
        ours.clear().unwrap();
        assert!(!ours.collection_path().exists());
    }

    #[test]
    fn test_two_sessions_append_without_losing_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = VectorStore::new(config(dir.path()));
        first.initialize().unwrap();
        first.insert("seed", vec![1.0, 0.0], BTreeSet::new()).unwrap();

        let mut second = VectorStore::new(config(dir.path()));
        second.initialize().unwrap();

        let a = first
            .insert("from-first-with-a-long-label", vec![0.0, 1.0], BTreeSet::new())
            .unwrap();
        let b = second.insert("b", vec![1.0, 1.0], BTreeSet::new()).unwrap();
        assert_eq!((a, b), (2, 3));
        assert_eq!(second.len(), 3);

        let c = first.insert("c", vec![0.5, 0.5], BTreeSet::new()).unwrap();
        assert_eq!(c, 4);
        drop(first);
        drop(second);

        let mut reopened = VectorStore::new(config(dir.path()));
        reopened.initialize().unwrap();
        let stored: Vec<(u64, String)> = reopened
            .scan()
            .unwrap()
            .map(|r| (r.key, r.content.clone()))
            .collect();
        assert_eq!(
            stored,
            vec![
                (1, "seed".to_string()),
                (2, "from-first-with-a-long-label".to_string()),
                (3, "b".to_string()),
                (4, "c".to_string()),
            ]
        );
    }

    #[test]
    fn test_dimensions_set_by_other_session_are_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = VectorStore::new(config(dir.path()));
        first.initialize().unwrap();
        let mut second = VectorStore::new(config(dir.path()));
        second.initialize().unwrap();

        first.insert("a", vec![1.0, 0.0], BTreeSet::new()).unwrap();

        assert!(matches!(
            second.insert("b", vec![1.0, 0.0, 0.0], BTreeSet::new()),
            Err(StoreError::DimensionMismatch { expected: 2, got: 3 })
        ));
        assert_eq!(second.dimensions(), Some(2));
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_failed_first_insert_leaves_dimensions_unset() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::new(config(dir.path()));
        store.initialize().unwrap();

        // tag lengths are stored as u16
        let long_tag = "t".repeat(70_000);
        let oversized = tags(&[long_tag.as_str()]);
        assert!(matches!(
            store.insert("a", vec![1.0, 0.0], oversized),
            Err(StoreError::Storage(_))
        ));
        assert_eq!(store.len(), 0);
        assert_eq!(store.dimensions(), None);

        let key = store.insert("b", vec![1.0, 0.0, 0.0], BTreeSet::new()).unwrap();
        assert_eq!(key, 1);
        assert_eq!(store.dimensions(), Some(3));
        drop(store);

        let mut reopened = VectorStore::new(config(dir.path()));
        reopened.initialize().unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.dimensions(), Some(3));
    }
}
