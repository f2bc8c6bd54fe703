//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryPointerRepository` and `MemoryBlobService` that satisfy
//! the trait contracts without git or a filesystem. Both count their calls
//! so tests can assert that a code path never touched the backend, and both
//! accept injected failures.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::StorageError;
use crate::glob::TagGlob;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryPointerRepository
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StoredTag {
    target: String,
    message: String,
    created_at: DateTime<Utc>,
}

/// Call counters recorded by the fakes.
#[derive(Debug, Default)]
pub struct CallCounts {
    creates: AtomicUsize,
    forced_creates: AtomicUsize,
    lists: AtomicUsize,
    deletes: AtomicUsize,
}

impl CallCounts {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn forced_creates(&self) -> usize {
        self.forced_creates.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Total number of calls of any kind.
    pub fn total(&self) -> usize {
        self.creates() + self.lists() + self.deletes()
    }
}

/// In-memory tag namespace backed by a `BTreeMap<name, tag>`.
///
/// Creation timestamps are strictly increasing so "newest" is unambiguous
/// even when two tags are written within the same clock tick.
#[derive(Debug, Default)]
pub struct MemoryPointerRepository {
    tags: Mutex<BTreeMap<String, StoredTag>>,
    last_created: Mutex<Option<DateTime<Utc>>>,
    calls: CallCounts,
    reject_non_forced: AtomicBool,
    fail_forced: AtomicBool,
    fail_deletes: AtomicBool,
    fail_lists: AtomicBool,
}

impl MemoryPointerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &CallCounts {
        &self.calls
    }

    /// Make every non-forced create fail as if the remote rejected the push.
    pub fn reject_non_forced_writes(&self, on: bool) {
        self.reject_non_forced.store(on, Ordering::SeqCst);
    }

    /// Make every forced create fail with a backend error.
    pub fn fail_forced_writes(&self, on: bool) {
        self.fail_forced.store(on, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, on: bool) {
        self.fail_deletes.store(on, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, on: bool) {
        self.fail_lists.store(on, Ordering::SeqCst);
    }

    /// Names of all stored tags, sorted.
    pub fn tag_names(&self) -> Vec<String> {
        self.tags.lock().unwrap().keys().cloned().collect()
    }

    /// Target and message of a stored tag.
    pub fn tag(&self, name: &str) -> Option<(String, String)> {
        self.tags
            .lock()
            .unwrap()
            .get(name)
            .map(|t| (t.target.clone(), t.message.clone()))
    }

    /// Insert a tag directly with an explicit timestamp, bypassing counters.
    pub fn seed(&self, name: &str, target: &str, message: &str, created_at: DateTime<Utc>) {
        self.tags.lock().unwrap().insert(
            name.to_string(),
            StoredTag {
                target: target.to_string(),
                message: message.to_string(),
                created_at,
            },
        );
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_created.lock().unwrap();
        let mut now = Utc::now();
        if let Some(prev) = *last {
            if now <= prev {
                now = prev + Duration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}

#[async_trait]
impl PointerRepository for MemoryPointerRepository {
    async fn create_tag(
        &self,
        name: &str,
        target: &str,
        message: &str,
        force: bool,
    ) -> StorageResult<()> {
        self.calls.creates.fetch_add(1, Ordering::SeqCst);
        if force {
            self.calls.forced_creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_forced.load(Ordering::SeqCst) {
                return Err(StorageError::Backend(format!(
                    "forced push of {name} failed"
                )));
            }
        } else if self.reject_non_forced.load(Ordering::SeqCst) {
            return Err(StorageError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let created_at = self.next_timestamp();
        let mut tags = self.tags.lock().unwrap();
        if !force && tags.contains_key(name) {
            return Err(StorageError::AlreadyExists {
                name: name.to_string(),
            });
        }
        tags.insert(
            name.to_string(),
            StoredTag {
                target: target.to_string(),
                message: message.to_string(),
                created_at,
            },
        );
        Ok(())
    }

    async fn list_tags(&self, pattern: &str) -> StorageResult<Vec<TagEntry>> {
        self.calls.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("tag listing unavailable".to_string()));
        }
        let glob = TagGlob::new(pattern)?;
        let tags = self.tags.lock().unwrap();
        Ok(tags
            .iter()
            .filter(|(name, _)| glob.is_match(name))
            .map(|(name, tag)| TagEntry {
                name: name.clone(),
                created_at: tag.created_at,
                message: Some(tag.message.clone()),
            })
            .collect())
    }

    async fn delete_tag(&self, name: &str) -> StorageResult<()> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!("delete of {name} failed")));
        }
        let mut tags = self.tags.lock().unwrap();
        tags.remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobService
// ---------------------------------------------------------------------------

/// In-memory blob service backed by a `HashMap<(run, name), bytes>`.
#[derive(Debug, Default)]
pub struct MemoryBlobService {
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl MemoryBlobService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn fail_uploads(&self, on: bool) {
        self.fail_uploads.store(on, Ordering::SeqCst);
    }

    pub fn contains(&self, run_id: &RunId, name: &str) -> bool {
        self.blobs
            .lock()
            .unwrap()
            .contains_key(&(run_id.0.clone(), name.to_string()))
    }

    /// Drop a blob, as an expired retention window would.
    pub fn expire(&self, run_id: &RunId, name: &str) {
        self.blobs
            .lock()
            .unwrap()
            .remove(&(run_id.0.clone(), name.to_string()));
    }
}

#[async_trait]
impl BlobService for MemoryBlobService {
    async fn upload(&self, run_id: &RunId, name: &str, data: &[u8]) -> StorageResult<()> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        validate_component(name)?;
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend(format!(
                "artifact service rejected upload of {name}"
            )));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert((run_id.0.clone(), name.to_string()), data.to_vec());
        Ok(())
    }

    async fn download(&self, run_id: &RunId, name: &str) -> StorageResult<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        validate_component(name)?;
        self.blobs
            .lock()
            .unwrap()
            .get(&(run_id.0.clone(), name.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                name: format!("{run_id}/{name}"),
            })
    }
}
