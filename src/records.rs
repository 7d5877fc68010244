//! Problem records and the record store boundary.
//!
//! The durable relational store lives outside this crate; `ProblemStore` is
//! the contract it must satisfy. Two reference implementations ship here:
//! `MemoryStore` for tests and `JsonFileStore` for single-file deployments.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// A solved problem: the original query, the solution that worked, the
/// tools involved and a short summary.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub uuid: String,
    pub query: String,
    pub solution: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub summary: String,
    /// Milliseconds since the epoch
    #[serde(default = "now_millis")]
    pub timestamp: i64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl ProblemRecord {
    pub fn new(
        uuid: impl Into<String>,
        query: impl Into<String>,
        solution: impl Into<String>,
        tools: Vec<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            query: query.into(),
            solution: solution.into(),
            tools,
            summary: summary.into(),
            timestamp: now_millis(),
        }
    }
}

/// A record as the store hands it back: the record itself plus the cached
/// embedding blob, when one has been computed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredProblem {
    pub record: ProblemRecord,
    #[serde(default)]
    pub embedding: Option<Vec<u8>>,
}

/// Boundary contract for the durable record store.
///
/// The embedding blob is opaque to the store: a little-endian f32 array
/// produced by [`crate::embedding::encode_blob`].
pub trait ProblemStore: Send + Sync {
    fn all_records(&self) -> anyhow::Result<Vec<StoredProblem>>;

    /// Fetch records for the given ids. Missing ids are simply absent from
    /// the result; the order is unspecified.
    fn records_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<ProblemRecord>>;

    fn insert_or_update(
        &self,
        record: &ProblemRecord,
        embedding: Option<&[u8]>,
    ) -> anyhow::Result<()>;

    /// Update only the cached embedding blob of an existing record.
    fn update_embedding(&self, id: &str, embedding: &[u8]) -> anyhow::Result<()>;

    /// Delete a record, reporting whether it existed.
    fn delete(&self, id: &str) -> anyhow::Result<bool>;

    fn count(&self) -> anyhow::Result<usize>;

    /// Case-insensitive substring search over the record text fields,
    /// newest first.
    fn search_text(&self, needle: &str) -> anyhow::Result<Vec<ProblemRecord>>;
}

fn record_matches(record: &ProblemRecord, needle: &str) -> bool {
    record.query.to_lowercase().contains(needle)
        || record.summary.to_lowercase().contains(needle)
        || record.solution.to_lowercase().contains(needle)
        || record.tools.iter().any(|t| t.to_lowercase().contains(needle))
}

fn sorted_newest_first(mut records: Vec<ProblemRecord>) -> Vec<ProblemRecord> {
    records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.uuid.cmp(&b.uuid)));
    records
}

/// In-memory store, primarily a test double.
#[derive(Default)]
pub struct MemoryStore {
    problems: RwLock<HashMap<String, StoredProblem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProblemStore for MemoryStore {
    fn all_records(&self) -> anyhow::Result<Vec<StoredProblem>> {
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let mut all: Vec<StoredProblem> = guard.values().cloned().collect();
        all.sort_by(|a, b| a.record.uuid.cmp(&b.record.uuid));
        Ok(all)
    }

    fn records_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<ProblemRecord>> {
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        Ok(ids
            .iter()
            .filter_map(|id| guard.get(id).map(|p| p.record.clone()))
            .collect())
    }

    fn insert_or_update(
        &self,
        record: &ProblemRecord,
        embedding: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        let mut guard = self
            .problems
            .write()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        guard.insert(
            record.uuid.clone(),
            StoredProblem {
                record: record.clone(),
                embedding: embedding.map(|b| b.to_vec()),
            },
        );
        Ok(())
    }

    fn update_embedding(&self, id: &str, embedding: &[u8]) -> anyhow::Result<()> {
        let mut guard = self
            .problems
            .write()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| anyhow!("record {id} not found"))?;
        stored.embedding = Some(embedding.to_vec());
        Ok(())
    }

    fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let mut guard = self
            .problems
            .write()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        Ok(guard.remove(id).is_some())
    }

    fn count(&self) -> anyhow::Result<usize> {
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        Ok(guard.len())
    }

    fn search_text(&self, needle: &str) -> anyhow::Result<Vec<ProblemRecord>> {
        let needle = needle.to_lowercase();
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let matches = guard
            .values()
            .filter(|p| record_matches(&p.record, &needle))
            .map(|p| p.record.clone())
            .collect();
        Ok(sorted_newest_first(matches))
    }
}

/// Single-file JSON store with atomic temp-then-rename writes.
pub struct JsonFileStore {
    path: PathBuf,
    problems: RwLock<HashMap<String, StoredProblem>>,
}

impl JsonFileStore {
    /// Open the store, loading any existing file. A missing file is the
    /// first-run state; a corrupt one is an error so data is not silently
    /// overwritten.
    pub fn open(path: PathBuf) -> anyhow::Result<Self> {
        let problems = if path.exists() {
            let data = std::fs::read(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let list: Vec<StoredProblem> = serde_json::from_slice(&data)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            list.into_iter()
                .map(|p| (p.record.uuid.clone(), p))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            path,
            problems: RwLock::new(problems),
        })
    }

    fn persist(&self, guard: &HashMap<String, StoredProblem>) -> anyhow::Result<()> {
        let mut list: Vec<&StoredProblem> = guard.values().collect();
        list.sort_by(|a, b| a.record.uuid.cmp(&b.record.uuid));
        let data = serde_json::to_vec_pretty(&list)?;

        let temp_path = self.path.with_extension("tmp");
        std::fs::write(&temp_path, &data)
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

impl ProblemStore for JsonFileStore {
    fn all_records(&self) -> anyhow::Result<Vec<StoredProblem>> {
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let mut all: Vec<StoredProblem> = guard.values().cloned().collect();
        all.sort_by(|a, b| a.record.uuid.cmp(&b.record.uuid));
        Ok(all)
    }

    fn records_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<ProblemRecord>> {
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        Ok(ids
            .iter()
            .filter_map(|id| guard.get(id).map(|p| p.record.clone()))
            .collect())
    }

    fn insert_or_update(
        &self,
        record: &ProblemRecord,
        embedding: Option<&[u8]>,
    ) -> anyhow::Result<()> {
        let mut guard = self
            .problems
            .write()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        guard.insert(
            record.uuid.clone(),
            StoredProblem {
                record: record.clone(),
                embedding: embedding.map(|b| b.to_vec()),
            },
        );
        self.persist(&guard)
    }

    fn update_embedding(&self, id: &str, embedding: &[u8]) -> anyhow::Result<()> {
        let mut guard = self
            .problems
            .write()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let stored = guard
            .get_mut(id)
            .ok_or_else(|| anyhow!("record {id} not found"))?;
        stored.embedding = Some(embedding.to_vec());
        self.persist(&guard)
    }

    fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let mut guard = self
            .problems
            .write()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let existed = guard.remove(id).is_some();
        if existed {
            self.persist(&guard)?;
        }
        Ok(existed)
    }

    fn count(&self) -> anyhow::Result<usize> {
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        Ok(guard.len())
    }

    fn search_text(&self, needle: &str) -> anyhow::Result<Vec<ProblemRecord>> {
        let needle = needle.to_lowercase();
        let guard = self
            .problems
            .read()
            .map_err(|e| anyhow!("store lock poisoned: {e}"))?;
        let matches = guard
            .values()
            .filter(|p| record_matches(&p.record, &needle))
            .map(|p| p.record.clone())
            .collect();
        Ok(sorted_newest_first(matches))
    }
}
