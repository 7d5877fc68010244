//! High-level retrieval engine.
//!
//! Owns the in-memory vector index, coordinates the embedder and the
//! relevance scorer against the record store, and keeps the persisted
//! index file in sync through a background saver thread so persistence
//! I/O never blocks ingestion or queries.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::JoinHandle;

use rand::seq::SliceRandom;

use crate::config::{ConfigError, RetrievalConfig};
use crate::embedding::{decode_blob, encode_blob, Embedder};
use crate::index::{IndexError, VectorIndex};
use crate::records::{ProblemRecord, ProblemStore};
use crate::relevance::RelevanceScorer;
use crate::storage::{IndexStorage, StorageError};
use crate::tokenize::Tokenizer;

/// Only the head of a solution contributes to its embedding; solutions
/// are long and their tails are mostly noise.
const SOLUTION_EXCERPT_CHARS: usize = 500;
/// Result limit for the vector path of `search`
const SIMILAR_RESULTS_LIMIT: usize = 20;
/// Direct store matches that make keyword scoring unnecessary
const DIRECT_MATCH_SHORT_CIRCUIT: usize = 5;
/// Keyword scoring scans at most this many randomly sampled records
const KEYWORD_CANDIDATE_CAP: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

enum SaverTask {
    Save,
    Shutdown,
}

/// Retrieval engine for the problem library.
///
/// The index and token cache are process-local; the record store remains
/// the durable source of truth. Index and store may disagree briefly
/// (for example after a store write fails); `rebuild_from_store` and the
/// self-healing in `search_similar` reconcile them.
pub struct RetrievalEngine {
    config: RetrievalConfig,
    store: Arc<dyn ProblemStore>,
    tokenizer: Arc<Tokenizer>,
    embedder: Embedder,
    scorer: RelevanceScorer,
    index: Arc<RwLock<VectorIndex>>,
    insert_count: AtomicU64,
    saver_tx: mpsc::Sender<SaverTask>,
    saver_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetrievalEngine {
    /// Open an engine, hydrating the index from the persisted file when one
    /// exists. A corrupt or unreadable file degrades to an empty index;
    /// `search_similar` rebuilds it from the store on first use.
    pub fn open(
        config: RetrievalConfig,
        base_dir: &Path,
        store: Arc<dyn ProblemStore>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let tokenizer = Arc::new(Tokenizer::new(config.token_cache_size));
        let embedder = Embedder::new(config.dimensions, Arc::clone(&tokenizer));
        let scorer = RelevanceScorer::new(Arc::clone(&tokenizer));

        let storage = IndexStorage::new(base_dir.join(&config.index_filename));

        let index = if storage.exists() {
            match storage.load(config.dimensions) {
                Ok(index) => {
                    log::info!(
                        "loaded {} vectors from {}",
                        index.len(),
                        storage.path().display()
                    );
                    index
                }
                Err(e) => {
                    log::warn!("failed to load persisted index, starting empty: {e}");
                    VectorIndex::new(config.dimensions)
                }
            }
        } else {
            log::info!("no persisted index, starting empty");
            VectorIndex::new(config.dimensions)
        };

        let index = Arc::new(RwLock::new(index));

        let (saver_tx, saver_rx) = mpsc::channel();
        // The saver thread takes sole ownership of the storage handle; all
        // writes to the index file go through it.
        let saver_handle = std::thread::spawn({
            let index = Arc::clone(&index);
            move || saver_loop(saver_rx, index, storage)
        });

        Ok(Self {
            config,
            store,
            tokenizer,
            embedder,
            scorer,
            index,
            insert_count: AtomicU64::new(0),
            saver_tx,
            saver_handle: Mutex::new(Some(saver_handle)),
        })
    }

    /// Index a record and write it (plus its embedding blob) to the store.
    ///
    /// Replaces any stale entry for the same uuid. Every N-th successful
    /// insert schedules a background save.
    pub fn add_record(&self, record: &ProblemRecord) -> Result<(), EngineError> {
        let embedding = self.embedder.embed(&weighted_text(record));
        let blob = encode_blob(&embedding);

        {
            let mut index = self.write_index()?;
            index.remove(&record.uuid);
            index.insert(record.uuid.clone(), embedding)?;
        }

        self.store.insert_or_update(record, Some(&blob))?;

        let inserts = self.insert_count.fetch_add(1, Ordering::SeqCst) + 1;
        if inserts % self.config.save_interval == 0 {
            self.request_save();
        }

        log::debug!("indexed record {}", record.uuid);
        Ok(())
    }

    /// Find records most similar to `query`, best first.
    ///
    /// An empty index triggers a rebuild from the store before querying.
    /// Ids the store no longer knows are dropped from the result; the
    /// index catches up on the next rebuild.
    pub fn search_similar(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<ProblemRecord>, EngineError> {
        if self.read_index()?.is_empty() {
            log::warn!("vector index is empty, rebuilding from store");
            self.rebuild_from_store()?;
        }

        let query_embedding = self.embedder.embed(query);

        let nearest = {
            let index = self.read_index()?;
            if index.is_empty() {
                return Ok(vec![]);
            }
            index.find_nearest(&query_embedding, max_results)
        };

        let ids: Vec<String> = nearest.into_iter().map(|r| r.id).collect();
        let records = self.store.records_by_ids(&ids)?;
        let by_id: HashMap<&str, &ProblemRecord> =
            records.iter().map(|r| (r.uuid.as_str(), r)).collect();

        let mut ordered = Vec::with_capacity(ids.len());
        for id in &ids {
            match by_id.get(id.as_str()) {
                Some(record) => ordered.push((*record).clone()),
                None => log::warn!("record {id} is indexed but missing from the store"),
            }
        }

        Ok(ordered)
    }

    /// Rebuild the index from the store, returning how many records were
    /// indexed.
    ///
    /// Cached embedding blobs are reused; records without a usable blob
    /// are re-embedded and the fresh blob is written back. A single bad
    /// record never aborts the batch. The replacement map is built off to
    /// the side and swapped in atomically, so concurrent readers never
    /// observe a partially rebuilt index.
    pub fn rebuild_from_store(&self) -> Result<usize, EngineError> {
        let stored = self.store.all_records()?;
        let mut fresh = VectorIndex::new(self.config.dimensions);

        for problem in &stored {
            let uuid = &problem.record.uuid;

            let embedding = match problem
                .embedding
                .as_deref()
                .and_then(|blob| decode_blob(blob, self.config.dimensions).ok())
            {
                Some(vector) => vector,
                None => {
                    let vector = self.embedder.embed(&weighted_text(&problem.record));
                    if let Err(e) = self.store.update_embedding(uuid, &encode_blob(&vector)) {
                        log::error!("failed to write embedding for {uuid} back to the store: {e}");
                    }
                    vector
                }
            };

            if let Err(e) = fresh.insert(uuid.clone(), embedding) {
                log::error!("skipping record {uuid} during rebuild: {e}");
            }
        }

        let count = fresh.len();
        *self.write_index()? = fresh;
        self.request_save();

        log::info!("rebuilt vector index from store, {count} records indexed");
        Ok(count)
    }

    /// Delete a record from the store and drop it from the index.
    /// Returns whether the store had the record.
    pub fn remove_record(&self, id: &str) -> Result<bool, EngineError> {
        let existed = self.store.delete(id)?;
        self.write_index()?.remove(id);
        self.request_save();
        Ok(existed)
    }

    /// Best-effort search that never fails.
    ///
    /// Vector search first; on any error, keyword fallback. A degraded
    /// search is indistinguishable from no match: the caller gets an empty
    /// list either way. A blank query lists everything.
    pub fn search(&self, query: &str) -> Vec<ProblemRecord> {
        let count = match self.store.count() {
            Ok(count) => count,
            Err(e) => {
                log::error!("store count failed: {e}");
                return vec![];
            }
        };
        if count == 0 {
            return vec![];
        }

        if query.trim().is_empty() {
            return match self.store.all_records() {
                Ok(all) => all.into_iter().map(|p| p.record).collect(),
                Err(e) => {
                    log::error!("failed to list records: {e}");
                    vec![]
                }
            };
        }

        match self.search_similar(query, SIMILAR_RESULTS_LIMIT) {
            Ok(results) => results,
            Err(e) => {
                log::error!("vector search failed, falling back to keyword search: {e}");
                self.search_keyword(query)
            }
        }
    }

    /// Keyword search over the store, used when vector search is
    /// unavailable.
    fn search_keyword(&self, query: &str) -> Vec<ProblemRecord> {
        let lowered = query.to_lowercase();

        let direct = match self.store.search_text(&lowered) {
            Ok(hits) => hits,
            Err(e) => {
                log::error!("store text search failed: {e}");
                return vec![];
            }
        };
        if direct.len() >= DIRECT_MATCH_SHORT_CIRCUIT {
            return direct;
        }

        let mut keywords = self.tokenizer.tokenize(&lowered);
        if keywords.is_empty() {
            keywords = Tokenizer::split_basic(&lowered);
        }

        let all = match self.store.all_records() {
            Ok(all) => all,
            Err(e) => {
                log::error!("failed to list records: {e}");
                return vec![];
            }
        };
        let mut candidates: Vec<ProblemRecord> = all.into_iter().map(|p| p.record).collect();

        // No usable keywords at all: everything is equally relevant.
        if keywords.is_empty() {
            return candidates;
        }

        if candidates.len() > KEYWORD_CANDIDATE_CAP {
            candidates.shuffle(&mut rand::rng());
            candidates.truncate(KEYWORD_CANDIDATE_CAP);
        }

        let mut scored: Vec<(ProblemRecord, f32)> = candidates
            .into_iter()
            .filter_map(|record| {
                let score = self.score_record(&record, &keywords);
                (score > 0.0).then_some((record, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.uuid.cmp(&b.0.uuid))
        });

        scored.into_iter().map(|(record, _)| record).collect()
    }

    /// Weighted relevance of a record to the given keywords. Query and
    /// summary dominate; the long solution text and the tool names are
    /// only consulted while the running total stays inconclusive.
    fn score_record(&self, record: &ProblemRecord, keywords: &[String]) -> f32 {
        let query_score = self.scorer.score(&record.query, keywords) * 3.0;
        if query_score == 0.0 && record.summary.trim().is_empty() {
            return 0.0;
        }

        let summary_score = self.scorer.score(&record.summary, keywords) * 2.0;

        let solution_score = if query_score + summary_score < 0.5 {
            self.scorer.score(&record.solution, keywords)
        } else {
            0.0
        };

        let tools_score = if query_score + summary_score + solution_score < 0.8 {
            record
                .tools
                .iter()
                .map(|tool| self.scorer.score(tool, keywords) * 0.5)
                .sum()
        } else {
            0.0
        };

        query_score + summary_score + solution_score + tools_score
    }

    /// Number of entries currently indexed.
    pub fn indexed_count(&self) -> usize {
        self.index.read().map(|index| index.len()).unwrap_or(0)
    }

    pub fn is_indexed(&self, id: &str) -> bool {
        self.index
            .read()
            .map(|index| index.contains(id))
            .unwrap_or(false)
    }

    /// Persist the index and stop the background saver. Idempotent; also
    /// invoked on drop.
    pub fn close(&self) {
        let handle = self
            .saver_handle
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        let Some(handle) = handle else {
            return;
        };

        // The saver thread owns all writes to the index file; a final save
        // queued behind any in-flight one keeps them serialized.
        if self.saver_tx.send(SaverTask::Save).is_err() {
            log::error!("saver thread gone before final save");
        }
        let _ = self.saver_tx.send(SaverTask::Shutdown);
        if handle.join().is_err() {
            log::error!("saver thread panicked");
        }
    }

    fn request_save(&self) {
        if self.saver_tx.send(SaverTask::Save).is_err() {
            log::warn!("saver thread is gone, skipping background save");
        }
    }

    fn read_index(&self) -> Result<RwLockReadGuard<'_, VectorIndex>, EngineError> {
        self.index
            .read()
            .map_err(|e| EngineError::Internal(format!("index lock poisoned: {e}")))
    }

    fn write_index(&self) -> Result<RwLockWriteGuard<'_, VectorIndex>, EngineError> {
        self.index
            .write()
            .map_err(|e| EngineError::Internal(format!("index lock poisoned: {e}")))
    }
}

impl Drop for RetrievalEngine {
    fn drop(&mut self) {
        self.close();
    }
}

/// Concatenate a record's fields for embedding, weighting by repetition:
/// summary x3, query x2, tools x1, solution head x1. The embedder itself
/// is field-agnostic.
fn weighted_text(record: &ProblemRecord) -> String {
    let solution_excerpt: String = record.solution.chars().take(SOLUTION_EXCERPT_CHARS).collect();
    format!(
        "{} {} {} {}",
        record.summary.repeat(3),
        record.query.repeat(2),
        record.tools.join(" "),
        solution_excerpt
    )
}

fn saver_loop(
    rx: mpsc::Receiver<SaverTask>,
    index: Arc<RwLock<VectorIndex>>,
    storage: IndexStorage,
) {
    while let Ok(task) = rx.recv() {
        match task {
            SaverTask::Save => {
                // Snapshot under the read lock, write after releasing it.
                let snapshot = match index.read() {
                    Ok(index) => index.clone(),
                    Err(e) => {
                        log::error!("index lock poisoned in saver: {e}");
                        return;
                    }
                };
                match storage.save(&snapshot) {
                    Ok(()) => log::debug!("persisted {} vectors", snapshot.len()),
                    Err(e) => log::error!("background index save failed: {e}"),
                }
            }
            SaverTask::Shutdown => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_text_repeats_fields() {
        let record = ProblemRecord::new(
            "u1",
            "query",
            "solution",
            vec!["tool".to_string()],
            "summary",
        );
        let text = weighted_text(&record);
        assert_eq!(text.matches("summary").count(), 3);
        assert_eq!(text.matches("query").count(), 2);
        assert_eq!(text.matches("tool").count(), 1);
        assert_eq!(text.matches("solution").count(), 1);
    }

    #[test]
    fn test_weighted_text_truncates_solution() {
        let record = ProblemRecord::new(
            "u1",
            "q",
            "s".repeat(2000),
            vec![],
            "",
        );
        let text = weighted_text(&record);
        assert_eq!(text.chars().filter(|&c| c == 's').count(), 500);
    }
}
