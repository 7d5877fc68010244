//! Text retrieval core for the problem library.
//!
//! Dual-mode search over problem records:
//! - Vector search: hashing-trick bag-of-words embeddings with brute-force
//!   cosine nearest-neighbor lookup over an in-memory index
//! - Keyword search: fast substring/token overlap relevance scoring
//!
//! # Architecture
//!
//! - `tokenize`: word segmentation (jieba + basic fallback) with a bounded cache
//! - `embedding`: text -> fixed-width normalized vector, plus the blob codec
//! - `relevance`: keyword-overlap scoring with short-circuit optimizations
//! - `index`: in-memory vector index with cosine similarity search
//! - `storage`: binary file I/O for index persistence
//! - `records`: the problem record model and the store boundary trait
//! - `engine`: high-level retrieval engine tying it all together

pub mod config;
pub mod embedding;
pub mod engine;
pub mod index;
pub mod records;
pub mod relevance;
pub mod storage;
pub mod tokenize;


pub use config::RetrievalConfig;
pub use embedding::{decode_blob, encode_blob, Embedder};
pub use engine::{EngineError, RetrievalEngine};
pub use index::{IndexError, SearchResult, VectorIndex};
pub use records::{JsonFileStore, MemoryStore, ProblemRecord, ProblemStore, StoredProblem};
pub use relevance::RelevanceScorer;
pub use storage::{IndexStorage, StorageError};
pub use tokenize::Tokenizer;
