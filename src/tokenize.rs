//! Word segmentation with a bounded result cache.
//!
//! The primary path uses jieba for dictionary-based segmentation, which
//! handles CJK text without whitespace word boundaries as well as
//! whitespace-delimited languages. A basic splitter is available both as a
//! degraded tokenizer and as a standalone fallback for callers that need
//! keywords even when segmentation produced nothing usable.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use jieba_rs::Jieba;

/// Bounded cache from raw text to its tokenization.
///
/// Keys are exact input strings, no normalization before lookup. When an
/// insert would exceed the bound, the oldest half of the entries (in
/// insertion order) is evicted in one batch. This is deliberately not a
/// strict LRU: lookups do not refresh recency.
pub struct TokenCache {
    entries: HashMap<String, Vec<String>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl TokenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    pub fn get(&self, text: &str) -> Option<&Vec<String>> {
        self.entries.get(text)
    }

    pub fn insert(&mut self, text: String, tokens: Vec<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.contains_key(&text) {
            self.entries.insert(text, tokens);
            return;
        }
        if self.entries.len() >= self.capacity {
            self.evict_oldest_half();
        }
        self.order.push_back(text.clone());
        self.entries.insert(text, tokens);
    }

    /// Drop the oldest half of the cache in insertion order.
    fn evict_oldest_half(&mut self) {
        let evict = (self.entries.len() / 2).max(1);
        for _ in 0..evict {
            if let Some(key) = self.order.pop_front() {
                self.entries.remove(&key);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Text tokenizer with optional dictionary segmentation and caching.
///
/// Tokenization never fails: an empty result is valid output, and the
/// degraded construction falls back to basic splitting.
pub struct Tokenizer {
    segmenter: Option<Jieba>,
    cache: Option<Mutex<TokenCache>>,
}

impl Tokenizer {
    /// Create a tokenizer with dictionary segmentation and a cache bounded
    /// at `cache_size` entries. A `cache_size` of 0 disables caching.
    pub fn new(cache_size: usize) -> Self {
        Self {
            segmenter: Some(Jieba::new()),
            cache: (cache_size > 0).then(|| Mutex::new(TokenCache::new(cache_size))),
        }
    }

    /// Create a degraded tokenizer that only performs basic splitting.
    pub fn basic() -> Self {
        Self {
            segmenter: None,
            cache: None,
        }
    }

    /// Tokenize `text`, discarding single-character and non-alphanumeric
    /// tokens as noise.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        if text.is_empty() {
            return vec![];
        }

        if let Some(cache) = &self.cache {
            if let Ok(guard) = cache.lock() {
                if let Some(hit) = guard.get(text) {
                    return hit.clone();
                }
            }
        }

        let tokens = match &self.segmenter {
            Some(jieba) => jieba
                .cut(text, false)
                .into_iter()
                .filter(|t| is_token(t))
                .map(str::to_string)
                .collect(),
            None => Self::split_basic(text),
        };

        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                guard.insert(text.to_string(), tokens.clone());
            }
        }

        tokens
    }

    /// Split on whitespace and common sentence punctuation, keeping only
    /// tokens longer than one character. Used as the fallback when
    /// segmentation yields nothing usable.
    pub fn split_basic(text: &str) -> Vec<String> {
        text.split(|c: char| c.is_whitespace() || matches!(c, ',' | '，' | '.' | '。'))
            .filter(|t| t.chars().count() > 1)
            .map(str::to_string)
            .collect()
    }

    /// Number of cached tokenizations.
    pub fn cached_count(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|c| c.lock().ok().map(|g| g.len()))
            .unwrap_or(0)
    }
}

/// Tokens of a single code point are noise; so are segments the segmenter
/// emits for punctuation or whitespace runs.
fn is_token(t: &str) -> bool {
    t.chars().count() > 1 && t.chars().any(|c| c.is_alphanumeric())
}
