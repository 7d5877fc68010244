//! Keyword-overlap relevance scoring.
//!
//! Scores a document against a keyword list in [0, 1]. Cheap substring
//! containment is checked before tokenization because it is usually
//! decisive; tokenization is reserved for the ambiguous cases to bound
//! average latency on long documents.

use std::sync::Arc;

use crate::tokenize::Tokenizer;

/// Documents are truncated to this many characters before scoring. A pure
/// performance bound, not a correctness requirement.
const MAX_TEXT_CHARS: usize = 5000;

/// Computes keyword-overlap scores with short-circuit fast paths.
pub struct RelevanceScorer {
    tokenizer: Arc<Tokenizer>,
}

impl RelevanceScorer {
    pub fn new(tokenizer: Arc<Tokenizer>) -> Self {
        Self { tokenizer }
    }

    /// Score `text` against `keywords`, returning a value in [0, 1].
    ///
    /// Exact substring matches count double relative to token-level matches.
    /// When enough keywords match as substrings (at least half of them, or
    /// three in absolute terms), tokenization is skipped entirely.
    ///
    /// The thresholds and weights are kept exactly as downstream ranking
    /// has come to depend on them.
    pub fn score(&self, text: &str, keywords: &[String]) -> f32 {
        if text.is_empty() || keywords.is_empty() {
            return 0.0;
        }

        let lowered = text
            .chars()
            .take(MAX_TEXT_CHARS)
            .collect::<String>()
            .to_lowercase();

        let keywords_lower: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();

        let exact = keywords_lower
            .iter()
            .filter(|k| !k.is_empty() && lowered.contains(k.as_str()))
            .count();

        // Quick rejection: no keyword appears anywhere in the text.
        if exact == 0 {
            return 0.0;
        }

        let denominator = keywords.len() as f32 * 3.0;

        if exact >= keywords.len().div_ceil(2) || exact >= 3 {
            return (exact as f32 * 2.0 / denominator).clamp(0.0, 1.0);
        }

        let tokens = self.tokenizer.tokenize(&lowered);
        let segment = keywords_lower
            .iter()
            .filter(|k| !k.is_empty() && tokens.iter().any(|t| t.contains(k.as_str())))
            .count();

        ((exact as f32 * 2.0 + segment as f32) / denominator).clamp(0.0, 1.0)
    }
}
