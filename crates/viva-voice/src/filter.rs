//! Relevance and coherence gates for candidate speech.
//!
//! Both are cheap heuristics, not classifiers. A relevance marker anywhere in a
//! fragment ("hold on", "talking to", "mom") means the candidate is speaking to
//! someone else; a coherent answer has at least `min_words` words.

use viva_core::FilterConfig;

/// Number of whitespace-separated words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Classifies fragments as interview-relevant and finalized text as complete enough to keep.
#[derive(Debug, Clone)]
pub struct TranscriptFilter {
    min_words: usize,
    /// Lowercased once at construction.
    markers: Vec<String>,
}

impl TranscriptFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            min_words: config.min_words.max(1),
            markers: config
                .relevance_markers
                .iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    /// False when any cross-talk marker occurs as a case-insensitive substring.
    pub fn is_relevant(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        !self.markers.iter().any(|m| lower.contains(m.as_str()))
    }

    /// True when the trimmed text has at least `min_words` words.
    pub fn is_coherent(&self, text: &str) -> bool {
        word_count(text) >= self.min_words
    }

    /// Name of the first marker found in `text`, for logging.
    pub fn matched_marker(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.markers
            .iter()
            .find(|m| lower.contains(m.as_str()))
            .map(|m| m.as_str())
    }

    pub fn min_words(&self) -> usize {
        self.min_words
    }
}

impl Default for TranscriptFilter {
    fn default() -> Self {
        Self::new(&FilterConfig::default())
    }
}
