//! Transcript aggregation with silence debouncing.
//!
//! The speech engine re-sends its cumulative hypothesis on every update, so each
//! accepted fragment *replaces* the pending text. Every accepted fragment also mints
//! a new debounce generation; only the timer carrying the current generation may
//! finalize. Irrelevant fragments are a no-op: they neither touch the pending text
//! nor restart the countdown.

use crate::filter::TranscriptFilter;
use tokio::time::Instant;
use tracing::debug;

/// The candidate's running answer for the current turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTranscript {
    pub text: String,
    pub armed_at: Instant,
    pub generation: u64,
}

/// Result of feeding one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Pending text replaced; schedule a debounce for `generation` and cancel `superseded`.
    Accepted {
        generation: u64,
        superseded: Option<u64>,
    },
    /// Cross-talk marker found; nothing changed.
    Irrelevant,
    /// Blank hypothesis; nothing changed.
    Blank,
}

/// Result of a debounce timer elapsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// Coherent and relevant: commit as the candidate's answer.
    Finalized(String),
    /// Too few words; discarded.
    Incoherent(String),
    /// Cross-talk; discarded.
    Irrelevant(String),
    /// Superseded by a newer fragment, or nothing pending.
    Stale,
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptAggregator {
    filter: TranscriptFilter,
    pending: Option<PendingTranscript>,
    next_generation: u64,
}

impl TranscriptAggregator {
    pub fn new(filter: TranscriptFilter) -> Self {
        Self {
            filter,
            pending: None,
            next_generation: 0,
        }
    }

    pub fn on_fragment(&mut self, text: &str, at: Instant) -> FragmentOutcome {
        if text.trim().is_empty() {
            return FragmentOutcome::Blank;
        }
        if !self.filter.is_relevant(text) {
            debug!(
                target: "viva::turn",
                marker = ?self.filter.matched_marker(text),
                "ignoring cross-talk fragment"
            );
            return FragmentOutcome::Irrelevant;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let superseded = self.pending.as_ref().map(|p| p.generation);
        self.pending = Some(PendingTranscript {
            text: text.to_string(),
            armed_at: at,
            generation,
        });
        FragmentOutcome::Accepted { generation, superseded }
    }

    /// Called when the debounce for `generation` elapses. Clears the pending text
    /// unless the timer was stale.
    pub fn finalize(&mut self, generation: u64) -> Finalization {
        let pending = match self.pending.take() {
            Some(p) if p.generation == generation => p,
            other => {
                self.pending = other;
                return Finalization::Stale;
            }
        };

        let text = pending.text.trim().to_string();
        if !self.filter.is_coherent(&text) {
            Finalization::Incoherent(text)
        } else if !self.filter.is_relevant(&text) {
            Finalization::Irrelevant(text)
        } else {
            Finalization::Finalized(text)
        }
    }

    /// Drop the pending text; returns the generation whose timer must be cancelled.
    pub fn reset(&mut self) -> Option<u64> {
        self.pending.take().map(|p| p.generation)
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn accepted(outcome: FragmentOutcome) -> (u64, Option<u64>) {
        match outcome {
            FragmentOutcome::Accepted { generation, superseded } => (generation, superseded),
            other => panic!("expected Accepted, got {:?}", other),
        }
    }

    #[test]
    fn fragments_replace_rather_than_concatenate() {
        let mut agg = TranscriptAggregator::default();
        let t0 = Instant::now();

        let (g1, s1) = accepted(agg.on_fragment("I think", t0));
        let (g2, s2) = accepted(agg.on_fragment("I think I am a", t0 + Duration::from_millis(500)));
        let (g3, s3) = accepted(agg.on_fragment(
            "I think I am a backend engineer",
            t0 + Duration::from_millis(900),
        ));

        assert_eq!(s1, None);
        assert_eq!(s2, Some(g1));
        assert_eq!(s3, Some(g2));
        assert_eq!(agg.pending.as_ref().unwrap().text, "I think I am a backend engineer");

        assert_eq!(agg.finalize(g1), Finalization::Stale);
        assert_eq!(agg.finalize(g2), Finalization::Stale);
        assert_eq!(
            agg.finalize(g3),
            Finalization::Finalized("I think I am a backend engineer".to_string())
        );
        assert!(!agg.has_pending());
        // fires at most once
        assert_eq!(agg.finalize(g3), Finalization::Stale);
    }

    #[test]
    fn irrelevant_fragment_is_a_no_op() {
        let mut agg = TranscriptAggregator::default();
        let now = Instant::now();
        let (g1, _) = accepted(agg.on_fragment("I worked at a bank", now));

        assert_eq!(
            agg.on_fragment("hold on, talking to my mom", now),
            FragmentOutcome::Irrelevant
        );
        let pending = agg.pending.as_ref().unwrap();
        assert_eq!(pending.text, "I worked at a bank");
        assert_eq!(pending.generation, g1);

        assert_eq!(
            agg.finalize(g1),
            Finalization::Finalized("I worked at a bank".to_string())
        );
    }

    #[test]
    fn short_answers_are_discarded() {
        let mut agg = TranscriptAggregator::default();
        let (g, _) = accepted(agg.on_fragment("  yes ", Instant::now()));
        assert_eq!(agg.finalize(g), Finalization::Incoherent("yes".to_string()));
        assert!(agg.pending.as_ref().is_none());
    }

    #[test]
    fn blank_fragments_are_ignored() {
        let mut agg = TranscriptAggregator::default();
        assert_eq!(agg.on_fragment("   ", Instant::now()), FragmentOutcome::Blank);
        assert!(!agg.has_pending());
    }

    #[test]
    fn reset_reports_generation_to_cancel() {
        let mut agg = TranscriptAggregator::default();
        let (g, _) = accepted(agg.on_fragment("we shipped it", Instant::now()));
        assert_eq!(agg.reset(), Some(g));
        assert_eq!(agg.reset(), None);
        assert_eq!(agg.finalize(g), Finalization::Stale);
    }
}
