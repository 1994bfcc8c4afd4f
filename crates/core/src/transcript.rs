//! Incremental transcript accumulation.
//!
//! The Live API reports transcripts as cumulative snapshots: each
//! message carries the full text recognized so far, not just the new
//! part. [`TranscriptAccumulator`] diffs consecutive snapshots and
//! yields only the newly revealed suffix, so downstream consumers see
//! a stream of clean deltas.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a finalized utterance.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    User,
    Agent,
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerRole::User => write!(f, "user"),
            SpeakerRole::Agent => write!(f, "agent"),
        }
    }
}

/// One finalized (role, text) turn of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: SpeakerRole,
    pub text: String,
}

/// The end-of-call result handed back to the session manager.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub summary: String,
    pub intent: String,
}

/// Intent classification is a pluggable external step; the core only
/// ships a stable placeholder label.
pub const INTENT_PLACEHOLDER: &str = "general_inquiry";

/// Collapses all runs of whitespace to single spaces and trims.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Diffs cumulative transcript snapshots into incremental deltas for
/// one channel (STT or agent).
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    committed: String,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next cumulative snapshot and returns the newly
    /// revealed suffix, if any.
    ///
    /// If the normalized snapshot does not extend the previous one the
    /// accumulator resets and the whole snapshot is the delta. Empty
    /// and duplicate snapshots yield `None`.
    pub fn push_snapshot(&mut self, snapshot: &str) -> Option<String> {
        let next = normalize_whitespace(snapshot);
        if next.is_empty() || next == self.committed {
            return None;
        }

        let delta = if next.starts_with(&self.committed) {
            next[self.committed.len()..].trim_start().to_string()
        } else {
            next.clone()
        };
        self.committed = next;

        if delta.is_empty() { None } else { Some(delta) }
    }

    /// The full accumulated text so far.
    pub fn text(&self) -> &str {
        &self.committed
    }

    /// Takes the accumulated text and resets for the next turn.
    pub fn take(&mut self) -> String {
        std::mem::take(&mut self.committed)
    }
}

/// Newline-joined "role: text" transcript used as the call summary.
pub fn summarize_turns(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role, t.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  hello   world \n"), "hello world");
        assert_eq!(normalize_whitespace(""), "");
        assert_eq!(normalize_whitespace("\t \n"), "");
    }

    #[test]
    fn test_extending_snapshots_yield_suffix() {
        let mut acc = TranscriptAccumulator::new();
        assert_eq!(acc.push_snapshot("hello"), Some("hello".to_string()));
        assert_eq!(acc.push_snapshot("hello world"), Some("world".to_string()));
        assert_eq!(acc.push_snapshot("hello world, how"), Some(", how".to_string()));
    }

    #[test]
    fn test_non_extending_snapshot_resets() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_snapshot("the first utterance");
        // A snapshot that does not start with the previous text is a
        // fresh transcript, emitted in full.
        assert_eq!(
            acc.push_snapshot("something new"),
            Some("something new".to_string())
        );
        assert_eq!(acc.text(), "something new");
    }

    #[test]
    fn test_duplicate_and_empty_snapshots() {
        let mut acc = TranscriptAccumulator::new();
        assert_eq!(acc.push_snapshot(""), None);
        acc.push_snapshot("hello");
        assert_eq!(acc.push_snapshot("hello"), None);
        assert_eq!(acc.push_snapshot("  hello  "), None);
    }

    #[test]
    fn test_delta_has_no_leading_whitespace() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_snapshot("hello");
        let delta = acc.push_snapshot("hello   there friend").unwrap();
        assert_eq!(delta, "there friend");
    }

    #[test]
    fn test_take_resets() {
        let mut acc = TranscriptAccumulator::new();
        acc.push_snapshot("full utterance");
        assert_eq!(acc.take(), "full utterance");
        assert_eq!(acc.text(), "");
        assert_eq!(acc.push_snapshot("next"), Some("next".to_string()));
    }

    #[test]
    fn test_summarize_turns() {
        let turns = vec![
            Turn { role: SpeakerRole::User, text: "hi".to_string() },
            Turn { role: SpeakerRole::Agent, text: "hello!".to_string() },
        ];
        assert_eq!(summarize_turns(&turns), "user: hi\nagent: hello!");
        assert_eq!(summarize_turns(&[]), "");
    }
}
