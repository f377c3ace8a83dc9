//! Append-only record of everything said during a session.
//!
//! Arrival order is the only ordering; entries are never edited, merged or removed.
//! The log feeds the instruction composer (as labelled history lines) and the
//! transcript export (as JSON).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Interviewer,
    Candidate,
    System,
}

impl Role {
    /// Label used when rendering history for the model.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Interviewer => "Interviewer",
            Role::Candidate => "Interviewee",
            Role::System => "System",
        }
    }
}

/// One committed piece of speech (or a system note).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Utterance {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    fn render(&self) -> String {
        format!("{}: {}", self.role.label(), self.text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationLog {
    entries: Vec<Utterance>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return a copy of the stored utterance.
    pub fn append(&mut self, role: Role, text: impl Into<String>) -> Utterance {
        let utterance = Utterance::new(role, text);
        self.entries.push(utterance.clone());
        utterance
    }

    pub fn entries(&self) -> &[Utterance] {
        &self.entries
    }

    /// The first `len` entries (clamped), i.e. the log as it was at that length.
    pub fn prefix(&self, len: usize) -> &[Utterance] {
        &self.entries[..len.min(self.entries.len())]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&Utterance> {
        self.entries.last()
    }

    pub fn count_role(&self, role: Role) -> usize {
        self.entries.iter().filter(|u| u.role == role).count()
    }

    /// Whole log as labelled lines.
    pub fn render_history(&self) -> String {
        render_history(&self.entries)
    }

    /// JSON array of utterances for transcript export.
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// `Interviewer: ...` / `Interviewee: ...` / `System: ...`, one per line.
pub fn render_history(entries: &[Utterance]) -> String {
    entries
        .iter()
        .map(Utterance::render)
        .collect::<Vec<_>>()
        .join("\n")
}
