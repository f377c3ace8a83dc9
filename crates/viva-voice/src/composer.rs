//! **Instruction Composer**: builds the `instructions` text for each AI turn.
//!
//! Layout, in order:
//! 1. the system prompt;
//! 2. the system prompt again when the interaction counter is a multiple of the
//!    reinjection period (counteracts drift over long histories);
//! 3. the trigger: "ask this question" (scripted, nudge) or "the candidate said ..."
//!    (response-driven);
//! 4. the conversation history as labelled lines;
//! 5. retrieved context, only when non-empty;
//! 6. for response-driven turns, the single-question directive (plus the forced
//!    strict line when configured).
//!
//! The directive is the only guard against the model answering instead of asking.
//! Role violations are accepted output, not errors.

use crate::conversation::{render_history, Utterance};
use viva_core::ComposerConfig;

/// What caused this AI turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// A fixed question (opening question or operator `ask`).
    Scripted { question: String },
    /// Fallback after candidate silence.
    Nudge { question: String },
    /// A finalized candidate answer that needs a follow-up.
    CandidateResponse { answer: String },
}

impl Trigger {
    /// Text handed to the retrieval collaborator.
    pub fn query(&self) -> &str {
        match self {
            Trigger::Scripted { question } | Trigger::Nudge { question } => question,
            Trigger::CandidateResponse { answer } => answer,
        }
    }

    /// The question the interviewer will speak, when known up front.
    pub fn scripted_question(&self) -> Option<&str> {
        match self {
            Trigger::Scripted { question } | Trigger::Nudge { question } => Some(question),
            Trigger::CandidateResponse { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Scripted { .. } => "scripted",
            Trigger::Nudge { .. } => "nudge",
            Trigger::CandidateResponse { .. } => "response",
        }
    }
}

pub const REINJECT_HEADER: &str = "REINJECT SYSTEM PROMPT:";
pub const STRICT_DIRECTIVE: &str =
    "IMPORTANT: You must only produce a single question, no commentary.";

#[derive(Debug, Clone)]
pub struct InstructionComposer {
    system_prompt: String,
    reinject_period: u64,
    strict_directive: bool,
}

impl InstructionComposer {
    pub fn new(system_prompt: impl Into<String>, config: &ComposerConfig) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            reinject_period: config.reinject_period.max(1),
            strict_directive: config.strict_directive,
        }
    }

    /// Whether the `interaction`-th AI turn carries the system prompt twice.
    pub fn reinjects(&self, interaction: u64) -> bool {
        interaction % self.reinject_period == 0
    }

    pub fn compose(
        &self,
        trigger: &Trigger,
        history: &[Utterance],
        context: &str,
        interaction: u64,
    ) -> String {
        let mut out = String::with_capacity(self.system_prompt.len() * 2 + 512);
        out.push_str(&self.system_prompt);
        out.push_str("\n\n");

        if self.reinjects(interaction) {
            out.push_str(REINJECT_HEADER);
            out.push('\n');
            out.push_str(&self.system_prompt);
            out.push_str("\n\n");
        }

        match trigger {
            Trigger::Scripted { question } | Trigger::Nudge { question } => {
                out.push_str("Based on the conversation below, please ask the following question:\n");
                out.push_str(&format!("\"{}\"\n\n", question));
                out.push_str(
                    "Your response MUST consist solely of a single interview question with no additional text.\n\n",
                );
            }
            Trigger::CandidateResponse { answer } => {
                out.push_str("The candidate just responded:\n");
                out.push_str(&format!("\"{}\"\n\n", answer));
            }
        }

        out.push_str("Conversation history:\n");
        out.push_str(&render_history(history));
        out.push('\n');

        let context = context.trim();
        if !context.is_empty() {
            out.push_str("\nCV Information:\n");
            out.push_str(context);
            out.push('\n');
        }

        if let Trigger::CandidateResponse { .. } = trigger {
            out.push_str("\nBased on this, please generate ONLY one interview question.\n");
            out.push_str("Your response MUST be a single question with no additional commentary.");
            if self.strict_directive {
                out.push('\n');
                out.push_str(STRICT_DIRECTIVE);
            }
        }

        out
    }
}
