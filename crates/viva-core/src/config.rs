//! Interview configuration loaded from file and environment.
//!
//! Precedence: built-in defaults < `VIVA_CONFIG` file (default `config/interview.toml`)
//! < `VIVA_<SECTION>__<KEY>` environment variables (`VIVA_TIMING__DEBOUNCE_MS=2500`).
//! Out-of-range values are clamped, never rejected, so a bad override cannot stop a session.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default config file consulted when `VIVA_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config/interview.toml";

pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_VOICE: &str = "verse";

/// Strict interviewer persona sent at the head of every instruction payload.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
Always begin by briefly introducing yourself. You are a professional interviewer conducting a job interview for an engineering position. Your sole responsibility is to ask interview questions only; you must never provide any commentary, explanations, or answers.

Guidelines
1. Begin by briefly introducing yourself in a neutral tone.
2. Ask the candidate to introduce themselves.
3. Strictly adhere to your interviewer role at all times.
4. Maintain a neutral demeanor; do not display excitement or any other emotion.
5. Do not provide any commentary, explanations, or answers. Your output should consist solely of interview questions.
6. If you accidentally provide commentary or answers, immediately self-correct by asking only one interview question.
7. Use the following interview questions as a basis, and feel free to ask additional follow-up questions based solely on the candidate's responses while never deviating from your role:
   - Tell me about yourself
   - Why are you interested in this position?
   - What are your strengths and weaknesses?
   - Where do you see yourself in five years?
   - What are your salary expectations?
   - What are your career goals?
   - What are your hobbies?
   - What are your biggest accomplishments?
   - What are your biggest failures?
   - What are your biggest strengths?

Remember: You are only here to ask questions in a neutral, professional manner. Do not provide commentary, answers, or any statements outside of your role as an interviewer.";

pub const DEFAULT_OPENING_QUESTION: &str =
    "Hello, I am your AI interviewer. Tell me about your background.";
pub const DEFAULT_NUDGE_QUESTION: &str = "Is everything okay? Could you share your thoughts?";

/// Phrases that mark a fragment as cross-talk rather than an answer.
pub const DEFAULT_RELEVANCE_MARKERS: &[&str] = &[
    "mom",
    "dad",
    "friend",
    "just a second",
    "one second",
    "hang on",
    "hold on",
    "wait a moment",
    "sorry, let me check",
    "talking to",
    "please hold",
    "coffee",
];

// -----------------------------------------------------------------------------
// Sections
// -----------------------------------------------------------------------------

/// Timers driving turn-taking. All values in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Quiet period after the interviewer stops, absorbing trailing audio (default 500).
    pub settle_delay_ms: u64,
    /// Silence after the last fragment before an answer is finalized (default 2000).
    pub debounce_ms: u64,
    /// Candidate silence before a nudge question is sent (default 30000).
    pub watchdog_timeout_ms: u64,
    /// Delay before re-sending a command while the channel is not open (default 1000).
    pub send_retry_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            debounce_ms: 2000,
            watchdog_timeout_ms: 30_000,
            send_retry_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }

    pub fn send_retry(&self) -> Duration {
        Duration::from_millis(self.send_retry_ms)
    }
}

/// Coherence and relevance gates applied to candidate speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum word count for a finalized answer (default 2).
    pub min_words: usize,
    /// Case-insensitive cross-talk markers; any match drops the fragment.
    pub relevance_markers: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_words: 2,
            relevance_markers: DEFAULT_RELEVANCE_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Instruction payload shaping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Every Nth AI turn carries the system prompt twice (default 5).
    pub reinject_period: u64,
    /// Output modalities requested in `response.create`.
    pub modalities: Vec<String>,
    /// Append the forced single-question line to response-driven turns.
    pub strict_directive: bool,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            reinject_period: 5,
            modalities: vec!["audio".to_string(), "text".to_string()],
            strict_directive: false,
        }
    }
}

/// Fixed questions used outside the response-driven path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    pub opening_question: String,
    pub nudge_question: String,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        Self {
            opening_question: DEFAULT_OPENING_QUESTION.to_string(),
            nudge_question: DEFAULT_NUDGE_QUESTION.to_string(),
        }
    }
}

/// Where the session, retrieval and runtime-config collaborators live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL without trailing slash (e.g. http://127.0.0.1:3001).
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Queries shorter than this skip retrieval entirely (default 3).
    pub min_query_len: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3001".to_string(),
            request_timeout_secs: 10,
            min_query_len: 3,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join `path` onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

// -----------------------------------------------------------------------------
// VivaConfig
// -----------------------------------------------------------------------------

/// Complete configuration for one interview process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VivaConfig {
    pub timing: TimingConfig,
    pub filter: FilterConfig,
    pub composer: ComposerConfig,
    pub script: ScriptConfig,
    pub backend: BackendConfig,
    /// Where the conversation log is written as JSON on session exit.
    pub transcript_path: Option<String>,
}

impl VivaConfig {
    /// Load from `VIVA_CONFIG` (or [`DEFAULT_CONFIG_PATH`]) plus environment overrides.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var("VIVA_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load from an explicit file. A missing file is not an error.
    pub fn load_from(path: &Path) -> CoreResult<Self> {
        Self::build(path, environment())
    }

    fn build(path: &Path, environment: config::Environment) -> CoreResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&VivaConfig::default())?);

        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(environment)
            .build()?;

        let mut cfg: VivaConfig = built.try_deserialize()?;
        cfg.normalize();
        Ok(cfg)
    }

    /// Clamp values that would break the turn logic.
    pub fn normalize(&mut self) {
        if self.composer.reinject_period == 0 {
            self.composer.reinject_period = 1;
        }
        if self.filter.min_words == 0 {
            self.filter.min_words = 1;
        }
        if self.composer.modalities.is_empty() {
            self.composer.modalities = ComposerConfig::default().modalities;
        }
        self.transcript_path = self
            .transcript_path
            .take()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
    }
}

/// `VIVA_TIMING__DEBOUNCE_MS` → `timing.debounce_ms`.
fn environment() -> config::Environment {
    config::Environment::with_prefix("VIVA")
        .prefix_separator("_")
        .separator("__")
}

// -----------------------------------------------------------------------------
// RuntimeConfig
// -----------------------------------------------------------------------------

/// Model, voice and persona read once at startup. Missing fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub model: String,
    pub voice: String,
    #[serde(alias = "systemPrompt")]
    pub system_prompt: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Replace blank fields with built-in defaults.
    pub fn or_defaults(mut self) -> Self {
        let defaults = RuntimeConfig::default();
        if self.model.trim().is_empty() {
            self.model = defaults.model;
        }
        if self.voice.trim().is_empty() {
            self.voice = defaults.voice;
        }
        if self.system_prompt.trim().is_empty() {
            self.system_prompt = defaults.system_prompt;
        }
        self
    }
}
