//! viva-core: configuration, shared errors, and the collaborator contracts the
//! interview turn-taking core depends on (context retrieval, session credentials,
//! runtime config).

mod backend;
mod config;
mod error;

pub use backend::{
    context_or_empty, load_runtime_config, ContextRetriever, CredentialSource, HttpContextRetriever,
    HttpCredentialSource, HttpRuntimeConfigSource, NoContext, RuntimeConfigSource, SessionCredential,
    StaticContext, StaticRuntimeConfig,
};
pub use config::{
    BackendConfig, ComposerConfig, FilterConfig, RuntimeConfig, ScriptConfig, TimingConfig,
    VivaConfig, DEFAULT_CONFIG_PATH, DEFAULT_MODEL, DEFAULT_NUDGE_QUESTION,
    DEFAULT_OPENING_QUESTION, DEFAULT_RELEVANCE_MARKERS, DEFAULT_SYSTEM_PROMPT, DEFAULT_VOICE,
};
pub use error::{CoreError, CoreResult};
