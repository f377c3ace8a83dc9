//! # Viva Voice - Interview Turn-Taking Core
//!
//! Decides, from a stream of realtime channel events and candidate speech
//! fragments, who has the floor in a spoken AI interview: when the interviewer is
//! speaking, when the candidate is expected to answer, when an answer is final,
//! and when to nudge, reinject the persona or interrupt.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                           Session                              │
//! │  inbound JSON ─→ protocol ─→ ┌──────────────┐ ─→ Effects ─→ sink│
//! │  operator cmds ────────────→ │ TurnMachine  │                   │
//! │  timers / context ─────────→ └──────────────┘                   │
//! │                               │    │     │                      │
//! │                     aggregator  watchdog  composer ─→ log       │
//! │                      (filter)                                   │
//! └────────────────────────────────────────────────────────────────┘
//! ```

pub mod aggregator;
pub mod composer;
pub mod conversation;
pub mod error;
pub mod filter;
pub mod protocol;
pub mod session;
pub mod turn;
pub mod watchdog;

pub use aggregator::{Finalization, FragmentOutcome, TranscriptAggregator};
pub use composer::{InstructionComposer, Trigger, REINJECT_HEADER, STRICT_DIRECTIVE};
pub use conversation::{render_history, ConversationLog, Role, Utterance};
pub use error::{VoiceError, VoiceResult};
pub use filter::{word_count, TranscriptFilter};
pub use protocol::{InboundEvent, OutboundCommand, ResponseBody};
pub use session::{ChannelSink, CommandSink, Session, SessionHandle};
pub use turn::{Effect, Input, Suppression, TurnMachine, TurnSettings, TurnState, INTERRUPT_NOTE};
pub use watchdog::{Watchdog, WatchdogTicket};
