//! **Turn-Taking State Machine**
//!
//! Owns the turn state of one interview session and reconciles everything that
//! races into it: model speech start/stop, candidate transcript fragments, debounce
//! and watchdog timers, context lookups and operator commands.
//!
//! `TurnMachine::handle` is a pure transition function. It never sleeps, sends or
//! spawns; it returns the side effects as [`Effect`]s for the session driver to
//! execute, and every timer or lookup result comes back in as an [`Input`]. Each
//! state change mints a new turn id, and timers carry the id (or generation) they
//! were armed under, so a late timer is recognised and dropped at fire time.

use crate::aggregator::{Finalization, FragmentOutcome, TranscriptAggregator};
use crate::composer::{InstructionComposer, Trigger};
use crate::conversation::{ConversationLog, Role, Utterance};
use crate::filter::TranscriptFilter;
use crate::protocol::{InboundEvent, OutboundCommand};
use crate::watchdog::{Watchdog, WatchdogTicket};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use viva_core::{RuntimeConfig, VivaConfig};

/// System note appended to the log whenever the operator interrupts.
pub const INTERRUPT_NOTE: &str = "[Sent response.interrupt]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    InterviewerSpeaking,
    AwaitingCandidate,
    /// A finalized answer is being turned into the next question.
    Processing,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnState::Idle => "idle",
            TurnState::InterviewerSpeaking => "interviewer_speaking",
            TurnState::AwaitingCandidate => "awaiting_candidate",
            TurnState::Processing => "processing",
        };
        f.write_str(name)
    }
}

/// Threshold below which transcript fragments are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Open,
    /// Fragments arriving before this instant are dropped.
    Until(Instant),
    /// The interviewer is speaking.
    Indefinite,
}

impl Suppression {
    pub fn admits(&self, at: Instant) -> bool {
        match self {
            Suppression::Open => true,
            Suppression::Until(threshold) => at >= *threshold,
            Suppression::Indefinite => false,
        }
    }
}

/// Everything the machine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Decoded message from the data channel.
    Inbound(InboundEvent),
    /// Operator (or session start) asks a fixed question.
    Ask(String),
    /// Operator interrupt.
    Interrupt,
    DebounceElapsed { generation: u64 },
    WatchdogFired(WatchdogTicket),
    /// Result of a `FetchContext` effect; empty on failure.
    ContextResolved { request_id: u64, context: String },
}

/// Side effects for the driver, in the order they must run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Send(OutboundCommand),
    StartDebounce { generation: u64, after: Duration },
    CancelDebounce { generation: u64 },
    ArmWatchdog { ticket: WatchdogTicket, after: Duration },
    DisarmWatchdog { ticket: WatchdogTicket },
    /// Look up supporting context, then feed back `Input::ContextResolved`.
    FetchContext { request_id: u64, query: String },
    /// An utterance was committed to the log.
    Appended(Utterance),
}

/// Timing and script knobs the machine needs.
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub settle_delay: Duration,
    pub debounce: Duration,
    pub watchdog_timeout: Duration,
    pub nudge_question: String,
    pub modalities: Vec<String>,
}

impl TurnSettings {
    pub fn from_config(config: &VivaConfig) -> Self {
        Self {
            settle_delay: config.timing.settle_delay(),
            debounce: config.timing.debounce(),
            watchdog_timeout: config.timing.watchdog_timeout(),
            nudge_question: config.script.nudge_question.clone(),
            modalities: config.composer.modalities.clone(),
        }
    }
}

/// An AI turn waiting on its context lookup.
#[derive(Debug, Clone)]
struct PendingCompose {
    request_id: u64,
    trigger: Trigger,
    /// Log length the history is rendered from.
    history_len: usize,
    interaction: u64,
}

pub struct TurnMachine {
    state: TurnState,
    turn_id: u64,
    interactions: u64,
    suppression: Suppression,
    ai_speaking: bool,
    /// Swallow the `response.done` of an interrupted response.
    absorb_done: bool,
    /// The current AI turn's spoken text is already in the log.
    speech_recorded: bool,
    pending: Option<PendingCompose>,
    next_request_id: u64,
    log: ConversationLog,
    aggregator: TranscriptAggregator,
    watchdog: Watchdog,
    composer: InstructionComposer,
    settings: TurnSettings,
}

impl TurnMachine {
    pub fn new(settings: TurnSettings, composer: InstructionComposer, filter: TranscriptFilter) -> Self {
        Self {
            state: TurnState::Idle,
            turn_id: 0,
            interactions: 0,
            suppression: Suppression::Open,
            ai_speaking: false,
            absorb_done: false,
            speech_recorded: false,
            pending: None,
            next_request_id: 0,
            log: ConversationLog::new(),
            aggregator: TranscriptAggregator::new(filter),
            watchdog: Watchdog::new(),
            composer,
            settings,
        }
    }

    pub fn from_config(config: &VivaConfig, runtime: &RuntimeConfig) -> Self {
        Self::new(
            TurnSettings::from_config(config),
            InstructionComposer::new(runtime.system_prompt.clone(), &config.composer),
            TranscriptFilter::new(&config.filter),
        )
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn turn_id(&self) -> u64 {
        self.turn_id
    }

    /// AI turns initiated so far.
    pub fn interactions(&self) -> u64 {
        self.interactions
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn into_log(self) -> ConversationLog {
        self.log
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.ai_speaking
    }

    pub fn suppression(&self) -> Suppression {
        self.suppression
    }

    pub fn handle(&mut self, input: Input, now: Instant) -> Vec<Effect> {
        let mut fx = Vec::new();
        match input {
            Input::Inbound(event) => self.on_inbound(event, now, &mut fx),
            Input::Ask(question) => {
                let question = question.trim();
                if question.is_empty() {
                    debug!(target: "viva::turn", "ignoring blank ask");
                } else {
                    self.begin_ai_turn(
                        Trigger::Scripted {
                            question: question.to_string(),
                        },
                        &mut fx,
                    );
                }
            }
            Input::Interrupt => self.on_interrupt(&mut fx),
            Input::DebounceElapsed { generation } => self.on_debounce(generation, &mut fx),
            Input::WatchdogFired(ticket) => self.on_watchdog(ticket, &mut fx),
            Input::ContextResolved { request_id, context } => {
                self.on_context(request_id, &context, &mut fx)
            }
        }
        fx
    }

    // -------------------------------------------------------------------------
    // Inbound events
    // -------------------------------------------------------------------------

    fn on_inbound(&mut self, event: InboundEvent, now: Instant, fx: &mut Vec<Effect>) {
        match event {
            InboundEvent::TranscriptPartial { text } => self.on_fragment(&text, now, fx),
            InboundEvent::ResponseStart => self.on_response_start(fx),
            InboundEvent::ResponseDone => self.on_response_done(now, fx),
            InboundEvent::ResponseTranscriptDone { transcript } => {
                let transcript = transcript.trim();
                if self.speech_recorded || self.pending.is_some() || transcript.is_empty() {
                    debug!(target: "viva::turn", "interviewer speech already recorded");
                } else {
                    self.speech_recorded = true;
                    fx.push(Effect::Appended(self.log.append(Role::Interviewer, transcript)));
                }
            }
            InboundEvent::SessionCreated { model, voice } => {
                info!(target: "viva::turn", ?model, ?voice, "session created");
            }
            InboundEvent::Error { message } => {
                warn!(target: "viva::turn", %message, "channel reported an error");
            }
            InboundEvent::Informational { kind } | InboundEvent::Other { kind } => {
                debug!(target: "viva::turn", %kind, "no-op event");
            }
        }
    }

    fn on_fragment(&mut self, text: &str, now: Instant, fx: &mut Vec<Effect>) {
        if !self.suppression.admits(now) {
            debug!(target: "viva::turn", state = %self.state, "fragment suppressed");
            return;
        }
        if self.state != TurnState::AwaitingCandidate {
            debug!(target: "viva::turn", state = %self.state, "fragment outside candidate turn");
            return;
        }
        if let FragmentOutcome::Accepted { generation, superseded } =
            self.aggregator.on_fragment(text, now)
        {
            if let Some(old) = superseded {
                fx.push(Effect::CancelDebounce { generation: old });
            }
            fx.push(Effect::StartDebounce {
                generation,
                after: self.settings.debounce,
            });
        }
    }

    fn on_response_start(&mut self, fx: &mut Vec<Effect>) {
        self.ai_speaking = true;
        self.absorb_done = false;
        self.suppression = Suppression::Indefinite;
        if self.pending.is_none()
            && matches!(self.state, TurnState::Idle | TurnState::AwaitingCandidate)
        {
            self.clear_candidate_turn(fx);
            self.speech_recorded = false;
            self.transition(TurnState::InterviewerSpeaking);
        }
    }

    fn on_response_done(&mut self, now: Instant, fx: &mut Vec<Effect>) {
        if self.pending.is_some() {
            debug!(target: "viva::turn", "response.done while composing; ignored");
            return;
        }
        self.ai_speaking = false;
        if self.absorb_done {
            self.absorb_done = false;
            debug!(target: "viva::turn", "absorbed response.done of interrupted response");
            return;
        }
        match self.state {
            TurnState::InterviewerSpeaking | TurnState::Idle => {
                self.transition(TurnState::AwaitingCandidate);
                self.suppression = Suppression::Until(now + self.settings.settle_delay);
                self.arm_watchdog(fx);
            }
            state => debug!(target: "viva::turn", %state, "duplicate response.done"),
        }
    }

    // -------------------------------------------------------------------------
    // Operator commands and timers
    // -------------------------------------------------------------------------

    fn on_interrupt(&mut self, fx: &mut Vec<Effect>) {
        info!(target: "viva::turn", state = %self.state, "interrupting interviewer");
        fx.push(Effect::Send(OutboundCommand::ResponseInterrupt));
        self.suppression = Suppression::Open;
        self.ai_speaking = false;
        if let Some(ticket) = self.watchdog.disarm() {
            fx.push(Effect::DisarmWatchdog { ticket });
        }
        fx.push(Effect::Appended(self.log.append(Role::System, INTERRUPT_NOTE)));
        if self.state != TurnState::InterviewerSpeaking {
            return;
        }
        // A scripted question still waiting on context is never sent.
        let unsent = self
            .pending
            .as_ref()
            .map_or(false, |p| p.trigger.scripted_question().is_some());
        if unsent {
            if let Some(dropped) = self.pending.take() {
                debug!(target: "viva::turn", request_id = dropped.request_id, "dropping unsent question");
            }
        } else {
            self.absorb_done = true;
        }
        self.transition(TurnState::AwaitingCandidate);
    }

    fn on_debounce(&mut self, generation: u64, fx: &mut Vec<Effect>) {
        if self.state != TurnState::AwaitingCandidate {
            debug!(target: "viva::turn", generation, state = %self.state, "debounce outside candidate turn");
            return;
        }
        match self.aggregator.finalize(generation) {
            Finalization::Finalized(answer) => {
                info!(target: "viva::turn", words = crate::filter::word_count(&answer), "candidate answer finalized");
                fx.push(Effect::Appended(self.log.append(Role::Candidate, answer.as_str())));
                if let Some(ticket) = self.watchdog.disarm() {
                    fx.push(Effect::DisarmWatchdog { ticket });
                }
                self.transition(TurnState::Processing);
                self.begin_ai_turn(Trigger::CandidateResponse { answer }, fx);
            }
            Finalization::Incoherent(text) => {
                debug!(target: "viva::turn", %text, "answer too short; discarded");
            }
            Finalization::Irrelevant(text) => {
                debug!(target: "viva::turn", %text, "cross-talk answer discarded");
            }
            Finalization::Stale => {
                debug!(target: "viva::turn", generation, "stale debounce");
            }
        }
    }

    fn on_watchdog(&mut self, ticket: WatchdogTicket, fx: &mut Vec<Effect>) {
        if !self.watchdog.fire(&ticket) {
            debug!(target: "viva::turn", ticket = ticket.id, "stale watchdog ticket");
            return;
        }
        if self.state != TurnState::AwaitingCandidate || ticket.turn_id != self.turn_id {
            debug!(target: "viva::turn", state = %self.state, "watchdog fired after turn advanced");
            return;
        }
        if self.aggregator.has_pending() {
            debug!(target: "viva::turn", "candidate mid-answer; re-arming watchdog");
            self.arm_watchdog(fx);
            return;
        }
        info!(target: "viva::turn", turn_id = self.turn_id, "no response; nudging candidate");
        self.begin_ai_turn(
            Trigger::Nudge {
                question: self.settings.nudge_question.clone(),
            },
            fx,
        );
    }

    fn on_context(&mut self, request_id: u64, context: &str, fx: &mut Vec<Effect>) {
        let pending = match self.pending.take() {
            Some(p) if p.request_id == request_id => p,
            other => {
                self.pending = other;
                debug!(target: "viva::turn", request_id, "stale context result");
                return;
            }
        };

        let instructions = self.composer.compose(
            &pending.trigger,
            self.log.prefix(pending.history_len),
            context,
            pending.interaction,
        );
        info!(
            target: "viva::turn",
            trigger = pending.trigger.kind(),
            interaction = pending.interaction,
            reinjected = self.composer.reinjects(pending.interaction),
            "sending response.create"
        );
        fx.push(Effect::Send(OutboundCommand::create(
            self.settings.modalities.clone(),
            instructions,
        )));

        if self.state == TurnState::Processing {
            self.ai_speaking = true;
            self.suppression = Suppression::Indefinite;
            self.transition(TurnState::InterviewerSpeaking);
        }
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    /// Start an AI turn: count it, silence candidate intake and request context.
    /// Scripted questions are logged and spoken immediately; response-driven
    /// turns stay in `Processing` until the context arrives.
    fn begin_ai_turn(&mut self, trigger: Trigger, fx: &mut Vec<Effect>) {
        self.interactions += 1;
        self.clear_candidate_turn(fx);
        self.suppression = Suppression::Indefinite;

        let history_len = self.log.len();
        match trigger.scripted_question() {
            Some(question) => {
                fx.push(Effect::Appended(self.log.append(Role::Interviewer, question)));
                self.speech_recorded = true;
                self.ai_speaking = true;
                self.transition(TurnState::InterviewerSpeaking);
            }
            None => self.speech_recorded = false,
        }

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        fx.push(Effect::FetchContext {
            request_id,
            query: trigger.query().to_string(),
        });
        self.pending = Some(PendingCompose {
            request_id,
            trigger,
            history_len,
            interaction: self.interactions,
        });
    }

    /// Drop any half-heard answer and the watchdog.
    fn clear_candidate_turn(&mut self, fx: &mut Vec<Effect>) {
        if let Some(generation) = self.aggregator.reset() {
            fx.push(Effect::CancelDebounce { generation });
        }
        if let Some(ticket) = self.watchdog.disarm() {
            fx.push(Effect::DisarmWatchdog { ticket });
        }
    }

    fn arm_watchdog(&mut self, fx: &mut Vec<Effect>) {
        let (ticket, displaced) = self.watchdog.arm(self.turn_id);
        if let Some(old) = displaced {
            fx.push(Effect::DisarmWatchdog { ticket: old });
        }
        fx.push(Effect::ArmWatchdog {
            ticket,
            after: self.settings.watchdog_timeout,
        });
    }

    fn transition(&mut self, next: TurnState) {
        self.turn_id += 1;
        debug!(target: "viva::turn", from = %self.state, to = %next, turn_id = self.turn_id, "turn transition");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPENING: &str = "Tell me about your background.";

    fn machine() -> TurnMachine {
        TurnMachine::from_config(&VivaConfig::default(), &RuntimeConfig::default())
    }

    fn inbound(event: InboundEvent) -> Input {
        Input::Inbound(event)
    }

    fn fragment(text: &str) -> Input {
        inbound(InboundEvent::TranscriptPartial {
            text: text.to_string(),
        })
    }

    fn fetch_request(fx: &[Effect]) -> Option<(u64, String)> {
        fx.iter().find_map(|e| match e {
            Effect::FetchContext { request_id, query } => Some((*request_id, query.clone())),
            _ => None,
        })
    }

    fn sent_instructions(fx: &[Effect]) -> Option<String> {
        fx.iter().find_map(|e| match e {
            Effect::Send(cmd) => cmd.instructions().map(str::to_string),
            _ => None,
        })
    }

    fn debounce_started(fx: &[Effect]) -> Option<u64> {
        fx.iter().find_map(|e| match e {
            Effect::StartDebounce { generation, .. } => Some(*generation),
            _ => None,
        })
    }

    fn watchdog_armed(fx: &[Effect]) -> Option<WatchdogTicket> {
        fx.iter().find_map(|e| match e {
            Effect::ArmWatchdog { ticket, .. } => Some(*ticket),
            _ => None,
        })
    }

    /// Resolve the context lookup in `fx` with empty context; returns the sent instructions.
    fn resolve(m: &mut TurnMachine, fx: &[Effect], now: Instant) -> String {
        let (request_id, _) = fetch_request(fx).expect("fetch requested");
        let out = m.handle(
            Input::ContextResolved {
                request_id,
                context: String::new(),
            },
            now,
        );
        sent_instructions(&out).expect("response.create sent")
    }

    /// Ask, let the model speak it, and return the watchdog ticket armed on done.
    fn ask_and_finish(m: &mut TurnMachine, question: &str, now: Instant) -> WatchdogTicket {
        let fx = m.handle(Input::Ask(question.to_string()), now);
        resolve(m, &fx, now);
        m.handle(inbound(InboundEvent::ResponseStart), now);
        let fx = m.handle(inbound(InboundEvent::ResponseDone), now);
        watchdog_armed(&fx).expect("watchdog armed")
    }

    #[test]
    fn ask_moves_to_interviewer_speaking() {
        let mut m = machine();
        let now = Instant::now();
        assert_eq!(m.state(), TurnState::Idle);

        let fx = m.handle(Input::Ask(OPENING.to_string()), now);
        assert_eq!(m.state(), TurnState::InterviewerSpeaking);
        assert_eq!(m.interactions(), 1);
        assert_eq!(m.suppression(), Suppression::Indefinite);
        assert_eq!(m.log().last().unwrap().role, Role::Interviewer);
        assert_eq!(fetch_request(&fx).unwrap().1, OPENING);

        let instructions = resolve(&mut m, &fx, now);
        assert!(instructions.contains(OPENING));
        assert_eq!(m.state(), TurnState::InterviewerSpeaking);
    }

    #[test]
    fn response_done_opens_candidate_turn_after_settle() {
        let mut m = machine();
        let now = Instant::now();
        ask_and_finish(&mut m, OPENING, now);

        assert_eq!(m.state(), TurnState::AwaitingCandidate);
        assert!(!m.is_ai_speaking());
        assert_eq!(
            m.suppression(),
            Suppression::Until(now + Duration::from_millis(500))
        );

        let early = m.handle(fragment("trailing echo of question"), now + Duration::from_millis(100));
        assert!(early.is_empty());
        let late = m.handle(fragment("I build databases"), now + Duration::from_millis(600));
        assert!(debounce_started(&late).is_some());
    }

    #[test]
    fn only_last_fragment_is_finalized() {
        let mut m = machine();
        let t0 = Instant::now();
        ask_and_finish(&mut m, OPENING, t0);
        let t0 = t0 + Duration::from_secs(1);

        let g1 = debounce_started(&m.handle(fragment("I think"), t0)).unwrap();
        let fx2 = m.handle(fragment("I think I am a"), t0 + Duration::from_millis(500));
        let g2 = debounce_started(&fx2).unwrap();
        assert!(fx2.contains(&Effect::CancelDebounce { generation: g1 }));
        let g3 = debounce_started(&m.handle(
            fragment("I think I am a backend engineer"),
            t0 + Duration::from_millis(900),
        ))
        .unwrap();

        let before = m.log().len();
        assert!(m.handle(Input::DebounceElapsed { generation: g1 }, t0).is_empty());
        assert!(m.handle(Input::DebounceElapsed { generation: g2 }, t0).is_empty());
        let fx = m.handle(
            Input::DebounceElapsed { generation: g3 },
            t0 + Duration::from_millis(2900),
        );

        assert_eq!(m.log().len(), before + 1);
        let last = m.log().last().unwrap();
        assert_eq!(last.role, Role::Candidate);
        assert_eq!(last.text, "I think I am a backend engineer");
        assert_eq!(m.state(), TurnState::Processing);
        assert!(fx.iter().any(|e| matches!(e, Effect::DisarmWatchdog { .. })));
        assert_eq!(fetch_request(&fx).unwrap().1, "I think I am a backend engineer");

        let instructions = resolve(&mut m, &fx, t0);
        assert!(instructions.contains("The candidate just responded:"));
        assert!(instructions.contains("Interviewee: I think I am a backend engineer"));
        assert_eq!(m.state(), TurnState::InterviewerSpeaking);
        assert_eq!(m.interactions(), 2);
    }

    #[test]
    fn cross_talk_alone_appends_nothing() {
        let mut m = machine();
        let now = Instant::now();
        ask_and_finish(&mut m, OPENING, now);
        let before = m.log().len();

        let fx = m.handle(fragment("hold on, talking to my mom"), now + Duration::from_secs(1));
        assert!(fx.is_empty());
        assert_eq!(m.log().len(), before);
        assert_eq!(m.state(), TurnState::AwaitingCandidate);
    }

    #[test]
    fn short_answer_keeps_waiting_with_watchdog_armed() {
        let mut m = machine();
        let now = Instant::now();
        let ticket = ask_and_finish(&mut m, OPENING, now);
        let g = debounce_started(&m.handle(fragment("yes"), now + Duration::from_secs(1))).unwrap();

        let fx = m.handle(Input::DebounceElapsed { generation: g }, now + Duration::from_secs(3));
        assert!(fx.is_empty());
        assert_eq!(m.state(), TurnState::AwaitingCandidate);
        assert_eq!(m.log().count_role(Role::Candidate), 0);

        let nudge = m.handle(Input::WatchdogFired(ticket), now + Duration::from_secs(31));
        assert!(fetch_request(&nudge).is_some());
    }

    #[test]
    fn no_candidate_append_outside_candidate_turn() {
        let mut m = machine();
        let now = Instant::now();
        assert!(m.handle(fragment("hello is this working"), now).is_empty());

        m.handle(Input::Ask(OPENING.to_string()), now);
        assert!(m
            .handle(fragment("answering too early"), now + Duration::from_secs(5))
            .is_empty());
        assert_eq!(m.log().count_role(Role::Candidate), 0);
    }

    #[test]
    fn watchdog_nudges_exactly_once() {
        let mut m = machine();
        let now = Instant::now();
        let ticket = ask_and_finish(&mut m, OPENING, now);
        let interactions = m.interactions();

        let later = now + Duration::from_secs(30);
        let fx = m.handle(Input::WatchdogFired(ticket), later);
        assert_eq!(m.interactions(), interactions + 1);
        assert_eq!(m.state(), TurnState::InterviewerSpeaking);
        assert_eq!(m.log().last().unwrap().text, viva_core::DEFAULT_NUDGE_QUESTION);
        let instructions = resolve(&mut m, &fx, later);
        assert!(instructions.contains("please ask the following question"));

        assert!(m.handle(Input::WatchdogFired(ticket), later).is_empty());
        assert_eq!(m.interactions(), interactions + 1);
    }

    #[test]
    fn watchdog_after_finalization_is_a_no_op() {
        let mut m = machine();
        let now = Instant::now();
        let ticket = ask_and_finish(&mut m, OPENING, now);
        let g = debounce_started(&m.handle(fragment("I design compilers"), now + Duration::from_secs(1)))
            .unwrap();
        m.handle(Input::DebounceElapsed { generation: g }, now + Duration::from_secs(3));
        let interactions = m.interactions();

        assert!(m
            .handle(Input::WatchdogFired(ticket), now + Duration::from_secs(30))
            .is_empty());
        assert_eq!(m.interactions(), interactions);
    }

    #[test]
    fn watchdog_rearms_while_candidate_is_mid_answer() {
        let mut m = machine();
        let now = Instant::now();
        let ticket = ask_and_finish(&mut m, OPENING, now);
        m.handle(fragment("well so basically"), now + Duration::from_secs(29));

        let fx = m.handle(Input::WatchdogFired(ticket), now + Duration::from_secs(30));
        let rearmed = watchdog_armed(&fx).unwrap();
        assert_ne!(rearmed, ticket);
        assert_eq!(m.state(), TurnState::AwaitingCandidate);
        assert!(fetch_request(&fx).is_none());
    }

    #[test]
    fn interrupt_reopens_intake_immediately() {
        let mut m = machine();
        let now = Instant::now();
        let fx = m.handle(Input::Ask(OPENING.to_string()), now);
        resolve(&mut m, &fx, now);
        m.handle(inbound(InboundEvent::ResponseStart), now);
        assert!(m.is_ai_speaking());

        let fx = m.handle(Input::Interrupt, now + Duration::from_secs(1));
        assert!(fx.contains(&Effect::Send(OutboundCommand::ResponseInterrupt)));
        assert!(!m.is_ai_speaking());
        assert_eq!(m.state(), TurnState::AwaitingCandidate);
        assert_eq!(m.log().last().unwrap().text, INTERRUPT_NOTE);

        let fx = m.handle(fragment("actually I wanted to add"), now + Duration::from_secs(1));
        assert!(debounce_started(&fx).is_some());

        // done of the cancelled response changes nothing
        let fx = m.handle(inbound(InboundEvent::ResponseDone), now + Duration::from_secs(2));
        assert!(fx.is_empty());
        assert_eq!(m.state(), TurnState::AwaitingCandidate);
    }

    #[test]
    fn interrupt_keeps_in_flight_finalization() {
        let mut m = machine();
        let now = Instant::now();
        ask_and_finish(&mut m, OPENING, now);
        let g = debounce_started(&m.handle(fragment("I lead a platform team"), now + Duration::from_secs(1)))
            .unwrap();

        m.handle(Input::Interrupt, now + Duration::from_secs(2));
        m.handle(Input::DebounceElapsed { generation: g }, now + Duration::from_secs(3));
        assert_eq!(m.log().last().unwrap().text, "I lead a platform team");
        assert_eq!(m.state(), TurnState::Processing);
    }

    #[test]
    fn interrupt_before_question_context_arrives() {
        let mut m = machine();
        let now = Instant::now();
        let asked = m.handle(Input::Ask(OPENING.to_string()), now);
        let speaking_turn = m.turn_id();

        let fx = m.handle(Input::Interrupt, now);
        assert!(fx.contains(&Effect::Send(OutboundCommand::ResponseInterrupt)));
        assert_eq!(m.state(), TurnState::AwaitingCandidate);
        assert_eq!(m.turn_id(), speaking_turn + 1);

        let fx = m.handle(fragment("let me start with my last role"), now);
        assert!(debounce_started(&fx).is_some());

        let (request_id, _) = fetch_request(&asked).unwrap();
        let late = m.handle(
            Input::ContextResolved {
                request_id,
                context: "CV".to_string(),
            },
            now + Duration::from_secs(5),
        );
        assert!(late.is_empty());
        assert_eq!(m.state(), TurnState::AwaitingCandidate);
    }

    /// Finalize one answer; returns the effects that start the follow-up lookup.
    fn answer_opening(m: &mut TurnMachine, now: Instant) -> Vec<Effect> {
        ask_and_finish(m, OPENING, now);
        let g = debounce_started(&m.handle(fragment("I maintain a build system"), now + Duration::from_secs(1)))
            .unwrap();
        let fx = m.handle(Input::DebounceElapsed { generation: g }, now + Duration::from_secs(3));
        assert_eq!(m.state(), TurnState::Processing);
        fx
    }

    #[test]
    fn response_done_while_composing_keeps_processing() {
        let mut m = machine();
        let now = Instant::now();
        let fx = answer_opening(&mut m, now);

        assert!(m.handle(inbound(InboundEvent::ResponseDone), now).is_empty());
        assert_eq!(m.state(), TurnState::Processing);

        let instructions = resolve(&mut m, &fx, now);
        assert!(instructions.contains("I maintain a build system"));
        assert_eq!(m.state(), TurnState::InterviewerSpeaking);
    }

    #[test]
    fn interrupt_while_processing_keeps_follow_up() {
        let mut m = machine();
        let now = Instant::now();
        let fx = answer_opening(&mut m, now);

        let interrupted = m.handle(Input::Interrupt, now);
        assert!(interrupted.contains(&Effect::Send(OutboundCommand::ResponseInterrupt)));
        assert_eq!(m.state(), TurnState::Processing);

        let instructions = resolve(&mut m, &fx, now);
        assert!(instructions.contains("The candidate just responded:"));
        assert_eq!(m.state(), TurnState::InterviewerSpeaking);
    }

    #[test]
    fn fifth_interaction_reinjects_prompt() {
        let mut m = machine();
        let now = Instant::now();
        let prompt = viva_core::DEFAULT_SYSTEM_PROMPT;
        for i in 1..=5u64 {
            let fx = m.handle(Input::Ask(format!("Question number {}?", i)), now);
            let instructions = resolve(&mut m, &fx, now);
            let expected = if i == 5 { 2 } else { 1 };
            assert_eq!(instructions.matches(prompt).count(), expected, "interaction {}", i);
        }
    }

    #[test]
    fn stale_context_result_is_ignored() {
        let mut m = machine();
        let now = Instant::now();
        let first = m.handle(Input::Ask("First question?".to_string()), now);
        let second = m.handle(Input::Ask("Second question?".to_string()), now);
        let (stale_id, _) = fetch_request(&first).unwrap();

        let fx = m.handle(
            Input::ContextResolved {
                request_id: stale_id,
                context: String::new(),
            },
            now,
        );
        assert!(fx.is_empty());
        assert!(resolve(&mut m, &second, now).contains("Second question?"));
    }

    #[test]
    fn spoken_follow_up_is_logged_once() {
        let mut m = machine();
        let now = Instant::now();
        ask_and_finish(&mut m, OPENING, now);
        let g = debounce_started(&m.handle(fragment("I write Rust daily"), now + Duration::from_secs(1)))
            .unwrap();
        let fx = m.handle(Input::DebounceElapsed { generation: g }, now + Duration::from_secs(3));
        resolve(&mut m, &fx, now);

        let done = |t: &str| {
            inbound(InboundEvent::ResponseTranscriptDone {
                transcript: t.to_string(),
            })
        };
        m.handle(done("What was your hardest bug?"), now);
        m.handle(done("What was your hardest bug?"), now);
        assert_eq!(m.log().count_role(Role::Interviewer), 2);
        assert_eq!(m.log().last().unwrap().text, "What was your hardest bug?");
    }
}
