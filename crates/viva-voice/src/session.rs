//! **Interview Session**: the async driver around [`TurnMachine`].
//!
//! One `Session` per connection. It owns the state machine, every timer handle and
//! the outbound sink; nothing here is shared between sessions. All inputs (raw
//! channel messages, operator commands, timer expiries, context results) are
//! funnelled through one `select!` loop and handled one at a time.
//!
//! Timers are plain tokio tasks. Cancelling one aborts its specific `JoinHandle`;
//! a timer that slips through anyway is rejected by the machine's generation and
//! ticket checks.

use crate::conversation::{ConversationLog, Utterance};
use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{InboundEvent, OutboundCommand};
use crate::turn::{Effect, Input, TurnMachine};
use crate::watchdog::WatchdogTicket;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;
use viva_core::{context_or_empty, ContextRetriever, RuntimeConfig, VivaConfig};

// -----------------------------------------------------------------------------
// Outbound sink
// -----------------------------------------------------------------------------

/// Where outbound commands go (the data channel, or a test recorder).
#[async_trait]
pub trait CommandSink: Send + Sync {
    /// False until the channel is established.
    fn is_open(&self) -> bool;

    /// `ChannelNotReady` is retried by the session; `ChannelClosed` ends it.
    async fn send(&self, command: &OutboundCommand) -> VoiceResult<()>;
}

/// Sink backed by an unbounded channel, with a readiness flag that can be flipped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutboundCommand>,
    open: Arc<AtomicBool>,
}

impl ChannelSink {
    pub fn new(open: bool) -> (Self, mpsc::UnboundedReceiver<OutboundCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                open: Arc::new(AtomicBool::new(open)),
            },
            rx,
        )
    }

    pub fn set_open(&self, open: bool) {
        self.open.store(open, Ordering::SeqCst);
    }
}

#[async_trait]
impl CommandSink for ChannelSink {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, command: &OutboundCommand) -> VoiceResult<()> {
        if !self.is_open() {
            return Err(VoiceError::ChannelNotReady);
        }
        self.tx
            .send(command.clone())
            .map_err(|_| VoiceError::ChannelClosed)
    }
}

// -----------------------------------------------------------------------------
// Session
// -----------------------------------------------------------------------------

#[derive(Debug)]
enum Control {
    Inbound(String),
    Interrupt,
    Ask(String),
    Shutdown,
}

#[derive(Debug)]
enum Internal {
    Input(Input),
    Resend(OutboundCommand),
}

/// Cloneable handle for feeding a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<Control>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Raw data-channel message; undecodable ones are logged and skipped.
    pub fn inbound(&self, raw: impl Into<String>) -> VoiceResult<()> {
        self.push(Control::Inbound(raw.into()))
    }

    pub fn interrupt(&self) -> VoiceResult<()> {
        self.push(Control::Interrupt)
    }

    pub fn ask(&self, question: impl Into<String>) -> VoiceResult<()> {
        self.push(Control::Ask(question.into()))
    }

    pub fn shutdown(&self) -> VoiceResult<()> {
        self.push(Control::Shutdown)
    }

    fn push(&self, control: Control) -> VoiceResult<()> {
        self.tx.send(control).map_err(|_| VoiceError::ChannelClosed)
    }
}

pub struct Session {
    id: Uuid,
    machine: TurnMachine,
    retriever: Arc<dyn ContextRetriever>,
    sink: Arc<dyn CommandSink>,
    opening_question: String,
    send_retry: Duration,
    control_rx: mpsc::UnboundedReceiver<Control>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    debounce_timers: HashMap<u64, JoinHandle<()>>,
    watchdog_timer: Option<(WatchdogTicket, JoinHandle<()>)>,
    /// Context lookups and send retries.
    background: JoinSet<()>,
    observer: Option<mpsc::UnboundedSender<Utterance>>,
}

impl Session {
    pub fn new(
        config: &VivaConfig,
        runtime: &RuntimeConfig,
        retriever: Arc<dyn ContextRetriever>,
        sink: Arc<dyn CommandSink>,
    ) -> (Self, SessionHandle) {
        let id = Uuid::new_v4();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let session = Self {
            id,
            machine: TurnMachine::from_config(config, runtime),
            retriever,
            sink,
            opening_question: config.script.opening_question.clone(),
            send_retry: config.timing.send_retry(),
            control_rx,
            internal_tx,
            internal_rx,
            debounce_timers: HashMap::new(),
            watchdog_timer: None,
            background: JoinSet::new(),
            observer: None,
        };
        (session, SessionHandle { id, tx: control_tx })
    }

    /// Receive every utterance as it is committed to the log.
    pub fn with_transcript_observer(mut self, observer: mpsc::UnboundedSender<Utterance>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run until shutdown, handle drop or a closed channel. Returns the conversation.
    pub async fn run(mut self) -> VoiceResult<ConversationLog> {
        info!(target: "viva::session", session_id = %self.id, "session started");

        let opening = self.opening_question.clone();
        if let Err(e) = self.apply(Input::Ask(opening)).await {
            warn!(target: "viva::session", session_id = %self.id, error = %e, "opening question failed");
            return Ok(self.finish());
        }

        loop {
            let step: VoiceResult<bool> = tokio::select! {
                Some(internal) = self.internal_rx.recv() => self.on_internal(internal).await.map(|_| true),
                control = self.control_rx.recv() => self.on_control(control).await,
                Some(_) = self.background.join_next(), if !self.background.is_empty() => Ok(true),
            };
            match step {
                Ok(true) => {}
                Ok(false) => break,
                Err(VoiceError::ChannelClosed) => {
                    warn!(target: "viva::session", session_id = %self.id, "channel closed; ending session");
                    break;
                }
                Err(e) => warn!(target: "viva::session", session_id = %self.id, error = %e, "session step failed"),
            }
        }

        Ok(self.finish())
    }

    async fn on_control(&mut self, control: Option<Control>) -> VoiceResult<bool> {
        match control {
            Some(Control::Inbound(raw)) => match InboundEvent::parse(&raw) {
                Ok(event) => {
                    debug!(target: "viva::session", kind = event.kind(), "inbound event");
                    self.apply(Input::Inbound(event)).await?;
                }
                Err(e) => warn!(target: "viva::session", error = %e, "dropping undecodable message"),
            },
            Some(Control::Interrupt) => self.apply(Input::Interrupt).await?,
            Some(Control::Ask(question)) => self.apply(Input::Ask(question)).await?,
            Some(Control::Shutdown) | None => return Ok(false),
        }
        Ok(true)
    }

    async fn on_internal(&mut self, internal: Internal) -> VoiceResult<()> {
        match internal {
            Internal::Input(input) => {
                match &input {
                    Input::DebounceElapsed { generation } => {
                        self.debounce_timers.remove(generation);
                    }
                    Input::WatchdogFired(ticket) => {
                        if self.watchdog_timer.as_ref().map(|(t, _)| t) == Some(ticket) {
                            self.watchdog_timer = None;
                        }
                    }
                    _ => {}
                }
                self.apply(input).await
            }
            Internal::Resend(command) => self.send(command).await,
        }
    }

    async fn apply(&mut self, input: Input) -> VoiceResult<()> {
        let effects = self.machine.handle(input, Instant::now());
        for effect in effects {
            self.execute(effect).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, effect: Effect) -> VoiceResult<()> {
        match effect {
            Effect::Send(command) => return self.send(command).await,
            Effect::StartDebounce { generation, after } => {
                let handle = self.schedule(after, Input::DebounceElapsed { generation });
                if let Some(old) = self.debounce_timers.insert(generation, handle) {
                    old.abort();
                }
            }
            Effect::CancelDebounce { generation } => {
                if let Some(handle) = self.debounce_timers.remove(&generation) {
                    handle.abort();
                }
            }
            Effect::ArmWatchdog { ticket, after } => {
                let handle = self.schedule(after, Input::WatchdogFired(ticket));
                if let Some((_, old)) = self.watchdog_timer.replace((ticket, handle)) {
                    old.abort();
                }
            }
            Effect::DisarmWatchdog { ticket } => {
                if self.watchdog_timer.as_ref().map(|(t, _)| *t) == Some(ticket) {
                    if let Some((_, handle)) = self.watchdog_timer.take() {
                        handle.abort();
                    }
                }
            }
            Effect::FetchContext { request_id, query } => {
                let retriever = Arc::clone(&self.retriever);
                let tx = self.internal_tx.clone();
                self.background.spawn(async move {
                    let context = context_or_empty(retriever.as_ref(), &query).await;
                    let _ = tx.send(Internal::Input(Input::ContextResolved { request_id, context }));
                });
            }
            Effect::Appended(utterance) => {
                debug!(
                    target: "viva::session",
                    role = utterance.role.label(),
                    text = %utterance.text,
                    "utterance appended"
                );
                if let Some(observer) = &self.observer {
                    if observer.send(utterance).is_err() {
                        self.observer = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Send now, or retry after `send_retry` while the channel is not open.
    async fn send(&mut self, command: OutboundCommand) -> VoiceResult<()> {
        if !self.sink.is_open() {
            self.retry_later(command);
            return Ok(());
        }
        match self.sink.send(&command).await {
            Ok(()) => {
                debug!(target: "viva::session", kind = command.kind(), turn_id = self.machine.turn_id(), "command sent");
                Ok(())
            }
            Err(VoiceError::ChannelNotReady) => {
                self.retry_later(command);
                Ok(())
            }
            Err(VoiceError::ChannelClosed) => Err(VoiceError::ChannelClosed),
            Err(e) => {
                warn!(target: "viva::session", kind = command.kind(), error = %e, "send failed");
                Ok(())
            }
        }
    }

    fn retry_later(&mut self, command: OutboundCommand) {
        debug!(target: "viva::session", kind = command.kind(), retry_in = ?self.send_retry, "channel not ready");
        let tx = self.internal_tx.clone();
        let after = self.send_retry;
        self.background.spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Internal::Resend(command));
        });
    }

    fn schedule(&self, after: Duration, input: Input) -> JoinHandle<()> {
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(Internal::Input(input));
        })
    }

    fn finish(mut self) -> ConversationLog {
        for (_, handle) in self.debounce_timers.drain() {
            handle.abort();
        }
        if let Some((_, handle)) = self.watchdog_timer.take() {
            handle.abort();
        }
        self.background.abort_all();
        info!(
            target: "viva::session",
            session_id = %self.id,
            interactions = self.machine.interactions(),
            turns = self.machine.turn_id(),
            utterances = self.machine.log().len(),
            "session ended"
        );
        self.machine.into_log()
    }
}
