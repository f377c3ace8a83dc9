//! Viva interview daemon
//!
//! Hosts one interview session over stdio. Each stdin line is either a raw
//! data-channel envelope (JSON) or an operator command (`/interrupt`,
//! `/ask <question>`). Outbound commands are written to stdout as JSON lines;
//! logs go to stderr. Ctrl-C or stdin EOF ends the session and the transcript is
//! written to `transcript_path` when configured.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use viva_core::{
    load_runtime_config, ContextRetriever, CredentialSource, HttpContextRetriever,
    HttpCredentialSource, HttpRuntimeConfigSource, NoContext, RuntimeConfig, VivaConfig,
};
use viva_voice::{ChannelSink, ConversationLog, OutboundCommand, Session, SessionHandle, VoiceResult};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[viva-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = VivaConfig::load().unwrap_or_else(|e| {
        tracing::warn!(target: "viva::daemon", error = %e, "config not loaded; using defaults");
        VivaConfig::default()
    });

    let runtime = match HttpRuntimeConfigSource::new(&config.backend) {
        Ok(source) => load_runtime_config(&source).await,
        Err(e) => {
            tracing::warn!(target: "viva::daemon", error = %e, "runtime config client unavailable; using defaults");
            RuntimeConfig::default()
        }
    };
    tracing::info!(
        target: "viva::daemon",
        model = %runtime.model,
        voice = %runtime.voice,
        backend = %config.backend.base_url,
        "Viva daemon started"
    );

    // The credential is for the media transport, which lives outside this process.
    match HttpCredentialSource::new(&config.backend) {
        Ok(source) => match source.fetch_session_credential().await {
            Ok(credential) => tracing::info!(target: "viva::daemon", ?credential, "session credential issued"),
            Err(e) => tracing::warn!(target: "viva::daemon", error = %e, "no session credential"),
        },
        Err(e) => tracing::warn!(target: "viva::daemon", error = %e, "credential client unavailable"),
    }

    let retriever: Arc<dyn ContextRetriever> = match HttpContextRetriever::new(&config.backend) {
        Ok(retriever) => Arc::new(retriever),
        Err(e) => {
            tracing::warn!(target: "viva::daemon", error = %e, "retrieval unavailable; interviewing without CV context");
            Arc::new(NoContext)
        }
    };

    let (sink, outbound) = ChannelSink::new(true);
    let (session, handle) = Session::new(&config, &runtime, retriever, Arc::new(sink));
    let session_task = tokio::spawn(session.run());
    let writer = tokio::spawn(write_commands(outbound));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Err(e) = dispatch(&handle, &line) {
                        tracing::warn!(target: "viva::daemon", error = %e, "session stopped accepting input");
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(target: "viva::daemon", "stdin closed; ending session");
                    break;
                }
                Err(e) => {
                    tracing::warn!(target: "viva::daemon", error = %e, "stdin read failed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "viva::daemon", "CTRL-C received; ending session");
                break;
            }
        }
    }

    let _ = handle.shutdown();
    match session_task.await {
        Ok(Ok(log)) => {
            if let Some(path) = config.transcript_path.as_deref() {
                match export_transcript(path, &log).await {
                    Ok(()) => tracing::info!(target: "viva::daemon", path, utterances = log.len(), "transcript written"),
                    Err(e) => tracing::warn!(target: "viva::daemon", path, error = %e, "transcript not written"),
                }
            }
        }
        Ok(Err(e)) => tracing::warn!(target: "viva::daemon", error = %e, "session failed"),
        Err(e) => tracing::warn!(target: "viva::daemon", error = %e, "session task aborted"),
    }
    let _ = writer.await;
}

/// One stdin line, classified.
#[derive(Debug, PartialEq, Eq)]
enum OperatorLine<'a> {
    Interrupt,
    Ask(&'a str),
    Envelope(&'a str),
    Blank,
}

fn classify(line: &str) -> OperatorLine<'_> {
    let line = line.trim();
    if line.is_empty() {
        OperatorLine::Blank
    } else if line == "/interrupt" {
        OperatorLine::Interrupt
    } else if let Some(question) = line.strip_prefix("/ask ") {
        OperatorLine::Ask(question.trim())
    } else {
        OperatorLine::Envelope(line)
    }
}

fn dispatch(handle: &SessionHandle, line: &str) -> VoiceResult<()> {
    match classify(line) {
        OperatorLine::Interrupt => handle.interrupt(),
        OperatorLine::Ask(question) => handle.ask(question),
        OperatorLine::Envelope(raw) => handle.inbound(raw),
        OperatorLine::Blank => Ok(()),
    }
}

async fn write_commands(mut outbound: tokio::sync::mpsc::UnboundedReceiver<OutboundCommand>) {
    let mut stdout = tokio::io::stdout();
    while let Some(command) = outbound.recv().await {
        let line = match command.to_json() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(target: "viva::daemon", error = %e, "command not encodable");
                continue;
            }
        };
        let written = async {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await
        };
        if let Err(e) = written.await {
            tracing::warn!(target: "viva::daemon", error = %e, "stdout closed");
            break;
        }
    }
}

async fn export_transcript(path: &str, log: &ConversationLog) -> VoiceResult<()> {
    let json = log.to_json_pretty()?;
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, json).await?;
    Ok(())
}
