//! Terminal presentation: the observer printer and the stdin human gate.

use async_trait::async_trait;
use conclave_core::event::ObserverEvent;
use conclave_core::message::Message;
use conclave_core::session::Session;
use conclave_orchestrator::{GateDecision, HumanGate};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

const PREVIEW_CHARS: usize = 160;

/// Print observer events until the bus side closes.
pub fn spawn_printer(mut events: mpsc::Receiver<ObserverEvent>, show_status: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = render(&event, show_status) {
                println!("{line}");
            }
        }
    })
}

fn render(event: &ObserverEvent, show_status: bool) -> Option<String> {
    match event {
        ObserverEvent::Message { message } => Some(render_message(message)),
        ObserverEvent::StatusChanged { agent_id, from, to, .. } => {
            show_status.then(|| format!("  · {agent_id}: {from} → {to}"))
        }
        ObserverEvent::SessionChanged { session_id, status, .. } => {
            Some(format!("== session {session_id} {status}"))
        }
    }
}

fn render_message(message: &Message) -> String {
    let to = message.to_agent.as_deref().filter(|t| !t.is_empty()).unwrap_or("all");
    format!(
        "  [{}] {} → {to}: {}",
        message.kind,
        message.from_agent,
        preview(&message.content)
    )
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}…", &flat[..idx]),
        None => flat,
    }
}

/// Asks the operator at each checkpoint.
///
/// An empty line or `a` approves, `r <reason>` rejects, anything else is
/// sent back to the agent as feedback.
pub struct StdinGate {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinGate {
    pub fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl Default for StdinGate {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HumanGate for StdinGate {
    async fn review(&self, checkpoint: &str, session: &Session, draft: &str) -> GateDecision {
        println!();
        println!("── checkpoint '{checkpoint}' for session {} ──", session.name);
        println!("{draft}");
        println!("── [enter/a] approve · r <reason> reject · anything else: feedback ──");

        let line = match self.lines.lock().await.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => {
                tracing::warn!(checkpoint = %checkpoint, "No operator input, approving");
                return GateDecision::Approve;
            }
        };
        parse_decision(&line)
    }
}

fn parse_decision(line: &str) -> GateDecision {
    let line = line.trim();
    if line.is_empty() || line.eq_ignore_ascii_case("a") || line.eq_ignore_ascii_case("approve") {
        return GateDecision::Approve;
    }
    if line.eq_ignore_ascii_case("r") {
        return GateDecision::Reject("rejected by operator".into());
    }
    if let Some(reason) = line.strip_prefix("r ").or_else(|| line.strip_prefix("R ")) {
        return GateDecision::Reject(reason.trim().to_string());
    }
    GateDecision::Refine(line.to_string())
}
