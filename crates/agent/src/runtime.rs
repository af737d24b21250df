//! Agent runtime — one mailbox-driven task per spawned agent.
//!
//! ```text
//!            ┌──────────── pause ────────────┐
//!            ▼                               │
//!  Paused ◄─ Idle ─► Thinking ─► Acting ─► Idle
//!                       │           │
//!                       └─► Error ◄─┘ ── backoff ──► Idle
//!
//!  any state ── stop ──► Stopped
//! ```
//!
//! The loop waits on the mailbox together with the stop token and the pause
//! flag, so a stop is noticed without polling. Cycles of one agent never
//! overlap: mailbox cycles and pattern-driven [`AgentRuntime::respond`] turns
//! share one cycle lock.
//!
//! An agent restarted under a known id first works through the last few
//! stored messages addressed to it that it never answered.

use chrono::Utc;
use conclave_bus::{Mailbox, MessageBus};
use conclave_config::RuntimeConfig;
use conclave_core::agent::{AgentInstance, AgentRole, AgentStatus};
use conclave_core::error::ModelError;
use conclave_core::event::ObserverEvent;
use conclave_core::memory::{NoProjectMemory, ProjectMemory};
use conclave_core::message::{Message, MessageKind};
use conclave_veto::VetoManager;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{ActionKind, ParsedAction, parse_actions, parse_tool_calls};
use crate::context::{self, ContextSources};
use crate::roster::{Roster, RosterEntry};
use crate::think::ModelChain;
use crate::tooling::GuardedTools;

/// Delegations shorter than this carry the full model answer instead.
const MIN_DELEGATION_CHARS: usize = 20;

/// How many stored messages a restarted agent picks up again.
const REPLAY_LIMIT: usize = 5;

/// Shared services every runtime of an engine uses.
#[derive(Clone)]
pub struct RuntimeServices {
    pub bus: Arc<MessageBus>,
    pub tools: GuardedTools,
    pub vetoes: Arc<VetoManager>,
    pub models: Arc<ModelChain>,
    pub memory: Arc<dyn ProjectMemory>,
    pub roster: Arc<Roster>,
    pub config: RuntimeConfig,
}

impl RuntimeServices {
    pub fn new(
        bus: Arc<MessageBus>,
        tools: GuardedTools,
        vetoes: Arc<VetoManager>,
        models: Arc<ModelChain>,
    ) -> Self {
        Self {
            bus,
            tools,
            vetoes,
            models,
            memory: Arc::new(NoProjectMemory),
            roster: Arc::new(Roster::new()),
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_memory(mut self, memory: Arc<dyn ProjectMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Agent {0} is stopped")]
    Stopped(String),

    #[error("Agent {0} is paused")]
    Paused(String),

    #[error("Think timed out after {0}s")]
    ThinkTimeout(u64),

    #[error(transparent)]
    Model(#[from] ModelError),
}

/// The outcome of one think/act cycle.
#[derive(Debug, Clone)]
pub struct Turn {
    pub text: String,
    pub model: String,
    pub actions: Vec<ParsedAction>,
    pub tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Mailbox message: plain answers go back to the sender
    Mailbox,
    /// Pattern turn: the caller takes the answer
    Pattern,
}

#[derive(Default)]
struct Dialogue {
    partner: Option<String>,
    streak: u32,
    rounds: u32,
}

pub struct AgentRuntime {
    core: Arc<AgentCore>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct AgentCore {
    id: String,
    role: AgentRole,
    session_id: String,
    project_id: Option<String>,
    services: RuntimeServices,
    instance: Mutex<AgentInstance>,
    dialogue: Mutex<Dialogue>,
    paused: watch::Sender<bool>,
    cycle: tokio::sync::Mutex<()>,
}

impl AgentRuntime {
    /// Register a new agent for `role` on the bus and start its loop.
    pub fn spawn(
        role: AgentRole,
        session_id: &str,
        project_id: Option<String>,
        services: RuntimeServices,
    ) -> Arc<Self> {
        let instance = AgentInstance::new(&role.id, session_id);
        Self::start(instance, role, project_id, services, false)
    }

    /// Like [`spawn`](Self::spawn) but reusing a known agent id, as when a
    /// session is resumed. Pending stored messages for that id are replayed
    /// before the mailbox.
    pub fn spawn_as(
        agent_id: impl Into<String>,
        role: AgentRole,
        session_id: &str,
        project_id: Option<String>,
        services: RuntimeServices,
    ) -> Arc<Self> {
        let mut instance = AgentInstance::new(&role.id, session_id);
        instance.id = agent_id.into();
        Self::start(instance, role, project_id, services, true)
    }

    fn start(
        instance: AgentInstance,
        role: AgentRole,
        project_id: Option<String>,
        services: RuntimeServices,
        replay: bool,
    ) -> Arc<Self> {
        let id = instance.id.clone();
        let session_id = instance.session_id.clone();
        let mailbox = services.bus.register_agent(&id, None);
        services.roster.join(
            &session_id,
            RosterEntry {
                agent_id: id.clone(),
                role_id: role.id.clone(),
                role_name: role.name.clone(),
            },
        );

        let (paused, paused_rx) = watch::channel(false);
        let core = Arc::new(AgentCore {
            id,
            role,
            session_id,
            project_id,
            services,
            instance: Mutex::new(instance),
            dialogue: Mutex::new(Dialogue::default()),
            paused,
            cycle: tokio::sync::Mutex::new(()),
        });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_loop(
            Arc::clone(&core),
            mailbox,
            cancel.clone(),
            paused_rx,
            replay,
        ));

        info!(agent = %core.id, role = %core.role.id, session = %core.session_id, "Agent spawned");

        Arc::new(Self {
            core,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn role(&self) -> &AgentRole {
        &self.core.role
    }

    pub fn session_id(&self) -> &str {
        &self.core.session_id
    }

    pub fn status(&self) -> AgentStatus {
        self.core.instance.lock().status
    }

    pub fn snapshot(&self) -> AgentInstance {
        self.core.instance.lock().clone()
    }

    pub fn is_paused(&self) -> bool {
        *self.core.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one cycle for a pattern-driven turn and hand back the answer.
    ///
    /// Actions in the answer are executed; no plain response is sent.
    pub async fn respond(&self, message: &Message) -> Result<Turn, RuntimeError> {
        if self.is_stopped() {
            return Err(RuntimeError::Stopped(self.core.id.clone()));
        }
        if self.is_paused() {
            return Err(RuntimeError::Paused(self.core.id.clone()));
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(RuntimeError::Stopped(self.core.id.clone())),
            turn = self.core.cycle(message, Mode::Pattern) => turn,
        }
    }

    /// Suspend message processing. The mailbox keeps filling. A cycle in
    /// flight finishes first.
    pub fn pause(&self) {
        if self.is_stopped() {
            return;
        }
        self.core.paused.send_replace(true);
        self.core.set_status(AgentStatus::Paused);
        debug!(agent = %self.core.id, "Agent paused");
    }

    pub fn resume(&self) {
        if self.is_stopped() {
            return;
        }
        self.core.paused.send_replace(false);
        if self.status() == AgentStatus::Paused {
            self.core.set_status(AgentStatus::Idle);
        }
        debug!(agent = %self.core.id, "Agent resumed");
    }

    /// Cancel the loop, abandon any in-flight model call and leave the bus.
    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.core.set_status(AgentStatus::Stopped);
        self.core.services.bus.unregister_agent(&self.core.id);
        self.core.services.roster.leave(&self.core.session_id, &self.core.id);
        info!(agent = %self.core.id, session = %self.core.session_id, "Agent stopped");
    }
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("id", &self.core.id)
            .field("role", &self.core.role.id)
            .field("session", &self.core.session_id)
            .field("status", &self.status())
            .finish()
    }
}

async fn run_loop(
    core: Arc<AgentCore>,
    mut mailbox: Mailbox,
    cancel: CancellationToken,
    mut paused: watch::Receiver<bool>,
    replay: bool,
) {
    let mut pending = if replay {
        tokio::select! {
            _ = cancel.cancelled() => return,
            pending = core.pending_messages() => pending,
        }
    } else {
        VecDeque::new()
    };

    loop {
        if *paused.borrow_and_update() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        let message = match pending.pop_front() {
            Some(message) => message,
            None => tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = mailbox.recv() => match received {
                    Some(message) => message,
                    None => break,
                },
            },
        };

        if !core.accepts(&message) {
            continue;
        }

        if !core.take_round() {
            warn!(
                agent = %core.id,
                session = %core.session_id,
                max_rounds = core.services.config.max_rounds,
                "Round limit reached, agent stops reading its mailbox"
            );
            core.set_status(AgentStatus::Idle);
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = core.cycle(&message, Mode::Mailbox) => {}
        }
    }
    debug!(agent = %core.id, "Agent loop finished");
}

impl AgentCore {
    /// Move along a state-machine edge. Invalid edges are ignored.
    fn set_status(&self, next: AgentStatus) -> bool {
        let previous = {
            let mut instance = self.instance.lock();
            let previous = instance.status;
            if previous == next {
                return true;
            }
            if !previous.can_transition_to(next) {
                debug!(agent = %self.id, from = %previous, to = %next, "Ignoring status transition");
                return false;
            }
            instance.status = next;
            instance.last_active = Utc::now();
            previous
        };

        self.services.bus.notify(ObserverEvent::StatusChanged {
            agent_id: self.id.clone(),
            session_id: self.session_id.clone(),
            from: previous,
            to: next,
            timestamp: Utc::now(),
        });
        true
    }

    /// Back to idle, or straight on to paused when a pause is pending.
    fn settle(&self) {
        self.set_status(AgentStatus::Idle);
        if *self.paused.borrow() {
            self.set_status(AgentStatus::Paused);
        }
    }

    /// The newest stored messages of the session addressed to this agent
    /// (directly or by broadcast) that it has not answered, oldest first.
    /// Pattern traffic is left out; the engine asks again on its next run.
    async fn pending_messages(&self) -> VecDeque<Arc<Message>> {
        let history = match self.services.bus.session_messages(&self.session_id, usize::MAX, 0).await {
            Ok(history) => history,
            Err(e) => {
                debug!(agent = %self.id, error = %e, "Replay skipped, message store unavailable");
                return VecDeque::new();
            }
        };

        let answered: HashSet<&str> = history
            .iter()
            .filter(|m| m.from_agent == self.id)
            .filter_map(|m| m.parent_id.as_deref())
            .collect();
        let mut pending: Vec<Arc<Message>> = history
            .iter()
            .rev()
            .filter(|m| m.is_broadcast() || m.to_agent.as_deref() == Some(self.id.as_str()))
            .filter(|m| {
                m.kind != MessageKind::System
                    && !m.content.trim().is_empty()
                    && m.from_agent != self.id
                    && !m.is_pattern_traffic()
                    && !answered.contains(m.id.as_str())
            })
            .take(REPLAY_LIMIT)
            .map(|m| Arc::new(m.clone()))
            .collect();
        pending.reverse();

        if !pending.is_empty() {
            info!(
                agent = %self.id,
                session = %self.session_id,
                count = pending.len(),
                "Replaying pending messages"
            );
        }
        pending.into()
    }

    /// Mailbox filter: system events, empty text, own echoes, other
    /// sessions, and a partner past its consecutive-exchange limit.
    fn accepts(&self, message: &Message) -> bool {
        if message.kind == MessageKind::System
            || message.content.trim().is_empty()
            || message.from_agent == self.id
            || message.session_id != self.session_id
        {
            return false;
        }

        let limit = self.services.config.ping_pong_limit;
        let mut dialogue = self.dialogue.lock();
        if dialogue.partner.as_deref() == Some(message.from_agent.as_str()) {
            if dialogue.streak >= limit {
                debug!(
                    agent = %self.id,
                    partner = %message.from_agent,
                    limit,
                    "Skipping message, exchange limit with partner reached"
                );
                return false;
            }
            dialogue.streak += 1;
        } else {
            dialogue.partner = Some(message.from_agent.clone());
            dialogue.streak = 1;
        }
        true
    }

    fn take_round(&self) -> bool {
        let mut dialogue = self.dialogue.lock();
        dialogue.rounds += 1;
        dialogue.rounds <= self.services.config.max_rounds
    }

    async fn cycle(&self, inbound: &Message, mode: Mode) -> Result<Turn, RuntimeError> {
        let _cycle = self.cycle.lock().await;
        self.set_status(AgentStatus::Thinking);

        let timeout_secs = self.services.config.think_timeout_secs;
        let thought = match tokio::time::timeout(Duration::from_secs(timeout_secs), self.think(inbound)).await {
            Ok(Ok(turn)) => turn,
            Ok(Err(e)) => return Err(self.fail(RuntimeError::Model(e)).await),
            Err(_) => return Err(self.fail(RuntimeError::ThinkTimeout(timeout_secs)).await),
        };

        {
            let mut instance = self.instance.lock();
            instance.messages_received += 1;
            instance.tokens_used += thought.tokens;
            instance.last_active = Utc::now();
        }

        let actions = parse_actions(&thought.text);
        if !actions.is_empty() {
            self.set_status(AgentStatus::Acting);
            for action in &actions {
                self.execute(action, inbound, &thought.text).await;
            }
        } else if mode == Mode::Mailbox {
            let reply = Message::new(
                &self.session_id,
                &self.id,
                &inbound.from_agent,
                MessageKind::Response,
                thought.text.as_str(),
            )
            .with_parent(&inbound.id);
            self.send(reply).await;
        }

        debug!(
            agent = %self.id,
            session = %self.session_id,
            model = %thought.model,
            actions = actions.len(),
            "Cycle complete"
        );
        self.settle();

        Ok(Turn { actions, ..thought })
    }

    async fn fail(&self, error: RuntimeError) -> RuntimeError {
        self.instance.lock().error_count += 1;
        warn!(agent = %self.id, session = %self.session_id, error = %error, "Cycle failed");
        self.set_status(AgentStatus::Error);
        tokio::time::sleep(Duration::from_millis(self.services.config.error_backoff_ms)).await;
        self.settle();
        error
    }

    /// Query the model chain, running any requested tools once.
    async fn think(&self, inbound: &Message) -> Result<Turn, ModelError> {
        let services = &self.services;
        let specs = services.tools.specs_for(&self.role);
        let sources = ContextSources {
            bus: &services.bus,
            memory: services.memory.as_ref(),
            project_id: self.project_id.as_deref(),
            tools: &specs,
        };
        let ctx = context::assemble(&self.role, &self.id, inbound, &sources).await;

        let first = services.models.query(&self.role, &ctx.system, &ctx.prompt).await?;
        let mut tokens = first.estimated_tokens();

        let calls = parse_tool_calls(&first.text);
        if calls.is_empty() {
            return Ok(Turn {
                text: first.text,
                model: first.model,
                actions: Vec::new(),
                tokens,
            });
        }

        let observations = services
            .tools
            .call_all(
                &self.id,
                &self.session_id,
                &self.role,
                &calls,
                services.config.max_tool_calls_per_cycle,
            )
            .await;
        let results = observations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n\n");

        let follow_up = format!(
            "{}\n\n## Your previous answer\n{}\n\n## Tool results\n{results}\n\n\
             Give your final answer now. Do not call tools again.",
            ctx.prompt, first.text
        );
        let second = services.models.query(&self.role, &ctx.system, &follow_up).await?;
        tokens += second.estimated_tokens();

        Ok(Turn {
            text: second.text,
            model: second.model,
            actions: Vec::new(),
            tokens,
        })
    }

    async fn execute(&self, action: &ParsedAction, inbound: &Message, full_text: &str) {
        let name = self.role.display_name();
        let message = match action.kind {
            ActionKind::Delegate => {
                if !self.role.permissions.can_delegate {
                    warn!(agent = %self.id, role = %self.role.id, "Delegation ignored, role cannot delegate");
                    return;
                }
                let content = if action.content.trim().chars().count() < MIN_DELEGATION_CHARS {
                    format!("Task delegated by {name}:\n\n{full_text}")
                } else {
                    action.content.clone()
                };
                let to = self.resolve(action.target.as_deref().unwrap_or_default());
                Message::new(&self.session_id, &self.id, to, MessageKind::Delegate, content)
                    .requiring_response()
            }
            ActionKind::Veto => {
                let outcome = self
                    .services
                    .vetoes
                    .submit_veto(&self.id, &self.role, &inbound.id, &self.session_id, &action.reason)
                    .await;
                match outcome {
                    Ok(_) => self.instance.lock().messages_sent += 1,
                    Err(rejection) => {
                        warn!(agent = %self.id, role = %self.role.id, %rejection, "Veto rejected");
                    }
                }
                return;
            }
            ActionKind::Approve => {
                let content = if action.body().is_empty() {
                    format!("Approved by {name}")
                } else {
                    action.body().to_string()
                };
                Message::broadcast(&self.session_id, &self.id, MessageKind::Approve, content)
            }
            ActionKind::Ask => {
                let to = self.resolve(action.target.as_deref().unwrap_or_default());
                Message::new(&self.session_id, &self.id, to, MessageKind::Request, action.body())
                    .requiring_response()
            }
            ActionKind::Escalate => {
                let content = if action.body().is_empty() {
                    format!("Escalation from {name}")
                } else {
                    action.body().to_string()
                };
                let target = self
                    .role
                    .permissions
                    .escalation_target
                    .as_deref()
                    .and_then(|t| self.services.roster.resolve(&self.session_id, t));
                match target {
                    Some(to) => Message::new(&self.session_id, &self.id, to, MessageKind::Escalate, content),
                    None => Message::broadcast(&self.session_id, &self.id, MessageKind::Escalate, content),
                }
            }
        };

        let message = message
            .with_parent(&inbound.id)
            .with_metadata("action_type", action.kind.as_str());
        debug!(agent = %self.id, action = %action.kind.as_str(), to = ?message.to_agent, "Action executed");
        self.send(message).await;
    }

    /// Agent id for a model-written target. Unknown targets are kept as
    /// written and dead-letter on the bus.
    fn resolve(&self, target: &str) -> String {
        self.services
            .roster
            .resolve(&self.session_id, target)
            .unwrap_or_else(|| target.trim().to_string())
    }

    async fn send(&self, message: Message) {
        match self.services.bus.publish(message).await {
            Ok(_) => self.instance.lock().messages_sent += 1,
            Err(e) => warn!(agent = %self.id, error = %e, "Publish failed"),
        }
    }
}
