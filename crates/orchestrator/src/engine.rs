//! The orchestration engine — owns sessions and their agents.
//!
//! ```text
//! create_session ──► Active ──run_session──► Completed
//!                      │   │                  Failed ──┐
//!                      │   └──stop_session──► Cancelled┤
//!                      ▲                               │
//!                      └────────── resume ◄────────────┘
//! ```
//!
//! A finished session keeps its (stopped) agents so their counters stay
//! inspectable through [`OrchestrationEngine::session_agents`].

use chrono::Utc;
use conclave_agent::{AgentRuntime, RuntimeServices};
use conclave_config::{OrchestratorConfig, RoleCatalog};
use conclave_core::advisor::PatternAdvisor;
use conclave_core::agent::AgentInstance;
use conclave_core::error::SessionError;
use conclave_core::event::ObserverEvent;
use conclave_core::session::{OrchestrationPattern, Session, SessionStatus};
use conclave_core::store::SessionStore;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::patterns::{HumanGate, PatternResult, PatternRun, dispatch};

/// A finished run: the session as it ended and what the pattern produced.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: Session,
    pub result: PatternResult,
}

struct LiveSession {
    session: Session,
    agents: Vec<Arc<AgentRuntime>>,
    cancel: CancellationToken,
    running: bool,
    /// Bumped whenever the entry is replaced, so a run never settles a
    /// session it did not start.
    generation: u64,
}

pub struct OrchestrationEngine {
    services: RuntimeServices,
    roles: RoleCatalog,
    sessions: Arc<dyn SessionStore>,
    config: OrchestratorConfig,
    advisor: Option<Arc<dyn PatternAdvisor>>,
    gate: Option<Arc<dyn HumanGate>>,
    live: RwLock<HashMap<String, LiveSession>>,
    generations: AtomicU64,
}

impl OrchestrationEngine {
    pub fn new(
        services: RuntimeServices,
        roles: RoleCatalog,
        sessions: Arc<dyn SessionStore>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            services,
            roles,
            sessions,
            config,
            advisor: None,
            gate: None,
            live: RwLock::new(HashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    /// Consult `advisor` before every run.
    pub fn with_advisor(mut self, advisor: Arc<dyn PatternAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    /// Human-in-loop checkpoints go to `gate`. Without one they auto-approve.
    pub fn with_human_gate(mut self, gate: Arc<dyn HumanGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn services(&self) -> &RuntimeServices {
        &self.services
    }

    pub fn roles(&self) -> &RoleCatalog {
        &self.roles
    }

    /// Spawn one agent per known role and register the session as active.
    /// Unknown roles are logged and skipped; a session may end up with no
    /// agents and then fails when run.
    pub async fn create_session(
        &self,
        name: impl Into<String>,
        goal: impl Into<String>,
        pattern: OrchestrationPattern,
        role_ids: Vec<String>,
        project_id: Option<String>,
    ) -> Session {
        let mut session = Session::new(name, goal, pattern, role_ids, project_id);

        let agents: Vec<Arc<AgentRuntime>> = session
            .role_ids
            .iter()
            .filter_map(|role_id| match self.roles.get(role_id) {
                Some(role) => Some(AgentRuntime::spawn(
                    role.clone(),
                    &session.id,
                    session.project_id.clone(),
                    self.services.clone(),
                )),
                None => {
                    warn!(session = %session.id, role = %role_id, "Unknown role, agent not spawned");
                    None
                }
            })
            .collect();
        session.agents = agents.iter().map(|a| a.id().to_string()).collect();

        info!(
            session = %session.id,
            pattern = %session.pattern,
            agents = session.agents.len(),
            requested = session.role_ids.len(),
            "Session created"
        );

        self.live.write().insert(
            session.id.clone(),
            LiveSession {
                session: session.clone(),
                agents,
                cancel: CancellationToken::new(),
                running: false,
                generation: self.next_generation(),
            },
        );
        self.announce(&session).await;
        session
    }

    /// Run the session's pattern to completion and settle its status.
    ///
    /// Pattern failures are reported in the returned [`SessionReport`], not
    /// as errors. A session stopped mid-run reports a cancelled result.
    pub async fn run_session(&self, session_id: &str) -> Result<SessionReport, SessionError> {
        let (mut session, mut agents, cancel, generation) = {
            let mut live = self.live.write();
            let entry = live
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            if entry.session.status != SessionStatus::Active {
                return Err(invalid_state(&entry.session, "run"));
            }
            if entry.running {
                return Err(SessionError::InvalidState {
                    id: session_id.to_string(),
                    status: "running".into(),
                    action: "run".into(),
                });
            }
            entry.running = true;
            (
                entry.session.clone(),
                entry.agents.clone(),
                entry.cancel.clone(),
                entry.generation,
            )
        };

        if let Some(advisor) = &self.advisor
            && let Some(suggestion) = advisor.suggest(&session).await
        {
            let chosen: Option<Vec<Arc<AgentRuntime>>> = suggestion
                .agent_ids
                .iter()
                .map(|id| agents.iter().find(|a| a.id() == id).cloned())
                .collect();
            match chosen.filter(|c| !c.is_empty()) {
                Some(chosen) => {
                    info!(
                        session = %session.id,
                        pattern = %suggestion.pattern,
                        agents = chosen.len(),
                        "Advisor suggestion accepted"
                    );
                    session.pattern = suggestion.pattern;
                    agents = chosen;
                }
                None => warn!(
                    session = %session.id,
                    suggested = ?suggestion.agent_ids,
                    "Advisor suggestion ignored, agents are not part of the session"
                ),
            }
        }

        let pattern = session.pattern;
        info!(session = %session.id, pattern = %pattern, agents = agents.len(), "Session running");

        let timeout_secs = self.config.pattern_timeout_secs;
        let run = PatternRun {
            session: &session,
            agents: &agents,
            bus: &self.services.bus,
            config: &self.config,
            gate: self.gate.as_deref(),
        };
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(Duration::from_secs(timeout_secs), dispatch(&run)) => Some(
                result.unwrap_or_else(|_| {
                    PatternResult::failed(pattern, Vec::new(), format!("Pattern timed out after {timeout_secs}s"))
                }),
            ),
        };

        let Some(mut result) = outcome else {
            // stop_session already settled the session
            let settled = self.finish_live(session_id, generation, None);
            return Ok(cancelled_report(settled, session, pattern));
        };

        if self.services.vetoes.has_blocking_veto(&session.id) {
            let reasons = self.services.vetoes.blocking_reasons(&session.id).join("; ");
            let reason = format!("Blocked by veto: {reasons}");
            warn!(session = %session.id, reason = %reason, "Session blocked by veto");
            result.success = false;
            result.error = Some(reason);
        }

        if result.success {
            session.status = SessionStatus::Completed;
            session.completed_at = Some(Utc::now());
            session.failure_reason = None;
        } else {
            session.status = SessionStatus::Failed;
            session.failure_reason = Some(result.error.clone().unwrap_or_else(|| "Pattern failed".into()));
        }

        for agent in &agents {
            agent.stop();
        }

        let Some(settled) = self.finish_live(session_id, generation, Some(session.clone())) else {
            // Stopped and resumed while the pattern was finishing
            return Ok(cancelled_report(None, session, pattern));
        };
        if settled.status == SessionStatus::Completed {
            self.services.tools.guard().release_session(&settled.id);
        }
        info!(
            session = %settled.id,
            status = %settled.status,
            reason = ?settled.failure_reason,
            "Session finished"
        );
        self.announce(&settled).await;
        Ok(SessionReport {
            session: settled,
            result,
        })
    }

    /// Write the run's outcome into the live map, unless a stop got there
    /// first. Every agent of the session is stopped.
    ///
    /// `None` when the entry is gone or was replaced by a resume after this
    /// run started; the newer entry is left alone.
    fn finish_live(&self, session_id: &str, generation: u64, outcome: Option<Session>) -> Option<Session> {
        let mut live = self.live.write();
        let entry = live.get_mut(session_id)?;
        if entry.generation != generation {
            debug!(session = %session_id, "Stale run settled after resume, ignoring");
            return None;
        }
        entry.running = false;
        for agent in &entry.agents {
            agent.stop();
        }
        if let Some(session) = outcome
            && !entry.cancel.is_cancelled()
        {
            entry.session = session;
        }
        self.services.roster.clear_session(session_id);
        Some(entry.session.clone())
    }

    /// Stop every agent of an active session and mark it cancelled.
    pub async fn stop_session(&self, session_id: &str) -> Result<Session, SessionError> {
        let session = {
            let mut live = self.live.write();
            let entry = live
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            match entry.session.status {
                SessionStatus::Cancelled => return Ok(entry.session.clone()),
                SessionStatus::Completed | SessionStatus::Failed => {
                    return Err(invalid_state(&entry.session, "stopped"));
                }
                SessionStatus::Active => {}
            }
            entry.cancel.cancel();
            for agent in &entry.agents {
                agent.stop();
            }
            entry.session.status = SessionStatus::Cancelled;
            entry.session.clone()
        };
        self.services.roster.clear_session(session_id);

        info!(session = %session_id, "Session cancelled");
        self.announce(&session).await;
        Ok(session)
    }

    /// Give a failed or cancelled session a fresh run. The agents come back
    /// under their old ids, so guard counters and vetoes carry over.
    pub async fn resume(&self, session_id: &str) -> Result<Session, SessionError> {
        let known = self.live.read().get(session_id).map(|entry| {
            let pairs: Vec<(String, String)> = entry
                .agents
                .iter()
                .map(|a| (a.id().to_string(), a.role().id.clone()))
                .collect();
            (entry.session.clone(), pairs)
        });
        let (mut session, pairs) = match known {
            Some(known) => known,
            None => {
                let session = self.load(session_id).await?;
                let pairs = session
                    .agents
                    .iter()
                    .map(|id| (id.clone(), role_of(id).to_string()))
                    .collect();
                (session, pairs)
            }
        };

        if !matches!(session.status, SessionStatus::Failed | SessionStatus::Cancelled) {
            return Err(invalid_state(&session, "resumed"));
        }

        let agents: Vec<Arc<AgentRuntime>> = pairs
            .into_iter()
            .filter_map(|(agent_id, role_id)| match self.roles.get(&role_id) {
                Some(role) => Some(AgentRuntime::spawn_as(
                    agent_id,
                    role.clone(),
                    &session.id,
                    session.project_id.clone(),
                    self.services.clone(),
                )),
                None => {
                    warn!(session = %session.id, agent = %agent_id, role = %role_id, "Unknown role, agent not respawned");
                    None
                }
            })
            .collect();

        session.agents = agents.iter().map(|a| a.id().to_string()).collect();
        session.status = SessionStatus::Active;
        session.failure_reason = None;
        session.completed_at = None;

        let replaced = self.live.write().insert(
            session.id.clone(),
            LiveSession {
                session: session.clone(),
                agents,
                cancel: CancellationToken::new(),
                running: false,
                generation: self.next_generation(),
            },
        );
        if let Some(previous) = replaced {
            previous.cancel.cancel();
            for agent in &previous.agents {
                agent.stop();
            }
        }

        info!(session = %session.id, agents = session.agents.len(), "Session resumed");
        self.announce(&session).await;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Session, SessionError> {
        if let Some(entry) = self.live.read().get(session_id) {
            return Ok(entry.session.clone());
        }
        self.load(session_id).await
    }

    /// Live and stored sessions, oldest first.
    pub async fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: HashMap<String, Session> = match self.sessions.list_sessions().await {
            Ok(stored) => stored.into_iter().map(|s| (s.id.clone(), s)).collect(),
            Err(e) => {
                warn!(error = %e, "Could not list stored sessions");
                HashMap::new()
            }
        };
        for entry in self.live.read().values() {
            sessions.insert(entry.session.id.clone(), entry.session.clone());
        }
        let mut sessions: Vec<Session> = sessions.into_values().collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Snapshots of the session's agents, in spawn order.
    pub fn session_agents(&self, session_id: &str) -> Result<Vec<AgentInstance>, SessionError> {
        let live = self.live.read();
        let entry = live
            .get(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        Ok(entry.agents.iter().map(|a| a.snapshot()).collect())
    }

    async fn load(&self, session_id: &str) -> Result<Session, SessionError> {
        match self.sessions.load_session(session_id).await {
            Ok(Some(session)) => Ok(session),
            Ok(None) => Err(SessionError::NotFound(session_id.to_string())),
            Err(e) => {
                warn!(session = %session_id, error = %e, "Session lookup failed");
                Err(SessionError::NotFound(session_id.to_string()))
            }
        }
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed)
    }

    /// Tell observers and the store about the session's current state.
    async fn announce(&self, session: &Session) {
        self.services.bus.notify(ObserverEvent::SessionChanged {
            session_id: session.id.clone(),
            status: session.status,
            timestamp: Utc::now(),
        });
        if let Err(e) = self.sessions.save_session(session).await {
            warn!(session = %session.id, error = %e, "Session could not be persisted");
        } else {
            debug!(session = %session.id, status = %session.status, "Session persisted");
        }
    }
}

fn invalid_state(session: &Session, action: &str) -> SessionError {
    SessionError::InvalidState {
        id: session.id.clone(),
        status: session.status.to_string(),
        action: action.to_string(),
    }
}

/// The report of a run that a stop cut short. `settled` is the live state
/// when this run still owns the entry.
fn cancelled_report(settled: Option<Session>, mut session: Session, pattern: OrchestrationPattern) -> SessionReport {
    let session = settled.unwrap_or_else(|| {
        session.status = SessionStatus::Cancelled;
        session.completed_at = None;
        session
    });
    SessionReport {
        session,
        result: PatternResult::failed(pattern, Vec::new(), "Session cancelled"),
    }
}

/// Role id encoded in an agent id (`<role>-<suffix>`).
fn role_of(agent_id: &str) -> &str {
    agent_id.rsplit_once('-').map_or(agent_id, |(role, _)| role)
}
