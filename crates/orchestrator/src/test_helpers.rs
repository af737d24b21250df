//! Shared test fixtures for pattern and engine tests.
//!
//! Roles built with [`role`] carry the persona `persona:<id>.`, which starts
//! every system prompt the runtime assembles. [`PersonaModel`] keys its
//! scripted answers on that prefix.

use async_trait::async_trait;
use conclave_agent::{AgentRuntime, GuardedTools, ModelChain, RuntimeServices};
use conclave_bus::MessageBus;
use conclave_config::{OrchestratorConfig, RoleCatalog, RuntimeConfig};
use conclave_core::agent::AgentRole;
use conclave_core::error::{ModelError, ToolError};
use conclave_core::message::Message;
use conclave_core::provider::{LanguageModel, LlmRequest};
use conclave_core::session::{OrchestrationPattern, Session};
use conclave_core::tool::{ToolExecutor, ToolOutput};
use conclave_memory::InMemoryStore;
use conclave_security::PermissionGuard;
use conclave_veto::VetoManager;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::OrchestrationEngine;
use crate::patterns::{GateDecision, HumanGate, PatternResult, PatternRun, dispatch};

pub fn role(id: &str) -> AgentRole {
    AgentRole::new(id, format!("persona:{id}."))
}

fn persona_key(system_prompt: &str) -> Option<&str> {
    let rest = system_prompt.strip_prefix("persona:")?;
    rest.split_once('.').map(|(key, _)| key)
}

#[derive(Default)]
struct Script {
    queue: VecDeque<String>,
    last: String,
}

/// Answers per role. Each role pops its script and then repeats its last
/// answer. An empty answer reads as a silent agent.
#[derive(Default)]
pub struct PersonaModel {
    scripts: Mutex<HashMap<String, Script>>,
    requests: Mutex<Vec<LlmRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl PersonaModel {
    pub fn new(answers: Vec<(&str, &str)>) -> Self {
        let model = Self::default();
        for (key, answer) in answers {
            model.scripts.lock().insert(
                key.to_string(),
                Script {
                    queue: VecDeque::new(),
                    last: answer.to_string(),
                },
            );
        }
        model
    }

    pub fn script(&self, key: &str, answers: &[&str]) {
        let mut scripts = self.scripts.lock();
        let script = scripts.entry(key.to_string()).or_default();
        script.queue = answers.iter().map(|a| a.to_string()).collect();
    }

    /// Sleep before every answer.
    pub fn slow_down(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Prompts sent on behalf of one role, in call order.
    pub fn prompts_for(&self, key: &str) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter(|r| persona_key(&r.system_prompt) == Some(key))
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl LanguageModel for PersonaModel {
    fn name(&self) -> &str {
        "persona"
    }

    async fn query(&self, request: &LlmRequest) -> Result<String, ModelError> {
        self.requests.lock().push(request.clone());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let key = persona_key(&request.system_prompt).unwrap_or_default();
        let mut scripts = self.scripts.lock();
        let Some(script) = scripts.get_mut(key) else {
            return Err(ModelError::Api {
                status_code: 404,
                message: format!("no script for {key}"),
            });
        };
        if let Some(next) = script.queue.pop_front() {
            script.last = next;
        }
        Ok(script.last.clone())
    }
}

/// An executor with no tools.
pub struct NoTools;

#[async_trait]
impl ToolExecutor for NoTools {
    async fn execute(&self, name: &str, _arguments: serde_json::Value) -> Result<ToolOutput, ToolError> {
        Err(ToolError::NotFound(name.to_string()))
    }

    fn tool_names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// A gate that replays decisions and records what it was shown.
pub struct ScriptedGate {
    decisions: Mutex<VecDeque<GateDecision>>,
    seen: Mutex<Vec<(String, String)>>,
}

impl ScriptedGate {
    pub fn new(decisions: Vec<GateDecision>) -> Self {
        Self {
            decisions: Mutex::new(decisions.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl HumanGate for ScriptedGate {
    async fn review(&self, checkpoint: &str, _session: &Session, draft: &str) -> GateDecision {
        self.seen.lock().push((checkpoint.to_string(), draft.to_string()));
        self.decisions.lock().pop_front().unwrap_or(GateDecision::Approve)
    }
}

pub struct Harness {
    pub model: Arc<PersonaModel>,
    pub store: Arc<InMemoryStore>,
    pub services: RuntimeServices,
    pub config: OrchestratorConfig,
    last_session: Mutex<Option<String>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(answers: Vec<(&str, &str)>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryStore::new());
        let bus = Arc::new(MessageBus::new(store.clone()));
        let model = Arc::new(PersonaModel::new(answers));
        let guard = Arc::new(PermissionGuard::new(dir.path()));
        let vetoes = Arc::new(VetoManager::new(Duration::from_secs(60)).with_bus(bus.clone()));
        let services = RuntimeServices::new(
            bus,
            GuardedTools::new(guard, Arc::new(NoTools)),
            vetoes,
            Arc::new(ModelChain::new(model.clone(), "test-model")),
        )
        .with_memory(store.clone())
        .with_config(RuntimeConfig {
            error_backoff_ms: 10,
            ..RuntimeConfig::default()
        });

        Self {
            model,
            store,
            services,
            config: OrchestratorConfig::default(),
            last_session: Mutex::new(None),
            _dir: dir,
        }
    }

    /// An engine over the same services with these roles in its catalog.
    pub fn engine(&self, roles: Vec<AgentRole>) -> OrchestrationEngine {
        OrchestrationEngine::new(
            self.services.clone(),
            RoleCatalog::new(roles),
            self.store.clone(),
            self.config.clone(),
        )
    }

    pub async fn run(&self, pattern: OrchestrationPattern, roles: &[AgentRole], goal: &str) -> PatternResult {
        self.run_full(pattern, roles, goal, self.config.clone(), None).await
    }

    pub async fn run_with(
        &self,
        pattern: OrchestrationPattern,
        roles: &[AgentRole],
        goal: &str,
        config: OrchestratorConfig,
    ) -> PatternResult {
        self.run_full(pattern, roles, goal, config, None).await
    }

    pub async fn run_gated(
        &self,
        pattern: OrchestrationPattern,
        roles: &[AgentRole],
        goal: &str,
        gate: &dyn HumanGate,
    ) -> PatternResult {
        self.run_full(pattern, roles, goal, self.config.clone(), Some(gate)).await
    }

    /// Spawn `roles` into a fresh session, run the pattern once and stop
    /// the agents.
    pub async fn run_full(
        &self,
        pattern: OrchestrationPattern,
        roles: &[AgentRole],
        goal: &str,
        config: OrchestratorConfig,
        gate: Option<&dyn HumanGate>,
    ) -> PatternResult {
        let mut session = Session::new(
            "test",
            goal,
            pattern,
            roles.iter().map(|r| r.id.clone()).collect(),
            None,
        );
        let agents: Vec<Arc<AgentRuntime>> = roles
            .iter()
            .map(|r| AgentRuntime::spawn(r.clone(), &session.id, None, self.services.clone()))
            .collect();
        session.agents = agents.iter().map(|a| a.id().to_string()).collect();
        *self.last_session.lock() = Some(session.id.clone());

        let run = PatternRun {
            session: &session,
            agents: &agents,
            bus: &self.services.bus,
            config: &config,
            gate,
        };
        let result = dispatch(&run).await;
        for agent in &agents {
            agent.stop();
        }
        result
    }

    /// Every message of the last run's session.
    pub async fn history(&self) -> Vec<Message> {
        let Some(session_id) = self.last_session.lock().clone() else {
            return Vec::new();
        };
        self.services
            .bus
            .session_messages(&session_id, usize::MAX, 0)
            .await
            .unwrap()
    }
}
