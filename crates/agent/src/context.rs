//! Execution context assembly.
//!
//! How much an agent sees depends on its [`CapabilityGrade`]: organizers get
//! long history, more project memory and the vision statement; executors get
//! a short, task-scoped view.

use conclave_bus::MessageBus;
use conclave_core::agent::{AgentRole, CapabilityGrade};
use conclave_core::memory::ProjectMemory;
use conclave_core::message::{Message, MessageKind};
use conclave_core::tool::ToolSpec;
use std::fmt::Write as _;
use tracing::warn;

pub const MAX_SKILLS: usize = 5;
pub const SKILL_CHARS: usize = 1500;
pub const MEMORY_VALUE_CHARS: usize = 200;
pub const VISION_CHARS: usize = 3000;
const HISTORY_LINE_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextLimits {
    pub history: usize,
    pub memory: usize,
    pub vision: bool,
}

impl ContextLimits {
    pub fn for_grade(grade: CapabilityGrade) -> Self {
        match grade {
            CapabilityGrade::Organizer => Self {
                history: 50,
                memory: 10,
                vision: true,
            },
            CapabilityGrade::Executor => Self {
                history: 15,
                memory: 3,
                vision: false,
            },
        }
    }
}

/// The two halves of a model query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptContext {
    pub system: String,
    pub prompt: String,
}

/// Everything context assembly reads from.
pub struct ContextSources<'a> {
    pub bus: &'a MessageBus,
    pub memory: &'a dyn ProjectMemory,
    pub project_id: Option<&'a str>,
    pub tools: &'a [ToolSpec],
}

/// Build the prompt for `agent_id` answering `inbound`. Store failures shrink
/// the context; they never fail the cycle.
pub async fn assemble(
    role: &AgentRole,
    agent_id: &str,
    inbound: &Message,
    sources: &ContextSources<'_>,
) -> PromptContext {
    let limits = ContextLimits::for_grade(role.capability_grade());

    let history = recent_history(sources.bus, &inbound.session_id, &inbound.id, limits.history).await;

    let (memory, vision) = match sources.project_id {
        Some(project) => {
            let memory = sources
                .memory
                .recall(project, limits.memory)
                .await
                .inspect_err(|e| warn!(project = %project, error = %e, "Memory recall failed"))
                .unwrap_or_default();
            let vision = if limits.vision {
                sources
                    .memory
                    .vision(project)
                    .await
                    .inspect_err(|e| warn!(project = %project, error = %e, "Vision lookup failed"))
                    .ok()
                    .flatten()
            } else {
                None
            };
            (memory, vision)
        }
        None => (Vec::new(), None),
    };

    let mut system = role.persona.trim().to_string();
    let _ = write!(
        system,
        "\n\nYou are {} (agent id {agent_id}).",
        role.display_name()
    );

    if let Some(vision) = vision.filter(|v| !v.trim().is_empty()) {
        let _ = write!(system, "\n\n## Project vision\n{}", truncate(&vision, VISION_CHARS));
    }

    if !memory.is_empty() {
        system.push_str("\n\n## Project memory");
        for entry in &memory {
            let category = if entry.category.is_empty() { "note" } else { &entry.category };
            let _ = write!(
                system,
                "\n[{category}] {}: {}",
                entry.key,
                truncate(&entry.value, MEMORY_VALUE_CHARS)
            );
        }
    }

    if !role.skills.is_empty() {
        system.push_str("\n\n## Skills");
        for (i, skill) in role.skills.iter().take(MAX_SKILLS).enumerate() {
            let _ = write!(system, "\n\n### Skill {}\n{}", i + 1, truncate(skill, SKILL_CHARS));
        }
    }

    system.push_str(&action_guide(role, sources.tools));

    let mut prompt = String::new();
    if !history.is_empty() {
        prompt.push_str("## Conversation so far\n");
        for line in &history {
            prompt.push_str(line);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    let _ = write!(
        prompt,
        "## {} from {}\n{}",
        inbound.kind, inbound.from_agent, inbound.content
    );

    PromptContext { system, prompt }
}

async fn recent_history(bus: &MessageBus, session_id: &str, exclude_id: &str, limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }
    let messages = match bus.session_messages(session_id, usize::MAX, 0).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(session = %session_id, error = %e, "History lookup failed");
            return Vec::new();
        }
    };

    let relevant: Vec<&Message> = messages
        .iter()
        .filter(|m| m.kind != MessageKind::System && m.id != exclude_id && !m.content.trim().is_empty())
        .collect();
    let skip = relevant.len().saturating_sub(limit);

    relevant
        .into_iter()
        .skip(skip)
        .map(|m| {
            let to = m.to_agent.as_deref().filter(|t| !t.is_empty()).unwrap_or("all");
            format!(
                "[{} → {to}] {}: {}",
                m.from_agent,
                m.kind,
                truncate(&m.content, HISTORY_LINE_CHARS)
            )
        })
        .collect()
}

fn action_guide(role: &AgentRole, tools: &[ToolSpec]) -> String {
    let permissions = &role.permissions;
    let mut guide = String::from("\n\n## Actions\nAnswer in plain text. You may also use these tags:");
    if permissions.can_delegate {
        guide.push_str("\n- [DELEGATE:<role>] <task> hands a task to another agent");
    }
    if permissions.can_veto {
        guide.push_str("\n- [VETO:<reason>] blocks the work");
    }
    if permissions.can_approve {
        guide.push_str("\n- [APPROVE] approves the work");
    }
    guide.push_str("\n- [ASK:<role>:<question>] asks another agent");
    guide.push_str("\n- [ESCALATE:<reason>] escalates to your superior");

    if !tools.is_empty() {
        guide.push_str("\n\n## Tools\nCall a tool with [TOOL:<name>] {json arguments}.");
        for tool in tools {
            if tool.description.is_empty() {
                let _ = write!(guide, "\n- {}", tool.name);
            } else {
                let _ = write!(guide, "\n- {}: {}", tool.name, tool.description);
            }
        }
    }
    guide
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::memory::{MemoryEntry, NoProjectMemory};
    use conclave_memory::InMemoryStore;
    use std::sync::Arc;

    fn organizer() -> AgentRole {
        let mut role = AgentRole::new("lead", "You lead the team.");
        role.name = "Lead".into();
        role.grade = Some(CapabilityGrade::Organizer);
        role.permissions.can_delegate = true;
        role
    }

    fn executor() -> AgentRole {
        let mut role = AgentRole::new("dev", "You write code.");
        role.grade = Some(CapabilityGrade::Executor);
        role
    }

    async fn seeded() -> (Arc<InMemoryStore>, MessageBus) {
        let store = Arc::new(InMemoryStore::new());
        let bus = MessageBus::new(store.clone());
        for i in 0..20 {
            bus.record(Message::new("s1", "a", "b", MessageKind::Inform, format!("note {i}")))
                .await
                .unwrap();
        }
        store.set_vision("p1", "Ship a fast, safe orchestrator.").await;
        for i in 0..12 {
            let mut entry = MemoryEntry::new(format!("k{i}"), "v".repeat(300));
            entry.category = "decision".into();
            store.remember("p1", entry).await.unwrap();
        }
        (store, bus)
    }

    #[test]
    fn limits_follow_the_grade() {
        assert_eq!(ContextLimits::for_grade(CapabilityGrade::Organizer).history, 50);
        let exec = ContextLimits::for_grade(CapabilityGrade::Executor);
        assert_eq!((exec.history, exec.memory, exec.vision), (15, 3, false));
    }

    #[tokio::test]
    async fn organizer_sees_vision_and_more_memory() {
        let (store, bus) = seeded().await;
        let inbound = Message::new("s1", "user", "lead-1", MessageKind::Request, "Plan the release");
        let sources = ContextSources {
            bus: &bus,
            memory: store.as_ref(),
            project_id: Some("p1"),
            tools: &[],
        };

        let ctx = assemble(&organizer(), "lead-1", &inbound, &sources).await;
        assert!(ctx.system.starts_with("You lead the team."));
        assert!(ctx.system.contains("## Project vision\nShip a fast"));
        assert_eq!(ctx.system.matches("[decision]").count(), 10);
        assert!(ctx.system.contains(&format!(": {}\n", "v".repeat(MEMORY_VALUE_CHARS))));
        assert!(ctx.system.contains("[DELEGATE:<role>]"));
        assert_eq!(ctx.prompt.matches("note ").count(), 20);
        assert!(ctx.prompt.ends_with("## request from user\nPlan the release"));
    }

    #[tokio::test]
    async fn executor_gets_scoped_context() {
        let (store, bus) = seeded().await;
        let inbound = Message::new("s1", "lead-1", "dev-1", MessageKind::Delegate, "Write the parser");
        let tools = vec![ToolSpec {
            name: "code_read".into(),
            description: "Read a file".into(),
        }];
        let sources = ContextSources {
            bus: &bus,
            memory: store.as_ref(),
            project_id: Some("p1"),
            tools: &tools,
        };

        let ctx = assemble(&executor(), "dev-1", &inbound, &sources).await;
        assert!(!ctx.system.contains("Project vision"));
        assert_eq!(ctx.system.matches("[decision]").count(), 3);
        assert!(!ctx.system.contains("[DELEGATE:"));
        assert!(ctx.system.contains("- code_read: Read a file"));
        assert_eq!(ctx.prompt.matches("note ").count(), 15);
        assert!(ctx.prompt.contains("note 19"));
        assert!(!ctx.prompt.contains("note 4\n"));
    }

    #[tokio::test]
    async fn skills_are_capped_and_truncated() {
        let store = Arc::new(InMemoryStore::new());
        let bus = MessageBus::new(store);
        let mut role = executor();
        role.skills = (0..7).map(|i| format!("{i}{}", "s".repeat(2000))).collect();
        let inbound = Message::new("s1", "x", "dev-1", MessageKind::Request, "go");
        let sources = ContextSources {
            bus: &bus,
            memory: &NoProjectMemory,
            project_id: None,
            tools: &[],
        };

        let ctx = assemble(&role, "dev-1", &inbound, &sources).await;
        assert_eq!(ctx.system.matches("### Skill").count(), MAX_SKILLS);
        assert!(!ctx.system.contains(&"s".repeat(SKILL_CHARS)));
        assert!(ctx.prompt.starts_with("## request from x"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 10), "hi");
    }
}
