//! Veto records, the per-role cooldown, and the override rules.
//!
//! Records are indexed by submission order; the index is what callers
//! pass back to override a veto.

use chrono::{DateTime, Utc};
use conclave_bus::MessageBus;
use conclave_config::VetoConfig;
use conclave_core::agent::{AgentRole, VetoLevel};
use conclave_core::message::{Message, MessageKind};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

pub const VETO_PRIORITY: i32 = 10;
pub const OVERRIDE_PRIORITY: i32 = 8;

/// One submitted veto. `overridden` only ever moves from false to true.
#[derive(Debug, Clone, Serialize)]
pub struct VetoRecord {
    pub agent_id: String,
    pub role_id: String,
    pub level: VetoLevel,
    pub reason: String,
    pub message_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub overridden: bool,
    pub overridden_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VetoRejection {
    #[error("Role {role_id} does not have veto permission")]
    NotPermitted { role_id: String },

    #[error("Veto cooldown active ({remaining_secs}s remaining)")]
    CooldownActive { remaining_secs: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverrideRejection {
    #[error("Invalid veto index")]
    InvalidIndex,

    #[error("ABSOLUTE vetoes cannot be overridden")]
    Absolute,

    #[error("STRONG vetoes require human escalation")]
    RequiresHuman,

    #[error("Insufficient authority to override")]
    InsufficientAuthority,

    #[error("Veto already overridden")]
    AlreadyOverridden,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VetoStats {
    pub total: usize,
    pub active: usize,
    pub overridden: usize,
    pub absolute: usize,
    pub strong: usize,
    pub advisory: usize,
}

#[derive(Default)]
struct VetoState {
    records: Vec<VetoRecord>,
    last_veto: HashMap<String, Instant>,
}

/// Records vetoes and adjudicates overrides. Shared across every agent of
/// every session; one mutex guards the append-only record list.
pub struct VetoManager {
    cooldown: Duration,
    state: Mutex<VetoState>,
    bus: Option<Arc<MessageBus>>,
}

impl VetoManager {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: Mutex::new(VetoState::default()),
            bus: None,
        }
    }

    pub fn from_config(config: &VetoConfig) -> Self {
        Self::new(Duration::from_secs(config.cooldown_secs))
    }

    /// Broadcast veto and override messages on `bus`.
    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Record a veto at the role's configured level. Returns the record index.
    pub async fn submit_veto(
        &self,
        agent_id: &str,
        role: &AgentRole,
        message_id: &str,
        session_id: &str,
        reason: &str,
    ) -> Result<usize, VetoRejection> {
        if !role.permissions.can_veto {
            return Err(VetoRejection::NotPermitted {
                role_id: role.id.clone(),
            });
        }

        let level = role.permissions.veto_level;
        let index = {
            let mut state = self.state.lock();
            let now = Instant::now();

            if let Some(last) = state.last_veto.get(agent_id) {
                let elapsed = now.saturating_duration_since(*last);
                if elapsed < self.cooldown {
                    return Err(VetoRejection::CooldownActive {
                        remaining_secs: ceil_secs(self.cooldown - elapsed),
                    });
                }
            }

            state.records.push(VetoRecord {
                agent_id: agent_id.to_string(),
                role_id: role.id.clone(),
                level,
                reason: reason.to_string(),
                message_id: message_id.to_string(),
                session_id: session_id.to_string(),
                timestamp: Utc::now(),
                overridden: false,
                overridden_by: None,
            });
            state.last_veto.insert(agent_id.to_string(), now);
            state.records.len() - 1
        };

        info!(role = %role.id, agent = %agent_id, session = %session_id, %level, "Veto: {}", preview(reason));

        if let Some(bus) = &self.bus {
            let message = Message::broadcast(
                session_id,
                agent_id,
                MessageKind::Veto,
                format!("[{level} VETO] {reason}"),
            )
            .with_parent(message_id)
            .with_priority(VETO_PRIORITY)
            .with_metadata("veto_level", level_name(level))
            .with_metadata("role", role.id.as_str());

            if let Err(e) = bus.publish(message).await {
                warn!(session = %session_id, error = %e, "Veto recorded but broadcast failed");
            }
        }

        Ok(index)
    }

    /// Whether `overrider` could lift the veto at `index`, without doing so.
    pub fn can_override(&self, index: usize, overrider: &AgentRole) -> Result<(), OverrideRejection> {
        let state = self.state.lock();
        let record = state.records.get(index).ok_or(OverrideRejection::InvalidIndex)?;
        check_override(record, overrider)
    }

    pub async fn override_veto(
        &self,
        index: usize,
        overrider_id: &str,
        overrider: &AgentRole,
        justification: &str,
    ) -> Result<(), OverrideRejection> {
        let record = {
            let mut state = self.state.lock();
            let record = state
                .records
                .get_mut(index)
                .ok_or(OverrideRejection::InvalidIndex)?;
            check_override(record, overrider)?;
            record.overridden = true;
            record.overridden_by = Some(overrider_id.to_string());
            record.clone()
        };

        info!(
            role = %record.role_id,
            overrider = %overrider.id,
            session = %record.session_id,
            "Veto overridden"
        );

        if let Some(bus) = &self.bus {
            let message = Message::broadcast(
                &record.session_id,
                overrider_id,
                MessageKind::Approve,
                format!("Veto override: {justification}"),
            )
            .with_parent(&record.message_id)
            .with_priority(OVERRIDE_PRIORITY)
            .with_metadata("veto_override", true)
            .with_metadata("original_veto_role", record.role_id.as_str());

            if let Err(e) = bus.publish(message).await {
                warn!(session = %record.session_id, error = %e, "Override recorded but broadcast failed");
            }
        }

        Ok(())
    }

    /// True if any veto of the session has not been overridden.
    pub fn has_blocking_veto(&self, session_id: &str) -> bool {
        self.state
            .lock()
            .records
            .iter()
            .any(|v| v.session_id == session_id && !v.overridden)
    }

    pub fn active_vetoes(&self, session_id: &str) -> Vec<VetoRecord> {
        self.state
            .lock()
            .records
            .iter()
            .filter(|v| v.session_id == session_id && !v.overridden)
            .cloned()
            .collect()
    }

    /// `role: reason` for every active veto of the session.
    pub fn blocking_reasons(&self, session_id: &str) -> Vec<String> {
        self.active_vetoes(session_id)
            .into_iter()
            .map(|v| format!("{}: {}", v.role_id, v.reason))
            .collect()
    }

    pub fn stats(&self) -> VetoStats {
        let state = self.state.lock();
        let mut stats = VetoStats {
            total: state.records.len(),
            ..VetoStats::default()
        };
        for record in &state.records {
            if record.overridden {
                stats.overridden += 1;
            } else {
                stats.active += 1;
            }
            match record.level {
                VetoLevel::Absolute => stats.absolute += 1,
                VetoLevel::Strong => stats.strong += 1,
                VetoLevel::Advisory => stats.advisory += 1,
            }
        }
        stats
    }
}

impl std::fmt::Debug for VetoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VetoManager")
            .field("cooldown", &self.cooldown)
            .field("records", &self.state.lock().records.len())
            .field("broadcasts", &self.bus.is_some())
            .finish()
    }
}

fn check_override(record: &VetoRecord, overrider: &AgentRole) -> Result<(), OverrideRejection> {
    match record.level {
        VetoLevel::Absolute => Err(OverrideRejection::Absolute),
        VetoLevel::Strong => Err(OverrideRejection::RequiresHuman),
        VetoLevel::Advisory if record.overridden => Err(OverrideRejection::AlreadyOverridden),
        VetoLevel::Advisory if overrider.permissions.can_approve => Ok(()),
        VetoLevel::Advisory => Err(OverrideRejection::InsufficientAuthority),
    }
}

fn level_name(level: VetoLevel) -> &'static str {
    match level {
        VetoLevel::Absolute => "absolute",
        VetoLevel::Strong => "strong",
        VetoLevel::Advisory => "advisory",
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

fn preview(text: &str) -> &str {
    match text.char_indices().nth(100) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
