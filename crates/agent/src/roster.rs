//! Session roster — who is in which session.
//!
//! Models address each other by role id (`[DELEGATE:qa]`), by display name,
//! or by agent id. The roster turns any of those into the agent id the bus
//! routes on, scoped to one session.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterEntry {
    pub agent_id: String,
    pub role_id: String,
    pub role_name: String,
}

#[derive(Debug, Default)]
pub struct Roster {
    sessions: RwLock<HashMap<String, Vec<RosterEntry>>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, session_id: &str, entry: RosterEntry) {
        let mut sessions = self.sessions.write();
        let members = sessions.entry(session_id.to_string()).or_default();
        members.retain(|m| m.agent_id != entry.agent_id);
        members.push(entry);
    }

    pub fn leave(&self, session_id: &str, agent_id: &str) {
        let mut sessions = self.sessions.write();
        if let Some(members) = sessions.get_mut(session_id) {
            members.retain(|m| m.agent_id != agent_id);
            if members.is_empty() {
                sessions.remove(session_id);
            }
        }
    }

    pub fn clear_session(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    /// Members in join order.
    pub fn members(&self, session_id: &str) -> Vec<RosterEntry> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Agent id for a target written by a model. Exact agent id wins, then
    /// role id, then display name (both case-insensitive).
    pub fn resolve(&self, session_id: &str, target: &str) -> Option<String> {
        let target = target.trim().trim_start_matches('@');
        let sessions = self.sessions.read();
        let members = sessions.get(session_id)?;

        members
            .iter()
            .find(|m| m.agent_id == target)
            .or_else(|| members.iter().find(|m| m.role_id.eq_ignore_ascii_case(target)))
            .or_else(|| {
                members
                    .iter()
                    .find(|m| !m.role_name.is_empty() && m.role_name.eq_ignore_ascii_case(target))
            })
            .map(|m| m.agent_id.clone())
    }
}
