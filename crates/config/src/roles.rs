//! Role catalog — externally supplied agent role definitions.
//!
//! ```toml
//! [[roles]]
//! id = "lead_dev"
//! name = "Lead Developer"
//! persona = "You lead the development team."
//! hierarchy_rank = 20
//! allowed_tools = ["code_read", "code_search", "git_status"]
//!
//! [roles.permissions]
//! can_veto = true
//! veto_level = "strong"
//! can_delegate = true
//! ```

use conclave_core::agent::AgentRole;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use crate::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleCatalog {
    #[serde(default)]
    pub roles: Vec<AgentRole>,
}

impl RoleCatalog {
    pub fn new(roles: Vec<AgentRole>) -> Self {
        Self { roles }
    }

    /// Load and validate a catalog file. Unlike the main config, a missing
    /// catalog is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let catalog: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        catalog.validate()?;
        tracing::debug!(path = %path.display(), roles = catalog.roles.len(), "Role catalog loaded");
        Ok(catalog)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for role in &self.roles {
            if role.id.trim().is_empty() {
                return Err(ConfigError::ValidationError("role id cannot be empty".into()));
            }
            if !seen.insert(role.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate role id: {}",
                    role.id
                )));
            }
            if role.persona.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "role {} has an empty persona",
                    role.id
                )));
            }
            if !(0.0..=2.0).contains(&role.model.temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "role {} temperature must be between 0.0 and 2.0",
                    role.id
                )));
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&AgentRole> {
        self.roles.iter().find(|r| r.id == id)
    }

    /// Add or replace a role.
    pub fn insert(&mut self, role: AgentRole) {
        match self.roles.iter_mut().find(|r| r.id == role.id) {
            Some(existing) => *existing = role,
            None => self.roles.push(role),
        }
    }

    pub fn ids(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
