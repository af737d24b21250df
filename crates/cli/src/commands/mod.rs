pub mod config_cmd;
pub mod console;
pub mod roles;
pub mod run;

use anyhow::Context;
use conclave_config::{AppConfig, RoleCatalog};
use std::path::{Path, PathBuf};

/// Config file plus environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let mut config = AppConfig::load_from(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.apply_env(|key| std::env::var(key).ok());
    Ok(config)
}

/// The role catalog named on the command line, else the one in config.
pub fn load_roles(config: &AppConfig, explicit: Option<PathBuf>) -> anyhow::Result<RoleCatalog> {
    let path = explicit
        .or_else(|| config.roles_file.clone())
        .context("No role catalog: pass --roles <file> or set roles_file in config")?;
    RoleCatalog::load_from(&path).with_context(|| format!("Failed to load roles from {}", path.display()))
}
