//! `conclave config` — Configuration management commands.

use anyhow::Context;
use conclave_config::AppConfig;
use std::path::Path;

use super::load_config;

pub fn show(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let mut shown = config.clone();
    if shown.llm.api_key.is_some() {
        shown.llm.api_key = Some("[REDACTED]".into());
    }
    println!("# {}", path.display());
    println!("{}", toml::to_string_pretty(&shown)?);
    Ok(())
}

pub fn validate(path: &Path) -> anyhow::Result<()> {
    println!("Validating {}", path.display());
    let config = load_config(path)?;
    config.validate()?;
    println!("   Config parsed and validated");

    let mut warnings = Vec::new();
    if config.llm.api_key.is_none() {
        warnings.push("No API key set (llm.api_key, CONCLAVE_API_KEY or OPENAI_API_KEY)".to_string());
    }
    if config.roles_file.is_none() {
        warnings.push("No roles_file set; pass --roles to `conclave run`".to_string());
    } else if let Some(roles) = &config.roles_file
        && !roles.exists()
    {
        warnings.push(format!("roles_file {} does not exist", roles.display()));
    }
    for w in &warnings {
        println!("   warning: {w}");
    }

    println!();
    println!("   Endpoint:   {}", config.llm.base_url);
    println!("   Model:      {}", config.llm.default_model);
    println!(
        "   Local tier: {}",
        if config.llm.local.enabled { config.llm.local.model.as_str() } else { "off" }
    );
    println!("   Workspace:  {}", config.workspace_root().display());
    println!(
        "   Guard:      {} calls / {} writes per session",
        config.guard.max_tool_calls_per_session, config.guard.max_writes_per_session
    );
    Ok(())
}

pub fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    std::fs::write(path, AppConfig::default_toml())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
