//! `conclave roles` — List the role catalog.

use conclave_core::agent::{AgentRole, CapabilityGrade};
use std::path::{Path, PathBuf};

use super::{load_config, load_roles};

pub fn run(config_path: &Path, roles: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let catalog = load_roles(&config, roles)?;

    if catalog.is_empty() {
        println!("No roles defined.");
        return Ok(());
    }

    println!("{} roles:", catalog.len());
    for role in &catalog.roles {
        println!();
        println!("  {} ({})", role.id, role.display_name());
        if !role.description.is_empty() {
            println!("    {}", role.description);
        }
        println!("    grade:       {}", grade_label(role.capability_grade()));
        println!("    permissions: {}", permission_summary(role));
        if let Some(tools) = &role.allowed_tools {
            println!("    tools:       {}", tools.join(", "));
        }
        if let Some(model) = &role.model.model {
            println!("    model:       {model}");
        }
    }
    Ok(())
}

fn grade_label(grade: CapabilityGrade) -> &'static str {
    match grade {
        CapabilityGrade::Organizer => "organizer",
        CapabilityGrade::Executor => "executor",
    }
}

fn permission_summary(role: &AgentRole) -> String {
    let p = &role.permissions;
    let mut flags = Vec::new();
    if p.can_veto {
        flags.push(format!("veto ({})", p.veto_level));
    }
    if p.can_approve {
        flags.push("approve".to_string());
    }
    if p.can_delegate {
        flags.push("delegate".to_string());
    }
    if p.read_only {
        flags.push("read-only".to_string());
    }
    if !p.can_execute {
        flags.push("no-exec".to_string());
    }
    if let Some(target) = &p.escalation_target {
        flags.push(format!("escalates to {target}"));
    }
    if flags.is_empty() {
        "none".to_string()
    } else {
        flags.join(", ")
    }
}
