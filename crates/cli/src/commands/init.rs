//! `ralph init`: first-time setup.

use anyhow::Context;
use ralph_config::AppConfig;
use ralph_core::story::{Prd, Story};
use std::path::Path;

pub fn run(config_path: &Path) -> anyhow::Result<()> {
    println!("🦀 Ralph Setup");
    println!("=============\n");

    if config_path.exists() {
        println!("  Config already exists: {}", config_path.display());
    } else {
        write_file(config_path, &AppConfig::default_toml())?;
        println!("✅ Created config: {}", config_path.display());
    }

    let config = AppConfig::load(config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    std::fs::create_dir_all(&config.paths.state_dir).with_context(|| {
        format!("Cannot create state directory {}", config.paths.state_dir.display())
    })?;

    let prd_path = &config.paths.prd;
    if prd_path.exists() {
        println!("  PRD already exists: {}", prd_path.display());
    } else {
        let sample = serde_json::to_string_pretty(&sample_prd())?;
        write_file(prd_path, &sample)?;
        println!("✅ Created sample PRD: {}", prd_path.display());
    }

    println!("\n📝 Next steps:");
    println!("   1. Describe your stories in {}", prd_path.display());
    println!("   2. Add quality gates to {}", config_path.display());
    println!("   3. Run: ralph run");
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("Cannot write {}", path.display()))
}

fn sample_prd() -> Prd {
    Prd {
        project: "my-project".into(),
        description: "Describe the product here.".into(),
        stories: vec![Story {
            id: "US-001".into(),
            title: "First story".into(),
            description: "As a user, I want something so that I get value.".into(),
            acceptance_criteria: vec![
                "The behavior is implemented".into(),
                "Tests cover it".into(),
            ],
            priority: 1,
            passes: false,
            notes: None,
        }],
    }
}
