//! `ironloop onboard`: First-time setup.

use std::path::Path;

use anyhow::Context;
use ironloop_config::AppConfig;

pub fn run() -> anyhow::Result<()> {
    let config_dir = AppConfig::config_dir();
    println!("ironloop: First-Time Setup");
    println!("===========================\n");
    let config_path = write_defaults(&config_dir)?;

    println!("\nNext steps:");
    println!("   1. Edit {} and set your API key and [ai] goals", config_path.display());
    println!("   2. Run: ironloop run\n");
    Ok(())
}

/// Create `dir`, its `workspace/` and a default `config.toml`.
///
/// An existing config file is left alone.
fn write_defaults(dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    let config_path = dir.join("config.toml");
    let workspace_dir = dir.join("workspace");

    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        println!("Created config directory: {}", dir.display());
    } else {
        println!("  Config directory exists: {}", dir.display());
    }

    if !workspace_dir.exists() {
        std::fs::create_dir_all(&workspace_dir)
            .with_context(|| format!("Failed to create {}", workspace_dir.display()))?;
        println!("Created workspace directory: {}", workspace_dir.display());
    }

    if config_path.exists() {
        println!("\nConfig already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("Created config.toml at: {}", config_path.display());
    }
    Ok(config_path)
}
