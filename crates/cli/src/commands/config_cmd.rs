//! `ironloop config`: Configuration inspection.

use anyhow::Context;
use ironloop_config::AppConfig;

/// Problems that do not stop a run but probably should be fixed.
fn warnings(config: &AppConfig) -> Vec<&'static str> {
    let mut warnings = Vec::new();
    if config.api_key.is_none() && !config.llm.base_url.contains("://localhost") {
        warnings.push("No API key set (set IRONLOOP_API_KEY or OPENAI_API_KEY)");
    }
    if config.ai.goals.is_empty() {
        warnings.push("No goals set under [ai]");
    }
    if config.ai.goals.len() > 5 {
        warnings.push("Only the first 5 goals are shown to the model");
    }
    if config.interaction.continuous_mode && config.interaction.continuous_limit == 0 {
        warnings.push("Continuous mode without a continuous_limit may run forever");
    }
    if config.execution.execute_local_commands && !config.workspace.restrict_to_workspace {
        warnings.push("Shell commands are enabled and file access is not restricted to the workspace");
    }
    warnings
}

pub fn validate() -> anyhow::Result<()> {
    println!("Validating configuration...");
    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   Config parsed successfully");

    let warnings = warnings(&config);
    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Backend:     {}", config.llm.base_url);
    println!("   Fast model:  {}", config.llm.fast_model);
    println!("   Smart model: {}", config.llm.smart_model);
    println!("   Workspace:   {}", config.workspace_root().display());
    println!("   Continuous:  {}", config.interaction.continuous_mode);
    Ok(())
}

/// Print the effective configuration. The API key is never serialized.
pub fn show() -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    config.api_key = None;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains(".ironloop"));
    }

    #[test]
    fn default_config_warns_about_missing_goals() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-test".into());
        assert_eq!(warnings(&config), vec!["No goals set under [ai]"]);
    }

    #[test]
    fn unbounded_continuous_mode_is_flagged() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-test".into());
        config.ai.goals = vec!["Tidy up".into()];
        config.interaction.continuous_mode = true;
        assert_eq!(warnings(&config).len(), 1);

        config.interaction.continuous_limit = 10;
        assert!(warnings(&config).is_empty());
    }
}
