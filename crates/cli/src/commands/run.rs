//! `ironloop run`: Run an agent with the interactive console.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use ironloop_agent::{Agent, InterruptOutcome, Interrupts, StdinConsole};
use ironloop_config::AppConfig;
use ironloop_core::plugin::PluginBus;
use ironloop_providers::ModelGateway;
use ironloop_security::Workspace;
use ironloop_telemetry::BudgetMeter;
use tracing::{info, warn};

/// Overrides applied on top of `config.toml` before the loop starts.
#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Run without asking for authorization (dangerous)
    #[arg(short, long)]
    pub continuous: bool,

    /// Stop continuous mode after this many cycles
    #[arg(short = 'l', long, value_name = "CYCLES")]
    pub continuous_limit: Option<u64>,

    /// Spending ceiling in dollars (0 = unlimited)
    #[arg(long, value_name = "DOLLARS")]
    pub budget: Option<f64>,

    /// Workspace directory the agent may touch
    #[arg(short, long, value_name = "DIR")]
    pub workspace: Option<PathBuf>,

    /// Pre-approve this many actions
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub next_actions: Option<u32>,

    /// Agent name
    #[arg(long)]
    pub ai_name: Option<String>,

    /// Agent role
    #[arg(long)]
    pub ai_role: Option<String>,

    /// A goal for the agent (repeatable, replaces configured goals)
    #[arg(short, long = "goal", value_name = "GOAL")]
    pub goals: Vec<String>,
}

impl RunArgs {
    /// Fold the flags into `config`.
    pub fn apply(&self, config: &mut AppConfig) {
        if self.continuous {
            config.interaction.continuous_mode = true;
        }
        if let Some(limit) = self.continuous_limit {
            config.interaction.continuous_limit = limit;
        }
        if let Some(budget) = self.budget {
            config.budget.total_budget = budget;
        }
        if let Some(workspace) = &self.workspace {
            config.workspace.path = Some(workspace.clone());
        }
        if let Some(count) = self.next_actions {
            config.interaction.next_action_count = count;
        }
        if let Some(name) = &self.ai_name {
            config.ai.name = name.clone();
        }
        if let Some(role) = &self.ai_role {
            config.ai.role = role.clone();
        }
        if !self.goals.is_empty() {
            config.ai.goals = self.goals.clone();
        }
    }
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    let config = Arc::new(config);

    let root = config.workspace_root();
    std::fs::create_dir_all(&root)
        .with_context(|| format!("Failed to create workspace at {}", root.display()))?;
    let workspace = Workspace::new(&root, config.workspace.restrict_to_workspace)
        .with_context(|| format!("Failed to open workspace at {}", root.display()))?;

    let provider = ironloop_providers::build_from_config(&config)?;
    let meter = Arc::new(BudgetMeter::from_config(&config));
    let plugins = PluginBus::from_candidates(Vec::new(), &config.plugins);
    let gateway = ModelGateway::new(provider, meter.clone(), &config).with_plugins(Arc::new(plugins));
    let registry = ironloop_tools::default_registry();

    print_banner(&config, &root);
    if config.ai.goals.is_empty() {
        warn!("No goals configured; pass --goal or set [ai].goals in config.toml");
    }
    if config.interaction.continuous_mode {
        warn!("Continuous mode is not recommended. It may run forever or take actions you would not authorise.");
    }

    let interrupts = Interrupts::new(
        config.interaction.next_action_count,
        config.interaction.continuous_mode,
    );
    spawn_interrupt_handler(interrupts.clone());

    let mut agent = Agent::new(
        config.clone(),
        Arc::new(gateway),
        Arc::new(registry),
        Arc::new(workspace),
        Arc::new(StdinConsole::new()),
    )
    .with_interrupts(interrupts);

    let reason = agent.run().await;

    let usage = meter.snapshot();
    info!(
        reason = %reason,
        cycles = agent.cycle_count(),
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_cost = usage.total_cost,
        "Agent finished"
    );
    println!();
    println!("  Stopped:   {reason}");
    println!("  Cycles:    {}", agent.cycle_count());
    println!("  Spent:     ${:.3}", usage.total_cost);
    println!();
    Ok(())
}

/// Ctrl+C first drops back to asking for authorization; a second one exits.
fn spawn_interrupt_handler(interrupts: Interrupts) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupts.on_interrupt() {
                InterruptOutcome::Paused => {
                    eprintln!("\n  Interrupt received. The next action will need your authorization.");
                }
                InterruptOutcome::Terminate => {
                    eprintln!("\n  Exiting...");
                    std::process::exit(130);
                }
            }
        }
    });
}

fn print_banner(config: &AppConfig, root: &std::path::Path) {
    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║              ironloop: Agent Run             ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Name:      {}", config.ai.name);
    println!("  Role:      {}", config.ai.role);
    for (i, goal) in config.ai.goals.iter().enumerate() {
        println!("  Goal {}:    {goal}", i + 1);
    }
    println!("  Model:     {}", config.llm.fast_model);
    println!("  Workspace: {}", root.display());
    if config.budget.total_budget > 0.0 {
        println!("  Budget:    ${:.3}", config.budget.total_budget);
    }
    println!();
    println!(
        "  Enter '{}' to authorise a command, '{} -N' to run N commands, '{}' to ask for self feedback,",
        config.interaction.authorise_key, config.interaction.authorise_key, config.interaction.feedback_key
    );
    println!(
        "  '{}' to exit, or anything else to send feedback.",
        config.interaction.exit_key
    );
    println!();
}
