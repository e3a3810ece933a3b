//! webpilot - command line entry point.
//!
//! The binary hosts configuration and logging; browser drivers and LLM
//! clients plug into `agent_core::AgentLoopController` from embedding code.

use std::path::PathBuf;

use agent_core::{AgentPlanner, Plan, PlannerConfig, RuleBasedPlanner};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use webpilot_cli::{init_logging, load_config, LoadedConfig};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum OutputFormat {
    Human,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose a task into sub-goals and show the step budget
    Plan {
        /// Natural-language task
        task: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormat,

        /// Upper bound on generated sub-goals
        #[arg(long, default_value_t = 5)]
        max_sub_goals: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective agent configuration
    Show,

    /// Print the path the configuration is read from
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_json)?;
    let loaded = load_config(cli.config.as_deref()).await?;

    let result = match cli.command {
        Commands::Plan {
            task,
            format,
            max_sub_goals,
        } => cmd_plan(&loaded, &task, format, max_sub_goals),
        Commands::Config { action } => cmd_config(&loaded, action),
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_plan(
    loaded: &LoadedConfig,
    task: &str,
    format: OutputFormat,
    max_sub_goals: usize,
) -> Result<()> {
    let planner = RuleBasedPlanner::new(PlannerConfig {
        max_sub_goals,
        ..PlannerConfig::default()
    });
    let plan = planner
        .draft_plan(task)
        .unwrap_or_else(|_| Plan::fallback());

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&plan).context("Failed to serialise plan")?
            );
        }
        OutputFormat::Yaml => {
            print!(
                "{}",
                serde_yaml::to_string(&plan).context("Failed to serialise plan")?
            );
        }
        OutputFormat::Human => print_plan(&plan, loaded.agent.max_steps),
    }
    Ok(())
}

fn print_plan(plan: &Plan, default_budget: u32) {
    let budget = if plan.has_sub_goals() {
        plan.step_budget
    } else {
        default_budget
    };
    println!("Category:    {:?}", plan.category);
    println!("Multi-step:  {}", plan.is_multi_step);
    println!("Step budget: {budget}");
    if plan.sub_goals.is_empty() {
        println!("Sub-goals:   none (single-step task)");
    } else {
        println!("Sub-goals:");
        for goal in &plan.sub_goals {
            println!(
                "  {}. [{}] {} (~{} steps, done when: {})",
                goal.id,
                goal.goal_type.as_str(),
                goal.description,
                goal.estimated_steps,
                goal.completion_criteria
            );
        }
    }
    if let Some(heuristic) = &plan.heuristic {
        println!();
        println!("{}", heuristic.render());
    }
}

fn cmd_config(loaded: &LoadedConfig, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let rendered =
                serde_yaml::to_string(&loaded.agent).context("Failed to serialise config")?;
            let source = if loaded.from_file {
                loaded.path.display().to_string()
            } else {
                "defaults".to_string()
            };
            println!("# source: {source}");
            print!("{rendered}");
        }
        ConfigAction::Path => println!("{}", loaded.path.display()),
    }
    Ok(())
}
