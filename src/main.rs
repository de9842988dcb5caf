use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lockstep::config::LockstepConfig;
use lockstep::logging::{self, LogFormat};

mod cmd;

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(version, about = "Reproduce transaction isolation anomalies deterministically")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the config file (defaults to <project-dir>/lockstep.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format. Overrides lockstep.toml setting.
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the scenarios that can be run
    List,
    /// Run a scenario and report what each actor observed
    Run {
        /// Scenario name: dirty-read, non-repeatable-read, phantom-read, lost-update
        scenario: String,

        /// Isolation level: read-uncommitted, read-committed, repeatable-read, serializable
        #[arg(short, long)]
        isolation: Option<String>,

        /// Run the scenario this many times and check the interleaving never changes
        #[arg(long, default_value = "1")]
        repeat: u32,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,

        /// Seconds an actor may wait for its turn (0 waits forever)
        #[arg(long)]
        phase_timeout: Option<u64>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default lockstep.toml file
    Init,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Everything but `config init` needs a config file that exists and parses.
    let resolve = || -> Result<LockstepConfig> {
        let config = LockstepConfig::resolve(&project_dir, cli.config.as_deref(), cli.verbose)?;
        let format = cli.log_format.unwrap_or(config.toml.logging.format);
        logging::init(&config.toml.logging.level, cli.verbose, format);
        Ok(config)
    };

    match &cli.command {
        Commands::List => {
            resolve()?;
            cmd::cmd_list()?
        }
        Commands::Run {
            scenario,
            isolation,
            repeat,
            json,
            phase_timeout,
        } => cmd::cmd_run(
            &resolve()?,
            scenario,
            isolation.as_deref(),
            *repeat,
            *json,
            *phase_timeout,
        )?,
        Commands::Config {
            command: None | Some(ConfigCommands::Show),
        } => cmd::cmd_config_show(&resolve()?)?,
        Commands::Config {
            command: Some(ConfigCommands::Validate),
        } => cmd::cmd_config_validate(&resolve()?)?,
        Commands::Config {
            command: Some(ConfigCommands::Init),
        } => cmd::cmd_config_init(&project_dir, cli.config.as_deref())?,
    }

    Ok(())
}
