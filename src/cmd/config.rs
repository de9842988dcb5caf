//! Configuration view and validation commands: `lockstep config`.

use anyhow::Result;
use std::path::Path;

use lockstep::config::{CONFIG_FILE_NAME, LockstepConfig, LockstepToml};

/// Print the config file contents and the effective values.
pub fn cmd_config_show(config: &LockstepConfig) -> Result<()> {
    println!();
    println!("Lockstep Configuration");
    println!("======================");
    println!();

    if config.config_file.exists() {
        println!("Config file: {}", config.config_file.display());
    } else {
        println!("No {} found at {}", CONFIG_FILE_NAME, config.config_file.display());
        println!("Using default configuration:");
    }
    println!();

    let toml = &config.toml;
    println!("[gate]");
    println!("  phase_timeout_secs = {}", toml.gate.phase_timeout_secs);
    println!();
    println!("[store]");
    println!("  name = \"{}\"", toml.store.name);
    if let Some(path) = &toml.store.path {
        println!("  path = \"{}\"", path.display());
    }
    println!("  isolation = \"{}\"", toml.store.isolation);
    println!();
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  format = \"{}\"", toml.logging.format);
    println!();

    println!("Effective values (with env/CLI overrides):");
    match config.phase_timeout() {
        Some(timeout) => println!("  phase_timeout = {}s", timeout.as_secs()),
        None => println!("  phase_timeout = none"),
    }
    match config.store_settings().path {
        Some(path) => println!("  store = {}", path.display()),
        None => println!("  store = in-memory"),
    }
    println!("  verbose = {}", config.verbose);
    println!();
    Ok(())
}

/// Validate the config file and list any warnings.
pub fn cmd_config_validate(config: &LockstepConfig) -> Result<()> {
    println!();
    println!("Validating configuration...");
    println!();

    if !config.config_file.exists() {
        println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
        println!();
        return Ok(());
    }

    let warnings = config.validate();
    if warnings.is_empty() {
        println!("Configuration is valid.");
    } else {
        println!("Configuration warnings:");
        for warning in warnings {
            println!("  - {}", warning);
        }
    }
    println!();
    Ok(())
}

/// Write a default config file unless one already exists.
pub fn cmd_config_init(project_dir: &Path, config_file: Option<&Path>) -> Result<()> {
    let path = match config_file {
        Some(path) => path.to_path_buf(),
        None => project_dir.join(CONFIG_FILE_NAME),
    };

    if path.exists() {
        println!("{} already exists at {}", CONFIG_FILE_NAME, path.display());
        println!("Delete it first if you want to recreate it.");
        return Ok(());
    }

    LockstepToml::default().save(&path)?;

    println!("Created {} at {}", CONFIG_FILE_NAME, path.display());
    println!();
    println!("You can now customize:");
    println!("  - [gate] phase_timeout_secs");
    println!("  - [store] name, path, isolation");
    println!("  - [logging] level, format");
    println!();
    Ok(())
}
