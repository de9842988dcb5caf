//! Scenario listing and execution: `lockstep list`, `lockstep run`.

use anyhow::{Context, Result, bail};
use std::time::Duration;

use lockstep::config::LockstepConfig;
use lockstep::scenarios::{Anomaly, RunSettings, ScenarioReport};
use lockstep::store::{Isolation, Store};

pub fn cmd_list() -> Result<()> {
    println!();
    println!("{:<22} {:<7} Description", "Scenario", "Phases");
    println!("{:<22} {:<7} -----------", "----------------------", "------");
    for anomaly in Anomaly::ALL {
        println!(
            "{:<22} {:<7} {}",
            anomaly.as_str(),
            anomaly.phase_count(),
            anomaly.description()
        );
    }
    println!();
    Ok(())
}

pub fn cmd_run(
    config: &LockstepConfig,
    scenario: &str,
    isolation: Option<&str>,
    repeat: u32,
    json: bool,
    phase_timeout: Option<u64>,
) -> Result<()> {
    let anomaly: Anomaly = scenario.parse()?;
    let isolation = match isolation {
        Some(level) => level.parse::<Isolation>()?,
        None => config.toml.store.isolation,
    };
    let phase_timeout = match phase_timeout {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.phase_timeout(),
    };
    if repeat == 0 {
        bail!("--repeat must be at least 1");
    }

    let settings = RunSettings {
        isolation,
        phase_timeout,
    };
    let store = Store::open(&config.store_settings()).context("Failed to open store")?;

    let mut reports = Vec::new();
    for run in 1..=repeat {
        let report = anomaly
            .run(&store, &settings)
            .with_context(|| format!("Run {} of {} failed", run, anomaly))?;
        reports.push(report);
    }

    let diverged = reports
        .iter()
        .position(|r| !r.same_interleaving(&reports[0]));

    if json {
        let output = if reports.len() == 1 {
            serde_json::to_string_pretty(&reports[0])?
        } else {
            serde_json::to_string_pretty(&reports)?
        };
        println!("{}", output);
    } else {
        print_report(&reports[0]);
        if repeat > 1 && diverged.is_none() {
            println!(
                "{} identical interleaving across {} runs",
                console::style("✓").green(),
                repeat
            );
            println!();
        }
    }

    if let Some(index) = diverged {
        bail!(
            "Run {} of {} interleaved differently from run 1",
            index + 1,
            anomaly
        );
    }
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    println!();
    println!(
        "{} {} ({})",
        console::style("Scenario:").bold(),
        report.scenario,
        report.isolation
    );
    println!();
    println!("{:<8} {:<12} Observation", "Phase", "Actor");
    println!("{:<8} {:<12} -----------", "--------", "------------");
    for observation in &report.observations {
        println!(
            "{:<8} {:<12} {}",
            observation.phase.as_str(),
            observation.actor,
            observation.note
        );
    }

    if !report.failures.is_empty() {
        println!();
        println!("Captured failures:");
        for failure in &report.failures {
            let tag = if failure.expected {
                console::style("expected").dim()
            } else {
                console::style("unexpected").red()
            };
            println!("  {:<8} {} {}", failure.phase, tag, failure.description);
        }
    }

    println!();
    let observed = if report.anomaly_observed {
        console::style("yes").yellow().bold()
    } else {
        console::style("no").green()
    };
    println!("Anomaly observed: {}", observed);
    println!("No exceptions: {}", report.no_exceptions);
    println!("Duration: {}ms", report.duration.as_millis());
    println!();
}
