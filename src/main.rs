mod decoder;
mod error;
mod formulation;
mod lp;
mod models;
mod neos;
mod planner;
mod report;
mod roster;
mod rotation;
#[cfg(test)]
mod testing;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use models::Config;
use neos::NeosClient;
use planner::AssignmentPlanner;
use report::SampleKind;
use rotation::RotationPlanner;

fn cli() -> Command {
    Command::new("saass-scheduler")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Builds assignment and group rotation models and solves them on NEOS")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml")
                .global(true),
        )
        .arg(
            Arg::new("email")
                .long("email")
                .value_name("ADDRESS")
                .help("Contact email sent with NEOS jobs (overrides the config)")
                .global(true),
        )
        .subcommand(
            Command::new("assign")
                .about("Assign each student one job code from their ranked preferences")
                .arg(
                    Arg::new("roster")
                        .short('r')
                        .long("roster")
                        .value_name("CSV")
                        .help("Student Name column followed by job codes in preference order")
                        .required(true),
                )
                .arg(
                    Arg::new("slots")
                        .short('s')
                        .long("slots")
                        .value_name("CSV")
                        .help("Job Code and Capacity columns; derived from the roster if omitted"),
                ),
        )
        .subcommand(
            Command::new("rotate")
                .about("Split the cohort into balanced groups for each course in sequence")
                .arg(
                    Arg::new("roster")
                        .short('r')
                        .long("roster")
                        .value_name("CSV")
                        .help("Student Name and AFSC columns")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("sample")
                .about("Write an example roster")
                .arg(
                    Arg::new("kind")
                        .long("kind")
                        .value_parser(["assignment", "rotation"])
                        .default_value("rotation"),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .default_value("sample_roster.csv"),
                ),
        )
        .subcommand(Command::new("ping").about("Check that the NEOS server is reachable"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(cli().get_matches()).await {
        error::print_error(&err);
        std::process::exit(1);
    }
}

async fn run(matches: ArgMatches) -> Result<()> {
    if let Some(("sample", sub)) = matches.subcommand() {
        return run_sample(sub);
    }

    let Some(config) = load_config(&matches)? else {
        return Ok(());
    };

    match matches.subcommand() {
        Some(("assign", sub)) => run_assign(&config, sub).await,
        Some(("rotate", sub)) => run_rotate(&config, sub).await,
        Some(("ping", _)) => run_ping(&config).await,
        Some((other, _)) => anyhow::bail!("unknown command: {}", other),
        None => Ok(()),
    }
}

/// Load the config, or write a default one and stop unless an email was
/// given on the command line.
fn load_config(matches: &ArgMatches) -> Result<Option<Config>> {
    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");
    let email = matches.get_one::<String>("email");

    let mut config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("reading configuration {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(config_file)?;
        if email.is_none() {
            println!(
                "⚠️  Please edit {} and set your email (NEOS requires one), then run again.",
                config_file
            );
            return Ok(None);
        }
        default_config
    };

    if let Some(email) = email {
        config.email = email.clone();
    }
    Ok(Some(config))
}

fn prepare_output(config: &Config) -> Result<&str> {
    let output_dir = config.output_dir();
    fs::create_dir_all(output_dir)?;
    report::clean_output_directory(output_dir)?;
    Ok(output_dir)
}

async fn run_assign(config: &Config, matches: &ArgMatches) -> Result<()> {
    let roster_path = matches
        .get_one::<String>("roster")
        .context("--roster is required")?;

    println!("📂 Reading roster: {}", roster_path);
    let students = roster::read_students_file(Path::new(roster_path))
        .with_context(|| format!("reading {}", roster_path))?;
    println!("   ✅ Found {} students", students.len());

    let slots = match matches.get_one::<String>("slots") {
        Some(slots_path) => {
            println!("📂 Reading job slots: {}", slots_path);
            roster::read_slots_file(Path::new(slots_path))
                .with_context(|| format!("reading {}", slots_path))?
        }
        None => {
            let slots = roster::derive_slots(&students, config.assignment.default_capacity);
            println!("   🔄 Derived {} job slots from the roster", slots.len());
            slots
        }
    };

    let email = config.require_email()?;
    let client = NeosClient::new(&config.neos, email)?;

    println!(
        "🚀 Solving on NEOS ({} / {}), this can take a few minutes...",
        config.neos.solver, config.neos.category
    );
    let outcome = AssignmentPlanner::new(&client, &config.assignment)
        .plan(&students, &slots)
        .await?;

    let output_dir = prepare_output(config)?;
    report::write_assignment_reports(&outcome, output_dir)?;
    report::print_assignment_summary(&outcome);

    println!("\n✅ Assignment complete!");
    println!("📂 Results: {}", output_dir);
    Ok(())
}

async fn run_rotate(config: &Config, matches: &ArgMatches) -> Result<()> {
    let roster_path = matches
        .get_one::<String>("roster")
        .context("--roster is required")?;

    println!("📂 Reading cohort: {}", roster_path);
    let members = roster::read_cohort_file(Path::new(roster_path))
        .with_context(|| format!("reading {}", roster_path))?;
    println!("   ✅ Found {} students", members.len());
    println!(
        "🎯 {} courses, {} groups each, at most {} per AFSC in a group",
        config.rotation.courses.len(),
        config.rotation.groups,
        config.rotation.max_per_code
    );

    let email = config.require_email()?;
    let client = NeosClient::new(&config.neos, email)?;

    println!("🚀 Solving each course on NEOS in turn...");
    let outcome = RotationPlanner::new(&client, &config.rotation)
        .run(&members)
        .await?;

    let output_dir = prepare_output(config)?;
    report::write_rotation_reports(&outcome, output_dir)?;
    report::print_rotation_summary(&outcome);

    println!("\n✅ Rotation complete!");
    println!("📂 Results: {}", output_dir);
    Ok(())
}

async fn run_ping(config: &Config) -> Result<()> {
    let client = NeosClient::new(&config.neos, config.email.trim())?;
    let reply = client.ping().await?;
    println!("✅ {}: {}", config.neos.url, reply.trim());
    Ok(())
}

fn run_sample(matches: &ArgMatches) -> Result<()> {
    let kind = matches
        .get_one::<String>("kind")
        .and_then(|kind| SampleKind::parse(kind))
        .unwrap_or(SampleKind::Rotation);
    let output = matches
        .get_one::<String>("output")
        .map(String::as_str)
        .unwrap_or("sample_roster.csv");

    report::write_sample_roster(kind, Path::new(output))?;
    println!("📝 Wrote sample {:?} roster: {}", kind, output);
    Ok(())
}
