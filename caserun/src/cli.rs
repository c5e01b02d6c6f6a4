use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

fn parse_duration(input: &str) -> Result<Duration, String> {
    humantime::parse_duration(input.trim())
        .map_err(|err| format!("invalid duration '{input}' (expected e.g. 10s, 250ms, 1m): {err}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "caserun",
    author,
    version,
    about = "Declarative API and load testing tool",
    long_about = "caserun executes declarative test cases against one or many simulated users.\n\nA case document declares configuration (variables, data-driven parameters, executor shape) and an ordered step list. Under load, virtual users coordinate through named rendezvous checkpoints.",
    after_help = "Examples:\n  caserun run cases/checkout.yaml\n  caserun run cases/checkout.yaml --vus 50 --duration 30s\n  caserun run cases/login.yaml --iterations 1000\n  caserun check cases/checkout.yaml"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a test case document
    #[command(
        long_about = "Run a YAML test case document with the configured number of virtual users.\n\nCLI flags override the executor options embedded in the document."
    )]
    Run(RunArgs),

    /// Validate a case document and print the derived run plan
    Check(CheckArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Path to the YAML case document
    pub case: PathBuf,

    /// Number of concurrent virtual users
    #[arg(long)]
    pub vus: Option<u64>,

    /// Total iterations across all virtual users
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Run duration (e.g. 30s, 5m)
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Path to the YAML case document
    pub case: PathBuf,
}
