//! CLI argument parsing for the medroute-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "medroute-worker", about = "MedRoute NEMT route optimisation worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker (default if no subcommand given)
    Serve,
    /// Probe the state backend and provider configuration, print the
    /// report as JSON, and exit
    Health,
}
