//! Command-line interface.

pub mod common;
pub mod dist;
pub mod query;
pub mod signatures;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::errors::Result;

/// Taxonomic identification of microbial genomes from k-mer signatures.
#[derive(Parser, Debug)]
#[command(name = "gambit", version, about, long_about = None)]
pub struct Cli {
    /// Directory containing the reference database files.
    #[arg(
        long = "db",
        global = true,
        env = "GAMBIT_DB_PATH",
        value_name = "DIR"
    )]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Predict taxonomy of microbial samples from genome sequences.
    Query(query::QueryArgs),
    /// Calculate distances between a set of query genomes and a set of
    /// reference genomes.
    Dist(dist::DistArgs),
    /// Create and inspect signature files.
    #[command(subcommand)]
    Signatures(signatures::SignaturesCmd),
}

/// Dispatch a parsed command line.
pub fn run(cli: Cli) -> Result<()> {
    let ctx = common::CliContext::new(cli.db);
    match cli.command {
        Commands::Query(args) => query::run(&ctx, args),
        Commands::Dist(args) => dist::run(&ctx, args),
        Commands::Signatures(cmd) => signatures::run(&ctx, cmd),
    }
}
