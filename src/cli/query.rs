//! The `query` subcommand: predict taxonomy of query genomes.

use std::path::PathBuf;

use clap::Args;
use log::info;

use crate::cli::common::{
    self, check_one_selector, file_labels, progress_bar, resolve_genome_files,
};
use crate::errors::{GambitError, Result};
use crate::progress::CancellationToken;
use crate::query::{query_parse, query_sigs, QueryParams};
use crate::results::ResultsExporter;
use crate::sigs::load_signatures;

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Query genome files (FASTA, optionally gzip-compressed).
    #[arg(value_name = "GENOMES")]
    pub files: Vec<PathBuf>,

    /// File containing paths to query genomes, one per line.
    #[arg(short = 'l', long = "listfile", value_name = "LISTFILE")]
    pub listfile: Option<PathBuf>,

    /// Parent directory of paths in the list file.
    #[arg(long = "ldir", default_value = ".", value_name = "DIR")]
    pub ldir: PathBuf,

    /// File containing query signatures, to use in place of GENOMES.
    #[arg(short = 's', long = "sigfile", value_name = "FILE")]
    pub sigfile: Option<PathBuf>,

    /// File path to write to. If omitted will write to stdout.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Format to output results in.
    #[arg(
        short = 'f',
        long = "outfmt",
        default_value = "csv",
        value_parser = ["csv", "json", "archive"]
    )]
    pub outfmt: String,

    /// Find all significant reference matches and reconcile them instead of
    /// using only the closest match.
    #[arg(long)]
    pub strict: bool,

    /// Show progress meters.
    #[arg(long)]
    pub progress: bool,

    /// Number of worker threads.
    #[arg(short = 'c', long = "cores", value_name = "N")]
    pub cores: Option<usize>,
}

pub fn run(ctx: &common::CliContext, args: QueryArgs) -> Result<()> {
    check_one_selector(&[
        ("GENOMES", !args.files.is_empty()),
        ("-l/--listfile", args.listfile.is_some()),
        ("-s/--sigfile", args.sigfile.is_some()),
    ])?;

    common::init_worker_pool(args.cores);

    let db = ctx.load_database()?;
    let params = QueryParams {
        classify_strict: args.strict,
        ..QueryParams::default()
    };
    let exporter = ResultsExporter::from_name(&args.outfmt)
        .ok_or_else(|| GambitError::InvalidInput(format!("invalid output format: {}", args.outfmt)))?;
    let cancel = CancellationToken::new();

    let results = if let Some(sigfile) = &args.sigfile {
        let sigs = load_signatures(sigfile)?;
        let dist_bar = progress_bar(
            args.progress,
            (sigs.count() * db.genomes.len()) as u64,
            "Calculating distances",
        );
        query_sigs(&db, &sigs, &params, dist_bar.as_ref(), &cancel)?
    } else {
        let files = resolve_genome_files(&args.files, args.listfile.as_deref(), &args.ldir)?;
        let labels = file_labels(&files, "query");
        let parse_bar = progress_bar(args.progress, files.len() as u64, "Parsing input");
        let dist_bar = progress_bar(
            args.progress,
            (files.len() * db.genomes.len()) as u64,
            "Calculating distances",
        );
        query_parse(
            &db,
            &files,
            &params,
            Some(&labels),
            parse_bar.as_ref(),
            dist_bar.as_ref(),
            &cancel,
        )?
    };

    info!("writing results for {} queries", results.items.len());
    let mut out = common::output_writer(args.output.as_deref())?;
    exporter.export(out.as_mut(), &results, &db)
}
