//! The `signatures` subcommand group: inspect and create signature files.

use std::io::BufRead;
use std::path::PathBuf;

use clap::{Args, Subcommand};
use log::info;
use serde::Serialize;

use crate::cli::common::{
    self, check_one_selector, kspec_from_params, progress_bar, resolve_genome_files,
};
use crate::errors::{GambitError, Result};
use crate::kmers::KmerSpec;
use crate::progress::CancellationToken;
use crate::sigs::{
    calc_file_signatures, dump_signatures, load_signatures, IdValue, SignatureArray,
    SignaturesFile, SignaturesMeta,
};

#[derive(Subcommand, Debug)]
pub enum SignaturesCmd {
    /// Inspect signature files.
    Info(InfoArgs),
    /// Create k-mer signatures from genome sequences.
    Create(CreateArgs),
}

#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Signature file to inspect.
    #[arg(value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Use signatures from the reference database.
    #[arg(short = 'd', long = "use-db")]
    pub use_db: bool,

    /// Write output in JSON format.
    #[arg(short = 'j', long = "json")]
    pub json: bool,

    /// Prettify JSON output.
    #[arg(short = 'p', long = "pretty")]
    pub pretty: bool,

    /// Write IDs of signatures in file, one per line.
    #[arg(short = 'i', long = "ids")]
    pub ids: bool,
}

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Genome sequence files.
    #[arg(value_name = "GENOMES")]
    pub files: Vec<PathBuf>,

    /// File containing paths to genomes, one per line.
    #[arg(short = 'l', long = "listfile", value_name = "LISTFILE")]
    pub listfile: Option<PathBuf>,

    /// Parent directory of paths in the list file.
    #[arg(long = "ldir", default_value = ".", value_name = "DIR")]
    pub ldir: PathBuf,

    /// File path to write to.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: PathBuf,

    /// Number of nucleotides after the k-mer prefix.
    #[arg(short = 'k', value_name = "K")]
    pub k: Option<u8>,

    /// K-mer prefix to search for (ACGT only).
    #[arg(long = "prefix", value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Use k/prefix from the reference database.
    #[arg(short = 'd', long = "db-params")]
    pub db_params: bool,

    /// JSON file containing metadata to attach.
    #[arg(short = 'm', long = "meta-json", value_name = "FILE")]
    pub meta_file: Option<PathBuf>,

    /// File containing genome IDs (one per line).
    #[arg(short = 'i', long = "ids", value_name = "FILE")]
    pub ids_file: Option<PathBuf>,

    /// Gzip compression level for signature data.
    #[arg(long = "compress", value_name = "LEVEL")]
    pub compress: Option<u8>,

    /// Show progress meter.
    #[arg(long)]
    pub progress: bool,

    /// Number of worker threads.
    #[arg(short = 'c', long = "cores", value_name = "N")]
    pub cores: Option<usize>,
}

pub fn run(ctx: &common::CliContext, cmd: SignaturesCmd) -> Result<()> {
    match cmd {
        SignaturesCmd::Info(args) => info_cmd(ctx, args),
        SignaturesCmd::Create(args) => create_cmd(ctx, args),
    }
}

fn format_none(value: Option<&str>) -> String {
    value.unwrap_or("<none>").to_owned()
}

fn print_table(rows: &[(String, String)], left_pad: &str) {
    let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in rows {
        println!("{left_pad}{key:<width$}  {value}");
    }
}

fn info_cmd(ctx: &common::CliContext, args: InfoArgs) -> Result<()> {
    check_one_selector(&[("FILE", args.file.is_some()), ("-d/--use-db", args.use_db)])?;

    let sigs: SignaturesFile = match &args.file {
        Some(file) => load_signatures(file)?,
        None => ctx.load_db_signatures()?,
    };

    if args.ids {
        if args.json {
            return Err(GambitError::InvalidInput(
                "the -i/--ids and -j/--json options are mutually exclusive".into(),
            ));
        }
        for id in sigs.ids() {
            println!("{id}");
        }
        return Ok(());
    }

    if args.json {
        #[derive(Serialize)]
        struct InfoDoc<'a> {
            count: usize,
            kmerspec: &'a KmerSpec,
            metadata: &'a SignaturesMeta,
        }
        let doc = InfoDoc {
            count: sigs.count(),
            kmerspec: sigs.kmerspec(),
            metadata: sigs.meta(),
        };
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if args.pretty {
            serde_json::to_writer_pretty(&mut out, &doc)?;
        } else {
            serde_json::to_writer(&mut out, &doc)?;
        }
        println!();
        return Ok(());
    }

    let summary = vec![
        ("Count:".to_owned(), sigs.count().to_string()),
        ("k:".to_owned(), sigs.kmerspec().k().to_string()),
        ("Prefix:".to_owned(), sigs.kmerspec().prefix_str().to_owned()),
        ("Data type:".to_owned(), sigs.dtype_name().to_owned()),
    ];
    print_table(&summary, "");

    println!("Metadata:");
    let meta = sigs.meta();
    let rows = vec![
        ("ID:".to_owned(), format_none(meta.id.as_deref())),
        ("Name:".to_owned(), format_none(meta.name.as_deref())),
        ("Version:".to_owned(), format_none(meta.version.as_deref())),
        (
            "Description:".to_owned(),
            format_none(meta.description.as_deref()),
        ),
        (
            "Genome ID attribute:".to_owned(),
            format_none(meta.id_attr.as_deref()),
        ),
        (
            "Has extra:".to_owned(),
            if meta.extra.is_some() { "yes" } else { "no" }.to_owned(),
        ),
    ];
    print_table(&rows, "  ");

    Ok(())
}

fn read_ids_file(path: &PathBuf) -> Result<Vec<IdValue>> {
    let file = std::fs::File::open(path)?;
    let mut ids = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            ids.push(IdValue::Str(trimmed.to_owned()));
        }
    }
    Ok(ids)
}

fn create_cmd(ctx: &common::CliContext, args: CreateArgs) -> Result<()> {
    check_one_selector(&[
        ("GENOMES", !args.files.is_empty()),
        ("-l/--listfile", args.listfile.is_some()),
    ])?;

    common::init_worker_pool(args.cores);

    let files = resolve_genome_files(&args.files, args.listfile.as_deref(), &args.ldir)?;
    if files.is_empty() {
        return Err(GambitError::InvalidInput("no input genomes given".into()));
    }

    let explicit = kspec_from_params(args.k, args.prefix.as_deref())?;
    let kspec = match (explicit, args.db_params) {
        (Some(_), true) => {
            return Err(GambitError::InvalidInput(
                "the -k/--prefix and --db-params options are mutually exclusive".into(),
            ))
        }
        (Some(spec), false) => spec,
        (None, true) => ctx.load_db_signatures()?.kmerspec().clone(),
        (None, false) => {
            return Err(GambitError::InvalidInput(
                "must give values for -k/--prefix or specify --db-params".into(),
            ))
        }
    };

    let meta = match &args.meta_file {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            serde_json::from_reader::<_, SignaturesMeta>(std::io::BufReader::new(file))?
        }
        None => SignaturesMeta::default(),
    };

    let ids = match &args.ids_file {
        Some(path) => {
            let ids = read_ids_file(path)?;
            if ids.len() != files.len() {
                return Err(GambitError::InvalidInput(format!(
                    "number of IDs ({}) does not match number of genomes ({})",
                    ids.len(),
                    files.len()
                )));
            }
            ids
        }
        None => files
            .iter()
            .map(|f| IdValue::Str(f.label()))
            .collect(),
    };

    info!(
        "calculating signatures for {} genomes with k-mer spec {kspec}",
        files.len()
    );
    let cancel = CancellationToken::new();
    let bar = progress_bar(args.progress, files.len() as u64, "Calculating signatures");

    crate::with_index_type!(kspec.index_width(), T, {
        let sigs: Vec<Vec<T>> =
            calc_file_signatures(&kspec, &files, bar.as_ref(), &cancel)?;
        let arr = SignatureArray::from_signatures(&sigs, kspec.clone());
        dump_signatures(&args.output, &arr, &ids, &meta, args.compress)
    })
}
