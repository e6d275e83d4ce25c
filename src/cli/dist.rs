//! The `dist` subcommand: distance matrix between query and reference
//! genomes.

use std::path::PathBuf;

use clap::Args;
use log::info;

use crate::cli::common::{
    self, check_one_selector, file_labels, kspec_from_params, progress_bar,
    resolve_genome_files,
};
use crate::errors::{GambitError, Result};
use crate::kmers::{KmerIndex, KmerSpec};
use crate::metric::{jaccard_dist_matrix, jaccard_dist_pairwise, DistanceOpts};
use crate::progress::{CancellationToken, ProgressMonitor};
use crate::results::dump_dmat_csv;
use crate::seq::SequenceFile;
use crate::sigs::{calc_file_signatures, load_signatures, SignatureArray, SignaturesFile};

#[derive(Args, Debug)]
pub struct DistArgs {
    /// Query genome (may be used multiple times).
    #[arg(short = 'q', value_name = "FILE")]
    pub q: Vec<PathBuf>,

    /// File containing paths to query genomes, one per line.
    #[arg(long = "ql", value_name = "LISTFILE")]
    pub ql: Option<PathBuf>,

    /// Parent directory of files in --ql.
    #[arg(long = "qdir", default_value = ".", value_name = "DIR")]
    pub qdir: PathBuf,

    /// Query signature file.
    #[arg(long = "qs", value_name = "FILE")]
    pub qs: Option<PathBuf>,

    /// Reference genome (may be used multiple times).
    #[arg(short = 'r', value_name = "FILE")]
    pub r: Vec<PathBuf>,

    /// File containing paths to reference genomes, one per line.
    #[arg(long = "rl", value_name = "LISTFILE")]
    pub rl: Option<PathBuf>,

    /// Parent directory of files in --rl.
    #[arg(long = "rdir", default_value = ".", value_name = "DIR")]
    pub rdir: PathBuf,

    /// Reference signature file.
    #[arg(long = "rs", value_name = "FILE")]
    pub rs: Option<PathBuf>,

    /// Calculate a square distance matrix using query signatures only.
    #[arg(short = 's', long = "square")]
    pub square: bool,

    /// Use reference signatures from the database.
    #[arg(short = 'd', long = "use-db")]
    pub use_db: bool,

    /// Number of nucleotides after the k-mer prefix.
    #[arg(short = 'k', value_name = "K")]
    pub k: Option<u8>,

    /// K-mer prefix to search for (ACGT only).
    #[arg(long = "prefix", value_name = "PREFIX")]
    pub prefix: Option<String>,

    /// Output file.
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: PathBuf,

    /// Show progress meters.
    #[arg(long)]
    pub progress: bool,

    /// Number of worker threads.
    #[arg(short = 'c', long = "cores", value_name = "N")]
    pub cores: Option<usize>,
}

/// One side (query or reference) of the distance calculation.
enum Side {
    Files(Vec<SequenceFile>),
    Sigs(SignaturesFile),
}

impl Side {
    fn kmerspec(&self) -> Option<&KmerSpec> {
        match self {
            Side::Files(_) => None,
            Side::Sigs(sigs) => Some(sigs.kmerspec()),
        }
    }

    fn ids(&self, what: &str) -> Vec<String> {
        match self {
            Side::Files(files) => file_labels(files, what),
            Side::Sigs(sigs) => sigs.ids().iter().map(|id| id.to_string()).collect(),
        }
    }
}

/// Check a signature file's spec against one established earlier.
fn check_kspec(expected: &KmerSpec, actual: &KmerSpec, what: &str) -> Result<()> {
    if expected != actual {
        return Err(GambitError::InvalidInput(format!(
            "k-mer search parameters of {what} signatures ({actual}) do not match \
             those established by other options ({expected})"
        )));
    }
    Ok(())
}

fn side_signatures<T: KmerIndex>(
    side: &Side,
    kspec: &KmerSpec,
    progress: &dyn ProgressMonitor,
    cancel: &CancellationToken,
) -> Result<Vec<Vec<T>>> {
    match side {
        Side::Files(files) => calc_file_signatures(kspec, files, progress, cancel),
        Side::Sigs(sigs) => sigs.load_all_converted(),
    }
}

pub fn run(ctx: &common::CliContext, args: DistArgs) -> Result<()> {
    check_one_selector(&[
        ("-q", !args.q.is_empty()),
        ("--ql", args.ql.is_some()),
        ("--qs", args.qs.is_some()),
    ])?;
    check_one_selector(&[
        ("-r", !args.r.is_empty()),
        ("--rl", args.rl.is_some()),
        ("--rs", args.rs.is_some()),
        ("-d/--use-db", args.use_db),
        ("-s/--square", args.square),
    ])?;

    common::init_worker_pool(args.cores);
    let cancel = CancellationToken::new();

    let queries = if let Some(qs) = &args.qs {
        Side::Sigs(load_signatures(qs)?)
    } else {
        Side::Files(resolve_genome_files(&args.q, args.ql.as_deref(), &args.qdir)?)
    };

    let refs = if let Some(rs) = &args.rs {
        Some(Side::Sigs(load_signatures(rs)?))
    } else if args.use_db {
        Some(Side::Sigs(ctx.load_db_signatures()?))
    } else if args.square {
        None
    } else {
        Some(Side::Files(resolve_genome_files(
            &args.r,
            args.rl.as_deref(),
            &args.rdir,
        )?))
    };

    // Establish the k-mer spec: explicit options win, then signature files,
    // then the standard default. Mismatches between sources are an error.
    let mut kspec = kspec_from_params(args.k, args.prefix.as_deref())?;
    for (side, what) in [(Some(&queries), "query"), (refs.as_ref(), "reference")] {
        let Some(side) = side else { continue };
        if let Some(side_spec) = side.kmerspec() {
            match &kspec {
                Some(spec) => check_kspec(spec, side_spec, what)?,
                None => kspec = Some(side_spec.clone()),
            }
        }
    }
    let kspec = kspec.unwrap_or_else(KmerSpec::default_spec);
    info!("using k-mer search parameters {kspec}");

    let query_ids = queries.ids("query");
    let ref_ids = match &refs {
        Some(side) => side.ids("reference"),
        None => query_ids.clone(),
    };

    let dmat = crate::with_index_type!(kspec.index_width(), T, {
        let parse_bar = progress_bar(
            args.progress,
            query_ids.len() as u64,
            "Calculating query signatures",
        );
        let query_sigs: Vec<Vec<T>> =
            side_signatures(&queries, &kspec, parse_bar.as_ref(), &cancel)?;
        drop(parse_bar);

        let dist_bar = progress_bar(
            args.progress,
            (query_ids.len() * ref_ids.len()) as u64,
            "Calculating distances",
        );
        let opts = DistanceOpts {
            chunksize: None,
            progress: dist_bar.as_ref(),
            cancel: &cancel,
        };

        match &refs {
            None => {
                let arr = SignatureArray::from_signatures(&query_sigs, kspec.clone());
                jaccard_dist_pairwise(&arr, &opts)?
            }
            Some(side) => {
                let ref_parse_bar = progress_bar(
                    args.progress && matches!(side, Side::Files(_)),
                    ref_ids.len() as u64,
                    "Calculating reference signatures",
                );
                let ref_sigs: Vec<Vec<T>> =
                    side_signatures(side, &kspec, ref_parse_bar.as_ref(), &cancel)?;
                drop(ref_parse_bar);
                let arr = SignatureArray::from_signatures(&ref_sigs, kspec.clone());
                jaccard_dist_matrix(&query_sigs, &arr, None, &opts)?
            }
        }
    });

    let mut out = common::output_writer(Some(&args.output))?;
    dump_dmat_csv(out.as_mut(), &dmat, &query_ids, &ref_ids)
}
