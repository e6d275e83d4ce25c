//! Run queries against a reference database to predict taxonomy of genome
//! sequences.
//!
//! The pipeline resolves each input to a signature (parsing FASTA files in a
//! worker pool, or loading a pre-computed signature file), computes the
//! distance matrix against the reference signatures in chunks, then
//! classifies each query row and attaches the user-facing report taxon.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hdf5::H5Type;
use log::info;
use serde::{Deserialize, Serialize};

use crate::classify::{classify, ClassifierResult, GenomeMatch};
use crate::db::models::TaxonId;
use crate::db::ReferenceDatabase;
use crate::errors::{GambitError, Result};
use crate::kmers::KmerIndex;
use crate::metric::{jaccard_dist_matrix, DistanceOpts};
use crate::progress::{CancellationToken, ProgressMonitor};
use crate::seq::SequenceFile;
use crate::sigs::{calc_file_signatures, Hdf5Signatures, KmerSignature, SignaturesFile};

/// Parameters for running a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParams {
    /// Reconcile matches to all reference genomes instead of just the
    /// closest one.
    pub classify_strict: bool,
    /// Number of reference signatures processed at a time; `None` disables
    /// chunking.
    pub chunksize: Option<usize>,
    /// Number of closest genomes to report per query. Does not affect
    /// classification.
    pub report_closest: usize,
}

impl Default for QueryParams {
    fn default() -> Self {
        QueryParams {
            classify_strict: false,
            chunksize: Some(1000),
            report_closest: 10,
        }
    }
}

/// Description of a single query input, used for reporting only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    /// Unique label, usually the file name or signature ID.
    pub label: String,
    /// Source file, when the query came from one.
    pub path: Option<PathBuf>,
}

impl QueryInput {
    pub fn from_label(label: impl Into<String>) -> QueryInput {
        QueryInput {
            label: label.into(),
            path: None,
        }
    }

    pub fn from_file(file: &SequenceFile) -> QueryInput {
        QueryInput {
            label: file.label(),
            path: Some(file.path.clone()),
        }
    }
}

/// Result for a single query sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResultItem {
    pub input: QueryInput,
    pub classifier_result: ClassifierResult,
    /// Final prediction surfaced to the user: the first reportable ancestor
    /// of the predicted taxon.
    pub report_taxon: Option<TaxonId>,
    /// Closest reference genomes by distance, ascending.
    pub closest_genomes: Vec<GenomeMatch>,
}

/// Results for a set of queries plus information on the database and
/// parameters used.
#[derive(Debug, Clone)]
pub struct QueryResults {
    pub items: Vec<QueryResultItem>,
    pub params: QueryParams,
    pub genomeset: crate::db::models::ReferenceGenomeSet,
    pub signaturesmeta: crate::sigs::SignaturesMeta,
    pub gambit_version: String,
    pub timestamp: DateTime<Utc>,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Query a database with signatures derived by parsing genome sequence
/// files.
///
/// `labels` overrides the per-file labels (defaults to file names). File
/// parsing runs on the rayon pool; ordering of results always matches the
/// input order.
pub fn query_parse(
    db: &ReferenceDatabase,
    files: &[SequenceFile],
    params: &QueryParams,
    labels: Option<&[String]>,
    parse_progress: &dyn ProgressMonitor,
    dist_progress: &dyn ProgressMonitor,
    cancel: &CancellationToken,
) -> Result<QueryResults> {
    let inputs: Vec<QueryInput> = match labels {
        Some(labels) => {
            if labels.len() != files.len() {
                return Err(GambitError::InvalidInput(format!(
                    "got {} labels for {} files",
                    labels.len(),
                    files.len()
                )));
            }
            labels
                .iter()
                .zip(files)
                .map(|(label, file)| QueryInput {
                    label: label.clone(),
                    path: Some(file.path.clone()),
                })
                .collect()
        }
        None => files.iter().map(QueryInput::from_file).collect(),
    };

    crate::with_signatures_file!(&db.signatures, refs, {
        info!("calculating signatures for {} query files", files.len());
        let queries =
            calc_file_signatures(refs.kmerspec(), files, parse_progress, cancel)?;
        run_query(db, refs, queries, inputs, params, dist_progress, cancel)
    })
}

/// Query a database with pre-computed signatures loaded from a file.
///
/// The file's k-mer spec must match the database's; its IDs become the query
/// labels.
pub fn query_sigs(
    db: &ReferenceDatabase,
    sigs: &SignaturesFile,
    params: &QueryParams,
    dist_progress: &dyn ProgressMonitor,
    cancel: &CancellationToken,
) -> Result<QueryResults> {
    if sigs.kmerspec() != db.signatures.kmerspec() {
        return Err(GambitError::InvalidInput(format!(
            "k-mer search parameters of query signatures ({}) do not match \
             those of the reference database ({})",
            sigs.kmerspec(),
            db.signatures.kmerspec()
        )));
    }

    let inputs: Vec<QueryInput> = sigs
        .ids()
        .iter()
        .map(|id| QueryInput::from_label(id.to_string()))
        .collect();

    crate::with_signatures_file!(&db.signatures, refs, {
        let queries = sigs.load_all_converted()?;
        run_query(db, refs, queries, inputs, params, dist_progress, cancel)
    })
}

fn run_query<T: KmerIndex + H5Type>(
    db: &ReferenceDatabase,
    refs: &Hdf5Signatures<T>,
    queries: Vec<KmerSignature<T>>,
    inputs: Vec<QueryInput>,
    params: &QueryParams,
    progress: &dyn ProgressMonitor,
    cancel: &CancellationToken,
) -> Result<QueryResults> {
    if queries.is_empty() {
        return Err(GambitError::InvalidInput(
            "must supply at least one query".into(),
        ));
    }
    debug_assert_eq!(queries.len(), inputs.len());

    info!(
        "computing distances: {} queries x {} references",
        queries.len(),
        db.genomes.len()
    );
    let opts = DistanceOpts {
        chunksize: params.chunksize,
        progress,
        cancel,
    };
    let dmat = jaccard_dist_matrix(&queries, refs, Some(&db.sig_indices), &opts)?;

    let mut items = Vec::with_capacity(inputs.len());
    for (i, input) in inputs.into_iter().enumerate() {
        let dists: Vec<f32> = dmat.row(i).to_vec();
        let classifier_result = classify(
            &db.taxonomy,
            &db.genomes,
            &dists,
            params.classify_strict,
        )?;
        let report_taxon = db
            .taxonomy
            .reportable_taxon(classifier_result.predicted_taxon);
        let closest_genomes = top_matches(db, &dists, params.report_closest);

        items.push(QueryResultItem {
            input,
            classifier_result,
            report_taxon,
            closest_genomes,
        });
    }

    Ok(QueryResults {
        items,
        params: params.clone(),
        genomeset: db.genomeset.clone(),
        signaturesmeta: db.signatures.meta().clone(),
        gambit_version: crate::VERSION.to_owned(),
        timestamp: Utc::now(),
        extra: serde_json::Map::new(),
    })
}

/// The `n` closest reference genomes by distance, ascending.
fn top_matches(db: &ReferenceDatabase, dists: &[f32], n: usize) -> Vec<GenomeMatch> {
    let mut order: Vec<usize> = (0..dists.len()).collect();
    order.sort_by(|&a, &b| dists[a].total_cmp(&dists[b]));
    order
        .into_iter()
        .take(n)
        .map(|i| GenomeMatch::new(&db.taxonomy, &db.genomes, i, dists[i]))
        .collect()
}
