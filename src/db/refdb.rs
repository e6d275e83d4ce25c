//! Locating and assembling a complete reference database.
//!
//! A database directory contains exactly one SQLite genome file (`.gdb` or
//! `.db`) and one signature file (`.gs` or `.h5`), directly under the
//! directory. The signature file's `id_attr` metadata names the genome
//! attribute its IDs join against.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::info;

use crate::db::models::{AnnotatedGenome, ReferenceGenomeSet, Taxonomy};
use crate::db::sqlite::load_taxonomy_db;
use crate::errors::{GambitError, Result};
use crate::sigs::{load_signatures, IdValue, SignaturesFile};

/// Genome attributes which may serve as signature join keys.
pub const GENOME_ID_ATTRS: [&str; 4] = ["key", "genbank_acc", "refseq_acc", "ncbi_id"];

fn find_single_file(dir: &Path, extensions: &[&str], desc: &str) -> Result<PathBuf> {
    let mut matches = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if extensions.contains(&ext) {
                matches.push(path);
            }
        }
    }
    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(GambitError::IncompatibleDatabase(format!(
            "no {desc} files found in directory {}",
            dir.display()
        ))),
        _ => Err(GambitError::IncompatibleDatabase(format!(
            "multiple {desc} files found in directory {}",
            dir.display()
        ))),
    }
}

/// Locate the genome database and signature files in a directory.
///
/// Files are located by extension; subdirectories are not searched and
/// multiple candidates for either role are an error.
pub fn locate_db_files(dir: impl AsRef<Path>) -> Result<(PathBuf, PathBuf)> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(GambitError::IncompatibleDatabase(format!(
            "database path {} is not a directory",
            dir.display()
        )));
    }
    let genomes_file = find_single_file(dir, &["gdb", "db"], "genome database (.gdb or .db)")?;
    let signatures_file = find_single_file(dir, &["gs", "h5"], "signature (.gs or .h5)")?;
    Ok((genomes_file, signatures_file))
}

/// Match genomes to signature ID values, tolerating signatures for genomes
/// not present in the set.
///
/// Returns indices into `genomes` and the matching indices into `ids`, both
/// in `ids` order. Every genome must carry a value for `id_attr`.
pub fn genomes_by_id_subset(
    genomes: &[AnnotatedGenome],
    id_attr: &str,
    ids: &[IdValue],
) -> Result<(Vec<usize>, Vec<usize>)> {
    if !GENOME_ID_ATTRS.contains(&id_attr) {
        return Err(GambitError::IncompatibleDatabase(format!(
            "genome ID attribute must be one of {}, got {id_attr:?}",
            GENOME_ID_ATTRS.join(", ")
        )));
    }

    let mut by_id: HashMap<IdValue, usize> = HashMap::with_capacity(genomes.len());
    let mut missing = 0usize;
    for (i, genome) in genomes.iter().enumerate() {
        match genome.id_value(id_attr) {
            Some(value) => {
                by_id.insert(value, i);
            }
            None => missing += 1,
        }
    }
    if missing > 0 {
        return Err(GambitError::IncompatibleDatabase(format!(
            "{missing} genomes missing value for ID attribute {id_attr:?}"
        )));
    }

    let mut genome_indices = Vec::new();
    let mut sig_indices = Vec::new();
    for (sig_i, id) in ids.iter().enumerate() {
        if let Some(&genome_i) = by_id.get(id) {
            genome_indices.push(genome_i);
            sig_indices.push(sig_i);
        }
    }
    Ok((genome_indices, sig_indices))
}

/// A complete reference database: genome set, taxonomy, annotated genomes
/// and their signatures. All that is needed at runtime to run queries.
///
/// `genomes[i]` corresponds to signature `sig_indices[i]` in `signatures`.
/// The signature file handle is owned here and released when the database is
/// dropped.
pub struct ReferenceDatabase {
    pub genomeset: ReferenceGenomeSet,
    pub taxonomy: Taxonomy,
    pub genomes: Vec<AnnotatedGenome>,
    pub signatures: SignaturesFile,
    pub sig_indices: Vec<usize>,
}

impl ReferenceDatabase {
    /// Assemble a database from already-loaded parts, validating that the
    /// signatures cover every genome in the set.
    pub fn new(
        genomeset: ReferenceGenomeSet,
        taxonomy: Taxonomy,
        genomes: Vec<AnnotatedGenome>,
        signatures: SignaturesFile,
    ) -> Result<ReferenceDatabase> {
        let id_attr = signatures.meta().id_attr.clone().ok_or_else(|| {
            GambitError::IncompatibleDatabase(
                "signature file metadata does not define id_attr".into(),
            )
        })?;

        let (genome_indices, sig_indices) =
            genomes_by_id_subset(&genomes, &id_attr, signatures.ids())?;

        if genome_indices.len() != genomes.len() {
            let missing = genomes.len() - genome_indices.len();
            return Err(GambitError::IncompatibleDatabase(format!(
                "{missing} of {} genomes not matched to signature IDs; \
                 is the id_attr attribute of the signature metadata correct?",
                genomes.len()
            )));
        }

        let genomes = genome_indices
            .into_iter()
            .map(|i| genomes[i].clone())
            .collect();

        Ok(ReferenceDatabase {
            genomeset,
            taxonomy,
            genomes,
            signatures,
            sig_indices,
        })
    }

    /// Load a database given explicit paths to its two files.
    pub fn load(
        genomes_file: impl AsRef<Path>,
        signatures_file: impl AsRef<Path>,
    ) -> Result<ReferenceDatabase> {
        let (genomeset, taxonomy, genomes) = load_taxonomy_db(genomes_file.as_ref())?;
        let signatures = load_signatures(signatures_file.as_ref())?;
        Self::new(genomeset, taxonomy, genomes, signatures)
    }

    /// Locate database files in a directory and load them.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<ReferenceDatabase> {
        let (genomes_file, signatures_file) = locate_db_files(dir)?;
        info!(
            "loading reference database: {} + {}",
            genomes_file.display(),
            signatures_file.display()
        );
        Self::load(genomes_file, signatures_file)
    }

    /// Index of the genome with the given key, if present.
    pub fn genome_index_by_key(&self, key: &str) -> Option<usize> {
        self.genomes.iter().position(|g| g.key == key)
    }
}
