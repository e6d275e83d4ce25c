//! Shared CLI plumbing: database context, list files, selector checks and
//! progress bars.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use log::{debug, warn};

use crate::db::{locate_db_files, ReferenceDatabase};
use crate::errors::{GambitError, Result};
use crate::kmers::KmerSpec;
use crate::progress::{NullProgress, ProgressMonitor};
use crate::seq::SequenceFile;
use crate::sigs::{load_signatures, SignaturesFile};

/// Context shared by all subcommands, holding the database directory option.
pub struct CliContext {
    db_path: Option<PathBuf>,
}

impl CliContext {
    pub fn new(db_path: Option<PathBuf>) -> CliContext {
        CliContext { db_path }
    }

    /// Locate the database files, requiring `--db` (or `GAMBIT_DB_PATH`) to
    /// be set.
    pub fn db_files(&self) -> Result<(PathBuf, PathBuf)> {
        let dir = self.db_path.as_ref().ok_or_else(|| {
            GambitError::InvalidInput(
                "must supply path to database directory with --db or GAMBIT_DB_PATH".into(),
            )
        })?;
        locate_db_files(dir)
    }

    /// Load the full reference database.
    pub fn load_database(&self) -> Result<ReferenceDatabase> {
        let (genomes_file, signatures_file) = self.db_files()?;
        ReferenceDatabase::load(genomes_file, signatures_file)
    }

    /// Load only the database's signature file.
    pub fn load_db_signatures(&self) -> Result<SignaturesFile> {
        let (_, signatures_file) = self.db_files()?;
        load_signatures(signatures_file)
    }
}

/// Check that exactly one option in a mutually exclusive group was given.
pub fn check_one_selector(options: &[(&str, bool)]) -> Result<()> {
    let given = options.iter().filter(|(_, set)| *set).count();
    if given == 1 {
        return Ok(());
    }
    let names = options.iter().map(|(name, _)| *name).join(", ");
    Err(GambitError::InvalidInput(format!(
        "exactly one of [{names}] must be given"
    )))
}

/// Read a file containing one path per line; relative paths are resolved
/// against `dir`. Blank lines are skipped.
pub fn read_list_file(path: &Path, dir: &Path) -> Result<Vec<PathBuf>> {
    let file = std::fs::File::open(path)?;
    let mut paths = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let p = PathBuf::from(trimmed);
        paths.push(if p.is_absolute() { p } else { dir.join(p) });
    }
    Ok(paths)
}

/// Resolve a genome file selector: explicit paths or a list file.
pub fn resolve_genome_files(
    files: &[PathBuf],
    listfile: Option<&Path>,
    listdir: &Path,
) -> Result<Vec<SequenceFile>> {
    let paths = match listfile {
        Some(lf) => read_list_file(lf, listdir)?,
        None => files.to_vec(),
    };
    Ok(SequenceFile::from_paths(&paths))
}

/// Default labels for sequence files (their file names), with a warning when
/// any label occurs more than once.
pub fn file_labels(files: &[SequenceFile], what: &str) -> Vec<String> {
    let labels: Vec<String> = files.iter().map(|f| f.label()).collect();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for label in &labels {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }
    let dups: Vec<&str> = counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(label, _)| label)
        .sorted()
        .collect();
    if !dups.is_empty() {
        warn!(
            "the following {what} file IDs are present more than once: {}",
            dups.join(", ")
        );
    }
    labels
}

/// Resolve the `-k`/`--prefix` option pair: both, or neither.
pub fn kspec_from_params(k: Option<u8>, prefix: Option<&str>) -> Result<Option<KmerSpec>> {
    match (k, prefix) {
        (Some(k), Some(prefix)) => Ok(Some(KmerSpec::new(k, prefix)?)),
        (None, None) => Ok(None),
        _ => Err(GambitError::InvalidInput(
            "the -k and --prefix options must be given together".into(),
        )),
    }
}

/// Configure the global rayon pool. Later calls with a different size are
/// ignored (the pool can only be built once per process).
pub fn init_worker_pool(cores: Option<usize>) {
    if let Some(cores) = cores {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(cores)
            .build_global()
        {
            debug!("worker pool already initialized: {e}");
        }
    }
}

/// Terminal progress bar adapter.
pub struct BarProgress(ProgressBar);

impl ProgressMonitor for BarProgress {
    fn advance(&self, n: u64) {
        self.0.inc(n);
    }
}

impl Drop for BarProgress {
    fn drop(&mut self) {
        self.0.finish_and_clear();
    }
}

/// A progress monitor for `len` units of work, visible only when `enabled`.
pub fn progress_bar(enabled: bool, len: u64, message: &str) -> Box<dyn ProgressMonitor> {
    if !enabled {
        return Box::new(NullProgress);
    }
    let bar = ProgressBar::new(len).with_message(message.to_owned());
    if let Ok(style) =
        ProgressStyle::with_template("{msg} [{bar:30}] {pos}/{len} ({eta})")
    {
        bar.set_style(style);
    }
    Box::new(BarProgress(bar))
}

/// Open the output target: a file path, or stdout when omitted.
pub fn output_writer(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => Ok(Box::new(std::fs::File::create(path)?)),
        None => Ok(Box::new(std::io::stdout())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_one_selector() {
        assert!(check_one_selector(&[("a", true), ("b", false)]).is_ok());
        assert!(check_one_selector(&[("a", false), ("b", false)]).is_err());
        assert!(check_one_selector(&[("a", true), ("b", true)]).is_err());
    }

    #[test]
    fn test_kspec_from_params() {
        assert_eq!(kspec_from_params(None, None).expect("ok"), None);
        let spec = kspec_from_params(Some(11), Some("ATGAC")).expect("ok");
        assert_eq!(spec, Some(KmerSpec::new(11, "ATGAC").expect("valid spec")));
        assert!(kspec_from_params(Some(11), None).is_err());
        assert!(kspec_from_params(None, Some("ATGAC")).is_err());
    }

    #[test]
    fn test_read_list_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let list = dir.path().join("genomes.txt");
        std::fs::write(&list, "a.fasta\n\n/abs/b.fasta\n  c.fasta  \n").expect("write");

        let paths = read_list_file(&list, Path::new("/parent")).expect("read");
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/parent/a.fasta"),
                PathBuf::from("/abs/b.fasta"),
                PathBuf::from("/parent/c.fasta"),
            ]
        );
    }

    #[test]
    fn test_missing_db_path() {
        let ctx = CliContext::new(None);
        let err = ctx.db_files().expect_err("must fail");
        assert!(err.is_user_error());
    }
}
