//! Working with DNA sequence data.
//!
//! All sequence data in this crate is handled as ASCII-encoded nucleotide
//! bytes. The order of [`NUCLEOTIDES`] is significant: it defines how integer
//! indices are assigned to k-mer sequences.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use needletail::parser::FastxReader;

use crate::errors::{GambitError, Result};

/// The four DNA nucleotide codes, upper case, in index order.
pub const NUCLEOTIDES: &[u8; 4] = b"ACGT";

/// Numeric code of an upper-case nucleotide byte (`A=0, C=1, G=2, T=3`),
/// or `None` for any other byte.
#[inline]
pub fn nuc_code(nuc: u8) -> Option<u64> {
    match nuc {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// Complement of a single upper-case nucleotide byte.
///
/// Bytes other than `ACGT` are passed through unchanged; they remain invalid
/// and will disqualify any k-mer containing them.
#[inline]
pub fn complement(nuc: u8) -> u8 {
    match nuc {
        b'A' => b'T',
        b'C' => b'G',
        b'G' => b'C',
        b'T' => b'A',
        other => other,
    }
}

/// Reverse complement of a nucleotide sequence.
pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// Check that a sequence contains only upper-case nucleotide codes.
pub fn validate_dna_seq_bytes(seq: &[u8]) -> Result<()> {
    for (i, &nuc) in seq.iter().enumerate() {
        if !NUCLEOTIDES.contains(&nuc) {
            return Err(GambitError::InvalidInput(format!(
                "invalid nucleotide at position {i}: {:?}",
                nuc as char
            )));
        }
    }
    Ok(())
}

/// Upper-case a sequence only if it contains lower-case nucleotide codes.
///
/// Sequences are usually already upper case, in which case the input is
/// borrowed unchanged.
pub fn upper_if_needed(seq: &[u8]) -> Cow<'_, [u8]> {
    if seq.iter().any(|b| b"acgt".contains(b)) {
        Cow::Owned(seq.to_ascii_uppercase())
    } else {
        Cow::Borrowed(seq)
    }
}

/// A FASTA sequence file on disk.
///
/// Compression is detected automatically from the file's magic bytes when
/// parsed (gzip, `1F 8B`). Only sequence data is consumed; record headers are
/// ignored by signature calculation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFile {
    pub path: PathBuf,
}

impl SequenceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        SequenceFile { path: path.into() }
    }

    /// Wrap a list of paths.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Vec<SequenceFile> {
        paths.iter().map(|p| SequenceFile::new(p.as_ref())).collect()
    }

    /// File name component, used as the default label/ID for the file.
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Open the file and return a lazy FASTA/FASTQ record reader.
    pub fn parse(&self) -> Result<Box<dyn FastxReader>> {
        Ok(needletail::parse_fastx_file(&self.path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nuc_code_order() {
        for (i, &nuc) in NUCLEOTIDES.iter().enumerate() {
            assert_eq!(nuc_code(nuc), Some(i as u64));
        }
        assert_eq!(nuc_code(b'N'), None);
        assert_eq!(nuc_code(b'a'), None);
    }

    #[test]
    fn test_revcomp() {
        assert_eq!(revcomp(b"ACGT"), b"ACGT".to_vec());
        assert_eq!(revcomp(b"AAAC"), b"GTTT".to_vec());
        assert_eq!(revcomp(b""), Vec::<u8>::new());
        // Invalid bytes pass through in place
        assert_eq!(revcomp(b"ANT"), b"ANT".to_vec());
    }

    #[test]
    fn test_revcomp_involution() {
        let seq = b"ATGACGGCGTTAGCA";
        assert_eq!(revcomp(&revcomp(seq)), seq.to_vec());
    }

    #[test]
    fn test_validate_dna_seq_bytes() {
        assert!(validate_dna_seq_bytes(b"ACGT").is_ok());
        assert!(validate_dna_seq_bytes(b"").is_ok());
        assert!(validate_dna_seq_bytes(b"ACNT").is_err());
        assert!(validate_dna_seq_bytes(b"acgt").is_err());
    }

    #[test]
    fn test_upper_if_needed() {
        assert!(matches!(upper_if_needed(b"ACGT"), Cow::Borrowed(_)));
        // Non-nucleotide lower-case bytes alone do not force a copy
        assert!(matches!(upper_if_needed(b"ACNT"), Cow::Borrowed(_)));
        let upper = upper_if_needed(b"AcgT");
        assert_eq!(upper.as_ref(), b"ACGT");
        assert!(matches!(upper, Cow::Owned(_)));
    }

    #[test]
    fn test_sequence_file_label() {
        let f = SequenceFile::new("/data/genomes/sample1.fasta.gz");
        assert_eq!(f.label(), "sample1.fasta.gz");
    }
}
