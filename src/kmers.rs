//! Core types and functions for searching for and working with k-mers.
//!
//! A "k-mer" here is always a *prefix-anchored* k-mer: an occurrence of a
//! fixed nucleotide prefix followed by `k` variable nucleotides. Only the
//! trailing `k` bases are encoded into an integer index; the prefix acts as a
//! sampling anchor. Searching covers both strands: an occurrence of the
//! reverse complement of the prefix marks a k-mer on the reverse strand.

use serde::{Deserialize, Serialize};

use crate::errors::{GambitError, Result};
use crate::seq::{nuc_code, revcomp, upper_if_needed, validate_dna_seq_bytes};

/// Number of possible distinct k-mers for a given value of `k`.
///
/// Returns `u128` because `4^32` does not fit in 64 bits.
#[inline]
pub fn nkmers(k: u8) -> u128 {
    1u128 << (2 * u32::from(k))
}

/// Width of the smallest unsigned integer type able to store k-mer indices
/// for a given `k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexWidth {
    /// `k <= 4`. Unreachable through [`KmerSpec`], which requires `k >= 5`,
    /// but part of the width table for completeness.
    U8,
    /// `k <= 8`
    U16,
    /// `k <= 16`
    U32,
    /// `k <= 32`
    U64,
}

impl IndexWidth {
    pub fn from_k(k: u8) -> IndexWidth {
        match k {
            0..=4 => IndexWidth::U8,
            5..=8 => IndexWidth::U16,
            9..=16 => IndexWidth::U32,
            _ => IndexWidth::U64,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            IndexWidth::U8 => 8,
            IndexWidth::U16 => 16,
            IndexWidth::U32 => 32,
            IndexWidth::U64 => 64,
        }
    }
}

/// Element type of a k-mer signature.
///
/// Implemented for `u16`, `u32` and `u64`; signatures are stored in the
/// smallest width that holds `4^k - 1`. Signed storage of the same widths is
/// reinterpreted as unsigned at the file boundary, since indices are always
/// non-negative.
pub trait KmerIndex:
    Copy + Ord + Eq + std::fmt::Debug + std::hash::Hash + Default + Send + Sync + 'static
{
    const WIDTH: IndexWidth;

    /// Narrowing conversion from a raw index.
    ///
    /// Callers must ensure the value fits; the accumulator guarantees this by
    /// only producing indices below `4^k` for a `k` matched to the width.
    fn from_u64(v: u64) -> Self;

    fn to_u64(self) -> u64;
}

impl KmerIndex for u16 {
    const WIDTH: IndexWidth = IndexWidth::U16;

    #[inline]
    fn from_u64(v: u64) -> Self {
        v as u16
    }

    #[inline]
    fn to_u64(self) -> u64 {
        u64::from(self)
    }
}

impl KmerIndex for u32 {
    const WIDTH: IndexWidth = IndexWidth::U32;

    #[inline]
    fn from_u64(v: u64) -> Self {
        v as u32
    }

    #[inline]
    fn to_u64(self) -> u64 {
        u64::from(self)
    }
}

impl KmerIndex for u64 {
    const WIDTH: IndexWidth = IndexWidth::U64;

    #[inline]
    fn from_u64(v: u64) -> Self {
        v
    }

    #[inline]
    fn to_u64(self) -> u64 {
        self
    }
}

/// Run `$body` with `$T` bound to the unsigned element type matching an
/// [`IndexWidth`]. The 8-bit tier is folded into `u16`.
#[macro_export]
macro_rules! with_index_type {
    ($width:expr, $T:ident, $body:expr) => {
        match $width {
            $crate::kmers::IndexWidth::U8 | $crate::kmers::IndexWidth::U16 => {
                type $T = u16;
                $body
            }
            $crate::kmers::IndexWidth::U32 => {
                type $T = u32;
                $body
            }
            $crate::kmers::IndexWidth::U64 => {
                type $T = u64;
                $body
            }
        }
    };
}

/// Convert a k-mer to its integer index.
///
/// Each position contributes `code * 4^(k-1-i)` with `A=0, C=1, G=2, T=3`.
/// Returns `None` if any byte is not an upper-case nucleotide code.
pub fn kmer_to_index(kmer: &[u8]) -> Option<u64> {
    let mut index = 0u64;
    for &nuc in kmer {
        index = (index << 2) | nuc_code(nuc)?;
    }
    Some(index)
}

/// Integer index of a k-mer's reverse complement, without materializing it.
pub fn kmer_to_index_rc(kmer: &[u8]) -> Option<u64> {
    let mut index = 0u64;
    for &nuc in kmer.iter().rev() {
        index = (index << 2) | (3 - nuc_code(nuc)?);
    }
    Some(index)
}

/// Inverse of [`kmer_to_index`]: decode an index back into `k` nucleotides.
pub fn index_to_kmer(index: u64, k: u8) -> Vec<u8> {
    let mut kmer = vec![0u8; usize::from(k)];
    let mut rem = index;
    for out in kmer.iter_mut().rev() {
        *out = NUC_BY_CODE[(rem & 3) as usize];
        rem >>= 2;
    }
    kmer
}

const NUC_BY_CODE: [u8; 4] = *b"ACGT";

#[derive(Serialize, Deserialize)]
struct KmerSpecRepr {
    k: u8,
    prefix: String,
}

/// Parameters for a k-mer search operation.
///
/// `k` is the number of nucleotides *after* the prefix; `prefix` is the
/// constant anchor, stored upper case. Two specs are equal iff `(k, prefix)`
/// match. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "KmerSpecRepr", into = "KmerSpecRepr")]
pub struct KmerSpec {
    k: u8,
    prefix: String,
}

/// Smallest `k` accepted for a search spec.
pub const MIN_K: u8 = 5;

/// Largest `k` accepted; `4^32 - 1` still fits a 64-bit index.
pub const MAX_K: u8 = 32;

/// Smallest accepted prefix length.
pub const MIN_PREFIX_LEN: usize = 2;

impl KmerSpec {
    /// Validate and construct a spec. Lower-case prefix bytes are accepted
    /// and stored upper case.
    pub fn new(k: u8, prefix: &str) -> Result<KmerSpec> {
        if !(MIN_K..=MAX_K).contains(&k) {
            return Err(GambitError::InvalidInput(format!(
                "k must be in range {MIN_K}..={MAX_K}, got {k}"
            )));
        }

        let prefix = prefix.to_ascii_uppercase();
        if prefix.len() < MIN_PREFIX_LEN {
            return Err(GambitError::InvalidInput(format!(
                "prefix must contain at least {MIN_PREFIX_LEN} nucleotides"
            )));
        }
        validate_dna_seq_bytes(prefix.as_bytes())?;

        Ok(KmerSpec { k, prefix })
    }

    /// The default search parameters used by standard reference databases.
    pub fn default_spec() -> KmerSpec {
        KmerSpec {
            k: 11,
            prefix: "ATGAC".to_owned(),
        }
    }

    pub fn k(&self) -> u8 {
        self.k
    }

    pub fn prefix(&self) -> &[u8] {
        self.prefix.as_bytes()
    }

    pub fn prefix_str(&self) -> &str {
        &self.prefix
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix.len()
    }

    /// Prefix length plus `k`.
    pub fn total_len(&self) -> usize {
        self.prefix.len() + usize::from(self.k)
    }

    /// Number of possible k-mers fitting this spec (`4^k`).
    pub fn nkmers(&self) -> u128 {
        nkmers(self.k)
    }

    /// Width of the smallest unsigned integer holding `4^k - 1`.
    pub fn index_width(&self) -> IndexWidth {
        IndexWidth::from_k(self.k)
    }
}

impl std::fmt::Display for KmerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.k, self.prefix)
    }
}

impl TryFrom<KmerSpecRepr> for KmerSpec {
    type Error = GambitError;

    fn try_from(repr: KmerSpecRepr) -> Result<KmerSpec> {
        KmerSpec::new(repr.k, &repr.prefix)
    }
}

impl From<KmerSpec> for KmerSpecRepr {
    fn from(spec: KmerSpec) -> KmerSpecRepr {
        KmerSpecRepr {
            k: spec.k,
            prefix: spec.prefix,
        }
    }
}

/// A single prefix match located in a sequence.
///
/// `pos` is the index of the first prefix nucleotide for forward matches, or
/// of the *last* byte of the reverse-complemented prefix for reverse matches.
/// `index` is the integer index of the owned k-mer, already
/// reverse-complemented for reverse matches, or `None` if the k-mer contained
/// an invalid byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KmerMatch {
    pub pos: usize,
    pub reverse: bool,
    pub index: Option<u64>,
}

impl KmerMatch {
    /// Byte range of the k-mer (without prefix) in the searched sequence.
    pub fn kmer_range(&self, kspec: &KmerSpec) -> std::ops::Range<usize> {
        if self.reverse {
            (self.pos + 1 - kspec.total_len())..(self.pos + 1 - kspec.prefix_len())
        } else {
            (self.pos + kspec.prefix_len())..(self.pos + kspec.total_len())
        }
    }

    /// Byte range of the prefix plus k-mer in the searched sequence.
    pub fn full_range(&self, kspec: &KmerSpec) -> std::ops::Range<usize> {
        if self.reverse {
            (self.pos + 1 - kspec.total_len())..(self.pos + 1)
        } else {
            self.pos..(self.pos + kspec.total_len())
        }
    }
}

/// Yield every start position of `needle` within `haystack[..end]`,
/// beginning the search at `start`. Overlapping occurrences are reported.
fn find_all<'a>(
    haystack: &'a [u8],
    needle: &'a [u8],
    start: usize,
    end: usize,
) -> impl Iterator<Item = usize> + 'a {
    let end = end.min(haystack.len());
    let last_start = if needle.is_empty() || end < needle.len() {
        0
    } else {
        end - needle.len() + 1
    };
    (start..last_start).filter(move |&i| &haystack[i..i + needle.len()] == needle)
}

/// Locate prefix-anchored k-mers on both strands of a DNA sequence.
///
/// The sequence may contain arbitrary bytes; invalid nucleotides are never an
/// error, they simply disqualify the individual k-mers that contain them.
/// Lower-case nucleotides are matched as upper case. Matches are reported in
/// forward-scan order followed by reverse-scan order, and overlapping matches
/// are all included.
pub fn find_kmers(kspec: &KmerSpec, seq: &[u8]) -> Vec<KmerMatch> {
    let haystack = upper_if_needed(seq);
    let haystack = haystack.as_ref();
    let k = usize::from(kspec.k());
    let plen = kspec.prefix_len();
    let mut matches = Vec::new();

    // Forward: the k-mer tail must fit after the prefix.
    let fwd_end = haystack.len().saturating_sub(k);
    for pos in find_all(haystack, kspec.prefix(), 0, fwd_end) {
        let kmer = &haystack[pos + plen..pos + plen + k];
        matches.push(KmerMatch {
            pos,
            reverse: false,
            index: kmer_to_index(kmer),
        });
    }

    // Reverse: the k-mer sits *before* the reverse-complemented prefix.
    let prefix_rc = revcomp(kspec.prefix());
    for loc in find_all(haystack, &prefix_rc, k, haystack.len()) {
        let kmer = &haystack[loc - k..loc];
        matches.push(KmerMatch {
            pos: loc + plen - 1,
            reverse: true,
            index: kmer_to_index_rc(kmer),
        });
    }

    matches
}

/// Scan a sequence and feed all valid k-mer indices into an accumulator.
///
/// Equivalent to [`find_kmers`] but avoids building the match list.
pub fn scan_kmers(kspec: &KmerSpec, seq: &[u8], acc: &mut crate::sigs::KmerAccumulator) {
    for m in find_kmers(kspec, seq) {
        if let Some(index) = m.index {
            acc.add(index);
        }
    }
}
