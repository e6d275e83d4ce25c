//! Calculate k-mer signatures from sequence data.

use log::debug;
use rayon::prelude::*;
use std::collections::HashSet;

use crate::errors::Result;
use crate::kmers::{nkmers, scan_kmers, KmerIndex, KmerSpec};
use crate::progress::{CancellationToken, ProgressMonitor};
use crate::seq::SequenceFile;
use crate::sigs::KmerSignature;

/// Largest `4^k` for which the dense bitset accumulator is used (`k <= 11`,
/// 512 KiB of bits). Above this the hash-set accumulator behaves better
/// asymptotically.
const DENSE_MAX_NKMERS: u128 = 1 << 22;

/// Tracks the set of k-mer indices found while scanning sequences.
///
/// Adding the same index twice has no effect on the output. Consumed with
/// [`KmerAccumulator::into_signature`], which emits a sorted unique signature.
pub enum KmerAccumulator {
    /// Dense bitset over all `4^k` indices.
    Bits { words: Vec<u64> },
    /// Hash set of observed indices.
    Set(HashSet<u64>),
}

impl KmerAccumulator {
    /// Select the accumulator variant appropriate for `k`.
    pub fn new(k: u8) -> KmerAccumulator {
        if nkmers(k) <= DENSE_MAX_NKMERS {
            KmerAccumulator::bits(k)
        } else {
            KmerAccumulator::set()
        }
    }

    /// Dense bitset accumulator, regardless of `k`. `4^k` must fit in memory.
    pub fn bits(k: u8) -> KmerAccumulator {
        let nbits = nkmers(k) as usize;
        KmerAccumulator::Bits {
            words: vec![0u64; nbits.div_ceil(64)],
        }
    }

    /// Hash-set accumulator, regardless of `k`.
    pub fn set() -> KmerAccumulator {
        KmerAccumulator::Set(HashSet::new())
    }

    /// Record one k-mer index. O(1).
    #[inline]
    pub fn add(&mut self, index: u64) {
        match self {
            KmerAccumulator::Bits { words } => {
                words[(index / 64) as usize] |= 1u64 << (index % 64);
            }
            KmerAccumulator::Set(set) => {
                set.insert(index);
            }
        }
    }

    /// Number of distinct indices accumulated so far.
    pub fn len(&self) -> usize {
        match self {
            KmerAccumulator::Bits { words } => {
                words.iter().map(|w| w.count_ones() as usize).sum()
            }
            KmerAccumulator::Set(set) => set.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            KmerAccumulator::Bits { words } => words.iter().all(|&w| w == 0),
            KmerAccumulator::Set(set) => set.is_empty(),
        }
    }

    /// Emit the accumulated set as a sorted, unique signature.
    pub fn into_signature<T: KmerIndex>(self) -> KmerSignature<T> {
        match self {
            KmerAccumulator::Bits { words } => {
                let mut sig = Vec::new();
                for (w, &word) in words.iter().enumerate() {
                    let mut bits = word;
                    while bits != 0 {
                        let b = bits.trailing_zeros();
                        sig.push(T::from_u64((w as u64) * 64 + u64::from(b)));
                        bits &= bits - 1;
                    }
                }
                sig
            }
            KmerAccumulator::Set(set) => {
                let mut sig: Vec<T> = set.into_iter().map(T::from_u64).collect();
                sig.sort_unstable();
                sig
            }
        }
    }
}

/// Calculate the k-mer signature of one or more DNA sequences.
///
/// Sequences are scanned independently; k-mers never straddle sequence
/// boundaries. Invalid characters are not matched, lower-case is fine.
pub fn calc_signature<'a, T, I>(kspec: &KmerSpec, seqs: I) -> KmerSignature<T>
where
    T: KmerIndex,
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut acc = KmerAccumulator::new(kspec.k());
    for seq in seqs {
        scan_kmers(kspec, seq, &mut acc);
    }
    acc.into_signature()
}

/// Parse a sequence file and calculate the signature of all its records
/// combined.
pub fn calc_file_signature<T: KmerIndex>(
    kspec: &KmerSpec,
    file: &SequenceFile,
) -> Result<KmerSignature<T>> {
    let mut acc = KmerAccumulator::new(kspec.k());
    let mut reader = file.parse()?;
    while let Some(record) = reader.next() {
        let record = record?;
        scan_kmers(kspec, &record.seq(), &mut acc);
    }
    Ok(acc.into_signature())
}

/// Parse and calculate signatures for multiple sequence files in parallel.
///
/// Files are distributed over the rayon worker pool; results are collected
/// by index so output order always matches input order. The cancellation
/// token is checked before each file is parsed.
pub fn calc_file_signatures<T: KmerIndex>(
    kspec: &KmerSpec,
    files: &[SequenceFile],
    progress: &dyn ProgressMonitor,
    cancel: &CancellationToken,
) -> Result<Vec<KmerSignature<T>>> {
    debug!("calculating signatures for {} files", files.len());
    files
        .par_iter()
        .map(|file| {
            cancel.check()?;
            let sig = calc_file_signature(kspec, file)?;
            progress.advance(1);
            Ok(sig)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;
    use crate::seq::{revcomp, NUCLEOTIDES};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::io::Write;

    fn spec_k8() -> KmerSpec {
        KmerSpec::new(8, "ATGAC").expect("valid spec")
    }

    fn random_seq(len: usize, seed: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..len)
            .map(|_| NUCLEOTIDES[rng.random_range(0..4)])
            .collect()
    }

    fn assert_valid_signature<T: KmerIndex>(sig: &[T], kspec: &KmerSpec) {
        assert!(
            sig.windows(2).all(|w| w[0] < w[1]),
            "signature must be strictly ascending"
        );
        assert!(sig
            .iter()
            .all(|&v| u128::from(v.to_u64()) < kspec.nkmers()));
    }

    #[test]
    fn test_accumulator_idempotent() {
        for mut acc in [KmerAccumulator::bits(8), KmerAccumulator::set()] {
            acc.add(7);
            acc.add(7);
            acc.add(3);
            assert_eq!(acc.len(), 2);
            let sig: Vec<u16> = acc.into_signature();
            assert_eq!(sig, vec![3, 7]);
        }
    }

    #[test]
    fn test_accumulator_variants_agree() {
        let seq = random_seq(20_000, 7);
        let kspec = spec_k8();

        let mut bits = KmerAccumulator::bits(kspec.k());
        let mut set = KmerAccumulator::set();
        crate::kmers::scan_kmers(&kspec, &seq, &mut bits);
        crate::kmers::scan_kmers(&kspec, &seq, &mut set);

        let from_bits: Vec<u16> = bits.into_signature();
        let from_set: Vec<u16> = set.into_signature();
        assert!(!from_bits.is_empty());
        assert_eq!(from_bits, from_set);
    }

    #[test]
    fn test_accumulator_selection_by_k() {
        assert!(matches!(
            KmerAccumulator::new(11),
            KmerAccumulator::Bits { .. }
        ));
        assert!(matches!(KmerAccumulator::new(12), KmerAccumulator::Set(_)));
    }

    #[test]
    fn test_signature_ascending_and_bounded() {
        let kspec = spec_k8();
        let seq = random_seq(50_000, 1);
        let sig: Vec<u16> = calc_signature(&kspec, [seq.as_slice()]);
        assert!(!sig.is_empty());
        assert_valid_signature(&sig, &kspec);
    }

    #[test]
    fn test_empty_and_short_input() {
        let kspec = spec_k8();
        let empty: Vec<u16> = calc_signature(&kspec, [b"".as_slice()]);
        assert!(empty.is_empty());
        // Shorter than prefix + k
        let short: Vec<u16> = calc_signature(&kspec, [b"ATGACAAA".as_slice()]);
        assert!(short.is_empty());
    }

    #[test]
    fn test_doubled_sequence_equals_single() {
        let kspec = spec_k8();
        let s = b"ATGACAAAAAAAATTTT";
        let mut doubled = s.to_vec();
        doubled.extend_from_slice(s);

        let single: Vec<u16> = calc_signature(&kspec, [s.as_slice()]);
        let both: Vec<u16> = calc_signature(&kspec, [doubled.as_slice()]);
        assert!(!single.is_empty());
        assert_eq!(single, both);
    }

    #[test]
    fn test_strand_symmetry() {
        let kspec = spec_k8();
        let seq = random_seq(10_000, 42);
        let fwd: Vec<u16> = calc_signature(&kspec, [seq.as_slice()]);
        let rev: Vec<u16> = calc_signature(&kspec, [revcomp(&seq).as_slice()]);
        assert!(!fwd.is_empty());
        assert_eq!(fwd, rev);
    }

    #[test]
    fn test_case_invariance() {
        let kspec = spec_k8();
        let seq = random_seq(10_000, 3);
        let lower = seq.to_ascii_lowercase();
        let upper_sig: Vec<u16> = calc_signature(&kspec, [seq.as_slice()]);
        let lower_sig: Vec<u16> = calc_signature(&kspec, [lower.as_slice()]);
        assert_eq!(upper_sig, lower_sig);
    }

    #[test]
    fn test_concatenation_is_union() {
        // When both parts exceed total_len, the signature of the
        // concatenation equals the union plus any k-mers straddling the
        // join; scanning the parts separately gives exactly the union.
        let kspec = spec_k8();
        let s1 = random_seq(5_000, 10);
        let s2 = random_seq(5_000, 11);

        let sep: Vec<u16> = calc_signature(&kspec, [s1.as_slice(), s2.as_slice()]);

        let sig1: Vec<u16> = calc_signature(&kspec, [s1.as_slice()]);
        let sig2: Vec<u16> = calc_signature(&kspec, [s2.as_slice()]);
        let mut union: Vec<u16> = sig1;
        union.extend(sig2);
        union.sort_unstable();
        union.dedup();

        assert_eq!(sep, union);
    }

    #[test]
    fn test_concatenated_sequence_adds_only_straddling_kmers() {
        let kspec = spec_k8();
        let s1 = random_seq(5_000, 20);
        let s2 = random_seq(5_000, 21);
        let mut cat = s1.clone();
        cat.extend_from_slice(&s2);

        let cat_sig: Vec<u16> = calc_signature(&kspec, [cat.as_slice()]);
        let union: Vec<u16> = calc_signature(&kspec, [s1.as_slice(), s2.as_slice()]);

        // The union is always contained in the concatenation's signature.
        assert!(union.iter().all(|v| cat_sig.binary_search(v).is_ok()));

        // Any extra indices must come from k-mers straddling the join.
        let t = kspec.total_len();
        let window = &cat[s1.len() + 1 - t..s1.len() + t - 1];
        let window_sig: Vec<u16> = calc_signature(&kspec, [window]);
        for v in &cat_sig {
            if union.binary_search(v).is_err() {
                assert!(window_sig.binary_search(v).is_ok());
            }
        }
    }

    #[test]
    fn test_calc_file_signatures_order_and_content() {
        let kspec = spec_k8();
        let dir = tempfile::tempdir().expect("tempdir");
        let mut files = Vec::new();
        let mut expected: Vec<Vec<u16>> = Vec::new();

        for i in 0..6u64 {
            let seq = random_seq(3_000, 100 + i);
            let path = dir.path().join(format!("genome{i}.fasta"));
            let mut f = std::fs::File::create(&path).expect("create fasta");
            writeln!(f, ">genome{i}").expect("write");
            f.write_all(&seq).expect("write");
            writeln!(f).expect("write");
            files.push(SequenceFile::new(&path));
            expected.push(calc_signature(&kspec, [seq.as_slice()]));
        }

        let sigs: Vec<Vec<u16>> =
            calc_file_signatures(&kspec, &files, &NullProgress, &CancellationToken::new())
                .expect("signatures");
        assert_eq!(sigs, expected);
    }

    #[test]
    fn test_calc_file_signatures_cancelled() {
        let kspec = spec_k8();
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<Vec<Vec<u16>>> =
            calc_file_signatures(&kspec, &[], &NullProgress, &token);
        // No files: nothing to cancel.
        assert!(result.is_ok());

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("g.fasta");
        std::fs::write(&path, ">g\nATGACAAAAAAAATTTT\n").expect("write fasta");
        let files = vec![SequenceFile::new(&path)];
        let result: Result<Vec<Vec<u16>>> =
            calc_file_signatures(&kspec, &files, &NullProgress, &token);
        assert!(matches!(result, Err(crate::errors::GambitError::Cancelled)));
    }
}
