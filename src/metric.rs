//! The Jaccard index/distance between k-mer sets in sparse coordinate format.
//!
//! The single-pair kernel is a branch-predictable two-pointer merge over two
//! sorted index arrays. The batch form fans a query out against a whole
//! signature collection with rayon, each worker writing a disjoint slice of
//! the output. The matrix driver adds chunked loading so file-backed
//! reference sets never need to be fully resident.

use log::debug;
use ndarray::Array2;
use rayon::prelude::*;

use crate::errors::{GambitError, Result};
use crate::kmers::KmerIndex;
use crate::progress::{CancellationToken, NullProgress, ProgressMonitor};
use crate::sigs::{KmerSignature, SignatureSource, Signatures};

/// Jaccard index of two sorted unique index arrays.
///
/// Defined as 1.0 when both sets are empty.
pub fn jaccard<T: KmerIndex>(a: &[T], b: &[T]) -> f32 {
    let mut i = 0usize;
    let mut j = 0usize;
    let mut intersection = 0usize;

    while i < a.len() && j < b.len() {
        let x = a[i];
        let y = b[j];
        if x == y {
            intersection += 1;
            i += 1;
            j += 1;
        } else if x < y {
            i += 1;
        } else {
            j += 1;
        }
    }

    let union = a.len() + b.len() - intersection;
    if union == 0 {
        1.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Jaccard distance (one minus the Jaccard index).
///
/// Defined as 0.0 when both sets are empty.
pub fn jaccard_dist<T: KmerIndex>(a: &[T], b: &[T]) -> f32 {
    1.0 - jaccard(a, b)
}

/// Jaccard index of two sets in dense bit-vector format.
///
/// Reference implementation used to cross-check the sparse kernel.
pub fn jaccard_bits(bits1: &[bool], bits2: &[bool]) -> f32 {
    let n1 = bits1.iter().filter(|&&b| b).count();
    let n2 = bits2.iter().filter(|&&b| b).count();
    let intersection = bits1
        .iter()
        .zip(bits2.iter())
        .filter(|&(&x, &y)| x && y)
        .count();
    let union = n1 + n2 - intersection;
    if union == 0 {
        1.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Distances from one query signature to every signature in `refs`.
///
/// `out` must have length `refs.count()`. Runs in parallel; each worker owns
/// a disjoint slice of `out`, so no synchronization is needed beyond the
/// final join.
pub fn jaccard_dist_many<T, S>(query: &[T], refs: &S, out: &mut [f32])
where
    T: KmerIndex,
    S: Signatures<T> + ?Sized,
{
    debug_assert_eq!(out.len(), refs.count());
    out.par_iter_mut()
        .enumerate()
        .for_each(|(i, o)| *o = jaccard_dist(query, refs.get(i)));
}

/// Options for the matrix and pairwise drivers.
pub struct DistanceOpts<'a> {
    /// Number of reference signatures materialized at a time. `None` loads
    /// the whole reference set in one chunk.
    pub chunksize: Option<usize>,
    pub progress: &'a dyn ProgressMonitor,
    pub cancel: &'a CancellationToken,
}

impl DistanceOpts<'_> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for DistanceOpts<'_> {
    fn default() -> Self {
        static NULL_PROGRESS: NullProgress = NullProgress;
        static NO_CANCEL: std::sync::OnceLock<CancellationToken> = std::sync::OnceLock::new();
        DistanceOpts {
            chunksize: None,
            progress: &NULL_PROGRESS,
            cancel: NO_CANCEL.get_or_init(CancellationToken::new),
        }
    }
}

fn chunk_ranges(n: usize, size: Option<usize>) -> Vec<std::ops::Range<usize>> {
    match size {
        Some(size) if size > 0 => (0..n)
            .step_by(size)
            .map(|start| start..(start + size).min(n))
            .collect(),
        _ => vec![0..n],
    }
}

/// Distance matrix between query signatures (rows) and reference signatures
/// (columns).
///
/// References are pulled through [`SignatureSource`] in chunks of
/// `opts.chunksize` to bound memory for file-backed sets. `ref_indices`
/// optionally restricts and reorders the columns. The output is identical
/// for any chunk size; each cell is written exactly once. Progress advances
/// by one chunk width per (chunk, query) pair; cancellation is checked
/// between chunks.
pub fn jaccard_dist_matrix<T, S>(
    queries: &[KmerSignature<T>],
    refs: &S,
    ref_indices: Option<&[usize]>,
    opts: &DistanceOpts<'_>,
) -> Result<Array2<f32>>
where
    T: KmerIndex,
    S: SignatureSource<T>,
{
    let nqueries = queries.len();
    let nrefs = match ref_indices {
        Some(indices) => indices.len(),
        None => refs.count(),
    };

    let mut out = vec![0f32; nqueries * nrefs];

    if nqueries == 0 || nrefs == 0 {
        return Ok(Array2::from_shape_vec((nqueries, nrefs), out)
            .expect("output buffer length matches matrix shape"));
    }

    for range in chunk_ranges(nrefs, opts.chunksize) {
        opts.cancel.check()?;

        let chunk_len = range.len();
        debug!("processing reference chunk {}..{}", range.start, range.end);

        let owned_chunk;
        let borrowed_chunk;
        let chunk: &dyn Signatures<T> = match ref_indices {
            Some(indices) => {
                owned_chunk = refs.load_select(&indices[range.clone()])?;
                &owned_chunk
            }
            None => {
                borrowed_chunk = refs.load_range(range.clone())?;
                &borrowed_chunk
            }
        };

        for (query, row) in queries.iter().zip(out.chunks_exact_mut(nrefs)) {
            jaccard_dist_many(query, chunk, &mut row[range.clone()]);
            opts.progress.advance(chunk_len as u64);
        }
    }

    Ok(Array2::from_shape_vec((nqueries, nrefs), out)
        .expect("output buffer length matches matrix shape"))
}

/// Number of distinct unordered pairs of `n` objects.
pub fn num_pairs(n: usize) -> usize {
    n * (n - 1) / 2
}

/// All pairwise distances for a signature collection, as a full square
/// matrix.
///
/// The upper triangle is computed once and mirrored below the diagonal;
/// the diagonal is zero.
pub fn jaccard_dist_pairwise<T, S>(sigs: &S, opts: &DistanceOpts<'_>) -> Result<Array2<f32>>
where
    T: KmerIndex,
    S: Signatures<T> + ?Sized,
{
    let n = sigs.count();
    let mut out = vec![0f32; n * n];

    for i in 0..n.saturating_sub(1) {
        opts.cancel.check()?;
        let row_sig = sigs.get(i);
        let ncol = n - i - 1;

        // Split so the row segment being written and the column cells below
        // the diagonal can be borrowed disjointly.
        let (upper, lower) = out.split_at_mut((i + 1) * n);
        let row = &mut upper[i * n + i + 1..i * n + n];
        row.par_iter_mut()
            .enumerate()
            .for_each(|(off, o)| *o = jaccard_dist(row_sig, sigs.get(i + 1 + off)));

        for (off, &d) in row.iter().enumerate() {
            // Mirror into column i of row i + 1 + off.
            lower[off * n + i] = d;
        }
        opts.progress.advance(ncol as u64);
    }

    Ok(Array2::from_shape_vec((n, n), out).expect("output buffer length matches matrix shape"))
}

/// All pairwise distances in condensed form: one element per unordered pair,
/// row by row, length `n * (n - 1) / 2`.
pub fn jaccard_dist_pairwise_flat<T, S>(sigs: &S, opts: &DistanceOpts<'_>) -> Result<Vec<f32>>
where
    T: KmerIndex,
    S: Signatures<T> + ?Sized,
{
    let n = sigs.count();
    let mut out = vec![0f32; num_pairs(n)];
    let mut next = 0usize;

    for i in 0..n.saturating_sub(1) {
        opts.cancel.check()?;
        let row_sig = sigs.get(i);
        let ncol = n - i - 1;
        let row = &mut out[next..next + ncol];
        row.par_iter_mut()
            .enumerate()
            .for_each(|(off, o)| *o = jaccard_dist(row_sig, sigs.get(i + 1 + off)));
        next += ncol;
        opts.progress.advance(ncol as u64);
    }

    Ok(out)
}

/// Check that all values in a distance row are well formed for
/// classification: none negative, not all NaN.
pub fn validate_dists(dists: &[f32]) -> Result<()> {
    if dists.iter().any(|d| *d < 0.0) {
        return Err(GambitError::InvalidInput(
            "distances must be non-negative".into(),
        ));
    }
    if !dists.is_empty() && dists.iter().all(|d| d.is_nan()) {
        return Err(GambitError::InvalidInput("all distances are NaN".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmers::KmerSpec;
    use crate::sigs::SignatureArray;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_set(rng: &mut StdRng, max: u32, approx_size: usize) -> Vec<u32> {
        let mut v: Vec<u32> = (0..approx_size)
            .map(|_| rng.random_range(0..max))
            .collect();
        v.sort_unstable();
        v.dedup();
        v
    }

    fn test_spec() -> KmerSpec {
        KmerSpec::new(11, "ATGAC").expect("valid spec")
    }

    #[test]
    fn test_empty_sets() {
        assert_eq!(jaccard_dist::<u32>(&[], &[]), 0.0);
        assert_eq!(jaccard_dist::<u32>(&[], &[1, 2, 3]), 1.0);
        assert_eq!(jaccard_dist::<u32>(&[1, 2, 3], &[]), 1.0);
    }

    #[test]
    fn test_identity() {
        let a: Vec<u32> = vec![1, 4, 9, 100];
        assert_eq!(jaccard_dist(&a, &a), 0.0);
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn test_known_values() {
        let a: Vec<u32> = vec![1, 2, 3, 4, 5];
        let b: Vec<u32> = vec![1, 2, 3, 9, 10];
        // Intersection 3, union 7.
        assert_eq!(jaccard(&a, &b), 3.0 / 7.0);
        assert_eq!(jaccard_dist(&a, &b), 1.0 - 3.0 / 7.0);

        let disjoint: Vec<u32> = vec![6, 7, 8];
        assert_eq!(jaccard_dist(&a, &disjoint), 1.0);
    }

    #[test]
    fn test_symmetry_and_range() {
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let a = random_set(&mut rng, 1000, 100);
            let b = random_set(&mut rng, 1000, 100);
            let d1 = jaccard_dist(&a, &b);
            let d2 = jaccard_dist(&b, &a);
            assert_eq!(d1.to_bits(), d2.to_bits(), "symmetry must be bit-exact");
            assert!((0.0..=1.0).contains(&d1));
        }
    }

    #[test]
    fn test_sparse_matches_dense() {
        let mut rng = StdRng::seed_from_u64(9);
        let max = 512u32;
        for _ in 0..20 {
            let a = random_set(&mut rng, max, 100);
            let b = random_set(&mut rng, max, 100);

            let mut bits_a = vec![false; max as usize];
            let mut bits_b = vec![false; max as usize];
            for &v in &a {
                bits_a[v as usize] = true;
            }
            for &v in &b {
                bits_b[v as usize] = true;
            }

            assert_eq!(jaccard(&a, &b), jaccard_bits(&bits_a, &bits_b));
        }
    }

    #[test]
    fn test_many_matches_single() {
        let mut rng = StdRng::seed_from_u64(2);
        let query = random_set(&mut rng, 4000, 300);
        let sigs: Vec<Vec<u32>> = (0..17).map(|_| random_set(&mut rng, 4000, 300)).collect();
        let refs = SignatureArray::from_signatures(&sigs, test_spec());

        let mut out = vec![0f32; sigs.len()];
        jaccard_dist_many(&query, &refs, &mut out);

        for (i, sig) in sigs.iter().enumerate() {
            assert_eq!(out[i].to_bits(), jaccard_dist(&query, sig).to_bits());
        }
    }

    #[test]
    fn test_matrix_matches_single_and_chunksize_invariant() {
        let mut rng = StdRng::seed_from_u64(3);
        let queries: Vec<Vec<u32>> = (0..4).map(|_| random_set(&mut rng, 4000, 200)).collect();
        let sigs: Vec<Vec<u32>> = (0..11).map(|_| random_set(&mut rng, 4000, 200)).collect();
        let refs = SignatureArray::from_signatures(&sigs, test_spec());

        let full = jaccard_dist_matrix(&queries, &refs, None, &DistanceOpts::default())
            .expect("matrix");
        for (i, q) in queries.iter().enumerate() {
            for (j, r) in sigs.iter().enumerate() {
                assert_eq!(full[[i, j]].to_bits(), jaccard_dist(q, r).to_bits());
            }
        }

        for chunksize in [1, 2, 3, 5, 11, 100] {
            let opts = DistanceOpts {
                chunksize: Some(chunksize),
                ..DistanceOpts::default()
            };
            let chunked = jaccard_dist_matrix(&queries, &refs, None, &opts).expect("matrix");
            assert_eq!(chunked, full);
        }
    }

    #[test]
    fn test_matrix_with_ref_indices() {
        let mut rng = StdRng::seed_from_u64(4);
        let queries: Vec<Vec<u32>> = (0..2).map(|_| random_set(&mut rng, 2000, 150)).collect();
        let sigs: Vec<Vec<u32>> = (0..8).map(|_| random_set(&mut rng, 2000, 150)).collect();
        let refs = SignatureArray::from_signatures(&sigs, test_spec());

        let indices = vec![6usize, 0, 3];
        let opts = DistanceOpts {
            chunksize: Some(2),
            ..DistanceOpts::default()
        };
        let dmat = jaccard_dist_matrix(&queries, &refs, Some(&indices), &opts).expect("matrix");
        assert_eq!(dmat.dim(), (2, 3));
        for (i, q) in queries.iter().enumerate() {
            for (col, &j) in indices.iter().enumerate() {
                assert_eq!(dmat[[i, col]].to_bits(), jaccard_dist(q, &sigs[j]).to_bits());
            }
        }
    }

    #[test]
    fn test_pairwise_matches_matrix() {
        let mut rng = StdRng::seed_from_u64(6);
        let sigs: Vec<Vec<u32>> = (0..7).map(|_| random_set(&mut rng, 3000, 200)).collect();
        let arr = SignatureArray::from_signatures(&sigs, test_spec());

        let square = jaccard_dist_pairwise(&arr, &DistanceOpts::default()).expect("pairwise");
        let matrix =
            jaccard_dist_matrix(&sigs, &arr, None, &DistanceOpts::default()).expect("matrix");

        let n = sigs.len();
        for i in 0..n {
            assert_eq!(square[[i, i]], 0.0);
            for j in (i + 1)..n {
                assert_eq!(square[[i, j]].to_bits(), matrix[[i, j]].to_bits());
                assert_eq!(square[[j, i]].to_bits(), square[[i, j]].to_bits());
            }
        }

        let flat = jaccard_dist_pairwise_flat(&arr, &DistanceOpts::default()).expect("flat");
        assert_eq!(flat.len(), num_pairs(n));
        let mut next = 0;
        for i in 0..n {
            for j in (i + 1)..n {
                assert_eq!(flat[next].to_bits(), square[[i, j]].to_bits());
                next += 1;
            }
        }
    }

    #[test]
    fn test_matrix_cancellation() {
        let sigs: Vec<Vec<u32>> = vec![vec![1, 2], vec![3, 4]];
        let refs = SignatureArray::from_signatures(&sigs, test_spec());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let opts = DistanceOpts {
            cancel: &cancel,
            ..DistanceOpts::default()
        };
        let result = jaccard_dist_matrix(&sigs, &refs, None, &opts);
        assert!(matches!(result, Err(GambitError::Cancelled)));
    }

    #[test]
    fn test_validate_dists() {
        assert!(validate_dists(&[0.0, 0.5, 1.0]).is_ok());
        assert!(validate_dists(&[0.0, -0.1]).is_err());
        assert!(validate_dists(&[f32::NAN, f32::NAN]).is_err());
        assert!(validate_dists(&[f32::NAN, 0.3]).is_ok());
    }
}
