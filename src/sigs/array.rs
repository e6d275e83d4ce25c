//! Concatenated signature storage and access traits.
//!
//! A [`SignatureArray`] stores many signatures in one contiguous values
//! buffer plus an offsets array, the layout the parallel Jaccard kernel and
//! the file container both work with. Contiguous slicing returns a view over
//! the same buffer; selection by arbitrary indices materializes a new array.

use std::ops::Range;

use crate::errors::{GambitError, Result};
use crate::kmers::{KmerIndex, KmerSpec};
use crate::sigs::KmerSignature;

/// Read access to a collection of sparse k-mer signatures.
pub trait Signatures<T: KmerIndex>: Sync {
    fn count(&self) -> usize;

    /// The `i`-th signature as a sorted index slice.
    fn get(&self, i: usize) -> &[T];

    fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn sizes(&self) -> Vec<usize> {
        (0..self.count()).map(|i| self.get(i).len()).collect()
    }
}

/// Validate a bounds array against a values buffer length.
///
/// Required: `bounds[0] == 0`, non-decreasing, `bounds[last] == values_len`,
/// at least one element.
pub fn validate_bounds(bounds: &[usize], values_len: usize) -> Result<()> {
    let (first, last) = match (bounds.first(), bounds.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return Err(GambitError::Format("bounds array is empty".into())),
    };
    if first != 0 {
        return Err(GambitError::Format("bounds array must start at 0".into()));
    }
    if bounds.windows(2).any(|w| w[1] < w[0]) {
        return Err(GambitError::Format("bounds array must be non-decreasing".into()));
    }
    if last != values_len {
        return Err(GambitError::Format(format!(
            "bounds end ({last}) does not match values length ({values_len})"
        )));
    }
    Ok(())
}

/// A collection of k-mer signatures in a single contiguous buffer.
///
/// Signature `i` occupies `values[bounds[i]..bounds[i + 1]]`. Immutable after
/// construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureArray<T> {
    values: Vec<T>,
    bounds: Vec<usize>,
    kmerspec: KmerSpec,
}

impl<T: KmerIndex> SignatureArray<T> {
    /// Concatenate individual signatures into a single array.
    pub fn from_signatures(signatures: &[KmerSignature<T>], kmerspec: KmerSpec) -> Self {
        let mut bounds = Vec::with_capacity(signatures.len() + 1);
        bounds.push(0);
        let total: usize = signatures.iter().map(|s| s.len()).sum();
        let mut values = Vec::with_capacity(total);
        for sig in signatures {
            values.extend_from_slice(sig);
            bounds.push(values.len());
        }
        SignatureArray {
            values,
            bounds,
            kmerspec,
        }
    }

    /// Build directly from a values buffer and bounds array, validating the
    /// layout invariants.
    pub fn from_parts(values: Vec<T>, bounds: Vec<usize>, kmerspec: KmerSpec) -> Result<Self> {
        validate_bounds(&bounds, values.len())?;
        Ok(SignatureArray {
            values,
            bounds,
            kmerspec,
        })
    }

    pub fn kmerspec(&self) -> &KmerSpec {
        &self.kmerspec
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn bounds(&self) -> &[usize] {
        &self.bounds
    }

    /// View over a contiguous range of signatures; no data is copied.
    pub fn view(&self, range: Range<usize>) -> SignatureArrayView<'_, T> {
        SignatureArrayView {
            values: &self.values,
            bounds: &self.bounds[range.start..range.end + 1],
        }
    }

    /// Materialize a new array containing the signatures at `indices`, in
    /// the given order.
    pub fn select(&self, indices: &[usize]) -> SignatureArray<T> {
        let mut bounds = Vec::with_capacity(indices.len() + 1);
        bounds.push(0);
        let total: usize = indices.iter().map(|&i| self.get(i).len()).sum();
        let mut values = Vec::with_capacity(total);
        for &i in indices {
            values.extend_from_slice(self.get(i));
            bounds.push(values.len());
        }
        SignatureArray {
            values,
            bounds,
            kmerspec: self.kmerspec.clone(),
        }
    }

    /// Materialize the signatures selected by a boolean mask, one flag per
    /// signature.
    pub fn select_mask(&self, mask: &[bool]) -> Result<SignatureArray<T>> {
        if mask.len() != Signatures::count(self) {
            return Err(GambitError::InvalidInput(format!(
                "mask length ({}) does not match signature count ({})",
                mask.len(),
                Signatures::count(self)
            )));
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(i, _)| i)
            .collect();
        Ok(self.select(&indices))
    }

    /// Convert to a different index width. Safe whenever the target width
    /// fits the k-mer spec's index range.
    pub fn convert<U: KmerIndex>(&self) -> SignatureArray<U> {
        SignatureArray {
            values: self.values.iter().map(|&v| U::from_u64(v.to_u64())).collect(),
            bounds: self.bounds.clone(),
            kmerspec: self.kmerspec.clone(),
        }
    }

    /// Extract all signatures as individual vectors.
    pub fn to_signatures(&self) -> Vec<KmerSignature<T>> {
        (0..self.count()).map(|i| self.get(i).to_vec()).collect()
    }
}

impl<T: KmerIndex> Signatures<T> for SignatureArray<T> {
    fn count(&self) -> usize {
        self.bounds.len() - 1
    }

    fn get(&self, i: usize) -> &[T] {
        &self.values[self.bounds[i]..self.bounds[i + 1]]
    }

    fn sizes(&self) -> Vec<usize> {
        self.bounds.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

/// Borrowed view over a contiguous range of a [`SignatureArray`].
///
/// `values` is the full backing buffer; `bounds` is the sub-slice of offsets
/// covering the viewed range, so offsets stay absolute.
#[derive(Debug, Clone, Copy)]
pub struct SignatureArrayView<'a, T> {
    values: &'a [T],
    bounds: &'a [usize],
}

impl<T: KmerIndex> Signatures<T> for SignatureArrayView<'_, T> {
    fn count(&self) -> usize {
        self.bounds.len() - 1
    }

    fn get(&self, i: usize) -> &[T] {
        &self.values[self.bounds[i]..self.bounds[i + 1]]
    }

    fn sizes(&self) -> Vec<usize> {
        self.bounds.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

impl<T: KmerIndex> Signatures<T> for Vec<KmerSignature<T>> {
    fn count(&self) -> usize {
        self.len()
    }

    fn get(&self, i: usize) -> &[T] {
        &self[i]
    }
}

/// A chunk of signatures produced by a [`SignatureSource`]: either a view
/// into an in-memory array or a freshly materialized array read from a file.
pub enum SignatureChunk<'a, T> {
    Borrowed(SignatureArrayView<'a, T>),
    Owned(SignatureArray<T>),
}

impl<T: KmerIndex> Signatures<T> for SignatureChunk<'_, T> {
    fn count(&self) -> usize {
        match self {
            SignatureChunk::Borrowed(v) => v.count(),
            SignatureChunk::Owned(a) => a.count(),
        }
    }

    fn get(&self, i: usize) -> &[T] {
        match self {
            SignatureChunk::Borrowed(v) => v.get(i),
            SignatureChunk::Owned(a) => a.get(i),
        }
    }
}

/// A source of reference signatures which may live out of core.
///
/// The chunked matrix driver pulls signatures through this trait so that
/// file-backed reference sets are only ever partially resident.
pub trait SignatureSource<T: KmerIndex> {
    fn count(&self) -> usize;

    fn kmerspec(&self) -> &KmerSpec;

    /// Load a contiguous range of signatures.
    fn load_range(&self, range: Range<usize>) -> Result<SignatureChunk<'_, T>>;

    /// Load signatures at arbitrary indices, materializing a new array.
    fn load_select(&self, indices: &[usize]) -> Result<SignatureArray<T>>;
}

impl<T: KmerIndex> SignatureSource<T> for SignatureArray<T> {
    fn count(&self) -> usize {
        Signatures::count(self)
    }

    fn kmerspec(&self) -> &KmerSpec {
        self.kmerspec()
    }

    fn load_range(&self, range: Range<usize>) -> Result<SignatureChunk<'_, T>> {
        Ok(SignatureChunk::Borrowed(self.view(range)))
    }

    fn load_select(&self, indices: &[usize]) -> Result<SignatureArray<T>> {
        Ok(self.select(indices))
    }
}
