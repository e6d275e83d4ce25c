//! Store k-mer signature sets in HDF5 format.
//!
//! Layout (format version 1): the root group carries attributes
//! `gambit_signatures_version`, `kmerspec_k`, `kmerspec_prefix`, the scalar
//! metadata attributes (`id`, `name`, `version`, `id_attr`, `description`,
//! written with a null dataspace when absent) and `extra` (JSON string).
//! Datasets: `values` (1-D integer, optionally gzip-compressed), `bounds`
//! (1-D int64, length N+1) and `ids` (1-D string or integer, length N).
//!
//! Loading is random access: `bounds` and `ids` are read eagerly, `values`
//! stays on disk and slice requests read only the needed range. The open
//! file handle is owned by [`Hdf5Signatures`] and released on drop.

use std::ops::Range;
use std::path::Path;

use hdf5::types::{IntSize, TypeDescriptor, VarLenAscii, VarLenUnicode};
use hdf5::{Extents, H5Type};
use log::debug;
use ndarray::s;

use crate::errors::{GambitError, Result};
use crate::kmers::{IndexWidth, KmerIndex, KmerSpec};
use crate::sigs::array::{validate_bounds, SignatureArray, SignatureChunk, SignatureSource};
use crate::sigs::{IdValue, SignaturesMeta};

/// Attribute which stores the format version and identifies a group as
/// containing signature data.
pub const FMT_VERSION_ATTR: &str = "gambit_signatures_version";

/// Current version of the data format.
pub const CURRENT_FMT_VERSION: i64 = 1;

/// How the `values` dataset is stored on disk relative to the in-memory
/// element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StoredValues {
    /// Same unsigned type as in memory.
    Native,
    /// Signed integer of the same width; reinterpreted as unsigned.
    Signed,
    /// 8-bit unsigned; widened to 16 bits in memory.
    Byte,
    /// 8-bit signed; reinterpreted then widened.
    SignedByte,
}

fn str_attr(value: &str) -> Result<VarLenUnicode> {
    value
        .parse::<VarLenUnicode>()
        .map_err(|e| GambitError::Format(format!("cannot store string attribute: {e}")))
}

fn write_opt_str_attr(group: &hdf5::Group, name: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(v) => {
            group
                .new_attr::<VarLenUnicode>()
                .create(name)?
                .write_scalar(&str_attr(v)?)?;
        }
        None => {
            group
                .new_attr::<VarLenUnicode>()
                .shape(Extents::Null)
                .create(name)?;
        }
    }
    Ok(())
}

fn read_opt_str_attr(group: &hdf5::Group, name: &str) -> Result<Option<String>> {
    if !group.attr_names()?.iter().any(|n| n == name) {
        return Ok(None);
    }
    let attr = group.attr(name)?;
    // Absent values are written as attributes with a null dataspace; those
    // cannot be read as a scalar, which maps them back to None.
    match attr.read_scalar::<VarLenUnicode>() {
        Ok(value) => Ok(Some(value.as_str().to_owned())),
        Err(_) => Ok(None),
    }
}

/// Write signature set metadata to HDF5 group attributes.
fn write_metadata(group: &hdf5::Group, meta: &SignaturesMeta) -> Result<()> {
    write_opt_str_attr(group, "id", meta.id.as_deref())?;
    write_opt_str_attr(group, "name", meta.name.as_deref())?;
    write_opt_str_attr(group, "version", meta.version.as_deref())?;
    write_opt_str_attr(group, "id_attr", meta.id_attr.as_deref())?;
    write_opt_str_attr(group, "description", meta.description.as_deref())?;

    let extra = match &meta.extra {
        Some(value) => Some(serde_json::to_string(value)?),
        None => None,
    };
    write_opt_str_attr(group, "extra", extra.as_deref())
}

/// Read signature set metadata from HDF5 group attributes.
fn read_metadata(group: &hdf5::Group) -> Result<SignaturesMeta> {
    let extra = match read_opt_str_attr(group, "extra")? {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };

    Ok(SignaturesMeta {
        id: read_opt_str_attr(group, "id")?,
        name: read_opt_str_attr(group, "name")?,
        version: read_opt_str_attr(group, "version")?,
        id_attr: read_opt_str_attr(group, "id_attr")?,
        description: read_opt_str_attr(group, "description")?,
        extra,
    })
}

/// An open, file-backed set of reference signatures with metadata.
///
/// Signature data is read lazily: a slice request reads only the needed
/// `values` range. The element type `T` is determined by the stored dtype
/// when the file is opened via [`load_signatures`].
pub struct Hdf5Signatures<T> {
    // Held to keep the file open for the lifetime of `values`; closed on drop.
    _file: hdf5::File,
    values: hdf5::Dataset,
    stored: StoredValues,
    bounds: Vec<usize>,
    ids: Vec<IdValue>,
    kmerspec: KmerSpec,
    meta: SignaturesMeta,
    _marker: std::marker::PhantomData<T>,
}

impl<T: KmerIndex + H5Type> Hdf5Signatures<T> {
    pub fn count(&self) -> usize {
        self.bounds.len() - 1
    }

    pub fn kmerspec(&self) -> &KmerSpec {
        &self.kmerspec
    }

    pub fn meta(&self) -> &SignaturesMeta {
        &self.meta
    }

    pub fn ids(&self) -> &[IdValue] {
        &self.ids
    }

    /// Lengths of the stored signatures.
    pub fn sizes(&self) -> Vec<usize> {
        self.bounds.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn read_values_range(&self, lo: usize, hi: usize) -> Result<Vec<T>> {
        if lo == hi {
            return Ok(Vec::new());
        }
        let values = match self.stored {
            StoredValues::Native => self.values.read_slice_1d::<T, _>(s![lo..hi])?.to_vec(),
            StoredValues::Byte => self
                .values
                .read_slice_1d::<u8, _>(s![lo..hi])?
                .iter()
                .map(|&v| T::from_u64(u64::from(v)))
                .collect(),
            StoredValues::SignedByte => self
                .values
                .read_slice_1d::<i8, _>(s![lo..hi])?
                .iter()
                .map(|&v| T::from_u64(u64::from(v as u8)))
                .collect(),
            StoredValues::Signed => match T::WIDTH {
                IndexWidth::U8 | IndexWidth::U16 => self
                    .values
                    .read_slice_1d::<i16, _>(s![lo..hi])?
                    .iter()
                    .map(|&v| T::from_u64(u64::from(v as u16)))
                    .collect(),
                IndexWidth::U32 => self
                    .values
                    .read_slice_1d::<i32, _>(s![lo..hi])?
                    .iter()
                    .map(|&v| T::from_u64(u64::from(v as u32)))
                    .collect(),
                IndexWidth::U64 => self
                    .values
                    .read_slice_1d::<i64, _>(s![lo..hi])?
                    .iter()
                    .map(|&v| T::from_u64(v as u64))
                    .collect(),
            },
        };
        Ok(values)
    }

    /// Read the entire signature set into memory.
    pub fn load_all(&self) -> Result<SignatureArray<T>> {
        self.load_range_owned(0..self.count())
    }

    fn load_range_owned(&self, range: Range<usize>) -> Result<SignatureArray<T>> {
        let lo = self.bounds[range.start];
        let hi = self.bounds[range.end];
        let values = self.read_values_range(lo, hi)?;
        let bounds: Vec<usize> = self.bounds[range.start..=range.end]
            .iter()
            .map(|&b| b - lo)
            .collect();
        SignatureArray::from_parts(values, bounds, self.kmerspec.clone())
    }
}

impl<T: KmerIndex + H5Type> SignatureSource<T> for Hdf5Signatures<T> {
    fn count(&self) -> usize {
        self.count()
    }

    fn kmerspec(&self) -> &KmerSpec {
        &self.kmerspec
    }

    fn load_range(&self, range: Range<usize>) -> Result<SignatureChunk<'_, T>> {
        Ok(SignatureChunk::Owned(self.load_range_owned(range)?))
    }

    fn load_select(&self, indices: &[usize]) -> Result<SignatureArray<T>> {
        let mut bounds = Vec::with_capacity(indices.len() + 1);
        bounds.push(0);
        let total: usize = indices
            .iter()
            .map(|&i| self.bounds[i + 1] - self.bounds[i])
            .sum();
        let mut values = Vec::with_capacity(total);
        for &i in indices {
            values.extend(self.read_values_range(self.bounds[i], self.bounds[i + 1])?);
            bounds.push(values.len());
        }
        SignatureArray::from_parts(values, bounds, self.kmerspec.clone())
    }
}

/// A signature file opened with its stored element width.
pub enum SignaturesFile {
    U16(Hdf5Signatures<u16>),
    U32(Hdf5Signatures<u32>),
    U64(Hdf5Signatures<u64>),
}

impl SignaturesFile {
    pub fn count(&self) -> usize {
        crate::with_signatures_file!(self, s, s.count())
    }

    pub fn kmerspec(&self) -> &KmerSpec {
        crate::with_signatures_file!(self, s, s.kmerspec())
    }

    pub fn meta(&self) -> &SignaturesMeta {
        crate::with_signatures_file!(self, s, s.meta())
    }

    pub fn ids(&self) -> &[IdValue] {
        crate::with_signatures_file!(self, s, s.ids())
    }

    pub fn sizes(&self) -> Vec<usize> {
        crate::with_signatures_file!(self, s, s.sizes())
    }

    /// Load every signature, converted to element width `T`.
    ///
    /// Safe whenever `T` covers the file's k-mer spec index range; callers
    /// check spec compatibility first.
    pub fn load_all_converted<T: KmerIndex>(&self) -> Result<Vec<Vec<T>>> {
        crate::with_signatures_file!(self, s, {
            Ok(s.load_all()?.convert::<T>().to_signatures())
        })
    }

    /// Name of the stored element data type, for display.
    pub fn dtype_name(&self) -> &'static str {
        match self {
            SignaturesFile::U16(_) => "uint16",
            SignaturesFile::U32(_) => "uint32",
            SignaturesFile::U64(_) => "uint64",
        }
    }
}

fn read_bounds(file: &hdf5::File) -> Result<Vec<usize>> {
    let ds = file
        .dataset("bounds")
        .map_err(|_| GambitError::Format("signature file is missing 'bounds' dataset".into()))?;
    let raw = ds.read_1d::<i64>()?;
    let mut bounds = Vec::with_capacity(raw.len());
    for &b in raw.iter() {
        if b < 0 {
            return Err(GambitError::Format("negative value in bounds array".into()));
        }
        bounds.push(b as usize);
    }
    Ok(bounds)
}

fn read_ids(file: &hdf5::File) -> Result<Vec<IdValue>> {
    let ds = file
        .dataset("ids")
        .map_err(|_| GambitError::Format("signature file is missing 'ids' dataset".into()))?;
    let descriptor = ds.dtype()?.to_descriptor()?;
    let ids = match descriptor {
        TypeDescriptor::VarLenUnicode => ds
            .read_1d::<VarLenUnicode>()?
            .iter()
            .map(|v| IdValue::Str(v.as_str().to_owned()))
            .collect(),
        TypeDescriptor::VarLenAscii => ds
            .read_1d::<VarLenAscii>()?
            .iter()
            .map(|v| IdValue::Str(v.as_str().to_owned()))
            .collect(),
        TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_) => ds
            .read_1d::<i64>()?
            .iter()
            .map(|&v| IdValue::Int(v))
            .collect(),
        other => {
            return Err(GambitError::Format(format!(
                "unsupported ids data type: {other:?}"
            )))
        }
    };
    Ok(ids)
}

/// Open an HDF5 signature file, validating the format invariants.
pub fn load_signatures(path: impl AsRef<Path>) -> Result<SignaturesFile> {
    let path = path.as_ref();
    let file = hdf5::File::open(path)?;

    if !file.attr_names()?.iter().any(|n| n == FMT_VERSION_ATTR) {
        return Err(GambitError::Format(format!(
            "{} does not contain a signature set",
            path.display()
        )));
    }
    let version = file.attr(FMT_VERSION_ATTR)?.read_scalar::<i64>()?;
    if version != CURRENT_FMT_VERSION {
        return Err(GambitError::Format(format!(
            "unrecognized signature format version: {version}"
        )));
    }

    let k = file.attr("kmerspec_k")?.read_scalar::<i64>()?;
    let k = u8::try_from(k)
        .map_err(|_| GambitError::Format(format!("stored k out of range: {k}")))?;
    let prefix = file.attr("kmerspec_prefix")?.read_scalar::<VarLenUnicode>()?;
    let kmerspec = KmerSpec::new(k, prefix.as_str())?;

    let meta = read_metadata(&file)?;
    let bounds = read_bounds(&file)?;
    let ids = read_ids(&file)?;

    let values = file
        .dataset("values")
        .map_err(|_| GambitError::Format("signature file is missing 'values' dataset".into()))?;
    let values_len = values.size();

    validate_bounds(&bounds, values_len)?;
    if ids.len() != bounds.len() - 1 {
        return Err(GambitError::Format(format!(
            "ids length ({}) does not match signature count ({})",
            ids.len(),
            bounds.len() - 1
        )));
    }

    let descriptor = values.dtype()?.to_descriptor()?;
    let (width, stored) = match descriptor {
        TypeDescriptor::Unsigned(IntSize::U1) => (IndexWidth::U16, StoredValues::Byte),
        TypeDescriptor::Integer(IntSize::U1) => (IndexWidth::U16, StoredValues::SignedByte),
        TypeDescriptor::Unsigned(IntSize::U2) => (IndexWidth::U16, StoredValues::Native),
        TypeDescriptor::Integer(IntSize::U2) => (IndexWidth::U16, StoredValues::Signed),
        TypeDescriptor::Unsigned(IntSize::U4) => (IndexWidth::U32, StoredValues::Native),
        TypeDescriptor::Integer(IntSize::U4) => (IndexWidth::U32, StoredValues::Signed),
        TypeDescriptor::Unsigned(IntSize::U8) => (IndexWidth::U64, StoredValues::Native),
        TypeDescriptor::Integer(IntSize::U8) => (IndexWidth::U64, StoredValues::Signed),
        other => {
            return Err(GambitError::Format(format!(
                "unsupported values data type: {other:?}"
            )))
        }
    };

    debug!(
        "opened signature file {} ({} signatures, k-mer spec {})",
        path.display(),
        bounds.len() - 1,
        kmerspec
    );

    macro_rules! build {
        ($variant:ident, $T:ty) => {
            SignaturesFile::$variant(Hdf5Signatures::<$T> {
                _file: file,
                values,
                stored,
                bounds,
                ids,
                kmerspec,
                meta,
                _marker: std::marker::PhantomData,
            })
        };
    }

    Ok(match width {
        IndexWidth::U8 | IndexWidth::U16 => build!(U16, u16),
        IndexWidth::U32 => build!(U32, u32),
        IndexWidth::U64 => build!(U64, u64),
    })
}

/// Write a signature array plus IDs and metadata to an HDF5 file.
///
/// `compression` is a gzip level (0-9) applied to the `values` dataset.
pub fn dump_signatures<T: KmerIndex + H5Type>(
    path: impl AsRef<Path>,
    signatures: &SignatureArray<T>,
    ids: &[IdValue],
    meta: &SignaturesMeta,
    compression: Option<u8>,
) -> Result<()> {
    use crate::sigs::Signatures;

    let count = Signatures::count(signatures);
    if ids.len() != count {
        return Err(GambitError::InvalidInput(format!(
            "number of ids ({}) does not match number of signatures ({count})",
            ids.len()
        )));
    }

    let file = hdf5::File::create(path.as_ref())?;

    file.new_attr::<i64>()
        .create(FMT_VERSION_ATTR)?
        .write_scalar(&CURRENT_FMT_VERSION)?;
    file.new_attr::<i64>()
        .create("kmerspec_k")?
        .write_scalar(&i64::from(signatures.kmerspec().k()))?;
    file.new_attr::<VarLenUnicode>()
        .create("kmerspec_prefix")?
        .write_scalar(&str_attr(signatures.kmerspec().prefix_str())?)?;
    write_metadata(&file, meta)?;

    // IDs must be homogeneous: all strings or all integers.
    let all_str = ids.iter().all(|id| matches!(id, IdValue::Str(_)));
    let all_int = ids.iter().all(|id| matches!(id, IdValue::Int(_)));
    if all_str && !ids.is_empty() {
        let data: Vec<VarLenUnicode> = ids
            .iter()
            .map(|id| str_attr(&id.to_string()))
            .collect::<Result<_>>()?;
        file.new_dataset_builder()
            .with_data(data.as_slice())
            .create("ids")?;
    } else if all_int || ids.is_empty() {
        let data: Vec<i64> = ids
            .iter()
            .map(|id| match id {
                IdValue::Int(v) => *v,
                IdValue::Str(_) => 0,
            })
            .collect();
        file.new_dataset_builder()
            .with_data(data.as_slice())
            .create("ids")?;
    } else {
        return Err(GambitError::InvalidInput(
            "signature ids must be all strings or all integers".into(),
        ));
    }

    let bounds: Vec<i64> = signatures.bounds().iter().map(|&b| b as i64).collect();
    file.new_dataset_builder()
        .with_data(bounds.as_slice())
        .create("bounds")?;

    let values = signatures.values();
    match compression {
        Some(level) if !values.is_empty() => {
            file.new_dataset_builder()
                .deflate(level)
                .chunk([values.len().min(1 << 16)])
                .with_data(values)
                .create("values")?;
        }
        _ => {
            file.new_dataset_builder()
                .with_data(values)
                .create("values")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sigs::Signatures;

    fn test_spec() -> KmerSpec {
        KmerSpec::new(11, "ATGAC").expect("valid spec")
    }

    fn test_array() -> SignatureArray<u32> {
        SignatureArray::from_signatures(
            &[
                vec![0, 3, 500, 400_000],
                vec![],
                vec![7, 8, 9],
                vec![1, 2, 3, 4, 5],
            ],
            test_spec(),
        )
    }

    fn test_meta() -> SignaturesMeta {
        SignaturesMeta {
            id: Some("test/sigs".into()),
            name: Some("test signatures".into()),
            version: Some("1.0".into()),
            id_attr: Some("key".into()),
            description: None,
            extra: Some(serde_json::json!({"source": "unit test"})),
        }
    }

    fn str_ids(n: usize) -> Vec<IdValue> {
        (0..n).map(|i| IdValue::Str(format!("genome{i}"))).collect()
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sigs.gs");
        let arr = test_array();
        let ids = str_ids(4);
        let meta = test_meta();

        dump_signatures(&path, &arr, &ids, &meta, None).expect("dump");

        let file = load_signatures(&path).expect("load");
        assert_eq!(file.count(), 4);
        assert_eq!(file.kmerspec(), arr.kmerspec());
        assert_eq!(file.meta(), &meta);
        assert_eq!(file.ids(), ids.as_slice());
        assert_eq!(file.dtype_name(), "uint32");

        match file {
            SignaturesFile::U32(sigs) => {
                let loaded = sigs.load_all().expect("load_all");
                assert_eq!(loaded, arr);
            }
            _ => panic!("expected u32 signatures"),
        }
    }

    #[test]
    fn test_roundtrip_with_compression_and_int_ids() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sigs.gs");
        let sigs: Vec<Vec<u32>> = (0..10)
            .map(|i| (0..200u32).map(|v| v * 7 + i).collect())
            .collect();
        let arr = SignatureArray::from_signatures(&sigs, test_spec());
        let ids: Vec<IdValue> = (0..10).map(|i| IdValue::Int(1000 + i)).collect();

        dump_signatures(&path, &arr, &ids, &SignaturesMeta::default(), Some(4)).expect("dump");

        let file = load_signatures(&path).expect("load");
        assert_eq!(file.ids(), ids.as_slice());
        assert_eq!(file.meta(), &SignaturesMeta::default());
        match file {
            SignaturesFile::U32(loaded) => {
                assert_eq!(loaded.load_all().expect("load_all"), arr);
            }
            _ => panic!("expected u32 signatures"),
        }
    }

    #[test]
    fn test_partial_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sigs.gs");
        let arr = test_array();
        dump_signatures(&path, &arr, &str_ids(4), &SignaturesMeta::default(), None)
            .expect("dump");

        let file = load_signatures(&path).expect("load");
        let sigs = match file {
            SignaturesFile::U32(s) => s,
            _ => panic!("expected u32 signatures"),
        };

        let chunk = sigs.load_range_owned(1..3).expect("range");
        assert_eq!(chunk.count(), 2);
        assert_eq!(chunk.get(0), arr.get(1));
        assert_eq!(chunk.get(1), arr.get(2));

        let selected = sigs.load_select(&[3, 0]).expect("select");
        assert_eq!(selected.count(), 2);
        assert_eq!(selected.get(0), arr.get(3));
        assert_eq!(selected.get(1), arr.get(0));
    }

    #[test]
    fn test_u16_width_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sigs.gs");
        let kspec = KmerSpec::new(8, "ATG").expect("valid spec");
        let arr =
            SignatureArray::<u16>::from_signatures(&[vec![1, 2, 3], vec![60_000]], kspec);
        dump_signatures(&path, &arr, &str_ids(2), &SignaturesMeta::default(), None)
            .expect("dump");

        let file = load_signatures(&path).expect("load");
        assert_eq!(file.dtype_name(), "uint16");
        match file {
            SignaturesFile::U16(s) => assert_eq!(s.load_all().expect("load_all"), arr),
            _ => panic!("expected u16 signatures"),
        }
    }

    #[test]
    fn test_not_a_signature_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("other.h5");
        let file = hdf5::File::create(&path).expect("create");
        drop(file);

        let err = load_signatures(&path).expect_err("must fail");
        assert!(matches!(err, GambitError::Format(_)));
    }

    #[test]
    fn test_mixed_ids_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sigs.gs");
        let arr = test_array();
        let ids = vec![
            IdValue::Str("a".into()),
            IdValue::Int(1),
            IdValue::Str("b".into()),
            IdValue::Int(2),
        ];
        let err = dump_signatures(&path, &arr, &ids, &SignaturesMeta::default(), None)
            .expect_err("must fail");
        assert!(matches!(err, GambitError::InvalidInput(_)));
    }

    #[test]
    fn test_id_count_mismatch_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sigs.gs");
        let err = dump_signatures(
            &path,
            &test_array(),
            &str_ids(3),
            &SignaturesMeta::default(),
            None,
        )
        .expect_err("must fail");
        assert!(matches!(err, GambitError::InvalidInput(_)));
    }
}
