//! K-mer signatures: calculation, in-memory arrays, and file storage.
//!
//! A signature is the sorted set of integer indices of all prefix-anchored
//! k-mers found in a genome, on either strand. Signatures are compared with
//! the Jaccard metric in [`crate::metric`].

pub mod array;
pub mod calc;
pub mod hdf5;

pub use self::array::{
    SignatureArray, SignatureArrayView, SignatureChunk, SignatureSource, Signatures,
};
pub use self::calc::{calc_file_signature, calc_file_signatures, calc_signature, KmerAccumulator};
pub use self::hdf5::{dump_signatures, load_signatures, Hdf5Signatures, SignaturesFile};

use serde::{Deserialize, Serialize};

/// A single k-mer signature: strictly ascending, unique indices.
pub type KmerSignature<T> = Vec<T>;

/// ID value attached to a stored signature: either a string (genome key,
/// accession number) or an integer (NCBI UID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Int(i64),
    Str(String),
}

impl std::fmt::Display for IdValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdValue::Int(v) => write!(f, "{v}"),
            IdValue::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for IdValue {
    fn from(s: &str) -> Self {
        IdValue::Str(s.to_owned())
    }
}

impl From<i64> for IdValue {
    fn from(v: i64) -> Self {
        IdValue::Int(v)
    }
}

/// Metadata describing a stored set of k-mer signatures. All fields optional.
///
/// `id_attr` names the genome attribute the signature IDs correspond to; a
/// signature set cannot serve as a query reference without it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignaturesMeta {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub id_attr: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

/// Run `$body` with `$sigs` bound to the typed signature store inside a
/// [`SignaturesFile`], whatever its element width.
#[macro_export]
macro_rules! with_signatures_file {
    ($file:expr, $sigs:ident, $body:expr) => {
        match $file {
            $crate::sigs::SignaturesFile::U16($sigs) => $body,
            $crate::sigs::SignaturesFile::U32($sigs) => $body,
            $crate::sigs::SignaturesFile::U64($sigs) => $body,
        }
    };
}
