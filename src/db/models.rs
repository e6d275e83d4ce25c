//! Read-only projections of reference genomes and taxonomy.
//!
//! Taxa are stored in an arena: every taxon gets a dense integer id, with
//! parent and child links expressed as ids. Ancestor walks and common
//! ancestor searches are index chases over the arena, no reference cycles
//! involved.

use std::collections::HashMap;

use crate::errors::{GambitError, Result};
use crate::sigs::IdValue;

/// Dense arena index of a taxon within a [`Taxonomy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaxonId(pub usize);

/// A taxon used for classifying genomes.
///
/// `distance_threshold` is the maximum Jaccard distance at which a query is
/// matched to this taxon; taxa without a threshold only establish tree
/// structure. Taxa with `report = false` are hidden from user-facing output,
/// which instead ascends to the first reportable ancestor.
#[derive(Debug, Clone)]
pub struct Taxon {
    pub key: String,
    pub name: String,
    pub rank: Option<String>,
    pub description: Option<String>,
    pub distance_threshold: Option<f64>,
    pub report: bool,
    pub ncbi_id: Option<i64>,
    /// Primary key in the source database; used in display representations.
    pub db_id: i64,
    pub parent: Option<TaxonId>,
    pub children: Vec<TaxonId>,
}

/// Immutable snapshot of the taxon forest of one genome set.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    taxa: Vec<Taxon>,
    by_key: HashMap<String, TaxonId>,
}

/// Iterator over a taxon's ancestors, bottom to top.
pub struct Ancestors<'a> {
    taxonomy: &'a Taxonomy,
    current: Option<TaxonId>,
}

impl Iterator for Ancestors<'_> {
    type Item = TaxonId;

    fn next(&mut self) -> Option<TaxonId> {
        let id = self.current?;
        self.current = self.taxonomy.get(id).parent;
        Some(id)
    }
}

impl Taxonomy {
    /// Build from taxon nodes whose `parent`/`children` links are already
    /// consistent arena indices.
    pub fn new(taxa: Vec<Taxon>) -> Result<Taxonomy> {
        let mut by_key = HashMap::with_capacity(taxa.len());
        for (i, taxon) in taxa.iter().enumerate() {
            if let Some(parent) = taxon.parent {
                if parent.0 >= taxa.len() {
                    return Err(GambitError::IncompatibleDatabase(format!(
                        "taxon {:?} references unknown parent",
                        taxon.key
                    )));
                }
            }
            if by_key.insert(taxon.key.clone(), TaxonId(i)).is_some() {
                return Err(GambitError::IncompatibleDatabase(format!(
                    "duplicate taxon key {:?}",
                    taxon.key
                )));
            }
        }
        Ok(Taxonomy { taxa, by_key })
    }

    pub fn len(&self) -> usize {
        self.taxa.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taxa.is_empty()
    }

    pub fn get(&self, id: TaxonId) -> &Taxon {
        &self.taxa[id.0]
    }

    pub fn taxon_by_key(&self, key: &str) -> Option<TaxonId> {
        self.by_key.get(key).copied()
    }

    /// Iterate over a taxon's ancestors from bottom to top.
    pub fn ancestors(&self, id: TaxonId, incself: bool) -> Ancestors<'_> {
        Ancestors {
            taxonomy: self,
            current: if incself { Some(id) } else { self.get(id).parent },
        }
    }

    /// The taxon's ancestors from root down to (and including) itself.
    pub fn lineage(&self, id: TaxonId) -> Vec<TaxonId> {
        let mut lin: Vec<TaxonId> = self.ancestors(id, true).collect();
        lin.reverse();
        lin
    }

    /// Root of the tree this taxon belongs to (itself if parentless).
    pub fn root(&self, id: TaxonId) -> TaxonId {
        self.ancestors(id, true).last().unwrap_or(id)
    }

    /// Whether `ancestor` is an ancestor of `taxon` or the taxon itself.
    pub fn is_ancestor_or_self(&self, ancestor: TaxonId, taxon: TaxonId) -> bool {
        self.ancestors(taxon, true).any(|t| t == ancestor)
    }

    /// First taxon in the ancestry (starting at `taxon` itself) with
    /// `report = true`. `None` values pass through.
    pub fn reportable_taxon(&self, taxon: Option<TaxonId>) -> Option<TaxonId> {
        let taxon = taxon?;
        self.ancestors(taxon, true).find(|&t| self.get(t).report)
    }

    /// Short representation used in warning and error messages.
    pub fn short_repr(&self, id: TaxonId) -> String {
        let taxon = self.get(id);
        format!("{}:{}", taxon.db_id, taxon.name)
    }
}

/// Summary of the genome set a reference database was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceGenomeSet {
    pub db_id: i64,
    pub key: String,
    pub version: Option<String>,
    pub name: String,
    pub description: Option<String>,
}

/// A reference genome annotated with its taxonomy assignment.
///
/// Flattened projection of the genome record and its per-set annotation;
/// `taxon` is the most specific taxon the genome is assigned to.
#[derive(Debug, Clone)]
pub struct AnnotatedGenome {
    pub key: String,
    pub description: String,
    pub organism: Option<String>,
    pub taxon: TaxonId,
    pub ncbi_db: Option<String>,
    pub ncbi_id: Option<i64>,
    pub genbank_acc: Option<String>,
    pub refseq_acc: Option<String>,
    pub db_id: i64,
}

impl AnnotatedGenome {
    /// Value of one of the unique-ID attributes, used to join genomes to
    /// signature IDs.
    pub fn id_value(&self, attr: &str) -> Option<IdValue> {
        match attr {
            "key" => Some(IdValue::Str(self.key.clone())),
            "genbank_acc" => self.genbank_acc.clone().map(IdValue::Str),
            "refseq_acc" => self.refseq_acc.clone().map(IdValue::Str),
            "ncbi_id" => self.ncbi_id.map(IdValue::Int),
            _ => None,
        }
    }
}
