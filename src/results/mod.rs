//! Export query results in various formats.
//!
//! Database objects are converted into plain tagged record structs
//! ([`TaxonRecord`], [`GenomeRecord`], ...) which serialize directly; each
//! output format is one variant of [`ResultsExporter`] with a single
//! serialization routine.

pub mod archive;
pub mod csv;
pub mod dmat;
pub mod json;

pub use archive::{read_results_archive, write_results_archive};
pub use dmat::{dump_dmat_csv, load_dmat_csv};

use serde::{Deserialize, Serialize};

use crate::classify::GenomeMatch;
use crate::db::models::{TaxonId, Taxonomy};
use crate::db::ReferenceDatabase;
use crate::errors::Result;
use crate::query::QueryResults;

/// Flattened taxon fields as they appear in exported results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonRecord {
    pub id: i64,
    pub key: String,
    pub name: String,
    pub ncbi_id: Option<i64>,
    pub rank: Option<String>,
    pub distance_threshold: Option<f64>,
}

pub fn taxon_record(taxonomy: &Taxonomy, id: TaxonId) -> TaxonRecord {
    let taxon = taxonomy.get(id);
    TaxonRecord {
        id: taxon.db_id,
        key: taxon.key.clone(),
        name: taxon.name.clone(),
        ncbi_id: taxon.ncbi_id,
        rank: taxon.rank.clone(),
        distance_threshold: taxon.distance_threshold,
    }
}

/// Flattened genome fields plus the genome's full taxonomy lineage
/// (most specific first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeRecord {
    pub id: i64,
    pub key: String,
    pub description: String,
    pub organism: Option<String>,
    pub ncbi_db: Option<String>,
    pub ncbi_id: Option<i64>,
    pub genbank_acc: Option<String>,
    pub refseq_acc: Option<String>,
    pub taxonomy: Vec<TaxonRecord>,
}

pub fn genome_record(db: &ReferenceDatabase, genome: usize) -> GenomeRecord {
    let g = &db.genomes[genome];
    GenomeRecord {
        id: g.db_id,
        key: g.key.clone(),
        description: g.description.clone(),
        organism: g.organism.clone(),
        ncbi_db: g.ncbi_db.clone(),
        ncbi_id: g.ncbi_id,
        genbank_acc: g.genbank_acc.clone(),
        refseq_acc: g.refseq_acc.clone(),
        taxonomy: db
            .taxonomy
            .ancestors(g.taxon, true)
            .map(|t| taxon_record(&db.taxonomy, t))
            .collect(),
    }
}

/// Genome set summary fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenomeSetRecord {
    pub id: i64,
    pub key: String,
    pub version: Option<String>,
    pub name: String,
    pub description: Option<String>,
}

pub fn genomeset_record(results: &QueryResults) -> GenomeSetRecord {
    GenomeSetRecord {
        id: results.genomeset.db_id,
        key: results.genomeset.key.clone(),
        version: results.genomeset.version.clone(),
        name: results.genomeset.name.clone(),
        description: results.genomeset.description.clone(),
    }
}

/// A genome match with database objects resolved to records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub genome: GenomeRecord,
    pub distance: f32,
    pub matched_taxon: Option<TaxonRecord>,
}

pub fn match_record(db: &ReferenceDatabase, m: &GenomeMatch) -> MatchRecord {
    MatchRecord {
        genome: genome_record(db, m.genome),
        distance: m.distance,
        matched_taxon: m.matched_taxon.map(|t| taxon_record(&db.taxonomy, t)),
    }
}

/// Output format for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultsExporter {
    Csv,
    Json,
    Archive,
}

impl ResultsExporter {
    /// Parse a format name as given on the command line.
    pub fn from_name(name: &str) -> Option<ResultsExporter> {
        match name {
            "csv" => Some(ResultsExporter::Csv),
            "json" => Some(ResultsExporter::Json),
            "archive" => Some(ResultsExporter::Archive),
            _ => None,
        }
    }

    /// Write query results to `out` in this format.
    pub fn export(
        self,
        out: &mut dyn std::io::Write,
        results: &QueryResults,
        db: &ReferenceDatabase,
    ) -> Result<()> {
        match self {
            ResultsExporter::Csv => csv::write_results_csv(out, results, db),
            ResultsExporter::Json => json::write_results_json(out, results, db),
            ResultsExporter::Archive => archive::write_results_archive(out, results, db),
        }
    }
}
