//! Results "archive" format: a JSON document capturing all stored data.
//!
//! Not intended to be read by users. Database objects are saved by their key
//! attributes only; reading the archive back recreates a full
//! [`QueryResults`] by looking the keys up in a live database of the same
//! genome set `(key, version)`.

use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{ClassifierResult, GenomeMatch};
use crate::db::models::TaxonId;
use crate::db::ReferenceDatabase;
use crate::errors::{GambitError, Result};
use crate::query::{QueryInput, QueryParams, QueryResultItem, QueryResults};
use crate::sigs::SignaturesMeta;

#[derive(Serialize, Deserialize)]
struct KeyRef {
    key: String,
}

#[derive(Serialize, Deserialize)]
struct GenomeSetRef {
    key: String,
    version: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveMatch {
    genome: KeyRef,
    distance: f32,
    matched_taxon: Option<KeyRef>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveClassifierResult {
    success: bool,
    predicted_taxon: Option<KeyRef>,
    primary_match: Option<ArchiveMatch>,
    closest_match: ArchiveMatch,
    next_taxon: Option<KeyRef>,
    warnings: Vec<String>,
    error: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveItem {
    input: QueryInput,
    classifier_result: ArchiveClassifierResult,
    report_taxon: Option<KeyRef>,
    closest_genomes: Vec<ArchiveMatch>,
}

#[derive(Serialize, Deserialize)]
struct ArchiveDoc {
    items: Vec<ArchiveItem>,
    params: QueryParams,
    genomeset: GenomeSetRef,
    signaturesmeta: SignaturesMeta,
    gambit_version: String,
    timestamp: DateTime<Utc>,
    extra: serde_json::Map<String, serde_json::Value>,
}

fn taxon_ref(db: &ReferenceDatabase, id: TaxonId) -> KeyRef {
    KeyRef {
        key: db.taxonomy.get(id).key.clone(),
    }
}

fn match_to_archive(db: &ReferenceDatabase, m: &GenomeMatch) -> ArchiveMatch {
    ArchiveMatch {
        genome: KeyRef {
            key: db.genomes[m.genome].key.clone(),
        },
        distance: m.distance,
        matched_taxon: m.matched_taxon.map(|t| taxon_ref(db, t)),
    }
}

/// Write query results in archive format.
pub fn write_results_archive(
    out: &mut dyn Write,
    results: &QueryResults,
    db: &ReferenceDatabase,
) -> Result<()> {
    let items = results
        .items
        .iter()
        .map(|item| ArchiveItem {
            input: item.input.clone(),
            classifier_result: ArchiveClassifierResult {
                success: item.classifier_result.success,
                predicted_taxon: item
                    .classifier_result
                    .predicted_taxon
                    .map(|t| taxon_ref(db, t)),
                primary_match: item
                    .classifier_result
                    .primary_match
                    .as_ref()
                    .map(|m| match_to_archive(db, m)),
                closest_match: match_to_archive(db, &item.classifier_result.closest_match),
                next_taxon: item.classifier_result.next_taxon.map(|t| taxon_ref(db, t)),
                warnings: item.classifier_result.warnings.clone(),
                error: item.classifier_result.error.clone(),
            },
            report_taxon: item.report_taxon.map(|t| taxon_ref(db, t)),
            closest_genomes: item
                .closest_genomes
                .iter()
                .map(|m| match_to_archive(db, m))
                .collect(),
        })
        .collect();

    let doc = ArchiveDoc {
        items,
        params: results.params.clone(),
        genomeset: GenomeSetRef {
            key: results.genomeset.key.clone(),
            version: results.genomeset.version.clone(),
        },
        signaturesmeta: results.signaturesmeta.clone(),
        gambit_version: results.gambit_version.clone(),
        timestamp: results.timestamp,
        extra: results.extra.clone(),
    };

    serde_json::to_writer(&mut *out, &doc)?;
    out.flush()?;
    Ok(())
}

fn resolve_taxon(db: &ReferenceDatabase, r: &KeyRef) -> Result<TaxonId> {
    db.taxonomy.taxon_by_key(&r.key).ok_or_else(|| {
        GambitError::IncompatibleDatabase(format!(
            "archived taxon key {:?} not found in database",
            r.key
        ))
    })
}

fn resolve_match(db: &ReferenceDatabase, m: &ArchiveMatch) -> Result<GenomeMatch> {
    let genome = db.genome_index_by_key(&m.genome.key).ok_or_else(|| {
        GambitError::IncompatibleDatabase(format!(
            "archived genome key {:?} not found in database",
            m.genome.key
        ))
    })?;
    let matched_taxon = m
        .matched_taxon
        .as_ref()
        .map(|t| resolve_taxon(db, t))
        .transpose()?;
    Ok(GenomeMatch {
        genome,
        distance: m.distance,
        matched_taxon,
    })
}

/// Read archived query results back against a live database.
///
/// The database must contain the same genome set `(key, version)` the
/// archive was created from.
pub fn read_results_archive(
    input: &mut dyn Read,
    db: &ReferenceDatabase,
) -> Result<QueryResults> {
    let doc: ArchiveDoc = serde_json::from_reader(input)?;

    if doc.genomeset.key != db.genomeset.key || doc.genomeset.version != db.genomeset.version {
        return Err(GambitError::IncompatibleDatabase(format!(
            "archive was created from genome set {:?} version {:?}, database has {:?} version {:?}",
            doc.genomeset.key, doc.genomeset.version, db.genomeset.key, db.genomeset.version
        )));
    }

    let mut items = Vec::with_capacity(doc.items.len());
    for item in doc.items {
        let cr = item.classifier_result;
        let classifier_result = ClassifierResult {
            success: cr.success,
            predicted_taxon: cr
                .predicted_taxon
                .as_ref()
                .map(|t| resolve_taxon(db, t))
                .transpose()?,
            primary_match: cr
                .primary_match
                .as_ref()
                .map(|m| resolve_match(db, m))
                .transpose()?,
            closest_match: resolve_match(db, &cr.closest_match)?,
            next_taxon: cr
                .next_taxon
                .as_ref()
                .map(|t| resolve_taxon(db, t))
                .transpose()?,
            warnings: cr.warnings,
            error: cr.error,
        };

        let closest_genomes = item
            .closest_genomes
            .iter()
            .map(|m| resolve_match(db, m))
            .collect::<Result<Vec<_>>>()?;

        items.push(QueryResultItem {
            input: item.input,
            classifier_result,
            report_taxon: item
                .report_taxon
                .as_ref()
                .map(|t| resolve_taxon(db, t))
                .transpose()?,
            closest_genomes,
        });
    }

    Ok(QueryResults {
        items,
        params: doc.params,
        genomeset: db.genomeset.clone(),
        signaturesmeta: doc.signaturesmeta,
        gambit_version: doc.gambit_version,
        timestamp: doc.timestamp,
        extra: doc.extra,
    })
}
