//! JSON export of query results.
//!
//! Assumes non-strict classification is the common case: per item, the
//! relevant information is the report taxon, the "just missed" taxon and the
//! list of closest genome matches.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::ReferenceDatabase;
use crate::errors::Result;
use crate::query::QueryResults;
use crate::results::{
    genomeset_record, match_record, taxon_record, GenomeSetRecord, MatchRecord, TaxonRecord,
};
use crate::sigs::SignaturesMeta;

#[derive(Serialize)]
struct JsonQuery {
    name: String,
    path: Option<PathBuf>,
    format: Option<String>,
}

#[derive(Serialize)]
struct JsonItem {
    query: JsonQuery,
    predicted_taxon: Option<TaxonRecord>,
    next_taxon: Option<TaxonRecord>,
    closest_genomes: Vec<MatchRecord>,
}

#[derive(Serialize)]
struct JsonDoc {
    items: Vec<JsonItem>,
    genomeset: GenomeSetRecord,
    signaturesmeta: SignaturesMeta,
    gambit_version: String,
    timestamp: DateTime<Utc>,
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Write query results as a JSON document.
pub fn write_results_json(
    out: &mut dyn Write,
    results: &QueryResults,
    db: &ReferenceDatabase,
) -> Result<()> {
    let items = results
        .items
        .iter()
        .map(|item| JsonItem {
            query: JsonQuery {
                name: item.input.label.clone(),
                path: item.input.path.clone(),
                format: item.input.path.as_ref().map(|_| "fasta".to_owned()),
            },
            predicted_taxon: item.report_taxon.map(|t| taxon_record(&db.taxonomy, t)),
            next_taxon: item
                .classifier_result
                .next_taxon
                .map(|t| taxon_record(&db.taxonomy, t)),
            closest_genomes: item
                .closest_genomes
                .iter()
                .map(|m| match_record(db, m))
                .collect(),
        })
        .collect();

    let doc = JsonDoc {
        items,
        genomeset: genomeset_record(results),
        signaturesmeta: results.signaturesmeta.clone(),
        gambit_version: results.gambit_version.clone(),
        timestamp: results.timestamp,
        extra: results.extra.clone(),
    };

    serde_json::to_writer(&mut *out, &doc)?;
    out.flush()?;
    Ok(())
}
