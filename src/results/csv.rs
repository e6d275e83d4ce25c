//! CSV export of query results: one row per query, fixed column set.

use std::io::Write;

use crate::db::ReferenceDatabase;
use crate::errors::Result;
use crate::query::{QueryResultItem, QueryResults};

const COLUMNS: [&str; 11] = [
    "query",
    "predicted.name",
    "predicted.rank",
    "predicted.ncbi_id",
    "predicted.threshold",
    "closest.distance",
    "closest.description",
    "next.name",
    "next.rank",
    "next.ncbi_id",
    "next.threshold",
];

fn opt_string<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn row(item: &QueryResultItem, db: &ReferenceDatabase) -> Vec<String> {
    let tax = &db.taxonomy;
    let predicted = item.report_taxon.map(|t| tax.get(t));
    let next = item.classifier_result.next_taxon.map(|t| tax.get(t));
    let closest = &item.classifier_result.closest_match;

    vec![
        item.input.label.clone(),
        opt_string(predicted.map(|t| t.name.clone())),
        opt_string(predicted.and_then(|t| t.rank.clone())),
        opt_string(predicted.and_then(|t| t.ncbi_id)),
        opt_string(predicted.and_then(|t| t.distance_threshold)),
        closest.distance.to_string(),
        db.genomes[closest.genome].description.clone(),
        opt_string(next.map(|t| t.name.clone())),
        opt_string(next.and_then(|t| t.rank.clone())),
        opt_string(next.and_then(|t| t.ncbi_id)),
        opt_string(next.and_then(|t| t.distance_threshold)),
    ]
}

/// Write query results as CSV.
pub fn write_results_csv(
    out: &mut dyn Write,
    results: &QueryResults,
    db: &ReferenceDatabase,
) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);
    writer.write_record(COLUMNS)?;
    for item in &results.items {
        writer.write_record(row(item, db))?;
    }
    writer.flush()?;
    Ok(())
}
