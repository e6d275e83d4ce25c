//! Distance matrices in CSV format, with row and column IDs.

use std::io::{Read, Write};

use ndarray::Array2;

use crate::errors::{GambitError, Result};

/// Write a distance matrix to CSV: first row is the column IDs (empty corner
/// cell), following rows start with the row ID. Values use four decimal
/// places.
pub fn dump_dmat_csv(
    out: &mut dyn Write,
    dmat: &Array2<f32>,
    row_ids: &[String],
    col_ids: &[String],
) -> Result<()> {
    if dmat.nrows() != row_ids.len() || dmat.ncols() != col_ids.len() {
        return Err(GambitError::InvalidInput(format!(
            "matrix shape {}x{} does not match {} row ids / {} column ids",
            dmat.nrows(),
            dmat.ncols(),
            row_ids.len(),
            col_ids.len()
        )));
    }

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);

    let mut header = Vec::with_capacity(col_ids.len() + 1);
    header.push(String::new());
    header.extend(col_ids.iter().cloned());
    writer.write_record(&header)?;

    for (row_id, row) in row_ids.iter().zip(dmat.rows()) {
        let mut record = Vec::with_capacity(col_ids.len() + 1);
        record.push(row_id.clone());
        record.extend(row.iter().map(|d| format!("{d:.4}")));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Load a distance matrix written by [`dump_dmat_csv`].
///
/// Returns the matrix plus row and column IDs.
pub fn load_dmat_csv(input: &mut dyn Read) -> Result<(Array2<f32>, Vec<String>, Vec<String>)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(input);
    let mut records = reader.records();

    let header = match records.next() {
        Some(record) => record?,
        None => {
            return Err(GambitError::Format(
                "distance matrix file is empty".into(),
            ))
        }
    };
    let col_ids: Vec<String> = header.iter().skip(1).map(|s| s.to_owned()).collect();

    let mut row_ids = Vec::new();
    let mut values = Vec::new();
    for record in records {
        let record = record?;
        let mut fields = record.iter();
        let row_id = fields.next().ok_or_else(|| {
            GambitError::Format("distance matrix row is missing its ID".into())
        })?;
        row_ids.push(row_id.to_owned());

        let mut n = 0usize;
        for field in fields {
            let value: f32 = field.parse().map_err(|_| {
                GambitError::Format(format!("invalid distance value: {field:?}"))
            })?;
            values.push(value);
            n += 1;
        }
        if n != col_ids.len() {
            return Err(GambitError::Format(format!(
                "distance matrix row has {n} values, expected {}",
                col_ids.len()
            )));
        }
    }

    let dmat = Array2::from_shape_vec((row_ids.len(), col_ids.len()), values)
        .map_err(|e| GambitError::Format(format!("inconsistent distance matrix: {e}")))?;
    Ok((dmat, row_ids, col_ids))
}
