//! Export the inverted block model as CSV columns.
//!
//! One row per layer, depth being the layer top. Bound columns are written only
//! when the result carries an uncertainty estimate.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::domain::InversionResult;
use crate::error::InversionError;

const COLUMNS: [&str; 3] = ["depth", "waterContent", "T2*"];
const BOUND_COLUMNS: [&str; 6] = [
    "depthLower",
    "depthUpper",
    "waterContentLower",
    "waterContentUpper",
    "T2*Lower",
    "T2*Upper",
];

/// Write the layer columns of `result` to `path`.
pub fn write_model_csv(path: &Path, result: &InversionResult) -> Result<(), InversionError> {
    let file = File::create(path)
        .map_err(|e| InversionError::io(format!("failed to create model CSV '{}'", path.display()), e))?;
    write_model_columns(file, result)
}

/// Write the layer columns of `result` to any writer.
pub fn write_model_columns<W: Write>(writer: W, result: &InversionResult) -> Result<(), InversionError> {
    let mut csv = csv::Writer::from_writer(writer);
    let rows = result.layer_rows();
    let with_bounds = result.uncertainty.is_some();

    let mut header: Vec<&str> = COLUMNS.to_vec();
    if with_bounds {
        header.extend(BOUND_COLUMNS);
    }
    csv.write_record(&header).map_err(csv_error)?;

    for row in rows {
        let mut record = vec![
            format!("{:.4}", row.depth),
            format!("{:.6}", row.water_content),
            format!("{:.6}", row.relaxation_time),
        ];
        if let Some(b) = row.bounds {
            record.extend([
                format!("{:.4}", b.depth.0),
                format!("{:.4}", b.depth.1),
                format!("{:.6}", b.water_content.0),
                format!("{:.6}", b.water_content.1),
                format!("{:.6}", b.relaxation_time.0),
                format!("{:.6}", b.relaxation_time.1),
            ]);
        }
        csv.write_record(&record).map_err(csv_error)?;
    }

    csv.flush()
        .map_err(|e| InversionError::io("failed to flush model CSV", e))
}

fn csv_error(e: csv::Error) -> InversionError {
    InversionError::io("failed to write model CSV", e)
}
