//! CSV export for completed step records.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::player::StepRecord;

/// Column header for step-record export.
const HEADER: &str = "timestep,grid_kw,community_demand_kw,hvac_setpoint,\
                       wh_setpoint,ev_charge,cost";

/// Exports step records to a CSV file at the given path.
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[StepRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(records, buf)
}

/// Writes step records as CSV to any writer. Absent values are left empty.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[StepRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    let opt = |v: Option<f64>| v.map(|v| format!("{v:.4}")).unwrap_or_default();

    wtr.write_record(HEADER.split(',').map(str::trim))?;
    for r in records {
        wtr.write_record(&[
            r.timestep.to_string(),
            format!("{:.4}", r.grid_kw),
            opt(r.community_demand),
            opt(r.overrides.hvac_setpoint),
            opt(r.overrides.wh_setpoint),
            opt(r.overrides.ev_charge),
            opt(r.cost),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
