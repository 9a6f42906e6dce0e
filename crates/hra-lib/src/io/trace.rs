use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use std::io::Read;
use std::path::Path;

use crate::signal::Trace;

/// Load a two-column ECG CSV (time in seconds, voltage) with a header row.
pub fn read_trace_csv(path: &Path) -> Result<Trace> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;
    parse_trace(reader).with_context(|| format!("reading trace {}", path.display()))
}

/// Same as [`read_trace_csv`] for an in-memory or streamed source.
pub fn read_trace_from<R: Read>(source: R) -> Result<Trace> {
    let reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(source);
    parse_trace(reader)
}

fn parse_trace<R: Read>(mut reader: csv::Reader<R>) -> Result<Trace> {
    let mut time = Vec::new();
    let mut voltage = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading row {}", idx + 1))?;
        let field = |col: usize, name: &str| -> Result<f64> {
            let raw = record
                .get(col)
                .ok_or_else(|| anyhow::anyhow!("row {} has no {} column", idx + 1, name))?;
            raw.parse::<f64>()
                .with_context(|| format!("row {}: parsing {} '{}'", idx + 1, name, raw))
        };
        time.push(field(0, "time")?);
        voltage.push(field(1, "voltage")?);
    }
    if time.is_empty() {
        anyhow::bail!("trace has no samples");
    }
    Ok(Trace::new(time, voltage)?)
}
