use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim, WriterBuilder};
use std::fs;
use std::io::Write;
use std::path::Path;

use crate::annotation::BeatAnnotation;
use crate::io::text::parse_f64_series;
use crate::rr::RRSeries;

pub const RR_HEADER: [&str; 2] = ["RRinterval", "annotation"];

/// Write RR intervals as tab-separated milliseconds with annotation codes.
pub fn write_rr_tsv<W: Write>(sink: W, series: &RRSeries) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_writer(sink);
    writer.write_record(RR_HEADER)?;
    for (rr, ann) in series.rr.iter().zip(&series.annotations) {
        writer
            .write_record([format!("{:.6}", rr * 1000.0), ann.code().to_string()])
            .context("writing RR row")?;
    }
    writer.flush().context("flushing RR export")?;
    Ok(())
}

pub fn export_rr(path: &Path, series: &RRSeries) -> Result<()> {
    let file =
        fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_rr_tsv(file, series).with_context(|| format!("exporting RR to {}", path.display()))
}

/// Parse the tab-separated export format back into seconds.
pub fn parse_rr_tsv(text: &str) -> Result<RRSeries> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());
    let mut rr = Vec::new();
    let mut annotations = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("reading RR row {}", idx + 1))?;
        let (Some(value), Some(code)) = (record.get(0), record.get(1)) else {
            anyhow::bail!("RR row {} needs an interval and an annotation", idx + 1);
        };
        let ms: f64 = value
            .parse()
            .with_context(|| format!("RR row {}: parsing interval '{}'", idx + 1, value))?;
        let code: u8 = code
            .parse()
            .with_context(|| format!("RR row {}: parsing annotation '{}'", idx + 1, code))?;
        rr.push(ms / 1000.0);
        annotations.push(BeatAnnotation::try_from(code)?);
    }
    Ok(RRSeries::new(rr, annotations)?)
}

/// Read an RR file: the export format, or a bare column of milliseconds
/// (every interval Normal).
pub fn read_rr_file(path: &Path) -> Result<RRSeries> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let first = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let series = if first.trim_start().starts_with(RR_HEADER[0]) {
        parse_rr_tsv(&text)
    } else {
        parse_f64_series(&text).map(|ms| RRSeries::from_values(ms.iter().map(|v| v / 1000.0).collect()))
    };
    series.with_context(|| format!("parsing RR file {}", path.display()))
}
