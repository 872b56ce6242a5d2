use crate::core::timeseries::{TimeSeries, TimeSeriesEntry};
use crate::types::NdviResult;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Serialize)]
struct Row {
    date: String,
    ndvi: Option<f64>,
}

/// Write `date,ndvi` rows; undefined values become empty cells
pub fn write_series<W: Write>(writer: W, series: &TimeSeries) -> NdviResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for entry in series.iter() {
        csv.serialize(Row {
            date: entry.timestamp.to_rfc3339(),
            ndvi: entry.value,
        })?;
    }
    csv.flush()?;
    Ok(())
}

pub fn write_series_file(path: impl AsRef<Path>, series: &TimeSeries) -> NdviResult<()> {
    let file = std::fs::File::create(path.as_ref())?;
    write_series(file, series)
}

/// Accepts RFC 3339, `YYYY-MM-DD` and chart exports such as `Jan 5, 2018`
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d", "%b %e, %Y", "%b %d, %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .map(|date| date.and_time(NaiveTime::MIN).and_utc())
}

fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Read a two-column date/value table into a series named `site`.
///
/// The header row is skipped whatever it says, so chart downloads headed
/// `system:time_start,NDVI` read the same as `date,ndvi`. Rows with unreadable
/// dates are skipped; empty or non-numeric values are undefined.
pub fn read_series<R: Read>(reader: R, site: &str) -> NdviResult<TimeSeries> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut entries = Vec::new();
    for (line, record) in csv.records().enumerate() {
        let record = record?;
        let date = record.get(0).unwrap_or_default();
        let Some(timestamp) = parse_date(date) else {
            log::warn!("Skipping row {} of '{}': unreadable date '{}'", line + 2, site, date);
            continue;
        };
        entries.push(TimeSeriesEntry {
            timestamp,
            image_id: String::new(),
            value: record.get(1).and_then(parse_value),
        });
    }

    log::debug!("Read {} entries for '{}'", entries.len(), site);
    Ok(TimeSeries::from_entries(site, entries))
}

pub fn read_series_file(path: impl AsRef<Path>, site: &str) -> NdviResult<TimeSeries> {
    let file = std::fs::File::open(path.as_ref())?;
    read_series(file, site)
}
