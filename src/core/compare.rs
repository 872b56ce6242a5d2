use crate::core::timeseries::TimeSeries;
use crate::types::{NdviError, NdviResult};
use chrono::{DateTime, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Side of the event an observation falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Period {
    Before,
    After,
}

/// Five-number summary plus mean, as drawn by a box plot
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStats {
    pub count: usize,
    pub mean: f64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
}

impl SummaryStats {
    /// `None` for an empty sample
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let count = sorted.len();

        Some(Self {
            count,
            mean: sorted.iter().sum::<f64>() / count as f64,
            min: sorted[0],
            q1: quantile(&sorted, 0.25),
            median: quantile(&sorted, 0.5),
            q3: quantile(&sorted, 0.75),
            max: sorted[count - 1],
        })
    }
}

/// Linear-interpolation quantile of a sorted, non-empty sample
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Symmetric window of whole months around an event date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventWindow {
    pub event: NaiveDate,
    pub months: u32,
}

impl EventWindow {
    pub fn new(event: NaiveDate, months: u32) -> Self {
        Self { event, months }
    }

    /// Hurricane Irma landfall, six months either side
    pub fn hurricane_irma() -> Self {
        Self {
            event: NaiveDate::from_ymd_opt(2017, 9, 6).unwrap_or_default(),
            months: 6,
        }
    }

    fn midnight(date: NaiveDate) -> DateTime<Utc> {
        date.and_time(chrono::NaiveTime::MIN).and_utc()
    }

    /// Inclusive (start, end) instants of the window
    pub fn bounds(&self) -> NdviResult<(DateTime<Utc>, DateTime<Utc>)> {
        let span = Months::new(self.months);
        let start = self.event.checked_sub_months(span);
        let end = self.event.checked_add_months(span);
        match (start, end) {
            (Some(start), Some(end)) => Ok((Self::midnight(start), Self::midnight(end))),
            _ => Err(NdviError::InvalidParameter(format!(
                "{} months around {} is out of range",
                self.months, self.event
            ))),
        }
    }

    /// Period of `timestamp`, or `None` outside the window
    pub fn classify(&self, timestamp: DateTime<Utc>) -> NdviResult<Option<Period>> {
        let (start, end) = self.bounds()?;
        if timestamp < start || timestamp > end {
            return Ok(None);
        }
        Ok(Some(if timestamp < Self::midnight(self.event) {
            Period::Before
        } else {
            Period::After
        }))
    }
}

/// Before/after summary of one site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteComparison {
    pub site: String,
    pub before: Option<SummaryStats>,
    pub after: Option<SummaryStats>,
}

impl SiteComparison {
    pub fn get(&self, period: Period) -> Option<&SummaryStats> {
        match period {
            Period::Before => self.before.as_ref(),
            Period::After => self.after.as_ref(),
        }
    }

    /// After-minus-before change of the median NDVI
    pub fn median_change(&self) -> Option<f64> {
        Some(self.after?.median - self.before?.median)
    }
}

/// Summarise each series before and after the event; undefined entries are skipped
pub fn compare_event<'a, I>(series: I, window: &EventWindow) -> NdviResult<Vec<SiteComparison>>
where
    I: IntoIterator<Item = &'a TimeSeries>,
{
    let (start, end) = window.bounds()?;
    log::info!("Comparing NDVI {} .. {} around {}", start.date_naive(), end.date_naive(), window.event);

    series
        .into_iter()
        .map(|s| {
            let mut before = Vec::new();
            let mut after = Vec::new();
            for entry in s.iter() {
                let Some(value) = entry.value else { continue };
                match window.classify(entry.timestamp)? {
                    Some(Period::Before) => before.push(value),
                    Some(Period::After) => after.push(value),
                    None => {}
                }
            }
            log::debug!("Site '{}': {} before, {} after", s.site, before.len(), after.len());
            Ok(SiteComparison {
                site: s.site.clone(),
                before: SummaryStats::from_values(&before),
                after: SummaryStats::from_values(&after),
            })
        })
        .collect()
}
