//! Query Engine: range-filtered, optionally downsampled views of a dataset
//! snapshot, with rolling means derived over the full history first.

use chrono::{DateTime, Utc};

use crate::storage::{Dataset, Error};

mod derived;
mod resample;
mod time;
mod view;

#[cfg(test)]
mod tests;

pub use derived::{apply_rolling_means, RollingMean};
pub use resample::resample;
pub use time::{parse_bound, Frequency};
pub use view::View;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid resample frequency: {0}")]
    InvalidFrequency(String),
    #[error("invalid time bound: {0}")]
    InvalidBound(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Frequency string, see [`Frequency`]. Unparseable values are ignored.
    pub resample: Option<String>,
}

impl QueryRequest {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>, resample: Option<&str>) -> Self {
        Self {
            start,
            end,
            resample: resample.map(String::from),
        }
    }
}

pub struct QueryEngine {
    rolling: Vec<RollingMean>,
    tag_columns: Vec<String>,
}

impl QueryEngine {
    pub fn new(rolling: Vec<RollingMean>, tag_columns: Vec<String>) -> Self {
        Self { rolling, tag_columns }
    }

    /// Derives, filters, drops tags and resamples. `snapshot` is never
    /// modified; the view owns its own copy.
    pub fn execute(&self, snapshot: &Dataset, request: &QueryRequest) -> Result<View, Error> {
        if snapshot.is_empty() {
            return Ok(View::default());
        }

        let derived = apply_rolling_means(snapshot, &self.rolling)?;
        let filtered = derived
            .filter_range(request.start, request.end)?
            .drop_columns(&self.tag_columns)?;

        let Some(freq) = request.resample.as_deref().and_then(|s| self.frequency(s)) else {
            return Ok(View::new(filtered, None));
        };

        // The native interval comes from the full history, not the window.
        match snapshot.median_interval() {
            Some(native) if freq.interval() > native => {
                let resampled = resample(&filtered, freq, request.start)?;
                log::debug!(
                    "Resampled {} rows to {} at {}",
                    filtered.num_rows(),
                    resampled.num_rows(),
                    freq
                );
                Ok(View::new(resampled, Some(freq.interval())))
            }
            Some(native) => {
                log::info!(
                    "Skipping resample to {}: not coarser than the native interval {}",
                    freq,
                    native
                );
                Ok(View::new(filtered, None))
            }
            None => {
                log::debug!("Skipping resample: fewer than two samples");
                Ok(View::new(filtered, None))
            }
        }
    }

    fn frequency(&self, s: &str) -> Option<Frequency> {
        match s.parse::<Frequency>() {
            Ok(freq) => Some(freq),
            Err(err) => {
                log::warn!("{err}; returning unresampled data");
                None
            }
        }
    }
}
