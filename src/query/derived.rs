use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use chrono::TimeDelta;

use crate::storage::{Dataset, Error};

/// A trailing mean of `source` written to `output`.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingMean {
    pub source: String,
    pub output: String,
    pub window: TimeDelta,
}

impl RollingMean {
    pub fn new(source: impl Into<String>, output: impl Into<String>, window: TimeDelta) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            window,
        }
    }

    /// The pH moving averages shown on the dashboard.
    pub fn defaults() -> Vec<RollingMean> {
        vec![
            RollingMean::new("ph_corrected", "ph_corrected_ma", TimeDelta::minutes(2)),
            RollingMean::new("ph_total", "ph_total_ma", TimeDelta::minutes(2)),
        ]
    }
}

/// Adds every rolling mean whose source column is present.
///
/// Runs over the whole dataset so a later range filter still sees averages
/// that include samples just before the window start.
pub fn apply_rolling_means(dataset: &Dataset, specs: &[RollingMean]) -> Result<Dataset, Error> {
    let mut out = dataset.clone();
    for spec in specs {
        let Some(source) = out.column(&spec.source) else {
            continue;
        };
        if !source.data_type().is_numeric() {
            log::warn!("Skipping rolling mean of non-numeric column {}", spec.source);
            continue;
        }

        let values = cast(source.as_ref(), &DataType::Float64)?;
        let mut means = trailing_mean(
            out.timestamps().values(),
            values.as_primitive::<Float64Type>(),
            spec.window.num_nanoseconds().unwrap_or(i64::MAX),
        );

        // Values already stored under the derived name win over computed ones.
        if let Some(existing) = out.column(&spec.output) {
            let existing = cast(existing.as_ref(), &DataType::Float64)?;
            let existing = existing.as_primitive::<Float64Type>();
            for (i, mean) in means.iter_mut().enumerate() {
                if existing.is_valid(i) {
                    *mean = Some(existing.value(i));
                }
            }
        }

        let array: ArrayRef = Arc::new(Float64Array::from(means));
        out = out.with_column(&spec.output, array)?;
    }
    Ok(out)
}

/// Mean of the non-null values in `(t - window, t]` for every row.
fn trailing_mean(ts: &[i64], values: &Float64Array, window: i64) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(ts.len());
    let mut lo = 0usize;
    let mut sum = 0.0;
    let mut count = 0usize;

    for hi in 0..ts.len() {
        if values.is_valid(hi) {
            sum += values.value(hi);
            count += 1;
        }
        let cutoff = ts[hi].saturating_sub(window);
        while lo <= hi && ts[lo] <= cutoff {
            if values.is_valid(lo) {
                sum -= values.value(lo);
                count -= 1;
            }
            lo += 1;
        }
        if count == 0 {
            sum = 0.0;
        }
        out.push((count > 0).then(|| sum / count as f64));
    }
    out
}
