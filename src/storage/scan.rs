use arrow::array::BooleanArray;
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use arrow_array::TimestampNanosecondArray;
use chrono::{DateTime, Utc};

use super::{Dataset, Error, TIMESTAMP_COLUMN};

impl Dataset {
    /// Rows with `start <= timestamp <= end`; a missing bound is open.
    pub fn filter_range(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Dataset, Error> {
        if start.is_none() && end.is_none() {
            return Ok(self.clone());
        }
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Ok(Dataset::from_sorted(RecordBatch::new_empty(self.schema())));
            }
        }

        let ts = self.timestamps();
        let start = start.map(saturating_nanos);
        let end = end.map(saturating_nanos);
        let lower = start
            .map(|s| arrow_ord::cmp::gt_eq(ts, &TimestampNanosecondArray::new_scalar(s)))
            .transpose()?;
        let upper = end
            .map(|e| arrow_ord::cmp::lt_eq(ts, &TimestampNanosecondArray::new_scalar(e)))
            .transpose()?;

        let mask = match (lower, upper) {
            (Some(l), Some(u)) => arrow::compute::and(&l, &u)?,
            (Some(mask), None) | (None, Some(mask)) => mask,
            (None, None) => unreachable!(),
        };
        self.filter(&mask)
    }

    /// Rows strictly newer than `watermark`.
    pub fn filter_after(&self, watermark: DateTime<Utc>) -> Result<Dataset, Error> {
        let bound = TimestampNanosecondArray::new_scalar(to_nanos(watermark)?);
        let mask = arrow_ord::cmp::gt(self.timestamps(), &bound)?;
        self.filter(&mask)
    }

    /// Copy without the named columns. The key column is never dropped and
    /// unknown names are ignored.
    pub fn drop_columns(&self, names: &[String]) -> Result<Dataset, Error> {
        let schema = self.schema();
        let keep: Vec<usize> = schema
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| f.name() == TIMESTAMP_COLUMN || !names.contains(f.name()))
            .map(|(i, _)| i)
            .collect();

        if keep.len() == schema.fields().len() {
            return Ok(self.clone());
        }
        Ok(Dataset::from_sorted(self.batch().project(&keep)?))
    }

    fn filter(&self, mask: &BooleanArray) -> Result<Dataset, Error> {
        // Filtering preserves order, so the result stays sorted and unique.
        Ok(Dataset::from_sorted(filter_record_batch(self.batch(), mask)?))
    }
}

/// Bounds past either end of the nanosecond range pin to that end, so a very
/// early start is open and a very early end matches nothing.
fn saturating_nanos(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_nanos_opt().unwrap_or(if instant < DateTime::UNIX_EPOCH {
        i64::MIN
    } else {
        i64::MAX
    })
}

pub(crate) fn to_nanos(instant: DateTime<Utc>) -> Result<i64, Error> {
    instant.timestamp_nanos_opt().ok_or_else(|| {
        Error::ParseError(format!("{instant} is outside the nanosecond timestamp range"))
    })
}
