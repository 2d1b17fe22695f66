//! In-memory, time-ordered sensor dataset and the lock-guarded store that owns it

mod dataset;
mod errors;
mod scan;
mod store;

#[cfg(test)]
mod tests;

pub use dataset::{timestamp_field, timestamp_type, Dataset, TIMESTAMP_COLUMN};
pub use errors::Error;
pub use store::{DatasetStore, MergeOutcome, StoreStats};
