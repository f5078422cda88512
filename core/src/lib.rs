//! Domain layer for the Nightscout MCP server: the records fetched from a
//! Nightscout instance, date expressions, glucose statistics and the
//! period roll-up math. Nothing in this crate performs I/O.

pub mod dates;
pub mod entries;
pub mod error;
pub mod rollup;
pub mod stats;
pub mod units;

pub use entries::{GlucoseReading, TimeWindow};
pub use error::CoreError;
pub use stats::{StatisticsSummary, TargetRange, compute_statistics};
