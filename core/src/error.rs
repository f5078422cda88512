use thiserror::Error;

/// Errors raised by the pure domain layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// None of the supported date grammars matched
    #[error("Invalid date format: '{0}' (expected YYYY-MM-DD, YYYY-MM or a relative period like 7d, 2w, 3m, 1y)")]
    InvalidDateFormat(String),
    /// A time window whose start is not strictly before its end
    #[error("Invalid time window: start {start} must be before end {end}")]
    InvalidWindow { start: i64, end: i64 },
    /// A calendar month that does not exist
    #[error("Invalid month {year}-{month:02}")]
    InvalidMonth { year: i32, month: u32 },
}

/// Error codes surfaced to MCP clients for domain failures
pub mod codes {
    pub const INVALID_DATE_FORMAT: &str = "invalid_date_format";
    pub const INVALID_WINDOW: &str = "invalid_window";
    pub const INVALID_MONTH: &str = "invalid_month";
}

impl CoreError {
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::InvalidDateFormat(_) => codes::INVALID_DATE_FORMAT,
            CoreError::InvalidWindow { .. } => codes::INVALID_WINDOW,
            CoreError::InvalidMonth { .. } => codes::INVALID_MONTH,
        }
    }
}
