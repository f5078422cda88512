use nightscout_core::CoreError;
use thiserror::Error;

/// Failures of the Nightscout-facing runtime.
///
/// The monthly aggregator isolates per-period failures except `Cancelled` and
/// `Configuration`, which abort the whole batch.
#[derive(Debug, Error)]
pub enum NightscoutError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Nightscout returned HTTP {status} for {path}")]
    Transport { status: u16, path: String },
    #[error("Failed to reach Nightscout: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Unexpected response from {path}: {message}")]
    Decode { path: String, message: String },
    #[error("Request cancelled")]
    Cancelled,
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl NightscoutError {
    pub fn code(&self) -> &'static str {
        match self {
            NightscoutError::Configuration(_) => "configuration_error",
            NightscoutError::Transport { .. } => "transport_error",
            NightscoutError::Request(_) => "connection_error",
            NightscoutError::Decode { .. } => "decode_error",
            NightscoutError::Cancelled => "cancelled",
            NightscoutError::Core(err) => err.code(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NightscoutError::Cancelled)
    }

    pub fn docs_hint(&self) -> Option<&'static str> {
        match self {
            NightscoutError::Configuration(_) => {
                Some("Set NIGHTSCOUT_URL (e.g. https://TOKEN@your-site.example.com).")
            }
            NightscoutError::Transport { status: 401, .. } => Some(
                "Check the access token in NIGHTSCOUT_URL or NIGHTSCOUT_API_SECRET (SHA-1 hash).",
            ),
            NightscoutError::Request(_) => {
                Some("Ensure the Nightscout site is reachable and NIGHTSCOUT_URL points to it.")
            }
            NightscoutError::Core(_) => {
                Some("Dates accept YYYY-MM-DD, YYYY-MM or relative periods like 7d, 2w, 3m, 1y.")
            }
            _ => None,
        }
    }
}
