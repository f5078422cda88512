use std::time::Duration;

use clap::Args;
use nightscout_core::stats::TargetRange;
use nightscout_core::units::{GlucoseUnits, parse_glucose_threshold};
use url::Url;

use crate::error::NightscoutError;
use crate::fetcher::DEFAULT_PAGE_SIZE;
use crate::render::Locale;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection and display settings, read from flags or the environment.
#[derive(Args, Clone, Debug, Default)]
pub struct ConnectionArgs {
    /// Nightscout site URL; a token may be embedded as https://TOKEN@host
    #[arg(long = "url", env = "NIGHTSCOUT_URL")]
    pub url: Option<String>,
    /// API secret (SHA-1 or SHA-256 hex digest)
    #[arg(long, env = "NIGHTSCOUT_API_SECRET", hide_env_values = true)]
    pub api_secret: Option<String>,
    /// Display units: mmol or mgdl
    #[arg(long, env = "GLUCOSE_UNITS")]
    pub units: Option<String>,
    /// Report language: en or ru
    #[arg(long, env = "LOCALE")]
    pub locale: Option<String>,
    /// Lower bound of the target range (mg/dL, or mmol/L if below 30)
    #[arg(long, env = "GLUCOSE_LOW")]
    pub glucose_low: Option<String>,
    /// Upper bound of the target range (mg/dL, or mmol/L if below 30)
    #[arg(long, env = "GLUCOSE_HIGH")]
    pub glucose_high: Option<String>,
    /// HTTP timeout per request in seconds
    #[arg(long, env = "NIGHTSCOUT_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout_secs: u64,
    /// Months fetched in parallel by analyze_monthly (1 = sequential)
    #[arg(long, env = "NIGHTSCOUT_MONTHLY_CONCURRENCY", default_value_t = 1)]
    pub monthly_concurrency: usize,
}

/// Immutable runtime configuration, built once and shared by reference.
#[derive(Debug, Clone)]
pub struct NightscoutConfig {
    /// Site root without credentials or trailing slash; `None` when unset
    pub base_url: Option<Url>,
    /// Access token sent as the `token` query parameter
    pub token: Option<String>,
    /// Hashed API secret sent as the `api-secret` header
    pub api_secret: Option<String>,
    pub units: GlucoseUnits,
    pub locale: Locale,
    pub target: TargetRange,
    pub request_timeout: Duration,
    pub page_size: usize,
    pub monthly_concurrency: usize,
}

impl Default for NightscoutConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            token: None,
            api_secret: None,
            units: GlucoseUnits::default(),
            locale: Locale::default(),
            target: TargetRange::default(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            monthly_concurrency: 1,
        }
    }
}

impl NightscoutConfig {
    /// Config pointing at `url` with every other setting at its default.
    pub fn for_url(url: &str) -> Result<Self, NightscoutError> {
        let (base_url, token) = parse_nightscout_url(url)?;
        Ok(Self {
            base_url: Some(base_url),
            token,
            ..Self::default()
        })
    }

    pub fn from_args(args: &ConnectionArgs) -> Result<Self, NightscoutError> {
        let (base_url, token) = match args.url.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                let (url, token) = parse_nightscout_url(raw)?;
                (Some(url), token)
            }
            _ => (None, None),
        };

        let units = match args.units.as_deref() {
            None => GlucoseUnits::default(),
            Some(raw) => raw.parse().unwrap_or_else(|err: String| {
                tracing::warn!("{err}; falling back to mmol");
                GlucoseUnits::default()
            }),
        };
        let locale = args
            .locale
            .as_deref()
            .map(Locale::from_code)
            .unwrap_or_default();

        let defaults = TargetRange::default();
        let low = parse_glucose_threshold(args.glucose_low.as_deref(), defaults.low);
        let high = parse_glucose_threshold(args.glucose_high.as_deref(), defaults.high);
        let target = TargetRange::new(low, high).unwrap_or_else(|| {
            tracing::warn!(low, high, "target range must satisfy 54 <= low <= high <= 180 mg/dL; using 70-140");
            defaults
        });

        Ok(Self {
            base_url,
            token,
            api_secret: args
                .api_secret
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            units,
            locale,
            target,
            request_timeout: Duration::from_secs(args.timeout_secs.max(1)),
            page_size: DEFAULT_PAGE_SIZE,
            monthly_concurrency: args.monthly_concurrency.clamp(1, 12),
        })
    }

    /// Fails with a configuration error when no site URL is set.
    pub fn require_base_url(&self) -> Result<&Url, NightscoutError> {
        self.base_url.as_ref().ok_or_else(|| {
            NightscoutError::Configuration("NIGHTSCOUT_URL environment variable is not set".to_string())
        })
    }

    /// The secret is only forwarded when it already looks like a SHA-1 or
    /// SHA-256 hex digest; Nightscout rejects plaintext in the header.
    pub fn api_secret_header(&self) -> Option<&str> {
        self.api_secret
            .as_deref()
            .filter(|s| matches!(s.len(), 40 | 64) && s.chars().all(|c| c.is_ascii_hexdigit()))
    }
}

/// Split `https://TOKEN@host:port/path/` into a clean base URL and token.
pub fn parse_nightscout_url(raw: &str) -> Result<(Url, Option<String>), NightscoutError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| NightscoutError::Configuration(format!("Invalid NIGHTSCOUT_URL '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(NightscoutError::Configuration(format!(
            "NIGHTSCOUT_URL must be an http(s) URL with a host, got '{raw}'"
        )));
    }

    let token = Some(url.username().to_string()).filter(|u| !u.is_empty());
    // Url setters only fail for cannot-be-a-base URLs, excluded above.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);

    Ok((url, token))
}
