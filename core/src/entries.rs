use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Nightscout record type for sensor glucose values.
pub const SGV_RECORD_TYPE: &str = "sgv";

/// A single CGM reading as returned by `/api/v1/entries`.
///
/// Every field except `date` is optional on the wire; uploaders disagree on
/// which fields they fill in, and some write floats where integers are expected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseReading {
    /// Nightscout document ID
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Reading time in epoch milliseconds
    #[serde(deserialize_with = "epoch_millis")]
    pub date: i64,
    /// Glucose value in mg/dL
    #[serde(default, deserialize_with = "lenient_i32", skip_serializing_if = "Option::is_none")]
    pub sgv: Option<i32>,
    /// Trend code such as "Flat" or "SingleUp"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// Change against the previous reading in mg/dL
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    /// Uploader/device identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    /// Record type ("sgv", "mbg", "cal")
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// Identity used to drop the same record when two pages overlap.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReadingKey {
    Id(String),
    Composite {
        date: i64,
        sgv: Option<i32>,
        device: Option<String>,
    },
}

impl GlucoseReading {
    pub fn key(&self) -> ReadingKey {
        match &self.id {
            Some(id) if !id.is_empty() => ReadingKey::Id(id.clone()),
            _ => ReadingKey::Composite {
                date: self.date,
                sgv: self.sgv,
                device: self.device.clone(),
            },
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.date)
    }
}

/// A half-open time range `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    start: i64,
    end: i64,
}

impl TimeWindow {
    pub fn new(start: i64, end: i64) -> Result<Self, CoreError> {
        if start >= end {
            return Err(CoreError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    /// Window covering `hours` back from `now`.
    pub fn trailing_hours(now: i64, hours: u32) -> Result<Self, CoreError> {
        Self::new(now - i64::from(hours) * 3_600_000, now)
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    /// Whole days covered, rounded down.
    pub fn whole_days(&self) -> i64 {
        (self.end - self.start) / 86_400_000
    }
}

/// A treatment record from `/api/v1/treatments` (insulin, carbs, notes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Treatment {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "created_at", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mills: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Insulin units
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub insulin: Option<f64>,
    /// Carbohydrates in grams
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub carbs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Treatment {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_deref()
            .and_then(parse_rfc3339_utc)
            .or_else(|| self.mills.and_then(DateTime::from_timestamp_millis))
    }
}

/// Insulin and carb totals over a list of treatments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TreatmentTotals {
    pub insulin_units: f64,
    pub carb_grams: f64,
}

impl TreatmentTotals {
    pub fn from_treatments(treatments: &[Treatment]) -> Self {
        treatments.iter().fold(Self::default(), |mut acc, t| {
            acc.insulin_units += t.insulin.filter(|v| *v > 0.0).unwrap_or(0.0);
            acc.carb_grams += t.carbs.filter(|v| *v > 0.0).unwrap_or(0.0);
            acc
        })
    }
}

/// A `/api/v1/devicestatus` document, reduced to the fields that get reported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    #[serde(rename = "created_at", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<UploaderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pump: Option<PumpStatus>,
}

impl DeviceStatus {
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.created_at.as_deref().and_then(parse_rfc3339_utc)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploaderStatus {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpStatus {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub reservoir: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<PumpBattery>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpBattery {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

/// `/api/v1/status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ServerSettings>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<Thresholds>,
}

/// Alarm thresholds configured on the Nightscout site, in mg/dL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub bg_high: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub bg_target_top: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub bg_target_bottom: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub bg_low: Option<f64>,
}

fn parse_rfc3339_utc(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn number_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn epoch_millis<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    if let Some(ms) = raw.as_i64() {
        return Ok(ms);
    }
    number_as_f64(&raw)
        .map(|v| v as i64)
        .ok_or_else(|| serde::de::Error::custom(format!("expected epoch milliseconds, got {raw}")))
}

fn lenient_i32<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw
        .as_ref()
        .and_then(number_as_f64)
        .map(f64::round)
        .filter(|v| *v >= f64::from(i32::MIN) && *v <= f64::from(i32::MAX))
        .map(|v| v as i32))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(number_as_f64))
}
