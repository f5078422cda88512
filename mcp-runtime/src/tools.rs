use std::sync::Arc;

use chrono::{DateTime, Utc};
use nightscout_core::TimeWindow;
use nightscout_core::dates::{DateExpr, analysis_window};
use nightscout_core::entries::{GlucoseReading, TreatmentTotals};
use nightscout_core::stats::{MIN_VALID_GLUCOSE_MGDL, compute_statistics_in_range};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::ToolError;
use crate::aggregate::{AggregateOptions, aggregate_monthly, aggregate_range};
use crate::client::NightscoutClient;
use crate::config::NightscoutConfig;
use crate::error::NightscoutError;
use crate::fetcher::fetch_range;
use crate::render::Renderer;
use crate::util::{arg_optional_string, arg_string, arg_u32_in_range, required_u32_in_range};

/// Fewer valid samples than this and `analyze` declines to report.
pub const MIN_ANALYSIS_SAMPLES: usize = 10;

const HOUR_MS: i64 = 3_600_000;

pub type Clock = fn() -> i64;

pub fn system_clock() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "glucose_current",
            description: "Get the current blood glucose reading from Nightscout",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: "glucose_history",
            description: "Get blood glucose history for a specified time period",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "hours": {
                        "type": "number",
                        "description": "Number of hours of history (1-720, i.e. up to 30 days)",
                        "default": 6,
                        "minimum": 1,
                        "maximum": 720
                    },
                    "count": {
                        "type": "number",
                        "description": "Maximum readings to show in output",
                        "default": 100,
                        "minimum": 1,
                        "maximum": 1000
                    }
                }
            }),
        },
        ToolDefinition {
            name: "analyze",
            description: "Analyze glucose patterns for any date range. Supports dates (YYYY-MM-DD), months (YYYY-MM), or relative periods (7d, 2w, 3m, 1y)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "from": {
                        "type": "string",
                        "description": "Start date: YYYY-MM-DD, YYYY-MM, or relative (7d, 2w, 3m, 1y)",
                        "default": "7d"
                    },
                    "to": {
                        "type": "string",
                        "description": "End date (optional, defaults to now): YYYY-MM-DD or YYYY-MM"
                    },
                    "tirGoal": {
                        "type": "number",
                        "description": "TIR goal percentage",
                        "default": 70,
                        "minimum": 50,
                        "maximum": 100
                    }
                }
            }),
        },
        ToolDefinition {
            name: "analyze_monthly",
            description: "Analyze glucose data broken down by month. Great for yearly reviews.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "year": {
                        "type": "number",
                        "description": "Year to analyze",
                        "minimum": 2015,
                        "maximum": 2030
                    },
                    "fromMonth": {
                        "type": "number",
                        "description": "Starting month (1-12)",
                        "default": 1,
                        "minimum": 1,
                        "maximum": 12
                    },
                    "toMonth": {
                        "type": "number",
                        "description": "Ending month (1-12)",
                        "default": 12,
                        "minimum": 1,
                        "maximum": 12
                    },
                    "tirGoal": {
                        "type": "number",
                        "description": "TIR goal percentage",
                        "default": 85,
                        "minimum": 50,
                        "maximum": 100
                    }
                },
                "required": ["year"]
            }),
        },
        ToolDefinition {
            name: "treatments",
            description: "Get recent treatments (insulin doses, carbs, etc.)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "hours": {
                        "type": "number",
                        "description": "Hours of history (up to 7 days)",
                        "default": 24,
                        "minimum": 1,
                        "maximum": 168
                    },
                    "count": {
                        "type": "number",
                        "description": "Maximum treatments to return",
                        "default": 50,
                        "minimum": 1,
                        "maximum": 200
                    }
                }
            }),
        },
        ToolDefinition {
            name: "status",
            description: "Get Nightscout server status and settings",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        ToolDefinition {
            name: "devices",
            description: "Get status of connected devices (pump, CGM, phone)",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "count": {
                        "type": "number",
                        "description": "Number of device status entries",
                        "default": 5,
                        "minimum": 1,
                        "maximum": 20
                    }
                }
            }),
        },
    ]
}

/// A rendered report plus the structured data behind it.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub text: String,
    pub data: Value,
}

/// Runs tools against one Nightscout site.
pub struct NightscoutTools {
    client: NightscoutClient,
    renderer: Renderer,
    options: AggregateOptions,
    clock: Clock,
}

impl NightscoutTools {
    pub fn new(config: Arc<NightscoutConfig>) -> Result<Self, NightscoutError> {
        let renderer = Renderer::from_config(&config);
        let options = AggregateOptions {
            page_size: config.page_size,
            target: config.target,
            concurrency: config.monthly_concurrency,
        };
        Ok(Self {
            client: NightscoutClient::new(config)?,
            renderer,
            options,
            clock: system_clock,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &NightscoutClient {
        &self.client
    }

    /// Text shown to the model for a failed call.
    pub fn error_text(&self, error: &ToolError) -> String {
        if error.code == "unknown_tool" {
            error.message.clone()
        } else {
            self.renderer.error(&error.message)
        }
    }

    pub async fn call(
        &self,
        name: &str,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        tracing::debug!(tool = name, "tool call");
        match name {
            "glucose_current" => self.glucose_current(cancel).await,
            "glucose_history" => self.glucose_history(args, cancel).await,
            "analyze" => self.analyze(args, cancel).await,
            "analyze_monthly" => self.analyze_monthly(args, cancel).await,
            "treatments" => self.treatments(args, cancel).await,
            "status" => self.status(cancel).await,
            "devices" => self.devices(args, cancel).await,
            _ => Err(ToolError::new("unknown_tool", self.renderer.unknown_tool(name)).with_field("name")),
        }
    }

    async fn glucose_current(&self, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let entries = self.client.latest_entries(1, cancel).await?;
        let reading = entries.first();
        Ok(ToolOutput {
            text: self.renderer.current(reading),
            data: json!({ "reading": reading }),
        })
    }

    async fn glucose_history(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let hours = arg_u32_in_range(args, "hours", 6, 1, 720)?;
        let count = arg_u32_in_range(args, "count", 100, 1, 1000)?;
        let window = TimeWindow::trailing_hours((self.clock)(), hours).map_err(NightscoutError::from)?;

        let fetch = fetch_range(&self.client, window, self.options.page_size, cancel).await?;
        let mut valid: Vec<&GlucoseReading> = fetch
            .readings
            .iter()
            .filter(|r| r.sgv.is_some_and(|v| v >= MIN_VALID_GLUCOSE_MGDL))
            .collect();
        valid.sort_by(|a, b| b.date.cmp(&a.date));
        let values: Vec<i32> = valid.iter().filter_map(|r| r.sgv).collect();

        let Some(summary) = compute_statistics_in_range(&values, &self.options.target) else {
            return Ok(ToolOutput {
                text: self.renderer.no_data_hours(hours),
                data: json!({ "hours": hours, "window": window, "summary": null }),
            });
        };

        let listed: Vec<&GlucoseReading> = valid.iter().take(count as usize).copied().collect();
        Ok(ToolOutput {
            text: self
                .renderer
                .history(hours, count, &valid, &summary, fetch.truncated),
            data: json!({
                "hours": hours,
                "window": window,
                "pages": fetch.pages,
                "truncated": fetch.truncated,
                "summary": summary,
                "readings": listed,
            }),
        })
    }

    async fn analyze(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let from = arg_string(args, "from", "7d")?;
        let to = arg_optional_string(args, "to")?;
        let tir_goal = arg_u32_in_range(args, "tirGoal", 70, 50, 100)?;
        let window = analysis_window(&from, to.as_deref(), (self.clock)()).map_err(|err| {
            let field = match (&to, DateExpr::parse(&from)) {
                (Some(_), Ok(_)) => "to",
                _ => "from",
            };
            ToolError::from(NightscoutError::from(err)).with_field(field)
        })?;

        let analysis = aggregate_range(&self.client, window, &self.options, cancel).await?;
        let data = json!({
            "window": analysis.window,
            "readings": analysis.readings,
            "pages": analysis.pages,
            "truncated": analysis.truncated,
            "tir_goal": tir_goal,
            "summary": analysis.summary,
        });
        let text = match &analysis.summary {
            Some(summary) if summary.sample_count >= MIN_ANALYSIS_SAMPLES => {
                self.renderer.analysis(&analysis, summary, tir_goal)
            }
            _ => self.renderer.not_enough_data(),
        };
        Ok(ToolOutput { text, data })
    }

    async fn analyze_monthly(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let year = required_u32_in_range(args, "year", 2015, 2030)?;
        let from_month = arg_u32_in_range(args, "fromMonth", 1, 1, 12)?;
        let to_month = arg_u32_in_range(args, "toMonth", 12, 1, 12)?;
        let tir_goal = arg_u32_in_range(args, "tirGoal", 85, 50, 100)?;
        if from_month > to_month {
            return Err(ToolError::new(
                "validation_failed",
                format!("'fromMonth' ({from_month}) must not be after 'toMonth' ({to_month})"),
            )
            .with_field("fromMonth"));
        }

        // year is bounded to 2015..=2030 above
        let report = aggregate_monthly(
            &self.client,
            year as i32,
            from_month,
            to_month,
            tir_goal,
            &self.options,
            cancel,
        )
        .await?;
        Ok(ToolOutput {
            text: self.renderer.monthly(&report),
            data: json!(report),
        })
    }

    async fn treatments(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let hours = arg_u32_in_range(args, "hours", 24, 1, 168)?;
        let count = arg_u32_in_range(args, "count", 50, 1, 200)?;
        let since = DateTime::from_timestamp_millis((self.clock)() - i64::from(hours) * HOUR_MS)
            .unwrap_or_default();

        let treatments = self.client.treatments_since(since, count, cancel).await?;
        let totals = TreatmentTotals::from_treatments(&treatments);
        Ok(ToolOutput {
            text: self.renderer.treatments(hours, &treatments),
            data: json!({
                "hours": hours,
                "since": since,
                "treatments": treatments,
                "totals": totals,
            }),
        })
    }

    async fn status(&self, cancel: &CancellationToken) -> Result<ToolOutput, ToolError> {
        let status = self.client.status(cancel).await?;
        Ok(ToolOutput {
            text: self.renderer.status(&status),
            data: json!(status),
        })
    }

    async fn devices(
        &self,
        args: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolOutput, ToolError> {
        let count = arg_u32_in_range(args, "count", 5, 1, 20)?;
        let statuses = self.client.device_status(count, cancel).await?;
        Ok(ToolOutput {
            text: self.renderer.devices(&statuses),
            data: json!({ "devices": statuses }),
        })
    }
}
