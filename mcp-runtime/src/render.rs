//! Localized plain-text reports for every tool.
//!
//! All values arrive in mg/dL and are converted to the configured display
//! units here. Templates use `{name}` placeholders.

use std::fmt::Display;

use chrono::{DateTime, Utc};
use nightscout_core::entries::{DeviceStatus, GlucoseReading, ServerStatus, Treatment, TreatmentTotals};
use nightscout_core::rollup::{PeriodOutcome, Rollup, TrendComparison, TrendDirection, TREND_EDGE_PERIODS};
use nightscout_core::stats::{StatisticsSummary, TargetRange, VERY_LOW_BELOW_MGDL};
use nightscout_core::units::{GlucoseUnits, direction_arrow};
use serde::Serialize;

use crate::aggregate::{MonthlyReport, RangeAnalysis};
use crate::config::NightscoutConfig;

/// Newest readings listed in a history report.
pub const HISTORY_LIST_MAX: usize = 15;
/// TIR below this is flagged red even when no goal is met.
const TIR_FLOOR: f64 = 70.0;
const CV_EXCELLENT_MAX: f64 = 33.0;
const CV_GOOD_MAX: f64 = 36.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    En,
    Ru,
}

impl Locale {
    /// Anything other than `ru` renders in English.
    pub fn from_code(code: &str) -> Self {
        if code.trim().eq_ignore_ascii_case("ru") {
            Locale::Ru
        } else {
            Locale::En
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Ru => "ru",
        }
    }

    fn catalog(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Locale::En => EN,
            Locale::Ru => RU,
        }
    }

    fn month_names(self) -> &'static [&'static str; 12] {
        match self {
            Locale::En => &[
                "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
            ],
            Locale::Ru => &[
                "Янв", "Фев", "Мар", "Апр", "Май", "Июн", "Июл", "Авг", "Сен", "Окт", "Ноя", "Дек",
            ],
        }
    }

    pub fn month_name(self, month: u32) -> &'static str {
        month
            .checked_sub(1)
            .and_then(|i| self.month_names().get(i as usize))
            .copied()
            .unwrap_or("?")
    }
}

const EN: &[(&str, &str)] = &[
    ("unknown_tool", "Unknown tool: {name}"),
    ("error", "Error: {error}"),
    ("no_glucose", "No glucose readings available"),
    ("current_glucose", "Current glucose: {value} {arrow}"),
    ("time_utc", "Time: {time} UTC"),
    ("delta", "Delta: {sign}{delta}"),
    ("device", "Device: {device}"),
    ("history_title", "Glucose history for {hours}h ({count} readings)"),
    ("statistics", "Statistics:"),
    ("average", "Average: {value}"),
    ("min_max", "Min/Max: {min}–{max}"),
    ("tir", "TIR ({range}): {value}%"),
    ("cv", "CV: {value}%"),
    ("recent_readings", "Recent readings:"),
    ("more_readings", "... and {count} more readings"),
    ("no_data_hours", "No data for the last {hours} hours"),
    ("not_enough_data", "Not enough data for analysis"),
    ("analysis_title", "Glucose Analysis: {from_date} — {to_date} ({days} days, {count} readings)"),
    ("key_metrics", "Key Metrics:"),
    ("avg_glucose", "Average glucose: {value}"),
    ("std_dev", "Standard deviation: {value}"),
    ("estimated_a1c", "Estimated HbA1c: {value}%"),
    ("time_in_ranges", "Time in Ranges:"),
    ("severe_hypo", "Severe hypo (<3.0 mmol): {value}% (goal <1%)"),
    ("hypo", "Hypoglycemia ({range}): {value}% (goal <4%)"),
    ("in_target", "In target ({range}): {value}% {status} (goal ≥{goal}%)"),
    ("above_target", "Above target: {value}%"),
    ("high", "High (10.0-13.9 mmol): {value}%"),
    ("very_high", "Very high (>13.9 mmol): {value}% (goal <5%)"),
    ("assessment", "Assessment:"),
    ("tir_goal_met", "✅ TIR goal of {goal}% achieved!"),
    ("tir_goal_away", "⚠️ {diff}% away from TIR goal of {goal}%"),
    ("cv_excellent", "✅ Excellent glucose stability"),
    ("cv_good", "📊 Good stability"),
    ("cv_high", "⚠️ High variability"),
    ("fetch_truncated", "⚠️ Page limit reached, data may be incomplete"),
    ("monthly_title", "Glucose Analysis for {year} (TIR goal: {goal}%)"),
    ("month_header", "Month │  TIR ({range})  │  Avg  │   CV   │  A1c  │ Readings"),
    ("no_data", "No data"),
    ("summary", "SUMMARY ({months} months, {count} readings)"),
    ("avg_tir", "Average TIR ({range}): {value}% — {status}"),
    ("goal_met", "✅ GOAL MET"),
    ("to_goal", "⚠️ {diff}% to goal"),
    ("avg_cv", "Average CV: {value}% — {status}"),
    ("cv_status_stable", "✅ Stable"),
    ("cv_status_ok", "📊 OK"),
    ("cv_status_high", "⚠️ High"),
    ("avg_a1c", "Estimated HbA1c: {value}%"),
    ("best_tir", "Best TIR: {month} — {value}%"),
    ("worst_tir", "Worst TIR: {month} — {value}%"),
    ("lowest_cv", "Lowest CV: {month} — {value}%"),
    ("trend_title", "Trend (first vs last {periods} months):"),
    ("trend_tir", "TIR: {first}% → {last}% ({direction})"),
    ("trend_cv", "CV: {first}% → {last}% ({direction})"),
    ("trend_mean", "Average glucose: {first} → {last} ({direction})"),
    ("improving", "improving"),
    ("worsening", "worsening"),
    ("stable", "stable"),
    ("treatments_title", "Treatments for {hours}h:"),
    ("no_treatments", "No treatments in the last {hours} hours"),
    ("totals", "Totals:"),
    ("status_title", "Nightscout Status:"),
    ("status_name", "Name: {value}"),
    ("status_version", "Version: {value}"),
    ("status_time", "Server time: {value}"),
    ("status_units", "Units: {value}"),
    ("thresholds", "Thresholds:"),
    ("high_label", "High: {value} mg/dL"),
    ("target_top", "Target top: {value} mg/dL"),
    ("target_bottom", "Target bottom: {value} mg/dL"),
    ("low_label", "Low: {value} mg/dL"),
    ("devices_title", "Device Status:"),
    ("no_device_data", "No device data available"),
    ("uploader", "Uploader: battery {value}%"),
    ("pump", "Pump: reservoir {reservoir}U, battery {battery}%"),
    ("device_label", "Device: {value}"),
];

const RU: &[(&str, &str)] = &[
    ("unknown_tool", "Неизвестный инструмент: {name}"),
    ("error", "Ошибка: {error}"),
    ("no_glucose", "Нет данных о глюкозе"),
    ("current_glucose", "Текущая глюкоза: {value} {arrow}"),
    ("time_utc", "Время: {time} UTC"),
    ("delta", "Дельта: {sign}{delta}"),
    ("device", "Устройство: {device}"),
    ("history_title", "История глюкозы за {hours}ч ({count} измерений)"),
    ("statistics", "Статистика:"),
    ("average", "Среднее: {value}"),
    ("min_max", "Мин/Макс: {min}–{max}"),
    ("tir", "В диапазоне ({range}): {value}%"),
    ("cv", "CV: {value}%"),
    ("recent_readings", "Последние измерения:"),
    ("more_readings", "... и еще {count} измерений"),
    ("no_data_hours", "Нет данных за последние {hours} часов"),
    ("not_enough_data", "Недостаточно данных для анализа"),
    ("analysis_title", "Анализ глюкозы: {from_date} — {to_date} ({days} дней, {count} измерений)"),
    ("key_metrics", "Ключевые метрики:"),
    ("avg_glucose", "Средняя глюкоза: {value}"),
    ("std_dev", "Стандартное отклонение: {value}"),
    ("estimated_a1c", "Оценочный HbA1c: {value}%"),
    ("time_in_ranges", "Время в диапазонах:"),
    ("severe_hypo", "Тяжелая гипо (<3.0 ммоль): {value}% (цель <1%)"),
    ("hypo", "Гипогликемия ({range}): {value}% (цель <4%)"),
    ("in_target", "В цели ({range}): {value}% {status} (цель ≥{goal}%)"),
    ("above_target", "Выше цели: {value}%"),
    ("high", "Высокий (10.0-13.9 ммоль): {value}%"),
    ("very_high", "Очень высокий (>13.9 ммоль): {value}% (цель <5%)"),
    ("assessment", "Оценка:"),
    ("tir_goal_met", "✅ Цель TIR {goal}% достигнута!"),
    ("tir_goal_away", "⚠️ До цели TIR {goal}% не хватает {diff}%"),
    ("cv_excellent", "✅ Отличная стабильность"),
    ("cv_good", "📊 Хорошая стабильность"),
    ("cv_high", "⚠️ Высокая вариабельность"),
    ("fetch_truncated", "⚠️ Достигнут лимит запросов, данные могут быть неполными"),
    ("monthly_title", "Анализ глюкозы за {year} (цель TIR: {goal}%)"),
    ("month_header", "Месяц │  TIR ({range})  │  Средн │   CV   │  A1c  │ Измерения"),
    ("no_data", "Нет данных"),
    ("summary", "ИТОГО ({months} мес., {count} измерений)"),
    ("avg_tir", "Средний TIR ({range}): {value}% — {status}"),
    ("goal_met", "✅ ЦЕЛЬ ДОСТИГНУТА"),
    ("to_goal", "⚠️ до цели {diff}%"),
    ("avg_cv", "Средний CV: {value}% — {status}"),
    ("cv_status_stable", "✅ Стабильно"),
    ("cv_status_ok", "📊 Нормально"),
    ("cv_status_high", "⚠️ Высоко"),
    ("avg_a1c", "Оценочный HbA1c: {value}%"),
    ("best_tir", "Лучший TIR: {month} — {value}%"),
    ("worst_tir", "Худший TIR: {month} — {value}%"),
    ("lowest_cv", "Самый низкий CV: {month} — {value}%"),
    ("trend_title", "Тренд (первые и последние {periods} мес.):"),
    ("trend_tir", "TIR: {first}% → {last}% ({direction})"),
    ("trend_cv", "CV: {first}% → {last}% ({direction})"),
    ("trend_mean", "Средняя глюкоза: {first} → {last} ({direction})"),
    ("improving", "улучшение"),
    ("worsening", "ухудшение"),
    ("stable", "стабильно"),
    ("treatments_title", "Терапии за {hours}ч:"),
    ("no_treatments", "Нет терапий за последние {hours} часов"),
    ("totals", "Итого:"),
    ("status_title", "Статус Nightscout:"),
    ("status_name", "Имя: {value}"),
    ("status_version", "Версия: {value}"),
    ("status_time", "Время сервера: {value}"),
    ("status_units", "Ед. измерения: {value}"),
    ("thresholds", "Пороги:"),
    ("high_label", "Высокий: {value} mg/dL"),
    ("target_top", "Верх цели: {value} mg/dL"),
    ("target_bottom", "Низ цели: {value} mg/dL"),
    ("low_label", "Низкий: {value} mg/dL"),
    ("devices_title", "Статус устройств:"),
    ("no_device_data", "Нет данных об устройствах"),
    ("uploader", "Загрузчик: батарея {value}%"),
    ("pump", "Помпа: резервуар {reservoir}U, батарея {battery}%"),
    ("device_label", "Устройство: {value}"),
];

/// Replace each `{name}` in `template` with its value.
fn fill(template: &str, args: &[(&str, &dyn Display)]) -> String {
    args.iter().fold(template.to_string(), |text, (name, value)| {
        text.replace(&format!("{{{name}}}"), &value.to_string())
    })
}

/// `1234567` -> `1,234,567`.
pub fn group_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn tir_mark(tir: f64, goal: f64) -> &'static str {
    if tir >= goal {
        "✅"
    } else if tir >= TIR_FLOOR {
        "⚠️"
    } else {
        "❌"
    }
}

fn cv_mark(cv: f64) -> &'static str {
    if cv <= CV_EXCELLENT_MAX {
        "✅"
    } else if cv <= CV_GOOD_MAX {
        "⚠️"
    } else {
        "❌"
    }
}

fn one_decimal(value: f64) -> String {
    format!("{value:.1}")
}

fn or_na(value: Option<impl Display>) -> String {
    value.map_or_else(|| "N/A".to_string(), |v| v.to_string())
}

fn or_unknown(value: Option<f64>) -> String {
    value.map_or_else(|| "?".to_string(), |v| v.to_string())
}

fn clock(timestamp: Option<DateTime<Utc>>, pattern: &str) -> String {
    timestamp.map_or_else(|| "??".to_string(), |dt| dt.format(pattern).to_string())
}

/// Formats reports in one locale and unit system.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    pub locale: Locale,
    pub units: GlucoseUnits,
    pub target: TargetRange,
}

impl Renderer {
    pub fn from_config(config: &NightscoutConfig) -> Self {
        Self {
            locale: config.locale,
            units: config.units,
            target: config.target,
        }
    }

    fn t(&self, key: &'static str, args: &[(&str, &dyn Display)]) -> String {
        let template = self
            .locale
            .catalog()
            .iter()
            .chain(EN)
            .find(|(k, _)| *k == key)
            .map_or(key, |(_, template)| *template);
        fill(template, args)
    }

    fn range_label(&self) -> String {
        self.units.range_label(&self.target)
    }

    pub fn unknown_tool(&self, name: &str) -> String {
        self.t("unknown_tool", &[("name", &name)])
    }

    pub fn error(&self, message: &str) -> String {
        self.t("error", &[("error", &message)])
    }

    pub fn not_enough_data(&self) -> String {
        self.t("not_enough_data", &[])
    }

    pub fn no_data_hours(&self, hours: u32) -> String {
        self.t("no_data_hours", &[("hours", &hours)])
    }

    pub fn current(&self, reading: Option<&GlucoseReading>) -> String {
        let Some(reading) = reading else {
            return self.t("no_glucose", &[]);
        };
        let value = reading
            .sgv
            .map_or_else(|| "N/A".to_string(), |v| self.units.format(f64::from(v)));
        let arrow = reading.direction.as_deref().map(direction_arrow).unwrap_or("");
        let delta = reading.delta.unwrap_or(0.0);
        let sign = if delta >= 0.0 { "+" } else { "-" };
        let device = reading.device.as_deref().unwrap_or("N/A");

        [
            format!("🩸 {}", self.t("current_glucose", &[("value", &value), ("arrow", &arrow)])),
            format!(
                "📅 {}",
                self.t("time_utc", &[("time", &clock(reading.timestamp(), "%Y-%m-%d %H:%M"))])
            ),
            format!(
                "📈 {}",
                self.t(
                    "delta",
                    &[("sign", &sign), ("delta", &self.units.format_short(delta.abs()))]
                )
            ),
            format!("📱 {}", self.t("device", &[("device", &device)])),
        ]
        .join("\n")
    }

    /// `valid` holds the readings that passed the artifact filter, newest first.
    pub fn history(
        &self,
        hours: u32,
        count: u32,
        valid: &[&GlucoseReading],
        summary: &StatisticsSummary,
        truncated: bool,
    ) -> String {
        let mut lines = vec![
            format!(
                "📊 {}",
                self.t("history_title", &[("hours", &hours), ("count", &summary.sample_count)])
            ),
            String::new(),
            format!("📈 {}", self.t("statistics", &[])),
            format!("• {}", self.t("average", &[("value", &self.units.format_short(summary.mean))])),
            format!("• {}", self.min_max(summary)),
            format!(
                "• {}",
                self.t("tir", &[("range", &self.range_label()), ("value", &one_decimal(summary.percent_in_range))])
            ),
            format!("• {}", self.t("cv", &[("value", &one_decimal(summary.coefficient_of_variation))])),
        ];
        if truncated {
            lines.push(self.t("fetch_truncated", &[]));
        }
        lines.push(String::new());
        lines.push(format!("📋 {}", self.t("recent_readings", &[])));

        let shown = (count as usize).min(HISTORY_LIST_MAX);
        for reading in valid.iter().take(shown) {
            let value = reading
                .sgv
                .map_or_else(String::new, |v| self.units.format_short(f64::from(v)));
            let arrow = reading.direction.as_deref().map(direction_arrow).unwrap_or("");
            lines.push(format!(
                "• {}: {} {}",
                clock(reading.timestamp(), "%m-%d %H:%M"),
                value,
                arrow
            ));
        }
        if valid.len() > HISTORY_LIST_MAX {
            lines.push(self.t("more_readings", &[("count", &(valid.len() - HISTORY_LIST_MAX))]));
        }
        lines.join("\n")
    }

    fn min_max(&self, summary: &StatisticsSummary) -> String {
        self.t(
            "min_max",
            &[
                ("min", &self.units.format_short(f64::from(summary.min))),
                ("max", &self.units.format_short(f64::from(summary.max))),
            ],
        )
    }

    pub fn analysis(&self, analysis: &RangeAnalysis, summary: &StatisticsSummary, tir_goal: u32) -> String {
        let goal = f64::from(tir_goal);
        let window = analysis.window;
        let date = |ms: i64| clock(DateTime::from_timestamp_millis(ms), "%Y-%m-%d");
        let hypo_range = self.units.range_label(&TargetRange {
            low: VERY_LOW_BELOW_MGDL,
            high: self.target.low,
        });

        let mut lines = vec![
            format!(
                "📊 {}",
                self.t(
                    "analysis_title",
                    &[
                        ("from_date", &date(window.start())),
                        ("to_date", &date(window.end())),
                        ("days", &window.whole_days()),
                        ("count", &group_thousands(summary.sample_count)),
                    ]
                )
            ),
            String::new(),
            format!("📈 {}", self.t("key_metrics", &[])),
            format!("• {}", self.t("avg_glucose", &[("value", &self.units.format_short(summary.mean))])),
            format!("• {}", self.min_max(summary)),
            format!(
                "• {}",
                self.t("std_dev", &[("value", &self.units.format_short(summary.standard_deviation))])
            ),
            format!(
                "• {} {}",
                self.t("cv", &[("value", &one_decimal(summary.coefficient_of_variation))]),
                cv_mark(summary.coefficient_of_variation)
            ),
            format!("• {}", self.t("estimated_a1c", &[("value", &one_decimal(summary.estimated_a1c))])),
            String::new(),
            format!("🎯 {}", self.t("time_in_ranges", &[])),
            format!("• 🔴 {}", self.t("severe_hypo", &[("value", &one_decimal(summary.percent_very_low))])),
            format!(
                "• 🟠 {}",
                self.t("hypo", &[("range", &hypo_range), ("value", &one_decimal(summary.percent_low))])
            ),
            format!(
                "• 🟢 {}",
                self.t(
                    "in_target",
                    &[
                        ("range", &self.range_label()),
                        ("value", &one_decimal(summary.percent_in_range)),
                        ("status", &tir_mark(summary.percent_in_range, goal)),
                        ("goal", &tir_goal),
                    ]
                )
            ),
            format!("• 🟡 {}", self.t("above_target", &[("value", &one_decimal(summary.percent_above_target))])),
            format!("• 🟠 {}", self.t("high", &[("value", &one_decimal(summary.percent_high))])),
            format!("• 🔴 {}", self.t("very_high", &[("value", &one_decimal(summary.percent_very_high))])),
            String::new(),
            format!("💡 {}", self.t("assessment", &[])),
        ];

        if summary.percent_in_range >= goal {
            lines.push(format!("• {}", self.t("tir_goal_met", &[("goal", &tir_goal)])));
        } else {
            let diff = one_decimal(goal - summary.percent_in_range);
            lines.push(format!(
                "• {}",
                self.t("tir_goal_away", &[("diff", &diff), ("goal", &tir_goal)])
            ));
        }
        let cv_key = if summary.coefficient_of_variation <= CV_EXCELLENT_MAX {
            "cv_excellent"
        } else if summary.coefficient_of_variation <= CV_GOOD_MAX {
            "cv_good"
        } else {
            "cv_high"
        };
        lines.push(format!("• {}", self.t(cv_key, &[])));
        if analysis.truncated {
            lines.push(format!("• {}", self.t("fetch_truncated", &[])));
        }
        lines.join("\n")
    }

    pub fn monthly(&self, report: &MonthlyReport) -> String {
        let goal = f64::from(report.tir_goal);
        let mut lines = vec![
            format!(
                "📊 {}",
                self.t("monthly_title", &[("year", &report.year), ("goal", &report.tir_goal)])
            ),
            "=".repeat(80),
            self.t("month_header", &[("range", &self.range_label())]),
            "-".repeat(80),
        ];

        for period in &report.periods {
            let name = self.locale.month_name(period.month());
            let row = match period {
                PeriodOutcome::Data(result) => {
                    let s = &result.summary;
                    format!(
                        "{:<5} │ {:>6.1}% {}    │ {:>5} │ {:>5.1}% {} │ {:>4.1}% │ {:>8}",
                        name,
                        s.percent_in_range,
                        tir_mark(s.percent_in_range, goal),
                        self.units.format_short(s.mean),
                        s.coefficient_of_variation,
                        cv_mark(s.coefficient_of_variation),
                        s.estimated_a1c,
                        group_thousands(s.sample_count),
                    )
                }
                PeriodOutcome::Empty { .. } => format!("{:<5} │ {}", name, self.t("no_data", &[])),
                PeriodOutcome::Error { message, .. } => {
                    format!("{:<5} │ {}", name, self.error(message))
                }
            };
            lines.push(row);
        }
        lines.push("=".repeat(80));

        if let Some(rollup) = &report.rollup {
            lines.push(String::new());
            self.rollup_lines(rollup, goal, &mut lines);
        }
        lines.join("\n")
    }

    fn rollup_lines(&self, rollup: &Rollup, goal: f64, lines: &mut Vec<String>) {
        let month = |m: u32| self.locale.month_name(m);
        let tir_status = if rollup.average_time_in_range >= goal {
            self.t("goal_met", &[])
        } else {
            let diff = one_decimal(goal - rollup.average_time_in_range);
            self.t("to_goal", &[("diff", &diff)])
        };
        let cv_status = if rollup.average_cv <= CV_EXCELLENT_MAX {
            self.t("cv_status_stable", &[])
        } else if rollup.average_cv <= CV_GOOD_MAX {
            self.t("cv_status_ok", &[])
        } else {
            self.t("cv_status_high", &[])
        };

        lines.push(format!(
            "📈 {}",
            self.t(
                "summary",
                &[
                    ("months", &rollup.periods_with_data),
                    ("count", &group_thousands(rollup.total_samples)),
                ]
            )
        ));
        lines.push("-".repeat(60));
        lines.push(format!(
            "🎯 {}",
            self.t(
                "avg_tir",
                &[
                    ("range", &self.range_label()),
                    ("value", &one_decimal(rollup.average_time_in_range)),
                    ("status", &tir_status),
                ]
            )
        ));
        lines.push(format!(
            "📊 {}",
            self.t("avg_glucose", &[("value", &self.units.format(rollup.average_mean_glucose))])
        ));
        lines.push(format!(
            "📉 {}",
            self.t(
                "avg_cv",
                &[("value", &one_decimal(rollup.average_cv)), ("status", &cv_status)]
            )
        ));
        lines.push(format!(
            "🩸 {}",
            self.t("avg_a1c", &[("value", &one_decimal(rollup.average_a1c))])
        ));
        lines.push(String::new());

        for (icon, key, pick) in [
            ("🏆", "best_tir", rollup.best_time_in_range),
            ("📉", "worst_tir", rollup.worst_time_in_range),
            ("🎢", "lowest_cv", rollup.lowest_cv),
        ] {
            lines.push(format!(
                "{icon} {}",
                self.t(
                    key,
                    &[("month", &month(pick.month)), ("value", &one_decimal(pick.value))]
                )
            ));
        }

        if let Some(trend) = &rollup.trend {
            lines.push(String::new());
            lines.push(format!(
                "🧭 {}",
                self.t("trend_title", &[("periods", &TREND_EDGE_PERIODS)])
            ));
            let percent = one_decimal;
            let glucose = |v: f64| self.units.format(v);
            lines.push(self.trend_line("trend_tir", &trend.time_in_range, percent));
            lines.push(self.trend_line("trend_cv", &trend.coefficient_of_variation, percent));
            lines.push(self.trend_line("trend_mean", &trend.mean_glucose, glucose));
        }
    }

    fn trend_line(
        &self,
        key: &'static str,
        comparison: &TrendComparison,
        format_value: impl Fn(f64) -> String,
    ) -> String {
        let direction = self.direction_word(comparison.direction);
        format!(
            "• {}",
            self.t(
                key,
                &[
                    ("first", &format_value(comparison.first)),
                    ("last", &format_value(comparison.last)),
                    ("direction", &direction),
                ]
            )
        )
    }

    fn direction_word(&self, direction: TrendDirection) -> String {
        self.t(direction.as_str(), &[])
    }

    pub fn treatments(&self, hours: u32, treatments: &[Treatment]) -> String {
        if treatments.is_empty() {
            return self.t("no_treatments", &[("hours", &hours)]);
        }
        let mut lines = vec![format!("💉 {}", self.t("treatments_title", &[("hours", &hours)]))];
        for treatment in treatments {
            let mut line = format!("• {}: ", clock(treatment.timestamp(), "%m-%d %H:%M"));
            if let Some(event) = treatment.event_type.as_deref().filter(|e| !e.is_empty()) {
                line.push_str(&format!("[{event}] "));
            }
            if let Some(insulin) = treatment.insulin.filter(|v| *v > 0.0) {
                line.push_str(&format!("💉 {insulin} U "));
            }
            if let Some(carbs) = treatment.carbs.filter(|v| *v > 0.0) {
                line.push_str(&format!("🍞 {carbs} g "));
            }
            if let Some(notes) = treatment.notes.as_deref().filter(|n| !n.is_empty()) {
                line.push_str(&format!("📝 {notes}"));
            }
            lines.push(line.trim_end().to_string());
        }

        let totals = TreatmentTotals::from_treatments(treatments);
        let mut summary = format!("📊 {}", self.t("totals", &[]));
        if totals.insulin_units > 0.0 {
            summary.push_str(&format!(" 💉 {:.1} U", totals.insulin_units));
        }
        if totals.carb_grams > 0.0 {
            summary.push_str(&format!(" 🍞 {} g", totals.carb_grams));
        }
        lines.push(String::new());
        lines.push(summary);
        lines.join("\n")
    }

    pub fn status(&self, status: &ServerStatus) -> String {
        let settings = status.settings.as_ref();
        let units = settings
            .and_then(|s| s.units.as_deref())
            .unwrap_or("mg/dl");
        let mut lines = vec![
            format!("⚙️ {}", self.t("status_title", &[])),
            format!("• {}", self.t("status_name", &[("value", &or_na(status.name.as_deref()))])),
            format!(
                "• {}",
                self.t("status_version", &[("value", &or_na(status.version.as_deref()))])
            ),
            format!(
                "• {}",
                self.t("status_time", &[("value", &or_na(status.server_time.as_deref()))])
            ),
            format!("• {}", self.t("status_units", &[("value", &units)])),
        ];

        if let Some(thresholds) = settings.and_then(|s| s.thresholds.as_ref()) {
            lines.push(String::new());
            lines.push(format!("🎯 {}", self.t("thresholds", &[])));
            for (key, value) in [
                ("high_label", thresholds.bg_high),
                ("target_top", thresholds.bg_target_top),
                ("target_bottom", thresholds.bg_target_bottom),
                ("low_label", thresholds.bg_low),
            ] {
                lines.push(format!("• {}", self.t(key, &[("value", &or_na(value))])));
            }
        }
        lines.join("\n")
    }

    pub fn devices(&self, statuses: &[DeviceStatus]) -> String {
        if statuses.is_empty() {
            return self.t("no_device_data", &[]);
        }
        let mut lines = vec![format!("📱 {}", self.t("devices_title", &[]))];
        for status in statuses {
            lines.push(String::new());
            lines.push(format!("⏰ {}:", clock(status.timestamp(), "%H:%M")));
            if let Some(uploader) = &status.uploader {
                lines.push(format!(
                    "  📱 {}",
                    self.t("uploader", &[("value", &or_unknown(uploader.battery))])
                ));
            }
            if let Some(pump) = &status.pump {
                let battery = pump.battery.as_ref().and_then(|b| b.percent);
                lines.push(format!(
                    "  💉 {}",
                    self.t(
                        "pump",
                        &[
                            ("reservoir", &or_unknown(pump.reservoir)),
                            ("battery", &or_unknown(battery)),
                        ]
                    )
                ));
            }
            if let Some(device) = status.device.as_deref() {
                lines.push(format!("  📡 {}", self.t("device_label", &[("value", &device)])));
            }
        }
        lines.join("\n")
    }
}
