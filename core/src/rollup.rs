//! Multi-period roll-up: unweighted averages, best/worst periods and a
//! first-vs-last trend comparison over a chronological list of periods.

use serde::Serialize;

use crate::stats::StatisticsSummary;

/// Minimum number of periods with data before a trend is reported.
pub const TREND_MIN_PERIODS: usize = 3;
/// Periods averaged at each end of the series for the trend comparison.
pub const TREND_EDGE_PERIODS: usize = 3;
/// Absolute change that still counts as "stable".
pub const TREND_DEADBAND: f64 = 2.0;
/// Error messages carried by failed periods are cut to this many characters.
pub const PERIOD_ERROR_MAX_CHARS: usize = 40;

/// Statistics for one period, labelled by its month number (1-12).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeriodResult {
    pub month: u32,
    pub summary: StatisticsSummary,
}

/// What happened to one period of a multi-period analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodOutcome {
    Data(PeriodResult),
    Empty { month: u32 },
    Error { month: u32, message: String },
}

impl PeriodOutcome {
    pub fn failed(month: u32, message: &str) -> Self {
        PeriodOutcome::Error {
            month,
            message: message.chars().take(PERIOD_ERROR_MAX_CHARS).collect(),
        }
    }

    pub fn month(&self) -> u32 {
        match self {
            PeriodOutcome::Data(result) => result.month,
            PeriodOutcome::Empty { month } | PeriodOutcome::Error { month, .. } => *month,
        }
    }

    pub fn result(&self) -> Option<&PeriodResult> {
        match self {
            PeriodOutcome::Data(result) => Some(result),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Worsening,
    Stable,
}

impl TrendDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendDirection::Improving => "improving",
            TrendDirection::Worsening => "worsening",
            TrendDirection::Stable => "stable",
        }
    }

    /// Classify `last - first`. `higher_is_better` flips the sign for
    /// metrics where a drop is the improvement (CV, mean glucose).
    pub fn classify(first: f64, last: f64, higher_is_better: bool) -> Self {
        let delta = last - first;
        if delta.abs() <= TREND_DEADBAND {
            TrendDirection::Stable
        } else if (delta > 0.0) == higher_is_better {
            TrendDirection::Improving
        } else {
            TrendDirection::Worsening
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendComparison {
    pub first: f64,
    pub last: f64,
    pub delta: f64,
    pub direction: TrendDirection,
}

impl TrendComparison {
    fn between(first: f64, last: f64, higher_is_better: bool) -> Self {
        Self {
            first,
            last,
            delta: last - first,
            direction: TrendDirection::classify(first, last, higher_is_better),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendReport {
    pub time_in_range: TrendComparison,
    pub coefficient_of_variation: TrendComparison,
    pub mean_glucose: TrendComparison,
}

/// A reference to the period that won a best/worst selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PeriodPick {
    pub month: u32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollup {
    pub periods_with_data: usize,
    pub total_samples: usize,
    pub average_time_in_range: f64,
    pub average_cv: f64,
    pub average_mean_glucose: f64,
    pub average_a1c: f64,
    pub best_time_in_range: PeriodPick,
    pub worst_time_in_range: PeriodPick,
    pub lowest_cv: PeriodPick,
    pub trend: Option<TrendReport>,
}

/// Roll up the non-empty periods in chronological order.
///
/// Each period counts once regardless of how many readings it holds.
/// Returns `None` when no period has data.
pub fn rollup(outcomes: &[PeriodOutcome]) -> Option<Rollup> {
    let periods: Vec<&PeriodResult> = outcomes.iter().filter_map(PeriodOutcome::result).collect();
    if periods.is_empty() {
        return None;
    }

    let tir: Vec<f64> = periods.iter().map(|p| p.summary.percent_in_range).collect();
    let cv: Vec<f64> = periods
        .iter()
        .map(|p| p.summary.coefficient_of_variation)
        .collect();
    let mean_glucose: Vec<f64> = periods.iter().map(|p| p.summary.mean).collect();
    let a1c: Vec<f64> = periods.iter().map(|p| p.summary.estimated_a1c).collect();

    Some(Rollup {
        periods_with_data: periods.len(),
        total_samples: periods.iter().map(|p| p.summary.sample_count).sum(),
        average_time_in_range: mean(&tir),
        average_cv: mean(&cv),
        average_mean_glucose: mean(&mean_glucose),
        average_a1c: mean(&a1c),
        best_time_in_range: pick(&periods, &tir, |candidate, best| candidate > best),
        worst_time_in_range: pick(&periods, &tir, |candidate, best| candidate < best),
        lowest_cv: pick(&periods, &cv, |candidate, best| candidate < best),
        trend: trend(&tir, &cv, &mean_glucose),
    })
}

/// First-vs-last comparison; the edges overlap when fewer than six values.
pub fn trend(tir: &[f64], cv: &[f64], mean_glucose: &[f64]) -> Option<TrendReport> {
    if tir.len() < TREND_MIN_PERIODS {
        return None;
    }
    let edges = |values: &[f64]| {
        let n = values.len();
        let first = mean(&values[..TREND_EDGE_PERIODS.min(n)]);
        let last = mean(&values[n.saturating_sub(TREND_EDGE_PERIODS)..]);
        (first, last)
    };
    let (tir_first, tir_last) = edges(tir);
    let (cv_first, cv_last) = edges(cv);
    let (mean_first, mean_last) = edges(mean_glucose);

    Some(TrendReport {
        time_in_range: TrendComparison::between(tir_first, tir_last, true),
        coefficient_of_variation: TrendComparison::between(cv_first, cv_last, false),
        mean_glucose: TrendComparison::between(mean_first, mean_last, false),
    })
}

/// Linear scan; ties keep the earliest period.
fn pick(periods: &[&PeriodResult], values: &[f64], better: impl Fn(f64, f64) -> bool) -> PeriodPick {
    let mut best = PeriodPick {
        month: periods[0].month,
        value: values[0],
    };
    for (period, value) in periods.iter().zip(values).skip(1) {
        if better(*value, best.value) {
            best = PeriodPick {
                month: period.month,
                value: *value,
            };
        }
    }
    best
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
