//! Period aggregation: one range analysis, or a year split into months.

use futures_util::stream::{self, StreamExt};
use nightscout_core::dates::month_window;
use nightscout_core::rollup::{PeriodOutcome, PeriodResult, Rollup, rollup};
use nightscout_core::stats::{
    StatisticsSummary, TargetRange, compute_statistics_in_range, valid_glucose_values,
};
use nightscout_core::TimeWindow;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::NightscoutError;
use crate::fetcher::{DEFAULT_PAGE_SIZE, EntrySource, fetch_range};

#[derive(Debug, Clone, Copy)]
pub struct AggregateOptions {
    pub page_size: usize,
    pub target: TargetRange,
    /// Months fetched at once; 1 keeps the walk strictly sequential
    pub concurrency: usize,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            target: TargetRange::default(),
            concurrency: 1,
        }
    }
}

/// Statistics for one contiguous window.
#[derive(Debug, Clone, Serialize)]
pub struct RangeAnalysis {
    pub window: TimeWindow,
    /// Records returned by the source, valid or not
    pub readings: usize,
    pub pages: usize,
    pub truncated: bool,
    /// `None` when the window holds no valid glucose value
    pub summary: Option<StatisticsSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlyReport {
    pub year: i32,
    pub from_month: u32,
    pub to_month: u32,
    pub tir_goal: u32,
    /// One entry per requested month, in calendar order
    pub periods: Vec<PeriodOutcome>,
    pub rollup: Option<Rollup>,
}

pub async fn aggregate_range<S>(
    source: &S,
    window: TimeWindow,
    opts: &AggregateOptions,
    cancel: &CancellationToken,
) -> Result<RangeAnalysis, NightscoutError>
where
    S: EntrySource + ?Sized,
{
    let fetch = fetch_range(source, window, opts.page_size, cancel).await?;
    let values = valid_glucose_values(&fetch.readings);
    Ok(RangeAnalysis {
        window,
        readings: fetch.readings.len(),
        pages: fetch.pages,
        truncated: fetch.truncated,
        summary: compute_statistics_in_range(&values, &opts.target),
    })
}

/// Analyze `from_month..=to_month` of `year`, one period per month.
///
/// A failing month becomes [`PeriodOutcome::Error`] and the others still
/// run. Cancellation and configuration errors abort the batch.
pub async fn aggregate_monthly<S>(
    source: &S,
    year: i32,
    from_month: u32,
    to_month: u32,
    tir_goal: u32,
    opts: &AggregateOptions,
    cancel: &CancellationToken,
) -> Result<MonthlyReport, NightscoutError>
where
    S: EntrySource + ?Sized,
{
    let windows = (from_month..=to_month)
        .map(|month| month_window(year, month).map(|window| (month, window)))
        .collect::<Result<Vec<_>, _>>()?;

    let outcomes: Vec<Result<PeriodOutcome, NightscoutError>> = stream::iter(windows)
        .map(|(month, window)| async move {
            match aggregate_range(source, window, opts, cancel).await {
                Ok(RangeAnalysis {
                    summary: Some(summary),
                    ..
                }) => Ok(PeriodOutcome::Data(PeriodResult { month, summary })),
                Ok(_) => Ok(PeriodOutcome::Empty { month }),
                Err(err @ (NightscoutError::Cancelled | NightscoutError::Configuration(_))) => {
                    Err(err)
                }
                Err(err) => {
                    tracing::warn!(year, month, error = %err, "monthly period failed");
                    Ok(PeriodOutcome::failed(month, &err.to_string()))
                }
            }
        })
        .buffered(opts.concurrency.max(1))
        .collect()
        .await;

    let periods = outcomes.into_iter().collect::<Result<Vec<_>, _>>()?;
    let rollup = rollup(&periods);

    Ok(MonthlyReport {
        year,
        from_month,
        to_month,
        tir_goal,
        periods,
        rollup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::PageQuery;
    use crate::fetcher::tests::{MemorySource, reading};
    use async_trait::async_trait;
    use nightscout_core::entries::GlucoseReading;

    /// Twelve readings in the middle of every month of `year`.
    fn year_of_readings(year: i32) -> Vec<GlucoseReading> {
        let mut readings = Vec::new();
        for month in 1..=12u32 {
            let window = month_window(year, month).unwrap();
            for i in 0..12i64 {
                let sgv = if month % 2 == 0 { 120 } else { 200 };
                readings.push(reading(
                    &format!("{month}-{i}"),
                    window.start() + 86_400_000 + i * 300_000,
                    sgv,
                ));
            }
        }
        readings
    }

    /// Fails every request that touches June.
    struct JuneOutage {
        inner: MemorySource,
        june: TimeWindow,
    }

    #[async_trait]
    impl EntrySource for JuneOutage {
        async fn entries_page(
            &self,
            query: PageQuery,
        ) -> Result<Vec<GlucoseReading>, NightscoutError> {
            if query.start == self.june.start() {
                return Err(NightscoutError::Transport {
                    status: 500,
                    path: "/api/v1/entries".to_string(),
                });
            }
            self.inner.entries_page(query).await
        }
    }

    #[tokio::test]
    async fn range_analysis_filters_artifacts() {
        let mut readings = vec![reading("a", 1_000, 100), reading("b", 2_000, 39)];
        readings.push(GlucoseReading {
            sgv: None,
            ..reading("c", 3_000, 0)
        });
        let source = MemorySource::new(readings);
        let window = TimeWindow::new(0, 10_000).unwrap();

        let analysis = aggregate_range(
            &source,
            window,
            &AggregateOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(analysis.readings, 3);
        let summary = analysis.summary.unwrap();
        assert_eq!(summary.sample_count, 1);
        assert_eq!(summary.mean, 100.0);
    }

    #[tokio::test]
    async fn range_without_values_has_no_summary() {
        let source = MemorySource::new(vec![reading("a", 1_000, 20)]);
        let window = TimeWindow::new(0, 10_000).unwrap();
        let analysis = aggregate_range(
            &source,
            window,
            &AggregateOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert!(analysis.summary.is_none());
    }

    #[tokio::test]
    async fn failed_month_is_isolated() {
        let source = JuneOutage {
            inner: MemorySource::new(year_of_readings(2024)),
            june: month_window(2024, 6).unwrap(),
        };

        let report = aggregate_monthly(
            &source,
            2024,
            1,
            12,
            85,
            &AggregateOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.periods.len(), 12);
        let months: Vec<u32> = report.periods.iter().map(PeriodOutcome::month).collect();
        assert_eq!(months, (1..=12).collect::<Vec<_>>());
        let data = report
            .periods
            .iter()
            .filter(|p| p.result().is_some())
            .count();
        assert_eq!(data, 11);
        assert!(matches!(
            &report.periods[5],
            PeriodOutcome::Error { month: 6, message } if message.chars().count() <= 40
        ));

        let rollup = report.rollup.unwrap();
        assert_eq!(rollup.periods_with_data, 11);
        assert_eq!(rollup.total_samples, 11 * 12);
    }

    #[tokio::test]
    async fn parallel_fan_out_keeps_calendar_order() {
        let source = MemorySource::new(year_of_readings(2023));
        let opts = AggregateOptions {
            concurrency: 4,
            ..AggregateOptions::default()
        };

        let report = aggregate_monthly(&source, 2023, 3, 9, 70, &opts, &CancellationToken::new())
            .await
            .unwrap();

        let months: Vec<u32> = report.periods.iter().map(PeriodOutcome::month).collect();
        assert_eq!(months, vec![3, 4, 5, 6, 7, 8, 9]);
        // odd months sit at 200 mg/dL, even months at 120
        let rollup = report.rollup.unwrap();
        assert_eq!(rollup.best_time_in_range.month, 4);
        assert_eq!(rollup.worst_time_in_range.month, 3);
    }

    #[tokio::test]
    async fn months_without_data_are_empty() {
        let source = MemorySource::new(Vec::new());
        let report = aggregate_monthly(
            &source,
            2022,
            11,
            12,
            85,
            &AggregateOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(
            report.periods,
            vec![
                PeriodOutcome::Empty { month: 11 },
                PeriodOutcome::Empty { month: 12 }
            ]
        );
        assert!(report.rollup.is_none());
    }

    #[tokio::test]
    async fn cancellation_aborts_the_batch() {
        let source = MemorySource::new(year_of_readings(2024));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = aggregate_monthly(
            &source,
            2024,
            1,
            12,
            85,
            &AggregateOptions::default(),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(source.request_count(), 0);
    }

    #[tokio::test]
    async fn invalid_month_is_rejected_up_front() {
        let source = MemorySource::new(Vec::new());
        let err = aggregate_monthly(
            &source,
            2024,
            1,
            13,
            85,
            &AggregateOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "invalid_month");
        assert_eq!(source.request_count(), 0);
    }
}
