//! Range fetching around Nightscout's per-request record cap.
//!
//! Pages are requested newest-first inside `[start, window_end)`; after each
//! full page the upper bound moves down to the oldest timestamp seen, so the
//! walk proceeds backward through time until the source runs dry or the
//! requested start is covered.

use std::collections::HashSet;

use async_trait::async_trait;
use nightscout_core::entries::{GlucoseReading, SGV_RECORD_TYPE};
use nightscout_core::TimeWindow;
use tokio_util::sync::CancellationToken;

use crate::error::NightscoutError;

/// Largest page Nightscout is asked for in one request.
pub const DEFAULT_PAGE_SIZE: usize = 10_000;
/// Circuit breaker: page requests issued for a single range.
pub const MAX_PAGE_REQUESTS: usize = 100;

/// One page request: up to `count` SGV records with `start <= date < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageQuery {
    pub start: i64,
    pub end: i64,
    pub count: usize,
}

impl PageQuery {
    /// Query parameters understood by `/api/v1/entries`.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("count".to_string(), self.count.to_string()),
            ("find[date][$gte]".to_string(), self.start.to_string()),
            ("find[date][$lt]".to_string(), self.end.to_string()),
            ("find[type]".to_string(), SGV_RECORD_TYPE.to_string()),
        ]
    }
}

/// Anything that can list glucose entries in a time window.
#[async_trait]
pub trait EntrySource: Send + Sync {
    async fn entries_page(&self, query: PageQuery) -> Result<Vec<GlucoseReading>, NightscoutError>;
}

/// Records collected for a range plus how the walk went.
///
/// `readings` keeps page order (each page in the source's native order);
/// sort explicitly if chronological order matters.
#[derive(Debug, Clone, Default)]
pub struct RangeFetch {
    pub readings: Vec<GlucoseReading>,
    pub pages: usize,
    pub duplicates_dropped: usize,
    /// The circuit breaker stopped the walk before the range was covered
    pub truncated: bool,
}

/// Fetch every reading in `window`, paging backward around `page_size`.
///
/// Errors from the source propagate unchanged. Hitting
/// [`MAX_PAGE_REQUESTS`] is not an error: whatever was collected is returned
/// with `truncated` set.
pub async fn fetch_range<S>(
    source: &S,
    window: TimeWindow,
    page_size: usize,
    cancel: &CancellationToken,
) -> Result<RangeFetch, NightscoutError>
where
    S: EntrySource + ?Sized,
{
    let page_size = page_size.max(1);
    let mut fetch = RangeFetch::default();
    let mut seen = HashSet::new();
    let mut window_end = window.end();

    loop {
        if fetch.pages == MAX_PAGE_REQUESTS {
            tracing::warn!(
                start = window.start(),
                end = window.end(),
                window_end,
                collected = fetch.readings.len(),
                "range fetch hit the page limit; returning partial result"
            );
            fetch.truncated = true;
            break;
        }

        let query = PageQuery {
            start: window.start(),
            end: window_end,
            count: page_size,
        };
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(NightscoutError::Cancelled),
            page = source.entries_page(query) => page?,
        };
        fetch.pages += 1;
        tracing::debug!(
            start = query.start,
            end = query.end,
            returned = page.len(),
            page = fetch.pages,
            "fetched entries page"
        );

        let Some(oldest) = page.iter().map(|r| r.date).min() else {
            break;
        };
        let full_page = page.len() >= page_size;

        for reading in page {
            if seen.insert(reading.key()) {
                fetch.readings.push(reading);
            } else {
                fetch.duplicates_dropped += 1;
            }
        }

        if !full_page || oldest <= window.start() {
            break;
        }
        window_end = oldest;
    }

    Ok(fetch)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) fn reading(id: &str, date: i64, sgv: i32) -> GlucoseReading {
        GlucoseReading {
            id: Some(id.to_string()),
            date,
            sgv: Some(sgv),
            direction: Some("Flat".to_string()),
            delta: None,
            device: Some("test-cgm".to_string()),
            kind: Some("sgv".to_string()),
        }
    }

    /// In-memory source answering like Nightscout: newest first, capped.
    pub(crate) struct MemorySource {
        pub(crate) readings: Vec<GlucoseReading>,
        /// Treat the upper bound as inclusive, to provoke boundary overlap
        pub(crate) inclusive_end: bool,
        pub(crate) requests: Mutex<Vec<PageQuery>>,
    }

    impl MemorySource {
        pub(crate) fn new(readings: Vec<GlucoseReading>) -> Self {
            Self {
                readings,
                inclusive_end: false,
                requests: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn request_count(&self) -> usize {
            self.requests.lock().map(|r| r.len()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl EntrySource for MemorySource {
        async fn entries_page(
            &self,
            query: PageQuery,
        ) -> Result<Vec<GlucoseReading>, NightscoutError> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(query);
            }
            let mut page: Vec<GlucoseReading> = self
                .readings
                .iter()
                .filter(|r| {
                    r.date >= query.start
                        && (r.date < query.end || (self.inclusive_end && r.date == query.end))
                })
                .cloned()
                .collect();
            page.sort_by(|a, b| b.date.cmp(&a.date));
            page.truncate(query.count);
            Ok(page)
        }
    }

    /// Always answers with a full page pinned just below `end`.
    struct StuckSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntrySource for StuckSource {
        async fn entries_page(
            &self,
            query: PageQuery,
        ) -> Result<Vec<GlucoseReading>, NightscoutError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..query.count)
                .map(|i| reading(&format!("stuck-{call}-{i}"), query.end - 1, 120))
                .collect())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl EntrySource for FailingSource {
        async fn entries_page(
            &self,
            _query: PageQuery,
        ) -> Result<Vec<GlucoseReading>, NightscoutError> {
            Err(NightscoutError::Transport {
                status: 503,
                path: "/api/v1/entries".to_string(),
            })
        }
    }

    fn five_readings() -> Vec<GlucoseReading> {
        (0..5)
            .map(|i| reading(&format!("r{i}"), 1_000 + i * 1_000, 100 + i as i32))
            .collect()
    }

    #[tokio::test]
    async fn pages_backward_until_range_is_covered() {
        let source = MemorySource::new(five_readings());
        let window = TimeWindow::new(0, 10_000).unwrap();

        let fetch = fetch_range(&source, window, 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetch.readings.len(), 5);
        assert!(fetch.pages <= 4);
        assert_eq!(source.request_count(), fetch.pages);
        assert!(!fetch.truncated);

        let requests = source.requests.lock().unwrap();
        assert_eq!(requests[0].end, 10_000);
        // the second window ends at the oldest timestamp of the first page
        assert_eq!(requests[1].end, 4_000);
    }

    #[tokio::test]
    async fn stops_when_oldest_reaches_start() {
        let source = MemorySource::new(five_readings());
        // start coincides with the oldest reading of the second page
        let window = TimeWindow::new(3_000, 10_000).unwrap();

        let fetch = fetch_range(&source, window, 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetch.readings.len(), 3);
        assert_eq!(fetch.pages, 2);
    }

    #[tokio::test]
    async fn inclusive_source_boundaries_are_deduplicated() {
        let mut source = MemorySource::new(five_readings());
        source.inclusive_end = true;
        let window = TimeWindow::new(0, 10_000).unwrap();

        let fetch = fetch_range(&source, window, 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fetch.readings.len(), 5);
        assert!(fetch.duplicates_dropped >= 1);
        let mut ids: Vec<_> = fetch.readings.iter().filter_map(|r| r.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn circuit_breaker_halts_non_shrinking_source() {
        let source = StuckSource {
            calls: AtomicUsize::new(0),
        };
        let window = TimeWindow::new(0, 1_000_000).unwrap();

        let fetch = fetch_range(&source, window, 3, &CancellationToken::new())
            .await
            .unwrap();

        assert!(fetch.truncated);
        assert_eq!(fetch.pages, MAX_PAGE_REQUESTS);
        assert_eq!(source.calls.load(Ordering::SeqCst), MAX_PAGE_REQUESTS);
        assert_eq!(fetch.readings.len(), MAX_PAGE_REQUESTS * 3);
    }

    #[tokio::test]
    async fn empty_source_returns_after_one_request() {
        let source = MemorySource::new(Vec::new());
        let window = TimeWindow::new(0, 10_000).unwrap();

        let fetch = fetch_range(&source, window, 10, &CancellationToken::new())
            .await
            .unwrap();

        assert!(fetch.readings.is_empty());
        assert_eq!(fetch.pages, 1);
    }

    #[tokio::test]
    async fn source_errors_propagate() {
        let window = TimeWindow::new(0, 10_000).unwrap();
        let err = fetch_range(&FailingSource, window, 10, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, NightscoutError::Transport { status: 503, .. }));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_requesting() {
        let source = MemorySource::new(five_readings());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let window = TimeWindow::new(0, 10_000).unwrap();

        let err = fetch_range(&source, window, 2, &cancel).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(source.request_count(), 0);
    }

    #[test]
    fn page_query_uses_nightscout_filters() {
        let pairs = PageQuery {
            start: 1,
            end: 2,
            count: 3,
        }
        .to_query_pairs();
        assert!(pairs.contains(&("find[date][$gte]".to_string(), "1".to_string())));
        assert!(pairs.contains(&("find[date][$lt]".to_string(), "2".to_string())));
        assert!(pairs.contains(&("find[type]".to_string(), "sgv".to_string())));
        assert!(pairs.contains(&("count".to_string(), "3".to_string())));
    }
}
