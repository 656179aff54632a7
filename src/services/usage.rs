//! Usage aggregation over billing windows.
//!
//! [`aggregate`] folds one window's records into a [`UsageSummary`].
//! [`build_daily`] issues one query per calendar day of a window and zero-fills
//! days whose query failed, so a flaky upstream degrades the chart instead of
//! failing the request. [`UsageService`] binds both to a [`MetricsSource`].

use std::{collections::BTreeMap, fmt::Display, future::Future, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, Utc};
use futures::{StreamExt, stream};
use tracing::{error, info, instrument};

use super::metrics_source::{MetricsSource, SourceError};
use crate::{
    config::LangSmithConfig,
    models::{CycleWindow, DailyUsage, UsageRecord, UsageSummary, UsageTotals, day_bounds},
};

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Usage query timed out after {0:?}")]
    Timeout(Duration),
}

/// Summarize the records of one window.
pub fn aggregate<'a>(
    records: impl IntoIterator<Item = &'a UsageRecord>,
    window: &CycleWindow,
) -> UsageSummary {
    let totals = UsageTotals::from_records(records);

    UsageSummary {
        input_tokens: totals.input_tokens,
        output_tokens: totals.output_tokens,
        total_tokens: totals.total_tokens(),
        total_cost: totals.total_cost,
        period_days: window.period_days(),
        run_count: totals.run_count,
        start_date: window.start.format(DATE_FORMAT).to_string(),
        end_date: window.end.format(DATE_FORMAT).to_string(),
        cycle_based: window.cycle_based(),
    }
}

/// Build one [`DailyUsage`] per calendar day of `window`, ascending by date.
///
/// `query` is invoked once per day. Up to `concurrency` queries run at a time
/// (values below 1 are treated as 1). A failed day is logged and reported as
/// zero usage; it never fails the whole breakdown.
pub async fn build_daily<F, Fut, E>(
    window: &CycleWindow,
    concurrency: usize,
    query: F,
) -> Vec<DailyUsage>
where
    F: Fn(NaiveDate) -> Fut,
    Fut: Future<Output = Result<Vec<UsageRecord>, E>>,
    E: Display,
{
    let results: Vec<_> = stream::iter(window.calendar_days())
        .map(|day| {
            let fut = query(day);
            async move { (day, fut.await) }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut by_day = BTreeMap::new();
    for (day, result) in results {
        let usage = match result {
            Ok(records) => DailyUsage::from_totals(day, UsageTotals::from_records(&records)),
            Err(e) => {
                error!(date = %day, error = %e, "Failed to fetch daily usage, reporting zero");
                DailyUsage::zero(day)
            }
        };
        by_day.insert(day, usage);
    }

    by_day.into_values().collect()
}

/// Usage queries against a metrics source, with a per-call timeout.
#[derive(Clone)]
pub struct UsageService {
    source: Arc<dyn MetricsSource>,
    timeout: Duration,
    daily_concurrency: usize,
}

impl UsageService {
    pub fn new(source: Arc<dyn MetricsSource>, timeout: Duration, daily_concurrency: usize) -> Self {
        Self {
            source,
            timeout,
            daily_concurrency,
        }
    }

    pub fn from_config(source: Arc<dyn MetricsSource>, config: &LangSmithConfig) -> Self {
        Self::new(source, config.timeout(), config.daily_concurrency)
    }

    async fn fetch(
        &self,
        project: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<UsageRecord>, UsageError> {
        tokio::time::timeout(self.timeout, self.source.list_usage(project, start, end))
            .await
            .map_err(|_| UsageError::Timeout(self.timeout))?
            .map_err(UsageError::from)
    }

    /// Totals for `project` over `window`.
    #[instrument(skip(self, window), fields(start = %window.start, end = %window.end))]
    pub async fn summary(
        &self,
        project: &str,
        window: &CycleWindow,
    ) -> Result<UsageSummary, UsageError> {
        let records = self
            .fetch(project, window.start_utc(), window.end_utc())
            .await?;
        let summary = aggregate(&records, window);

        info!(
            run_count = summary.run_count,
            total_tokens = summary.total_tokens,
            "Aggregated usage"
        );
        Ok(summary)
    }

    /// Per-day usage for `project` over `window`. Days that fail are zero.
    #[instrument(skip(self, window), fields(start = %window.start, end = %window.end))]
    pub async fn daily(&self, project: &str, window: &CycleWindow) -> Vec<DailyUsage> {
        build_daily(window, self.daily_concurrency, |day| {
            let (start, end) = day_bounds(day);
            self.fetch(project, start, end)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Datelike, NaiveDateTime};

    use super::*;
    use crate::{models::WindowKind, services::metrics_source::SourceResult};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(day: NaiveDate, h: u32, m: u32, s: u32) -> NaiveDateTime {
        day.and_hms_opt(h, m, s).unwrap()
    }

    fn cycle_window() -> CycleWindow {
        CycleWindow {
            start: at(date(2024, 2, 5), 0, 0, 0),
            end: at(date(2024, 3, 4), 23, 59, 59),
            kind: WindowKind::Cycle { cycle_day: 5 },
        }
    }

    fn rolling_window() -> CycleWindow {
        CycleWindow {
            start: at(date(2024, 3, 3), 15, 30, 0),
            end: at(date(2024, 3, 10), 15, 30, 0),
            kind: WindowKind::Rolling { days: 7 },
        }
    }

    #[test]
    fn test_aggregate_example() {
        let records = vec![
            UsageRecord {
                input_tokens: Some(10),
                output_tokens: Some(5),
                total_cost: None,
            },
            UsageRecord::new(3, 0, 0.01),
        ];
        let summary = aggregate(&records, &cycle_window());

        assert_eq!(summary.input_tokens, 13);
        assert_eq!(summary.output_tokens, 5);
        assert_eq!(summary.total_tokens, 18);
        assert_eq!(summary.total_cost, 0.01);
        assert_eq!(summary.run_count, 2);
        assert_eq!(summary.period_days, 28);
        assert_eq!(summary.start_date, "2024-02-05");
        assert_eq!(summary.end_date, "2024-03-04");
        assert!(summary.cycle_based);
    }

    #[test]
    fn test_aggregate_empty_is_zero() {
        let summary = aggregate(&[] as &[UsageRecord], &rolling_window());

        assert_eq!(summary.input_tokens, 0);
        assert_eq!(summary.output_tokens, 0);
        assert_eq!(summary.total_tokens, 0);
        assert_eq!(summary.total_cost, 0.0);
        assert_eq!(summary.run_count, 0);
        assert_eq!(summary.period_days, 7);
        assert!(!summary.cycle_based);
    }

    #[test]
    fn test_aggregate_is_additive() {
        // Costs are exact binary fractions so float sums compare exactly.
        let left = vec![UsageRecord::new(100, 40, 0.25), UsageRecord::default()];
        let right = vec![
            UsageRecord::new(7, 9, 0.5),
            UsageRecord {
                output_tokens: Some(11),
                ..Default::default()
            },
            UsageRecord::new(1, 1, 0.125),
        ];
        let window = cycle_window();

        let a = aggregate(&left, &window);
        let b = aggregate(&right, &window);
        let both = aggregate(left.iter().chain(&right), &window);

        assert_eq!(both.input_tokens, a.input_tokens + b.input_tokens);
        assert_eq!(both.output_tokens, a.output_tokens + b.output_tokens);
        assert_eq!(both.total_tokens, a.total_tokens + b.total_tokens);
        assert_eq!(both.total_cost, a.total_cost + b.total_cost);
        assert_eq!(both.run_count, a.run_count + b.run_count);
    }

    #[tokio::test]
    async fn test_build_daily_covers_every_calendar_day() {
        let days = build_daily(&cycle_window(), 1, |day| async move {
            Ok::<_, SourceError>(vec![UsageRecord::new(u64::from(day.day()), 1, 0.5)])
        })
        .await;

        assert_eq!(days.len(), 29);
        assert_eq!(days[0].date, date(2024, 2, 5));
        assert_eq!(days[24].date, date(2024, 2, 29));
        assert_eq!(days[28].date, date(2024, 3, 4));
        assert!(days.windows(2).all(|w| w[0].date < w[1].date));
        assert_eq!(days[0].input_tokens, 5);
        assert_eq!(days[0].total_tokens, 6);
        assert_eq!(days[0].cost, 0.5);
    }

    #[tokio::test]
    async fn test_build_daily_zero_fills_when_every_query_fails() {
        let days = build_daily(&cycle_window(), 1, |_| async {
            Err::<Vec<UsageRecord>, _>(SourceError::NotConfigured)
        })
        .await;

        assert_eq!(days.len(), 29);
        assert!(days.windows(2).all(|w| w[0].date < w[1].date));
        assert!(
            days.iter()
                .all(|d| d.total_tokens == 0 && d.input_tokens == 0 && d.cost == 0.0)
        );
    }

    #[tokio::test]
    async fn test_build_daily_isolates_single_failure() {
        let bad_day = date(2024, 3, 6);
        let days = build_daily(&rolling_window(), 1, |day| async move {
            if day == bad_day {
                Err(SourceError::InvalidResponse("boom".into()))
            } else {
                Ok(vec![UsageRecord::new(2, 3, 0.25)])
            }
        })
        .await;

        assert_eq!(days.len(), 8);
        for day in &days {
            if day.date == bad_day {
                assert_eq!(*day, DailyUsage::zero(bad_day));
            } else {
                assert_eq!(day.total_tokens, 5);
            }
        }
    }

    #[tokio::test]
    async fn test_build_daily_concurrent_keeps_order() {
        let days = build_daily(&cycle_window(), 8, |day| async move {
            // Later days finish first.
            let delay = 30 - u64::from(day.ordinal() % 30);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, SourceError>(vec![UsageRecord::new(1, 0, 0.0)])
        })
        .await;

        assert_eq!(days.len(), 29);
        assert!(days.windows(2).all(|w| w[0].date < w[1].date));
        assert!(days.iter().all(|d| d.input_tokens == 1));
    }

    #[derive(Default)]
    struct RecordingSource {
        records: Vec<UsageRecord>,
        fail_on: Option<NaiveDate>,
        calls: Mutex<Vec<(String, DateTime<Utc>, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl MetricsSource for RecordingSource {
        async fn list_usage(
            &self,
            project: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> SourceResult<Vec<UsageRecord>> {
            self.calls
                .lock()
                .unwrap()
                .push((project.to_string(), start, end));
            if self.fail_on == Some(start.date_naive()) {
                return Err(SourceError::Api {
                    status: 502,
                    message: "bad gateway".into(),
                });
            }
            Ok(self.records.clone())
        }
    }

    struct StalledSource;

    #[async_trait]
    impl MetricsSource for StalledSource {
        async fn list_usage(
            &self,
            _project: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> SourceResult<Vec<UsageRecord>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_summary_queries_whole_window() {
        let source = Arc::new(RecordingSource {
            records: vec![UsageRecord::new(4, 6, 0.5)],
            ..Default::default()
        });
        let service = UsageService::new(source.clone(), Duration::from_secs(5), 1);

        let summary = service.summary("bot_sejasua", &cycle_window()).await.unwrap();

        assert_eq!(summary.total_tokens, 10);
        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "bot_sejasua");
        assert_eq!(calls[0].1, cycle_window().start_utc());
        assert_eq!(calls[0].2, cycle_window().end_utc());
    }

    #[tokio::test]
    async fn test_summary_propagates_source_failure() {
        let source = Arc::new(RecordingSource {
            fail_on: Some(date(2024, 2, 5)),
            ..Default::default()
        });
        let service = UsageService::new(source, Duration::from_secs(5), 1);

        let err = service.summary("bot_model", &cycle_window()).await.unwrap_err();
        assert!(matches!(err, UsageError::Source(SourceError::Api { .. })));
    }

    #[tokio::test]
    async fn test_summary_times_out() {
        let service = UsageService::new(Arc::new(StalledSource), Duration::from_millis(20), 1);

        let err = service.summary("bot_model", &cycle_window()).await.unwrap_err();
        assert!(matches!(err, UsageError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_daily_queries_each_day_and_isolates_failures() {
        let source = Arc::new(RecordingSource {
            records: vec![UsageRecord::new(1, 2, 0.25)],
            fail_on: Some(date(2024, 2, 10)),
            ..Default::default()
        });
        let service = UsageService::new(source.clone(), Duration::from_secs(5), 3);

        let days = service.daily("bot_model", &cycle_window()).await;

        assert_eq!(days.len(), 29);
        assert_eq!(days[5], DailyUsage::zero(date(2024, 2, 10)));
        assert_eq!(days[6].total_tokens, 3);

        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 29);
        let (_, start, end) = calls
            .iter()
            .find(|(_, start, _)| start.date_naive() == date(2024, 3, 4))
            .unwrap();
        assert_eq!(*start, day_bounds(date(2024, 3, 4)).0);
        assert_eq!(*end, day_bounds(date(2024, 3, 4)).1);
    }

    #[tokio::test]
    async fn test_daily_timeouts_are_zero_filled() {
        let service = UsageService::new(Arc::new(StalledSource), Duration::from_millis(10), 8);

        let days = service.daily("bot_model", &rolling_window()).await;

        assert_eq!(days.len(), 8);
        assert!(days.iter().all(|d| d.total_tokens == 0));
    }
}
