//! Calendar-day rolling windows
//!
//! A `RollingWindow` keeps the dated observations of one signal that fall
//! inside a trailing window of `window_days` calendar days ending at the
//! current query date, i.e. the half-open interval `(date - window_days, date]`.
//! Gaps in reporting shrink the effective sample instead of stretching the
//! window back in time.

use crate::stats;
use crate::types::WindowStats;
use chrono::{Duration, NaiveDate};
use std::collections::VecDeque;

/// Default rolling window in calendar days
pub const DEFAULT_WINDOW_DAYS: u32 = 28;

/// Trailing calendar-day window over one signal
#[derive(Debug, Clone)]
pub struct RollingWindow {
    values: VecDeque<(NaiveDate, f64)>,
    window_days: u32,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DAYS)
    }
}

impl RollingWindow {
    pub fn new(window_days: u32) -> Self {
        Self {
            values: VecDeque::new(),
            window_days,
        }
    }

    /// Add an observation. Observations must arrive in date order.
    pub fn push(&mut self, date: NaiveDate, value: f64) {
        debug_assert!(self.values.back().map_or(true, |(d, _)| *d <= date));
        self.values.push_back((date, value));
    }

    /// Drop observations that are no longer inside the window ending at `date`
    pub fn advance_to(&mut self, date: NaiveDate) {
        let oldest_kept = date - Duration::days(i64::from(self.window_days) - 1);
        while let Some((d, _)) = self.values.front() {
            if *d < oldest_kept {
                self.values.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean and sample standard deviation, both missing below `min_count` observations
    pub fn stats(&self, min_count: usize) -> WindowStats {
        if self.values.is_empty() || self.values.len() < min_count {
            return WindowStats::default();
        }
        let values: Vec<f64> = self.values.iter().map(|(_, v)| *v).collect();
        WindowStats {
            mean: stats::mean(&values),
            std: stats::sample_std(&values),
        }
    }
}

/// Evaluate a trailing window at each query date with a two-pointer sweep.
///
/// `observations` and `queries` must both be sorted by date. Missing values
/// (`None` or non-finite) are skipped and do not count towards `min_count`.
/// Returns one `WindowStats` per query date, in query order.
pub fn sliding_stats(
    observations: &[(NaiveDate, Option<f64>)],
    queries: &[NaiveDate],
    window_days: u32,
    min_count: usize,
) -> Vec<WindowStats> {
    let mut window = RollingWindow::new(window_days);
    let mut next = 0;
    let mut out = Vec::with_capacity(queries.len());

    for &query in queries {
        while next < observations.len() && observations[next].0 <= query {
            if let (date, Some(value)) = observations[next] {
                if value.is_finite() {
                    window.push(date, value);
                }
            }
            next += 1;
        }
        window.advance_to(query);
        out.push(window.stats(min_count));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(n: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 10, 1).unwrap() + Duration::days(i64::from(n))
    }

    #[test]
    fn test_missing_value_shrinks_sample() {
        let observations = vec![
            (day(0), Some(100.0)),
            (day(1), Some(110.0)),
            (day(2), Some(120.0)),
            (day(3), None),
            (day(4), Some(130.0)),
        ];
        let stats = sliding_stats(&observations, &[day(4)], 28, 3);

        assert_eq!(stats[0].mean, Some(115.0));
        let expected_std = (500.0f64 / 3.0).sqrt();
        assert!((stats[0].std.unwrap() - expected_std).abs() < 1e-12);
    }

    #[test]
    fn test_window_is_calendar_days_not_rows() {
        // Day 0 falls out of the 28-day window ending at day 28
        let observations = vec![(day(0), Some(10.0)), (day(27), Some(20.0)), (day(28), Some(30.0))];
        let stats = sliding_stats(&observations, &[day(27), day(28)], 28, 1);

        assert_eq!(stats[0].mean, Some(15.0));
        assert_eq!(stats[1].mean, Some(25.0));
    }

    #[test]
    fn test_below_min_count_is_missing_despite_older_values() {
        let mut observations: Vec<_> = (0..20).map(|i| (day(i), Some(1.0))).collect();
        observations.push((day(60), Some(2.0)));

        let stats = sliding_stats(&observations, &[day(19), day(60)], 28, 14);

        assert_eq!(stats[0].mean, Some(1.0));
        assert_eq!(stats[1], WindowStats::default());
    }

    #[test]
    fn test_single_value_has_mean_but_no_std() {
        let stats = sliding_stats(&[(day(0), Some(5.0))], &[day(3)], 28, 1);
        assert_eq!(stats[0].mean, Some(5.0));
        assert_eq!(stats[0].std, None);
    }

    #[test]
    fn test_query_without_observations() {
        let stats = sliding_stats(&[], &[day(0), day(1)], 28, 1);
        assert!(stats.iter().all(|s| s.mean.is_none() && s.std.is_none()));
    }

    #[test]
    fn test_window_advance() {
        let mut window = RollingWindow::new(3);
        for i in 0..5 {
            window.push(day(i), i as f64);
        }
        window.advance_to(day(4));
        // Only days 2, 3, 4 remain
        assert_eq!(window.len(), 3);
        assert_eq!(window.stats(3).mean, Some(3.0));
    }
}
