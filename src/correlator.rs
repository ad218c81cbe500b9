//! Per-user Pearson correlation between wellbeing and rolling vitals
//!
//! For each (user, device) group every survey measure is correlated with the
//! all-days rolling mean of each vital. Pairs with a missing or non-finite
//! side are dropped first; what remains is the sample size `n`.

use crate::stats;
use crate::types::{CorrelationResult, CorrelationRow, MergedRecord, RollingSignal, SurveyMeasure};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Pearson r, p-value and paired sample size of two series.
///
/// Returns `(NaN, NaN, n)` when fewer than two finite pairs remain or either
/// side is constant.
pub fn correlate_pair(x: &[f64], y: &[Option<f64>]) -> (f64, f64, usize) {
    let (xs, ys): (Vec<f64>, Vec<f64>) = x
        .iter()
        .zip(y)
        .filter_map(|(&a, b)| match b {
            Some(b) if a.is_finite() && b.is_finite() => Some((a, *b)),
            _ => None,
        })
        .unzip();

    let n = xs.len();
    match stats::pearson(&xs, &ys) {
        Some((r, p)) => (r, p, n),
        None => (f64::NAN, f64::NAN, n),
    }
}

/// Correlate every survey measure with every correlated signal for one group
pub fn correlate_group(user_id: i64, device_id: i32, rows: &[&MergedRecord]) -> CorrelationRow {
    let mut results = Vec::with_capacity(SurveyMeasure::ALL.len() * RollingSignal::CORRELATED.len());

    for question in SurveyMeasure::ALL {
        let x: Vec<f64> = rows.iter().map(|r| r.survey.measure(question)).collect();
        for vital in RollingSignal::CORRELATED {
            let y: Vec<Option<f64>> = rows.iter().map(|r| r.rolling.total.get(vital).mean).collect();
            let (r, p_value, n) = correlate_pair(&x, &y);
            results.push(CorrelationResult {
                user_id,
                device_id,
                question,
                vital,
                r,
                p_value,
                n,
            });
        }
    }

    CorrelationRow {
        user_id,
        device_id,
        results,
    }
}

/// Correlation rows for every (user, device) group, sorted by key
pub fn correlate(records: &[MergedRecord]) -> Vec<CorrelationRow> {
    let mut groups: BTreeMap<(i64, i32), Vec<&MergedRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.rolling.user_id, record.rolling.device_id))
            .or_default()
            .push(record);
    }

    let rows: Vec<CorrelationRow> = groups
        .into_iter()
        .map(|((user_id, device_id), rows)| correlate_group(user_id, device_id, &rows))
        .collect();

    let defined = rows
        .iter()
        .flat_map(|row| &row.results)
        .filter(|r| r.is_defined())
        .count();
    let total = rows.len() * SurveyMeasure::ALL.len() * RollingSignal::CORRELATED.len();
    debug!(defined, undefined = total - defined, "Correlation coverage");
    info!(groups = rows.len(), records = records.len(), "Computed correlations");

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        RollingWindowEntry, SubsetAggregates, SurveyRecord, UserProfile, WindowStats,
    };
    use chrono::{Duration, NaiveDate};

    fn record(user_id: i64, device_id: i32, day: i64, wellbeing: f64, steps: Option<f64>) -> MergedRecord {
        let date = NaiveDate::from_ymd_opt(2021, 11, 1).unwrap() + Duration::days(day);
        let mut total = SubsetAggregates::default();
        total.set(
            RollingSignal::StepCount,
            WindowStats {
                mean: steps,
                std: None,
            },
        );
        MergedRecord {
            user: UserProfile {
                user_id,
                salutation: None,
                birth_year: None,
                zip_code: None,
                age: None,
                age_group: None,
                nuts3: None,
            },
            survey: SurveyRecord::from_answers(user_id, date, [wellbeing; 5]),
            rolling: RollingWindowEntry {
                user_id,
                device_id,
                date,
                total,
                weekday: SubsetAggregates::default(),
                weekend: SubsetAggregates::default(),
                differences: [None; 6],
            },
        }
    }

    fn find(row: &CorrelationRow, question: SurveyMeasure, vital: RollingSignal) -> CorrelationResult {
        *row.results
            .iter()
            .find(|r| r.question == question && r.vital == vital)
            .unwrap()
    }

    #[test]
    fn test_single_pair_is_undefined() {
        let (r, p, n) = correlate_pair(&[3.0, 4.0], &[Some(1000.0), None]);
        assert!(r.is_nan());
        assert!(p.is_nan());
        assert_eq!(n, 1);
    }

    #[test]
    fn test_constant_series_is_undefined() {
        let (r, p, n) = correlate_pair(&[3.0, 3.0, 3.0], &[Some(1.0), Some(2.0), Some(3.0)]);
        assert!(r.is_nan() && p.is_nan());
        assert_eq!(n, 3);
    }

    #[test]
    fn test_repeated_fractional_wellbeing_is_undefined() {
        for n in 3..=12 {
            let x = vec![2.4; n];
            let y: Vec<Option<f64>> = (0..n).map(|i| Some(4000.0 + 350.0 * i as f64)).collect();
            let (r, p, count) = correlate_pair(&x, &y);
            assert!(r.is_nan() && p.is_nan(), "n = {n}: r = {r}, p = {p}");
            assert_eq!(count, n);
        }
    }

    #[test]
    fn test_non_finite_pairs_dropped() {
        let (r, _, n) = correlate_pair(
            &[1.0, 2.0, f64::NAN, 3.0],
            &[Some(2.0), Some(4.0), Some(5.0), Some(f64::INFINITY)],
        );
        assert_eq!(n, 2);
        assert!((r - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_groups_and_result_layout() {
        let records = vec![
            record(2, 3, 0, 4.0, Some(9000.0)),
            record(1, 3, 0, 1.0, Some(1000.0)),
            record(1, 3, 1, 2.0, Some(2500.0)),
            record(1, 3, 2, 3.0, Some(2900.0)),
            record(1, 6, 0, 2.0, None),
        ];
        let rows = correlate(&records);

        let keys: Vec<(i64, i32)> = rows.iter().map(|r| (r.user_id, r.device_id)).collect();
        assert_eq!(keys, vec![(1, 3), (1, 6), (2, 3)]);
        assert!(rows.iter().all(|r| r.results.len() == 30));

        let steps = find(&rows[0], SurveyMeasure::TotalWellbeing, RollingSignal::StepCount);
        assert_eq!(steps.n, 3);
        assert!(steps.r > 0.9);
        assert_eq!(steps.column_prefix(), "total_wellbeing_step_count");

        let missing = find(&rows[1], SurveyMeasure::Q49, RollingSignal::StepCount);
        assert_eq!(missing.n, 0);
        assert!(!missing.is_defined());

        let rhr = find(&rows[0], SurveyMeasure::Q49, RollingSignal::RestingHeartRate);
        assert_eq!(rhr.n, 0);
    }

    #[test]
    fn test_correlation_is_symmetric() {
        let x = [1.0, 3.0, 2.0, 5.0, 4.0];
        let y = [2.0, 1.0, 4.0, 3.0, 6.0];
        let (r_xy, p_xy, _) = correlate_pair(&x, &y.map(Some));
        let (r_yx, p_yx, _) = correlate_pair(&y, &x.map(Some));
        assert_eq!(r_xy, r_yx);
        assert_eq!(p_xy, p_yx);
    }
}
