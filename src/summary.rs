//! Wellbeing by binned vital level
//!
//! Rolling means are rounded to a per-signal bin width, implausible bins are
//! discarded, and `total_wellbeing` is summarized per bin.

use crate::stats;
use crate::types::{BinSummary, DaySubset, MergedRecord, RollingSignal};
use std::collections::BTreeMap;
use tracing::info;

/// Bin width of a signal in its own unit
pub fn bin_interval(signal: RollingSignal) -> f64 {
    match signal {
        RollingSignal::StepCount => 1000.0,
        RollingSignal::RestingHeartRate => 1.0,
        RollingSignal::SleepDuration => 15.0,
        RollingSignal::SleepOnset | RollingSignal::SleepOffset | RollingSignal::Midsleep => 0.2,
    }
}

/// Inclusive range of bins kept in the summary, `None` when unbounded
pub fn plausible_range(signal: RollingSignal) -> Option<(f64, f64)> {
    match signal {
        RollingSignal::StepCount => Some((1000.0, 20000.0)),
        RollingSignal::RestingHeartRate => Some((45.0, 90.0)),
        RollingSignal::SleepDuration => Some((120.0, 600.0)),
        RollingSignal::SleepOnset => Some((-3.0, 2.0)),
        RollingSignal::SleepOffset => Some((4.5, 10.0)),
        RollingSignal::Midsleep => None,
    }
}

/// Bin index of a value, rounding halfway cases to even
fn bin_index(value: f64, interval: f64) -> i64 {
    (value / interval).round_ties_even() as i64
}

/// Mean, spread and count of wellbeing per signal, subset and bin
pub fn summarize_by_bin(records: &[MergedRecord]) -> Vec<BinSummary> {
    let mut out = Vec::new();

    for signal in RollingSignal::CORRELATED {
        let interval = bin_interval(signal);
        let range = plausible_range(signal);

        for subset in DaySubset::ALL {
            let mut bins: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
            for record in records {
                let Some(value) = record.rolling.subset(subset).get(signal).mean else {
                    continue;
                };
                if !value.is_finite() || !record.survey.total_wellbeing.is_finite() {
                    continue;
                }
                let index = bin_index(value, interval);
                let bin = index as f64 * interval;
                if range.is_some_and(|(lo, hi)| bin < lo || bin > hi) {
                    continue;
                }
                bins.entry(index).or_default().push(record.survey.total_wellbeing);
            }

            for (index, values) in bins {
                let Some(mean) = stats::mean(&values) else {
                    continue;
                };
                let std = stats::sample_std(&values);
                let count = values.len();
                out.push(BinSummary {
                    signal,
                    subset,
                    bin: index as f64 * interval,
                    mean,
                    std,
                    count,
                    err: std.map(|s| s / (count as f64).sqrt()),
                });
            }
        }
    }

    info!(records = records.len(), bins = out.len(), "Summarized wellbeing by vital bin");
    out
}
