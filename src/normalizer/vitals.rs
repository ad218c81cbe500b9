//! Vital record normalization
//!
//! Pivots long vital rows into one wide row per (user, date, device),
//! converts sleep timing to hours relative to midnight, corrects for
//! daylight saving time and nulls implausible values. Rows are never
//! dropped for bad values, only for falling past the cutoff date.

use crate::config::{DstMode, VitalConfig};
use crate::error::PipelineError;
use crate::stats;
use crate::types::{RawVital, VitalRecord, VitalType};
use chrono::{NaiveDate, NaiveTime};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Hours between midnight (UTC) of `date` and an epoch-seconds timestamp
pub fn hours_since_midnight(timestamp_secs: f64, date: NaiveDate) -> f64 {
    let midnight = date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64;
    (timestamp_secs - midnight) / SECONDS_PER_HOUR
}

/// Normalize raw vital rows into wide per-day records
pub fn normalize_vitals(
    raw: &[RawVital],
    config: &VitalConfig,
) -> Result<Vec<VitalRecord>, PipelineError> {
    let mut records = pivot(raw, config.dst_mode);

    for record in records.iter_mut() {
        convert_sleep_timing(record);
        if config.dst_mode == DstMode::FixedRanges {
            apply_fixed_dst(record, config);
        }
        apply_sleep_bounds(record, config);
    }

    let before_cutoff = records.len();
    records.retain(|r| r.date <= config.cutoff_date);
    debug!(
        dropped = before_cutoff - records.len(),
        cutoff = %config.cutoff_date,
        "Dropped vitals past cutoff"
    );

    for record in records.iter_mut() {
        if config.unreliable_sleep_devices.contains(&record.device_id) {
            for vital in VitalType::ALL.into_iter().filter(VitalType::is_sleep) {
                *record.slot_mut(vital) = None;
            }
        }
    }

    null_outliers(&mut records, config.lower_quantile, config.upper_quantile);

    info!(raw = raw.len(), records = records.len(), "Normalized vital records");
    Ok(records)
}

fn pivot(raw: &[RawVital], dst_mode: DstMode) -> Vec<VitalRecord> {
    let mut wide: BTreeMap<(i64, NaiveDate, i32), VitalRecord> = BTreeMap::new();
    let mut unknown = 0usize;
    let mut duplicates = 0usize;

    for row in raw {
        let Some(vital) = VitalType::from_id(row.vital_id) else {
            unknown += 1;
            continue;
        };

        let mut value = row.value;
        if dst_mode == DstMode::RecordOffset && vital.is_sleep_timing() {
            if let Some(offset_minutes) = row.timezone_offset {
                value += f64::from(offset_minutes) * 60.0;
            }
        }

        let record = wide
            .entry((row.user_id, row.date, row.device_id))
            .or_insert_with(|| VitalRecord::empty(row.user_id, row.date, row.device_id));
        let slot = record.slot_mut(vital);
        if slot.is_some() {
            duplicates += 1;
            continue;
        }
        *slot = Some(value).filter(|v| v.is_finite());
    }

    if unknown > 0 {
        debug!(unknown, "Skipped vitals of unknown type");
    }
    if duplicates > 0 {
        warn!(duplicates, "Duplicate vital readings, keeping the first");
    }

    wide.into_values().collect()
}

fn convert_sleep_timing(record: &mut VitalRecord) {
    let date = record.date;
    for vital in [VitalType::SleepOnset, VitalType::SleepOffset] {
        let slot = record.slot_mut(vital);
        *slot = slot.map(|ts| hours_since_midnight(ts, date));
    }
}

fn apply_fixed_dst(record: &mut VitalRecord, config: &VitalConfig) {
    let date = record.date;
    let shifted = [
        (VitalType::SleepOnset, &config.dst_onset_ranges),
        (VitalType::SleepOffset, &config.dst_offset_ranges),
    ];
    for (vital, ranges) in shifted {
        if ranges.iter().any(|r| r.contains(date)) {
            let slot = record.slot_mut(vital);
            *slot = slot.map(|h| h + 1.0);
        }
    }
}

fn apply_sleep_bounds(record: &mut VitalRecord, config: &VitalConfig) {
    let bounded = [
        (VitalType::SleepOnset, config.onset_bounds),
        (VitalType::SleepOffset, config.offset_bounds),
    ];
    for (vital, bounds) in bounded {
        if let Some(bounds) = bounds {
            let slot = record.slot_mut(vital);
            *slot = slot.filter(|v| bounds.contains(*v));
        }
    }
}

/// Null every value outside the per-vital `[lower, upper]` quantile range
fn null_outliers(records: &mut [VitalRecord], lower: f64, upper: f64) {
    for vital in VitalType::ALL {
        let values: Vec<f64> = records.iter().filter_map(|r| r.get(vital)).collect();
        let (Some(lo), Some(hi)) = (stats::quantile(&values, lower), stats::quantile(&values, upper))
        else {
            continue;
        };

        let mut nulled = 0usize;
        for record in records.iter_mut() {
            let slot = record.slot_mut(vital);
            if slot.is_some_and(|v| v < lo || v > hi) {
                *slot = None;
                nulled += 1;
            }
        }
        debug!(vital = vital.as_str(), lo, hi, nulled, "Nulled outliers");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Bounds, DateRange};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn raw(user_id: i64, date: NaiveDate, vital: VitalType, value: f64, device_id: i32) -> RawVital {
        RawVital {
            user_id,
            date,
            vital_id: vital.id(),
            value,
            device_id,
            timezone_offset: None,
        }
    }

    fn epoch(date: NaiveDate, hours: f64) -> f64 {
        date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64 + hours * 3600.0
    }

    /// Config with the quantile filter disabled
    fn no_outlier_config() -> VitalConfig {
        VitalConfig {
            lower_quantile: 0.0,
            upper_quantile: 1.0,
            dst_mode: DstMode::None,
            ..VitalConfig::default()
        }
    }

    #[test]
    fn test_pivot_to_wide_rows() {
        let d = date(2021, 9, 4);
        let rows = vec![
            raw(239, d, VitalType::StepCount, 10501.0, 3),
            raw(239, d, VitalType::RestingHeartRate, 58.0, 3),
            raw(239, d, VitalType::StepCount, 9000.0, 6),
        ];

        let records = normalize_vitals(&rows, &no_outlier_config()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_id, 3);
        assert_eq!(records[0].step_count, Some(10501.0));
        assert_eq!(records[0].resting_heart_rate, Some(58.0));
        assert!(records[0].weekend);
        assert_eq!(records[1].step_count, Some(9000.0));
    }

    #[test]
    fn test_sleep_timing_hours_relative_to_midnight() {
        let d = date(2021, 12, 1);
        let rows = vec![
            raw(1, d, VitalType::SleepOnset, epoch(d, -1.5), 3),
            raw(1, d, VitalType::SleepOffset, epoch(d, 7.25), 3),
        ];

        let records = normalize_vitals(&rows, &no_outlier_config()).unwrap();
        assert_eq!(records[0].sleep_onset, Some(-1.5));
        assert_eq!(records[0].sleep_offset, Some(7.25));
    }

    #[test]
    fn test_record_offset_dst_correction() {
        let d = date(2022, 6, 1);
        let mut onset = raw(1, d, VitalType::SleepOnset, epoch(d, -1.0), 3);
        onset.timezone_offset = Some(120);
        let mut steps = raw(1, d, VitalType::StepCount, 5000.0, 3);
        steps.timezone_offset = Some(120);

        let config = VitalConfig {
            dst_mode: DstMode::RecordOffset,
            ..no_outlier_config()
        };
        let records = normalize_vitals(&[onset, steps], &config).unwrap();
        assert_eq!(records[0].sleep_onset, Some(1.0));
        assert_eq!(records[0].step_count, Some(5000.0));
    }

    #[test]
    fn test_fixed_range_dst_correction() {
        let summer = date(2022, 6, 1);
        let winter = date(2022, 12, 1);
        let rows = vec![
            raw(1, summer, VitalType::SleepOnset, epoch(summer, -1.0), 3),
            raw(1, summer, VitalType::SleepOffset, epoch(summer, 6.0), 3),
            raw(1, winter, VitalType::SleepOnset, epoch(winter, -1.0), 3),
        ];
        let config = VitalConfig {
            dst_mode: DstMode::FixedRanges,
            dst_onset_ranges: vec![DateRange {
                start: Some(date(2022, 3, 28)),
                end: Some(date(2022, 10, 30)),
            }],
            dst_offset_ranges: vec![DateRange {
                start: Some(date(2022, 3, 28)),
                end: Some(date(2022, 10, 31)),
            }],
            ..no_outlier_config()
        };

        let records = normalize_vitals(&rows, &config).unwrap();
        assert_eq!(records[0].sleep_onset, Some(0.0));
        assert_eq!(records[0].sleep_offset, Some(7.0));
        assert_eq!(records[1].sleep_onset, Some(-1.0));
    }

    #[test]
    fn test_cutoff_and_unreliable_device() {
        let rows = vec![
            raw(1, date(2022, 12, 31), VitalType::SleepDuration, 420.0, 6),
            raw(1, date(2022, 12, 31), VitalType::StepCount, 4000.0, 6),
            raw(1, date(2023, 1, 1), VitalType::StepCount, 4000.0, 3),
        ];

        let records = normalize_vitals(&rows, &no_outlier_config()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sleep_duration, None);
        assert_eq!(records[0].step_count, Some(4000.0));
    }

    #[test]
    fn test_outliers_nulled_not_dropped() {
        let d = date(2021, 10, 1);
        let mut rows: Vec<RawVital> = (0..40)
            .map(|i| raw(i, d, VitalType::RestingHeartRate, 60.0 + (i % 5) as f64, 3))
            .collect();
        rows.push(raw(100, d, VitalType::RestingHeartRate, 250.0, 3));
        rows.push(raw(101, d, VitalType::RestingHeartRate, 5.0, 3));

        let records = normalize_vitals(&rows, &VitalConfig { dst_mode: DstMode::None, ..VitalConfig::default() }).unwrap();
        assert_eq!(records.len(), 42);

        let extreme: Vec<_> = records.iter().filter(|r| r.user_id >= 100).collect();
        assert!(extreme.iter().all(|r| r.resting_heart_rate.is_none()));
        assert!(records
            .iter()
            .filter(|r| r.user_id < 100)
            .all(|r| r.resting_heart_rate.is_some()));
    }

    #[test]
    fn test_absolute_onset_bounds() {
        let d = date(2021, 12, 1);
        let rows = vec![raw(1, d, VitalType::SleepOnset, epoch(d, 14.0), 3)];
        let config = VitalConfig {
            onset_bounds: Some(Bounds { min: -12.0, max: 12.0 }),
            ..no_outlier_config()
        };
        let records = normalize_vitals(&rows, &config).unwrap();
        assert_eq!(records[0].sleep_onset, None);
    }

    #[test]
    fn test_duplicate_reading_keeps_first() {
        let d = date(2021, 10, 1);
        let rows = vec![
            raw(1, d, VitalType::StepCount, 1000.0, 3),
            raw(1, d, VitalType::StepCount, 2000.0, 3),
        ];
        let records = normalize_vitals(&rows, &no_outlier_config()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].step_count, Some(1000.0));
    }
}
