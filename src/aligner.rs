//! Survey/vital alignment and rolling aggregation
//!
//! For every (user, date) with a survey response and every observed device,
//! this module computes trailing rolling statistics of each vital signal for
//! all days, weekdays only and weekend days only, and derives the
//! weekend-minus-weekday differences (social jetlag for the sleep midpoint).

use crate::config::RollingConfig;
use crate::error::PipelineError;
use crate::rolling::sliding_stats;
use crate::types::{
    DaySubset, MergedRecord, RollingSignal, RollingWindowEntry, SubsetAggregates, SurveyRecord,
    UserProfile, VitalRecord,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Key of one scaffold or vital row
pub type AlignmentKey = (i64, i32, NaiveDate);

/// Every (user, device, date) that needs an aggregate.
///
/// The cross product of survey (user, date) pairs and all device ids seen in
/// the vital table, so that each device gets an entry even on dates it
/// reported nothing.
pub fn build_scaffold(surveys: &[SurveyRecord], vitals: &[VitalRecord]) -> BTreeSet<AlignmentKey> {
    let devices: BTreeSet<i32> = vitals.iter().map(|v| v.device_id).collect();

    let mut scaffold = BTreeSet::new();
    for survey in surveys {
        for &device_id in &devices {
            scaffold.insert((survey.user_id, device_id, survey.date));
        }
    }
    scaffold
}

/// Index real vital rows by (user, device) and date, rejecting duplicate keys
fn index_vitals(
    vitals: &[VitalRecord],
) -> Result<BTreeMap<(i64, i32), BTreeMap<NaiveDate, &VitalRecord>>, PipelineError> {
    let mut groups: BTreeMap<(i64, i32), BTreeMap<NaiveDate, &VitalRecord>> = BTreeMap::new();
    for record in vitals {
        let by_date = groups.entry((record.user_id, record.device_id)).or_default();
        if by_date.insert(record.date, record).is_some() {
            return Err(PipelineError::DuplicateKey {
                user_id: record.user_id,
                device_id: record.device_id,
                date: record.date,
            });
        }
    }
    Ok(groups)
}

/// Compute rolling aggregates for every scaffold key.
///
/// Output is sorted by (user, device, date) and contains exactly one entry
/// per scaffold key.
pub fn align_vitals(
    surveys: &[SurveyRecord],
    vitals: &[VitalRecord],
    config: &RollingConfig,
) -> Result<Vec<RollingWindowEntry>, PipelineError> {
    let scaffold = build_scaffold(surveys, vitals);
    let groups = index_vitals(vitals)?;

    info!(
        surveys = surveys.len(),
        vitals = vitals.len(),
        scaffold = scaffold.len(),
        "Aligning vitals to survey dates"
    );

    // Scaffold dates per (user, device), already sorted by the BTreeSet order
    let mut queries: BTreeMap<(i64, i32), Vec<NaiveDate>> = BTreeMap::new();
    for &(user_id, device_id, date) in &scaffold {
        queries.entry((user_id, device_id)).or_default().push(date);
    }

    let mut entries = Vec::with_capacity(scaffold.len());
    for (&(user_id, device_id), dates) in &queries {
        let mut group_entries: Vec<RollingWindowEntry> = dates
            .iter()
            .map(|&date| RollingWindowEntry {
                user_id,
                device_id,
                date,
                total: SubsetAggregates::default(),
                weekday: SubsetAggregates::default(),
                weekend: SubsetAggregates::default(),
                differences: [None; 6],
            })
            .collect();

        if let Some(rows) = groups.get(&(user_id, device_id)) {
            for subset in DaySubset::ALL {
                let view: Vec<&VitalRecord> = rows
                    .values()
                    .copied()
                    .filter(|r| subset.includes(r.weekend))
                    .collect();

                for signal in RollingSignal::ALL {
                    let observations: Vec<(NaiveDate, Option<f64>)> =
                        view.iter().map(|r| (r.date, r.signal(signal))).collect();
                    let stats = sliding_stats(
                        &observations,
                        dates,
                        config.window_days,
                        config.min_count(subset),
                    );
                    for (entry, s) in group_entries.iter_mut().zip(stats) {
                        entry.subset_mut(subset).set(signal, s);
                    }
                }
            }
        }

        for entry in &mut group_entries {
            apply_differences(entry);
        }
        entries.extend(group_entries);
    }

    ensure_unique(&entries)?;

    let with_total = entries
        .iter()
        .filter(|e| e.total.get(RollingSignal::StepCount).mean.is_some())
        .count();
    debug!(entries = entries.len(), with_step_mean = with_total, "Rolling aggregation done");

    Ok(entries)
}

/// Weekend mean minus weekday mean for every signal
pub fn apply_differences(entry: &mut RollingWindowEntry) {
    for signal in RollingSignal::ALL {
        let weekend = entry.weekend.get(signal).mean;
        let weekday = entry.weekday.get(signal).mean;
        entry.differences[signal.index()] = match (weekend, weekday) {
            (Some(we), Some(wd)) => Some(we - wd),
            _ => None,
        };
    }
}

fn ensure_unique(entries: &[RollingWindowEntry]) -> Result<(), PipelineError> {
    let mut seen = BTreeSet::new();
    for e in entries {
        if !seen.insert((e.user_id, e.device_id, e.date)) {
            return Err(PipelineError::DuplicateKey {
                user_id: e.user_id,
                device_id: e.device_id,
                date: e.date,
            });
        }
    }
    Ok(())
}

/// Inner-join surveys, rolling entries and user profiles.
///
/// One row per user, survey date and device. Users missing from `users`
/// (for example excluded ones) are dropped.
pub fn merge_dataset(
    users: &[UserProfile],
    surveys: &[SurveyRecord],
    rolling: &[RollingWindowEntry],
) -> Vec<MergedRecord> {
    let users_by_id: HashMap<i64, &UserProfile> = users.iter().map(|u| (u.user_id, u)).collect();
    let surveys_by_key: HashMap<(i64, NaiveDate), &SurveyRecord> =
        surveys.iter().map(|s| ((s.user_id, s.date), s)).collect();

    let merged: Vec<MergedRecord> = rolling
        .iter()
        .filter_map(|entry| {
            let user = users_by_id.get(&entry.user_id)?;
            let survey = surveys_by_key.get(&(entry.user_id, entry.date))?;
            Some(MergedRecord {
                user: (*user).clone(),
                survey: (*survey).clone(),
                rolling: entry.clone(),
            })
        })
        .collect();

    info!(
        rolling = rolling.len(),
        merged = merged.len(),
        "Merged users, surveys and rolling vitals"
    );
    merged
}
