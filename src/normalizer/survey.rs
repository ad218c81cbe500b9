//! WHO-5 survey normalization
//!
//! Turns one row per answer into one row per (user, day) holding all five
//! answers plus their mean. A day is kept only if every WHO-5 question was
//! answered exactly once.

use crate::config::SurveyConfig;
use crate::error::PipelineError;
use crate::types::{RawSurveyAnswer, SurveyRecord, WHO5_QUESTION_IDS};
use chrono::{DateTime, NaiveDate};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Calendar day (UTC) of an epoch-millisecond timestamp
pub fn date_from_millis(created_at: i64) -> Result<NaiveDate, PipelineError> {
    DateTime::from_timestamp_millis(created_at)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| PipelineError::DateOutOfRange(format!("{created_at} ms")))
}

/// Normalize raw answers into complete per-day response bundles
pub fn normalize_surveys(
    answers: &[RawSurveyAnswer],
    config: &SurveyConfig,
) -> Result<Vec<SurveyRecord>, PipelineError> {
    // (user, date) -> question -> choices
    let mut bundles: BTreeMap<(i64, NaiveDate), BTreeMap<i32, Vec<i32>>> = BTreeMap::new();
    let mut skipped_early = 0usize;
    let mut skipped_foreign = 0usize;

    for answer in answers {
        let date = date_from_millis(answer.created_at)?;

        if config.start_date.is_some_and(|start| date < start) {
            skipped_early += 1;
            continue;
        }
        if !WHO5_QUESTION_IDS.contains(&answer.question) {
            skipped_foreign += 1;
            continue;
        }

        bundles
            .entry((answer.user_id, date))
            .or_default()
            .entry(answer.question)
            .or_default()
            .push(answer.choice_id);
    }

    let total_bundles = bundles.len();
    let mut records = Vec::with_capacity(total_bundles);

    for ((user_id, date), mut by_question) in bundles {
        if config.collapse_identical_answers {
            for choices in by_question.values_mut() {
                choices.sort_unstable();
                choices.dedup();
            }
        }

        if let Some(answers) = complete_bundle(&by_question) {
            records.push(SurveyRecord::from_answers(user_id, date, answers));
        }
    }

    debug!(skipped_early, skipped_foreign, "Skipped survey answers");
    info!(
        answers = answers.len(),
        bundles = total_bundles,
        complete = records.len(),
        "Normalized survey responses"
    );

    Ok(records)
}

/// Answers in question order when each question was answered exactly once
fn complete_bundle(by_question: &BTreeMap<i32, Vec<i32>>) -> Option<[f64; 5]> {
    if by_question.len() != WHO5_QUESTION_IDS.len() {
        return None;
    }

    let mut answers = [0.0; 5];
    for (slot, question) in answers.iter_mut().zip(WHO5_QUESTION_IDS) {
        match by_question.get(&question).map(Vec::as_slice) {
            Some([choice]) => *slot = f64::from(*choice),
            _ => return None,
        }
    }
    Some(answers)
}
