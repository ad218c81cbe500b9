//! End-to-end run of the offline stages on checkpoint files

use chrono::{Duration, NaiveDate, NaiveTime};
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;

use wellbeing_vitals::checkpoint::read_wide;
use wellbeing_vitals::config::{DataConfig, PipelineConfig};
use wellbeing_vitals::types::{
    CorrelationRow, MergedRecord, RawSurveyAnswer, RawUser, RawVital, RollingSignal,
    SurveyMeasure, VitalType, WHO5_QUESTION_IDS,
};
use wellbeing_vitals::{Pipeline, RawTables};

const USER: i64 = 239;
const EXCLUDED_USER: i64 = 1143114;
const DEVICE: i32 = 3;

fn start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 10, 1).unwrap()
}

fn midnight_secs(date: NaiveDate) -> f64 {
    date.and_time(NaiveTime::MIN).and_utc().timestamp() as f64
}

fn vital(date: NaiveDate, kind: VitalType, value: f64) -> RawVital {
    RawVital {
        user_id: USER,
        date,
        vital_id: kind.id(),
        value,
        device_id: DEVICE,
        timezone_offset: None,
    }
}

fn survey_bundle(user_id: i64, date: NaiveDate, level: i32) -> Vec<RawSurveyAnswer> {
    let created_at = date
        .and_hms_opt(10, 0, 0)
        .unwrap()
        .and_utc()
        .timestamp_millis();
    WHO5_QUESTION_IDS
        .iter()
        .map(|&question| RawSurveyAnswer {
            user_id,
            created_at,
            question,
            choice_id: level,
            description: String::new(),
        })
        .collect()
}

fn user(user_id: i64) -> RawUser {
    RawUser {
        user_id,
        salutation: Some("F".to_string()),
        birth_date: Some(1980),
        zip_code: Some("10115".to_string()),
        weight: Some(70.0),
        height: Some(170.0),
        bmi: Some(24.2),
    }
}

fn raw_tables() -> RawTables {
    let mut tables = RawTables::default();

    for day in 0..40 {
        let date = start() + Duration::days(day);
        let d = day as f64;
        tables.vitals.push(vital(date, VitalType::StepCount, 5000.0 + 100.0 * d + 37.0 * (d % 3.0)));
        tables.vitals.push(vital(date, VitalType::RestingHeartRate, 60.0 + (d % 4.0)));
        tables.vitals.push(vital(date, VitalType::SleepDuration, 420.0 + 5.0 * (d % 6.0)));
        tables.vitals.push(vital(date, VitalType::SleepOnset, midnight_secs(date) - 3600.0 + 60.0 * (d % 5.0)));
        tables.vitals.push(vital(date, VitalType::SleepOffset, midnight_secs(date) + 7.0 * 3600.0));
    }

    for day in 20..40 {
        let date = start() + Duration::days(day);
        let level = 1 + (day as i32 % 5);
        tables.surveys.extend(survey_bundle(USER, date, level));
        tables.surveys.extend(survey_bundle(EXCLUDED_USER, date, level));
    }

    tables.users = vec![user(USER), user(EXCLUDED_USER)];
    tables
}

fn config_in(root: &Path) -> PipelineConfig {
    PipelineConfig {
        data: DataConfig {
            external: root.join("00_external"),
            raw: root.join("01_raw"),
            interim: root.join("02_interim"),
            processed: root.join("03_processed"),
            derived: root.join("04_derived"),
            ..DataConfig::default()
        },
        ..PipelineConfig::default()
    }
}

fn run_stages(pipeline: &Pipeline) {
    pipeline.preprocess().unwrap();
    pipeline.merge().unwrap();
    pipeline.correlate().unwrap();
}

fn output_bytes(root: &Path, config: &PipelineConfig) -> Vec<Vec<u8>> {
    let names = &config.data.filenames;
    [
        root.join("02_interim").join(&names.surveys),
        root.join("02_interim").join(&names.vitals),
        root.join("03_processed").join(&names.rolling),
        root.join("03_processed").join(&names.merged),
        root.join("04_derived").join(&names.correlations),
    ]
    .iter()
    .map(|p| fs::read(p).unwrap())
    .collect()
}

#[test]
fn test_offline_stages_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let pipeline = Pipeline::new(config.clone());
    pipeline.prepare_directories().unwrap();

    fs::create_dir_all(&config.data.external).unwrap();
    fs::write(
        config.data.external.join(&config.data.filenames.zip_to_nuts),
        "CODE;NUTS3\n'10115';'DE300'\n",
    )
    .unwrap();
    pipeline.write_raw(&raw_tables()).unwrap();

    run_stages(&pipeline);

    let merged: Vec<MergedRecord> =
        read_wide(&config.data.processed.join(&config.data.filenames.merged)).unwrap();
    assert_eq!(merged.len(), 20);
    assert!(merged.iter().all(|r| r.user.user_id == USER));
    assert_eq!(merged[0].user.nuts3.as_deref(), Some("DE300"));
    assert_eq!(merged[0].user.age_group, Some(1));

    // Every survey day has at least 20 days of history in the window
    assert!(merged
        .iter()
        .all(|r| r.rolling.total.get(RollingSignal::StepCount).mean.is_some()));
    let jetlag = merged[0].rolling.social_jetlag();
    assert!(jetlag.is_some());

    let correlations: Vec<CorrelationRow> =
        read_wide(&config.data.derived.join(&config.data.filenames.correlations)).unwrap();
    assert_eq!(correlations.len(), 1);
    assert_eq!((correlations[0].user_id, correlations[0].device_id), (USER, DEVICE));

    let steps = correlations[0]
        .results
        .iter()
        .find(|r| r.question == SurveyMeasure::TotalWellbeing && r.vital == RollingSignal::StepCount)
        .unwrap();
    assert_eq!(steps.n, 20);
    assert!(steps.is_defined());
    assert!((-1.0..=1.0).contains(&steps.r));
}

#[test]
fn test_rerun_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let pipeline = Pipeline::new(config.clone());
    pipeline.prepare_directories().unwrap();
    pipeline.write_raw(&raw_tables()).unwrap();

    run_stages(&pipeline);
    let first = output_bytes(dir.path(), &config);

    run_stages(&pipeline);
    let second = output_bytes(dir.path(), &config);

    assert_eq!(first, second);
}
