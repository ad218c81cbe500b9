//! Core types for the wellbeing/vitals pipeline
//!
//! This module defines the records that flow through each stage of the
//! pipeline: raw database rows, normalized per-day rows, rolling window
//! aggregates and correlation results.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// WHO-5 question ids, in column order
pub const WHO5_QUESTION_IDS: [i32; 5] = [49, 50, 54, 55, 56];

/// Vital signal types collected from wearables
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalType {
    StepCount,
    SleepDuration,
    SleepOnset,
    SleepOffset,
    RestingHeartRate,
}

impl VitalType {
    pub const ALL: [VitalType; 5] = [
        VitalType::StepCount,
        VitalType::SleepDuration,
        VitalType::SleepOnset,
        VitalType::SleepOffset,
        VitalType::RestingHeartRate,
    ];

    /// Type id in the vital data table
    pub fn id(&self) -> i32 {
        match self {
            VitalType::StepCount => 9,
            VitalType::SleepDuration => 43,
            VitalType::SleepOnset => 52,
            VitalType::SleepOffset => 53,
            VitalType::RestingHeartRate => 65,
        }
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.id() == id)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VitalType::StepCount => "step_count",
            VitalType::SleepDuration => "sleep_duration",
            VitalType::SleepOnset => "sleep_onset",
            VitalType::SleepOffset => "sleep_offset",
            VitalType::RestingHeartRate => "resting_heart_rate",
        }
    }

    /// Vitals derived from the sleep tracker
    pub fn is_sleep(&self) -> bool {
        matches!(
            self,
            VitalType::SleepDuration | VitalType::SleepOnset | VitalType::SleepOffset
        )
    }

    /// Sleep timing vitals stored as epoch timestamps upstream
    pub fn is_sleep_timing(&self) -> bool {
        matches!(self, VitalType::SleepOnset | VitalType::SleepOffset)
    }
}

/// Raw answer to a single WHO-5 question as stored in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSurveyAnswer {
    pub user_id: i64,
    /// Creation time in epoch milliseconds
    pub created_at: i64,
    pub question: i32,
    pub choice_id: i32,
    #[serde(default)]
    pub description: String,
}

/// Raw vital record as stored in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawVital {
    pub user_id: i64,
    pub date: NaiveDate,
    pub vital_id: i32,
    /// Measured value; sleep onset/offset are epoch seconds
    pub value: f64,
    pub device_id: i32,
    /// Offset from UTC in minutes, when the source reports one
    #[serde(default)]
    pub timezone_offset: Option<i32>,
}

/// Raw user row from the pre-aggregated users table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    pub user_id: i64,
    #[serde(default)]
    pub salutation: Option<String>,
    /// Year of birth
    #[serde(default)]
    pub birth_date: Option<i32>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub weight: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub bmi: Option<f64>,
}

/// One complete WHO-5 response bundle for a user and day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyRecord {
    pub user_id: i64,
    pub date: NaiveDate,
    pub q49: f64,
    pub q50: f64,
    pub q54: f64,
    pub q55: f64,
    pub q56: f64,
    pub total_wellbeing: f64,
}

impl SurveyRecord {
    /// Build a record from answers in `WHO5_QUESTION_IDS` order
    pub fn from_answers(user_id: i64, date: NaiveDate, answers: [f64; 5]) -> Self {
        let total_wellbeing = answers.iter().sum::<f64>() / answers.len() as f64;
        Self {
            user_id,
            date,
            q49: answers[0],
            q50: answers[1],
            q54: answers[2],
            q55: answers[3],
            q56: answers[4],
            total_wellbeing,
        }
    }

    pub fn measure(&self, measure: SurveyMeasure) -> f64 {
        match measure {
            SurveyMeasure::Q49 => self.q49,
            SurveyMeasure::Q50 => self.q50,
            SurveyMeasure::Q54 => self.q54,
            SurveyMeasure::Q55 => self.q55,
            SurveyMeasure::Q56 => self.q56,
            SurveyMeasure::TotalWellbeing => self.total_wellbeing,
        }
    }
}

/// Survey measures entering the correlation analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurveyMeasure {
    Q49,
    Q50,
    Q54,
    Q55,
    Q56,
    TotalWellbeing,
}

impl SurveyMeasure {
    pub const ALL: [SurveyMeasure; 6] = [
        SurveyMeasure::Q49,
        SurveyMeasure::Q50,
        SurveyMeasure::Q54,
        SurveyMeasure::Q55,
        SurveyMeasure::Q56,
        SurveyMeasure::TotalWellbeing,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            SurveyMeasure::Q49 => "q49",
            SurveyMeasure::Q50 => "q50",
            SurveyMeasure::Q54 => "q54",
            SurveyMeasure::Q55 => "q55",
            SurveyMeasure::Q56 => "q56",
            SurveyMeasure::TotalWellbeing => "total_wellbeing",
        }
    }
}

/// Wide per-day vital record for one user and device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VitalRecord {
    pub user_id: i64,
    pub date: NaiveDate,
    pub device_id: i32,
    pub step_count: Option<f64>,
    /// Minutes
    pub sleep_duration: Option<f64>,
    /// Hours relative to midnight of `date`
    pub sleep_onset: Option<f64>,
    /// Hours relative to midnight of `date`
    pub sleep_offset: Option<f64>,
    /// Beats per minute
    pub resting_heart_rate: Option<f64>,
    pub weekend: bool,
}

impl VitalRecord {
    pub fn empty(user_id: i64, date: NaiveDate, device_id: i32) -> Self {
        Self {
            user_id,
            date,
            device_id,
            step_count: None,
            sleep_duration: None,
            sleep_onset: None,
            sleep_offset: None,
            resting_heart_rate: None,
            weekend: is_weekend(date),
        }
    }

    pub fn get(&self, vital: VitalType) -> Option<f64> {
        match vital {
            VitalType::StepCount => self.step_count,
            VitalType::SleepDuration => self.sleep_duration,
            VitalType::SleepOnset => self.sleep_onset,
            VitalType::SleepOffset => self.sleep_offset,
            VitalType::RestingHeartRate => self.resting_heart_rate,
        }
    }

    pub fn slot_mut(&mut self, vital: VitalType) -> &mut Option<f64> {
        match vital {
            VitalType::StepCount => &mut self.step_count,
            VitalType::SleepDuration => &mut self.sleep_duration,
            VitalType::SleepOnset => &mut self.sleep_onset,
            VitalType::SleepOffset => &mut self.sleep_offset,
            VitalType::RestingHeartRate => &mut self.resting_heart_rate,
        }
    }

    /// Midpoint between sleep onset and offset, in hours
    pub fn midsleep(&self) -> Option<f64> {
        match (self.sleep_onset, self.sleep_offset) {
            (Some(onset), Some(offset)) => Some(0.5 * (onset + offset)),
            _ => None,
        }
    }

    pub fn signal(&self, signal: RollingSignal) -> Option<f64> {
        match signal {
            RollingSignal::Midsleep => self.midsleep(),
            other => other.vital().and_then(|v| self.get(v)),
        }
    }
}

/// Saturday or Sunday
pub fn is_weekend(date: NaiveDate) -> bool {
    use chrono::Datelike;
    date.weekday().num_days_from_monday() >= 5
}

/// Signals aggregated over the rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollingSignal {
    StepCount,
    RestingHeartRate,
    SleepDuration,
    SleepOnset,
    SleepOffset,
    Midsleep,
}

impl RollingSignal {
    pub const ALL: [RollingSignal; 6] = [
        RollingSignal::StepCount,
        RollingSignal::RestingHeartRate,
        RollingSignal::SleepDuration,
        RollingSignal::SleepOnset,
        RollingSignal::SleepOffset,
        RollingSignal::Midsleep,
    ];

    /// Signals correlated against the survey measures
    pub const CORRELATED: [RollingSignal; 5] = [
        RollingSignal::StepCount,
        RollingSignal::RestingHeartRate,
        RollingSignal::SleepDuration,
        RollingSignal::SleepOnset,
        RollingSignal::SleepOffset,
    ];

    pub fn index(&self) -> usize {
        match self {
            RollingSignal::StepCount => 0,
            RollingSignal::RestingHeartRate => 1,
            RollingSignal::SleepDuration => 2,
            RollingSignal::SleepOnset => 3,
            RollingSignal::SleepOffset => 4,
            RollingSignal::Midsleep => 5,
        }
    }

    pub fn vital(&self) -> Option<VitalType> {
        match self {
            RollingSignal::StepCount => Some(VitalType::StepCount),
            RollingSignal::RestingHeartRate => Some(VitalType::RestingHeartRate),
            RollingSignal::SleepDuration => Some(VitalType::SleepDuration),
            RollingSignal::SleepOnset => Some(VitalType::SleepOnset),
            RollingSignal::SleepOffset => Some(VitalType::SleepOffset),
            RollingSignal::Midsleep => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RollingSignal::Midsleep => "midsleep",
            other => other.vital().map(|v| v.as_str()).unwrap_or_default(),
        }
    }

    /// Column name of the weekend-minus-weekday difference
    pub fn difference_column(&self) -> String {
        match self {
            RollingSignal::Midsleep => "social_jetlag".to_string(),
            other => format!("{}_difference", other.as_str()),
        }
    }
}

/// Subset of days entering a rolling window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaySubset {
    Total,
    Weekday,
    Weekend,
}

impl DaySubset {
    pub const ALL: [DaySubset; 3] = [DaySubset::Total, DaySubset::Weekday, DaySubset::Weekend];

    pub fn as_str(&self) -> &'static str {
        match self {
            DaySubset::Total => "total",
            DaySubset::Weekday => "weekday",
            DaySubset::Weekend => "weekend",
        }
    }

    /// Whether a day with the given weekend flag belongs to this subset
    pub fn includes(&self, weekend: bool) -> bool {
        match self {
            DaySubset::Total => true,
            DaySubset::Weekday => !weekend,
            DaySubset::Weekend => weekend,
        }
    }
}

/// Mean and sample standard deviation of one signal over a window
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

/// Window statistics of every rolling signal for one day subset
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubsetAggregates {
    pub stats: [WindowStats; 6],
}

impl SubsetAggregates {
    pub fn get(&self, signal: RollingSignal) -> WindowStats {
        self.stats[signal.index()]
    }

    pub fn set(&mut self, signal: RollingSignal, stats: WindowStats) {
        self.stats[signal.index()] = stats;
    }
}

/// Trailing rolling aggregates for one user, device and survey date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingWindowEntry {
    pub user_id: i64,
    pub device_id: i32,
    pub date: NaiveDate,
    pub total: SubsetAggregates,
    pub weekday: SubsetAggregates,
    pub weekend: SubsetAggregates,
    /// Weekend mean minus weekday mean, indexed by `RollingSignal::index`
    pub differences: [Option<f64>; 6],
}

impl RollingWindowEntry {
    pub fn subset(&self, subset: DaySubset) -> &SubsetAggregates {
        match subset {
            DaySubset::Total => &self.total,
            DaySubset::Weekday => &self.weekday,
            DaySubset::Weekend => &self.weekend,
        }
    }

    pub fn subset_mut(&mut self, subset: DaySubset) -> &mut SubsetAggregates {
        match subset {
            DaySubset::Total => &mut self.total,
            DaySubset::Weekday => &mut self.weekday,
            DaySubset::Weekend => &mut self.weekend,
        }
    }

    pub fn difference(&self, signal: RollingSignal) -> Option<f64> {
        self.differences[signal.index()]
    }

    /// Weekend minus weekday sleep midpoint, in hours
    pub fn social_jetlag(&self) -> Option<f64> {
        self.difference(RollingSignal::Midsleep)
    }
}

/// User metadata after exclusion and enrichment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub salutation: Option<String>,
    pub birth_year: Option<i32>,
    pub zip_code: Option<String>,
    pub age: Option<f64>,
    pub age_group: Option<u8>,
    pub nuts3: Option<String>,
}

/// Analysis row joining a user, one survey bundle and the rolling vitals of one device
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub user: UserProfile,
    pub survey: SurveyRecord,
    pub rolling: RollingWindowEntry,
}

/// Pearson correlation between one survey measure and one rolling signal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub user_id: i64,
    pub device_id: i32,
    pub question: SurveyMeasure,
    pub vital: RollingSignal,
    /// NaN when undefined
    pub r: f64,
    /// NaN when undefined
    pub p_value: f64,
    pub n: usize,
}

impl CorrelationResult {
    pub fn is_defined(&self) -> bool {
        self.r.is_finite() && self.p_value.is_finite()
    }

    pub fn column_prefix(&self) -> String {
        correlation_column_prefix(self.question, self.vital)
    }
}

pub(crate) fn correlation_column_prefix(question: SurveyMeasure, vital: RollingSignal) -> String {
    format!("{}_{}", question.key(), vital.as_str())
}

/// All correlation results of one (user, device) group
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationRow {
    pub user_id: i64,
    pub device_id: i32,
    /// Ordered by question, then vital
    pub results: Vec<CorrelationResult>,
}

/// Mean wellbeing for one bin of a rolling signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinSummary {
    pub signal: RollingSignal,
    pub subset: DaySubset,
    pub bin: f64,
    pub mean: f64,
    pub std: Option<f64>,
    pub count: usize,
    pub err: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vital_type_ids_round_trip() {
        for vital in VitalType::ALL {
            assert_eq!(VitalType::from_id(vital.id()), Some(vital));
        }
        assert_eq!(VitalType::from_id(7), None);
    }

    #[test]
    fn test_total_wellbeing_is_mean_of_answers() {
        let date = NaiveDate::from_ymd_opt(2021, 11, 13).unwrap();
        let record = SurveyRecord::from_answers(239, date, [3.0, 2.0, 2.0, 1.0, 2.0]);
        assert!((record.total_wellbeing - 2.0).abs() < 1e-12);
        assert_eq!(record.measure(SurveyMeasure::Q55), 1.0);
    }

    #[test]
    fn test_weekend_flag() {
        // 2021-09-04 was a Saturday
        assert!(is_weekend(NaiveDate::from_ymd_opt(2021, 9, 4).unwrap()));
        assert!(is_weekend(NaiveDate::from_ymd_opt(2021, 9, 5).unwrap()));
        assert!(!is_weekend(NaiveDate::from_ymd_opt(2021, 9, 6).unwrap()));
    }

    #[test]
    fn test_midsleep_requires_onset_and_offset() {
        let date = NaiveDate::from_ymd_opt(2021, 9, 6).unwrap();
        let mut record = VitalRecord::empty(1, date, 3);
        record.sleep_onset = Some(-1.0);
        assert_eq!(record.midsleep(), None);
        record.sleep_offset = Some(7.0);
        assert_eq!(record.signal(RollingSignal::Midsleep), Some(3.0));
    }

    #[test]
    fn test_difference_column_names() {
        assert_eq!(RollingSignal::Midsleep.difference_column(), "social_jetlag");
        assert_eq!(
            RollingSignal::StepCount.difference_column(),
            "step_count_difference"
        );
    }
}
