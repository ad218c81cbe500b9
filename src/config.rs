//! Pipeline configuration
//!
//! Configuration is layered: built-in defaults, an optional YAML file, then
//! `WBV__`-prefixed environment variables (`__` separates nesting levels,
//! e.g. `WBV__PROCESS__ROLLING__MIN_DAYS_TOTAL=10`). Every stage receives the
//! configuration explicitly.

use crate::error::PipelineError;
use chrono::NaiveDate;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file looked up when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "config/main.yaml";

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "WBV";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub process: ProcessConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Checkpoint directories and file names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub external: PathBuf,
    pub raw: PathBuf,
    pub interim: PathBuf,
    pub processed: PathBuf,
    pub derived: PathBuf,
    pub filenames: FileNames,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileNames {
    pub surveys: String,
    pub vitals: String,
    pub users: String,
    pub zip_to_nuts: String,
    pub rolling: String,
    pub merged: String,
    pub correlations: String,
    pub summary: String,
    pub manifest: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            external: PathBuf::from("data/00_external"),
            raw: PathBuf::from("data/01_raw"),
            interim: PathBuf::from("data/02_interim"),
            processed: PathBuf::from("data/03_processed"),
            derived: PathBuf::from("data/04_derived"),
            filenames: FileNames::default(),
        }
    }
}

impl Default for FileNames {
    fn default() -> Self {
        Self {
            surveys: "surveys.csv".to_string(),
            vitals: "vitals.csv".to_string(),
            users: "users.csv".to_string(),
            zip_to_nuts: "pc2020_DE_NUTS-2021_v3.0.csv".to_string(),
            rolling: "rolling_vitals.csv".to_string(),
            merged: "users_surveys_rolling_vitals.csv".to_string(),
            correlations: "correlation_coefficients.csv".to_string(),
            summary: "wellbeing_by_vital_bin.csv".to_string(),
            manifest: "run_manifest.json".to_string(),
        }
    }
}

impl DataConfig {
    /// Every directory the pipeline writes to
    pub fn output_directories(&self) -> [&Path; 4] {
        [&self.raw, &self.interim, &self.processed, &self.derived]
    }
}

/// Numeric thresholds and switches of the processing stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub surveys: SurveyConfig,
    pub vitals: VitalConfig,
    pub users: UserConfig,
    pub rolling: RollingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Answers created before this date are discarded
    pub start_date: Option<NaiveDate>,
    /// Treat repeated identical answers to a question as a single answer.
    /// When false, any repeated answer disqualifies the day.
    pub collapse_identical_answers: bool,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            start_date: None,
            collapse_identical_answers: true,
        }
    }
}

/// How sleep timing is corrected for daylight saving time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DstMode {
    /// No correction
    None,
    /// Add one hour on dates inside the configured DST ranges
    FixedRanges,
    /// Add the per-record timezone offset to the raw timestamps
    RecordOffset,
}

/// Inclusive date range; open ends are unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |s| date >= s) && self.end.map_or(true, |e| date <= e)
    }
}

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VitalConfig {
    /// Records after this date are dropped
    pub cutoff_date: NaiveDate,
    /// Devices whose sleep vitals are discarded
    pub unreliable_sleep_devices: Vec<i32>,
    pub lower_quantile: f64,
    pub upper_quantile: f64,
    pub dst_mode: DstMode,
    pub dst_onset_ranges: Vec<DateRange>,
    pub dst_offset_ranges: Vec<DateRange>,
    /// Absolute bounds on sleep onset hours, applied before the quantile filter
    pub onset_bounds: Option<Bounds>,
    /// Absolute bounds on sleep offset hours, applied before the quantile filter
    pub offset_bounds: Option<Bounds>,
}

fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

impl Default for VitalConfig {
    fn default() -> Self {
        Self {
            cutoff_date: NaiveDate::from_ymd_opt(2022, 12, 31).unwrap_or(NaiveDate::MAX),
            unreliable_sleep_devices: vec![6],
            lower_quantile: 0.025,
            upper_quantile: 0.975,
            dst_mode: DstMode::RecordOffset,
            dst_onset_ranges: vec![
                DateRange { start: None, end: ymd(2021, 10, 31) },
                DateRange { start: ymd(2022, 3, 28), end: ymd(2022, 10, 30) },
            ],
            dst_offset_ranges: vec![
                DateRange { start: None, end: ymd(2021, 11, 1) },
                DateRange { start: ymd(2022, 3, 28), end: ymd(2022, 10, 31) },
            ],
            onset_bounds: None,
            offset_bounds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Lower age bound of age group 1
    pub age_level1: f64,
    /// Lower age bound of age group 2
    pub age_level2: f64,
    /// Upper (exclusive) age bound of age group 2
    pub max_age: f64,
    /// Year ages are computed against
    pub reference_year: i32,
    /// Added to the age to center the birth-year bucket
    pub age_offset: f64,
    pub excluded_user_ids: Vec<i64>,
    pub excluded_birth_years: Vec<i32>,
    pub excluded_salutations: Vec<String>,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            age_level1: 40.0,
            age_level2: 60.0,
            max_age: 100.0,
            reference_year: 2020,
            age_offset: 2.5,
            // Survey responses recorded before the survey launched
            excluded_user_ids: vec![1143114, 1143193, 1144681, 1147298, 1144157, 1155559],
            excluded_birth_years: vec![2004, 1984, 2005],
            excluded_salutations: vec!["D".to_string()],
        }
    }
}

/// Rolling window length and per-subset minimum observation counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    pub window_days: u32,
    pub min_days_total: usize,
    pub min_weekdays: usize,
    pub min_weekend_days: usize,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            window_days: 28,
            min_days_total: 14,
            min_weekdays: 10,
            min_weekend_days: 4,
        }
    }
}

impl RollingConfig {
    pub fn min_count(&self, subset: crate::types::DaySubset) -> usize {
        use crate::types::DaySubset;
        match subset {
            DaySubset::Total => self.min_days_total,
            DaySubset::Weekday => self.min_weekdays,
            DaySubset::Weekend => self.min_weekend_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Earliest vital date to download
    pub vitals_min_date: NaiveDate,
    pub max_connections: u32,
    /// User ids bound per query
    pub user_batch_size: usize,
    pub answers_table: String,
    pub choices_table: String,
    pub questions_table: String,
    pub vitals_table: String,
    pub users_table: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            vitals_min_date: NaiveDate::from_ymd_opt(2021, 9, 1).unwrap_or(NaiveDate::MIN),
            max_connections: 5,
            user_batch_size: 10_000,
            answers_table: "datenspende.answers".to_string(),
            choices_table: "datenspende.choice".to_string(),
            questions_table: "datenspende.questions".to_string(),
            vitals_table: "datenspende.vitaldata".to_string(),
            users_table: "marc.preprocessed_users".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from the given file (or the default location) and the environment.
    ///
    /// Not validated; call [`PipelineConfig::validate`] after applying any overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), PipelineError> {
        let rolling = &self.process.rolling;
        if rolling.window_days == 0 {
            return Err(PipelineError::InvalidConfig(
                "window_days must be greater than 0".to_string(),
            ));
        }
        if rolling.min_days_total == 0 || rolling.min_weekdays == 0 || rolling.min_weekend_days == 0
        {
            return Err(PipelineError::InvalidConfig(
                "rolling minimum counts must be greater than 0".to_string(),
            ));
        }

        let vitals = &self.process.vitals;
        let q_valid = |q: f64| (0.0..=1.0).contains(&q);
        if !q_valid(vitals.lower_quantile)
            || !q_valid(vitals.upper_quantile)
            || vitals.lower_quantile > vitals.upper_quantile
        {
            return Err(PipelineError::InvalidConfig(format!(
                "quantile bounds must satisfy 0 <= lower <= upper <= 1, got {} and {}",
                vitals.lower_quantile, vitals.upper_quantile
            )));
        }

        let users = &self.process.users;
        if !(0.0 < users.age_level1
            && users.age_level1 < users.age_level2
            && users.age_level2 < users.max_age)
        {
            return Err(PipelineError::InvalidConfig(format!(
                "age thresholds must satisfy 0 < age_level1 < age_level2 < max_age, got {}, {}, {}",
                users.age_level1, users.age_level2, users.max_age
            )));
        }

        if self.database.user_batch_size == 0 || self.database.user_batch_size > 65_534 {
            return Err(PipelineError::InvalidConfig(
                "user_batch_size must be between 1 and 65534".to_string(),
            ));
        }
        if self.database.max_connections == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(PipelineError::InvalidConfig(format!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level, valid_levels
            )));
        }

        Ok(())
    }
}
