//! Normalization of raw extracted tables
//!
//! Each raw table is reshaped into an analysis-ready form:
//! - Survey answers become one row per complete WHO-5 bundle
//! - Vital readings become one wide row per user, day and device
//! - Users gain age, age group and NUTS3 region

pub mod survey;
pub mod users;
pub mod vitals;

pub use survey::{date_from_millis, normalize_surveys};
pub use users::{normalize_users, read_zip_to_nuts, NutsMapping};
pub use vitals::{hours_since_midnight, normalize_vitals};

use crate::config::ProcessConfig;
use crate::error::PipelineError;
use crate::types::{RawSurveyAnswer, RawUser, RawVital, SurveyRecord, UserProfile, VitalRecord};

/// Normalized tables produced by the preprocessing stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTables {
    pub surveys: Vec<SurveyRecord>,
    pub vitals: Vec<VitalRecord>,
    pub users: Vec<UserProfile>,
}

/// Normalizer for converting raw tables to analysis tables
pub struct Normalizer;

impl Normalizer {
    /// Normalize all three raw tables with one configuration
    pub fn normalize(
        surveys: &[RawSurveyAnswer],
        vitals: &[RawVital],
        users: &[RawUser],
        nuts: &NutsMapping,
        config: &ProcessConfig,
    ) -> Result<NormalizedTables, PipelineError> {
        Ok(NormalizedTables {
            surveys: normalize_surveys(surveys, &config.surveys)?,
            vitals: normalize_vitals(vitals, &config.vitals)?,
            users: normalize_users(users, nuts, &config.users),
        })
    }
}
