//! User profile normalization
//!
//! Derives age and age group from the birth year, removes excluded users and
//! attaches the NUTS3 region of the user's zip code.

use crate::config::UserConfig;
use crate::error::PipelineError;
use crate::types::{RawUser, UserProfile};
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, info};

/// Zip code to NUTS3 region lookup
pub type NutsMapping = HashMap<String, String>;

/// Read the `;`-separated zip code to NUTS3 mapping.
///
/// Codes are quoted with single quotes in the published file (`'01067'`);
/// the quotes are stripped.
pub fn read_zip_to_nuts<R: Read>(reader: R) -> Result<NutsMapping, PipelineError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| PipelineError::MissingColumn(name.to_string()))
    };
    let code_idx = column("CODE")?;
    let nuts_idx = column("NUTS3")?;

    let mut mapping = NutsMapping::new();
    for record in csv_reader.records() {
        let record = record?;
        let (Some(code), Some(nuts)) = (record.get(code_idx), record.get(nuts_idx)) else {
            continue;
        };
        mapping.insert(strip_quotes(code), strip_quotes(nuts));
    }

    debug!(entries = mapping.len(), "Loaded zip code to NUTS3 mapping");
    Ok(mapping)
}

fn strip_quotes(value: &str) -> String {
    value.trim().replace('\'', "")
}

/// Age in years relative to the reference year
pub fn age(birth_year: i32, config: &UserConfig) -> f64 {
    f64::from(config.reference_year - birth_year) + config.age_offset
}

/// Age group 0, 1 or 2; `None` outside `[0, max_age)`
pub fn age_group(age: f64, config: &UserConfig) -> Option<u8> {
    if !age.is_finite() || age < 0.0 || age >= config.max_age {
        None
    } else if age < config.age_level1 {
        Some(0)
    } else if age < config.age_level2 {
        Some(1)
    } else {
        Some(2)
    }
}

fn is_excluded(user: &RawUser, config: &UserConfig) -> bool {
    config.excluded_user_ids.contains(&user.user_id)
        || user
            .birth_date
            .is_some_and(|year| config.excluded_birth_years.contains(&year))
        || user
            .salutation
            .as_deref()
            .is_some_and(|s| config.excluded_salutations.iter().any(|e| e == s))
}

/// Normalize raw users into profiles sorted by user id
pub fn normalize_users(
    users: &[RawUser],
    nuts: &NutsMapping,
    config: &UserConfig,
) -> Vec<UserProfile> {
    let mut excluded = 0usize;
    let mut profiles: Vec<UserProfile> = users
        .iter()
        .filter(|user| {
            let keep = !is_excluded(user, config);
            if !keep {
                excluded += 1;
            }
            keep
        })
        .map(|user| {
            let years = user.birth_date.map(|year| age(year, config));
            let zip_code = user.zip_code.as_deref().map(str::trim).map(str::to_string);
            let nuts3 = zip_code.as_ref().and_then(|zip| nuts.get(zip)).cloned();

            UserProfile {
                user_id: user.user_id,
                salutation: user.salutation.clone(),
                birth_year: user.birth_date,
                zip_code,
                age: years,
                age_group: years.and_then(|a| age_group(a, config)),
                nuts3,
            }
        })
        .collect();

    profiles.sort_by_key(|p| p.user_id);

    let without_region = profiles.iter().filter(|p| p.nuts3.is_none()).count();
    info!(
        users = users.len(),
        excluded,
        profiles = profiles.len(),
        without_region,
        "Normalized user profiles"
    );
    profiles
}
