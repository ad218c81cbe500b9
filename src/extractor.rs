//! Raw data extraction
//!
//! The [`RecordSource`] trait abstracts the store the raw tables come from.
//! With the `db` feature, [`PgSource`] reads them from PostgreSQL with sqlx.
//! User ids are bound one placeholder each and sent in batches so a single
//! query never exceeds the bind-parameter limit.

use crate::config::DatabaseConfig;
use crate::error::PipelineError;
use crate::types::{RawSurveyAnswer, RawUser, RawVital};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Source of the three raw tables
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Answers to the five WHO-5 questions with their choice and question text
    async fn load_survey_answers(&self) -> Result<Vec<RawSurveyAnswer>, PipelineError>;

    /// Vital readings of the tracked types for `user_ids` on or after `min_date`
    async fn load_vitals(
        &self,
        user_ids: &[i64],
        min_date: NaiveDate,
    ) -> Result<Vec<RawVital>, PipelineError>;

    async fn load_users(&self, user_ids: &[i64]) -> Result<Vec<RawUser>, PipelineError>;
}

/// Raw tables as extracted
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTables {
    pub surveys: Vec<RawSurveyAnswer>,
    pub vitals: Vec<RawVital>,
    pub users: Vec<RawUser>,
}

/// Parenthesized list of `count` bind placeholders starting at `$first`.
///
/// One id gives `($1)`, several give `($1, $2, ...)`.
pub fn in_predicate(count: usize, first: usize) -> String {
    let placeholders: Vec<String> = (first..first + count).map(|i| format!("${i}")).collect();
    format!("({})", placeholders.join(", "))
}

/// Extract surveys, then vitals and users of every user with a survey answer
pub async fn extract_raw<S: RecordSource + ?Sized>(
    source: &S,
    config: &DatabaseConfig,
) -> Result<RawTables, PipelineError> {
    let surveys = source.load_survey_answers().await?;

    let user_ids: Vec<i64> = surveys
        .iter()
        .map(|a| a.user_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut vitals = Vec::new();
    let mut users = Vec::new();
    for (batch, ids) in user_ids.chunks(config.user_batch_size.max(1)).enumerate() {
        vitals.extend(source.load_vitals(ids, config.vitals_min_date).await?);
        users.extend(source.load_users(ids).await?);
        debug!(batch, users = ids.len(), vitals = vitals.len(), "Extracted user batch");
    }

    info!(
        answers = surveys.len(),
        users = user_ids.len(),
        vitals = vitals.len(),
        "Extracted raw tables"
    );

    Ok(RawTables {
        surveys,
        vitals,
        users,
    })
}

#[cfg(feature = "db")]
pub use postgres::{connect_options, PgSource};

#[cfg(feature = "db")]
mod postgres {
    use super::*;
    use crate::types::{VitalType, WHO5_QUESTION_IDS};
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{PgPool, Row};

    fn env_var(name: &str) -> Result<String, PipelineError> {
        std::env::var(name).map_err(|_| PipelineError::MissingEnv(name.to_string()))
    }

    /// Connection options from `DATABASE_URL`, or from `DBNAME`, `DBUSER`,
    /// `PORT`, `HOST` and `PASSWORD`
    pub fn connect_options() -> Result<PgConnectOptions, PipelineError> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return Ok(url.parse()?);
        }

        let port = env_var("PORT")?;
        let port: u16 = port
            .parse()
            .map_err(|_| PipelineError::malformed("PORT", &port))?;

        Ok(PgConnectOptions::new()
            .host(&env_var("HOST")?)
            .port(port)
            .username(&env_var("DBUSER")?)
            .password(&env_var("PASSWORD")?)
            .database(&env_var("DBNAME")?))
    }

    fn id_list<T: ToString>(ids: &[T]) -> String {
        ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    }

    /// PostgreSQL-backed record source
    pub struct PgSource {
        pool: PgPool,
        config: DatabaseConfig,
    }

    impl PgSource {
        pub async fn connect(config: &DatabaseConfig) -> Result<Self, PipelineError> {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect_with(connect_options()?)
                .await?;
            Ok(Self::from_pool(pool, config.clone()))
        }

        pub fn from_pool(pool: PgPool, config: DatabaseConfig) -> Self {
            Self { pool, config }
        }
    }

    #[async_trait]
    impl RecordSource for PgSource {
        async fn load_survey_answers(&self) -> Result<Vec<RawSurveyAnswer>, PipelineError> {
            let query = format!(
                "SELECT a.user_id::BIGINT AS user_id, a.created_at::BIGINT AS created_at, \
                 a.question::INT AS question, c.choice_id::INT AS choice_id, \
                 q.description::TEXT AS description \
                 FROM {answers} a, {choices} c, {questions} q \
                 WHERE a.question IN ({ids}) AND a.element = c.element AND q.id = a.question",
                answers = self.config.answers_table,
                choices = self.config.choices_table,
                questions = self.config.questions_table,
                ids = id_list(&WHO5_QUESTION_IDS),
            );

            let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
            let mut answers = Vec::with_capacity(rows.len());
            for row in rows {
                answers.push(RawSurveyAnswer {
                    user_id: row.try_get("user_id")?,
                    created_at: row.try_get("created_at")?,
                    question: row.try_get("question")?,
                    choice_id: row.try_get("choice_id")?,
                    description: row
                        .try_get::<Option<String>, _>("description")?
                        .unwrap_or_default(),
                });
            }
            Ok(answers)
        }

        async fn load_vitals(
            &self,
            user_ids: &[i64],
            min_date: NaiveDate,
        ) -> Result<Vec<RawVital>, PipelineError> {
            if user_ids.is_empty() {
                return Ok(Vec::new());
            }

            let vital_ids: Vec<i32> = VitalType::ALL.iter().map(VitalType::id).collect();
            let query = format!(
                "SELECT user_id::BIGINT AS user_id, date::DATE AS date, type::INT AS vital_id, \
                 value::FLOAT8 AS value, source::INT AS device_id, \
                 timezone_offset::INT AS timezone_offset \
                 FROM {table} \
                 WHERE user_id IN {users} AND type IN ({types}) AND date >= ${date_param}",
                table = self.config.vitals_table,
                users = in_predicate(user_ids.len(), 1),
                types = id_list(&vital_ids),
                date_param = user_ids.len() + 1,
            );

            let mut q = sqlx::query(&query);
            for id in user_ids {
                q = q.bind(*id);
            }
            let rows = q.bind(min_date).fetch_all(&self.pool).await?;

            let mut vitals = Vec::with_capacity(rows.len());
            for row in rows {
                vitals.push(RawVital {
                    user_id: row.try_get("user_id")?,
                    date: row.try_get("date")?,
                    vital_id: row.try_get("vital_id")?,
                    value: row.try_get("value")?,
                    device_id: row.try_get("device_id")?,
                    timezone_offset: row.try_get("timezone_offset")?,
                });
            }
            Ok(vitals)
        }

        async fn load_users(&self, user_ids: &[i64]) -> Result<Vec<RawUser>, PipelineError> {
            if user_ids.is_empty() {
                return Ok(Vec::new());
            }

            let query = format!(
                "SELECT user_id::BIGINT AS user_id, salutation::TEXT AS salutation, \
                 birth_date::INT AS birth_date, zip_5digit::TEXT AS zip_code, \
                 weight::FLOAT8 AS weight, height::FLOAT8 AS height, bmi::FLOAT8 AS bmi \
                 FROM {table} WHERE user_id IN {users}",
                table = self.config.users_table,
                users = in_predicate(user_ids.len(), 1),
            );

            let mut q = sqlx::query(&query);
            for id in user_ids {
                q = q.bind(*id);
            }
            let rows = q.fetch_all(&self.pool).await?;

            let mut users = Vec::with_capacity(rows.len());
            for row in rows {
                users.push(RawUser {
                    user_id: row.try_get("user_id")?,
                    salutation: row.try_get("salutation")?,
                    birth_date: row.try_get("birth_date")?,
                    zip_code: row.try_get("zip_code")?,
                    weight: row.try_get("weight")?,
                    height: row.try_get("height")?,
                    bmi: row.try_get("bmi")?,
                });
            }
            Ok(users)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_in_predicate_forms() {
        assert_eq!(in_predicate(1, 1), "($1)");
        assert_eq!(in_predicate(3, 1), "($1, $2, $3)");
        assert_eq!(in_predicate(2, 4), "($4, $5)");
    }

    /// In-memory source recording the user batches it was asked for
    #[derive(Default)]
    struct MemorySource {
        answers: Vec<RawSurveyAnswer>,
        vitals: Vec<RawVital>,
        batches: Mutex<Vec<Vec<i64>>>,
    }

    #[async_trait]
    impl RecordSource for MemorySource {
        async fn load_survey_answers(&self) -> Result<Vec<RawSurveyAnswer>, PipelineError> {
            Ok(self.answers.clone())
        }

        async fn load_vitals(
            &self,
            user_ids: &[i64],
            min_date: NaiveDate,
        ) -> Result<Vec<RawVital>, PipelineError> {
            self.batches.lock().unwrap().push(user_ids.to_vec());
            Ok(self
                .vitals
                .iter()
                .filter(|v| user_ids.contains(&v.user_id) && v.date >= min_date)
                .cloned()
                .collect())
        }

        async fn load_users(&self, user_ids: &[i64]) -> Result<Vec<RawUser>, PipelineError> {
            Ok(user_ids
                .iter()
                .map(|&user_id| RawUser {
                    user_id,
                    salutation: None,
                    birth_date: None,
                    zip_code: None,
                    weight: None,
                    height: None,
                    bmi: None,
                })
                .collect())
        }
    }

    fn answer(user_id: i64) -> RawSurveyAnswer {
        RawSurveyAnswer {
            user_id,
            created_at: 1_636_797_600_000,
            question: 49,
            choice_id: 3,
            description: String::new(),
        }
    }

    fn vital(user_id: i64, date: NaiveDate) -> RawVital {
        RawVital {
            user_id,
            date,
            vital_id: 9,
            value: 1000.0,
            device_id: 3,
            timezone_offset: None,
        }
    }

    #[tokio::test]
    async fn test_extract_batches_distinct_survey_users() {
        let early = NaiveDate::from_ymd_opt(2021, 8, 31).unwrap();
        let late = NaiveDate::from_ymd_opt(2021, 9, 1).unwrap();
        let source = MemorySource {
            answers: vec![answer(5), answer(1), answer(5), answer(3)],
            vitals: vec![vital(1, early), vital(1, late), vital(3, late), vital(9, late)],
            ..MemorySource::default()
        };
        let config = DatabaseConfig {
            user_batch_size: 2,
            ..DatabaseConfig::default()
        };

        let tables = extract_raw(&source, &config).await.unwrap();

        assert_eq!(tables.surveys.len(), 4);
        assert_eq!(tables.vitals.len(), 2);
        let user_ids: Vec<i64> = tables.users.iter().map(|u| u.user_id).collect();
        assert_eq!(user_ids, vec![1, 3, 5]);
        assert_eq!(*source.batches.lock().unwrap(), vec![vec![1, 3], vec![5]]);
    }

    #[tokio::test]
    async fn test_extract_without_surveys_queries_nothing() {
        let source = MemorySource::default();
        let tables = extract_raw(&source, &DatabaseConfig::default()).await.unwrap();
        assert_eq!(tables, RawTables::default());
        assert!(source.batches.lock().unwrap().is_empty());
    }
}
