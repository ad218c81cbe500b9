//! CSV checkpoint files between pipeline stages
//!
//! Flat tables are written with serde directly. Tables with per-signal,
//! per-subset column families (rolling aggregates, the merged dataset and
//! correlations) implement [`WideRow`] to spell out their columns. Missing
//! values are empty fields; undefined correlations are written as `NaN`.

use crate::error::PipelineError;
use crate::types::{
    correlation_column_prefix, CorrelationResult, CorrelationRow, DaySubset, MergedRecord,
    RollingSignal, RollingWindowEntry, SubsetAggregates, SurveyMeasure, SurveyRecord, UserProfile,
    WindowStats,
};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

/// Write serde rows to a CSV file, returning the row count
pub fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<usize, PipelineError> {
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    debug!(path = %path.display(), rows = rows.len(), "Wrote checkpoint");
    Ok(rows.len())
}

/// Read serde rows from a CSV file
pub fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, PipelineError> {
    let mut reader = csv::Reader::from_path(path)?;
    let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
    debug!(path = %path.display(), rows = rows.len(), "Read checkpoint");
    Ok(rows)
}

/// A row whose columns are generated rather than derived from its fields
pub trait WideRow: Sized {
    fn header() -> Vec<String>;
    fn fields(&self) -> Vec<String>;
    fn from_fields(fields: &FieldMap<'_>) -> Result<Self, PipelineError>;
}

/// Write wide rows to any writer. The header is written even when `rows` is empty.
pub fn write_wide_to<T: WideRow, W: Write>(writer: W, rows: &[T]) -> Result<(), PipelineError> {
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(T::header())?;
    for row in rows {
        writer.write_record(row.fields())?;
    }
    writer.flush()?;
    Ok(())
}

/// Read wide rows from any reader, locating columns by name
pub fn read_wide_from<T: WideRow, R: Read>(reader: R) -> Result<Vec<T>, PipelineError> {
    let mut reader = csv::Reader::from_reader(reader);
    let index: HashMap<String, usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i))
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(T::from_fields(&FieldMap {
            index: &index,
            record: &record,
        })?);
    }
    Ok(rows)
}

pub fn write_wide<T: WideRow>(path: &Path, rows: &[T]) -> Result<usize, PipelineError> {
    write_wide_to(BufWriter::new(File::create(path)?), rows)?;
    debug!(path = %path.display(), rows = rows.len(), "Wrote checkpoint");
    Ok(rows.len())
}

pub fn read_wide<T: WideRow>(path: &Path) -> Result<Vec<T>, PipelineError> {
    let rows = read_wide_from(File::open(path)?)?;
    debug!(path = %path.display(), rows = rows.len(), "Read checkpoint");
    Ok(rows)
}

/// Named access to the fields of one CSV record
pub struct FieldMap<'a> {
    index: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl FieldMap<'_> {
    pub fn raw(&self, column: &str) -> Result<&str, PipelineError> {
        self.index
            .get(column)
            .and_then(|&i| self.record.get(i))
            .ok_or_else(|| PipelineError::MissingColumn(column.to_string()))
    }

    pub fn parse<T: FromStr>(&self, column: &str) -> Result<T, PipelineError> {
        let value = self.raw(column)?;
        value
            .trim()
            .parse()
            .map_err(|_| PipelineError::malformed(column, value))
    }

    /// Empty fields are `None`
    pub fn parse_opt<T: FromStr>(&self, column: &str) -> Result<Option<T>, PipelineError> {
        let value = self.raw(column)?;
        if value.trim().is_empty() {
            return Ok(None);
        }
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::malformed(column, value))
    }

    pub fn string_opt(&self, column: &str) -> Result<Option<String>, PipelineError> {
        let value = self.raw(column)?;
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    pub fn date(&self, column: &str) -> Result<NaiveDate, PipelineError> {
        self.parse(column)
    }
}

fn opt_field<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// `{signal}_{mean|std}_{subset}`
fn stat_column(signal: RollingSignal, stat: &str, subset: DaySubset) -> String {
    format!("{}_{}_{}", signal.as_str(), stat, subset.as_str())
}

/// Aggregate columns shared by the rolling and merged tables
fn aggregate_header() -> Vec<String> {
    let mut header = Vec::new();
    for signal in RollingSignal::ALL {
        for subset in DaySubset::ALL {
            header.push(stat_column(signal, "mean", subset));
            header.push(stat_column(signal, "std", subset));
        }
    }
    header.extend(RollingSignal::ALL.iter().map(|s| s.difference_column()));
    header
}

fn aggregate_fields(entry: &RollingWindowEntry) -> Vec<String> {
    let mut fields = Vec::new();
    for signal in RollingSignal::ALL {
        for subset in DaySubset::ALL {
            let stats = entry.subset(subset).get(signal);
            fields.push(opt_field(&stats.mean));
            fields.push(opt_field(&stats.std));
        }
    }
    fields.extend(entry.differences.iter().map(opt_field));
    fields
}

fn aggregates_from(
    fields: &FieldMap<'_>,
    user_id: i64,
    device_id: i32,
    date: NaiveDate,
) -> Result<RollingWindowEntry, PipelineError> {
    let mut entry = RollingWindowEntry {
        user_id,
        device_id,
        date,
        total: SubsetAggregates::default(),
        weekday: SubsetAggregates::default(),
        weekend: SubsetAggregates::default(),
        differences: [None; 6],
    };
    for signal in RollingSignal::ALL {
        for subset in DaySubset::ALL {
            let stats = WindowStats {
                mean: fields.parse_opt(&stat_column(signal, "mean", subset))?,
                std: fields.parse_opt(&stat_column(signal, "std", subset))?,
            };
            entry.subset_mut(subset).set(signal, stats);
        }
        entry.differences[signal.index()] = fields.parse_opt(&signal.difference_column())?;
    }
    Ok(entry)
}

impl WideRow for RollingWindowEntry {
    fn header() -> Vec<String> {
        let mut header = vec!["user_id".to_string(), "device_id".to_string(), "date".to_string()];
        header.extend(aggregate_header());
        header
    }

    fn fields(&self) -> Vec<String> {
        let mut fields = vec![
            self.user_id.to_string(),
            self.device_id.to_string(),
            self.date.to_string(),
        ];
        fields.extend(aggregate_fields(self));
        fields
    }

    fn from_fields(fields: &FieldMap<'_>) -> Result<Self, PipelineError> {
        aggregates_from(
            fields,
            fields.parse("user_id")?,
            fields.parse("device_id")?,
            fields.date("date")?,
        )
    }
}

const USER_COLUMNS: [&str; 7] = [
    "user_id",
    "salutation",
    "birth_year",
    "zip_code",
    "age",
    "age_group",
    "nuts3",
];

const SURVEY_COLUMNS: [&str; 7] = ["date", "q49", "q50", "q54", "q55", "q56", "total_wellbeing"];

impl WideRow for MergedRecord {
    fn header() -> Vec<String> {
        let mut header: Vec<String> = USER_COLUMNS.iter().map(|c| c.to_string()).collect();
        header.extend(SURVEY_COLUMNS.iter().map(|c| c.to_string()));
        header.push("device_id".to_string());
        header.extend(aggregate_header());
        header
    }

    fn fields(&self) -> Vec<String> {
        let user = &self.user;
        let survey = &self.survey;
        let mut fields = vec![
            user.user_id.to_string(),
            opt_field(&user.salutation),
            opt_field(&user.birth_year),
            opt_field(&user.zip_code),
            opt_field(&user.age),
            opt_field(&user.age_group),
            opt_field(&user.nuts3),
            survey.date.to_string(),
        ];
        fields.extend(
            SurveyMeasure::ALL
                .iter()
                .map(|&m| survey.measure(m).to_string()),
        );
        fields.push(self.rolling.device_id.to_string());
        fields.extend(aggregate_fields(&self.rolling));
        fields
    }

    fn from_fields(fields: &FieldMap<'_>) -> Result<Self, PipelineError> {
        let user_id: i64 = fields.parse("user_id")?;
        let date = fields.date("date")?;

        let user = UserProfile {
            user_id,
            salutation: fields.string_opt("salutation")?,
            birth_year: fields.parse_opt("birth_year")?,
            zip_code: fields.string_opt("zip_code")?,
            age: fields.parse_opt("age")?,
            age_group: fields.parse_opt("age_group")?,
            nuts3: fields.string_opt("nuts3")?,
        };
        let survey = SurveyRecord {
            user_id,
            date,
            q49: fields.parse("q49")?,
            q50: fields.parse("q50")?,
            q54: fields.parse("q54")?,
            q55: fields.parse("q55")?,
            q56: fields.parse("q56")?,
            total_wellbeing: fields.parse("total_wellbeing")?,
        };
        let rolling = aggregates_from(fields, user_id, fields.parse("device_id")?, date)?;

        Ok(MergedRecord {
            user,
            survey,
            rolling,
        })
    }
}

impl WideRow for CorrelationRow {
    fn header() -> Vec<String> {
        let mut header = vec!["user_id".to_string(), "device_id".to_string()];
        for question in SurveyMeasure::ALL {
            for vital in RollingSignal::CORRELATED {
                let prefix = correlation_column_prefix(question, vital);
                header.push(format!("{prefix}_corr"));
                header.push(format!("{prefix}_pvalue"));
                header.push(format!("{prefix}_n"));
            }
        }
        header
    }

    fn fields(&self) -> Vec<String> {
        let mut fields = vec![self.user_id.to_string(), self.device_id.to_string()];
        for result in &self.results {
            fields.push(result.r.to_string());
            fields.push(result.p_value.to_string());
            fields.push(result.n.to_string());
        }
        fields
    }

    fn from_fields(fields: &FieldMap<'_>) -> Result<Self, PipelineError> {
        let user_id = fields.parse("user_id")?;
        let device_id = fields.parse("device_id")?;

        let mut results = Vec::new();
        for question in SurveyMeasure::ALL {
            for vital in RollingSignal::CORRELATED {
                let prefix = correlation_column_prefix(question, vital);
                results.push(CorrelationResult {
                    user_id,
                    device_id,
                    question,
                    vital,
                    r: fields.parse(&format!("{prefix}_corr"))?,
                    p_value: fields.parse(&format!("{prefix}_pvalue"))?,
                    n: fields.parse(&format!("{prefix}_n"))?,
                });
            }
        }

        Ok(CorrelationRow {
            user_id,
            device_id,
            results,
        })
    }
}
