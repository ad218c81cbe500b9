//! Pipeline orchestration
//!
//! This module provides the public API for running the pipeline.
//! Stages read the checkpoint written by the previous stage and write their
//! own, so any stage can be rerun on its own:
//!
//! 1. extract    - raw tables from a [`RecordSource`] into `01_raw`
//! 2. preprocess - normalized surveys, vitals and users into `02_interim`
//! 3. merge      - rolling aggregates and the merged dataset into `03_processed`
//! 4. correlate  - per-user correlations into `04_derived`
//! 5. summarize  - wellbeing by vital bin into `04_derived`

use crate::aligner::{align_vitals, merge_dataset};
use crate::checkpoint::{read_rows, read_wide, write_rows, write_wide};
use crate::config::PipelineConfig;
use crate::correlator::correlate;
use crate::error::PipelineError;
use crate::extractor::{extract_raw, RawTables, RecordSource};
use crate::normalizer::{read_zip_to_nuts, Normalizer, NutsMapping};
use crate::summary::summarize_by_bin;
use crate::types::{
    MergedRecord, RawSurveyAnswer, RawUser, RawVital, SurveyRecord, UserProfile, VitalRecord,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// Row counts and outputs of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub rows_in: usize,
    pub rows_out: usize,
    pub outputs: Vec<PathBuf>,
}

/// Record of one end-to-end run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub config: PipelineConfig,
}

/// Stage runner bound to one configuration
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Create every output directory. Called once before any stage runs.
    pub fn prepare_directories(&self) -> Result<(), PipelineError> {
        for dir in self.config.data.output_directories() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    fn raw_path(&self, name: &str) -> PathBuf {
        self.config.data.raw.join(name)
    }

    fn interim_path(&self, name: &str) -> PathBuf {
        self.config.data.interim.join(name)
    }

    fn processed_path(&self, name: &str) -> PathBuf {
        self.config.data.processed.join(name)
    }

    fn derived_path(&self, name: &str) -> PathBuf {
        self.config.data.derived.join(name)
    }

    /// Extract raw tables from `source` and write them to the raw checkpoint
    pub async fn extract<S: RecordSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<StageReport, PipelineError> {
        info!(stage = "extract", "Stage started");
        let tables = extract_raw(source, &self.config.database).await?;
        self.write_raw(&tables)
    }

    /// Write already extracted raw tables
    pub fn write_raw(&self, tables: &RawTables) -> Result<StageReport, PipelineError> {
        let names = &self.config.data.filenames;
        let outputs = vec![
            self.raw_path(&names.surveys),
            self.raw_path(&names.vitals),
            self.raw_path(&names.users),
        ];

        let rows_out = write_rows(&outputs[0], &tables.surveys)?
            + write_rows(&outputs[1], &tables.vitals)?
            + write_rows(&outputs[2], &tables.users)?;

        Ok(report("extract", rows_out, rows_out, outputs))
    }

    fn load_nuts_mapping(&self) -> Result<NutsMapping, PipelineError> {
        let path = self.config.data.external.join(&self.config.data.filenames.zip_to_nuts);
        if !path.exists() {
            warn!(path = %path.display(), "Zip code to NUTS3 mapping not found, regions left empty");
            return Ok(NutsMapping::new());
        }
        read_zip_to_nuts(File::open(path)?)
    }

    /// Normalize the raw tables
    pub fn preprocess(&self) -> Result<StageReport, PipelineError> {
        info!(stage = "preprocess", "Stage started");
        let names = &self.config.data.filenames;

        let surveys: Vec<RawSurveyAnswer> = read_rows(&self.raw_path(&names.surveys))?;
        let vitals: Vec<RawVital> = read_rows(&self.raw_path(&names.vitals))?;
        let users: Vec<RawUser> = read_rows(&self.raw_path(&names.users))?;
        let nuts = self.load_nuts_mapping()?;

        let tables = Normalizer::normalize(&surveys, &vitals, &users, &nuts, &self.config.process)?;

        let outputs = vec![
            self.interim_path(&names.surveys),
            self.interim_path(&names.vitals),
            self.interim_path(&names.users),
        ];
        let rows_out = write_rows(&outputs[0], &tables.surveys)?
            + write_rows(&outputs[1], &tables.vitals)?
            + write_rows(&outputs[2], &tables.users)?;

        Ok(report(
            "preprocess",
            surveys.len() + vitals.len() + users.len(),
            rows_out,
            outputs,
        ))
    }

    /// Align vitals to survey dates and join everything into one dataset
    pub fn merge(&self) -> Result<StageReport, PipelineError> {
        info!(stage = "merge", "Stage started");
        let names = &self.config.data.filenames;

        let surveys: Vec<SurveyRecord> = read_rows(&self.interim_path(&names.surveys))?;
        let vitals: Vec<VitalRecord> = read_rows(&self.interim_path(&names.vitals))?;
        let users: Vec<UserProfile> = read_rows(&self.interim_path(&names.users))?;

        let rolling = align_vitals(&surveys, &vitals, &self.config.process.rolling)?;
        let merged = merge_dataset(&users, &surveys, &rolling);

        let outputs = vec![
            self.processed_path(&names.rolling),
            self.processed_path(&names.merged),
        ];
        write_wide(&outputs[0], &rolling)?;
        let rows_out = write_wide(&outputs[1], &merged)?;

        Ok(report(
            "merge",
            surveys.len() + vitals.len() + users.len(),
            rows_out,
            outputs,
        ))
    }

    fn read_merged(&self) -> Result<Vec<MergedRecord>, PipelineError> {
        read_wide(&self.processed_path(&self.config.data.filenames.merged))
    }

    /// Per-user correlations between survey measures and rolling vitals
    pub fn correlate(&self) -> Result<StageReport, PipelineError> {
        info!(stage = "correlate", "Stage started");
        let merged = self.read_merged()?;
        let rows = correlate(&merged);

        let output = self.derived_path(&self.config.data.filenames.correlations);
        let rows_out = write_wide(&output, &rows)?;
        Ok(report("correlate", merged.len(), rows_out, vec![output]))
    }

    /// Wellbeing summarized by binned vital level
    pub fn summarize(&self) -> Result<StageReport, PipelineError> {
        info!(stage = "summarize", "Stage started");
        let merged = self.read_merged()?;
        let bins = summarize_by_bin(&merged);

        let output = self.derived_path(&self.config.data.filenames.summary);
        let rows_out = write_rows(&output, &bins)?;
        Ok(report("summarize", merged.len(), rows_out, vec![output]))
    }

    /// Every stage after extraction, starting from the raw checkpoint
    pub fn run_offline(&self) -> Result<RunManifest, PipelineError> {
        let started_at = Utc::now();
        self.prepare_directories()?;
        let stages = self.process_stages()?;
        self.finish(started_at, stages)
    }

    /// Every stage, starting from extraction
    pub async fn run_all<S: RecordSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<RunManifest, PipelineError> {
        let started_at = Utc::now();
        self.prepare_directories()?;
        let mut stages = vec![self.extract(source).await?];
        stages.extend(self.process_stages()?);
        self.finish(started_at, stages)
    }

    fn process_stages(&self) -> Result<Vec<StageReport>, PipelineError> {
        Ok(vec![
            self.preprocess()?,
            self.merge()?,
            self.correlate()?,
            self.summarize()?,
        ])
    }

    fn finish(
        &self,
        started_at: DateTime<Utc>,
        stages: Vec<StageReport>,
    ) -> Result<RunManifest, PipelineError> {
        let manifest = RunManifest {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: Utc::now(),
            stages,
            config: self.config.clone(),
        };
        let path = self.derived_path(&self.config.data.filenames.manifest);
        write_manifest(&path, &manifest)?;
        info!(run_id = %manifest.run_id, path = %path.display(), "Run finished");
        Ok(manifest)
    }
}

fn report(stage: &str, rows_in: usize, rows_out: usize, outputs: Vec<PathBuf>) -> StageReport {
    info!(stage, rows_in, rows_out, "Stage finished");
    StageReport {
        stage: stage.to_string(),
        rows_in,
        rows_out,
        outputs,
    }
}

/// Write a run manifest as pretty-printed JSON
pub fn write_manifest(path: &Path, manifest: &RunManifest) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;

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

    #[test]
    fn test_prepare_directories() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config_in(dir.path()));
        pipeline.prepare_directories().unwrap();

        for sub in ["01_raw", "02_interim", "03_processed", "04_derived"] {
            assert!(dir.path().join(sub).is_dir());
        }
    }

    #[test]
    fn test_missing_raw_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config_in(dir.path()));
        pipeline.prepare_directories().unwrap();

        assert!(pipeline.preprocess().is_err());
    }

    #[test]
    fn test_empty_run_writes_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(config_in(dir.path()));
        pipeline.prepare_directories().unwrap();
        pipeline.write_raw(&RawTables::default()).unwrap();

        let manifest = pipeline.run_offline().unwrap();
        let stages: Vec<&str> = manifest.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(stages, vec!["preprocess", "merge", "correlate", "summarize"]);
        assert!(manifest.finished_at >= manifest.started_at);

        let written = fs::read_to_string(dir.path().join("04_derived/run_manifest.json")).unwrap();
        let parsed: RunManifest = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.run_id, manifest.run_id);
    }
}
