//! The ETL lifecycle every adapter follows: extract → transform → load.
//!
//! [`Etl`] has one required stage, [`Etl::extract`]. `transform` defaults to
//! identity and `load` to writing every output table with the
//! [materializer](crate::materialize). Both dataset mappings live in
//! [`EtlState`] as explicit `Option`s and are populated on first access.

use crate::error::{EtlError, Result};
use crate::materialize::persist;
use crate::retriever::RetrievalReport;
use polars::prelude::DataFrame;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Named tables, e.g. `"2024-01-02.parquet" → DataFrame`.
pub type Datasets = BTreeMap<String, DataFrame>;

/// Where an ETL instance is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Unextracted,
    Extracted,
    Transformed,
    Loaded,
}

/// State owned by every ETL instance: paths, both dataset mappings and the
/// current stage.
#[derive(Debug)]
pub struct EtlState {
    input_dir: PathBuf,
    output_dir: PathBuf,
    input: Option<Datasets>,
    output: Option<Datasets>,
    stage: Stage,
    extracting: bool,
}

impl EtlState {
    /// Build the state for an instance reading `input_dir` and writing
    /// `output_dir`. With `create_dirs` both directories are created if
    /// missing; that is the only I/O performed here.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, create_dirs: bool) -> Result<Self> {
        let input_dir = input_dir.into();
        let output_dir = output_dir.into();
        if create_dirs {
            for dir in [&input_dir, &output_dir] {
                fs::create_dir_all(dir).map_err(|e| EtlError::io(dir, e))?;
            }
        }
        Ok(Self {
            input_dir,
            output_dir,
            input: None,
            output: None,
            stage: Stage::Unextracted,
            extracting: false,
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Input datasets if already populated. Does not trigger extraction.
    pub fn input(&self) -> Option<&Datasets> {
        self.input.as_ref()
    }

    /// Output datasets if already populated. Does not trigger extraction.
    pub fn output(&self) -> Option<&Datasets> {
        self.output.as_ref()
    }

    /// Replace the input datasets. Any previous output is stale and dropped.
    pub fn set_input(&mut self, datasets: Datasets) {
        self.input = Some(datasets);
        self.output = None;
        self.stage = Stage::Extracted;
    }

    pub fn set_output(&mut self, datasets: Datasets) {
        self.output = Some(datasets);
        self.stage = Stage::Transformed;
    }

    fn mark_loaded(&mut self) {
        self.stage = Stage::Loaded;
    }
}

/// Extract → transform → load.
///
/// Implementors provide [`extract`](Etl::extract) and the state accessors.
/// The lazy accessors and [`pipeline`](Etl::pipeline) are not meant to be
/// overridden.
pub trait Etl {
    fn state(&self) -> &EtlState;

    fn state_mut(&mut self) -> &mut EtlState;

    /// Populate the input datasets (via [`EtlState::set_input`]).
    fn extract(&mut self) -> Result<()>;

    /// Turn input datasets into output datasets. Identity by default.
    fn transform(&mut self) -> Result<()> {
        let input = self.input_datasets()?.clone();
        self.state_mut().set_output(input);
        Ok(())
    }

    /// Persist every output table to the output directory.
    fn load(&mut self) -> Result<()> {
        let dir = self.state().output_dir().to_path_buf();
        let written = persist(self.output_datasets()?, &dir)?;
        info!(tables = written.len(), dir = %dir.display(), "load complete");
        self.state_mut().mark_loaded();
        Ok(())
    }

    /// Outcome of the last acquisition batch, for adapters that download.
    fn retrieval_report(&self) -> Option<&RetrievalReport> {
        None
    }

    /// Run all three stages in order. The first failure aborts the rest.
    fn pipeline(&mut self) -> Result<()> {
        debug!("pipeline: extract");
        self.run_extract()?;
        debug!("pipeline: transform");
        self.transform()?;
        debug!("pipeline: load");
        self.load()
    }

    /// `extract()` behind the re-entrancy guard.
    fn run_extract(&mut self) -> Result<()> {
        if self.state().extracting {
            return Err(EtlError::ReentrantExtract);
        }
        self.state_mut().extracting = true;
        let result = self.extract();
        self.state_mut().extracting = false;
        result?;

        if self.state().input.is_none() {
            debug!("extract() left input unpopulated, using an empty mapping");
            self.state_mut().set_input(Datasets::new());
        }
        Ok(())
    }

    /// Input datasets, extracting first if they are not populated yet.
    fn input_datasets(&mut self) -> Result<&Datasets> {
        if self.state().input.is_none() {
            self.run_extract()?;
        }
        Ok(self.state_mut().input.get_or_insert_with(Datasets::new))
    }

    /// Output datasets. If not populated yet, extraction runs (once) and then
    /// `transform()` produces them.
    fn output_datasets(&mut self) -> Result<&Datasets> {
        if self.state().output.is_none() {
            if self.state().input.is_none() {
                self.run_extract()?;
            }
            if self.state().output.is_none() {
                self.transform()?;
            }
        }
        Ok(self.state_mut().output.get_or_insert_with(Datasets::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    /// Extract produces one small table and counts how often it ran.
    struct InMemoryEtl {
        state: EtlState,
        extracts: usize,
        fail_extract: bool,
        read_own_input: bool,
    }

    impl InMemoryEtl {
        fn new(dir: &Path) -> Self {
            Self {
                state: EtlState::new(dir.join("in"), dir.join("out"), true).unwrap(),
                extracts: 0,
                fail_extract: false,
                read_own_input: false,
            }
        }
    }

    impl Etl for InMemoryEtl {
        fn state(&self) -> &EtlState {
            &self.state
        }

        fn state_mut(&mut self) -> &mut EtlState {
            &mut self.state
        }

        fn extract(&mut self) -> Result<()> {
            self.extracts += 1;
            if self.read_own_input {
                self.input_datasets()?;
            }
            if self.fail_extract {
                return Err(EtlError::parse("bad.zip", "truncated"));
            }
            let mut datasets = Datasets::new();
            datasets.insert("quotes.parquet".into(), df!("x" => [1i64, 2, 3]).unwrap());
            self.state.set_input(datasets);
            Ok(())
        }
    }

    #[test]
    fn constructor_creates_directories_only_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        EtlState::new(dir.path().join("a"), dir.path().join("b"), false).unwrap();
        assert!(!dir.path().join("a").exists());
        EtlState::new(dir.path().join("a"), dir.path().join("b"), true).unwrap();
        assert!(dir.path().join("a").is_dir() && dir.path().join("b").is_dir());
    }

    #[test]
    fn lazy_input_extracts_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut etl = InMemoryEtl::new(dir.path());
        assert_eq!(etl.state().stage(), Stage::Unextracted);

        assert_eq!(etl.input_datasets().unwrap().len(), 1);
        assert_eq!(etl.input_datasets().unwrap().len(), 1);
        assert_eq!(etl.extracts, 1);
        assert_eq!(etl.state().stage(), Stage::Extracted);
    }

    #[test]
    fn lazy_output_extracts_once_and_transforms() {
        let dir = tempfile::tempdir().unwrap();
        let mut etl = InMemoryEtl::new(dir.path());

        let output = etl.output_datasets().unwrap().clone();
        assert_eq!(etl.extracts, 1);
        assert!(output["quotes.parquet"].equals(&etl.input_datasets().unwrap()["quotes.parquet"]));
        assert_eq!(etl.extracts, 1);
        assert_eq!(etl.state().stage(), Stage::Transformed);
    }

    #[test]
    fn pipeline_runs_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let mut etl = InMemoryEtl::new(dir.path());

        etl.pipeline().unwrap();

        assert_eq!(etl.extracts, 1);
        assert_eq!(etl.state().stage(), Stage::Loaded);
        assert!(dir.path().join("out").join("quotes.parquet").is_file());
    }

    #[test]
    fn extract_failure_aborts_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut etl = InMemoryEtl::new(dir.path());
        etl.fail_extract = true;

        let err = etl.pipeline().unwrap_err();

        assert!(matches!(err, EtlError::Parse { .. }));
        assert_eq!(etl.state().stage(), Stage::Unextracted);
        assert_eq!(fs::read_dir(dir.path().join("out")).unwrap().count(), 0);
    }

    #[test]
    fn reentrant_extract_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut etl = InMemoryEtl::new(dir.path());
        etl.read_own_input = true;

        let err = etl.pipeline().unwrap_err();

        assert!(matches!(err, EtlError::ReentrantExtract));
        assert_eq!(etl.extracts, 1);
    }
}
