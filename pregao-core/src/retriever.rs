//! Batch retrieval: fetch every requested date/period and persist what comes back.
//!
//! Each request is independent: a transport error on one item is recorded in
//! the [`RetrievalReport`] and the batch moves on. Failing to *persist* an
//! artifact is different, that aborts the batch with [`EtlError::Write`]
//! because the input directory can no longer be trusted.
//!
//! Artifacts are written to a staging directory under the input directory and
//! renamed into place, so a crash or write error never leaves a partial
//! artifact under its canonical name. The staging directory and the source
//! session are released when the batch ends, on every exit path.

use crate::calendar::PeriodKey;
use crate::error::{EtlError, Result};
use crate::inventory::{scan, ArtifactNaming};
use crate::source::{DateSource, DiscoverySource, Locator};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a single request was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKey {
    Date(NaiveDate),
    Period(PeriodKey),
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKey::Date(date) => write!(f, "{date}"),
            RequestKey::Period(period) => write!(f, "{period}"),
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Content was retrieved and persisted at `path`.
    Found { path: PathBuf },
    /// The source has nothing for this request.
    NotFound,
    /// Transport failure; the request will be retried by the next run.
    Failed { detail: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalEntry {
    pub key: RequestKey,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Ordered per-request outcomes of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalReport {
    pub source: String,
    pub entries: Vec<RetrievalEntry>,
}

impl RetrievalReport {
    fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn found(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Found { .. }))
    }

    pub fn not_found(&self) -> usize {
        self.count(|o| matches!(o, Outcome::NotFound))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// `(key, detail)` for every failed request.
    pub fn failures(&self) -> impl Iterator<Item = (RequestKey, &str)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            Outcome::Failed { detail } => Some((e.key, detail.as_str())),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// Progress callbacks for a retrieval batch.
pub trait RetrievalProgress {
    fn on_start(&self, key: &RequestKey, index: usize, total: usize);

    fn on_complete(&self, key: &RequestKey, index: usize, total: usize, outcome: &Outcome);

    fn on_batch_complete(&self, report: &RetrievalReport);
}

/// Progress reporter that emits `tracing` events.
pub struct LogProgress;

impl RetrievalProgress for LogProgress {
    fn on_start(&self, key: &RequestKey, index: usize, total: usize) {
        debug!(%key, "[{}/{}] requesting", index + 1, total);
    }

    fn on_complete(&self, key: &RequestKey, _index: usize, _total: usize, outcome: &Outcome) {
        match outcome {
            Outcome::Found { path } => info!(%key, path = %path.display(), "retrieved"),
            Outcome::NotFound => debug!(%key, "not published"),
            Outcome::Failed { detail } => warn!(%key, error = %detail, "retrieval failed"),
        }
    }

    fn on_batch_complete(&self, report: &RetrievalReport) {
        info!(
            source = %report.source,
            total = report.len(),
            found = report.found(),
            not_found = report.not_found(),
            failed = report.failed(),
            "retrieval batch complete"
        );
    }
}

/// The input directory seen as a store of dated artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    naming: ArtifactNaming,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, naming: ArtifactNaming) -> Self {
        Self {
            dir: dir.into(),
            naming,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn naming(&self) -> &ArtifactNaming {
        &self.naming
    }

    /// Canonical path of the artifact for `date`.
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(self.naming.file_name(date))
    }

    /// Dates currently present in the store.
    pub fn inventory(&self) -> Result<BTreeSet<NaiveDate>> {
        scan(&self.dir, &self.naming)
    }

    /// Persist `bytes` as the artifact for `date`.
    ///
    /// Never overwrites: an existing entry under the canonical name is a
    /// write failure. The content is staged and renamed into place; on any
    /// error the staged file is removed.
    fn write(&self, date: NaiveDate, bytes: &[u8], staging: Option<&StagingDir>) -> Result<PathBuf> {
        let file_name = self.naming.file_name(date);
        let target = self.dir.join(&file_name);
        if fs::symlink_metadata(&target).is_ok() {
            return Err(EtlError::write(
                &target,
                io::Error::new(io::ErrorKind::AlreadyExists, "artifact already exists"),
            ));
        }

        let tmp = match staging {
            Some(staging) => staging.path().join(&file_name),
            None => self.dir.join(format!(".{file_name}.part")),
        };

        let written = write_synced(&tmp, bytes).and_then(|()| fs::rename(&tmp, &target));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(EtlError::write(&target, e));
        }
        Ok(target)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

/// Name of the scratch directory under the input directory.
pub const STAGING_DIR: &str = ".staging";

/// Scratch directory for in-flight downloads, removed on drop.
///
/// The name is fixed so that leftovers of a killed run are cleared by the
/// next batch instead of accumulating.
struct StagingDir {
    path: PathBuf,
}

impl StagingDir {
    fn create(parent: &Path) -> io::Result<Self> {
        let path = parent.join(STAGING_DIR);
        if fs::symlink_metadata(&path).is_ok() {
            debug!(path = %path.display(), "clearing leftover staging directory");
            fs::remove_dir_all(&path)?;
        }
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            debug!(path = %self.path.display(), error = %e, "staging cleanup failed");
        }
    }
}

/// Transient state of one batch: the staging directory and the source
/// session. Both are released when this is dropped.
struct BatchSession<F: FnMut()> {
    staging: Option<StagingDir>,
    release: F,
}

impl<F: FnMut()> BatchSession<F> {
    fn open(store: &ArtifactStore, release: F) -> Self {
        let staging = match StagingDir::create(store.dir()) {
            Ok(staging) => Some(staging),
            Err(e) => {
                debug!(dir = %store.dir().display(), error = %e, "no staging directory, writing beside targets");
                None
            }
        };
        Self { staging, release }
    }

    fn staging(&self) -> Option<&StagingDir> {
        self.staging.as_ref()
    }
}

impl<F: FnMut()> Drop for BatchSession<F> {
    fn drop(&mut self) {
        (self.release)();
    }
}

/// Retrieve every date in `requests`, in order, from a date-addressed source.
pub fn retrieve_dates<S: DateSource + ?Sized>(
    source: &S,
    requests: &[NaiveDate],
    store: &ArtifactStore,
    progress: &dyn RetrievalProgress,
) -> Result<RetrievalReport> {
    let session = BatchSession::open(store, || source.release());
    let total = requests.len();
    let mut report = RetrievalReport::new(source.name());

    for (i, date) in requests.iter().enumerate() {
        let key = RequestKey::Date(*date);
        progress.on_start(&key, i, total);

        let outcome = match source.fetch(*date) {
            Ok(Some(bytes)) if !bytes.is_empty() => Outcome::Found {
                path: store.write(*date, &bytes, session.staging())?,
            },
            Ok(_) => Outcome::NotFound,
            Err(e) => Outcome::Failed {
                detail: e.to_string(),
            },
        };

        progress.on_complete(&key, i, total, &outcome);
        report.entries.push(RetrievalEntry { key, outcome });
    }

    progress.on_batch_complete(&report);
    Ok(report)
}

/// Retrieve every period in `requests` from a discovery source.
///
/// The source is listed once. Periods absent from the listing are
/// `NotFound`. Only locators with
/// [`Coverage::Full`](crate::source::Coverage::Full) can become a period's
/// artifact: they are alternatives tried in order, the first non-empty body
/// wins, and a transport error is only reported when no later one succeeds.
/// A period listed with partial locators alone (single days of a month not
/// yet closed) is `NotFound`, so it stays missing and is requested again on
/// the next run. If the listing itself fails, every request is reported as
/// failed with that error.
pub fn retrieve_periods<S: DiscoverySource + ?Sized>(
    source: &S,
    requests: &[PeriodKey],
    store: &ArtifactStore,
    progress: &dyn RetrievalProgress,
) -> Result<RetrievalReport> {
    let session = BatchSession::open(store, || source.release());
    let total = requests.len();
    let mut report = RetrievalReport::new(source.name());

    let listing: std::result::Result<BTreeMap<PeriodKey, Vec<Locator>>, String> =
        source.discover().map_err(|e| e.to_string());
    match &listing {
        Ok(links) => debug!(periods = links.len(), "listing discovered"),
        Err(e) => warn!(source = source.name(), error = %e, "discovery failed"),
    }

    for (i, period) in requests.iter().enumerate() {
        let key = RequestKey::Period(*period);
        progress.on_start(&key, i, total);

        let outcome = match &listing {
            Err(detail) => Outcome::Failed {
                detail: detail.clone(),
            },
            Ok(links) => match links.get(period) {
                None => Outcome::NotFound,
                Some(locators) => fetch_first(source, locators, *period, store, session.staging())?,
            },
        };

        progress.on_complete(&key, i, total, &outcome);
        report.entries.push(RetrievalEntry { key, outcome });
    }

    progress.on_batch_complete(&report);
    Ok(report)
}

fn fetch_first<S: DiscoverySource + ?Sized>(
    source: &S,
    locators: &[Locator],
    period: PeriodKey,
    store: &ArtifactStore,
    staging: Option<&StagingDir>,
) -> Result<Outcome> {
    let mut last_error = None;
    let mut full = locators.iter().filter(|l| l.is_full()).peekable();
    if full.peek().is_none() {
        debug!(%period, links = locators.len(), "only partial links published, period left missing");
        return Ok(Outcome::NotFound);
    }
    for locator in full {
        match source.fetch_locator(locator) {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                let path = store.write(period.first_day(), &bytes, staging)?;
                return Ok(Outcome::Found { path });
            }
            Ok(_) => continue,
            Err(e) => {
                debug!(%locator, error = %e, "locator failed, trying next");
                last_error = Some(format!("{locator}: {e}"));
            }
        }
    }
    Ok(match last_error {
        Some(detail) => Outcome::Failed { detail },
        None => Outcome::NotFound,
    })
}
