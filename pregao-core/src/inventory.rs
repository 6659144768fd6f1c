//! Inventory of artifacts already present in the input directory.
//!
//! [`ArtifactNaming`] is the single source of truth for artifact file names:
//! the retriever writes with [`ArtifactNaming::file_name`] and the scanner
//! reads back with [`ArtifactNaming::parse`], so a date written is always a
//! date found.

use crate::calendar::PeriodKey;
use crate::error::{EtlError, Result};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// How artifact keys map onto calendar time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    /// One artifact per calendar date.
    Daily,
    /// One artifact per month, keyed by the first day of the month.
    Monthly,
}

/// Naming convention for dated artifacts: `<token>.<extension>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNaming {
    granularity: Granularity,
    format: String,
    extension: String,
}

impl ArtifactNaming {
    pub fn new(granularity: Granularity, format: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            granularity,
            format: format.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    /// `2024-01-02.zip`
    pub fn daily_zip() -> Self {
        Self::new(Granularity::Daily, "%Y-%m-%d", "zip")
    }

    /// `2024_01.zip`
    pub fn monthly_zip() -> Self {
        Self::new(Granularity::Monthly, "%Y_%m", "zip")
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// The token part of the name (no extension).
    pub fn stem(&self, date: NaiveDate) -> String {
        date.format(&self.format).to_string()
    }

    pub fn file_name(&self, date: NaiveDate) -> String {
        format!("{}.{}", self.stem(date), self.extension)
    }

    pub fn period_file_name(&self, period: PeriodKey) -> String {
        self.file_name(period.first_day())
    }

    /// Parse an artifact file name back into its key date.
    ///
    /// Returns `None` for names that do not follow the convention. A parsed
    /// key must also render back to the same name, which rejects
    /// non-canonical spellings such as `2024-1-2.zip`.
    pub fn parse(&self, file_name: &str) -> Option<NaiveDate> {
        let stem = file_name.strip_suffix(&format!(".{}", self.extension))?;
        let date = match self.granularity {
            Granularity::Daily => NaiveDate::parse_from_str(stem, &self.format).ok()?,
            Granularity::Monthly => {
                // chrono needs a day to build a NaiveDate
                NaiveDate::parse_from_str(&format!("{stem}|01"), &format!("{}|%d", self.format))
                    .ok()?
            }
        };
        (self.stem(date) == stem).then_some(date)
    }
}

/// Scan `dir` for artifacts following `naming` and return their key dates.
///
/// Only regular files count; names that do not parse are ignored. The
/// directory must exist.
pub fn scan(dir: &Path, naming: &ArtifactNaming) -> Result<BTreeSet<NaiveDate>> {
    let entries = fs::read_dir(dir).map_err(|e| EtlError::io(dir, e))?;

    let mut dates = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| EtlError::io(dir, e))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(date) = entry.file_name().to_str().and_then(|n| naming.parse(n)) {
            dates.insert(date);
        }
    }
    Ok(dates)
}
