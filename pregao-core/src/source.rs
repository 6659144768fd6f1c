//! Content source traits.
//!
//! Sources abstract over how raw bytes are obtained (direct HTTP, a scraped
//! listing page, fixtures in tests). The retriever sits above these traits;
//! sources know nothing about the input directory.

use crate::calendar::PeriodKey;
use crate::error::SourceError;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;

/// How much of its period a discovered link holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Coverage {
    /// The whole period (e.g. a monthly archive).
    Full,
    /// Only part of it (e.g. one day of the month). Never stored as the
    /// period's artifact.
    Partial,
}

/// Where a discovered artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Locator {
    value: String,
    coverage: Coverage,
}

impl Locator {
    /// A link covering its whole period.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            coverage: Coverage::Full,
        }
    }

    pub fn partial(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            coverage: Coverage::Partial,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn coverage(&self) -> Coverage {
        self.coverage
    }

    pub fn is_full(&self) -> bool {
        self.coverage == Coverage::Full
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Source addressable by calendar date.
pub trait DateSource {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch the content published for `date`.
    ///
    /// `Ok(None)` means nothing is published for that date (not yet
    /// available, non-trading day). `Err` is reserved for transport failures.
    fn fetch(&self, date: NaiveDate) -> Result<Option<Vec<u8>>, SourceError>;

    /// Release any session state. Must not fail.
    fn release(&self) {}
}

/// Source that must be listed before anything can be fetched.
pub trait DiscoverySource {
    fn name(&self) -> &str;

    /// Currently visible download links, grouped by month. Within a month,
    /// links covering the full period come first.
    fn discover(&self) -> Result<BTreeMap<PeriodKey, Vec<Locator>>, SourceError>;

    /// Fetch one discovered link. Same `None`/`Err` contract as
    /// [`DateSource::fetch`].
    fn fetch_locator(&self, locator: &Locator) -> Result<Option<Vec<u8>>, SourceError>;

    fn release(&self) {}
}

impl<T: DateSource + ?Sized> DateSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&self, date: NaiveDate) -> Result<Option<Vec<u8>>, SourceError> {
        (**self).fetch(date)
    }

    fn release(&self) {
        (**self).release()
    }
}

impl<T: DiscoverySource + ?Sized> DiscoverySource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn discover(&self) -> Result<BTreeMap<PeriodKey, Vec<Locator>>, SourceError> {
        (**self).discover()
    }

    fn fetch_locator(&self, locator: &Locator) -> Result<Option<Vec<u8>>, SourceError> {
        (**self).fetch_locator(locator)
    }

    fn release(&self) {
        (**self).release()
    }
}
