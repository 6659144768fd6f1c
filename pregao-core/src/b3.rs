//! B3 historical quotes (COTAHIST) adapter.
//!
//! `extract()` reconciles the lookback window against the input directory,
//! downloads whatever is missing, then parses every artifact in the window.
//! Calling `extract()` again re-runs the whole reconciliation; dates already
//! on disk are not requested twice, and the input datasets are replaced.

use crate::calendar::{lookback_start, missing_dates, missing_months, skip_weekends, PeriodKey};
use crate::config::EtlConfig;
use crate::cotahist::{self, PRICE_COLUMNS};
use crate::error::{EtlError, Result};
use crate::etl::{Datasets, Etl, EtlState};
use crate::http::{HttpDateSource, HttpListingSource};
use crate::inventory::ArtifactNaming;
use crate::retriever::{
    retrieve_dates, retrieve_periods, ArtifactStore, LogProgress, RequestKey, RetrievalProgress,
    RetrievalReport,
};
use crate::source::{DateSource, DiscoverySource};
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use tracing::{info, warn};

/// How artifacts are acquired.
pub enum Acquisition {
    /// One request per missing calendar date; artifacts named `YYYY-MM-DD.zip`.
    ByDate(Box<dyn DateSource>),
    /// One request per missing month, resolved through a listing; artifacts
    /// named `YYYY_MM.zip`.
    ByDiscovery(Box<dyn DiscoverySource>),
}

impl Acquisition {
    pub fn naming(&self) -> ArtifactNaming {
        match self {
            Acquisition::ByDate(_) => ArtifactNaming::daily_zip(),
            Acquisition::ByDiscovery(_) => ArtifactNaming::monthly_zip(),
        }
    }
}

/// ETL for B3 COTAHIST archives.
pub struct CotacaoB3Etl {
    state: EtlState,
    store: ArtifactStore,
    acquisition: Acquisition,
    lookback_days: u32,
    skip_weekends: bool,
    today: Option<NaiveDate>,
    progress: Box<dyn RetrievalProgress>,
    last_report: Option<RetrievalReport>,
}

impl CotacaoB3Etl {
    pub fn new(config: &EtlConfig, acquisition: Acquisition) -> Result<Self> {
        config.validate()?;
        let state = EtlState::new(&config.input_dir, &config.output_dir, config.create_dirs)?;
        let store = ArtifactStore::new(&config.input_dir, acquisition.naming());
        Ok(Self {
            state,
            store,
            acquisition,
            lookback_days: config.source.lookback_days,
            skip_weekends: config.source.skip_weekends,
            today: None,
            progress: Box::new(LogProgress),
            last_report: None,
        })
    }

    /// Daily archives fetched straight from `source.url_template`.
    pub fn daily(config: &EtlConfig) -> Result<Self> {
        let source = HttpDateSource::new(&config.source.url_template, &config.source.http_settings())
            .map_err(|source| EtlError::Source {
                name: "b3_http_daily".into(),
                source,
            })?;
        Self::new(config, Acquisition::ByDate(Box::new(source)))
    }

    /// Monthly archives discovered on `source.listing_url`.
    pub fn monthly(config: &EtlConfig) -> Result<Self> {
        let source = HttpListingSource::new(&config.source.listing_url, &config.source.http_settings())
            .map_err(|source| EtlError::Source {
                name: "b3_http_listing".into(),
                source,
            })?;
        Self::new(config, Acquisition::ByDiscovery(Box::new(source)))
    }

    /// Pin "today" instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn RetrievalProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Inclusive `(start, today)` reconciliation window.
    pub fn window(&self) -> (NaiveDate, NaiveDate) {
        let today = self
            .today
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        (lookback_start(today, self.lookback_days), today)
    }

    /// Requests the next `extract()` would issue. No network access.
    pub fn pending_requests(&self) -> Result<Vec<RequestKey>> {
        let (start, today) = self.window();
        let inventory = self.store.inventory()?;
        Ok(match &self.acquisition {
            Acquisition::ByDate(_) => {
                let mut dates = missing_dates(start, today, &inventory);
                if self.skip_weekends {
                    dates = skip_weekends(dates);
                }
                dates.into_iter().map(RequestKey::Date).collect()
            }
            Acquisition::ByDiscovery(_) => missing_months(start, today, &inventory)
                .into_iter()
                .map(RequestKey::Period)
                .collect(),
        })
    }

    fn acquire(&self) -> Result<RetrievalReport> {
        let requests = self.pending_requests()?;
        info!(
            dir = %self.store.dir().display(),
            pending = requests.len(),
            "reconciled inventory"
        );
        match &self.acquisition {
            Acquisition::ByDate(source) => {
                let dates: Vec<NaiveDate> = requests
                    .iter()
                    .filter_map(|k| match k {
                        RequestKey::Date(d) => Some(*d),
                        RequestKey::Period(_) => None,
                    })
                    .collect();
                retrieve_dates(source.as_ref(), &dates, &self.store, self.progress.as_ref())
            }
            Acquisition::ByDiscovery(source) => {
                let periods: Vec<PeriodKey> = requests
                    .iter()
                    .filter_map(|k| match k {
                        RequestKey::Period(p) => Some(*p),
                        RequestKey::Date(_) => None,
                    })
                    .collect();
                retrieve_periods(source.as_ref(), &periods, &self.store, self.progress.as_ref())
            }
        }
    }

    /// Parse every artifact inside the window, keyed by artifact stem.
    fn parse_window(&self) -> Result<Datasets> {
        let (start, today) = self.window();
        let first_key = match &self.acquisition {
            Acquisition::ByDate(_) => start,
            Acquisition::ByDiscovery(_) => PeriodKey::of(start).first_day(),
        };

        let mut datasets = Datasets::new();
        for date in self.store.inventory()?.range(first_key..=today) {
            let path = self.store.path_for(*date);
            let bytes = fs::read(&path).map_err(|e| EtlError::io(&path, e))?;
            let df = cotahist::parse_archive(&bytes).map_err(|e| EtlError::parse(&path, e.to_string()))?;
            datasets.insert(self.store.naming().stem(*date), df);
        }
        Ok(datasets)
    }
}

impl Etl for CotacaoB3Etl {
    fn state(&self) -> &EtlState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut EtlState {
        &mut self.state
    }

    fn extract(&mut self) -> Result<()> {
        let report = self.acquire()?;
        for (key, detail) in report.failures() {
            warn!(%key, error = %detail, "will retry on the next run");
        }
        self.last_report = Some(report);

        let datasets = self.parse_window()?;
        info!(artifacts = datasets.len(), "artifacts parsed");
        self.state.set_input(datasets);
        Ok(())
    }

    fn transform(&mut self) -> Result<()> {
        let input = self.input_datasets()?.clone();
        let mut output = Datasets::new();
        for (stem, df) in input {
            output.insert(format!("{stem}.parquet"), normalize_quotes(df)?);
        }
        self.state.set_output(output);
        Ok(())
    }

    fn retrieval_report(&self) -> Option<&RetrievalReport> {
        self.last_report.as_ref()
    }
}

/// Scale integer price and volume columns (× 100 on the wire) to `f64`.
pub fn normalize_quotes(df: DataFrame) -> PolarsResult<DataFrame> {
    let scaled: Vec<Expr> = PRICE_COLUMNS
        .iter()
        .copied()
        .chain(["vol_tot"])
        .map(|name| (col(name).cast(DataType::Float64) / lit(100.0)).alias(name))
        .collect();
    df.lazy().with_columns(scaled).collect()
}
