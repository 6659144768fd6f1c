//! Pregão Core — incremental acquisition and ETL of B3 quote archives.
//!
//! - Inventory scanning of dated artifacts already on disk
//! - Calendar reconciliation of missing dates/months
//! - Batch retrieval with per-item outcomes and guaranteed cleanup
//! - The extract → transform → load lifecycle with lazy datasets
//! - Parquet materialization of output tables
//! - The B3 COTAHIST parser and adapter

pub mod b3;
pub mod calendar;
pub mod config;
pub mod cotahist;
pub mod error;
pub mod etl;
pub mod http;
pub mod inventory;
pub mod materialize;
pub mod options;
pub mod retriever;
pub mod source;

pub use b3::{Acquisition, CotacaoB3Etl};
pub use config::EtlConfig;
pub use error::{EtlError, Result, SourceError};
pub use etl::{Datasets, Etl, EtlState, Stage};
pub use options::EtlKind;
pub use retriever::{LogProgress, Outcome, RequestKey, RetrievalProgress, RetrievalReport};
