//! Output materializer: named tables → Parquet files.
//!
//! Layout: `{output_dir}/{name}`, one file per dataset name, fully
//! rewritten on every load. Writes are atomic (write to `.tmp`, rename into
//! place); a failed write leaves no file behind under the target name.

use crate::error::{EtlError, Result};
use crate::etl::Datasets;
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Write every table in `datasets` to `dir`. Returns the written paths in
/// name order. An empty mapping writes nothing.
pub fn persist(datasets: &Datasets, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(datasets.len());
    for (name, df) in datasets {
        let path = dir.join(name);
        write_table(df, &path)?;
        info!(table = %name, rows = df.height(), path = %path.display(), "table written");
        written.push(path);
    }
    Ok(written)
}

/// Atomically write one table as Parquet.
pub fn write_table(df: &DataFrame, path: &Path) -> Result<()> {
    let tmp_path = tmp_path_for(path);

    if let Err(e) = write_parquet(df, &tmp_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        EtlError::write(path, e)
    })?;
    debug!(path = %path.display(), "renamed into place");
    Ok(())
}

/// Read a table written by [`write_table`].
pub fn read_table(path: &Path) -> Result<DataFrame> {
    let file = fs::File::open(path).map_err(|e| EtlError::io(path, e))?;
    Ok(ParquetReader::new(file).finish()?)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<()> {
    let file = fs::File::create(path).map_err(|e| EtlError::write(path, e))?;
    ParquetWriter::new(file).finish(&mut df.clone())?;
    Ok(())
}
