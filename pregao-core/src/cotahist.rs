//! B3 COTAHIST archive parser.
//!
//! An archive is a zip with a single fixed-width text member (Latin-1,
//! 245-byte records). Record type `00` is the header, `99` the trailer and
//! `01` one quote line per instrument and session. Prices are published as
//! integers with two implied decimals and are kept that way here; scaling is
//! a transform concern.

use chrono::NaiveDate;
use polars::prelude::*;
use std::io::{Cursor, Read};
use thiserror::Error;

pub const RECORD_LEN: usize = 245;

#[derive(Debug, Error)]
pub enum CotahistError {
    #[error("zip error: {0}")]
    Zip(#[from] ::zip::result::ZipError),

    #[error("archive has no file member")]
    EmptyArchive,

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: {reason}")]
    Record { line: usize, reason: String },

    #[error("table build failed: {0}")]
    Table(#[from] PolarsError),
}

/// Integer price columns (value × 100).
pub const PRICE_COLUMNS: [&str; 7] = [
    "pre_abe", "pre_max", "pre_min", "pre_med", "pre_ult", "pre_ofc", "pre_ofv",
];

/// One `01` record, raw.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteRecord {
    pub data_pregao: NaiveDate,
    pub cod_bdi: String,
    pub cod_neg: String,
    pub tp_merc: i32,
    pub nom_res: String,
    pub especi: String,
    /// open, max, min, avg, last, best bid, best ask
    pub prices: [i64; 7],
    pub tot_neg: i64,
    pub qua_tot: i64,
    pub vol_tot: i64,
    pub cod_isi: String,
}

// (start, len), 0-based
const DATA_PREGAO: (usize, usize) = (2, 8);
const COD_BDI: (usize, usize) = (10, 2);
const COD_NEG: (usize, usize) = (12, 12);
const TP_MERC: (usize, usize) = (24, 3);
const NOM_RES: (usize, usize) = (27, 12);
const ESPECI: (usize, usize) = (39, 10);
const PRICES_START: usize = 56;
const PRICE_LEN: usize = 13;
const TOT_NEG: (usize, usize) = (147, 5);
const QUA_TOT: (usize, usize) = (152, 18);
const VOL_TOT: (usize, usize) = (170, 18);
const COD_ISI: (usize, usize) = (230, 12);

fn field(line: &[u8], (start, len): (usize, usize)) -> String {
    // Latin-1 maps byte-for-byte onto the first 256 code points
    line[start..start + len]
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_string()
}

fn number(line: &[u8], span: (usize, usize), name: &str, line_no: usize) -> Result<i64, CotahistError> {
    let text = field(line, span);
    if text.is_empty() {
        return Ok(0);
    }
    text.parse().map_err(|_| CotahistError::Record {
        line: line_no,
        reason: format!("{name}: not a number: '{text}'"),
    })
}

/// Parse one `01` record. `line_no` is 1-based, for error messages.
pub fn parse_record(line: &[u8], line_no: usize) -> Result<QuoteRecord, CotahistError> {
    if line.len() < RECORD_LEN {
        return Err(CotahistError::Record {
            line: line_no,
            reason: format!("expected {RECORD_LEN} bytes, got {}", line.len()),
        });
    }

    let date_text = field(line, DATA_PREGAO);
    let data_pregao = NaiveDate::parse_from_str(&date_text, "%Y%m%d").map_err(|_| {
        CotahistError::Record {
            line: line_no,
            reason: format!("invalid session date '{date_text}'"),
        }
    })?;

    let mut prices = [0i64; 7];
    for (i, (price, name)) in prices.iter_mut().zip(PRICE_COLUMNS).enumerate() {
        *price = number(line, (PRICES_START + i * PRICE_LEN, PRICE_LEN), name, line_no)?;
    }

    Ok(QuoteRecord {
        data_pregao,
        cod_bdi: field(line, COD_BDI),
        cod_neg: field(line, COD_NEG),
        tp_merc: number(line, TP_MERC, "tp_merc", line_no)? as i32,
        nom_res: field(line, NOM_RES),
        especi: field(line, ESPECI),
        prices,
        tot_neg: number(line, TOT_NEG, "tot_neg", line_no)?,
        qua_tot: number(line, QUA_TOT, "qua_tot", line_no)?,
        vol_tot: number(line, VOL_TOT, "vol_tot", line_no)?,
        cod_isi: field(line, COD_ISI),
    })
}

/// Parse the text member of an archive into quote records.
pub fn parse_text(text: &[u8]) -> Result<Vec<QuoteRecord>, CotahistError> {
    let mut records = Vec::new();
    for (i, raw) in text.split(|b| *b == b'\n').enumerate() {
        let line = raw.strip_suffix(b"\r").unwrap_or(raw);
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match line.get(..2) {
            Some(b"00") | Some(b"99") => continue,
            Some(b"01") => records.push(parse_record(line, i + 1)?),
            _ => {
                return Err(CotahistError::Record {
                    line: i + 1,
                    reason: "unknown record type".into(),
                })
            }
        }
    }
    Ok(records)
}

/// Upper bound on the buffer reserved from a member's declared size. The
/// header is not trusted beyond this; larger members grow as they are read.
const PREALLOC_LIMIT: u64 = 64 * 1024 * 1024;

fn initial_capacity(declared_size: u64) -> usize {
    usize::try_from(declared_size.min(PREALLOC_LIMIT)).unwrap_or(0)
}

/// Read the first file member of a zip archive.
pub fn unzip_member(bytes: &[u8]) -> Result<Vec<u8>, CotahistError> {
    let mut archive = ::zip::ZipArchive::new(Cursor::new(bytes))?;
    for i in 0..archive.len() {
        let mut member = archive.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        let mut text = Vec::with_capacity(initial_capacity(member.size()));
        member.read_to_end(&mut text)?;
        return Ok(text);
    }
    Err(CotahistError::EmptyArchive)
}

/// Convert records to a DataFrame with the raw COTAHIST column set.
pub fn records_to_dataframe(records: &[QuoteRecord]) -> Result<DataFrame, CotahistError> {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
    let days: Vec<i32> = records
        .iter()
        .map(|r| (r.data_pregao - epoch).num_days() as i32)
        .collect();
    let strings = |pick: fn(&QuoteRecord) -> String| -> Vec<String> { records.iter().map(pick).collect() };
    let ints = |pick: fn(&QuoteRecord) -> i64| -> Vec<i64> { records.iter().map(pick).collect() };

    let mut columns = vec![
        Column::new("data_pregao".into(), days).cast(&DataType::Date)?,
        Column::new("cod_bdi".into(), strings(|r| r.cod_bdi.clone())),
        Column::new("cod_neg".into(), strings(|r| r.cod_neg.clone())),
        Column::new("tp_merc".into(), records.iter().map(|r| r.tp_merc).collect::<Vec<i32>>()),
        Column::new("nom_res".into(), strings(|r| r.nom_res.clone())),
        Column::new("especi".into(), strings(|r| r.especi.clone())),
    ];
    for (i, name) in PRICE_COLUMNS.iter().enumerate() {
        let values: Vec<i64> = records.iter().map(|r| r.prices[i]).collect();
        columns.push(Column::new((*name).into(), values));
    }
    columns.push(Column::new("tot_neg".into(), ints(|r| r.tot_neg)));
    columns.push(Column::new("qua_tot".into(), ints(|r| r.qua_tot)));
    columns.push(Column::new("vol_tot".into(), ints(|r| r.vol_tot)));
    columns.push(Column::new("cod_isi".into(), strings(|r| r.cod_isi.clone())));

    Ok(DataFrame::new(columns)?)
}

/// Archive bytes → raw quote table.
pub fn parse_archive(bytes: &[u8]) -> Result<DataFrame, CotahistError> {
    let text = unzip_member(bytes)?;
    let records = parse_text(&text)?;
    records_to_dataframe(&records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn put(line: &mut [u8], start: usize, value: &str) {
        line[start..start + value.len()].copy_from_slice(value.as_bytes());
    }

    fn quote_line(date: &str, ticker: &str, close_cents: i64) -> String {
        let mut line = vec![b' '; RECORD_LEN];
        put(&mut line, 0, "01");
        put(&mut line, 2, date);
        put(&mut line, 10, "02");
        put(&mut line, 12, ticker);
        put(&mut line, 24, "010");
        put(&mut line, 27, "PETROBRAS");
        put(&mut line, 39, "PN");
        for i in 0..7 {
            put(&mut line, PRICES_START + i * PRICE_LEN, &format!("{close_cents:013}"));
        }
        put(&mut line, 147, "00042");
        put(&mut line, 152, &format!("{:018}", 1000));
        put(&mut line, 170, &format!("{:018}", close_cents * 1000));
        put(&mut line, 230, "BRPETRACNPR6");
        String::from_utf8(line).unwrap()
    }

    fn header() -> String {
        format!("{:<245}", "00COTAHIST.2024BOVESPA 20240102")
    }

    fn trailer() -> String {
        format!("{:<245}", "99COTAHIST.2024BOVESPA 20240102")
    }

    fn zip_text(text: &str) -> Vec<u8> {
        let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("COTAHIST_D02012024.TXT", ::zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(text.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn parses_quote_records() {
        let text = [
            header(),
            quote_line("20240102", "PETR4", 3712),
            quote_line("20240102", "VALE3", 7801),
            trailer(),
        ]
        .join("\r\n");
        let df = parse_archive(&zip_text(&text)).unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(df.width(), 17);
        let tickers: Vec<_> = df.column("cod_neg").unwrap().str().unwrap().into_no_null_iter().collect();
        assert_eq!(tickers, vec!["PETR4", "VALE3"]);
        assert_eq!(df.column("pre_ult").unwrap().i64().unwrap().get(1), Some(7801));
        assert_eq!(df.column("tp_merc").unwrap().i32().unwrap().get(0), Some(10));
        assert_eq!(df.column("tot_neg").unwrap().i64().unwrap().get(0), Some(42));
        assert_eq!(df.column("data_pregao").unwrap().dtype(), &DataType::Date);
    }

    #[test]
    fn header_only_archive_yields_empty_table_with_schema() {
        let text = [header(), trailer()].join("\n");
        let df = parse_archive(&zip_text(&text)).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 17);
    }

    #[test]
    fn short_record_is_rejected() {
        let text = [header(), "01202401020".to_string()].join("\n");
        let err = parse_archive(&zip_text(&text)).unwrap_err();
        assert!(matches!(err, CotahistError::Record { line: 2, .. }));
    }

    #[test]
    fn declared_member_size_is_not_trusted_for_allocation() {
        assert_eq!(initial_capacity(4_096), 4_096);
        assert_eq!(initial_capacity(u64::MAX), PREALLOC_LIMIT as usize);
    }

    #[test]
    fn garbage_bytes_are_not_an_archive() {
        assert!(matches!(parse_archive(b"<html>oops</html>"), Err(CotahistError::Zip(_))));
    }

    #[test]
    fn latin1_names_are_decoded() {
        let mut line = quote_line("20240102", "ABEV3", 1300).into_bytes();
        line[27..39].copy_from_slice(b"A\xc7\xc3O        ");
        let record = parse_record(&line, 1).unwrap();
        assert_eq!(record.nom_res, "AÇÃO");
    }
}
