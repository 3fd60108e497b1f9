//! Capture log file format.
//!
//! CSV without header, one row per message, RFC 4180 quoting:
//! `topic, payload, qos, retain, arrival_time, delta`.
//!
//! Non-numeric fields are always quoted. A topic starting with U+FEFF would
//! otherwise be the first bytes of the file and be taken for a byte-order mark.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tape_api::{QoS, Record};

use crate::error::TapeError;

/// Number of columns in every row.
pub const COLUMNS: usize = 6;

const UNNAMED_ORIGIN: &str = "<stream>";

/// Reject a log path that cannot name a file.
pub fn check_path(path: &Path) -> Result<(), TapeError> {
    if path.as_os_str().is_empty() {
        return Err(TapeError::Config("log file path is empty".into()));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Writer
// ═══════════════════════════════════════════════════════════════

/// Writes records as CSV rows to any `Write` sink.
pub struct LogWriter<W: Write> {
    inner: csv::Writer<W>,
    origin: PathBuf,
    rows: u64,
}

impl<W: Write> LogWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            inner: csv::WriterBuilder::new()
                .has_headers(false)
                .quote_style(csv::QuoteStyle::NonNumeric)
                .from_writer(sink),
            origin: PathBuf::from(UNNAMED_ORIGIN),
            rows: 0,
        }
    }

    /// Path reported in I/O errors.
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn write(&mut self, record: &Record) -> Result<(), TapeError> {
        let qos = record.qos.to_string();
        let retain = if record.retain { "1" } else { "0" };
        let arrival_time = record.arrival_time.to_string();
        let delta = record.delta.to_string();
        self.inner
            .write_record([
                record.topic.as_str(),
                record.payload.as_str(),
                qos.as_str(),
                retain,
                arrival_time.as_str(),
                delta.as_str(),
            ])
            .map_err(|e| csv_error(&self.origin, self.rows + 1, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Flush buffered rows and hand back the sink.
    pub fn finish(self) -> Result<W, TapeError> {
        let origin = self.origin;
        self.inner
            .into_inner()
            .map_err(|e| TapeError::io(origin, e.into_error()))
    }
}

/// Write the whole log to `path` in one pass, replacing any previous file.
///
/// Returns once the data is flushed and synced to disk.
pub fn save(path: &Path, records: &[Record]) -> Result<u64, TapeError> {
    let file = std::fs::File::create(path).map_err(|e| TapeError::io(path, e))?;
    let mut writer = LogWriter::new(file).with_origin(path);
    for record in records {
        writer.write(record)?;
    }
    let rows = writer.rows();
    let file = writer.finish()?;
    file.sync_all().map_err(|e| TapeError::io(path, e))?;
    Ok(rows)
}

// ═══════════════════════════════════════════════════════════════
//  Reader
// ═══════════════════════════════════════════════════════════════

/// Reads records from any `Read` source.
///
/// Every row is validated; the first malformed row ends the read with a
/// `Parse` error carrying its 1-based row number.
pub struct LogReader<R: Read> {
    inner: csv::Reader<R>,
    origin: PathBuf,
}

impl<R: Read> LogReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            inner: csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(source),
            origin: PathBuf::from(UNNAMED_ORIGIN),
        }
    }

    /// Path reported in I/O errors.
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Read every remaining row.
    pub fn read_all(&mut self) -> Result<Vec<Record>, TapeError> {
        let mut records = Vec::new();
        let mut row = csv::StringRecord::new();
        let mut index = 0u64;
        loop {
            index += 1;
            let more = self
                .inner
                .read_record(&mut row)
                .map_err(|e| csv_error(&self.origin, index, e))?;
            if !more {
                break;
            }
            records.push(parse_row(index, &row)?);
        }
        Ok(records)
    }
}

/// Load a whole log file.
pub fn load(path: &Path) -> Result<Vec<Record>, TapeError> {
    let file = std::fs::File::open(path).map_err(|e| TapeError::io(path, e))?;
    LogReader::new(std::io::BufReader::new(file))
        .with_origin(path)
        .read_all()
}

/// Parse records from an in-memory or streaming source.
pub fn read_records<R: Read>(source: R) -> Result<Vec<Record>, TapeError> {
    LogReader::new(source).read_all()
}

fn parse_row(index: u64, row: &csv::StringRecord) -> Result<Record, TapeError> {
    if row.len() != COLUMNS {
        return Err(TapeError::parse(
            index,
            format!("expected {COLUMNS} fields, found {}", row.len()),
        ));
    }

    let topic = &row[0];
    if topic.is_empty() {
        return Err(TapeError::parse(index, "empty topic"));
    }

    let level: u8 = row[2]
        .trim()
        .parse()
        .map_err(|_| TapeError::parse(index, format!("qos is not a number: {:?}", &row[2])))?;
    let qos = QoS::try_from(level).map_err(|e| TapeError::parse(index, e))?;

    // Only the literal "0" means "not retained".
    let retain = &row[3] != "0";

    let arrival_time = parse_seconds(index, "arrival_time", &row[4])?;
    let delta = parse_seconds(index, "delta", &row[5])?.max(0.0);

    Ok(Record {
        topic: topic.to_string(),
        payload: row[1].to_string(),
        qos,
        retain,
        arrival_time,
        delta,
    })
}

fn parse_seconds(index: u64, column: &str, field: &str) -> Result<f64, TapeError> {
    let value: f64 = field
        .trim()
        .parse()
        .map_err(|_| TapeError::parse(index, format!("{column} is not a number: {field:?}")))?;
    if !value.is_finite() {
        return Err(TapeError::parse(index, format!("{column} is not finite: {field:?}")));
    }
    Ok(value)
}

fn csv_error(origin: &Path, index: u64, e: csv::Error) -> TapeError {
    let detail = e.to_string();
    match e.into_kind() {
        csv::ErrorKind::Io(source) => TapeError::io(origin, source),
        _ => TapeError::parse(index, detail),
    }
}
