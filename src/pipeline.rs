//! Applying a staged stock file's SKU/quantity rows to the stock registry
use crate::consts::{MAX_RECORD_LEN, REQUIRED_COLUMNS};
use crate::header::{self, HeaderError, HeaderIndex};
use crate::registry::{RegistryError, StockRegistry};
use crate::util::leading_int;
use csv::StringRecord;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Drives a single stock file through header resolution and per-row updates
#[derive(Debug)]
pub(crate) struct StockUpdatePipeline<'a, R> {
    registry: &'a R,
}

impl<'a, R: StockRegistry> StockUpdatePipeline<'a, R> {
    pub(crate) fn new(registry: &'a R) -> Self {
        StockUpdatePipeline { registry }
    }

    /// Apply every data row of the stock file at `path`.
    ///
    /// Structural problems with the file (missing, empty, unreadable, bad
    /// header) abort the run before any row is touched.  Problems with
    /// individual rows are logged, counted, and skipped.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub(crate) async fn run(&self, path: &Path) -> Result<RunSummary, PipelineError> {
        tracing::info!("Stock updater is starting");
        let start = Instant::now();
        let contents = read_stock_file(path)?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(contents.as_slice());

        let mut header_row = StringRecord::new();
        match reader.read_record(&mut header_row) {
            Ok(true) => (),
            Ok(false) => {
                tracing::error!("Stock file is empty");
                return Err(FileAccessError::Empty {
                    path: path.to_owned(),
                }
                .into());
            }
            Err(source) => {
                tracing::error!(error = %source, "Stock file header could not be parsed");
                return Err(HeaderError::Unparsable { source }.into());
            }
        }
        let index = header::resolve(&header_row).inspect_err(|e| {
            tracing::error!(error = %e, "Stock file header is invalid");
        })?;
        tracing::debug!(sku_column = index.sku, qty_column = index.qty, "Resolved header");

        let mut counts = OutcomeCounts::default();
        let mut row = 0;
        let mut record = StringRecord::new();
        loop {
            let offset = reader.position().byte();
            let read = reader.read_record(&mut record);
            // The reader drops empty lines; they still count as rows with no
            // data columns.
            for _ in 0..blank_lines_at(&contents, offset) {
                row += 1;
                tally(&mut counts, Err(RowError::Malformed { row, cells: 0 }));
            }
            let r = match read {
                Ok(true) => {
                    row += 1;
                    self.process_row(row, &record, index).await
                }
                Ok(false) => break,
                Err(source) => {
                    row += 1;
                    Err(RowError::Unreadable { row, source })
                }
            };
            tally(&mut counts, r);
        }

        let summary = RunSummary {
            counts,
            elapsed: start.elapsed(),
        };
        summary.log();
        Ok(summary)
    }

    async fn process_row(
        &self,
        row: usize,
        record: &StringRecord,
        index: HeaderIndex,
    ) -> Result<(), RowError> {
        let len = record_len(record);
        if len > MAX_RECORD_LEN {
            return Err(RowError::TooLong { row, len });
        }
        let cells = record.iter().filter(|c| !c.is_empty()).count();
        if cells < REQUIRED_COLUMNS {
            return Err(RowError::Malformed { row, cells });
        }
        // Cells are addressed by header position, so a gap left by an empty
        // cell does not shift the columns.
        let sku = leading_int(record.get(index.sku).unwrap_or_default());
        let qty = leading_int(record.get(index.qty).unwrap_or_default());
        let mut item = self
            .registry
            .get_by_sku(sku)
            .await
            .map_err(|source| RowError::NoSuchSku { row, sku, source })?;
        item.apply_qty(qty);
        self.registry
            .update_by_sku(sku, &item)
            .await
            .map_err(|source| RowError::UpdateFailed { row, sku, source })?;
        tracing::debug!(
            row,
            sku,
            qty,
            is_in_stock = item.is_in_stock,
            "Updated stock item"
        );
        Ok(())
    }
}

/// Read the full contents of the stock file at `path`, rejecting files that
/// are missing or contain nothing but whitespace.  The file handle is closed
/// before returning.
fn read_stock_file(path: &Path) -> Result<Vec<u8>, FileAccessError> {
    let contents = match fs_err::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::error!(alert = true, "Stock file not found");
            return Err(FileAccessError::NotFound {
                path: path.to_owned(),
            });
        }
        Err(source) => {
            tracing::error!(error = %source, "Stock file unable to be opened");
            return Err(FileAccessError::Read {
                path: path.to_owned(),
                source,
            });
        }
    };
    if contents.iter().all(u8::is_ascii_whitespace) {
        tracing::error!("Stock file is empty");
        return Err(FileAccessError::Empty {
            path: path.to_owned(),
        });
    }
    Ok(contents)
}

fn tally(counts: &mut OutcomeCounts, r: Result<(), RowError>) {
    match r {
        Ok(()) => counts.record(UpdateOutcome::Success),
        Err(e) => {
            if matches!(e, RowError::UpdateFailed { .. }) {
                tracing::error!(error = ?e, "Stock update failed");
            } else {
                tracing::info!(error = %e, "Skipping row");
            }
            counts.record(e.outcome());
        }
    }
}

/// Number of empty lines in `contents` starting at byte offset `start`, where
/// the CSV reader resumed after the previous record
fn blank_lines_at(contents: &[u8], start: u64) -> usize {
    let Ok(start) = usize::try_from(start) else {
        return 0;
    };
    let mut rest = contents.get(start..).unwrap_or_default();
    // The reader stops between the two bytes of a CRLF terminator.
    if start > 0 && contents.get(start - 1) == Some(&b'\r') {
        rest = rest.strip_prefix(b"\n").unwrap_or(rest);
    }
    let mut blanks = 0;
    let mut i = 0;
    while let Some(&b) = rest.get(i) {
        match b {
            b'\n' => (),
            b'\r' => {
                if rest.get(i + 1) == Some(&b'\n') {
                    i += 1;
                }
            }
            _ => break,
        }
        blanks += 1;
        i += 1;
    }
    blanks
}

/// Length of the record as it appeared on its line, excluding quoting and the
/// line terminator
fn record_len(record: &StringRecord) -> usize {
    record.as_slice().len() + record.len().saturating_sub(1)
}

/// The fate of a single data row
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum UpdateOutcome {
    Success,
    Failure,
    NoSuchSku,
    MalformedRow,
}

/// Per-outcome row tallies for one run
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct OutcomeCounts {
    pub(crate) rows: usize,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) no_sku: usize,
    pub(crate) malformed: usize,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: UpdateOutcome) {
        self.rows += 1;
        match outcome {
            UpdateOutcome::Success => self.succeeded += 1,
            UpdateOutcome::Failure => self.failed += 1,
            UpdateOutcome::NoSuchSku => self.no_sku += 1,
            UpdateOutcome::MalformedRow => self.malformed += 1,
        }
    }
}

/// Result of a completed run over one stock file
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RunSummary {
    pub(crate) counts: OutcomeCounts,
    pub(crate) elapsed: Duration,
}

impl RunSummary {
    fn log(&self) {
        tracing::info!(
            elapsed_secs = self.elapsed.as_secs_f64(),
            rows = self.counts.rows,
            "Stock updater took {:.3} seconds",
            self.elapsed.as_secs_f64()
        );
        tracing::info!("Number of successful updates: {}", self.counts.succeeded);
        tracing::info!("Number of failures: {}", self.counts.failed);
        tracing::info!("Number of no sku items: {}", self.counts.no_sku);
        tracing::info!("Number of incorrect row format: {}", self.counts.malformed);
    }
}

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error(transparent)]
    FileAccess(#[from] FileAccessError),
    #[error(transparent)]
    Header(#[from] HeaderError),
}

#[derive(Debug, Error)]
pub(crate) enum FileAccessError {
    #[error("stock file not found: {}", .path.display())]
    NotFound { path: PathBuf },
    #[error("stock file is empty: {}", .path.display())]
    Empty { path: PathBuf },
    #[error("stock file unable to be opened: {}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A problem confined to a single data row
#[derive(Debug, Error)]
pub(crate) enum RowError {
    #[error("row {row} could not be parsed")]
    Unreadable { row: usize, source: csv::Error },
    #[error("row {row} is {len} bytes long, exceeding the {MAX_RECORD_LEN}-byte limit")]
    TooLong { row: usize, len: usize },
    #[error("row {row} has only {cells} nonempty data columns")]
    Malformed { row: usize, cells: usize },
    #[error("row {row} names invalid SKU {sku}")]
    NoSuchSku {
        row: usize,
        sku: i64,
        source: RegistryError,
    },
    #[error("row {row}: unable to update SKU {sku}")]
    UpdateFailed {
        row: usize,
        sku: i64,
        source: RegistryError,
    },
}

impl RowError {
    pub(crate) fn outcome(&self) -> UpdateOutcome {
        match self {
            RowError::Unreadable { .. } | RowError::TooLong { .. } | RowError::Malformed { .. } => {
                UpdateOutcome::MalformedRow
            }
            RowError::NoSuchSku { .. } => UpdateOutcome::NoSuchSku,
            RowError::UpdateFailed { .. } => UpdateOutcome::Failure,
        }
    }
}
