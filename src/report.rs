/// Run aggregation and CSV reports.
///
/// A `RunTable` collects one record per execution, in execution order, and is
/// written exactly once when the scenario is done. The column set is fixed by
/// the record type; every row must fill every column.
use std::path::{Path, PathBuf};

/// A row type with a fixed, explicit column schema.
pub trait Record {
    /// Column names, in output order.
    const COLUMNS: &'static [&'static str];

    /// Field values in `COLUMNS` order. Unavailable values are empty strings.
    fn to_row(&self) -> Vec<String>;

    /// Whether this row records a failed execution.
    fn is_failure(&self) -> bool;
}

/// Render an optional value as a CSV field, empty for `None`.
pub fn field<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[derive(Debug)]
pub enum ReportError {
    /// A row did not have one value per schema column.
    SchemaMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },
    Csv { path: PathBuf, source: csv::Error },
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::SchemaMismatch {
                row,
                expected,
                found,
            } => write!(
                f,
                "row {row} has {found} fields but the schema has {expected} columns"
            ),
            ReportError::Csv { path, source } => {
                write!(f, "failed to write report {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ReportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReportError::SchemaMismatch { .. } => None,
            ReportError::Csv { source, .. } => Some(source),
        }
    }
}

/// Ordered, append-only collection of records for one scenario.
#[derive(Debug)]
pub struct RunTable<R: Record> {
    rows: Vec<R>,
}

impl<R: Record> Default for RunTable<R> {
    fn default() -> Self {
        Self { rows: Vec::new() }
    }
}

impl<R: Record> RunTable<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Records are never modified once pushed.
    pub fn push(&mut self, record: R) {
        self.rows.push(record);
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[R] {
        &self.rows
    }

    pub fn failures(&self) -> usize {
        self.rows.iter().filter(|r| r.is_failure()).count()
    }

    /// Write the header and all rows to `path`, consuming the table.
    ///
    /// Every row is checked against the schema before anything is written.
    pub fn write_csv(self, path: &Path) -> Result<usize, ReportError> {
        let rows: Vec<Vec<String>> = self.rows.iter().map(Record::to_row).collect();
        for (i, row) in rows.iter().enumerate() {
            if row.len() != R::COLUMNS.len() {
                return Err(ReportError::SchemaMismatch {
                    row: i + 1,
                    expected: R::COLUMNS.len(),
                    found: row.len(),
                });
            }
        }

        let csv_err = |e: csv::Error| ReportError::Csv {
            path: path.to_path_buf(),
            source: e,
        };

        let mut wtr = csv::Writer::from_path(path).map_err(csv_err)?;
        wtr.write_record(R::COLUMNS).map_err(csv_err)?;
        for row in &rows {
            wtr.write_record(row).map_err(csv_err)?;
        }
        wtr.flush().map_err(|e| csv_err(e.into()))?;

        tracing::info!(
            path = %path.display(),
            rows = rows.len(),
            "report written"
        );
        Ok(rows.len())
    }
}

/// A report read back from disk.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq)]
pub struct CsvTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[cfg(test)]
impl CsvTable {
    /// Value of `column` in row `row`, `None` if the field is empty or absent.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.headers.iter().position(|h| h == column)?;
        self.rows
            .get(row)
            .and_then(|r| r.get(idx))
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// Read a CSV report written by `RunTable::write_csv`.
#[cfg(test)]
pub fn read_csv(path: &Path) -> Result<CsvTable, csv::Error> {
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in rdr.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(CsvTable { headers, rows })
}
