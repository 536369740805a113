/// Per-execution records written to reports and the results store.
use crate::extract::{self, Extracted};
use crate::report::{field, Record};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// One pgbench repetition against one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkRun {
    pub instance: String,
    pub benchmark: String,
    /// 1-based repetition index.
    pub run: u32,
    pub started_at: DateTime<Utc>,
    pub scale_factor: u32,
    pub clients: u32,
    pub threads: u32,
    pub duration_secs: u64,
    /// Tool exit code (None if killed by signal).
    pub exit_code: Option<i32>,
    pub transaction_type: Option<String>,
    pub transactions: Option<i64>,
    pub failed_transactions: Option<i64>,
    pub latency_avg_ms: Option<f64>,
    pub tps: Option<f64>,
    /// Raw tool output captured for this repetition.
    pub output_file: PathBuf,
}

impl BenchmarkRun {
    /// Fill the metric fields from extracted pgbench output.
    ///
    /// A non-zero exit leaves every metric empty even if some lines matched.
    pub fn with_metrics(mut self, metrics: &Extracted) -> Self {
        if self.exit_code != Some(0) {
            return self;
        }
        self.transaction_type = metrics.text(extract::TRANSACTION_TYPE).map(str::to_string);
        self.transactions = metrics.integer(extract::TRANSACTIONS);
        self.failed_transactions = metrics.integer(extract::FAILED_TRANSACTIONS);
        self.latency_avg_ms = metrics.float(extract::LATENCY_AVG_MS);
        self.tps = metrics.float(extract::TPS);
        self
    }
}

impl Record for BenchmarkRun {
    const COLUMNS: &'static [&'static str] = &[
        "instance",
        "benchmark",
        "run",
        "started_at",
        "scale_factor",
        "clients",
        "threads",
        "duration_secs",
        "exit_code",
        "transaction_type",
        "transactions",
        "failed_transactions",
        "latency_avg_ms",
        "tps",
        "output_file",
    ];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.instance.clone(),
            self.benchmark.clone(),
            self.run.to_string(),
            self.started_at.to_rfc3339(),
            self.scale_factor.to_string(),
            self.clients.to_string(),
            self.threads.to_string(),
            self.duration_secs.to_string(),
            field(self.exit_code),
            field(self.transaction_type.as_deref()),
            field(self.transactions),
            field(self.failed_transactions),
            field(self.latency_avg_ms),
            field(self.tps),
            self.output_file.display().to_string(),
        ]
    }

    fn is_failure(&self) -> bool {
        self.exit_code != Some(0)
    }
}

/// One execution of one query file against one instance.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub instance: String,
    pub benchmark: String,
    /// Query identifier (template file stem).
    pub query: String,
    pub run: u32,
    pub started_at: DateTime<Utc>,
    pub scale_factor: u32,
    pub elapsed_ms: Option<f64>,
    pub row_count: Option<i64>,
    /// Short failure message; None on success.
    pub error: Option<String>,
}

impl QueryResult {
    pub fn succeeded(mut self, metrics: &Extracted) -> Self {
        self.elapsed_ms = metrics.float(extract::ELAPSED_MS);
        self.row_count = metrics.integer(extract::ROW_COUNT);
        self.error = None;
        self
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.elapsed_ms = None;
        self.row_count = None;
        self.error = Some(message.into());
        self
    }
}

impl Record for QueryResult {
    const COLUMNS: &'static [&'static str] = &[
        "instance",
        "benchmark",
        "query",
        "run",
        "started_at",
        "scale_factor",
        "elapsed_ms",
        "row_count",
        "error",
    ];

    fn to_row(&self) -> Vec<String> {
        vec![
            self.instance.clone(),
            self.benchmark.clone(),
            self.query.clone(),
            self.run.to_string(),
            self.started_at.to_rfc3339(),
            self.scale_factor.to_string(),
            field(self.elapsed_ms),
            field(self.row_count),
            field(self.error.as_deref()),
        ]
    }

    fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
