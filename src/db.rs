use crate::record::{BenchmarkRun, QueryResult};
use rusqlite::{params, Connection, Result};
use std::path::Path;

/// Opens (or creates) the results database at the given path.
///
/// Creates the benchmark_runs and query_results tables if they don't already
/// exist. Returns an open connection ready for use.
pub fn open_or_create(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;

    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS benchmark_runs (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            instance            TEXT NOT NULL,
            benchmark           TEXT NOT NULL,
            run                 INTEGER NOT NULL,
            started_at          TEXT NOT NULL,
            scale_factor        INTEGER NOT NULL,
            clients             INTEGER NOT NULL,
            threads             INTEGER NOT NULL,
            duration_secs       INTEGER NOT NULL,
            exit_code           INTEGER,
            transaction_type    TEXT,
            transactions        INTEGER,
            failed_transactions INTEGER,
            latency_avg_ms      REAL,
            tps                 REAL,
            output_file         TEXT NOT NULL,
            extra               TEXT
        );

        CREATE TABLE IF NOT EXISTS query_results (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            instance     TEXT NOT NULL,
            benchmark    TEXT NOT NULL,
            query        TEXT NOT NULL,
            run          INTEGER NOT NULL,
            started_at   TEXT NOT NULL,
            scale_factor INTEGER NOT NULL,
            elapsed_ms   REAL,
            row_count    INTEGER,
            error        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_benchmark_runs_scenario ON benchmark_runs(instance, benchmark);
        CREATE INDEX IF NOT EXISTS idx_query_results_scenario ON query_results(instance, benchmark);",
    )?;

    Ok(conn)
}

/// Insert one pgbench repetition. `extra` is a JSON object of user-defined metrics.
pub fn insert_benchmark_run(
    conn: &Connection,
    run: &BenchmarkRun,
    extra: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO benchmark_runs (
            instance, benchmark, run, started_at, scale_factor, clients, threads,
            duration_secs, exit_code, transaction_type, transactions, failed_transactions,
            latency_avg_ms, tps, output_file, extra
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            run.instance,
            run.benchmark,
            run.run,
            run.started_at.to_rfc3339(),
            run.scale_factor,
            run.clients,
            run.threads,
            run.duration_secs as i64,
            run.exit_code,
            run.transaction_type,
            run.transactions,
            run.failed_transactions,
            run.latency_avg_ms,
            run.tps,
            run.output_file.display().to_string(),
            extra,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert one query execution.
pub fn insert_query_result(conn: &Connection, result: &QueryResult) -> Result<i64> {
    conn.execute(
        "INSERT INTO query_results (
            instance, benchmark, query, run, started_at, scale_factor, elapsed_ms, row_count, error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            result.instance,
            result.benchmark,
            result.query,
            result.run,
            result.started_at.to_rfc3339(),
            result.scale_factor,
            result.elapsed_ms,
            result.row_count,
            result.error,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// A stored pgbench repetition, as read back for inspection.
#[cfg(test)]
#[derive(Debug)]
pub struct StoredRun {
    pub run: u32,
    pub exit_code: Option<i32>,
    pub transactions: Option<i64>,
    pub tps: Option<f64>,
    pub extra: Option<String>,
}

/// Repetitions of one scenario in insertion order.
#[cfg(test)]
pub fn benchmark_runs(conn: &Connection, instance: &str, benchmark: &str) -> Result<Vec<StoredRun>> {
    let mut stmt = conn.prepare(
        "SELECT run, exit_code, transactions, tps, extra FROM benchmark_runs
         WHERE instance = ?1 AND benchmark = ?2 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![instance, benchmark], |row| {
        Ok(StoredRun {
            run: row.get(0)?,
            exit_code: row.get(1)?,
            transactions: row.get(2)?,
            tps: row.get(3)?,
            extra: row.get(4)?,
        })
    })?;
    let runs = rows.collect::<Result<Vec<_>>>()?;
    Ok(runs)
}

/// Number of failed query executions recorded for one scenario.
#[cfg(test)]
pub fn count_query_failures(conn: &Connection, instance: &str, benchmark: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM query_results WHERE instance = ?1 AND benchmark = ?2 AND error IS NOT NULL",
        params![instance, benchmark],
        |row| row.get(0),
    )
}
