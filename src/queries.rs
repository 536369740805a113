/// Query scenarios: run every `*.sql` template in a directory through `psql`.
use crate::db;
use crate::driver::{DriverError, Scenario};
use crate::extract;
use crate::params::{self, ParameterTable};
use crate::record::QueryResult;
use crate::report::RunTable;
use crate::session::{self, ToolCommand};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// One query template loaded from disk.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    /// File stem, used as the query identifier and parameter-table key.
    pub id: String,
    pub path: PathBuf,
    pub text: String,
}

/// Load every `*.sql` file in `dir`, sorted by file name.
pub fn discover(dir: &Path) -> Result<Vec<QueryTemplate>, DriverError> {
    let pattern = glob::Pattern::escape(&dir.to_string_lossy()) + "/*.sql";
    let paths = glob::glob(&pattern).map_err(|e| DriverError::QueryDir {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut templates = Vec::new();
    for entry in paths {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable query path");
                continue;
            }
        };
        let Some(id) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let text = std::fs::read_to_string(&path).map_err(|e| DriverError::Io {
            path: path.clone(),
            source: e,
        })?;
        templates.push(QueryTemplate { id, path, text });
    }
    templates.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(templates)
}

/// `psql <conn> -X -v ON_ERROR_STOP=1 -P pager=off -c '\timing on' -c <sql>`
pub fn psql_command(psql: &str, conn_str: &str, sql: &str) -> ToolCommand {
    ToolCommand::new(psql).args([
        conn_str,
        "-X",
        "-v",
        "ON_ERROR_STOP=1",
        "-P",
        "pager=off",
        "-c",
        "\\timing on",
        "-c",
        sql,
    ])
}

/// Run every template once per repetition, in file order.
///
/// A query that psql rejects is logged with its identifier and recorded as a
/// row with no timing or row count; the remaining queries still run.
pub async fn run_scenario(
    scenario: &Scenario<'_>,
    dir: &Path,
    parameters: &ParameterTable,
) -> Result<RunTable<QueryResult>, DriverError> {
    let Scenario {
        instance, bench, ..
    } = *scenario;
    let templates = discover(dir)?;
    if templates.is_empty() {
        tracing::warn!(dir = %dir.display(), "no *.sql files found in query_dir");
    }

    let mut table = RunTable::new();

    for run in 1..=bench.repetitions {
        tracing::info!(
            instance = %instance.name,
            benchmark = %bench.name,
            run,
            repetitions = bench.repetitions,
            queries = templates.len(),
            "running queries"
        );

        for template in &templates {
            let sql = params::substitute(&template.text, parameters.values(&template.id));
            let command = psql_command(&scenario.tools.psql, &instance.conn_str, &sql);
            let started_at = Utc::now();

            let out = session::run_captured(&command).await?;

            let base = QueryResult {
                instance: instance.name.clone(),
                benchmark: bench.name.clone(),
                query: template.id.clone(),
                run,
                started_at,
                scale_factor: bench.scale_factor,
                elapsed_ms: None,
                row_count: None,
                error: None,
            };

            let result = if out.success() {
                let result = base.succeeded(&extract::extract(&out.stdout, extract::psql_metrics()));
                tracing::debug!(
                    query = %template.id,
                    elapsed_ms = ?result.elapsed_ms,
                    row_count = ?result.row_count,
                    wall_ms = out.duration.as_millis() as u64,
                    "query complete"
                );
                result
            } else {
                let message = out.error_line();
                tracing::warn!(query = %template.id, run, error = %message, "query failed");
                base.failed(message)
            };

            if let Some(conn) = scenario.store {
                db::insert_query_result(conn, &result)?;
            }
            table.push(result);
        }
    }

    Ok(table)
}
