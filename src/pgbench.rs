/// pgbench scenarios: dataset initialization and timed repetitions.
use crate::config::{BenchmarkConfig, InstanceConfig};
use crate::db;
use crate::driver::{DriverError, Scenario};
use crate::extract::{self, MetricSpec};
use crate::record::BenchmarkRun;
use crate::report::{Record, RunTable};
use crate::session::{self, ToolCommand};
use chrono::Utc;
use std::path::Path;

/// Built-in metrics without a report column. They go to the store's `extra`
/// JSON alongside the user-defined rules.
const STORED_ONLY: &[&str] = &[extract::SCALE_FACTOR, extract::INITIAL_CONNECTION_MS];

/// `pgbench -i -s <scale> <conn>`
pub fn init_command(pgbench: &str, bench: &BenchmarkConfig, instance: &InstanceConfig) -> ToolCommand {
    ToolCommand::new(pgbench)
        .arg("-i")
        .arg("-s")
        .arg(bench.scale_factor.to_string())
        .arg(&instance.conn_str)
}

/// `pgbench -c <clients> -j <threads> -T <duration> [-S] [-f script] <conn>`
pub fn run_command(pgbench: &str, bench: &BenchmarkConfig, instance: &InstanceConfig) -> ToolCommand {
    let mut cmd = ToolCommand::new(pgbench)
        .arg("-c")
        .arg(bench.clients.to_string())
        .arg("-j")
        .arg(bench.threads.to_string())
        .arg("-T")
        .arg(bench.duration.to_string());
    if bench.select_only {
        cmd = cmd.arg("-S");
    }
    if let Some(script) = &bench.script {
        cmd = cmd.arg("-f").arg(script.display().to_string());
    }
    cmd.arg(&instance.conn_str)
}

/// Load the dataset for a scenario. A non-zero exit is fatal.
pub async fn initialize(scenario: &Scenario<'_>) -> Result<(), DriverError> {
    let Scenario {
        instance, bench, ..
    } = *scenario;
    let output_path = scenario
        .data_dir
        .init_output(&instance.name, &bench.name, Utc::now());
    let command = init_command(&scenario.tools.pgbench, bench, instance);

    tracing::info!(
        instance = %instance.name,
        scale_factor = bench.scale_factor,
        "initializing dataset"
    );
    let result = session::run_to_file(&command, &output_path).await?;
    if !result.success() {
        return Err(DriverError::InitFailed {
            instance: instance.name.clone(),
            exit_code: result.exit_code,
            output_file: output_path,
        });
    }
    tracing::info!(
        instance = %instance.name,
        duration_secs = result.duration.as_secs(),
        "dataset initialized"
    );
    Ok(())
}

/// Run every repetition of a pgbench scenario, one row per repetition.
///
/// A repetition that exits non-zero becomes a row with empty metrics and the
/// loop continues. Failing to spawn pgbench at all aborts.
pub async fn run_scenario(
    scenario: &Scenario<'_>,
    specs: &[MetricSpec],
    extra_metrics: &[&str],
) -> Result<RunTable<BenchmarkRun>, DriverError> {
    let Scenario {
        instance, bench, ..
    } = *scenario;
    let command = run_command(&scenario.tools.pgbench, bench, instance);
    let stored_metrics: Vec<&str> = STORED_ONLY.iter().chain(extra_metrics).copied().collect();
    let mut table = RunTable::new();

    for run in 1..=bench.repetitions {
        let started_at = Utc::now();
        let output_path = scenario
            .data_dir
            .run_output(&instance.name, &bench.name, run, started_at);

        tracing::info!(
            instance = %instance.name,
            benchmark = %bench.name,
            run,
            repetitions = bench.repetitions,
            "running pgbench"
        );
        let result = session::run_to_file(&command, &output_path).await?;
        let metrics = extract::extract(&read_output(&output_path), specs);

        if let Some(reported) = metrics.integer(extract::SCALE_FACTOR) {
            if reported != i64::from(bench.scale_factor) {
                tracing::warn!(
                    instance = %instance.name,
                    benchmark = %bench.name,
                    run,
                    configured = bench.scale_factor,
                    reported,
                    "pgbench reports a different scaling factor than configured"
                );
            }
        }

        let record = BenchmarkRun {
            instance: instance.name.clone(),
            benchmark: bench.name.clone(),
            run,
            started_at,
            scale_factor: bench.scale_factor,
            clients: bench.clients,
            threads: bench.threads,
            duration_secs: bench.duration,
            exit_code: result.exit_code,
            transaction_type: None,
            transactions: None,
            failed_transactions: None,
            latency_avg_ms: None,
            tps: None,
            output_file: output_path,
        }
        .with_metrics(&metrics);

        if record.is_failure() {
            tracing::warn!(
                instance = %instance.name,
                benchmark = %bench.name,
                run,
                exit_code = ?record.exit_code,
                output = %record.output_file.display(),
                "pgbench run failed, recording empty metrics"
            );
        } else {
            tracing::info!(
                run,
                tps = ?record.tps,
                latency_avg_ms = ?record.latency_avg_ms,
                transactions = ?record.transactions,
                output_bytes = result.output_bytes,
                "pgbench run complete"
            );
        }

        if let Some(conn) = scenario.store {
            let extra = metrics.to_json(&stored_metrics);
            let has_extra = extra.as_object().is_some_and(|m| !m.is_empty());
            let extra = (has_extra && !record.is_failure()).then(|| extra.to_string());
            db::insert_benchmark_run(conn, &record, extra.as_deref())?;
        }

        table.push(record);
    }

    Ok(table)
}

/// Read a raw transcript; unreadable or non-UTF-8 output is tolerated.
fn read_output(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, path = %path.display(), "failed to read tool output");
            String::new()
        }
    }
}
