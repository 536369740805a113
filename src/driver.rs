/// Orchestration: instances × scenarios, strictly one tool process at a time.
use crate::config::{BenchConfig, BenchmarkConfig, InstanceConfig, ScenarioMode, ToolsConfig};
use crate::data_dir::DataDir;
use crate::db;
use crate::extract::ExtractError;
use crate::params::ParameterTable;
use crate::pgbench;
use crate::queries;
use crate::reinit::{self, DatasetState, ReinitPolicy};
use crate::report::ReportError;
use crate::session::SessionError;
use rusqlite::Connection;
use std::path::PathBuf;

/// Everything a scenario runner needs for one (instance, benchmark) pair.
#[derive(Clone, Copy)]
pub struct Scenario<'a> {
    pub instance: &'a InstanceConfig,
    pub bench: &'a BenchmarkConfig,
    pub tools: &'a ToolsConfig,
    pub data_dir: &'a DataDir,
    pub store: Option<&'a Connection>,
}

/// Fatal errors: any of these aborts the whole run.
#[derive(Debug)]
pub enum DriverError {
    Session(SessionError),
    InitFailed {
        instance: String,
        exit_code: Option<i32>,
        output_file: PathBuf,
    },
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    QueryDir {
        path: PathBuf,
        message: String,
    },
    Extract(ExtractError),
    Report(ReportError),
    Db(rusqlite::Error),
}

impl std::fmt::Display for DriverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverError::Session(e) => write!(f, "{e}"),
            DriverError::InitFailed {
                instance,
                exit_code,
                output_file,
            } => write!(
                f,
                "dataset initialization failed for {instance} (exit code {exit_code:?}), see {}",
                output_file.display()
            ),
            DriverError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            DriverError::QueryDir { path, message } => {
                write!(f, "cannot list queries in {}: {}", path.display(), message)
            }
            DriverError::Extract(e) => write!(f, "{e}"),
            DriverError::Report(e) => write!(f, "{e}"),
            DriverError::Db(e) => write!(f, "results database error: {e}"),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DriverError::Session(e) => Some(e),
            DriverError::Io { source, .. } => Some(source),
            DriverError::Extract(e) => Some(e),
            DriverError::Report(e) => Some(e),
            DriverError::Db(e) => Some(e),
            DriverError::InitFailed { .. } | DriverError::QueryDir { .. } => None,
        }
    }
}

impl From<SessionError> for DriverError {
    fn from(e: SessionError) -> Self {
        DriverError::Session(e)
    }
}

impl From<ExtractError> for DriverError {
    fn from(e: ExtractError) -> Self {
        DriverError::Extract(e)
    }
}

impl From<ReportError> for DriverError {
    fn from(e: ReportError) -> Self {
        DriverError::Report(e)
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(e: rusqlite::Error) -> Self {
        DriverError::Db(e)
    }
}

/// Outcome of one completed scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSummary {
    pub instance: String,
    pub benchmark: String,
    pub rows: usize,
    pub failures: usize,
    pub report: PathBuf,
}

/// Runs every configured scenario against every configured instance.
pub struct Driver {
    config: BenchConfig,
    data_dir: DataDir,
    policy: Box<dyn ReinitPolicy>,
}

impl Driver {
    pub fn new(config: BenchConfig, policy: Box<dyn ReinitPolicy>) -> Self {
        let data_dir = DataDir::new(&config.output_dir);
        Self {
            config,
            data_dir,
            policy,
        }
    }

    /// Human-readable list of what `run` would do, one line per step.
    pub fn plan(&self) -> Vec<String> {
        let tools = &self.config.tools;
        let mut lines = Vec::new();
        for instance in &self.config.instances {
            for bench in &self.config.benchmarks {
                lines.push(format!(
                    "[{}/{}] init if needed: {}",
                    instance.name,
                    bench.name,
                    pgbench::init_command(&tools.pgbench, bench, instance)
                ));
                lines.push(match bench.mode() {
                    ScenarioMode::Pgbench => format!(
                        "[{}/{}] {} x {}",
                        instance.name,
                        bench.name,
                        bench.repetitions,
                        pgbench::run_command(&tools.pgbench, bench, instance)
                    ),
                    ScenarioMode::Queries { dir } => format!(
                        "[{}/{}] {} x queries in {} via {}",
                        instance.name,
                        bench.name,
                        bench.repetitions,
                        dir.display(),
                        tools.psql
                    ),
                });
                lines.push(format!(
                    "[{}/{}] report: {}",
                    instance.name,
                    bench.name,
                    bench.report_path(&self.data_dir, &instance.name).display()
                ));
            }
        }
        lines
    }

    /// Run everything. Each scenario's report is written once, after all its
    /// repetitions finish.
    pub async fn run(self) -> Result<Vec<ScenarioSummary>, DriverError> {
        let Driver {
            config,
            data_dir,
            mut policy,
        } = self;

        data_dir.init().map_err(|e| DriverError::Io {
            path: data_dir.root().to_path_buf(),
            source: e,
        })?;

        let store = if config.storage.sqlite {
            Some(db::open_or_create(&data_dir.db())?)
        } else {
            None
        };
        let specs = config.pgbench_specs()?;
        let extra_metrics = config.extra_metric_names();

        let mut summaries = Vec::new();

        for instance in &config.instances {
            for bench in &config.benchmarks {
                tracing::info!(
                    instance = %instance.name,
                    benchmark = %bench.name,
                    "benchmarking scenario"
                );
                let scenario = Scenario {
                    instance,
                    bench,
                    tools: &config.tools,
                    data_dir: &data_dir,
                    store: store.as_ref(),
                };

                prepare_dataset(&scenario, policy.as_mut()).await?;

                let report = bench.report_path(&data_dir, &instance.name);
                let (rows, failures) = match bench.mode() {
                    ScenarioMode::Pgbench => {
                        let table = pgbench::run_scenario(&scenario, &specs, &extra_metrics).await?;
                        let failures = table.failures();
                        (table.write_csv(&report)?, failures)
                    }
                    ScenarioMode::Queries { dir } => {
                        let parameters = bench
                            .params_path()
                            .map(|p| ParameterTable::load(&p))
                            .unwrap_or_default();
                        let table = queries::run_scenario(&scenario, dir, &parameters).await?;
                        let failures = table.failures();
                        (table.write_csv(&report)?, failures)
                    }
                };
                let summary = ScenarioSummary {
                    instance: instance.name.clone(),
                    benchmark: bench.name.clone(),
                    rows,
                    failures,
                    report,
                };

                tracing::info!(
                    instance = %summary.instance,
                    benchmark = %summary.benchmark,
                    rows = summary.rows,
                    failures = summary.failures,
                    report = %summary.report.display(),
                    "scenario complete"
                );
                summaries.push(summary);
            }
        }

        Ok(summaries)
    }
}

/// Probe the instance if the policy wants it, then initialize when told to.
async fn prepare_dataset(
    scenario: &Scenario<'_>,
    policy: &mut dyn ReinitPolicy,
) -> Result<(), DriverError> {
    let instance = scenario.instance;
    let scale_factor = scenario.bench.scale_factor;

    let state = if policy.wants_probe() {
        tracing::info!(
            instance = %instance.name,
            scale_factor,
            "checking whether pgbench_accounts matches scale_factor"
        );
        let state =
            reinit::probe_dataset(&scenario.tools.psql, &instance.conn_str, scale_factor).await?;
        if let DatasetState::Unknown { reason } = &state {
            tracing::warn!(instance = %instance.name, %reason, "could not check existing dataset");
        }
        state
    } else {
        DatasetState::Unknown {
            reason: "not probed".to_string(),
        }
    };

    if policy.should_initialize(&instance.name, scale_factor, &state) {
        pgbench::initialize(scenario).await
    } else {
        tracing::info!(instance = %instance.name, "skipping initialization");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::record::BenchmarkRun;
    use crate::reinit::{Always, Auto, Never};
    use crate::report::{read_csv, Record};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    /// Fake pgbench: `-i` touches a marker, repetition 2 fails.
    fn fake_pgbench(dir: &Path) -> String {
        let body = format!(
            r#"case "$1" in
  -i) touch "{dir}/initialized"; echo "done in 0.10 s"; exit 0;;
esac
n=$(( $(cat "{dir}/count" 2>/dev/null || echo 0) + 1 ))
echo $n > "{dir}/count"
if [ $n -eq 2 ]; then
  echo "pgbench: error: connection to server failed" >&2
  exit 1
fi
echo "transaction type: <builtin: TPC-B (sort of)>"
echo "number of transactions actually processed: ${{n}}00"
echo "number of failed transactions: 0 (0.000%)"
echo "latency average = 1.5 ms"
echo "latency stddev = 0.25 ms"
echo "tps = 66.6 (without initial connection time)"
"#,
            dir = dir.display()
        );
        write_script(dir, "pgbench", &body)
    }

    /// Fake psql: the accounts probe reports scale 1, queries mentioning
    /// `broken` fail, everything else returns two rows.
    fn fake_psql(dir: &Path) -> String {
        let body = format!(
            r#"for a in "$@"; do last="$a"; done
case "$last" in
  *pgbench_accounts*) echo 100000; exit 0;;
  *broken*) echo 'ERROR:  syntax error at or near "broken"' >&2; exit 3;;
esac
echo "$last" >> "{dir}/queries.log"
echo "Timing is on."
echo " a | b"
echo "(2 rows)"
echo ""
echo "Time: 1.25 ms"
"#,
            dir = dir.display()
        );
        write_script(dir, "psql", &body)
    }

    fn config(tmp: &TempDir, benchmarks: Vec<BenchmarkConfig>) -> BenchConfig {
        BenchConfig {
            output_dir: tmp.path().join("results"),
            tools: ToolsConfig {
                pgbench: fake_pgbench(tmp.path()),
                psql: fake_psql(tmp.path()),
            },
            storage: StorageConfig { sqlite: true },
            instances: vec![InstanceConfig {
                name: "pg16".into(),
                conn_str: "postgresql://localhost/bench".into(),
            }],
            benchmarks,
            extract: Vec::new(),
        }
    }

    fn tpcb() -> BenchmarkConfig {
        BenchmarkConfig {
            name: "tpcb".into(),
            scale_factor: 1,
            clients: 2,
            threads: 1,
            duration: 1,
            repetitions: 3,
            select_only: false,
            script: None,
            query_dir: None,
            params_file: None,
        }
    }

    #[tokio::test]
    async fn failed_repetition_becomes_null_row() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp, vec![tpcb()]);
        let summaries = Driver::new(config, Box::new(Always)).run().await.unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].rows, 3);
        assert_eq!(summaries[0].failures, 1);
        assert!(tmp.path().join("initialized").exists());

        let csv = read_csv(&summaries[0].report).unwrap();
        assert_eq!(csv.headers, BenchmarkRun::COLUMNS);
        assert_eq!(csv.rows.len(), 3);
        assert_eq!(csv.get(0, "transactions"), Some("100"));
        assert_eq!(csv.get(0, "tps"), Some("66.6"));
        assert_eq!(csv.get(1, "exit_code"), Some("1"));
        assert_eq!(csv.get(1, "transactions"), None);
        assert_eq!(csv.get(1, "tps"), None);
        assert_eq!(csv.get(1, "latency_avg_ms"), None);
        assert_eq!(csv.get(2, "transactions"), Some("300"));
        assert_eq!(csv.get(2, "run"), Some("3"));

        // One raw transcript per repetition plus the init output
        let raw = std::fs::read_dir(tmp.path().join("results/raw")).unwrap().count();
        assert_eq!(raw, 4);

        let conn = db::open_or_create(&tmp.path().join("results/results.db")).unwrap();
        let stored = db::benchmark_runs(&conn, "pg16", "tpcb").unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].transactions, None);
    }

    #[tokio::test]
    async fn extra_rules_land_in_store_not_csv() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp, vec![tpcb()]);
        config.extract.push(crate::config::ExtractRule {
            name: "latency_stddev_ms".into(),
            pattern: r"latency stddev = ([0-9.]+) ms".into(),
            kind: crate::extract::MetricKind::Float,
        });
        let summaries = Driver::new(config, Box::new(Never)).run().await.unwrap();

        assert!(!tmp.path().join("initialized").exists());
        let csv = read_csv(&summaries[0].report).unwrap();
        assert!(!csv.headers.iter().any(|h| h == "latency_stddev_ms"));

        let conn = db::open_or_create(&tmp.path().join("results/results.db")).unwrap();
        let stored = db::benchmark_runs(&conn, "pg16", "tpcb").unwrap();
        let extra: serde_json::Value =
            serde_json::from_str(stored[0].extra.as_deref().unwrap()).unwrap();
        assert_eq!(extra["latency_stddev_ms"], 0.25);
    }

    #[tokio::test]
    async fn auto_policy_skips_matching_dataset() {
        let tmp = TempDir::new().unwrap();
        let mut bench = tpcb();
        bench.repetitions = 1;
        let config = config(&tmp, vec![bench]);
        Driver::new(config, Box::new(Auto)).run().await.unwrap();
        // Fake psql reports 100000 accounts == scale 1
        assert!(!tmp.path().join("initialized").exists());
    }

    #[tokio::test]
    async fn auto_policy_initializes_on_mismatch() {
        let tmp = TempDir::new().unwrap();
        let mut bench = tpcb();
        bench.repetitions = 1;
        bench.scale_factor = 5;
        let config = config(&tmp, vec![bench]);
        Driver::new(config, Box::new(Auto)).run().await.unwrap();
        assert!(tmp.path().join("initialized").exists());
    }

    #[tokio::test]
    async fn query_scenario_substitutes_and_survives_failures() {
        let tmp = TempDir::new().unwrap();
        let qdir = tmp.path().join("queries");
        std::fs::create_dir(&qdir).unwrap();
        std::fs::write(qdir.join("q1.sql"), "SELECT * FROM t WHERE x = :1 AND y = :2").unwrap();
        std::fs::write(qdir.join("q2.sql"), "SELECT broken FROM").unwrap();
        std::fs::write(qdir.join("q3.sql"), "SELECT :1").unwrap();
        std::fs::write(qdir.join("params.json"), r#"{"q1": [5, "abc"]}"#).unwrap();

        let mut bench = tpcb();
        bench.name = "olap".into();
        bench.repetitions = 2;
        bench.query_dir = Some(qdir);
        let config = config(&tmp, vec![bench]);

        let summaries = Driver::new(config, Box::new(Never)).run().await.unwrap();
        assert_eq!(summaries[0].rows, 6);
        assert_eq!(summaries[0].failures, 2);
        assert!(summaries[0].report.ends_with("pg16_olap_queries.csv"));

        let csv = read_csv(&summaries[0].report).unwrap();
        assert_eq!(csv.get(0, "query"), Some("q1"));
        assert_eq!(csv.get(0, "row_count"), Some("2"));
        assert_eq!(csv.get(0, "elapsed_ms"), Some("1.25"));
        assert_eq!(csv.get(1, "query"), Some("q2"));
        assert_eq!(csv.get(1, "row_count"), None);
        assert_eq!(csv.get(1, "elapsed_ms"), None);
        assert!(csv.get(1, "error").unwrap().contains("syntax error"));
        assert_eq!(csv.get(5, "run"), Some("2"));

        let log = std::fs::read_to_string(tmp.path().join("queries.log")).unwrap();
        let first = log.lines().next().unwrap();
        assert_eq!(first, "SELECT * FROM t WHERE x = 5 AND y = 'abc'");
        // q3 has no parameters, so its placeholder is left alone
        assert!(log.lines().any(|l| l == "SELECT :1"));

        let conn = db::open_or_create(&tmp.path().join("results/results.db")).unwrap();
        assert_eq!(db::count_query_failures(&conn, "pg16", "olap").unwrap(), 2);
    }

    #[tokio::test]
    async fn missing_tool_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp, vec![tpcb()]);
        config.tools.pgbench = "nonexistent-pgbench-xyz".into();
        let err = Driver::new(config, Box::new(Always)).run().await.unwrap_err();
        assert!(matches!(err, DriverError::Session(SessionError::Spawn { .. })));
    }

    #[tokio::test]
    async fn failed_init_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut config = config(&tmp, vec![tpcb()]);
        config.tools.pgbench = write_script(tmp.path(), "bad-pgbench", "exit 1\n");
        let err = Driver::new(config, Box::new(Always)).run().await.unwrap_err();
        assert!(matches!(err, DriverError::InitFailed { .. }));
        assert!(err.to_string().contains("pg16"));
    }

    #[tokio::test]
    async fn sqlite_store_can_be_disabled() {
        let tmp = TempDir::new().unwrap();
        let mut bench = tpcb();
        bench.repetitions = 1;
        let mut config = config(&tmp, vec![bench]);
        config.storage.sqlite = false;
        Driver::new(config, Box::new(Never)).run().await.unwrap();
        assert!(!tmp.path().join("results/results.db").exists());
        assert!(tmp.path().join("results/pg16_tpcb.csv").exists());
    }

    #[test]
    fn plan_lists_every_scenario() {
        let tmp = TempDir::new().unwrap();
        let mut ro = tpcb();
        ro.name = "ro".into();
        ro.select_only = true;
        let config = config(&tmp, vec![tpcb(), ro]);
        let plan = Driver::new(config, Box::new(Never)).plan();
        assert_eq!(plan.len(), 6);
        assert!(plan[1].contains("3 x"));
        assert!(plan[4].contains(" -S "));
        assert!(plan[5].ends_with("pg16_ro.csv"));
    }
}
