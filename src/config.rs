use crate::data_dir::DataDir;
use crate::extract::{self, ExtractError, MetricKind, MetricSpec};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from dbbench.toml.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    pub output_dir: PathBuf,
    pub tools: ToolsConfig,
    pub storage: StorageConfig,
    pub instances: Vec<InstanceConfig>,
    pub benchmarks: Vec<BenchmarkConfig>,
    /// Extra metrics pulled from pgbench output.
    pub extract: Vec<ExtractRule>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    pub pgbench: String,
    pub psql: String,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Also record every row in `<output_dir>/results.db`.
    pub sqlite: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstanceConfig {
    pub name: String,
    pub conn_str: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    pub name: String,
    pub scale_factor: u32,
    pub clients: u32,
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// Seconds per repetition.
    pub duration: u64,
    #[serde(default = "default_repetitions")]
    pub repetitions: u32,
    /// Run the built-in select-only script (`-S`).
    #[serde(default)]
    pub select_only: bool,
    /// Custom pgbench script (`-f`).
    pub script: Option<PathBuf>,
    /// Directory of `*.sql` templates; switches the scenario to query mode.
    pub query_dir: Option<PathBuf>,
    /// Parameter table; defaults to `<query_dir>/params.json`.
    pub params_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractRule {
    pub name: String,
    pub pattern: String,
    #[serde(default = "default_rule_kind")]
    pub kind: MetricKind,
}

/// What a benchmark scenario runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioMode<'a> {
    Pgbench,
    Queries { dir: &'a Path },
}

impl BenchmarkConfig {
    pub fn mode(&self) -> ScenarioMode<'_> {
        match &self.query_dir {
            Some(dir) => ScenarioMode::Queries { dir },
            None => ScenarioMode::Pgbench,
        }
    }

    /// Where the parameter table for query mode lives.
    pub fn params_path(&self) -> Option<PathBuf> {
        self.params_file
            .clone()
            .or_else(|| self.query_dir.as_ref().map(|d| d.join("params.json")))
    }

    /// Report this scenario writes for `instance`.
    pub fn report_path(&self, layout: &DataDir, instance: &str) -> PathBuf {
        match self.mode() {
            ScenarioMode::Pgbench => layout.report(instance, &self.name),
            ScenarioMode::Queries { .. } => layout.query_report(instance, &self.name),
        }
    }
}

impl ExtractRule {
    pub fn compile(&self) -> Result<MetricSpec, ExtractError> {
        MetricSpec::new(&self.name, &self.pattern, self.kind, None)
    }
}

// --- Default implementations ---

fn default_threads() -> u32 {
    1
}

fn default_repetitions() -> u32 {
    1
}

fn default_rule_kind() -> MetricKind {
    MetricKind::Float
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("results"),
            tools: ToolsConfig::default(),
            storage: StorageConfig::default(),
            instances: Vec::new(),
            benchmarks: Vec::new(),
            extract: Vec::new(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pgbench: "pgbench".to_string(),
            psql: "psql".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { sqlite: true }
    }
}

/// Errors raised while loading the configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Validation found one or more problems.
    Invalid(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(problems) => {
                write!(f, "invalid config: {}", problems.join("; "))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl BenchConfig {
    /// Read and parse a TOML config file. Does not validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check the whole config and report every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.instances.is_empty() {
            problems.push("no [[instances]] defined".to_string());
        }
        if self.benchmarks.is_empty() {
            problems.push("no [[benchmarks]] defined".to_string());
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if instance.name.trim().is_empty() {
                problems.push("instance with empty name".to_string());
            }
            if !seen.insert(instance.name.as_str()) {
                problems.push(format!("instance '{}' defined twice", instance.name));
            }
            if instance.conn_str.trim().is_empty() {
                problems.push(format!("instances.{}.conn_str is empty", instance.name));
            }
        }

        let mut seen = HashSet::new();
        for bench in &self.benchmarks {
            let name = &bench.name;
            if name.trim().is_empty() {
                problems.push("benchmark with empty name".to_string());
            }
            if !seen.insert(name.as_str()) {
                problems.push(format!("benchmark '{name}' defined twice"));
            }
            if bench.scale_factor == 0 {
                problems.push(format!("benchmarks.{name}.scale_factor must be at least 1"));
            }
            if bench.repetitions == 0 {
                problems.push(format!("benchmarks.{name}.repetitions must be at least 1"));
            }
            if bench.query_dir.is_none() {
                if bench.clients == 0 {
                    problems.push(format!("benchmarks.{name}.clients must be at least 1"));
                }
                if bench.threads == 0 {
                    problems.push(format!("benchmarks.{name}.threads must be at least 1"));
                }
                if bench.threads > bench.clients {
                    problems.push(format!(
                        "benchmarks.{name}.threads ({}) cannot exceed clients ({})",
                        bench.threads, bench.clients
                    ));
                }
                if bench.duration == 0 {
                    problems.push(format!("benchmarks.{name}.duration must be at least 1"));
                }
            }
            if bench.select_only && bench.script.is_some() {
                problems.push(format!(
                    "benchmarks.{name} sets both select_only and script"
                ));
            }
            if let Some(dir) = &bench.query_dir {
                if !dir.is_dir() {
                    problems.push(format!(
                        "benchmarks.{name}.query_dir {} is not a directory",
                        dir.display()
                    ));
                }
            }
        }

        // Sanitized file names can collide even when the raw names differ
        let layout = DataDir::new(&self.output_dir);
        let mut reports: HashMap<PathBuf, String> = HashMap::new();
        for instance in &self.instances {
            for bench in &self.benchmarks {
                let path = bench.report_path(&layout, &instance.name);
                let pair = format!("{}/{}", instance.name, bench.name);
                if let Some(other) = reports.insert(path.clone(), pair.clone()) {
                    problems.push(format!(
                        "{other} and {pair} would both write {}",
                        path.display()
                    ));
                }
            }
        }

        let builtin: Vec<&str> = extract::pgbench_metrics()
            .iter()
            .map(MetricSpec::name)
            .collect();
        let mut seen = HashSet::new();
        for rule in &self.extract {
            if builtin.contains(&rule.name.as_str()) {
                problems.push(format!(
                    "extract rule '{}' shadows a built-in metric",
                    rule.name
                ));
            }
            if !seen.insert(rule.name.as_str()) {
                problems.push(format!("extract rule '{}' defined twice", rule.name));
            }
            if let Err(e) = rule.compile() {
                problems.push(e.to_string());
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }

    /// Built-in pgbench metrics followed by the configured extra rules.
    pub fn pgbench_specs(&self) -> Result<Vec<MetricSpec>, ExtractError> {
        let mut specs = extract::pgbench_metrics().to_vec();
        for rule in &self.extract {
            specs.push(rule.compile()?);
        }
        Ok(specs)
    }

    /// Names of the configured extra rules.
    pub fn extra_metric_names(&self) -> Vec<&str> {
        self.extract.iter().map(|r| r.name.as_str()).collect()
    }

    /// Keep only the named instances/benchmarks; empty filters keep everything.
    pub fn retain(&mut self, instances: &[String], benchmarks: &[String]) {
        if !instances.is_empty() {
            self.instances.retain(|i| instances.contains(&i.name));
        }
        if !benchmarks.is_empty() {
            self.benchmarks.retain(|b| benchmarks.contains(&b.name));
        }
    }
}
