/// Metric extraction: scan free-form tool output for named values.
///
/// Each metric is a regex with exactly one capture group plus a type
/// coercion. Only the first match counts. A miss, or a capture that does not
/// coerce, yields the metric's default (normally `None`) instead of an error,
/// so "measured zero" and "not measured" stay distinguishable.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// How a captured string is turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Integer,
    Float,
    Text,
}

/// A single extracted value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

/// Errors raised while building a metric definition.
#[derive(Debug)]
pub enum ExtractError {
    /// The pattern is not a valid regex.
    InvalidPattern { name: String, source: regex::Error },
    /// The pattern does not have exactly one capture group.
    CaptureGroups { name: String, found: usize },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::InvalidPattern { name, source } => {
                write!(f, "invalid pattern for metric '{name}': {source}")
            }
            ExtractError::CaptureGroups { name, found } => write!(
                f,
                "pattern for metric '{name}' must have exactly one capture group, found {found}"
            ),
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::InvalidPattern { source, .. } => Some(source),
            ExtractError::CaptureGroups { .. } => None,
        }
    }
}

/// Definition of one named metric.
#[derive(Debug, Clone)]
pub struct MetricSpec {
    name: String,
    pattern: Regex,
    kind: MetricKind,
    default: Option<MetricValue>,
}

impl MetricSpec {
    /// Compile a metric definition. The pattern must contain exactly one capture group.
    pub fn new(
        name: impl Into<String>,
        pattern: &str,
        kind: MetricKind,
        default: Option<MetricValue>,
    ) -> Result<Self, ExtractError> {
        let name = name.into();
        let pattern = Regex::new(pattern).map_err(|e| ExtractError::InvalidPattern {
            name: name.clone(),
            source: e,
        })?;
        // captures_len counts the implicit whole-match group
        let found = pattern.captures_len() - 1;
        if found != 1 {
            return Err(ExtractError::CaptureGroups { name, found });
        }
        Ok(Self {
            name,
            pattern,
            kind,
            default,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply this metric to `text`, falling back to the default on a miss.
    fn apply(&self, text: &str) -> Option<MetricValue> {
        let Some(raw) = self
            .pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim())
        else {
            return self.default.clone();
        };

        match coerce(raw, self.kind) {
            Some(value) => Some(value),
            None => {
                tracing::debug!(metric = %self.name, raw, "captured value did not coerce, using default");
                self.default.clone()
            }
        }
    }
}

fn coerce(raw: &str, kind: MetricKind) -> Option<MetricValue> {
    match kind {
        MetricKind::Integer => raw.parse::<i64>().ok().map(MetricValue::Integer),
        MetricKind::Float => raw
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(MetricValue::Float),
        MetricKind::Text => Some(MetricValue::Text(raw.to_string())),
    }
}

/// Result of running a set of metric definitions over one output text.
///
/// Keeps the order of the definitions it was built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    values: Vec<(String, Option<MetricValue>)>,
}

impl Extracted {
    /// Raw value for `name`, or `None` if missing or not defined.
    pub fn get(&self, name: &str) -> Option<&MetricValue> {
        self.values
            .iter()
            .find(|(key, _)| key == name)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(MetricValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    /// Float value for `name`; integer captures are widened.
    pub fn float(&self, name: &str) -> Option<f64> {
        match self.get(name) {
            Some(MetricValue::Float(v)) => Some(*v),
            Some(MetricValue::Integer(v)) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(MetricValue::Text(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Iterate all `(name, value)` pairs in definition order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&MetricValue>)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
    }

    /// Metrics that matched, as a JSON object restricted to `names`.
    pub fn to_json(&self, names: &[&str]) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, value) in self.iter() {
            if !names.contains(&name) {
                continue;
            }
            if let Some(value) = value {
                if let Ok(json) = serde_json::to_value(value) {
                    map.insert(name.to_string(), json);
                }
            }
        }
        serde_json::Value::Object(map)
    }
}

/// Run every metric definition over `text`.
pub fn extract(text: &str, specs: &[MetricSpec]) -> Extracted {
    Extracted {
        values: specs
            .iter()
            .map(|spec| (spec.name.clone(), spec.apply(text)))
            .collect(),
    }
}

pub const TRANSACTIONS: &str = "transactions";
pub const FAILED_TRANSACTIONS: &str = "failed_transactions";
pub const LATENCY_AVG_MS: &str = "latency_avg_ms";
pub const TPS: &str = "tps";
pub const TRANSACTION_TYPE: &str = "transaction_type";
pub const SCALE_FACTOR: &str = "scale_factor";
pub const INITIAL_CONNECTION_MS: &str = "initial_connection_ms";

pub const ELAPSED_MS: &str = "elapsed_ms";
pub const ROW_COUNT: &str = "row_count";

fn builtin(name: &str, pattern: &str, kind: MetricKind) -> MetricSpec {
    // Built-in patterns are constants covered by tests.
    MetricSpec::new(name, pattern, kind, None).unwrap()
}

static PGBENCH_METRICS: LazyLock<Vec<MetricSpec>> = LazyLock::new(|| {
    vec![
        builtin(
            TRANSACTIONS,
            r"number of transactions actually processed:\s*(\d+)",
            MetricKind::Integer,
        ),
        builtin(
            FAILED_TRANSACTIONS,
            r"number of failed transactions:\s*(\d+)",
            MetricKind::Integer,
        ),
        builtin(
            LATENCY_AVG_MS,
            r"latency average\s*=\s*([0-9.]+)\s*ms",
            MetricKind::Float,
        ),
        builtin(
            TPS,
            r"tps\s*=\s*([0-9.]+)\s*\((?:without initial connection time|excluding connections establishing)\)",
            MetricKind::Float,
        ),
        builtin(
            TRANSACTION_TYPE,
            r"transaction type:\s*(.+)",
            MetricKind::Text,
        ),
        builtin(SCALE_FACTOR, r"scaling factor:\s*(\d+)", MetricKind::Integer),
        builtin(
            INITIAL_CONNECTION_MS,
            r"initial connection time\s*=\s*([0-9.]+)\s*ms",
            MetricKind::Float,
        ),
    ]
});

static PSQL_METRICS: LazyLock<Vec<MetricSpec>> = LazyLock::new(|| {
    vec![
        builtin(ELAPSED_MS, r"Time:\s*([0-9.]+)\s*ms", MetricKind::Float),
        builtin(ROW_COUNT, r"\((\d+) rows?\)", MetricKind::Integer),
    ]
});

/// Built-in metrics for a `pgbench` run summary.
pub fn pgbench_metrics() -> &'static [MetricSpec] {
    &PGBENCH_METRICS
}

/// Built-in metrics for a `psql` run with `\timing on`.
pub fn psql_metrics() -> &'static [MetricSpec] {
    &PSQL_METRICS
}
