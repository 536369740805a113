/// Positional parameter substitution for query templates.
///
/// Templates use `:1`, `:2`, ... placeholders. Values come from a JSON
/// parameter table keyed by query identifier.
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r":(\d+)").unwrap());

/// One substitution value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Render the value as query text. Text is single-quoted unless it already is.
    pub fn render(&self) -> String {
        match self {
            ParamValue::Integer(v) => v.to_string(),
            ParamValue::Float(v) => v.to_string(),
            ParamValue::Text(s) if is_quoted(s) => s.clone(),
            ParamValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

fn is_quoted(s: &str) -> bool {
    s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'')
}

fn is_slice_or_cast(prev: u8) -> bool {
    prev.is_ascii_alphanumeric() || matches!(prev, b':' | b']' | b'_')
}

/// Replace every `:N` placeholder with the Nth value (1-based).
///
/// The whole digit run is the index, so `:1` never eats the front of `:10`.
/// Placeholders without a value and `:0` are left untouched, as is a `:N`
/// that follows `:`, `]`, `_` or an alphanumeric (casts and array slices).
pub fn substitute(template: &str, values: &[ParamValue]) -> String {
    let bytes = template.as_bytes();
    let mut out = String::with_capacity(template.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        // `x::10` is a cast and `arr[1:2]` a slice, not placeholders
        if whole.start() > 0 && is_slice_or_cast(bytes[whole.start() - 1]) {
            continue;
        }
        let value = caps[1]
            .parse::<usize>()
            .ok()
            .and_then(|index| index.checked_sub(1))
            .and_then(|index| values.get(index));

        if let Some(value) = value {
            out.push_str(&template[last..whole.start()]);
            out.push_str(&value.render());
            last = whole.end();
        }
    }

    out.push_str(&template[last..]);
    out
}

/// Query identifier -> ordered substitution values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTable {
    entries: BTreeMap<String, Vec<ParamValue>>,
}

impl ParameterTable {
    /// Load a parameter table from a JSON file.
    ///
    /// Any problem reading or parsing the file yields an empty table; the
    /// queries then run with their placeholders untouched.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "could not read parameter file, using no parameters"
                );
                return Self::default();
            }
        };

        match Self::parse(&contents) {
            Ok(table) => {
                tracing::debug!(path = %path.display(), queries = table.len(), "loaded parameter table");
                table
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "malformed parameter file, using no parameters"
                );
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, serde_json::Error> {
        let entries: BTreeMap<String, Vec<ParamValue>> = serde_json::from_str(contents)?;
        Ok(Self { entries })
    }

    /// Values for `query_id`, empty if none were given.
    pub fn values(&self, query_id: &str) -> &[ParamValue] {
        self.entries
            .get(query_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn substitutes_numbers_and_quotes_text() {
        let out = substitute(
            "SELECT * FROM t WHERE x = :1 AND y = :2",
            &[ParamValue::Integer(5), "abc".into()],
        );
        assert_eq!(out, "SELECT * FROM t WHERE x = 5 AND y = 'abc'");
    }

    #[test]
    fn ten_placeholders_do_not_collide() {
        let values: Vec<ParamValue> = (1..=10).map(|v| ParamValue::Integer(v * 100)).collect();
        let out = substitute("a=:1 b=:10 c=:2", &values);
        assert_eq!(out, "a=100 b=1000 c=200");
    }

    #[test]
    fn ten_placeholder_kept_when_only_one_value() {
        let out = substitute("a=:1 b=:10", &[ParamValue::Integer(7)]);
        assert_eq!(out, "a=7 b=:10");
    }

    #[test]
    fn missing_values_leave_placeholders() {
        let out = substitute("x = :1 AND y = :2 AND z = :3", &["a".into()]);
        assert_eq!(out, "x = 'a' AND y = :2 AND z = :3");
    }

    #[test]
    fn zero_index_is_not_a_placeholder() {
        assert_eq!(substitute("x = :0", &[ParamValue::Integer(1)]), "x = :0");
    }

    #[test]
    fn already_quoted_text_is_not_requoted() {
        let out = substitute("d = :1", &["'2024-01-01'".into()]);
        assert_eq!(out, "d = '2024-01-01'");
    }

    #[test]
    fn embedded_quote_is_doubled() {
        let out = substitute("n = :1", &["O'Brien".into()]);
        assert_eq!(out, "n = 'O''Brien'");
    }

    #[test]
    fn casts_are_left_alone() {
        let out = substitute("SELECT :1::int, '5'::10", &["7".into()]);
        assert_eq!(out, "SELECT '7'::int, '5'::10");
    }

    #[test]
    fn array_slices_are_left_alone() {
        let out = substitute(
            "SELECT arr[1:2], arr[i:1], m[1]:1 FROM t WHERE id = :1 AND k IN (:1,:2)",
            &[ParamValue::Integer(7), ParamValue::Integer(8)],
        );
        assert_eq!(
            out,
            "SELECT arr[1:2], arr[i:1], m[1]:1 FROM t WHERE id = 7 AND k IN (7,8)"
        );
    }

    #[test]
    fn repeated_placeholder_substituted_everywhere() {
        let out = substitute(":1 + :1", &[ParamValue::Float(2.5)]);
        assert_eq!(out, "2.5 + 2.5");
    }

    #[test]
    fn table_parses_mixed_values() {
        let table = ParameterTable::parse(r#"{"q1": [5, "abc", 1.5], "q2": []}"#).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.values("q1"),
            &[
                ParamValue::Integer(5),
                ParamValue::Text("abc".into()),
                ParamValue::Float(1.5)
            ]
        );
        assert!(table.values("q2").is_empty());
        assert!(table.values("unknown").is_empty());
    }

    #[test]
    fn malformed_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ParameterTable::load(&path).is_empty());
    }

    #[test]
    fn missing_file_loads_empty() {
        assert!(ParameterTable::load(Path::new("/nonexistent/params.json")).is_empty());
    }

    #[test]
    fn load_reads_valid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"q7": [1, "x"]}"#).unwrap();
        let table = ParameterTable::load(&path);
        assert_eq!(table.values("q7").len(), 2);
    }
}
