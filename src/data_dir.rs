use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Manages the output directory layout.
///
/// Reports live at the root, raw tool transcripts under `raw/`, and the
/// optional SQLite store at `results.db`.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the SQLite results store.
    pub fn db(&self) -> PathBuf {
        self.root.join("results.db")
    }

    /// Directory holding raw tool output, one file per repetition.
    pub fn raw_dir(&self) -> PathBuf {
        self.root.join("raw")
    }

    /// Raw output file for one pgbench repetition,
    /// e.g. `raw/pg16_tpcb_run1_20240501_120000.txt`.
    pub fn run_output(
        &self,
        instance: &str,
        benchmark: &str,
        run: u32,
        started_at: DateTime<Utc>,
    ) -> PathBuf {
        let ts = started_at.format("%Y%m%d_%H%M%S");
        self.raw_dir().join(format!(
            "{}_{}_run{run}_{ts}.txt",
            sanitize(instance),
            sanitize(benchmark)
        ))
    }

    /// Raw output of the dataset initialization step.
    pub fn init_output(&self, instance: &str, benchmark: &str, started_at: DateTime<Utc>) -> PathBuf {
        let ts = started_at.format("%Y%m%d_%H%M%S");
        self.raw_dir().join(format!(
            "{}_{}_init_{ts}.txt",
            sanitize(instance),
            sanitize(benchmark)
        ))
    }

    /// Report for a pgbench scenario, e.g. `pg16_tpcb.csv`.
    pub fn report(&self, instance: &str, benchmark: &str) -> PathBuf {
        self.root
            .join(format!("{}_{}.csv", sanitize(instance), sanitize(benchmark)))
    }

    /// Report for a query scenario, e.g. `pg16_olap_queries.csv`.
    pub fn query_report(&self, instance: &str, benchmark: &str) -> PathBuf {
        self.root.join(format!(
            "{}_{}_queries.csv",
            sanitize(instance),
            sanitize(benchmark)
        ))
    }

    /// Create the root and `raw/` directories.
    /// Returns Ok(true) if the root was created, Ok(false) if it already existed.
    pub fn init(&self) -> std::io::Result<bool> {
        let created = !self.root.exists();
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.raw_dir())?;
        Ok(created)
    }
}

/// Keep names filesystem-safe: anything outside `[A-Za-z0-9_.-]` becomes `-`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn paths_are_relative_to_root() {
        let dd = DataDir::new("/tmp/results");
        assert_eq!(dd.db(), PathBuf::from("/tmp/results/results.db"));
        assert_eq!(dd.raw_dir(), PathBuf::from("/tmp/results/raw"));
        assert_eq!(
            dd.report("pg16", "tpcb"),
            PathBuf::from("/tmp/results/pg16_tpcb.csv")
        );
        assert_eq!(
            dd.query_report("pg16", "olap"),
            PathBuf::from("/tmp/results/pg16_olap_queries.csv")
        );
    }

    #[test]
    fn run_output_includes_run_and_timestamp() {
        let dd = DataDir::new("out");
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 5).unwrap();
        assert_eq!(
            dd.run_output("pg16", "tpcb", 3, ts),
            PathBuf::from("out/raw/pg16_tpcb_run3_20240501_123005.txt")
        );
    }

    #[test]
    fn names_are_sanitized() {
        let dd = DataDir::new("out");
        assert_eq!(
            dd.report("prod/primary", "read only"),
            PathBuf::from("out/prod-primary_read-only.csv")
        );
    }

    #[test]
    fn init_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let dd = DataDir::new(tmp.path().join("results"));
        assert!(dd.init().unwrap());
        assert!(dd.raw_dir().is_dir());
        // Second init is a no-op
        assert!(!dd.init().unwrap());
    }
}
