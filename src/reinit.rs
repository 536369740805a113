/// Dataset re-initialization policy.
///
/// Before a scenario runs, the driver probes the instance for an existing
/// pgbench dataset and asks the configured policy whether to run
/// `pgbench -i` again.
use crate::session::{self, SessionError, ToolCommand};
use std::io::{BufRead, Write};

/// pgbench creates this many `pgbench_accounts` rows per scale unit.
pub const ROWS_PER_SCALE: u64 = 100_000;

/// What the probe found on the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetState {
    /// `pgbench_accounts` has exactly the expected row count.
    Matches,
    /// The table exists with a different row count.
    Mismatch { rows: u64 },
    /// The table could not be read (missing, connection error, odd output).
    Unknown { reason: String },
}

/// Decides whether a dataset must be (re)initialized.
pub trait ReinitPolicy {
    /// Whether the driver should probe the instance before asking.
    fn wants_probe(&self) -> bool {
        true
    }

    fn should_initialize(&mut self, instance: &str, scale_factor: u32, state: &DatasetState)
        -> bool;
}

/// Always re-initialize.
pub struct Always;

impl ReinitPolicy for Always {
    fn wants_probe(&self) -> bool {
        false
    }

    fn should_initialize(&mut self, _: &str, _: u32, _: &DatasetState) -> bool {
        true
    }
}

/// Never initialize; the dataset is managed externally.
pub struct Never;

impl ReinitPolicy for Never {
    fn wants_probe(&self) -> bool {
        false
    }

    fn should_initialize(&mut self, _: &str, _: u32, _: &DatasetState) -> bool {
        false
    }
}

/// Initialize unless the dataset already matches the scale factor.
pub struct Auto;

impl ReinitPolicy for Auto {
    fn should_initialize(&mut self, _: &str, _: u32, state: &DatasetState) -> bool {
        *state != DatasetState::Matches
    }
}

/// Like `Auto`, but ask before skipping a matching dataset. Only `y`/`yes`
/// re-initializes a matching dataset.
pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R: BufRead, W: Write> ReinitPolicy for Prompt<R, W> {
    fn should_initialize(&mut self, instance: &str, scale_factor: u32, state: &DatasetState) -> bool {
        if *state != DatasetState::Matches {
            return true;
        }

        let asked = write!(
            self.output,
            "pgbench_accounts already matches scale_factor {scale_factor} for {instance}. Re-initialize? (y/N): "
        )
        .and_then(|()| self.output.flush());
        if let Err(e) = asked {
            tracing::warn!(error = %e, "could not write re-initialize prompt");
        }

        let mut answer = String::new();
        if let Err(e) = self.input.read_line(&mut answer) {
            tracing::warn!(error = %e, "could not read answer, keeping existing dataset");
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

/// Interpret the output of `SELECT COUNT(*) FROM pgbench_accounts` in unaligned tuples-only mode.
pub fn classify_count(stdout: &str, scale_factor: u32) -> DatasetState {
    match stdout.trim().parse::<u64>() {
        Ok(rows) if rows == u64::from(scale_factor) * ROWS_PER_SCALE => DatasetState::Matches,
        Ok(rows) => DatasetState::Mismatch { rows },
        Err(_) => DatasetState::Unknown {
            reason: format!("unexpected count output: {:?}", stdout.trim()),
        },
    }
}

/// Ask the instance how many pgbench accounts it holds.
///
/// Any query failure is reported as `Unknown`; only a failure to spawn
/// `psql` at all is an error.
pub async fn probe_dataset(
    psql: &str,
    conn_str: &str,
    scale_factor: u32,
) -> Result<DatasetState, SessionError> {
    let command = ToolCommand::new(psql).args([
        conn_str,
        "-X",
        "-A",
        "-t",
        "-c",
        "SELECT COUNT(*) FROM pgbench_accounts;",
    ]);
    let out = session::run_captured(&command).await?;
    if !out.success() {
        return Ok(DatasetState::Unknown {
            reason: out.error_line(),
        });
    }
    Ok(classify_count(&out.stdout, scale_factor))
}
