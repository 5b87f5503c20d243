//! Per-trial results and final rendering

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Duration;

use crate::config::OutputMode;
use crate::error::{StartraceError, TrialError};
use crate::strace::ExecveTiming;

/// Result of one trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Execution {
    /// Absent when tracing was disabled or the trace could not be parsed
    pub execve_timing: Option<ExecveTiming>,
    /// Process start until window appearance (or exit without window wait)
    #[serde(with = "crate::duration_serde")]
    pub time_to_display: Duration,
    /// Trace total when traced, otherwise the display time
    #[serde(with = "crate::duration_serde")]
    pub time_to_run: Duration,
    pub errors: Vec<TrialError>,
}

impl Execution {
    /// Assemble a trial result, choosing the authoritative run time
    pub fn new(
        execve_timing: Option<ExecveTiming>,
        time_to_display: Duration,
        errors: Vec<TrialError>,
    ) -> Self {
        let time_to_run = execve_timing
            .as_ref()
            .map(|t| t.total_time)
            .unwrap_or(time_to_display);
        Self {
            execve_timing,
            time_to_display,
            time_to_run,
            errors,
        }
    }
}

/// All trials of a run, in order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputResult {
    pub runs: Vec<Execution>,
}

impl OutputResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, run: Execution) {
        self.runs.push(run);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Write the results once, in the requested mode
    ///
    /// JSON mode writes a single `{"Runs": [...]}` object. Table mode writes,
    /// per trial, the execve breakdown when present followed by the startup
    /// time line. Errors only appear in JSON.
    pub fn render<W: Write>(&self, mode: OutputMode, w: &mut W) -> Result<(), StartraceError> {
        let output_err = |e: std::io::Error| StartraceError::Output(e.to_string());
        match mode {
            OutputMode::Json => {
                let json = self
                    .to_json()
                    .map_err(|e| StartraceError::Output(e.to_string()))?;
                writeln!(w, "{}", json).map_err(output_err)?;
            }
            OutputMode::Table => {
                for run in &self.runs {
                    if let Some(timing) = &run.execve_timing {
                        timing.display(w).map_err(output_err)?;
                    }
                    writeln!(w, "Total startup time: {:?}", run.time_to_display)
                        .map_err(output_err)?;
                }
            }
        }
        w.flush().map_err(output_err)
    }
}
