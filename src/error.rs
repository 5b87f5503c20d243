//! Error types for startrace
//!
//! Two tiers:
//! - [`StartraceError`]: fatal setup failures that abort the whole run
//! - [`TrialError`]: failures inside one trial, collected in an [`ErrorList`]
//!   while the trial keeps going

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fatal errors. Any of these ends the run with a non-zero exit.
#[derive(Error, Debug)]
pub enum StartraceError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot set up trace channel: {0}")]
    TraceSetup(String),

    #[error("cannot free caches before timed run: {0:#}")]
    CacheFlush(anyhow::Error),

    #[error("cannot discard snap namespace for {name}: {reason:#}")]
    NamespaceDiscard { name: String, reason: anyhow::Error },

    #[error("cannot start {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("cannot open command log: {0:#}")]
    CommandLog(anyhow::Error),

    #[error("cannot write results: {0}")]
    Output(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for fatal-setup operations
pub type Result<T> = std::result::Result<T, StartraceError>;

/// The step of a trial that produced a [`TrialError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStage {
    PrepareScript,
    RestoreScript,
    WindowWait,
    PidResolution,
    WindowClose,
    Kill,
    FallbackClose,
    Reap,
    TraceParse,
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TrialStage::PrepareScript => "running prepare script",
            TrialStage::RestoreScript => "running restore script",
            TrialStage::WindowWait => "waiting for window appearance",
            TrialStage::PidResolution => "getting pid for window",
            TrialStage::WindowClose => "closing window",
            TrialStage::Kill => "killing window process",
            TrialStage::FallbackClose => "closing window with window manager",
            TrialStage::Reap => "reaping launched process",
            TrialStage::TraceParse => "cannot extract runtime data",
        };
        f.write_str(text)
    }
}

/// A non-fatal failure recorded during one trial
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
#[error("{stage}: {message}")]
pub struct TrialError {
    pub stage: TrialStage,
    pub message: String,
}

/// Ordered errors for the current trial
///
/// Created fresh at the start of each trial and passed by `&mut` to every
/// step. Recording never aborts the trial.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<TrialError>,
    live: bool,
}

impl ErrorList {
    /// `live` echoes each error to stderr the moment it is recorded
    pub fn new(live: bool) -> Self {
        Self {
            errors: Vec::new(),
            live,
        }
    }

    /// Record a failure. Anyhow errors are rendered with their context chain.
    pub fn record(&mut self, stage: TrialStage, err: impl fmt::Display) {
        let error = TrialError {
            stage,
            message: format!("{:#}", err),
        };
        tracing::debug!(%error, "trial error recorded");
        if self.live {
            eprintln!("[startrace: {}]", error);
        }
        self.errors.push(error);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrialError> {
        self.errors.iter()
    }

    /// True if any recorded error came from `stage`
    pub fn contains_stage(&self, stage: TrialStage) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }

    /// Consume the list, yielding the errors in recording order
    pub fn into_vec(self) -> Vec<TrialError> {
        self.errors
    }
}
