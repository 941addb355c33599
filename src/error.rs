//! Per-job error taxonomy.
//!
//! These errors are scoped to a single job: the sweep records the job as
//! failed and the extractor drops it, but neither aborts the run.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while driving one external solver job.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("failed to launch solver for {job}: {source}")]
    Submit {
        job: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read status file {path}: {source}")]
    StatusRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{job} timed out after {secs:.1}s while {phase}")]
    TimedOut { job: String, phase: &'static str, secs: f64 },

    #[error("{job} cancelled while {phase}")]
    Cancelled { job: String, phase: &'static str },
}

impl JobError {
    /// Timed-out and cancelled jobs end in the `Aborted` state.
    pub fn is_abort(&self) -> bool {
        matches!(self, JobError::TimedOut { .. } | JobError::Cancelled { .. })
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, JobError::Cancelled { .. })
    }
}

/// Failure while reading one job's result set.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("result export {path} not found")]
    MissingExport { path: PathBuf },

    #[error("cannot read result export {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed result export {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("step {0} not found in result set")]
    MissingStep(String),

    #[error("field {field} has no value at {region} component {component} in frame {frame}")]
    MissingField {
        field: String,
        region: String,
        component: usize,
        frame: usize,
    },

    #[error("history output {region}/{output} not found")]
    MissingHistory { region: String, output: String },

    #[error("history output has {history} samples for {frames} frames")]
    HistoryTooShort { frames: usize, history: usize },

    #[error("step {0} has no output frames")]
    NoFrames(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_classification() {
        let timed_out = JobError::TimedOut { job: "Job-0001".into(), phase: "waiting for status file", secs: 3.0 };
        let cancelled = JobError::Cancelled { job: "Job-0001".into(), phase: "waiting for lock release" };
        let unreadable = JobError::StatusRead {
            path: PathBuf::from("Job-0001.sta"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };

        assert!(timed_out.is_abort() && !timed_out.is_cancel());
        assert!(cancelled.is_abort() && cancelled.is_cancel());
        assert!(!unreadable.is_abort());
        assert!(timed_out.to_string().contains("3.0s"));
    }
}
