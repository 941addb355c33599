//! Lifecycle of one external solver job.
//!
//! Submitted → WaitingForStatusFile → WaitingForResultRelease → Validating
//! → CleanedUp (succeeded) | LeftForInspection (failed).
//!
//! The solver is launched fire-and-forget; everything after that is
//! observed through `<job>.<status_extension>` and `<job>.<lock_extension>`
//! in the working directory.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config;
use crate::error::JobError;
use crate::wait::{poll_until, CancelToken, WaitError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    WaitingForStatusFile,
    WaitingForResultRelease,
    Validating,
    CleanedUp,
    LeftForInspection,
}

/// Terminal verdict of a job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    Failed,
    Aborted,
}

/// Scratch files handled by [`JobRunner::cleanup`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cleanup {
    pub removed: Vec<PathBuf>,
    pub absent: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub verdict: Verdict,
    pub state: JobState,
    /// Empty unless the job succeeded
    pub cleanup: Cleanup,
    pub elapsed: Duration,
}

/// True unless the status text contains the failure marker.
pub fn is_completed(status_text: &str, failure_marker: &str) -> bool {
    !status_text.contains(failure_marker)
}

pub struct JobRunner {
    cfg: config::Solver,
    work_dir: PathBuf,
    cancel: CancelToken,
}

impl JobRunner {
    pub fn new(cfg: &config::Solver, work_dir: &Path, cancel: CancelToken) -> Self {
        Self {
            cfg: cfg.clone(),
            work_dir: work_dir.to_path_buf(),
            cancel,
        }
    }

    pub fn artifact(&self, job: &str, extension: &str) -> PathBuf {
        self.work_dir.join(format!("{}.{}", job, extension))
    }

    pub fn status_path(&self, job: &str) -> PathBuf {
        self.artifact(job, &self.cfg.status_extension)
    }

    pub fn lock_path(&self, job: &str) -> PathBuf {
        self.artifact(job, &self.cfg.lock_extension)
    }

    /// Delete a status or lock file left by an earlier run of `job`.
    fn clear_stale(&self, job: &str) -> Result<(), JobError> {
        for path in [self.status_path(job), self.lock_path(job)] {
            match fs::remove_file(&path) {
                Ok(()) => warn!(job, path = %path.display(), "removed stale file from an earlier run"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(JobError::Submit { job: job.to_string(), source }),
            }
        }
        Ok(())
    }

    /// Launch the solver and return without waiting for it.
    ///
    /// Status and lock files of an earlier run are removed first, so every
    /// wait observes only this run.
    pub fn submit(&self, job: &str) -> Result<Child, JobError> {
        let argv: Vec<String> = self
            .cfg
            .command
            .iter()
            .map(|a| a.replace("{job}", job))
            .collect();
        info!(job, command = %argv.join(" "), "submitting job");

        let Some((program, args)) = argv.split_first() else {
            return Err(JobError::Submit {
                job: job.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty solver command"),
            });
        };
        self.clear_stale(job)?;
        Command::new(program)
            .args(args)
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| JobError::Submit { job: job.to_string(), source })
    }

    /// Wait until the status file exists and can be opened for reading.
    pub fn await_status_file(&self, job: &str, deadline: Option<Instant>) -> Result<(), JobError> {
        let path = self.status_path(job);
        debug!(job, path = %path.display(), "waiting for status file");
        poll_until(|| File::open(&path).is_ok(), self.cfg.status_poll(), deadline, &self.cancel)
            .map(|_| ())
            .map_err(|e| wait_error(job, "waiting for status file", e))
    }

    /// Wait until the solver drops its lock on the result set.
    pub fn await_result_release(&self, job: &str, deadline: Option<Instant>) -> Result<(), JobError> {
        let path = self.lock_path(job);
        debug!(job, path = %path.display(), "waiting for result set release");
        poll_until(|| !path.exists(), self.cfg.release_poll(), deadline, &self.cancel)
            .map(|_| ())
            .map_err(|e| wait_error(job, "waiting for result set release", e))
    }

    pub fn validate(&self, job: &str) -> Result<bool, JobError> {
        let path = self.status_path(job);
        let text = fs::read_to_string(&path)
            .map_err(|source| JobError::StatusRead { path: path.clone(), source })?;
        Ok(is_completed(&text, &self.cfg.failure_marker))
    }

    /// Last non-empty line of the status file.
    pub fn tail_status(&self, job: &str) -> Result<Option<String>, JobError> {
        let path = self.status_path(job);
        let text = fs::read_to_string(&path)
            .map_err(|source| JobError::StatusRead { path: path.clone(), source })?;
        Ok(text
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .map(|l| l.trim_end().to_string()))
    }

    /// Delete the scratch files of a finished job. Each deletion is
    /// independent: absent files are skipped, failures are only logged.
    pub fn cleanup(&self, job: &str) -> Cleanup {
        let mut done = Cleanup::default();
        for ext in &self.cfg.scratch_extensions {
            let path = self.artifact(job, ext);
            if !path.exists() {
                warn!(job, path = %path.display(), "scratch file absent");
                done.absent.push(path);
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => done.removed.push(path),
                Err(e) => warn!(job, path = %path.display(), error = %e, "could not remove scratch file"),
            }
        }
        done
    }

    /// Full lifecycle: submit, wait, validate and clean up or leave in place.
    pub fn run(&self, job: &str) -> Result<JobOutcome, JobError> {
        let started = Instant::now();
        let deadline = self.cfg.timeout().map(|t| started + t);

        let mut child = self.submit(job)?;
        let mut state = JobState::Submitted;
        debug!(job, ?state);

        state = JobState::WaitingForStatusFile;
        debug!(job, ?state);
        let waited = self
            .await_status_file(job, deadline)
            .and_then(|_| {
                state = JobState::WaitingForResultRelease;
                debug!(job, ?state);
                self.await_result_release(job, deadline)
            });
        if let Err(e) = waited {
            if let Err(kill_err) = child.kill() {
                debug!(job, error = %kill_err, "solver process already gone");
            }
            reap(job, &mut child);
            return Err(e);
        }

        state = JobState::Validating;
        debug!(job, ?state);
        let validated = self.validate(job);
        reap(job, &mut child);

        let (verdict, state, cleanup) = if validated? {
            info!(job, "analysis completed");
            (Verdict::Succeeded, JobState::CleanedUp, self.cleanup(job))
        } else {
            let last = self.tail_status(job).ok().flatten().unwrap_or_default();
            warn!(job, last_status = %last, "analysis has not been completed; files left for inspection");
            (Verdict::Failed, JobState::LeftForInspection, Cleanup::default())
        };

        Ok(JobOutcome {
            verdict,
            state,
            cleanup,
            elapsed: started.elapsed(),
        })
    }
}

fn wait_error(job: &str, phase: &'static str, e: WaitError) -> JobError {
    match e {
        WaitError::TimedOut(waited) => JobError::TimedOut {
            job: job.to_string(),
            phase,
            secs: waited.as_secs_f64(),
        },
        WaitError::Cancelled => JobError::Cancelled { job: job.to_string(), phase },
    }
}

// The launcher's exit code carries no meaning, but it must be waited on.
fn reap(job: &str, child: &mut Child) {
    if let Ok(None) = child.try_wait() {
        debug!(job, "solver launcher still running");
    }
    match child.wait() {
        Ok(status) => debug!(job, %status, "solver launcher exited"),
        Err(e) => debug!(job, error = %e, "could not wait for solver launcher"),
    }
}
