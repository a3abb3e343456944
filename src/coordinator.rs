use crate::pipeline::WorkerReport;
use anyhow::Result;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info, warn};

/// One worker process to launch: the program (normally the current
/// executable re-entered through its worker subcommand), its arguments and
/// extra environment, and the report file the worker will leave behind.
/// Credentials go through `env`, never `args`: argv is world-readable in
/// process listings.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    pub data_type: String,
    pub provider: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub report_path: PathBuf,
}

/// A sub-descriptor that did not finish cleanly: a required query failure,
/// a crash, a timeout, or a worker that never produced its report.
#[derive(Debug, Clone)]
pub struct WorkerFailure {
    pub data_type: String,
    pub provider: String,
    pub reason: String,
}

/// Merged results of one dataset type's worker pool, assembled only after
/// every worker has finished.
#[derive(Debug, Default)]
pub struct RunOutcome {
    pub reports: Vec<WorkerReport>,
    pub failures: Vec<WorkerFailure>,
}

impl RunOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn merge(&mut self, other: RunOutcome) {
        self.reports.extend(other.reports);
        self.failures.extend(other.failures);
    }
}

#[derive(Debug, Clone)]
pub struct Coordinator {
    pub max_parallel: usize,
    pub timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(max_parallel: usize, timeout: Option<Duration>) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            timeout,
        }
    }

    /// Runs one worker process per launch and blocks until all have
    /// finished, throttled to `max_parallel` concurrent workers. A worker's
    /// failure never interrupts its siblings; failures are aggregated and
    /// surfaced once everything has been joined.
    pub async fn run_workers(&self, launches: Vec<WorkerLaunch>) -> Result<RunOutcome> {
        let mut outcome = RunOutcome::default();
        if launches.is_empty() {
            return Ok(outcome);
        }

        let pb = make_progress_bar(launches.len() as u64);
        let mut in_flight = FuturesUnordered::new();
        let mut pending = launches.into_iter();

        for _ in 0..self.max_parallel {
            if let Some(launch) = pending.next() {
                in_flight.push(self.run_one(launch));
            }
        }

        while let Some(result) = in_flight.next().await {
            match result {
                Ok(report) => outcome.reports.push(report),
                Err(failure) => {
                    error!(
                        data_type = %failure.data_type,
                        provider = %failure.provider,
                        reason = %failure.reason,
                        "Sub-descriptor failed"
                    );
                    outcome.failures.push(failure);
                }
            }
            pb.inc(1);
            if let Some(launch) = pending.next() {
                in_flight.push(self.run_one(launch));
            }
        }

        pb.finish_with_message(format!(
            "{} finished, {} failed",
            outcome.reports.len(),
            outcome.failures.len()
        ));
        Ok(outcome)
    }

    async fn run_one(&self, launch: WorkerLaunch) -> std::result::Result<WorkerReport, WorkerFailure> {
        let fail = |reason: String| WorkerFailure {
            data_type: launch.data_type.clone(),
            provider: launch.provider.clone(),
            reason,
        };

        info!(
            data_type = %launch.data_type,
            provider = %launch.provider,
            "Launching worker"
        );

        let mut child = Command::new(&launch.program)
            .args(&launch.args)
            .envs(launch.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| fail(format!("failed to spawn worker: {e}")))?;

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(
                        data_type = %launch.data_type,
                        provider = %launch.provider,
                        "Worker exceeded timeout, killing"
                    );
                    child.kill().await.ok();
                    return Err(fail(format!(
                        "worker killed after {}s timeout",
                        self.timeout.map(|t| t.as_secs()).unwrap_or_default()
                    )));
                }
            },
            None => child.wait().await,
        }
        .map_err(|e| fail(format!("failed to await worker: {e}")))?;

        // The report is the only worker output besides status and logs; a
        // crashed worker usually leaves none.
        let report = WorkerReport::read(&launch.report_path).ok();

        match report {
            Some(report) if !report.succeeded() => {
                Err(fail("required query failure".to_string()))
            }
            Some(report) if status.success() => Ok(report),
            Some(_) => Err(fail(format!("worker exited unsuccessfully ({status})"))),
            None if status.success() => {
                Err(fail("worker exited cleanly but wrote no report".to_string()))
            }
            None => Err(fail(format!("worker crashed ({status})"))),
        }
    }
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("    {spinner:.cyan} workers [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
