//! Virtual-user load harness.
//!
//! Each virtual user is a tokio task looping over the scenario's iteration.
//! With an iteration budget the VUs draw tickets from a shared counter until
//! it is spent; with a duration they loop until the deadline. A `true` on the
//! stop channel ends every VU after its in-flight iteration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use certload_common::{CertloadError, Result};
use certload_obs::Metrics;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::issuer::IterationFailure;
use crate::scenario::{IssueScenario, SetupData};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPlan {
    pub vus: usize,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
}

impl Default for LoadPlan {
    fn default() -> Self {
        Self { vus: 1, iterations: Some(1), duration: None }
    }
}

impl LoadPlan {
    /// Without an iteration budget or a duration the plan runs a single
    /// iteration. When both are given the first limit reached ends the run.
    pub fn new(vus: usize, iterations: Option<u64>, duration: Option<Duration>) -> Result<Self> {
        if vus == 0 {
            return Err(CertloadError::InvalidPlan("at least one VU is required".into()));
        }
        if iterations == Some(0) {
            return Err(CertloadError::InvalidPlan("iterations must be positive".into()));
        }
        if duration == Some(Duration::ZERO) {
            return Err(CertloadError::InvalidPlan("duration must be positive".into()));
        }
        let iterations = match (iterations, duration) {
            (None, None) => Some(1),
            (iterations, _) => iterations,
        };
        Ok(Self { vus, iterations, duration })
    }
}

#[derive(Default)]
struct Tally {
    tickets: AtomicU64,
    passed: AtomicU64,
    transport: AtomicU64,
    status: AtomicU64,
    decode: AtomicU64,
}

impl Tally {
    fn next_ticket(&self, budget: Option<u64>) -> Option<u64> {
        let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
        match budget {
            Some(limit) if ticket >= limit => None,
            _ => Some(ticket),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: String,
    pub vus: usize,
    pub iterations: u64,
    pub passed: u64,
    pub failed: u64,
    pub failures: BTreeMap<&'static str, u64>,
    pub elapsed: Duration,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}", self.run_id)?;
        writeln!(f, "  vus:        {}", self.vus)?;
        writeln!(f, "  iterations: {}", self.iterations)?;
        writeln!(f, "  passed:     {}", self.passed)?;
        writeln!(f, "  failed:     {}", self.failed)?;
        for (reason, count) in self.failures.iter().filter(|(_, c)| **c > 0) {
            writeln!(f, "    {reason}: {count}")?;
        }
        write!(f, "  elapsed:    {:.2}s", self.elapsed.as_secs_f64())
    }
}

/// Runs `plan` against `scenario` and waits for every VU to finish.
pub async fn run(
    scenario: Arc<IssueScenario>,
    plan: LoadPlan,
    data: SetupData,
    metrics: Arc<Metrics>,
    stop: watch::Receiver<bool>,
) -> RunSummary {
    let start = Instant::now();
    let deadline = plan.duration.map(|d| start + d);
    let data = Arc::new(data);
    let tally = Arc::new(Tally::default());

    tracing::info!(
        target: "certload::harness",
        run_id = %data.run_id,
        vus = plan.vus,
        iterations = ?plan.iterations,
        duration = ?plan.duration,
        "starting run"
    );

    let mut tasks = Vec::with_capacity(plan.vus);
    for vu in 1..=plan.vus {
        let scenario = scenario.clone();
        let data = data.clone();
        let metrics = metrics.clone();
        let tally = tally.clone();
        let stop = stop.clone();
        tasks.push(tokio::spawn(async move {
            metrics.vu_started();
            vu_loop(vu, &scenario, &data, &metrics, &tally, plan.iterations, deadline, stop).await;
            metrics.vu_finished();
        }));
    }
    for t in tasks {
        if let Err(err) = t.await {
            tracing::error!(target: "certload::harness", error = %err, "virtual user aborted");
        }
    }

    let passed = tally.passed.load(Ordering::Relaxed);
    let failures = BTreeMap::from([
        ("transport", tally.transport.load(Ordering::Relaxed)),
        ("status", tally.status.load(Ordering::Relaxed)),
        ("decode", tally.decode.load(Ordering::Relaxed)),
    ]);
    let failed: u64 = failures.values().sum();
    let summary = RunSummary {
        run_id: data.run_id.clone(),
        vus: plan.vus,
        iterations: passed + failed,
        passed,
        failed,
        failures,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        target: "certload::harness",
        run_id = %summary.run_id,
        passed = summary.passed,
        failed = summary.failed,
        "run finished"
    );
    summary
}

#[allow(clippy::too_many_arguments)]
async fn vu_loop(
    vu: usize,
    scenario: &IssueScenario,
    data: &SetupData,
    metrics: &Metrics,
    tally: &Tally,
    budget: Option<u64>,
    deadline: Option<Instant>,
    stop: watch::Receiver<bool>,
) {
    loop {
        if *stop.borrow() {
            tracing::debug!(target: "certload::harness", vu, "stop requested");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        let Some(iteration) = tally.next_ticket(budget) else { break };

        let started = Instant::now();
        let outcome = scenario.iteration(data).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(_) => {
                tally.passed.fetch_add(1, Ordering::Relaxed);
                metrics.record_iteration(elapsed, None, Some(true));
                tracing::debug!(target: "certload::harness", vu, iteration, "iteration passed");
            }
            Err(err) => {
                let counter = match &err {
                    IterationFailure::Transport(_) => &tally.transport,
                    IterationFailure::Status { .. } => &tally.status,
                    IterationFailure::Decode(_) => &tally.decode,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                metrics.record_iteration(elapsed, Some(err.reason()), err.status_ok());
                tracing::warn!(
                    target: "certload::harness",
                    vu,
                    iteration,
                    error = %err,
                    "iteration failed"
                );
            }
        }
    }
}
