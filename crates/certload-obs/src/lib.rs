//! Observability utilities: load run metrics

use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

static ENCODER: Lazy<TextEncoder> = Lazy::new(TextEncoder::new);

/// Name of the status check recorded for every completed request.
pub const STATUS_CHECK: &str = "issueCertificate response status is 200";

/// Metrics for a single load run. Each run owns its registry so that several
/// runs in one process (tests, mainly) never collide on registration.
pub struct Metrics {
    registry: Registry,
    iterations: IntCounter,
    failures: IntCounterVec,
    checks: IntCounterVec,
    req_duration: Histogram,
    vus: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let iterations = IntCounter::new("certload_iterations_total", "Completed iterations")?;
        let failures = IntCounterVec::new(
            Opts::new("certload_iteration_failures_total", "Failed iterations by reason"),
            &["reason"],
        )?;
        let checks = IntCounterVec::new(
            Opts::new("certload_checks_total", "Check outcomes"),
            &["check", "result"],
        )?;
        let req_duration = Histogram::with_opts(HistogramOpts::new(
            "certload_http_req_duration_seconds",
            "Issue request duration including body read",
        ))?;
        let vus = IntGauge::new("certload_vus", "Active virtual users")?;

        registry.register(Box::new(iterations.clone()))?;
        registry.register(Box::new(failures.clone()))?;
        registry.register(Box::new(checks.clone()))?;
        registry.register(Box::new(req_duration.clone()))?;
        registry.register(Box::new(vus.clone()))?;

        Ok(Self { registry, iterations, failures, checks, req_duration, vus })
    }

    /// Records one finished iteration. `failure` is the failure reason, if any;
    /// `status_ok` is `None` when no response was received at all.
    pub fn record_iteration(
        &self,
        elapsed: Duration,
        failure: Option<&str>,
        status_ok: Option<bool>,
    ) {
        self.iterations.inc();
        self.req_duration.observe(elapsed.as_secs_f64());
        if let Some(reason) = failure {
            self.failures.with_label_values(&[reason]).inc();
        }
        let result = if status_ok.unwrap_or(false) { "pass" } else { "fail" };
        self.checks.with_label_values(&[STATUS_CHECK, result]).inc();
    }

    pub fn vu_started(&self) {
        self.vus.inc();
    }

    pub fn vu_finished(&self) {
        self.vus.dec();
    }

    pub fn iterations_total(&self) -> u64 {
        self.iterations.get()
    }

    pub fn failures_total(&self, reason: &str) -> u64 {
        self.failures.with_label_values(&[reason]).get()
    }

    pub fn checks_total(&self, passed: bool) -> u64 {
        let result = if passed { "pass" } else { "fail" };
        self.checks.with_label_values(&[STATUS_CHECK, result]).get()
    }

    pub fn active_vus(&self) -> i64 {
        self.vus.get()
    }

    /// Renders the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        ENCODER.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn format_type() -> &'static str {
        ENCODER.format_type()
    }
}
