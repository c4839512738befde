use std::sync::Arc;
use std::time::Duration;

use certload_common::config::Variables;
use certload_common::CertloadError;
use certload_core::harness::{run, LoadPlan};
use certload_core::issuer::client;
use certload_core::scenario::setup;
use certload_core::{IssueScenario, Payload};
use certload_mock::{spawn, MockAuthority, StatusCode};
use certload_obs::Metrics;
use tokio::sync::watch;

fn variables(base_url: String) -> Variables {
    let mut vars = Variables::default();
    vars.pyadcs.base_url = base_url;
    vars.pyadcs.authority_uuid = Some("abc-123".into());
    vars
}

async fn scenario_against(authority: MockAuthority) -> Arc<IssueScenario> {
    let (addr, _srv) = spawn(authority).await.unwrap();
    let c = client(Duration::from_secs(5)).unwrap();
    Arc::new(IssueScenario::new(
        c,
        variables(format!("http://{}", addr)),
        Payload::from(r#"{"pkcs10":"MIIC"}"#),
    ))
}

#[test]
fn plan_defaults_to_one_iteration() {
    let plan = LoadPlan::new(1, None, None).unwrap();
    assert_eq!(plan, LoadPlan::default());
    assert_eq!(plan.iterations, Some(1));

    let timed = LoadPlan::new(4, None, Some(Duration::from_secs(1))).unwrap();
    assert_eq!(timed.iterations, None);
}

#[test]
fn plan_rejects_empty_limits() {
    assert!(matches!(LoadPlan::new(0, Some(1), None), Err(CertloadError::InvalidPlan(_))));
    assert!(matches!(LoadPlan::new(1, Some(0), None), Err(CertloadError::InvalidPlan(_))));
    assert!(matches!(
        LoadPlan::new(1, None, Some(Duration::ZERO)),
        Err(CertloadError::InvalidPlan(_))
    ));
}

#[test]
fn setup_produces_millisecond_run_id() {
    let data = setup();
    let millis: u128 = data.run_id.parse().unwrap();
    assert!(millis > 1_600_000_000_000);
}

#[test]
fn payload_is_read_once_from_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("issue.json");
    std::fs::write(&path, br#"{"pkcs10":"abc"}"#).unwrap();

    let mut vars = Variables::default();
    vars.pyadcs.payload_path = Some(path.clone());
    let c = client(Duration::from_secs(1)).unwrap();
    let scenario = IssueScenario::from_variables(c, vars).unwrap();
    assert_eq!(scenario.payload(), &Payload::from(br#"{"pkcs10":"abc"}"#.to_vec()));

    std::fs::remove_file(&path).unwrap();
    assert_eq!(scenario.payload().len(), 16);
}

#[test]
fn missing_or_unreadable_payload_fails_at_startup() {
    let c = client(Duration::from_secs(1)).unwrap();
    let err = IssueScenario::from_variables(c.clone(), Variables::default()).unwrap_err();
    assert!(matches!(err, CertloadError::MissingVariable("PAYLOAD_PATH")));

    let mut vars = Variables::default();
    vars.pyadcs.payload_path = Some("/nonexistent/issue.json".into());
    let err = IssueScenario::from_variables(c, vars).unwrap_err();
    assert!(matches!(err, CertloadError::PayloadRead { .. }));
}

#[tokio::test]
async fn iteration_budget_is_shared_across_vus() {
    let authority = MockAuthority::new();
    let scenario = scenario_against(authority.clone()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let (_stop_tx, stop_rx) = watch::channel(false);

    let plan = LoadPlan::new(3, Some(10), None).unwrap();
    let summary = run(scenario, plan, setup(), metrics.clone(), stop_rx).await;

    assert_eq!(summary.iterations, 10);
    assert_eq!(summary.passed, 10);
    assert_eq!(summary.failed, 0);
    assert_eq!(authority.requests(), 10);
    assert_eq!(authority.last_request().unwrap().authority_uuid, "abc-123");
    assert_eq!(metrics.iterations_total(), 10);
    assert_eq!(metrics.checks_total(true), 10);
    assert_eq!(metrics.active_vus(), 0);
}

#[tokio::test]
async fn failed_iterations_are_counted_and_the_run_continues() {
    let authority = MockAuthority::failing(StatusCode::INTERNAL_SERVER_ERROR);
    let scenario = scenario_against(authority.clone()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let (_stop_tx, stop_rx) = watch::channel(false);

    let plan = LoadPlan::new(2, Some(6), None).unwrap();
    let summary = run(scenario, plan, setup(), metrics.clone(), stop_rx).await;

    assert_eq!(summary.passed, 0);
    assert_eq!(summary.failed, 6);
    assert_eq!(summary.failures["status"], 6);
    assert_eq!(summary.failures["transport"], 0);
    assert_eq!(authority.requests(), 6);
    assert_eq!(metrics.failures_total("status"), 6);
    assert_eq!(metrics.checks_total(false), 6);
    assert!(summary.to_string().contains("status: 6"));
}

#[tokio::test]
async fn duration_plan_stops_at_deadline() {
    let authority = MockAuthority::new();
    let scenario = scenario_against(authority.clone()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let (_stop_tx, stop_rx) = watch::channel(false);

    let plan = LoadPlan::new(2, None, Some(Duration::from_millis(200))).unwrap();
    let summary = run(scenario, plan, setup(), metrics, stop_rx).await;

    assert!(summary.iterations > 0);
    assert_eq!(summary.failed, 0);
    assert!(summary.elapsed >= Duration::from_millis(200));
    assert_eq!(authority.requests() as u64, summary.iterations);
}

#[tokio::test]
async fn both_limits_first_wins() {
    let authority = MockAuthority::new();
    let scenario = scenario_against(authority.clone()).await;
    let (_stop_tx, stop_rx) = watch::channel(false);

    let plan = LoadPlan::new(2, Some(5), Some(Duration::from_secs(30))).unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let summary = run(scenario.clone(), plan, setup(), metrics, stop_rx.clone()).await;
    assert_eq!(summary.iterations, 5);
    assert_eq!(authority.requests(), 5);
    assert!(summary.elapsed < Duration::from_secs(10));

    let plan = LoadPlan::new(2, Some(u64::MAX), Some(Duration::from_millis(150))).unwrap();
    let metrics = Arc::new(Metrics::new().unwrap());
    let summary = run(scenario, plan, setup(), metrics, stop_rx).await;
    assert!(summary.iterations > 0);
    assert!(summary.elapsed >= Duration::from_millis(150));
    assert!(summary.elapsed < Duration::from_secs(10));
    assert_eq!(authority.requests() as u64, 5 + summary.iterations);
}

#[tokio::test]
async fn stop_signal_prevents_new_iterations() {
    let authority = MockAuthority::new();
    let scenario = scenario_against(authority.clone()).await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let (stop_tx, stop_rx) = watch::channel(false);
    stop_tx.send(true).unwrap();

    let plan = LoadPlan::new(4, Some(100), None).unwrap();
    let summary = run(scenario, plan, setup(), metrics, stop_rx).await;

    assert_eq!(summary.iterations, 0);
    assert_eq!(authority.requests(), 0);
}
