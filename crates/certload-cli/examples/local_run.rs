use std::sync::Arc;
use std::time::Duration;

use certload_common::config::Variables;
use certload_core::harness::{run, LoadPlan};
use certload_core::{issuer, scenario, IssueScenario, Payload};
use certload_mock::MockAuthority;
use certload_obs::Metrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let n: u64 = std::env::var("N").ok().and_then(|v| v.parse().ok()).unwrap_or(64);
    let vus: usize = std::env::var("VUS").ok().and_then(|v| v.parse().ok()).unwrap_or(8);

    let authority = MockAuthority::new();
    let (addr, _srv) = certload_mock::spawn(authority.clone()).await?;

    let mut variables = Variables::default();
    variables.pyadcs.base_url = format!("http://{}", addr);
    variables.pyadcs.authority_uuid = Some("local-authority".into());
    let scenario = IssueScenario::new(
        issuer::client(Duration::from_secs(10))?,
        variables,
        Payload::from(r#"{"pkcs10":"MIIC","raProfileAttributes":[]}"#),
    );

    let (_stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let summary = run(
        Arc::new(scenario),
        LoadPlan::new(vus, Some(n), None)?,
        scenario::setup(),
        Arc::new(Metrics::new()?),
        stop_rx,
    )
    .await;
    println!("{}", summary);
    println!("mock served {} requests", authority.requests());
    Ok(())
}
