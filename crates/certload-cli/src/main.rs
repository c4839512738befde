use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use certload_common::config::Variables;
use certload_common::duration::parse_duration;
use certload_core::harness::{self, LoadPlan};
use certload_core::{issuer, scenario, IssueScenario};
use certload_mock::MockAuthority;
use certload_obs::Metrics;
use clap::{Args, Parser, Subcommand};
use opentelemetry_otlp::WithExportConfig;
use tokio::sync::watch;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "warn,certload=info";

#[derive(Parser, Debug)]
#[command(name = "certload", version, about = "Load generator for certificate issue endpoints")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the issue scenario against BASE_URL
    Run(RunArgs),
    /// Serve a stand-in issue endpoint for local runs
    Mock(MockArgs),
    /// Print the resolved configuration
    Config,
    Version,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Concurrent virtual users
    #[arg(long, env = "CERTLOAD_VUS", default_value_t = 1)]
    vus: usize,
    /// Total iterations shared by all VUs
    #[arg(short = 'n', long, env = "CERTLOAD_ITERATIONS")]
    iterations: Option<u64>,
    /// Run length, e.g. 30s or 5m
    #[arg(short, long, env = "CERTLOAD_DURATION", value_parser = parse_duration)]
    duration: Option<Duration>,
    /// Per-request timeout
    #[arg(long, env = "CERTLOAD_TIMEOUT", default_value = "60s", value_parser = parse_duration)]
    timeout: Duration,
    /// Serve Prometheus metrics on this address during the run
    #[arg(long, env = "CERTLOAD_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[derive(Args, Debug)]
struct MockArgs {
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: SocketAddr,
    /// Status code to answer every issue request with
    #[arg(long, default_value_t = 200)]
    status: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_load(args).await,
        Commands::Mock(args) => serve_mock(args).await,
        Commands::Config => print_config(),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_load(args: RunArgs) -> anyhow::Result<()> {
    let variables = Variables::from_env().context("resolving configuration")?;
    let plan = LoadPlan::new(args.vus, args.iterations, args.duration)?;
    let client = issuer::client(args.timeout).context("building HTTP client")?;
    let scenario = IssueScenario::from_variables(client, variables)?;

    let metrics = Arc::new(Metrics::new()?);
    if let Some(addr) = args.metrics_addr {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding metrics endpoint {addr}"))?;
        tracing::info!("metrics on http://{}/metrics", addr);
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_metrics(listener, metrics).await {
                tracing::error!(error = %err, "metrics endpoint stopped");
            }
        });
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stop signal received, finishing in-flight iterations");
            let _ = stop_tx.send(true);
        }
    });

    let data = scenario::setup();
    let summary = harness::run(Arc::new(scenario), plan, data, metrics, stop_rx).await;
    println!("{}", summary);
    Ok(())
}

async fn serve_mock(args: MockArgs) -> anyhow::Result<()> {
    let status = StatusCode::from_u16(args.status).context("invalid --status")?;
    let authority = if status == StatusCode::OK {
        MockAuthority::new()
    } else {
        MockAuthority::failing(status)
    };
    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .with_context(|| format!("binding {}", args.addr))?;
    tracing::info!(
        "mock authority listening on http://{} (status {})",
        args.addr,
        authority.status()
    );
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    certload_mock::serve(listener, authority, shutdown).await?;
    Ok(())
}

fn print_config() -> anyhow::Result<()> {
    let variables = Variables::from_env()?;
    print!("{}", render_config(&variables)?);
    Ok(())
}

fn render_config(variables: &Variables) -> anyhow::Result<String> {
    serde_yaml::to_string(variables).context("rendering configuration")
}

fn metrics_router(metrics: Arc<Metrics>) -> Router {
    Router::new().route("/metrics", get(metrics_handler)).with_state(metrics)
}

async fn serve_metrics(
    listener: tokio::net::TcpListener,
    metrics: Arc<Metrics>,
) -> std::io::Result<()> {
    axum::serve(listener, metrics_router(metrics)).await
}

async fn metrics_handler(State(metrics): State<Arc<Metrics>>) -> impl IntoResponse {
    match metrics.encode() {
        Ok(text) => (
            StatusCode::OK,
            [("content-type", Metrics::format_type().to_string())],
            text,
        ),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain".to_string())],
            err.to_string(),
        ),
    }
}

/// Console logging, plus span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is set.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let tracer = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok().and_then(|endpoint| {
        opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .map_err(|err| eprintln!("OTLP export disabled: {err}"))
            .ok()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(tracer.map(|tracer| OpenTelemetryLayer::new(tracer)))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_args_parse_durations() {
        let cli = Cli::try_parse_from([
            "certload", "run", "--vus", "5", "-n", "100", "--duration", "30s", "--timeout", "10s",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.vus, 5);
                assert_eq!(args.iterations, Some(100));
                assert_eq!(args.duration, Some(Duration::from_secs(30)));
                assert_eq!(args.timeout, Duration::from_secs(10));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(Cli::try_parse_from(["certload", "run", "--duration", "soon"]).is_err());
    }

    #[test]
    fn default_filter_is_valid() {
        assert!(DEFAULT_FILTER.parse::<EnvFilter>().is_ok());
    }

    #[test]
    fn config_renders_resolved_variables() {
        let mut variables = Variables::default();
        variables.pyadcs.authority_uuid = Some("abc-123".into());
        variables.pyadcs.logging.enabled = true;

        let text = render_config(&variables).unwrap();
        assert!(text.contains("baseUrl: http://localhost:8000"), "got: {text}");
        assert!(text.contains("authorityUuid: abc-123"), "got: {text}");
        assert!(text.contains("enabled: true"), "got: {text}");
    }

    #[tokio::test]
    async fn metrics_endpoint_serves_run_counters() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_iteration(Duration::from_millis(3), None, Some(true));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_metrics(listener, metrics));

        let res = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(res.status().as_u16(), 200);
        let body = res.text().await.unwrap();
        assert!(body.contains("certload_iterations_total 1"), "got: {body}");
    }
}
