use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use orderbridge_core::config::BridgeConfig;
use orderbridge_core::events::ORDER_CDC_TOPIC;
use orderbridge_engine::{
    ApprovalPublisher, ChangeStreamSubscriber, OrderQueryService, ReconnectPolicy, Translator,
};
use orderbridge_salesforce::http::build_client;
use orderbridge_salesforce::{
    CometdChangeStream, PasswordGrantAuthenticator, RestEventPublisher, RestQueryClient,
};
use orderbridge_server::{BridgeServices, ServerConfig};
use orderbridge_telemetry::{init_telemetry, TelemetryConfig};

/// Bridges order change events to WebSocket sessions and relays
/// manufacturing approvals back as platform events.
#[derive(Debug, Parser)]
#[command(name = "orderbridge", version)]
struct Cli {
    /// Address to bind (overrides BRIDGE_HOST).
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides BRIDGE_PORT).
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = BridgeConfig::from_env().context("invalid configuration")?;
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let telemetry = init_telemetry(TelemetryConfig {
        json: config.log_json,
        ..TelemetryConfig::default()
    });
    let metrics = telemetry.metrics();

    tracing::info!(
        login_url = %config.login_url,
        api_version = %config.api_version,
        "starting order bridge"
    );

    let http = build_client(config.http_timeout).context("failed to build HTTP client")?;
    let credentials = Arc::new(PasswordGrantAuthenticator::new(
        http.clone(),
        config.token_url(),
        config.grant.clone(),
        config.http_timeout,
    ));

    let stream_source = Arc::new(CometdChangeStream::new(
        credentials.clone(),
        config.api_version.clone(),
    ));
    let stream = ChangeStreamSubscriber::new(stream_source, ReconnectPolicy::default())
        .with_metrics(metrics.clone())
        .connect(ORDER_CDC_TOPIC)
        .await
        .context("could not subscribe to order change events")?;

    let publisher = Arc::new(RestEventPublisher::new(
        http.clone(),
        credentials.clone(),
        config.api_version.clone(),
        config.http_timeout,
    ));
    let approvals = ApprovalPublisher::new(publisher, config.user_id.clone())
        .with_dedup_window(config.dedup_window)
        .with_metrics(metrics.clone());

    let query = Arc::new(RestQueryClient::new(
        http,
        config.api_version.clone(),
        config.http_timeout,
    ));
    let orders = OrderQueryService::new(credentials, query);

    let services = BridgeServices {
        events: stream.event_source(),
        stream_state: stream.watch_state(),
        translator: Arc::new(Translator::default()),
        approvals: Arc::new(approvals),
        orders: Arc::new(orders),
        metrics,
    };
    let server_config = ServerConfig {
        host: config.host.clone(),
        port: config.port,
        ..ServerConfig::default()
    };
    let server = orderbridge_server::start(server_config, services)
        .await
        .with_context(|| format!("failed to bind {}:{}", config.host, config.port))?;

    tracing::info!(port = server.port, "order bridge ready");

    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl+c")?;
            tracing::info!("shutting down");
            Ok(())
        }
        reason = stream.failed() => {
            tracing::error!(reason = %reason, "change stream lost for good");
            Err(anyhow::anyhow!("change stream failed: {reason}"))
        }
    };

    server.shutdown().await;
    stream.shutdown().await;
    outcome
}
