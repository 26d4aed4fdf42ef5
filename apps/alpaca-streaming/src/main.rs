//! Alpaca Streaming Binary
//!
//! Streams trades, quotes, and minute bars for a few symbols and logs them,
//! optionally alongside the account's trade updates.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin alpaca-streaming -- AAPL MSFT
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `ALPACA_API_KEY` (or `ALPACA_KEY`): Alpaca API key
//! - `ALPACA_API_SECRET` (or `ALPACA_SECRET`): Alpaca API secret
//!
//! ## Optional
//! - `ALPACA_STREAM`: iex | sip | crypto (default: iex)
//! - `ALPACA_TRADE_UPDATES`: paper | live | off (default: off)
//! - `ALPACA_STREAM_METRICS_PORT`: Prometheus metrics port, 0 = off (default: 0)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use alpaca_streaming::infrastructure::alpaca::messages::SubscriptionAck;
use alpaca_streaming::infrastructure::telemetry;
use alpaca_streaming::{
    ClientConfig, MessageEnvelope, StopHandle, StreamEndpoint, StreamError, StreamSession,
    SubscriptionSet, WebSocketConnector, handler_fn, init_metrics,
};
use anyhow::Context;
use tokio::signal;
use tokio::task::JoinSet;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Symbols streamed when none are given on the command line.
const DEFAULT_SYMBOLS: [&str; 2] = ["AAPL", "MSFT"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Alpaca streaming client");

    let config = ClientConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if let Some(addr) = init_metrics(config.metrics_port)? {
        tracing::info!(%addr, "Prometheus metrics listening");
    }

    let symbols = symbols_from_args();

    let mut tasks = JoinSet::new();
    let mut stop_handles = Vec::new();

    let market = market_data_session(&config);
    stop_handles.push(market.stop_handle());
    tasks.spawn(stream_market_data(market, symbols));

    if let Some(endpoint) = config.trade_updates {
        let trading = trade_updates_session(endpoint, &config);
        stop_handles.push(trading.stop_handle());
        tasks.spawn(stream_trade_updates(trading));
    }

    let interrupted = tokio::select! {
        () = await_shutdown() => true,
        () = drain(&mut tasks) => false,
    };

    if interrupted {
        stop_all(&stop_handles);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, drain(&mut tasks)).await.is_err() {
            // Stop is only observed between frames; a quiet feed never yields one.
            tracing::warn!("Sessions did not stop in time, aborting");
            tasks.abort_all();
        }
    } else {
        tracing::warn!("All sessions ended");
    }

    tracing::info!("Alpaca streaming client stopped");
    Ok(())
}

// =============================================================================
// Sessions
// =============================================================================

fn market_data_session(config: &ClientConfig) -> StreamSession<WebSocketConnector> {
    let mut session = StreamSession::websocket(
        config.endpoint,
        config.credentials.clone(),
        config.stream.clone(),
    );

    session
        .on_trade(handler_fn(|msg| {
            tracing::info!(
                symbol = msg.symbol().unwrap_or_default(),
                price = ?msg.field("p"),
                size = ?msg.field("s"),
                "Trade"
            );
            Ok(())
        }))
        .on_quote(handler_fn(|msg| {
            tracing::debug!(
                symbol = msg.symbol().unwrap_or_default(),
                bid = ?msg.field("bp"),
                ask = ?msg.field("ap"),
                "Quote"
            );
            Ok(())
        }))
        .on_bar(handler_fn(|msg| {
            tracing::info!(
                symbol = msg.symbol().unwrap_or_default(),
                open = ?msg.field("o"),
                close = ?msg.field("c"),
                volume = ?msg.field("v"),
                "Bar"
            );
            Ok(())
        }));

    register_lifecycle_logging(&mut session);
    session
}

fn trade_updates_session(
    endpoint: StreamEndpoint,
    config: &ClientConfig,
) -> StreamSession<WebSocketConnector> {
    let mut session = StreamSession::websocket(
        endpoint,
        config.credentials.clone(),
        config.stream.clone(),
    );

    session.on_trade_update(handler_fn(|msg| {
        let data = msg.field("data");
        tracing::info!(
            event = ?data.and_then(|d| d.get("event")),
            order_id = ?data.and_then(|d| d.pointer("/order/id")),
            "Trade update"
        );
        Ok(())
    }));

    register_lifecycle_logging(&mut session);
    session
}

fn register_lifecycle_logging(session: &mut StreamSession<WebSocketConnector>) {
    let endpoint = session.endpoint();
    session
        .on_error(handler_fn(move |msg| {
            tracing::error!(
                endpoint = %endpoint,
                code = ?msg.code(),
                message = msg.message().unwrap_or_default(),
                "Stream error"
            );
            Ok(())
        }))
        .on_connect(handler_fn(move |_| {
            tracing::info!(endpoint = %endpoint, "Stream connected");
            Ok(())
        }))
        .on_disconnect(handler_fn(move |_| {
            tracing::info!(endpoint = %endpoint, "Stream disconnected");
            Ok(())
        }));
}

async fn stream_market_data(
    mut session: StreamSession<WebSocketConnector>,
    symbols: Vec<String>,
) -> Result<(), StreamError> {
    session.connect().await?;

    let selection = SubscriptionSet::new()
        .with_trades(&symbols)
        .with_quotes(&symbols)
        .with_bars(&symbols);
    let ack = session.subscribe(&selection).await?;
    match ack.deserialize::<SubscriptionAck>() {
        Ok(confirmed) => tracing::info!(
            symbols = confirmed.to_set().len(),
            "Server confirmed subscriptions"
        ),
        Err(_) => log_ack(&ack),
    }

    let result = session.run_forever().await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Market data session ended");
    }
    result
}

async fn stream_trade_updates(
    mut session: StreamSession<WebSocketConnector>,
) -> Result<(), StreamError> {
    session.connect().await?;
    let ack = session.listen_trade_updates().await?;
    log_ack(&ack);

    let result = session.run_forever().await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Trade updates session ended");
    }
    result
}

fn log_ack(ack: &MessageEnvelope) {
    tracing::info!(kind = %ack.kind(), payload = %ack.payload(), "Request acknowledged");
}

fn stop_all(handles: &[StopHandle]) {
    for handle in handles {
        handle.stop();
    }
}

async fn drain(tasks: &mut JoinSet<Result<(), StreamError>>) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Session finished with error"),
            Err(e) => tracing::error!(error = %e, "Session task failed"),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn symbols_from_args() -> Vec<String> {
    let symbols: Vec<String> = std::env::args()
        .skip(1)
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    if symbols.is_empty() {
        DEFAULT_SYMBOLS.iter().map(|s| (*s).to_string()).collect()
    } else {
        symbols
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        endpoint = config.endpoint.as_str(),
        trade_updates = config.trade_updates.map(StreamEndpoint::as_str),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        auto_reconnect = config.stream.auto_reconnect,
        max_reconnect_attempts = config.stream.max_reconnect_attempts,
        reconnect_delay_max_secs = config.stream.reconnect_delay_max.as_secs(),
        keepalive_interval_secs = config.stream.keepalive_interval.as_secs(),
        "Stream settings"
    );
}

/// Load .env file from the current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
