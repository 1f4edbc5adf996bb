use anyhow::Context;
use attendance_bot::server::{self, AppState};
use attendance_bot::sheets::{SheetsLedger, SheetsSession};
use attendance_bot::slack::{SlackClient, SocketModeReceiver};
use attendance_bot::{Config, Dispatcher};
use clap::Parser;
use reqwest::Client;
use std::{net::SocketAddr, sync::Arc};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_bot=info,attendance_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::parse();

    let http = Client::builder()
        .timeout(config.http_timeout())
        .build()
        .context("failed to build HTTP client")?;

    let chat = SlackClient::new(http.clone(), &config.bot_token, &config.slack_api_base);
    let session = SheetsSession::new(http.clone(), config.service_account(), &config.token_uri);
    let ledger = SheetsLedger::new(
        http.clone(),
        session,
        &config.sheets_api_base,
        &config.sheet_id,
    );

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(chat),
        Arc::new(ledger),
        &config.channel,
        config.reference_zone(),
        config.failure_policy(),
    ));

    let tasks = TaskTracker::new();
    let shutdown = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::select! {
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                _ = tokio::signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
            }
            shutdown.cancel();
        }
    });

    if let Some(app_token) = &config.app_token {
        info!(
            channel = %config.channel,
            retries = config.retries,
            notify_on_failure = config.notify_on_failure,
            "attendance bot is running in socket mode"
        );

        let receiver = SocketModeReceiver::new(http, app_token, &config.slack_api_base);
        let result = receiver
            .run(dispatcher, tasks.clone(), shutdown)
            .await;

        tasks.close();
        tasks.wait().await;
        return result.context("socket mode receiver failed");
    }

    let state = Arc::new(AppState {
        dispatcher,
        signing_secret: config.signing_secret.clone(),
        tasks: tasks.clone(),
    });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", config.host, config.port))?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(
        %addr,
        channel = %config.channel,
        retries = config.retries,
        notify_on_failure = config.notify_on_failure,
        "attendance bot is running"
    );

    server::serve(listener, server::router(state), tasks, shutdown)
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}
