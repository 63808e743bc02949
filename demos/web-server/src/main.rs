//! Demo server: a durable message log served over WebSocket.
//!
//! Run with: cargo run -p backscroll-web-server
//!
//! Then open http://localhost:8080 in your browser. Each click on
//! "Load older" pulls the next page; new messages stream in live.

mod config;
mod producers;

use std::{net::SocketAddr, path::PathBuf};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use backscroll_core::LogStore;
use backscroll_session::{MessageLog, storage::RedbStore};
use backscroll_transport::create_ws_router;
use clap::Parser;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(
    name = "backscroll-server",
    about = "Message log with paginated history and live updates"
)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Database path, overrides the config file
    #[arg(long)]
    db: Option<PathBuf>,
    /// Do not start the simulated producers
    #[arg(long)]
    no_simulation: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(db) = self.db {
            config.store.path = db;
        }
        if self.no_simulation {
            config.simulation.enabled = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Args::parse().into_config()?;

    tracing::info!("Setting up data store...");
    let store = RedbStore::open(config.store.clone()).context("Error setting up data store")?;
    let log = MessageLog::new(store, config.session.clone());

    let producers = if config.simulation.enabled {
        producers::spawn_all(&log, &config.simulation)
    } else {
        Vec::new()
    };

    // Build router
    let app = Router::new()
        .route("/", get(index_handler))
        .merge(create_ws_router(log.clone()))
        .layer(CorsLayer::permissive());

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    tracing::info!("Server listening on http://{}", config.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(log))
        .await?;

    for producer in producers {
        producer.abort();
    }
    Ok(())
}

/// Wait for Ctrl-C, then end every open session.
async fn shutdown_signal<S: LogStore>(log: MessageLog<S>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    log.shutdown();
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Backscroll - Messages</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            color: #d4d4d4;
            font-family: system-ui, sans-serif;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        .status {
            color: #888;
            font-size: 14px;
            margin-bottom: 10px;
        }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
        #messages {
            font-family: Menlo, Monaco, "Courier New", monospace;
            font-size: 13px;
            height: calc(100vh - 160px);
            overflow-y: auto;
        }
        .live { color: #6af; }
        button {
            background: #333;
            color: #ddd;
            border: 1px solid #555;
            padding: 6px 12px;
            cursor: pointer;
        }
    </style>
</head>
<body>
    <h1>Backscroll</h1>
    <div class="status" id="status">Connecting...</div>
    <div id="messages"></div>
    <button id="older">Load older</button>

    <script>
        const status = document.getElementById('status');
        const list = document.getElementById('messages');
        let ws;

        function row(msg, live) {
            const div = document.createElement('div');
            div.textContent = `${msg.timestamp}  ${msg.body}`;
            if (live) div.className = 'live';
            return div;
        }

        function connect() {
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/messages`);

            ws.onopen = () => {
                status.textContent = 'Connected';
                status.className = 'status connected';
                list.replaceChildren();
                ws.send('pull');
            };

            ws.onclose = () => {
                status.textContent = 'Disconnected - reconnecting...';
                status.className = 'status disconnected';
                setTimeout(connect, 2000);
            };

            ws.onerror = (err) => {
                console.error('WebSocket error:', err);
            };

            // The first frame answers the initial pull; afterwards a frame is
            // either a page (after a click) or a live batch.
            let awaitingPage = true;
            document.getElementById('older').onclick = () => {
                awaitingPage = true;
                ws.send('pull');
            };

            ws.onmessage = (event) => {
                const batch = JSON.parse(event.data);
                if (batch === null) {
                    awaitingPage = false;
                    status.textContent = 'Connected - failed to load messages';
                    return;
                }
                if (awaitingPage) {
                    awaitingPage = false;
                    for (const msg of batch) list.appendChild(row(msg, false));
                    if (batch.length === 0) status.textContent = 'Connected - no older messages';
                } else {
                    for (const msg of batch) list.prepend(row(msg, true));
                }
            };
        }

        connect();
    </script>
</body>
</html>
"#;
