//! Service wiring: open the store, connect the backends, run the engine.

use crate::config::ServiceConfig;
use crate::control_server::{send_command, ControlServer};
use anyhow::Context;
use message_database::{queries, AsyncDatabase, NewMessage};
use message_dispatch::{DispatchEngine, KvBackend, MemoryKv, RedisKv, WebhookClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connect to Redis, falling back to an in-process backend.
///
/// Rate limits and cached copies then live only as long as this process.
async fn connect_kv(redis_url: &str) -> Arc<dyn KvBackend> {
    let connected = tokio::time::timeout(REDIS_CONNECT_TIMEOUT, RedisKv::connect(redis_url)).await;
    match connected {
        Ok(Ok(kv)) => Arc::new(kv),
        Ok(Err(e)) => {
            warn!(
                redis_url = %redis_url,
                error = %e,
                "Redis unavailable, using in-memory rate limits and cache"
            );
            Arc::new(MemoryKv::new())
        }
        Err(_) => {
            warn!(
                redis_url = %redis_url,
                timeout_secs = REDIS_CONNECT_TIMEOUT.as_secs(),
                "Redis connect timed out, using in-memory rate limits and cache"
            );
            Arc::new(MemoryKv::new())
        }
    }
}

/// Run the dispatcher until Ctrl-C.
///
/// Control commands arrive on the Unix socket at `config.socket_path`; see
/// [`ControlServer`].
pub async fn run(config: ServiceConfig, paused: bool) -> anyhow::Result<()> {
    let db = AsyncDatabase::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    let kv = connect_kv(&config.redis_url).await;
    let transport = WebhookClient::new(
        config.dispatch.webhook_url.clone(),
        config.dispatch.request_timeout(),
    )?;

    info!(
        database = %config.database_path.display(),
        socket = %config.socket_path.display(),
        webhook_url = %config.dispatch.webhook_url,
        "Configuration loaded"
    );

    let engine = DispatchEngine::new(
        config.dispatch.clone(),
        Arc::new(db.clone()),
        kv,
        Arc::new(transport),
    )?;

    let server = ControlServer::bind(&config.socket_path, engine.clone())?;
    let server_shutdown = server.shutdown_sender();
    let server_task = tokio::spawn(server.run());

    if paused {
        info!("Starting paused; send `start` to begin processing");
    } else {
        engine.start()?;
    }

    let signal = tokio::signal::ctrl_c().await;
    info!("Received shutdown signal, exiting...");

    let _ = server_shutdown.send(());
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Control socket failed"),
        Err(e) => error!(error = %e, "Control socket task failed"),
    }

    engine.shutdown().await;
    db.close().await?;
    info!("dispatchd stopped");

    signal.context("failed to listen for shutdown signal")?;
    Ok(())
}

/// Send one control command to a running `dispatchd run` and print the reply.
pub async fn ctl(config: ServiceConfig, command: String) -> anyhow::Result<()> {
    let response = send_command(&config.socket_path, &command).await?;
    println!("{}", serde_json::to_string(&response.body)?);
    if !response.is_success() {
        anyhow::bail!("command failed with status {}", response.status);
    }
    Ok(())
}

/// Insert one pending message and print it.
pub async fn enqueue(config: ServiceConfig, to: String, content: String) -> anyhow::Result<()> {
    let db = AsyncDatabase::open(&config.database_path)
        .await
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;

    let message = db
        .call(move |conn| queries::insert_message(conn, &NewMessage::new(to, content)))
        .await?;
    info!(id = message.id, to = %message.to, "Message enqueued");

    println!("{}", serde_json::to_string(&message)?);
    db.close().await?;
    Ok(())
}
