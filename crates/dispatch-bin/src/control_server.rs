//! Control socket.
//!
//! Clients connect to a Unix domain socket and send one command per line
//! (`start`, `stop`, `sent` or `{"command":"..."}`). Each line gets exactly
//! one JSON reply line: `{"status":200,"body":{...}}`.

use anyhow::Context;
use message_dispatch::{handle, ControlRequest, ControlResponse, DispatchEngine};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Serves the control commands for one engine.
pub struct ControlServer {
    socket_path: PathBuf,
    listener: UnixListener,
    engine: DispatchEngine,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ControlServer {
    /// Bind the socket, replacing a stale socket file and creating the
    /// parent directory. Must be called from within a tokio runtime.
    pub fn bind(socket_path: &Path, engine: DispatchEngine) -> anyhow::Result<Self> {
        if socket_path.exists() {
            std::fs::remove_file(socket_path).with_context(|| {
                format!("failed to remove stale socket {}", socket_path.display())
            })?;
        }

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("failed to bind {}", socket_path.display()))?;
        info!(path = %socket_path.display(), "Control socket listening");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        Ok(Self {
            socket_path: socket_path.to_path_buf(),
            listener,
            engine,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Sender that stops [`run`](Self::run).
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Accept connections until shutdown. Open connections are closed and
    /// the socket file is removed before returning.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            socket_path,
            listener,
            engine,
            shutdown_tx: _shutdown_tx,
            mut shutdown_rx,
        } = self;

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let engine = engine.clone();
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, &engine).await {
                                warn!(error = %e, "Control connection error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept error");
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Control connection task failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Control socket shutting down");
                    break;
                }
            }
        }

        connections.shutdown().await;
        drop(listener);
        if let Err(e) = std::fs::remove_file(&socket_path) {
            debug!(path = %socket_path.display(), error = %e, "Socket file already gone");
        }
        Ok(())
    }
}

async fn handle_connection(stream: UnixStream, engine: &DispatchEngine) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    debug!("Control client connected");

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            debug!("Control client disconnected");
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        debug!(request = %trimmed, "Control request");
        let response = execute(engine, trimmed).await;
        write_response(&mut writer, &response).await?;
    }
}

async fn execute(engine: &DispatchEngine, line: &str) -> ControlResponse {
    match line.parse::<ControlRequest>() {
        Ok(request) => handle(engine, request).await,
        Err(e) => ControlResponse::error(400, &e),
    }
}

async fn write_response<W>(out: &mut W, response: &ControlResponse) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    out.write_all(json.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await?;
    Ok(())
}

/// Send one command to a running service and return its reply.
pub async fn send_command(socket_path: &Path, command: &str) -> anyhow::Result<ControlResponse> {
    let command = command.trim();
    if command.is_empty() || command.contains('\n') {
        anyhow::bail!("command must be a single non-empty line");
    }

    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("failed to connect to {}", socket_path.display()))?;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    writer.write_all(command.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;

    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.is_empty() {
        anyhow::bail!("connection closed before a reply");
    }

    let response = serde_json::from_str(line.trim()).context("invalid reply")?;
    Ok(response)
}
