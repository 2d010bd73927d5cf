//! Local IPC for live wake-ups and blocking waits.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. One JSON object per line in each
//! direction.
//!
//! ## Protocol
//!
//! Request:
//! ```json
//! {"command": "ping"}
//! {"command": "stats"}
//! {"command": "wait", "filter_sql": "type = 'message'", "timeout_secs": 30, "after_id": 120}
//! ```
//!
//! Response:
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "..."}
//! ```
//!
//! Short-lived callers never need this for append/query — only for live
//! wake-ups. A caller that cannot reach the socket falls back to polling
//! the store directly.

use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::filter::{validate_raw, Filter};
use crate::persistence::{EventStore, SubscriptionRepo};
use crate::{AppError, Result};

/// Inbound IPC request.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb: `ping`, `stats`, or `wait`.
    command: String,
    /// Rendered filter predicate (for `wait`).
    filter_sql: Option<String>,
    /// Wait timeout in seconds (for `wait`).
    timeout_secs: Option<u64>,
    /// Starting cursor; defaults to the current log head (for `wait`).
    after_id: Option<i64>,
}

/// Outbound IPC response.
#[derive(Debug, Serialize, Deserialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Shared state for IPC handlers.
pub struct IpcContext {
    /// Event store shared with the daemon loop.
    pub store: EventStore,
    /// Subscription repository (for `stats`).
    pub subscriptions: SubscriptionRepo,
    /// Wake signal from the daemon loop: fires with the latest event id.
    pub notify_tx: broadcast::Sender<i64>,
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    ctx: Arc<IpcContext>,
    ipc_name: &str,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = ipc_name.to_owned();
    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let ctx = Arc::clone(&ctx);
                                tokio::spawn(handle_connection(stream, ctx));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
///
/// A dropped connection simply ends the loop — any in-flight wait is
/// abandoned with it, releasing the watch without leaking resources.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    ctx: Arc<IpcContext>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &ctx).await,
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the appropriate handler.
async fn dispatch_command(request: &IpcRequest, ctx: &Arc<IpcContext>) -> IpcResponse {
    match request.command.as_str() {
        "ping" => IpcResponse::success(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
        })),
        "stats" => handle_stats(ctx).await,
        "wait" => handle_wait(request, ctx).await,
        other => IpcResponse::error(format!("unknown command: {other}")),
    }
}

async fn handle_stats(ctx: &Arc<IpcContext>) -> IpcResponse {
    let max_id = match ctx.store.max_event_id().await {
        Ok(id) => id,
        Err(err) => return IpcResponse::error(format!("stats failed: {err}")),
    };
    let subscriptions = match ctx.subscriptions.list().await {
        Ok(subs) => subs.len(),
        Err(err) => return IpcResponse::error(format!("stats failed: {err}")),
    };
    IpcResponse::success(serde_json::json!({
        "max_event_id": max_id,
        "subscriptions": subscriptions,
    }))
}

/// Block the connection (not the daemon) until a matching event or timeout.
async fn handle_wait(request: &IpcRequest, ctx: &Arc<IpcContext>) -> IpcResponse {
    let Some(ref filter_sql) = request.filter_sql else {
        return IpcResponse::error("missing required 'filter_sql' field");
    };
    if let Err(err) = validate_raw(filter_sql) {
        return IpcResponse::error(err.to_string());
    }

    let after_id = match request.after_id {
        Some(id) => id,
        None => match ctx.store.max_event_id().await {
            Ok(id) => id,
            Err(err) => return IpcResponse::error(format!("wait failed: {err}")),
        },
    };
    let timeout = Duration::from_secs(request.timeout_secs.unwrap_or(60));
    let deadline = Instant::now() + timeout;

    let mut filter = Filter::new();
    filter.raw(filter_sql.clone());
    let mut rx = ctx.notify_tx.subscribe();

    loop {
        match ctx.store.tail(after_id, &filter, 1).await {
            Ok(events) => {
                if let Some(event) = events.into_iter().next() {
                    return match event.to_wire() {
                        Ok(wire) => IpcResponse::success(serde_json::json!({ "event": wire })),
                        Err(err) => IpcResponse::error(err.to_string()),
                    };
                }
            }
            Err(err) => return IpcResponse::error(format!("wait query failed: {err}")),
        }

        let now = Instant::now();
        if now >= deadline {
            return IpcResponse::success(serde_json::json!({ "timed_out": true }));
        }
        // Wake on the daemon's signal; re-check periodically anyway in case
        // a notification was dropped under broadcast lag.
        let nap = deadline.saturating_duration_since(now).min(Duration::from_secs(1));
        let _ = tokio::time::timeout(nap, rx.recv()).await;
    }
}

/// Outcome of a daemon-assisted wait, as seen by the client.
#[derive(Debug, Clone)]
pub enum DaemonWaitReply {
    /// A matching event arrived; wire-format JSON.
    Matched(serde_json::Value),
    /// The timeout elapsed first.
    TimedOut,
}

/// Ask the daemon to perform a blocking wait on our behalf.
///
/// # Errors
///
/// Returns `AppError::Ipc` when the daemon is unreachable or replies with
/// an error — callers fall back to direct polling.
pub async fn client_wait(
    ipc_name: &str,
    filter_sql: &str,
    after_id: i64,
    timeout: Duration,
) -> Result<DaemonWaitReply> {
    let request = serde_json::json!({
        "command": "wait",
        "filter_sql": filter_sql,
        "timeout_secs": timeout.as_secs(),
        "after_id": after_id,
    });
    let response = roundtrip(ipc_name, &request).await?;
    let data = response
        .data
        .ok_or_else(|| AppError::Ipc("daemon wait reply had no data".into()))?;
    if data.get("timed_out").and_then(serde_json::Value::as_bool) == Some(true) {
        return Ok(DaemonWaitReply::TimedOut);
    }
    data.get("event")
        .cloned()
        .map(DaemonWaitReply::Matched)
        .ok_or_else(|| AppError::Ipc("daemon wait reply missing event".into()))
}

/// Check whether a daemon is listening on the socket.
///
/// # Errors
///
/// Returns `AppError::Ipc` when the daemon is unreachable.
pub async fn client_ping(ipc_name: &str) -> Result<()> {
    roundtrip(ipc_name, &serde_json::json!({"command": "ping"})).await?;
    Ok(())
}

async fn roundtrip(ipc_name: &str, request: &serde_json::Value) -> Result<IpcResponse> {
    let name = ipc_name
        .to_owned()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name: {err}")))?;
    let stream = interprocess::local_socket::tokio::Stream::connect(name)
        .await
        .map_err(|err| AppError::Ipc(format!("daemon unreachable: {err}")))?;

    let (reader, mut writer) = stream.split();
    let mut line = serde_json::to_string(request)
        .map_err(|err| AppError::Ipc(format!("serialize request: {err}")))?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|err| AppError::Ipc(format!("write to daemon failed: {err}")))?;

    let mut buf_reader = BufReader::new(reader);
    let mut reply = String::new();
    buf_reader
        .read_line(&mut reply)
        .await
        .map_err(|err| AppError::Ipc(format!("read from daemon failed: {err}")))?;

    let response: IpcResponse = serde_json::from_str(reply.trim())
        .map_err(|err| AppError::Ipc(format!("invalid daemon reply: {err}")))?;
    if response.ok {
        Ok(response)
    } else {
        Err(AppError::Ipc(
            response.error.unwrap_or_else(|| "daemon error".into()),
        ))
    }
}
