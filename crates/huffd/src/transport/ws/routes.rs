//! HTTP and WebSocket route handlers.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use serde::Serialize;

use crate::health::Health;
use crate::protocol::JobEvent;
use crate::registry::{ChannelId, ChannelKey};
use crate::service::{HealthSnapshot, JobFlowOutcome, JobService};
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct WorkerCounts {
    pub available: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: Health,
    pub workers: WorkerCounts,
    pub channels: usize,
    pub version: VersionInfo,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.state,
            workers: WorkerCounts {
                available: snapshot.available_workers,
                total: snapshot.total_workers,
            },
            channels: snapshot.channels,
            version: snapshot.version,
        }
    }
}

async fn health_check(State(service): State<Arc<JobService>>) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn shutdown(State(service): State<Arc<JobService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

async fn job_socket(
    ws: WebSocketUpgrade,
    Path((session, job_id)): Path<(String, String)>,
    State(service): State<Arc<JobService>>,
) -> impl IntoResponse {
    let key = ChannelKey::new(session, job_id);
    ws.on_upgrade(move |socket| handle_socket(socket, key, service))
}

/// Drive one channel from connect to close.
///
/// 1. Connect the channel; a conflicting connect gets one ERROR frame and is closed
/// 2. Spawn a sender task forwarding registry events to the socket
/// 3. Read the first text frame as the request and run the job flow
/// 4. Disconnect this connection; the sender drains what is left, then closes the socket
async fn handle_socket(socket: WebSocket, key: ChannelKey, service: Arc<JobService>) {
    let (mut sink, mut stream) = socket.split();

    let (channel, mut rx) = match service.registry().connect(key.clone()) {
        Ok(connection) => connection,
        Err(e) => {
            tracing::warn!(channel = %key, error = %e, "Rejecting WebSocket connection");
            let event = JobEvent::error(key.job_id().as_str(), None, e.to_string());
            if let Some(msg) = event_message(&event) {
                let _ = sink.send(msg).await;
            }
            let _ = sink.close().await;
            return;
        }
    };
    tracing::info!(channel = %channel, "WebSocket connected");

    let sender_channel = channel.clone();
    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Some(msg) = event_message(&event) else {
                continue;
            };
            if sink.send(msg).await.is_err() {
                tracing::debug!(channel = %sender_channel, "WebSocket sink closed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    match next_request(&mut stream, &channel).await {
        Some(raw) => match service.run_job(&channel, &raw).await {
            JobFlowOutcome::Completed(_) => {
                tracing::debug!(channel = %channel, "Job flow completed")
            }
            JobFlowOutcome::Failed(message) | JobFlowOutcome::Rejected(message) => {
                tracing::debug!(channel = %channel, %message, "Job flow ended with error")
            }
            JobFlowOutcome::TimedOut => tracing::debug!(channel = %channel, "Job flow timed out"),
        },
        None => tracing::debug!(channel = %channel, "Client left before sending a request"),
    }

    // Only this connection's entry; the pair may already belong to a newer one.
    service.registry().disconnect(&channel);
    if let Err(e) = send_task.await {
        tracing::warn!(channel = %channel, error = %e, "WebSocket sender task failed");
    }
    tracing::info!(channel = %channel, "WebSocket disconnected");
}

/// First text (or UTF-8 binary) frame; `None` if the client goes away first.
async fn next_request(stream: &mut SplitStream<WebSocket>, channel: &ChannelId) -> Option<String> {
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Text(text)) => return Some(text.as_str().to_owned()),
            Ok(Message::Binary(bytes)) => {
                return Some(String::from_utf8_lossy(&bytes).into_owned());
            }
            Ok(Message::Close(_)) => return None,
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                tracing::trace!(channel = %channel, "Control frame received");
            }
            Err(e) => {
                tracing::debug!(channel = %channel, error = %e, "WebSocket receive error");
                return None;
            }
        }
    }
    None
}

fn event_message(event: &JobEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, task_id = %event.task_id, "Failed to serialize event");
            None
        }
    }
}

pub fn routes(service: Arc<JobService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .route("/ws/{session}/{job_id}", get(job_socket))
        .with_state(service)
}
