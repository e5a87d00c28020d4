//! WebSocket client for a huffd server.
//!
//! Each call opens a fresh channel at `{base_url}/ws/{session}/{job_id}`
//! with a new job id, sends one request and reads events until the
//! terminal one arrives.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use huffd::{CodeTable, EncodeResult, JobEvent, JobId, JobStatus, RequestEnvelope};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to connect to {url} after {attempts} attempts: {source}")]
    Connect {
        url: String,
        attempts: u32,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The server reported an `ERROR` event.
    #[error("{0}")]
    Job(String),
}

pub struct JobClient {
    base_url: String,
    session: String,
    attempts: u32,
    retry_delay: Duration,
}

impl JobClient {
    /// `base_url` is e.g. `ws://localhost:8000`.
    pub fn new(base_url: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: session.into(),
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = delay;
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn channel_url(&self, job_id: &JobId) -> String {
        format!("{}/ws/{}/{}", self.base_url, self.session, job_id)
    }

    async fn connect(&self, job_id: &JobId) -> Result<WsStream, ClientError> {
        let url = self.channel_url(job_id);
        let mut attempt = 1;
        loop {
            match connect_async(url.as_str()).await {
                Ok((ws, _response)) => {
                    tracing::debug!(url = %url, attempt, "Connected");
                    return Ok(ws);
                }
                Err(e) if attempt >= self.attempts => {
                    return Err(ClientError::Connect {
                        url,
                        attempts: attempt,
                        source: e,
                    });
                }
                Err(e) => {
                    tracing::warn!(url = %url, attempt, error = %e, "Connection failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Send `request` on a new channel and wait for its terminal event.
    ///
    /// `on_event` sees every event, terminal included. Returns the
    /// `COMPLETED` result; an `ERROR` event becomes [`ClientError::Job`].
    pub async fn submit<F>(
        &self,
        request: &RequestEnvelope,
        mut on_event: F,
    ) -> Result<serde_json::Value, ClientError>
    where
        F: FnMut(&JobEvent),
    {
        let job_id = JobId::generate();
        let mut ws = self.connect(&job_id).await?;

        let body = serde_json::to_string(request)
            .map_err(|e| ClientError::Protocol(format!("unserializable request: {e}")))?;
        ws.send(Message::Text(body)).await?;

        let outcome = loop {
            let Some(frame) = ws.next().await else {
                break Err(ClientError::Protocol(
                    "connection closed before the job finished".to_string(),
                ));
            };
            let text = match frame? {
                Message::Text(text) => text,
                Message::Close(_) => {
                    break Err(ClientError::Protocol(
                        "server closed the connection before the job finished".to_string(),
                    ));
                }
                _ => continue,
            };

            let event: JobEvent = serde_json::from_str(&text)
                .map_err(|e| ClientError::Protocol(format!("malformed event: {e}")))?;
            if event.task_id != job_id.as_str() {
                break Err(ClientError::Protocol(format!(
                    "event for task {} arrived on channel for {job_id}",
                    event.task_id
                )));
            }
            on_event(&event);

            match event.status {
                JobStatus::Completed => break Ok(event.result.unwrap_or_default()),
                JobStatus::Error => {
                    break Err(ClientError::Job(event.message.unwrap_or_default()));
                }
                JobStatus::Started | JobStatus::Progress => {}
            }
        };

        let _ = ws.close(None).await;
        outcome
    }

    pub async fn encode<F>(&self, data: &str, on_event: F) -> Result<EncodeResult, ClientError>
    where
        F: FnMut(&JobEvent),
    {
        let result = self.submit(&RequestEnvelope::encode(data), on_event).await?;
        serde_json::from_value(result)
            .map_err(|e| ClientError::Protocol(format!("unexpected encode result: {e}")))
    }

    pub async fn decode<F>(
        &self,
        data: &str,
        codes: &CodeTable,
        padding: u8,
        on_event: F,
    ) -> Result<String, ClientError>
    where
        F: FnMut(&JobEvent),
    {
        let result = self
            .submit(&RequestEnvelope::decode(data, codes, padding), on_event)
            .await?;
        result
            .get("result")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| ClientError::Protocol(format!("unexpected decode result: {result}")))
    }
}
