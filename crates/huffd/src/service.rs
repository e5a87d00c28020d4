//! JobService: transport-agnostic job flow.
//!
//! This service owns:
//! - The channel registry shared by every connection
//! - The worker pool and the dispatcher feeding it
//! - Health reporting and shutdown coordination
//!
//! Transports connect a channel, hand the raw request to [`JobService::run_job`],
//! and forward whatever the registry delivers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::Settings;
use crate::dispatcher::{DispatchError, JobDispatcher};
use crate::health::Health;
use crate::job::JobOutput;
use crate::pool::WorkerPool;
use crate::protocol::{JobEvent, JobRequest, RequestEnvelope, RequestError};
use crate::registry::{ChannelId, ChannelRegistry, Delivery};
use crate::version::VersionInfo;

const SHUTTING_DOWN: &str = "Server is shutting down";

/// How a single request flow ended, from the transport's point of view.
#[derive(Debug)]
pub enum JobFlowOutcome {
    Completed(JobOutput),
    /// The job ran and failed; carries the client-visible message.
    Failed(String),
    TimedOut,
    /// Refused before any job was created.
    Rejected(String),
}

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: Health,
    pub available_workers: usize,
    pub total_workers: usize,
    pub channels: usize,
    pub version: VersionInfo,
}

impl HealthSnapshot {
    pub fn is_ready(&self) -> bool {
        self.state == Health::Ready
    }

    /// BUSY state: every worker in use.
    pub fn is_busy(&self) -> bool {
        self.state == Health::Busy
    }
}

pub struct JobService {
    registry: Arc<ChannelRegistry>,
    pool: Arc<WorkerPool>,
    dispatcher: JobDispatcher,
    job_timeout: Duration,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    version: VersionInfo,
}

impl JobService {
    pub fn new(settings: &Settings) -> Self {
        let registry = ChannelRegistry::new();
        let pool = Arc::new(WorkerPool::new(settings.workers));
        let dispatcher = JobDispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&pool),
            settings.dispatch.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(
            workers = pool.num_workers(),
            job_timeout = ?settings.job_timeout,
            checkpoints = settings.dispatch.checkpoints,
            timeout_policy = ?settings.dispatch.timeout_policy,
            "Job service configured"
        );

        Self {
            registry,
            pool,
            dispatcher,
            job_timeout: settings.job_timeout,
            shutdown_tx,
            shutdown_rx,
            version: VersionInfo::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    /// Run one request for an already connected channel.
    ///
    /// Validation failures are reported as a single `ERROR` event and never
    /// reach the dispatcher. Otherwise every event comes from the dispatcher.
    pub async fn run_job(&self, channel: &ChannelId, raw: &str) -> JobFlowOutcome {
        if !self.state().accepts_jobs() {
            return self.reject(channel, None, SHUTTING_DOWN.to_string());
        }

        let envelope = match RequestEnvelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => return self.reject_request(channel, None, e),
        };
        let operation = envelope.operation.clone();
        let request = match JobRequest::try_from(envelope) {
            Ok(request) => request,
            Err(e) => return self.reject_request(channel, operation, e),
        };

        let handle = self.dispatcher.submit(channel.clone(), request, self.job_timeout);
        match handle.wait().await {
            Ok(output) => JobFlowOutcome::Completed(output),
            Err(DispatchError::Timeout(_)) => JobFlowOutcome::TimedOut,
            Err(e) => JobFlowOutcome::Failed(e.to_string()),
        }
    }

    fn reject_request(
        &self,
        channel: &ChannelId,
        operation: Option<String>,
        error: RequestError,
    ) -> JobFlowOutcome {
        tracing::info!(channel = %channel, error = ?error, "Request rejected");
        self.reject(channel, operation, error.to_string())
    }

    fn reject(
        &self,
        channel: &ChannelId,
        operation: Option<String>,
        message: String,
    ) -> JobFlowOutcome {
        let event = JobEvent::error(channel.job_id().as_str(), operation, message.clone());
        if self.registry.send(channel, event) == Delivery::NotConnected {
            tracing::debug!(channel = %channel, "Rejection dropped, no live channel");
        }
        JobFlowOutcome::Rejected(message)
    }

    fn state(&self) -> Health {
        if self.is_shutting_down() {
            Health::ShuttingDown
        } else if self.pool.available() == 0 {
            Health::Busy
        } else {
            Health::Ready
        }
    }

    pub fn health(&self) -> HealthSnapshot {
        HealthSnapshot {
            state: self.state(),
            available_workers: self.pool.available(),
            total_workers: self.pool.num_workers(),
            channels: self.registry.len(),
            version: self.version.clone(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Stop accepting work. Jobs already on a worker run to completion.
    pub fn shutdown(&self) {
        self.trigger_shutdown();
        self.pool.close();
    }
}
