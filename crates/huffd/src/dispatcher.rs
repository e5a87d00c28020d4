//! Job dispatcher - submits jobs to the worker pool and relays their events.
//!
//! Flow:
//! 1. `submit` emits STARTED on the caller's task
//! 2. A background task waits for a worker and runs the job on it
//! 3. The worker reports each checkpoint through an [`EventRelay`]
//! 4. The background task emits exactly one terminal event
//! 5. The caller awaits the [`JobHandle`] with a timeout
//!
//! A timed-out wait emits `ERROR "Task timed out"` and, under
//! [`TimeoutPolicy::Detach`], leaves the worker running. Whichever terminal
//! event is claimed first wins; later ones are dropped.

use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::job::{
    CancellationToken, CheckpointPlan, Job, JobError, JobOutput, JobState, ProgressReporter,
};
use crate::pool::WorkerPool;
use crate::protocol::{JobEvent, JobRequest, Operation};
use crate::registry::{ChannelId, ChannelRegistry, Delivery};

/// What happens to the worker when the caller's wait times out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// Leave the job running; its terminal event is dropped.
    #[default]
    Detach,
    /// Also fire the job's cancellation token; it stops at the next checkpoint.
    Cancel,
}

impl FromStr for TimeoutPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detach" => Ok(Self::Detach),
            "cancel" => Ok(Self::Cancel),
            other => Err(format!("unknown timeout policy {other:?} (expected detach|cancel)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Progress checkpoints per job; should divide 100.
    pub checkpoints: u8,
    /// Pause at each checkpoint.
    pub checkpoint_delay: Duration,
    pub timeout_policy: TimeoutPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            checkpoints: 5,
            checkpoint_delay: Duration::ZERO,
            timeout_policy: TimeoutPolicy::Detach,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Task timed out")]
    Timeout(Duration),

    #[error("Task error: {0}")]
    Job(#[from] JobError),

    #[error("Task error: job was lost before reporting a result")]
    Lost,
}

/// Turns job lifecycle transitions into registry events.
///
/// Holds the job state under a mutex so each transition is checked and its
/// event sent atomically; this is what keeps events ordered and the
/// terminal event unique. Events go to the one connection the job was
/// submitted for, never to a later connection of the same pair.
struct EventRelay {
    registry: Arc<ChannelRegistry>,
    channel: ChannelId,
    operation: Operation,
    state: StdMutex<JobState>,
}

impl EventRelay {
    fn new(registry: Arc<ChannelRegistry>, channel: ChannelId, operation: Operation) -> Self {
        Self {
            registry,
            channel,
            operation,
            state: StdMutex::new(JobState::Created),
        }
    }

    fn task_id(&self) -> &str {
        self.channel.job_id().as_str()
    }

    /// Apply `next` and send its event. `None` if the transition is illegal.
    fn transition(&self, next: JobState, event: JobEvent) -> Option<Delivery> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!(channel = %self.channel, "Job state mutex poisoned");
                poisoned.into_inner()
            }
        };
        if !state.accepts(next) {
            tracing::debug!(
                channel = %self.channel,
                from = ?*state,
                to = ?next,
                "Dropping event for illegal transition"
            );
            return None;
        }
        *state = next;
        Some(self.registry.send(&self.channel, event))
    }

    fn started(&self) -> Option<Delivery> {
        self.transition(
            JobState::Started,
            JobEvent::started(self.task_id(), self.operation),
        )
    }

    fn finish(&self, outcome: &Result<JobOutput, JobError>) -> Option<Delivery> {
        match outcome {
            Ok(output) => self.transition(
                JobState::Completed,
                JobEvent::completed(self.task_id(), self.operation, output.to_result()),
            ),
            Err(e) => self.failed(format!("Task error: {e}")),
        }
    }

    fn failed(&self, message: String) -> Option<Delivery> {
        self.transition(
            JobState::Failed,
            JobEvent::error(
                self.task_id(),
                Some(self.operation.to_string()),
                message,
            ),
        )
    }

}

impl ProgressReporter for EventRelay {
    fn report(&self, percent: u8) {
        let delivery = self.transition(
            JobState::Progress(percent),
            JobEvent::progress(self.task_id(), self.operation, percent),
        );
        tracing::trace!(channel = %self.channel, percent, ?delivery, "Progress");
    }
}

/// Handle to a submitted job for waiting and cancellation.
pub struct JobHandle {
    channel: ChannelId,
    timeout: Duration,
    policy: TimeoutPolicy,
    cancel_token: CancellationToken,
    relay: Arc<EventRelay>,
    result_rx: oneshot::Receiver<Result<JobOutput, JobError>>,
}

impl JobHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Wait for the terminal result, bounded by the submit timeout.
    ///
    /// On timeout the ERROR event is emitted here; the job keeps running
    /// unless the policy is [`TimeoutPolicy::Cancel`].
    pub async fn wait(self) -> Result<JobOutput, DispatchError> {
        match tokio::time::timeout(self.timeout, self.result_rx).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(e))) => Err(DispatchError::Job(e)),
            Ok(Err(_)) => {
                let _ = self.relay.failed(DispatchError::Lost.to_string());
                Err(DispatchError::Lost)
            }
            Err(_) => {
                tracing::warn!(
                    channel = %self.channel,
                    timeout = ?self.timeout,
                    policy = ?self.policy,
                    "Job wait timed out"
                );
                let _ = self.relay.failed(DispatchError::Timeout(self.timeout).to_string());
                if self.policy == TimeoutPolicy::Cancel {
                    self.cancel_token.cancel();
                }
                Err(DispatchError::Timeout(self.timeout))
            }
        }
    }
}

pub struct JobDispatcher {
    registry: Arc<ChannelRegistry>,
    pool: Arc<WorkerPool>,
    config: DispatchConfig,
}

impl JobDispatcher {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        pool: Arc<WorkerPool>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            registry,
            pool,
            config,
        }
    }

    /// Submit a validated request for the connection `channel`.
    ///
    /// STARTED is emitted before this returns. Must be called within a tokio runtime.
    pub fn submit(&self, channel: ChannelId, request: JobRequest, timeout: Duration) -> JobHandle {
        let operation = request.operation();
        let relay = Arc::new(EventRelay::new(
            Arc::clone(&self.registry),
            channel.clone(),
            operation,
        ));
        if relay.started() == Some(Delivery::NotConnected) {
            tracing::debug!(channel = %channel, "STARTED dropped, no live channel");
        }
        tracing::info!(channel = %channel, %operation, "Job submitted");

        let job = Job::new(channel.job_id().clone(), request);
        let plan = CheckpointPlan::new(self.config.checkpoints, self.config.checkpoint_delay);
        let cancel_token = CancellationToken::new();
        let (result_tx, result_rx) = oneshot::channel();

        let pool = Arc::clone(&self.pool);
        let worker_relay = Arc::clone(&relay);
        let worker_cancel = cancel_token.clone();
        let worker_channel = channel.clone();
        tokio::spawn(async move {
            let channel = worker_channel;
            let progress = Arc::clone(&worker_relay);
            let outcome = match pool
                .run(move || job.run(&plan, progress.as_ref(), &worker_cancel))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => Err(JobError::Worker(e.to_string())),
            };

            match &outcome {
                Ok(_) => tracing::info!(channel = %channel, %operation, "Job completed"),
                Err(e) => tracing::warn!(channel = %channel, %operation, error = %e, "Job failed"),
            }

            match worker_relay.finish(&outcome) {
                Some(Delivery::Delivered) => {}
                Some(Delivery::NotConnected) => {
                    tracing::debug!(channel = %channel, "Terminal event dropped, client gone")
                }
                None => {
                    tracing::debug!(channel = %channel, "Terminal event dropped, job already terminal")
                }
            }

            // Receiver is gone if the caller stopped waiting.
            let _ = result_tx.send(outcome);
        });

        JobHandle {
            channel,
            timeout,
            policy: self.config.timeout_policy,
            cancel_token,
            relay,
            result_rx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CodeTable;
    use crate::protocol::JobStatus;
    use crate::registry::{ChannelKey, EventReceiver};

    fn dispatcher(config: DispatchConfig) -> (Arc<ChannelRegistry>, JobDispatcher) {
        let registry = ChannelRegistry::new();
        let pool = Arc::new(WorkerPool::new(2));
        let dispatcher = JobDispatcher::new(Arc::clone(&registry), pool, config);
        (registry, dispatcher)
    }

    async fn drain(mut rx: EventReceiver) -> Vec<JobEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn encode(data: &str) -> JobRequest {
        JobRequest::Encode {
            data: data.to_string(),
        }
    }

    const WAIT: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn encode_emits_started_progress_completed() {
        let (registry, dispatcher) = dispatcher(DispatchConfig::default());
        let (channel, rx) = registry.connect(ChannelKey::new("user", "job-1")).unwrap();

        let handle = dispatcher.submit(channel.clone(), encode("aaab"), WAIT);
        let output = handle.wait().await.unwrap();
        registry.disconnect(&channel);

        let events = drain(rx).await;
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Started,
                JobStatus::Progress,
                JobStatus::Progress,
                JobStatus::Progress,
                JobStatus::Progress,
                JobStatus::Progress,
                JobStatus::Completed,
            ]
        );
        let percents: Vec<u8> = events.iter().filter_map(|e| e.progress).collect();
        assert_eq!(percents, vec![20, 40, 60, 80, 100]);

        let completed = events.last().unwrap();
        assert_eq!(completed.task_id, "job-1");
        assert_eq!(completed.operation.as_deref(), Some("encode"));
        assert_eq!(completed.result.as_ref(), Some(&output.to_result()));
        assert_eq!(completed.result.as_ref().unwrap()["padding"], 4);
    }

    #[tokio::test]
    async fn undecodable_payload_emits_single_error() {
        let (registry, dispatcher) = dispatcher(DispatchConfig::default());
        let (channel, rx) = registry.connect(ChannelKey::new("user", "job-2")).unwrap();

        // 0xFF never matches a table that only knows "00".
        let request = JobRequest::Decode {
            data: "/w==".to_string(),
            codes: CodeTable::from_codes([('a', "00".to_string())].into_iter().collect()),
            padding: 0,
        };
        let err = dispatcher
            .submit(channel.clone(), request, WAIT)
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Job(JobError::Codec(_))));
        registry.disconnect(&channel);

        let events = drain(rx).await;
        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, JobStatus::Error);
        assert_eq!(terminal[0].operation.as_deref(), Some("decode"));
        assert!(
            terminal[0]
                .message
                .as_deref()
                .unwrap()
                .starts_with("Task error: ")
        );
        assert!(!events.iter().any(|e| e.status == JobStatus::Completed));
    }

    #[tokio::test]
    async fn submit_without_channel_still_runs() {
        let (registry, dispatcher) = dispatcher(DispatchConfig::default());
        let (channel, rx) = registry.connect(ChannelKey::new("ghost", "job-3")).unwrap();
        drop(rx);
        registry.disconnect(&channel);

        let output = dispatcher.submit(channel, encode("abc"), WAIT).wait().await;
        assert!(output.is_ok());
        assert!(registry.is_empty());
    }

    fn slow_config(policy: TimeoutPolicy) -> DispatchConfig {
        DispatchConfig {
            checkpoints: 5,
            checkpoint_delay: Duration::from_millis(60),
            timeout_policy: policy,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_detaches_and_drops_late_terminal() {
        let (registry, dispatcher) = dispatcher(slow_config(TimeoutPolicy::Detach));
        let (channel, mut rx) = registry.connect(ChannelKey::new("user", "slow")).unwrap();

        let handle = dispatcher.submit(channel.clone(), encode("slow job"), Duration::from_millis(50));
        let cancel = handle.cancel_token();
        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        assert!(!cancel.is_cancelled());

        // Let the detached worker finish while the channel is still open.
        tokio::time::sleep(Duration::from_millis(500)).await;
        registry.disconnect(&channel);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].status, JobStatus::Error);
        assert_eq!(terminal[0].message.as_deref(), Some("Task timed out"));
        // Nothing after the terminal event.
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_with_cancel_policy_fires_token() {
        let (registry, dispatcher) = dispatcher(slow_config(TimeoutPolicy::Cancel));
        let (channel, _rx) = registry.connect(ChannelKey::new("user", "cancel-me")).unwrap();

        let handle = dispatcher.submit(channel, encode("slow job"), Duration::from_millis(50));
        let cancel = handle.cancel_token();
        assert!(matches!(
            handle.wait().await,
            Err(DispatchError::Timeout(_))
        ));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_jobs_do_not_cross_channels() {
        let (registry, dispatcher) = dispatcher(DispatchConfig::default());
        let dispatcher = Arc::new(dispatcher);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let key = ChannelKey::new(format!("session-{}", i % 2), format!("job-{i}"));
            let (channel, rx) = registry.connect(key.clone()).unwrap();
            let dispatcher = Arc::clone(&dispatcher);
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let data = "x".repeat(i + 1);
                dispatcher
                    .submit(channel.clone(), encode(&data), WAIT)
                    .wait()
                    .await
                    .unwrap();
                registry.disconnect(&channel);
                (key, drain(rx).await)
            }));
        }

        for task in tasks {
            let (key, events) = task.await.unwrap();
            assert_eq!(events.len(), 7);
            assert!(events.iter().all(|e| e.task_id == key.job_id().as_str()));
        }
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stale_job_never_reaches_reconnected_pair() {
        let (registry, dispatcher) = dispatcher(slow_config(TimeoutPolicy::Detach));
        let key = ChannelKey::new("user", "reused");

        let (first, first_rx) = registry.connect(key.clone()).unwrap();
        let first_job = dispatcher.submit(first.clone(), encode("aaaaaaab"), WAIT);

        // First client leaves mid-job; the pair is freed and reconnected.
        drop(first_rx);
        registry.disconnect(&first);
        let (second, second_rx) = registry.connect(key.clone()).unwrap();

        let second_output = dispatcher
            .submit(second.clone(), encode("xyz"), WAIT)
            .wait()
            .await
            .unwrap();
        first_job.wait().await.unwrap();
        assert!(registry.is_connected(&key));
        registry.disconnect(&second);

        let events = drain(second_rx).await;
        let statuses: Vec<_> = events.iter().map(|e| e.status).collect();
        assert_eq!(statuses.first(), Some(&JobStatus::Started));
        assert_eq!(statuses.iter().filter(|s| **s == JobStatus::Started).count(), 1);
        let percents: Vec<u8> = events.iter().filter_map(|e| e.progress).collect();
        assert_eq!(percents, vec![20, 40, 60, 80, 100]);

        let terminal: Vec<_> = events.iter().filter(|e| e.is_terminal()).collect();
        assert_eq!(terminal.len(), 1);
        assert_eq!(terminal[0].result.as_ref(), Some(&second_output.to_result()));
        assert_eq!(
            terminal[0].result.as_ref().unwrap()["huffman_codes"]
                .as_object()
                .unwrap()
                .len(),
            3
        );
    }

    #[test]
    fn timeout_policy_parses() {
        assert_eq!("detach".parse::<TimeoutPolicy>(), Ok(TimeoutPolicy::Detach));
        assert_eq!("CANCEL".parse::<TimeoutPolicy>(), Ok(TimeoutPolicy::Cancel));
        assert!("abort".parse::<TimeoutPolicy>().is_err());
    }

    #[test]
    fn dispatch_error_messages() {
        assert_eq!(
            DispatchError::Timeout(Duration::from_secs(30)).to_string(),
            "Task timed out"
        );
        assert_eq!(
            DispatchError::Job(JobError::Cancelled).to_string(),
            "Task error: job was cancelled"
        );
    }
}
