//! Job identity, lifecycle state, and checkpointed execution.

use std::fmt;
use std::ops::Range;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
pub use tokio_util::sync::CancellationToken;

use crate::codec::{CodeTable, CodecError, Decoder, EncodedPayload, Encoder};
use crate::protocol::{DecodeResult, EncodeResult, JobRequest, Operation};

/// Opaque per-submission identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Random UUID v4 token.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle: `Created → Started → Progress* → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Started,
    Progress(u8),
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether `next` is a legal successor. Progress must strictly increase.
    pub fn accepts(&self, next: JobState) -> bool {
        match (*self, next) {
            (Self::Created, Self::Started) => true,
            (Self::Started, Self::Progress(_)) => true,
            (Self::Progress(prev), Self::Progress(pct)) => pct > prev,
            (Self::Started | Self::Progress(_), Self::Completed | Self::Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("payload is not valid base64: {0}")]
    InvalidPayload(#[from] base64::DecodeError),

    #[error("job was cancelled")]
    Cancelled,

    #[error("worker failed: {0}")]
    Worker(String),
}

/// Receives progress percentages from a running job.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: u8);
}

/// Splits work into evenly sized checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointPlan {
    count: u8,
    delay: Duration,
}

impl CheckpointPlan {
    /// `count` is clamped to `1..=100` so percentages stay strictly increasing.
    pub fn new(count: u8, delay: Duration) -> Self {
        Self {
            count: count.clamp(1, 100),
            delay,
        }
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    /// `(range, percent)` per checkpoint over `total` units of work.
    ///
    /// Ranges tile `0..total` exactly; the last percent is always 100.
    pub fn steps(&self, total: usize) -> impl Iterator<Item = (Range<usize>, u8)> + use<> {
        let count = usize::from(self.count);
        (0..count).map(move |i| {
            let range = (i * total / count)..((i + 1) * total / count);
            let percent = ((i + 1) * 100 / count) as u8;
            (range, percent)
        })
    }
}

impl Default for CheckpointPlan {
    fn default() -> Self {
        Self::new(5, Duration::ZERO)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutput {
    Encoded(EncodeResult),
    Decoded(String),
}

impl JobOutput {
    /// Value for `COMPLETED.result`. Decoded text is wrapped as `{"result": ...}`.
    pub fn to_result(&self) -> serde_json::Value {
        let value = match self {
            Self::Encoded(result) => serde_json::to_value(result),
            Self::Decoded(text) => serde_json::to_value(DecodeResult {
                result: text.clone(),
            }),
        };
        value.unwrap_or(serde_json::Value::Null)
    }
}

/// A unit of codec work, owned by the worker executing it.
#[derive(Debug, Clone)]
pub struct Job {
    id: JobId,
    request: JobRequest,
}

impl Job {
    pub fn new(id: JobId, request: JobRequest) -> Self {
        Self { id, request }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn operation(&self) -> Operation {
        self.request.operation()
    }

    /// Run to completion, reporting after every checkpoint.
    ///
    /// Cancellation is only observed between checkpoints.
    pub fn run(
        self,
        plan: &CheckpointPlan,
        progress: &dyn ProgressReporter,
        cancel: &CancellationToken,
    ) -> Result<JobOutput, JobError> {
        match self.request {
            JobRequest::Encode { data } => run_encode(&data, plan, progress, cancel),
            JobRequest::Decode {
                data,
                codes,
                padding,
            } => run_decode(&data, &codes, padding, plan, progress, cancel),
        }
    }
}

fn checkpoint(plan: &CheckpointPlan, cancel: &CancellationToken) -> Result<(), JobError> {
    if cancel.is_cancelled() {
        return Err(JobError::Cancelled);
    }
    if !plan.delay.is_zero() {
        std::thread::sleep(plan.delay);
    }
    Ok(())
}

fn run_encode(
    data: &str,
    plan: &CheckpointPlan,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<JobOutput, JobError> {
    let table = CodeTable::build(data);
    let symbols: Vec<char> = data.chars().collect();

    let mut encoder = Encoder::new(&table);
    for (range, percent) in plan.steps(symbols.len()) {
        checkpoint(plan, cancel)?;
        encoder.push(symbols[range].iter().copied())?;
        progress.report(percent);
    }

    let payload = encoder.finish();
    Ok(JobOutput::Encoded(EncodeResult {
        encoded_data: STANDARD.encode(payload.data()),
        padding: payload.padding(),
        huffman_codes: table,
    }))
}

fn run_decode(
    data: &str,
    codes: &CodeTable,
    padding: u8,
    plan: &CheckpointPlan,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<JobOutput, JobError> {
    let payload = EncodedPayload::new(STANDARD.decode(data)?, padding)?;
    let mut decoder = Decoder::new(codes)?;

    for (range, percent) in plan.steps(payload.bit_len()) {
        checkpoint(plan, cancel)?;
        decoder.push_bits(payload.bits(range))?;
        progress.report(percent);
    }

    Ok(JobOutput::Decoded(decoder.finish()?))
}
