//! huffd: Huffman encode/decode job server with per-job progress channels.

pub mod codec;
pub mod config;
pub mod dispatcher;
mod health;
pub mod job;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod transport;
mod version;

pub use codec::{CodeTable, CodecError, EncodedPayload};
pub use config::{ConfigError, Overrides, Settings};
pub use dispatcher::{DispatchConfig, DispatchError, JobDispatcher, JobHandle, TimeoutPolicy};
pub use health::Health;
pub use job::{CancellationToken, JobError, JobId, JobOutput, JobState};
pub use pool::{PoolError, WorkerPool};
pub use protocol::{
    DecodeResult, EncodeResult, JobEvent, JobRequest, JobStatus, Operation, RequestEnvelope,
    RequestError,
};
pub use registry::{ChannelError, ChannelId, ChannelKey, ChannelRegistry, Delivery, EventReceiver};
pub use service::{HealthSnapshot, JobFlowOutcome, JobService};
pub use version::{HUFFD_VERSION, VersionInfo};
