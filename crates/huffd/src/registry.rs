//! Progress channel registry - maps (session, job) to a live event sink.
//!
//! The registry is the only state shared across connections:
//! - `connect` registers a sink and hands the receiving half to the transport
//! - `send` delivers best-effort and reports `NotConnected` instead of failing
//! - `disconnect` is idempotent
//!
//! Each connect is stamped with a fresh generation. `send` and `disconnect`
//! address a [`ChannelId`], so a job or handler left over from an earlier
//! connection of the same pair can never reach or tear down a newer one.
//!
//! Backed by DashMap, so each operation locks only the shard holding its key
//! and unrelated channels never wait on each other.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;

use crate::job::JobId;
use crate::protocol::JobEvent;

/// Identity of a progress channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    session: String,
    job_id: JobId,
}

impl ChannelKey {
    pub fn new(session: impl Into<String>, job_id: impl Into<JobId>) -> Self {
        Self {
            session: session.into(),
            job_id: job_id.into(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.job_id)
    }
}

/// One connection of a [`ChannelKey`], as returned by
/// [`ChannelRegistry::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelId {
    key: ChannelKey,
    generation: u64,
}

impl ChannelId {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub fn job_id(&self) -> &JobId {
        self.key.job_id()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key, self.generation)
    }
}

/// Receiving half of a channel, drained by the transport.
pub type EventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Outcome of a best-effort send.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No live sink: never connected, disconnected, or the client left.
    NotConnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel {0} is already connected")]
    Conflict(ChannelKey),
}

struct ChannelEntry {
    generation: u64,
    sender: mpsc::UnboundedSender<JobEvent>,
    connected_at: Instant,
}

pub struct ChannelRegistry {
    channels: DashMap<ChannelKey, ChannelEntry>,
    next_generation: AtomicU64,
}

impl ChannelRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a sink for `key`.
    ///
    /// A pair that is still registered is never overwritten, even if its
    /// client has gone away; it must be disconnected first.
    pub fn connect(&self, key: ChannelKey) -> Result<(ChannelId, EventReceiver), ChannelError> {
        match self.channels.entry(key) {
            Entry::Occupied(entry) => Err(ChannelError::Conflict(entry.key().clone())),
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let id = ChannelId {
                    key: entry.key().clone(),
                    generation,
                };
                let (sender, receiver) = mpsc::unbounded_channel();
                tracing::debug!(channel = %id, "Channel connected");
                entry.insert(ChannelEntry {
                    generation,
                    sender,
                    connected_at: Instant::now(),
                });
                Ok((id, receiver))
            }
        }
    }

    /// Deliver `event` if the sink registered as `id` is still live.
    ///
    /// A sink whose receiver was dropped is removed on the way out. A later
    /// connection of the same pair is `NotConnected` from `id`'s view.
    pub fn send(&self, id: &ChannelId, event: JobEvent) -> Delivery {
        let delivered = match self.channels.get(&id.key) {
            Some(entry) if entry.generation == id.generation => entry.sender.send(event).is_ok(),
            _ => return Delivery::NotConnected,
        };

        if delivered {
            Delivery::Delivered
        } else {
            if self
                .channels
                .remove_if(&id.key, |_, entry| {
                    entry.generation == id.generation && entry.sender.is_closed()
                })
                .is_some()
            {
                tracing::debug!(channel = %id, "Client left, channel dropped");
            }
            Delivery::NotConnected
        }
    }

    /// Remove the channel registered as `id`. No-op if it is absent or the
    /// pair has since been reconnected.
    pub fn disconnect(&self, id: &ChannelId) {
        if let Some((_, entry)) = self
            .channels
            .remove_if(&id.key, |_, entry| entry.generation == id.generation)
        {
            tracing::debug!(
                channel = %id,
                connected_for = ?entry.connected_at.elapsed(),
                "Channel disconnected"
            );
        }
    }

    pub fn is_connected(&self, key: &ChannelKey) -> bool {
        self.channels
            .get(key)
            .map(|entry| !entry.sender.is_closed())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self {
            channels: DashMap::new(),
            next_generation: AtomicU64::new(0),
        }
    }
}
