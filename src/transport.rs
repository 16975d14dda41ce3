//! PIR transport boundary
//!
//! The gateway never talks to the PIR scheme directly; it consumes the small
//! capability surface defined here. `Topic` is a publication point, `Handle`
//! a poll/subscribe capability for one topic, and `PirClient` the client the
//! surrounding process provides (the in-memory loopback in [`crate::memory`]
//! implements it for local runs and tests).

use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;

/// A publication point in the PIR transport
///
/// Holding a `Topic` grants the ability to publish under it. The serialized
/// form doubles as the out-of-band invite token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic identity
    pub id: Uuid,
    /// Shared key material for the publication point
    pub key: [u8; 32],
}

impl Topic {
    /// Create a topic with a fresh identity and random key
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            id: Uuid::new_v4(),
            key,
        }
    }

    /// Mint a fresh subscription handle for this topic
    pub fn handle(&self) -> Handle {
        Handle {
            id: Uuid::new_v4(),
            topic: self.id,
        }
    }
}

impl Default for Topic {
    fn default() -> Self {
        Self::new()
    }
}

/// An opaque subscription capability for one topic
///
/// Identity is the handle's own `id`: two handles on the same topic are
/// distinct capabilities and are released independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handle {
    /// Handle identity
    pub id: Uuid,
    /// The topic this handle subscribes to
    pub topic: Uuid,
}

/// Capability surface provided by the external PIR client
///
/// The room engine assumes at most one active source per handle: it calls
/// `poll` at most once over a handle's lifetime and `done` exactly once,
/// on removal or on cancel teardown.
#[async_trait]
pub trait PirClient: Send + Sync {
    /// Allocate a fresh publication point
    async fn new_topic(&self) -> Result<Topic, TransportError>;

    /// Publish bytes under a topic; failure is recoverable
    async fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), TransportError>;

    /// Obtain the readable source of inbound payloads for a handle
    fn poll(&self, handle: &Handle) -> mpsc::Receiver<Vec<u8>>;

    /// Release a subscription handle
    fn done(&self, handle: &Handle);
}
