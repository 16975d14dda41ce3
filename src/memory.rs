//! In-memory loopback transport
//!
//! A [`PirClient`] that routes published payloads to every live subscriber
//! of a topic within the same process. Like a real PIR backend, publications
//! are stored: a subscriber polling a topic first receives the retained
//! payloads, then live traffic. Used by the binary's default mode and by the
//! test suite; it records every handle release so tests can assert the
//! exactly-once release discipline, and exposes a publish-failure switch for
//! exercising the recoverable error path.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::TransportError;
use crate::transport::{Handle, PirClient, Topic};

/// Buffer size for subscriber channels
const SUBSCRIBER_BUFFER_SIZE: usize = 64;

/// Retained publications per topic
const TOPIC_HISTORY_LIMIT: usize = 64;

struct Subscriber {
    handle: Uuid,
    tx: mpsc::Sender<Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    /// Topic id -> live subscribers
    subs: HashMap<Uuid, Vec<Subscriber>>,
    /// Topic id -> retained publications, oldest first
    history: HashMap<Uuid, Vec<Vec<u8>>>,
    /// Every handle id ever passed to `done`, in call order
    released: Vec<Uuid>,
    fail_publish: bool,
}

/// In-process loopback PIR client
#[derive(Default)]
pub struct MemoryClient {
    inner: Mutex<Inner>,
}

impl MemoryClient {
    /// Create an empty loopback client
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle ids released via `done`, in call order
    pub fn releases(&self) -> Vec<Uuid> {
        match self.inner.lock() {
            Ok(inner) => inner.released.clone(),
            Err(poisoned) => poisoned.into_inner().released.clone(),
        }
    }

    /// Make subsequent `publish` calls fail (or succeed again)
    pub fn set_fail_publish(&self, fail: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_publish = fail;
        }
    }

    /// Number of live subscribers on a topic
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.subs.get(&topic.id).map_or(0, Vec::len),
            Err(_) => 0,
        }
    }
}

#[async_trait]
impl PirClient for MemoryClient {
    async fn new_topic(&self) -> Result<Topic, TransportError> {
        Ok(Topic::new())
    }

    async fn publish(&self, topic: &Topic, payload: &[u8]) -> Result<(), TransportError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| TransportError::Publish("transport state poisoned".into()))?;
        if inner.fail_publish {
            return Err(TransportError::Publish("transport offline".into()));
        }
        let history = inner.history.entry(topic.id).or_default();
        history.push(payload.to_vec());
        if history.len() > TOPIC_HISTORY_LIMIT {
            history.remove(0);
        }
        if let Some(subs) = inner.subs.get_mut(&topic.id) {
            // Dead subscribers are dropped lazily; a full buffer drops the
            // payload for that subscriber only.
            subs.retain(|s| !s.tx.is_closed());
            for sub in subs.iter() {
                let _ = sub.tx.try_send(payload.to_vec());
            }
        }
        Ok(())
    }

    fn poll(&self, handle: &Handle) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER_SIZE);
        if let Ok(mut inner) = self.inner.lock() {
            // Retrieval semantics: replay retained publications first.
            if let Some(history) = inner.history.get(&handle.topic) {
                for payload in history {
                    let _ = tx.try_send(payload.clone());
                }
            }
            inner.subs.entry(handle.topic).or_default().push(Subscriber {
                handle: handle.id,
                tx,
            });
        }
        rx
    }

    fn done(&self, handle: &Handle) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.released.push(handle.id);
            if let Some(subs) = inner.subs.get_mut(&handle.topic) {
                // Dropping the sender closes the subscriber's source.
                if let Some(pos) = subs.iter().position(|s| s.handle == handle.id) {
                    subs.remove(pos);
                }
            }
        }
    }
}
