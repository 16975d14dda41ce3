//! Participant registry and wait-set builder
//!
//! `Roster` holds a room's active and pending participants in a stable
//! order. `sync_sources` reconciles the multiplexed wait-set with the
//! roster: it creates a message source for any entry seen for the first
//! time and leaves existing sources untouched, so that two calls without a
//! membership change yield wait-sets referencing identical sources.

use std::collections::HashSet;

use std::pin::Pin;

use futures_util::stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{StreamExt, StreamMap};
use tracing::debug;

use crate::participant::Participant;
use crate::transport::{Handle, PirClient};
use crate::types::SourceId;

/// One event from a participant's message source
#[derive(Debug)]
pub enum SourceEvent {
    /// An inbound payload
    Payload(Vec<u8>),
    /// The source closed without an explicit remove or cancel
    Closed,
}

/// Stream of events from one participant's source
pub type SourceStream = Pin<Box<dyn Stream<Item = SourceEvent> + Send + Sync + 'static>>;

/// The multiplexed wait-set: one stream per roster entry, keyed by source id
pub type WaitSet = StreamMap<SourceId, SourceStream>;

/// Per-room participant registry
///
/// A participant appears in at most one of the two lists at a time. The
/// room's event loop is the sole writer.
#[derive(Debug, Default)]
pub struct Roster {
    participants: Vec<Participant>,
    pending: Vec<Participant>,
}

impl Roster {
    /// Build a roster from deserialized membership lists
    pub fn new(participants: Vec<Participant>, pending: Vec<Participant>) -> Self {
        Self {
            participants,
            pending,
        }
    }

    /// Append an active participant
    pub fn push_active(&mut self, p: Participant) {
        self.participants.push(p);
    }

    /// Append a pending invitee
    pub fn push_pending(&mut self, p: Participant) {
        self.pending.push(p);
    }

    /// Number of active participants
    pub fn active_len(&self) -> usize {
        self.participants.len()
    }

    /// Number of pending invitees
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Active participants, in membership order
    pub fn active(&self) -> &[Participant] {
        &self.participants
    }

    /// Pending invitees, in invite order
    pub fn pending(&self) -> &[Participant] {
        &self.pending
    }

    /// All entries, active first, then pending
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().chain(self.pending.iter())
    }

    /// Find the owner of a source by identity (active or pending)
    ///
    /// Positions shift as membership changes, so attribution goes through
    /// the cached source identity, never a positional index.
    pub fn owner_of(&self, source: SourceId) -> Option<&Participant> {
        self.iter().find(|p| p.source == Some(source))
    }

    /// Move the pending entry with this source into the active list
    ///
    /// Adopts the accepted nickname if one is given. Returns false if no
    /// pending entry owns the source.
    pub fn activate(&mut self, source: SourceId, nickname: &str) -> bool {
        let Some(pos) = self.pending.iter().position(|p| p.source == Some(source)) else {
            return false;
        };
        let mut p = self.pending.remove(pos);
        if !nickname.is_empty() {
            p.nickname = nickname.to_string();
        }
        self.participants.push(p);
        true
    }

    /// Remove the entry (active or pending) with this handle
    pub fn remove_by_handle(&mut self, handle: &Handle) -> Option<Participant> {
        if let Some(pos) = self.participants.iter().position(|p| &p.handle == handle) {
            return Some(self.participants.remove(pos));
        }
        if let Some(pos) = self.pending.iter().position(|p| &p.handle == handle) {
            return Some(self.pending.remove(pos));
        }
        None
    }

    /// Take every entry, active and pending, for teardown
    pub fn drain_all(&mut self) -> Vec<Participant> {
        let mut all = std::mem::take(&mut self.participants);
        all.append(&mut self.pending);
        all
    }

    /// Reconcile the wait-set with the roster
    ///
    /// Creates a source for every entry that lacks one and drops wait-set
    /// entries that no longer belong to anyone. Existing sources keep their
    /// identity. Invoked only after a membership change.
    pub fn sync_sources(&mut self, client: &dyn PirClient, wait_set: &mut WaitSet) {
        for p in self
            .participants
            .iter_mut()
            .chain(self.pending.iter_mut())
        {
            if p.source.is_none() {
                let id = SourceId::new();
                let rx = client.poll(&p.handle);
                // The terminal sentinel distinguishes a closed source from
                // one the loop removed on purpose.
                let stream: SourceStream = Box::pin(
                    ReceiverStream::new(rx)
                        .map(SourceEvent::Payload)
                        .chain(tokio_stream::once(SourceEvent::Closed)),
                );
                wait_set.insert(id, stream);
                p.source = Some(id);
                debug!(source = %id, nickname = %p.display_name(), "source registered");
            }
        }

        let live: HashSet<SourceId> = self.iter().filter_map(|p| p.source).collect();
        let dropped: Vec<SourceId> = wait_set
            .keys()
            .filter(|id| !live.contains(id))
            .copied()
            .collect();
        for id in dropped {
            wait_set.remove(&id);
            debug!(source = %id, "source dropped from wait-set");
        }
    }
}
