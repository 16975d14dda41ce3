//! Room and its event loop
//!
//! A `Room` is one chat channel backed by the PIR transport: it owns one
//! publication topic and a roster of participants, each reachable through a
//! poll-based subscription handle. While watched, a single event-loop task
//! (the dynamo) multiplexes the control channel with one message source per
//! roster entry, applies membership commands, and attributes every inbound
//! payload to its sender. The dynamo is the only writer of roster state;
//! everything else talks to it through the control channel or by draining
//! the log channel.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::envelope::Frame;
use crate::error::RoomError;
use crate::participant::Participant;
use crate::registry::{Roster, SourceEvent, WaitSet};
use crate::transport::{Handle, PirClient, Topic};
use crate::types::SourceId;

/// Control channel capacity; callers block only when the loop lags behind
const CONTROL_CHANNEL_CAPACITY: usize = 8;

/// Log channel capacity; an undrained log eventually blocks the loop
const LOG_CHANNEL_CAPACITY: usize = 64;

/// Commands sent to a room's event loop
#[derive(Debug)]
pub enum RoomCommand {
    /// Append a participant to the active roster
    Add(Participant),
    /// Publish an invite on the given topic and track a pending invitee
    Invite {
        /// Freshly allocated topic for the invitee
        topic: Topic,
    },
    /// Release and delete the participant with this handle
    Remove(Handle),
    /// Publish a chat payload on the room's own topic
    Post(Vec<u8>),
    /// Release every handle and stop the loop
    Cancel,
}

/// One delivered unit on a room's log channel
///
/// `from` is `None` for control-plane conditions such as a publish failure.
#[derive(Debug)]
pub struct RoomMessage {
    /// Payload bytes (empty for control-plane errors)
    pub payload: Vec<u8>,
    /// Recoverable error, if this entry reports one
    pub err: Option<RoomError>,
    /// Originating participant, when attribution succeeded
    pub from: Option<Participant>,
}

/// Serialized room representation
///
/// One discriminated schema covering both accepted shapes: a full room
/// (persisted state) and an invite (transmitted to an invitee). The invite
/// topic doubles as the acceptor's own publication point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoomRecord {
    /// A fully persisted room
    Full {
        /// The room's own publication topic
        topic: Topic,
        /// Local display name
        nickname: String,
        /// Active participants
        participants: Vec<Participant>,
        /// Invitees awaiting acceptance
        pending: Vec<Participant>,
    },
    /// An invite, as published on a fresh invite topic
    Invite {
        /// The invite topic; becomes the acceptor's publication point
        invite: Topic,
        /// Current members, including the inviter
        participants: Vec<Participant>,
    },
}

/// Room state owned by the dynamo while it runs
struct RoomState {
    topic: Topic,
    nickname: String,
    /// Outstanding invite to respond to (rooms built from an invite record)
    invite: Option<Topic>,
    roster: Roster,
    log: mpsc::Sender<RoomMessage>,
}

/// One chat channel
///
/// Construct with [`Room::new`] or [`Room::from_record`], then start the
/// event loop with [`Room::watch`]. A room whose loop has been stopped via
/// [`Room::unwatch`] cannot be restarted; build a fresh one.
pub struct Room {
    control: Option<mpsc::Sender<RoomCommand>>,
    state: Option<RoomState>,
}

impl Room {
    /// Create a fresh room publishing on `topic`
    ///
    /// Returns the room together with the receiving end of its log channel.
    pub fn new(topic: Topic, nickname: impl Into<String>) -> (Self, mpsc::Receiver<RoomMessage>) {
        Self::build(topic, nickname.into(), None, Roster::default())
    }

    /// Reconstruct a room from a serialized record (either shape)
    pub fn from_record(record: RoomRecord) -> (Self, mpsc::Receiver<RoomMessage>) {
        match record {
            RoomRecord::Full {
                topic,
                nickname,
                participants,
                pending,
            } => Self::build(topic, nickname, None, Roster::new(participants, pending)),
            RoomRecord::Invite {
                invite,
                participants,
            } => Self::build(
                invite.clone(),
                String::new(),
                Some(invite),
                Roster::new(participants, Vec::new()),
            ),
        }
    }

    fn build(
        topic: Topic,
        nickname: String,
        invite: Option<Topic>,
        roster: Roster,
    ) -> (Self, mpsc::Receiver<RoomMessage>) {
        let (log_tx, log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let room = Self {
            control: None,
            state: Some(RoomState {
                topic,
                nickname,
                invite,
                roster,
                log: log_tx,
            }),
        };
        (room, log_rx)
    }

    /// Serialize the room as a full record
    ///
    /// Only available while the state is not owned by a running event loop.
    pub fn to_record(&self) -> Option<RoomRecord> {
        self.state.as_ref().map(|s| RoomRecord::Full {
            topic: s.topic.clone(),
            nickname: s.nickname.clone(),
            participants: s.roster.active().to_vec(),
            pending: s.roster.pending().to_vec(),
        })
    }

    /// The outstanding invite topic, for rooms built from an invite record
    pub fn invite_topic(&self) -> Option<&Topic> {
        self.state.as_ref().and_then(|s| s.invite.as_ref())
    }

    /// Set the local display name; fails once the loop owns the state
    pub fn set_nickname(&mut self, nickname: impl Into<String>) -> Result<(), RoomError> {
        let state = self.state.as_mut().ok_or(RoomError::AlreadyWatching)?;
        state.nickname = nickname.into();
        Ok(())
    }

    /// Start the event loop on a new task
    ///
    /// Fails with `AlreadyWatching` if a loop is active, `Stopped` if the
    /// room was already unwatched. The returned handle resolves with `Ok`
    /// on clean cancellation or an error on unexpected source closure.
    pub fn watch(
        &mut self,
        client: Arc<dyn PirClient>,
    ) -> Result<JoinHandle<Result<(), RoomError>>, RoomError> {
        if self.control.is_some() {
            return Err(RoomError::AlreadyWatching);
        }
        let state = self.state.take().ok_or(RoomError::Stopped)?;
        let (tx, rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        self.control = Some(tx);

        let dynamo = Dynamo {
            client,
            topic: state.topic,
            nickname: state.nickname,
            roster: state.roster,
            log: state.log,
            control: rx,
            wait_set: WaitSet::new(),
            stale: false,
        };
        Ok(tokio::spawn(dynamo.run()))
    }

    /// Stop the event loop: enqueue `Cancel` and close the control channel
    pub async fn unwatch(&mut self) -> Result<(), RoomError> {
        let control = self.control.take().ok_or(RoomError::NotWatching)?;
        control
            .send(RoomCommand::Cancel)
            .await
            .map_err(|_| RoomError::ControlClosed)
        // Dropping the sender closes the control channel.
    }

    /// Enqueue a chat payload for publication on the room's topic
    pub async fn post(&self, payload: impl Into<Vec<u8>>) -> Result<(), RoomError> {
        self.send(RoomCommand::Post(payload.into())).await
    }

    /// Enqueue a participant addition
    pub async fn add_participant(&self, participant: Participant) -> Result<(), RoomError> {
        self.send(RoomCommand::Add(participant)).await
    }

    /// Enqueue removal of the participant with this handle
    pub async fn remove_participant(&self, handle: Handle) -> Result<(), RoomError> {
        self.send(RoomCommand::Remove(handle)).await
    }

    /// Issue an invite
    ///
    /// Allocates a fresh topic, enqueues the invite for the event loop (which
    /// publishes the invite record and tracks the invitee as pending) and
    /// returns the serialized topic as the out-of-band token.
    pub async fn invite(&self, client: &dyn PirClient) -> Result<Vec<u8>, RoomError> {
        if self.control.is_none() {
            return Err(RoomError::NotWatching);
        }
        let topic = client.new_topic().await?;
        let token = serde_json::to_vec(&topic)?;
        self.send(RoomCommand::Invite { topic }).await?;
        Ok(token)
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        let control = self.control.as_ref().ok_or(RoomError::NotWatching)?;
        control.send(cmd).await.map_err(|_| RoomError::ControlClosed)
    }
}

enum Flow {
    Continue,
    Stop,
}

/// The per-room event loop
///
/// Owns the roster and the multiplexed wait-set. Each iteration suspends
/// until exactly one source is ready (control channel first), processes that
/// event, and rebuilds the wait-set only if membership changed.
struct Dynamo {
    client: Arc<dyn PirClient>,
    topic: Topic,
    nickname: String,
    roster: Roster,
    log: mpsc::Sender<RoomMessage>,
    control: mpsc::Receiver<RoomCommand>,
    wait_set: WaitSet,
    stale: bool,
}

impl Dynamo {
    async fn run(mut self) -> Result<(), RoomError> {
        info!(topic = %self.topic.id, "room watch started");
        self.roster
            .sync_sources(self.client.as_ref(), &mut self.wait_set);
        loop {
            match self.step().await {
                Ok(Flow::Continue) => {
                    if self.stale {
                        self.roster
                            .sync_sources(self.client.as_ref(), &mut self.wait_set);
                        self.stale = false;
                    }
                }
                Ok(Flow::Stop) => {
                    info!(topic = %self.topic.id, "room watch stopped");
                    return Ok(());
                }
                Err(e) => {
                    warn!(topic = %self.topic.id, error = %e, "room watch failed");
                    return Err(e);
                }
            }
        }
    }

    /// Wait for exactly one ready source and process it
    async fn step(&mut self) -> Result<Flow, RoomError> {
        let has_sources = !self.wait_set.is_empty();
        tokio::select! {
            biased;
            cmd = self.control.recv() => match cmd {
                // Control channel closed without an explicit cancel.
                None => Err(RoomError::UnexpectedClosure),
                Some(RoomCommand::Cancel) => {
                    self.release_all();
                    Ok(Flow::Stop)
                }
                Some(cmd) => {
                    self.handle_command(cmd).await;
                    Ok(Flow::Continue)
                }
            },
            Some((source, event)) = self.wait_set.next(), if has_sources => {
                match event {
                    SourceEvent::Payload(payload) => {
                        self.handle_payload(source, payload).await;
                        Ok(Flow::Continue)
                    }
                    SourceEvent::Closed => Err(RoomError::UnexpectedClosure),
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Post(payload) => self.handle_post(payload).await,
            RoomCommand::Add(participant) => {
                debug!(nickname = %participant.display_name(), "participant added");
                self.roster.push_active(participant);
                self.stale = true;
            }
            RoomCommand::Invite { topic } => self.handle_invite(topic).await,
            RoomCommand::Remove(handle) => {
                if let Some(p) = self.roster.remove_by_handle(&handle) {
                    self.client.done(&p.handle);
                    debug!(nickname = %p.display_name(), "participant removed");
                    self.stale = true;
                } else {
                    debug!("remove for unknown participant ignored");
                }
            }
            // Handled in step().
            RoomCommand::Cancel => {}
        }
    }

    async fn handle_post(&mut self, payload: Vec<u8>) {
        let frame = match Frame::Chat(payload).to_bytes() {
            Ok(frame) => frame,
            Err(e) => {
                self.emit(RoomMessage {
                    payload: Vec::new(),
                    err: Some(e.into()),
                    from: None,
                })
                .await;
                return;
            }
        };
        if let Err(e) = self.client.publish(&self.topic, &frame).await {
            // Publish failures are recoverable: surface and keep going.
            self.emit(RoomMessage {
                payload: Vec::new(),
                err: Some(e.into()),
                from: None,
            })
            .await;
        }
    }

    async fn handle_invite(&mut self, topic: Topic) {
        let record = RoomRecord::Invite {
            invite: topic.clone(),
            participants: self.invite_roster(),
        };
        match Frame::Invite(record).to_bytes() {
            Ok(frame) => {
                if let Err(e) = self.client.publish(&topic, &frame).await {
                    self.emit(RoomMessage {
                        payload: Vec::new(),
                        err: Some(e.into()),
                        from: None,
                    })
                    .await;
                }
            }
            Err(e) => {
                self.emit(RoomMessage {
                    payload: Vec::new(),
                    err: Some(e.into()),
                    from: None,
                })
                .await;
            }
        }
        // Track the invitee even if the publish failed; removal on timeout
        // or rejection is external policy.
        self.roster
            .push_pending(Participant::new(topic.handle(), ""));
        self.stale = true;
        debug!(topic = %topic.id, "invite issued");
    }

    /// Membership list for an invite record: active participants plus self
    fn invite_roster(&self) -> Vec<Participant> {
        let mut participants = self.roster.active().to_vec();
        participants.push(Participant::new(self.topic.handle(), self.nickname.clone()));
        participants
    }

    async fn handle_payload(&mut self, source: SourceId, payload: Vec<u8>) {
        let frame = match Frame::from_bytes(&payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(source = %source, error = %e, "undecodable payload");
                self.emit(RoomMessage {
                    payload,
                    err: Some(e.into()),
                    from: self.roster.owner_of(source).cloned(),
                })
                .await;
                return;
            }
        };
        match frame {
            Frame::Chat(body) => match self.roster.owner_of(source) {
                Some(p) => {
                    let from = p.clone();
                    self.emit(RoomMessage {
                        payload: body,
                        err: None,
                        from: Some(from),
                    })
                    .await;
                }
                None => {
                    // Race between a removal and an in-flight delivery.
                    self.emit(RoomMessage {
                        payload: body,
                        err: Some(RoomError::UnknownParticipant),
                        from: None,
                    })
                    .await;
                }
            },
            Frame::Accept { nickname } => {
                if self.roster.activate(source, &nickname) {
                    info!(nickname = %nickname, "invite accepted");
                    self.stale = true;
                } else if self.roster.owner_of(source).is_some() {
                    debug!(source = %source, "acceptance from active participant ignored");
                } else {
                    self.emit(RoomMessage {
                        payload,
                        err: Some(RoomError::UnknownParticipant),
                        from: None,
                    })
                    .await;
                }
            }
            // Our own invite publication, echoed back on the pending source.
            Frame::Invite(_) => debug!(source = %source, "invite echo ignored"),
        }
    }

    fn release_all(&mut self) {
        let all = self.roster.drain_all();
        info!(count = all.len(), "releasing room handles");
        for p in all {
            self.client.done(&p.handle);
        }
        self.wait_set.clear();
    }

    async fn emit(&self, msg: RoomMessage) {
        if self.log.send(msg).await.is_err() {
            debug!("log receiver dropped; discarding room message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use std::collections::HashSet;
    use std::time::Duration;

    async fn until<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn chat(payload: &[u8]) -> Vec<u8> {
        Frame::Chat(payload.to_vec()).to_bytes().unwrap()
    }

    #[tokio::test]
    async fn test_second_watch_fails() {
        let client = Arc::new(MemoryClient::new());
        let (mut room, _log) = Room::new(Topic::new(), "alice");

        let handle = room.watch(client.clone()).unwrap();
        assert!(matches!(
            room.watch(client.clone()),
            Err(RoomError::AlreadyWatching)
        ));

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_mutations_fail_when_not_watching() {
        let client = Arc::new(MemoryClient::new());
        let (mut room, _log) = Room::new(Topic::new(), "alice");

        assert!(matches!(room.post("hi").await, Err(RoomError::NotWatching)));
        assert!(matches!(room.unwatch().await, Err(RoomError::NotWatching)));
        assert!(matches!(
            room.invite(client.as_ref()).await,
            Err(RoomError::NotWatching)
        ));
    }

    #[tokio::test]
    async fn test_room_cannot_be_restarted() {
        let client = Arc::new(MemoryClient::new());
        let (mut room, _log) = Room::new(Topic::new(), "alice");

        let handle = room.watch(client.clone()).unwrap();
        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();

        assert!(matches!(room.watch(client), Err(RoomError::Stopped)));
    }

    #[tokio::test]
    async fn test_post_with_no_participants_emits_nothing() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let mut observer = client.poll(&topic.handle());
        let (mut room, mut log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();
        room.post("hello").await.unwrap();

        // The observer hearing the publication proves the loop ran.
        let published = observer.recv().await.unwrap();
        match Frame::from_bytes(&published).unwrap() {
            Frame::Chat(body) => assert_eq!(body, b"hello"),
            other => panic!("wrong frame: {:?}", other),
        }
        assert!(log.try_recv().is_err());

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_inbound_message_is_attributed() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let peer_topic = client.new_topic().await.unwrap();
        let peer = Participant::new(peer_topic.handle(), "bob");
        let (mut room, mut log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();
        room.add_participant(peer.clone()).await.unwrap();
        until(|| client.subscriber_count(&peer_topic) == 1).await;

        client.publish(&peer_topic, &chat(b"hi")).await.unwrap();

        let msg = log.recv().await.unwrap();
        assert_eq!(msg.payload, b"hi");
        assert!(msg.err.is_none());
        assert_eq!(msg.from.unwrap(), peer);

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_publish_failure_is_surfaced_and_loop_continues() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let mut observer = client.poll(&topic.handle());
        let (mut room, mut log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();

        client.set_fail_publish(true);
        room.post("lost").await.unwrap();
        let msg = log.recv().await.unwrap();
        assert!(matches!(msg.err, Some(RoomError::Transport(_))));
        assert!(msg.from.is_none());

        client.set_fail_publish(false);
        room.post("found").await.unwrap();
        let published = observer.recv().await.unwrap();
        match Frame::from_bytes(&published).unwrap() {
            Frame::Chat(body) => assert_eq!(body, b"found"),
            other => panic!("wrong frame: {:?}", other),
        }

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_invite_tokens_are_distinct_topics() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let (mut room, _log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();

        let t1: Topic = serde_json::from_slice(&room.invite(client.as_ref()).await.unwrap()).unwrap();
        let t2: Topic = serde_json::from_slice(&room.invite(client.as_ref()).await.unwrap()).unwrap();
        assert_ne!(t1.id, t2.id);

        // One pending source registered per invite.
        until(|| client.subscriber_count(&t1) == 1 && client.subscriber_count(&t2) == 1).await;

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();
        // Both pending handles released on cancel.
        assert_eq!(client.releases().len(), 2);
    }

    #[tokio::test]
    async fn test_acceptance_moves_invitee_to_active() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let (mut room, mut log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();
        let token = room.invite(client.as_ref()).await.unwrap();
        let invite_topic: Topic = serde_json::from_slice(&token).unwrap();
        until(|| client.subscriber_count(&invite_topic) == 1).await;

        let accept = Frame::Accept {
            nickname: "bob".into(),
        }
        .to_bytes()
        .unwrap();
        client.publish(&invite_topic, &accept).await.unwrap();
        client
            .publish(&invite_topic, &chat(b"made it"))
            .await
            .unwrap();

        let msg = log.recv().await.unwrap();
        assert_eq!(msg.payload, b"made it");
        assert_eq!(msg.from.unwrap().nickname, "bob");

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_releases_every_handle_exactly_once() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let t1 = client.new_topic().await.unwrap();
        let t2 = client.new_topic().await.unwrap();
        let p1 = Participant::new(t1.handle(), "bob");
        let p2 = Participant::new(t2.handle(), "carol");
        let (mut room, _log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();
        room.add_participant(p1.clone()).await.unwrap();
        room.add_participant(p2.clone()).await.unwrap();
        room.invite(client.as_ref()).await.unwrap();
        until(|| client.subscriber_count(&t1) == 1 && client.subscriber_count(&t2) == 1).await;

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();

        let releases = client.releases();
        assert_eq!(releases.len(), 3);
        let unique: HashSet<_> = releases.iter().collect();
        assert_eq!(unique.len(), 3);
        assert!(releases.contains(&p1.handle.id));
        assert!(releases.contains(&p2.handle.id));
    }

    #[tokio::test]
    async fn test_remove_releases_handle_and_stops_delivery() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let peer_topic = client.new_topic().await.unwrap();
        let peer = Participant::new(peer_topic.handle(), "bob");
        let (mut room, mut log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();
        room.add_participant(peer.clone()).await.unwrap();
        until(|| client.subscriber_count(&peer_topic) == 1).await;

        room.remove_participant(peer.handle.clone()).await.unwrap();
        until(|| client.subscriber_count(&peer_topic) == 0).await;
        assert_eq!(client.releases(), vec![peer.handle.id]);

        // Delivered to nobody, loop stays healthy.
        client.publish(&peer_topic, &chat(b"ghost")).await.unwrap();
        room.post("still here").await.unwrap();
        assert!(log.try_recv().is_err());

        room.unwatch().await.unwrap();
        handle.await.unwrap().unwrap();
        // No second release at cancel time.
        assert_eq!(client.releases(), vec![peer.handle.id]);
    }

    #[tokio::test]
    async fn test_unexpected_source_closure_is_fatal() {
        let client = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let peer_topic = client.new_topic().await.unwrap();
        let peer = Participant::new(peer_topic.handle(), "bob");
        let (mut room, _log) = Room::new(topic, "alice");

        let handle = room.watch(client.clone()).unwrap();
        room.add_participant(peer.clone()).await.unwrap();
        until(|| client.subscriber_count(&peer_topic) == 1).await;

        // Someone other than the loop retires the handle.
        client.done(&peer.handle);

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(RoomError::UnexpectedClosure)));
    }

    /// Drives the loop directly to reach the attribution-miss path.
    #[tokio::test]
    async fn test_unowned_source_yields_unknown_participant() {
        let client: Arc<MemoryClient> = Arc::new(MemoryClient::new());
        let (_control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (log_tx, mut log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let mut dynamo = Dynamo {
            client: client.clone(),
            topic: Topic::new(),
            nickname: "alice".into(),
            roster: Roster::default(),
            log: log_tx,
            control: control_rx,
            wait_set: WaitSet::new(),
            stale: false,
        };

        // A source whose roster entry was already removed.
        let orphan_topic = Topic::new();
        let orphan = Participant::new(orphan_topic.handle(), "ghost");
        dynamo.roster.push_active(orphan.clone());
        dynamo
            .roster
            .sync_sources(client.as_ref(), &mut dynamo.wait_set);
        dynamo.roster.remove_by_handle(&orphan.handle);

        client.publish(&orphan_topic, &chat(b"hi")).await.unwrap();
        let flow = dynamo.step().await.unwrap();
        assert!(matches!(flow, Flow::Continue));

        let msg = log_rx.recv().await.unwrap();
        assert_eq!(msg.payload, b"hi");
        assert!(matches!(msg.err, Some(RoomError::UnknownParticipant)));
        assert!(msg.from.is_none());
    }

    #[tokio::test]
    async fn test_invite_record_lists_members_including_self() {
        let client: Arc<MemoryClient> = Arc::new(MemoryClient::new());
        let topic = client.new_topic().await.unwrap();
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let (log_tx, _log_rx) = mpsc::channel(LOG_CHANNEL_CAPACITY);
        let mut dynamo = Dynamo {
            client: client.clone(),
            topic: topic.clone(),
            nickname: "alice".into(),
            roster: Roster::default(),
            log: log_tx,
            control: control_rx,
            wait_set: WaitSet::new(),
            stale: false,
        };
        dynamo
            .roster
            .push_active(Participant::new(client.new_topic().await.unwrap().handle(), "bob"));

        let invite_topic = client.new_topic().await.unwrap();
        let mut invitee = client.poll(&invite_topic.handle());
        control_tx
            .send(RoomCommand::Invite {
                topic: invite_topic.clone(),
            })
            .await
            .unwrap();
        dynamo.step().await.unwrap();

        assert_eq!(dynamo.roster.pending_len(), 1);
        let published = invitee.recv().await.unwrap();
        match Frame::from_bytes(&published).unwrap() {
            Frame::Invite(RoomRecord::Invite {
                invite,
                participants,
            }) => {
                assert_eq!(invite, invite_topic);
                let nicks: Vec<_> = participants.iter().map(|p| p.nickname.clone()).collect();
                assert!(nicks.contains(&"bob".to_string()));
                assert!(nicks.contains(&"alice".to_string()));
            }
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_records_reconstruct_rooms() {
        let topic = Topic::new();
        let bob = Participant::new(Topic::new().handle(), "bob");
        let (room, _log) = Room::new(topic.clone(), "alice");
        let record = room.to_record().unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"full\""));

        let (restored, _log) = Room::from_record(serde_json::from_str(&json).unwrap());
        match restored.to_record().unwrap() {
            RoomRecord::Full {
                topic: t, nickname, ..
            } => {
                assert_eq!(t, topic);
                assert_eq!(nickname, "alice");
            }
            other => panic!("wrong record: {:?}", other),
        }

        // Invite shape: the invite topic becomes the room's own topic.
        let invite = Topic::new();
        let (accepted, _log) = Room::from_record(RoomRecord::Invite {
            invite: invite.clone(),
            participants: vec![bob.clone()],
        });
        assert_eq!(accepted.invite_topic(), Some(&invite));
        match accepted.to_record().unwrap() {
            RoomRecord::Full {
                topic: t,
                participants,
                ..
            } => {
                assert_eq!(t, invite);
                assert_eq!(participants, vec![bob]);
            }
            other => panic!("wrong record: {:?}", other),
        }
    }
}
