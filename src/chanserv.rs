//! Channel directory actor
//!
//! `Chanserv` maps human-readable channel names to rooms and owns their
//! event-loop tasks. It is the central actor for directory state: sessions
//! talk to it through a [`DirectoryHandle`] and an mpsc mailbox, commands
//! respond over oneshot channels, and no locks are involved.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::envelope::Frame;
use crate::error::{DirectoryError, RoomError};
use crate::room::{Room, RoomMessage, RoomRecord};
use crate::transport::PirClient;
use crate::types::ChannelName;

/// Mailbox capacity for directory commands
const DIRECTORY_CHANNEL_CAPACITY: usize = 256;

type Reply<T> = oneshot::Sender<Result<T, DirectoryError>>;

/// Commands sent from sessions to the directory actor
#[derive(Debug)]
pub enum DirectoryCommand {
    /// Create a channel and start watching its room
    Register {
        name: ChannelName,
        nickname: String,
        respond_to: Reply<mpsc::Receiver<RoomMessage>>,
    },
    /// Join a channel from a received room record (invite or persisted)
    Accept {
        name: ChannelName,
        nickname: String,
        /// JSON-encoded [`RoomRecord`]
        record: Vec<u8>,
        respond_to: Reply<mpsc::Receiver<RoomMessage>>,
    },
    /// Issue an invite for a channel; yields the out-of-band token
    Invite {
        name: ChannelName,
        respond_to: Reply<String>,
    },
    /// Publish a chat payload in a channel
    Post {
        name: ChannelName,
        payload: Vec<u8>,
        respond_to: Reply<()>,
    },
    /// Leave a channel and tear its room down
    Part {
        name: ChannelName,
        respond_to: Reply<()>,
    },
    /// List registered channel names
    List {
        respond_to: oneshot::Sender<Vec<ChannelName>>,
    },
}

struct ChannelEntry {
    room: Room,
    dynamo: JoinHandle<Result<(), RoomError>>,
}

/// The channel directory actor
pub struct Chanserv {
    client: Arc<dyn PirClient>,
    channels: HashMap<ChannelName, ChannelEntry>,
    receiver: mpsc::Receiver<DirectoryCommand>,
}

/// Cloneable handle for talking to the directory actor
#[derive(Clone)]
pub struct DirectoryHandle {
    sender: mpsc::Sender<DirectoryCommand>,
}

impl DirectoryHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> DirectoryCommand,
    ) -> Result<T, DirectoryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| DirectoryError::Unavailable)?;
        rx.await.map_err(|_| DirectoryError::Unavailable)?
    }

    /// Create a channel; returns the room's log receiver
    pub async fn register(
        &self,
        name: ChannelName,
        nickname: impl Into<String>,
    ) -> Result<mpsc::Receiver<RoomMessage>, DirectoryError> {
        let nickname = nickname.into();
        self.request(|respond_to| DirectoryCommand::Register {
            name,
            nickname,
            respond_to,
        })
        .await
    }

    /// Join a channel from a serialized room record
    pub async fn accept(
        &self,
        name: ChannelName,
        nickname: impl Into<String>,
        record: Vec<u8>,
    ) -> Result<mpsc::Receiver<RoomMessage>, DirectoryError> {
        let nickname = nickname.into();
        self.request(|respond_to| DirectoryCommand::Accept {
            name,
            nickname,
            record,
            respond_to,
        })
        .await
    }

    /// Issue an invite token for a channel
    pub async fn invite(&self, name: ChannelName) -> Result<String, DirectoryError> {
        self.request(|respond_to| DirectoryCommand::Invite { name, respond_to })
            .await
    }

    /// Publish a chat payload in a channel
    pub async fn post(
        &self,
        name: ChannelName,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), DirectoryError> {
        let payload = payload.into();
        self.request(|respond_to| DirectoryCommand::Post {
            name,
            payload,
            respond_to,
        })
        .await
    }

    /// Leave a channel
    pub async fn part(&self, name: ChannelName) -> Result<(), DirectoryError> {
        self.request(|respond_to| DirectoryCommand::Part { name, respond_to })
            .await
    }

    /// Registered channel names
    pub async fn list(&self) -> Result<Vec<ChannelName>, DirectoryError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(DirectoryCommand::List { respond_to: tx })
            .await
            .map_err(|_| DirectoryError::Unavailable)?;
        rx.await.map_err(|_| DirectoryError::Unavailable)
    }
}

impl Chanserv {
    /// Start the directory actor on a new task
    pub fn spawn(client: Arc<dyn PirClient>) -> (DirectoryHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(DIRECTORY_CHANNEL_CAPACITY);
        let chanserv = Self {
            client,
            channels: HashMap::new(),
            receiver,
        };
        (DirectoryHandle { sender }, tokio::spawn(chanserv.run()))
    }

    /// Run the directory event loop
    ///
    /// Processes commands until all handles are dropped, then tears every
    /// room down.
    async fn run(mut self) {
        info!("chanserv started");
        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }
        self.shutdown().await;
        info!("chanserv shutting down");
    }

    async fn handle_command(&mut self, cmd: DirectoryCommand) {
        match cmd {
            DirectoryCommand::Register {
                name,
                nickname,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_register(name, nickname).await);
            }
            DirectoryCommand::Accept {
                name,
                nickname,
                record,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_accept(name, nickname, &record).await);
            }
            DirectoryCommand::Invite { name, respond_to } => {
                let _ = respond_to.send(self.handle_invite(&name).await);
            }
            DirectoryCommand::Post {
                name,
                payload,
                respond_to,
            } => {
                let _ = respond_to.send(self.handle_post(&name, payload).await);
            }
            DirectoryCommand::Part { name, respond_to } => {
                let _ = respond_to.send(self.handle_part(&name).await);
            }
            DirectoryCommand::List { respond_to } => {
                let _ = respond_to.send(self.channels.keys().cloned().collect());
            }
        }
    }

    async fn handle_register(
        &mut self,
        name: ChannelName,
        nickname: String,
    ) -> Result<mpsc::Receiver<RoomMessage>, DirectoryError> {
        if self.channels.contains_key(&name) {
            return Err(DirectoryError::ChannelExists(name.to_string()));
        }
        let topic = self.client.new_topic().await?;
        let (mut room, log) = Room::new(topic, nickname);
        let dynamo = room.watch(self.client.clone()).map_err(DirectoryError::Room)?;
        info!(channel = %name, "channel registered");
        self.channels.insert(name, ChannelEntry { room, dynamo });
        Ok(log)
    }

    async fn handle_accept(
        &mut self,
        name: ChannelName,
        nickname: String,
        record: &[u8],
    ) -> Result<mpsc::Receiver<RoomMessage>, DirectoryError> {
        if self.channels.contains_key(&name) {
            return Err(DirectoryError::ChannelExists(name.to_string()));
        }
        let record: RoomRecord = serde_json::from_slice(record)?;
        let (mut room, log) = Room::from_record(record);
        room.set_nickname(nickname.clone()).map_err(DirectoryError::Room)?;

        // Respond to an outstanding invite before the loop starts: the
        // inviter's room hears the acceptance on its pending source.
        if let Some(invite) = room.invite_topic().cloned() {
            let frame = Frame::Accept { nickname }
                .to_bytes()
                .map_err(|e| DirectoryError::Room(e.into()))?;
            self.client.publish(&invite, &frame).await?;
        }

        let dynamo = room.watch(self.client.clone()).map_err(DirectoryError::Room)?;
        info!(channel = %name, "channel joined from record");
        self.channels.insert(name, ChannelEntry { room, dynamo });
        Ok(log)
    }

    async fn handle_invite(&mut self, name: &ChannelName) -> Result<String, DirectoryError> {
        let entry = self
            .channels
            .get(name)
            .ok_or_else(|| DirectoryError::ChannelNotFound(name.to_string()))?;
        let token = entry.room.invite(self.client.as_ref()).await?;
        debug!(channel = %name, "invite token issued");
        Ok(String::from_utf8_lossy(&token).into_owned())
    }

    async fn handle_post(
        &mut self,
        name: &ChannelName,
        payload: Vec<u8>,
    ) -> Result<(), DirectoryError> {
        let entry = self
            .channels
            .get(name)
            .ok_or_else(|| DirectoryError::ChannelNotFound(name.to_string()))?;
        entry.room.post(payload).await?;
        Ok(())
    }

    async fn handle_part(&mut self, name: &ChannelName) -> Result<(), DirectoryError> {
        let mut entry = self
            .channels
            .remove(name)
            .ok_or_else(|| DirectoryError::ChannelNotFound(name.to_string()))?;
        entry.room.unwatch().await?;
        match entry.dynamo.await {
            Ok(Ok(())) => debug!(channel = %name, "channel parted"),
            Ok(Err(e)) => warn!(channel = %name, error = %e, "room loop ended with error"),
            Err(e) => warn!(channel = %name, error = %e, "room loop panicked"),
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        for (name, mut entry) in self.channels.drain() {
            if let Err(e) = entry.room.unwatch().await {
                warn!(channel = %name, error = %e, "unwatch failed during shutdown");
                continue;
            }
            let _ = entry.dynamo.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryClient;
    use crate::transport::Topic;

    #[tokio::test]
    async fn test_register_rejects_duplicate() {
        let client = Arc::new(MemoryClient::new());
        let (directory, _task) = Chanserv::spawn(client);
        let name = ChannelName::from_string("#ops");

        directory.register(name.clone(), "alice").await.unwrap();
        let err = directory.register(name, "alice").await.unwrap_err();
        assert!(matches!(err, DirectoryError::ChannelExists(_)));
    }

    #[tokio::test]
    async fn test_unknown_channel_operations_fail() {
        let client = Arc::new(MemoryClient::new());
        let (directory, _task) = Chanserv::spawn(client);
        let name = ChannelName::from_string("#nowhere");

        assert!(matches!(
            directory.invite(name.clone()).await.unwrap_err(),
            DirectoryError::ChannelNotFound(_)
        ));
        assert!(matches!(
            directory.post(name.clone(), "hi").await.unwrap_err(),
            DirectoryError::ChannelNotFound(_)
        ));
        assert!(matches!(
            directory.part(name).await.unwrap_err(),
            DirectoryError::ChannelNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_accept_rejects_bad_record() {
        let client = Arc::new(MemoryClient::new());
        let (directory, _task) = Chanserv::spawn(client);
        let name = ChannelName::from_string("#x");

        let err = directory
            .accept(name, "bob", b"not json".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_list_tracks_registration_and_part() {
        let client = Arc::new(MemoryClient::new());
        let (directory, _task) = Chanserv::spawn(client);
        let name = ChannelName::from_string("#ops");

        assert!(directory.list().await.unwrap().is_empty());
        directory.register(name.clone(), "alice").await.unwrap();
        assert_eq!(directory.list().await.unwrap(), vec![name.clone()]);
        directory.part(name).await.unwrap();
        assert!(directory.list().await.unwrap().is_empty());
    }

    /// Full invite flow across two directories sharing one transport.
    #[tokio::test]
    async fn test_invite_accept_round_trip() {
        let client = Arc::new(MemoryClient::new());
        let (alice, _task_a) = Chanserv::spawn(client.clone());
        let (bob, _task_b) = Chanserv::spawn(client.clone());
        let name = ChannelName::from_string("#secret");

        let mut alice_log = alice.register(name.clone(), "alice").await.unwrap();
        let token = alice.invite(name.clone()).await.unwrap();

        // Out-of-band: bob retrieves the invite record from the token topic.
        let invite_topic: Topic = serde_json::from_str(&token).unwrap();
        let bootstrap = invite_topic.handle();
        let mut rx = client.poll(&bootstrap);
        let record = loop {
            let payload = rx.recv().await.unwrap();
            if let Ok(Frame::Invite(record)) = Frame::from_bytes(&payload) {
                break record;
            }
        };
        client.done(&bootstrap);

        let mut bob_log = bob
            .accept(name.clone(), "bob", serde_json::to_vec(&record).unwrap())
            .await
            .unwrap();

        bob.post(name.clone(), "hello alice").await.unwrap();
        let msg = alice_log.recv().await.unwrap();
        assert_eq!(msg.payload, b"hello alice");
        assert_eq!(msg.from.unwrap().nickname, "bob");

        alice.post(name, "hi bob").await.unwrap();
        let msg = bob_log.recv().await.unwrap();
        assert_eq!(msg.payload, b"hi bob");
        assert_eq!(msg.from.unwrap().nickname, "alice");
    }
}
