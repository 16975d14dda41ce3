//! Line-oriented chat session handler
//!
//! Handles one client connection: parses IRC-style command lines, relays
//! room traffic from the directory into the connection, and keeps no
//! directory state of its own — everything goes through the
//! [`DirectoryHandle`] mailbox.
//!
//! Supported commands: NICK, USER, JOIN, PART, PRIVMSG, LIST, INVITE,
//! ACCEPT, QUIT. INVITE prints the out-of-band token for a channel;
//! ACCEPT consumes one to join a remote room.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::chanserv::DirectoryHandle;
use crate::envelope::Frame;
use crate::error::SessionError;
use crate::room::RoomMessage;
use crate::transport::{PirClient, Topic};
use crate::types::ChannelName;

/// Server name used in reply prefixes
const SERVER_NAME: &str = "pirc";

/// Buffer size for the session's outbound line channel
const OUT_CHANNEL_BUFFER: usize = 32;

/// Handle one client connection until it quits or drops
pub async fn handle_session(
    stream: TcpStream,
    directory: DirectoryHandle,
    client: Arc<dyn PirClient>,
) -> Result<(), SessionError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    debug!("new connection from {}", peer_addr);

    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    // Writer task: everything the session emits goes through one channel.
    let (out_tx, out_rx) = mpsc::channel::<String>(OUT_CHANNEL_BUFFER);
    let write_task = tokio::spawn(write_lines(write_half, out_rx));

    let mut session = Session {
        directory,
        client,
        out: out_tx,
        nick: None,
        joined: HashSet::new(),
    };

    while let Some(line) = lines.next_line().await? {
        debug!(peer = %peer_addr, line = %line, "line received");
        match session.handle_line(&line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(SessionError::WriterClosed) => break,
            Err(e) => {
                warn!(peer = %peer_addr, error = %e, "command failed");
                let _ = session.notice(&format!("error: {}", e)).await;
            }
        }
    }

    // Leave every channel this session created or joined.
    for name in session.joined.clone() {
        let _ = session.directory.part(name).await;
    }
    drop(session);
    let _ = write_task.await;

    info!("connection from {} closed", peer_addr);
    Ok(())
}

async fn write_lines(mut write_half: OwnedWriteHalf, mut out_rx: mpsc::Receiver<String>) {
    while let Some(line) = out_rx.recv().await {
        if write_half
            .write_all(format!("{}\r\n", line).as_bytes())
            .await
            .is_err()
        {
            debug!("write failed, ending writer task");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

struct Session {
    directory: DirectoryHandle,
    client: Arc<dyn PirClient>,
    out: mpsc::Sender<String>,
    nick: Option<String>,
    joined: HashSet<ChannelName>,
}

impl Session {
    /// Process one command line; returns false when the session should end
    async fn handle_line(&mut self, line: &str) -> Result<bool, SessionError> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some(command) = words.first() else {
            return Ok(true);
        };
        match command.to_lowercase().as_str() {
            "nick" => {
                if let Some(nick) = words.get(1) {
                    self.nick = Some(nick.to_string());
                } else {
                    self.numeric(431, ":no nickname given").await?;
                }
            }
            "user" => {
                let nick = self.nick.clone().unwrap_or_default();
                self.numeric(1, &format!("{} :welcome to pirc", nick)).await?;
            }
            "join" => {
                let Some(target) = words.get(1) else {
                    self.numeric(461, "JOIN :not enough parameters").await?;
                    return Ok(true);
                };
                self.handle_join(target).await?;
            }
            "part" => {
                let Some(target) = words.get(1) else {
                    self.numeric(461, "PART :not enough parameters").await?;
                    return Ok(true);
                };
                self.handle_part(target).await?;
            }
            "privmsg" => {
                let (Some(target), Some(text)) = (words.get(1), trailing(line)) else {
                    self.numeric(461, "PRIVMSG :not enough parameters").await?;
                    return Ok(true);
                };
                self.directory
                    .post(ChannelName::from_string(target), text.as_bytes().to_vec())
                    .await?;
            }
            "list" => {
                for name in self.directory.list().await? {
                    self.numeric(322, &format!("{} :", name)).await?;
                }
                self.numeric(323, ":end of list").await?;
            }
            "invite" => {
                let Some(target) = words.get(1) else {
                    self.numeric(461, "INVITE :not enough parameters").await?;
                    return Ok(true);
                };
                let token = self.directory.invite(ChannelName::from_string(target)).await?;
                self.notice(&format!("invite token for {}: {}", target, token))
                    .await?;
            }
            "accept" => {
                let (Some(target), Some(token)) = (words.get(1), words.get(2)) else {
                    self.numeric(461, "ACCEPT :not enough parameters").await?;
                    return Ok(true);
                };
                self.handle_accept(target, token).await?;
            }
            "quit" => return Ok(false),
            other => {
                warn!("unknown command: {}", other);
                self.numeric(421, &format!("{} :unknown command", other))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn handle_join(&mut self, target: &str) -> Result<(), SessionError> {
        let Some(nick) = self.nick.clone() else {
            self.numeric(451, ":register a nickname first").await?;
            return Ok(());
        };
        let name = ChannelName::from_string(target);
        let log = self.directory.register(name.clone(), nick.clone()).await?;
        self.send(format!(":{} JOIN {}", nick, name)).await?;
        self.joined.insert(name.clone());
        spawn_forwarder(name, log, self.out.clone());
        Ok(())
    }

    async fn handle_part(&mut self, target: &str) -> Result<(), SessionError> {
        let name = ChannelName::from_string(target);
        self.directory.part(name.clone()).await?;
        self.joined.remove(&name);
        let nick = self.nick.clone().unwrap_or_default();
        self.send(format!(":{} PART {}", nick, name)).await?;
        Ok(())
    }

    /// Redeem an invite token: retrieve the room record published on the
    /// token topic, hand it to the directory, and release the bootstrap
    /// handle.
    async fn handle_accept(&mut self, target: &str, token: &str) -> Result<(), SessionError> {
        let Some(nick) = self.nick.clone() else {
            self.numeric(451, ":register a nickname first").await?;
            return Ok(());
        };
        let Ok(topic) = serde_json::from_str::<Topic>(token) else {
            self.notice("invalid invite token").await?;
            return Ok(());
        };

        let bootstrap = topic.handle();
        let mut rx = self.client.poll(&bootstrap);
        let record = loop {
            let Some(payload) = rx.recv().await else {
                self.client.done(&bootstrap);
                self.notice("invite topic closed before a record arrived")
                    .await?;
                return Ok(());
            };
            match Frame::from_bytes(&payload) {
                Ok(Frame::Invite(record)) => break record,
                Ok(_) | Err(_) => continue,
            }
        };
        self.client.done(&bootstrap);

        let name = ChannelName::from_string(target);
        let record = serde_json::to_vec(&record)
            .map_err(|e| SessionError::Directory(e.into()))?;
        let log = self
            .directory
            .accept(name.clone(), nick.clone(), record)
            .await?;
        self.send(format!(":{} JOIN {}", nick, name)).await?;
        self.joined.insert(name.clone());
        spawn_forwarder(name, log, self.out.clone());
        Ok(())
    }

    async fn numeric(&self, code: u16, rest: &str) -> Result<(), SessionError> {
        self.send(format!(":{} {:03} {}", SERVER_NAME, code, rest)).await
    }

    async fn notice(&self, text: &str) -> Result<(), SessionError> {
        self.send(format!(":{} NOTICE * :{}", SERVER_NAME, text)).await
    }

    async fn send(&self, line: String) -> Result<(), SessionError> {
        self.out
            .send(line)
            .await
            .map_err(|_| SessionError::WriterClosed)
    }
}

/// Relay a room's log channel into the session connection
fn spawn_forwarder(
    name: ChannelName,
    mut log: mpsc::Receiver<RoomMessage>,
    out: mpsc::Sender<String>,
) {
    tokio::spawn(async move {
        while let Some(msg) = log.recv().await {
            let line = format_room_message(&name, &msg);
            if out.send(line).await.is_err() {
                break;
            }
        }
        debug!(channel = %name, "log forwarder ended");
    });
}

fn format_room_message(name: &ChannelName, msg: &RoomMessage) -> String {
    match (&msg.err, &msg.from) {
        (Some(err), _) => format!(":{} NOTICE {} :room error: {}", SERVER_NAME, name, err),
        (None, Some(from)) => format!(
            ":{} PRIVMSG {} :{}",
            from.display_name(),
            name,
            String::from_utf8_lossy(&msg.payload)
        ),
        (None, None) => format!(
            ":{} NOTICE {} :{}",
            SERVER_NAME,
            name,
            String::from_utf8_lossy(&msg.payload)
        ),
    }
}

/// Extract the trailing parameter (after " :") from a command line
fn trailing(line: &str) -> Option<&str> {
    line.split_once(" :").map(|(_, rest)| rest)
}
