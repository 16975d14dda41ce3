//! IRC-style chat gateway over an anonymous PIR publish/subscribe transport
//!
//! Presents chat channels to clients over a conventional line-oriented
//! protocol while the actual message transport is an anonymous
//! publish/subscribe primitive supplied by an external
//! Private-Information-Retrieval client. Each room owns one publication
//! topic; every other participant is reachable only through an opaque,
//! poll-based subscription handle.
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - Each [`Room`] is driven by a single event-loop task that multiplexes a
//!   control channel with one message source per participant, applies
//!   membership commands, and attributes inbound payloads to their senders.
//! - [`Chanserv`] is the directory actor mapping channel names to rooms.
//! - Each connection has a session task communicating with the directory.
//! - No locks on chat state - all access goes through message passing.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use pirc::{MemoryClient, Room, Topic};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Arc::new(MemoryClient::new());
//!     let (mut room, mut log) = Room::new(Topic::new(), "alice");
//!     let dynamo = room.watch(client.clone()).unwrap();
//!
//!     room.post("hello").await.unwrap();
//!     room.unwatch().await.unwrap();
//!     dynamo.await.unwrap().unwrap();
//! }
//! ```

pub mod chanserv;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod participant;
pub mod registry;
pub mod room;
pub mod server;
pub mod session;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use chanserv::{Chanserv, DirectoryHandle};
pub use envelope::Frame;
pub use error::{DirectoryError, RoomError, SessionError, TransportError};
pub use memory::MemoryClient;
pub use participant::Participant;
pub use room::{Room, RoomCommand, RoomMessage, RoomRecord};
pub use transport::{Handle, PirClient, Topic};
pub use types::{ChannelName, SourceId};
