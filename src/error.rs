//! Error types for the gateway
//!
//! Defines transport, envelope, room, directory and session errors.
//! Uses thiserror for ergonomic error definitions.
//!
//! Propagation policy: inside a room's event loop, only `UnexpectedClosure`
//! is fatal. Publish failures, envelope decode failures and messages from
//! unknown senders are surfaced on the room's log channel and the loop
//! continues. Lifecycle misuse (`AlreadyWatching`, `NotWatching`) is
//! reported synchronously to the caller.

use thiserror::Error;

/// Failures at the PIR transport boundary
///
/// Publish failures are recoverable: the room surfaces them on its log
/// channel and keeps running.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Publishing a payload under a topic failed
    #[error("publish failed: {0}")]
    Publish(String),

    /// Allocating a fresh topic failed
    #[error("topic allocation failed: {0}")]
    TopicAllocation(String),
}

/// Membership-protocol envelope decode failures
///
/// All recoverable; a malformed payload is logged and the loop continues.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Payload too short to carry an envelope header
    #[error("empty envelope")]
    Empty,

    /// Unsupported envelope version
    #[error("unsupported envelope version: {0}")]
    Version(u8),

    /// Unknown frame kind byte
    #[error("unknown frame kind: {0}")]
    Kind(u8),

    /// Frame body failed to decode
    #[error("invalid frame body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Room lifecycle and event-loop errors
#[derive(Debug, Error)]
pub enum RoomError {
    /// A second watcher was started while one is active
    #[error("already watching room")]
    AlreadyWatching,

    /// A mutation was attempted while no watcher is running
    #[error("not watching room")]
    NotWatching,

    /// The room was unwatched; a room cannot be restarted
    #[error("room has been shut down")]
    Stopped,

    /// The control channel closed before the command could be enqueued
    #[error("room control channel closed")]
    ControlClosed,

    /// A message arrived from a source with no matching roster entry
    #[error("room msg from unknown participant")]
    UnknownParticipant,

    /// A wait-set source closed without an explicit remove or cancel (fatal)
    #[error("unexpected channel close")]
    UnexpectedClosure,

    /// Transport failure, surfaced on the log channel
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Envelope decode failure, surfaced on the log channel
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// JSON serialization error (records, invite tokens)
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Channel directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A channel with this name is already registered
    #[error("channel already exists: {0}")]
    ChannelExists(String),

    /// No channel with this name is registered
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// The directory actor is no longer running
    #[error("channel directory unavailable")]
    Unavailable,

    /// A room record failed to decode
    #[error("invalid room record: {0}")]
    InvalidRecord(#[from] serde_json::Error),

    /// Underlying room failure
    #[error(transparent)]
    Room(#[from] RoomError),

    /// Underlying transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Session (connection handler) errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// IO error on the client connection (fatal for the session)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The session's writer task is gone
    #[error("session writer closed")]
    WriterClosed,

    /// Directory operation failed
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}
