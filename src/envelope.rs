//! Wire envelope for room payloads
//!
//! Everything published under a room topic is wrapped in a small versioned
//! envelope so that membership-protocol payloads (invites, acceptances) are
//! distinguishable from conversation at the payload level — accepting
//! participants are indistinguishable from ordinary senders at the
//! transport level.
//!
//! Layout: `[version][kind][body]`. Chat bodies are raw bytes; invite and
//! acceptance bodies are JSON.

use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;
use crate::room::RoomRecord;

/// Current envelope version
pub const ENVELOPE_VERSION: u8 = 1;

const KIND_CHAT: u8 = 0;
const KIND_INVITE: u8 = 1;
const KIND_ACCEPT: u8 = 2;

#[derive(Serialize, Deserialize)]
struct AcceptBody {
    nickname: String,
}

/// A decoded room payload
#[derive(Debug)]
pub enum Frame {
    /// Conversational message
    Chat(Vec<u8>),
    /// Invite record published on a fresh invite topic
    Invite(RoomRecord),
    /// Acceptance of an outstanding invite
    Accept {
        /// Display name of the accepting participant
        nickname: String,
    },
}

impl Frame {
    /// Encode the frame for publication
    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let mut out = vec![ENVELOPE_VERSION];
        match self {
            Frame::Chat(body) => {
                out.push(KIND_CHAT);
                out.extend_from_slice(body);
            }
            Frame::Invite(record) => {
                out.push(KIND_INVITE);
                out.extend_from_slice(&serde_json::to_vec(record)?);
            }
            Frame::Accept { nickname } => {
                out.push(KIND_ACCEPT);
                out.extend_from_slice(&serde_json::to_vec(&AcceptBody {
                    nickname: nickname.clone(),
                })?);
            }
        }
        Ok(out)
    }

    /// Decode a received payload
    pub fn from_bytes(payload: &[u8]) -> Result<Self, EnvelopeError> {
        let (&version, rest) = payload.split_first().ok_or(EnvelopeError::Empty)?;
        if version != ENVELOPE_VERSION {
            return Err(EnvelopeError::Version(version));
        }
        let (&kind, body) = rest.split_first().ok_or(EnvelopeError::Empty)?;
        match kind {
            KIND_CHAT => Ok(Frame::Chat(body.to_vec())),
            KIND_INVITE => Ok(Frame::Invite(serde_json::from_slice(body)?)),
            KIND_ACCEPT => {
                let accept: AcceptBody = serde_json::from_slice(body)?;
                Ok(Frame::Accept {
                    nickname: accept.nickname,
                })
            }
            other => Err(EnvelopeError::Kind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_preserves_payload() {
        let bytes = Frame::Chat(b"hi there".to_vec()).to_bytes().unwrap();
        match Frame::from_bytes(&bytes).unwrap() {
            Frame::Chat(body) => assert_eq!(body, b"hi there"),
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_accept_carries_nickname() {
        let bytes = Frame::Accept {
            nickname: "alice".into(),
        }
        .to_bytes()
        .unwrap();
        match Frame::from_bytes(&bytes).unwrap() {
            Frame::Accept { nickname } => assert_eq!(nickname, "alice"),
            other => panic!("wrong frame: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_unknown_version_and_kind() {
        assert!(matches!(
            Frame::from_bytes(&[9, KIND_CHAT, b'x']),
            Err(EnvelopeError::Version(9))
        ));
        assert!(matches!(
            Frame::from_bytes(&[ENVELOPE_VERSION, 7]),
            Err(EnvelopeError::Kind(7))
        ));
        assert!(matches!(Frame::from_bytes(&[]), Err(EnvelopeError::Empty)));
    }
}
