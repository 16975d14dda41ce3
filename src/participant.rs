//! Participant struct definition
//!
//! Represents one remote party in a room: a member or a pending invitee.

use serde::{Deserialize, Serialize};

use crate::transport::Handle;
use crate::types::SourceId;

/// A room member or invitee, identified by their subscription handle
///
/// `source` is the identity of the cached message source derived from the
/// handle. It is created at most once over the handle's lifetime and reused
/// across loop iterations: recreating it would duplicate the poll
/// registration with the transport or drop already-buffered payloads. It is
/// never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Subscription handle for this participant's topic
    pub handle: Handle,
    /// Display name (empty until known)
    pub nickname: String,
    /// Cached message source identity, assigned on first wait-set build
    #[serde(skip)]
    pub(crate) source: Option<SourceId>,
}

impl Participant {
    /// Create a participant with no cached source
    pub fn new(handle: Handle, nickname: impl Into<String>) -> Self {
        Self {
            handle,
            nickname: nickname.into(),
            source: None,
        }
    }

    /// Display name, or a placeholder when not yet known
    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            "anonymous"
        } else {
            &self.nickname
        }
    }
}

/// Identity is by handle, not nickname or source
impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl Eq for Participant {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Topic;

    #[test]
    fn test_identity_is_by_handle() {
        let topic = Topic::new();
        let handle = topic.handle();
        let a = Participant::new(handle.clone(), "a");
        let mut b = Participant::new(handle, "b");
        b.source = Some(SourceId::new());
        assert_eq!(a, b);

        let c = Participant::new(topic.handle(), "a");
        assert_ne!(a, c);
    }

    #[test]
    fn test_source_not_serialized() {
        let mut p = Participant::new(Topic::new().handle(), "bob");
        p.source = Some(SourceId::new());
        let json = serde_json::to_string(&p).unwrap();
        let back: Participant = serde_json::from_str(&json).unwrap();
        assert!(back.source.is_none());
        assert_eq!(back, p);
        assert_eq!(back.nickname, "bob");
    }
}
