//! Basic type definitions for the gateway
//!
//! Provides newtype wrappers for type safety:
//! - `SourceId`: identity of a cached participant message source
//! - `ChannelName`: normalized chat channel name

use uuid::Uuid;

/// Identity of a participant's cached message source (newtype pattern)
///
/// The wait-set is keyed by `SourceId`, and inbound payloads are attributed
/// back to their owning participant by comparing source identities rather
/// than positions, which shift as membership changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(pub Uuid);

impl SourceId {
    /// Create a new random source ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat channel name (normalized: leading `#`, lowercase)
///
/// Used by the channel directory to key rooms and parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelName(pub String);

impl ChannelName {
    /// Create a ChannelName from a string (lowercases, ensures leading '#')
    pub fn from_string(name: &str) -> Self {
        let name = name.trim().to_lowercase();
        if name.starts_with('#') {
            Self(name)
        } else {
            Self(format!("#{}", name))
        }
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_unique() {
        let id1 = SourceId::new();
        let id2 = SourceId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_channel_name_normalized() {
        let name = ChannelName::from_string("Lobby");
        assert_eq!(name.0, "#lobby");
    }

    #[test]
    fn test_channel_name_keeps_hash() {
        let name = ChannelName::from_string("#Ops ");
        assert_eq!(name.0, "#ops");
    }
}
