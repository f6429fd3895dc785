//! Session id generation

use base64ct::{Base64, Encoding};
use uuid::Uuid;

/// Unique identifier of one connection instance
pub type SessionId = String;

/// Identity behind a connection; at most one live session per user id
pub type UserId = String;

/// Source of fresh session ids.
///
/// Implementations must produce ids with enough entropy that collisions are
/// practically impossible; the registry only retries once on collision.
pub trait SessionIdGenerator: Send + Sync {
    /// Produce a new id
    fn generate(&self) -> SessionId;
}

/// Random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidSessionIds;

impl SessionIdGenerator for UuidSessionIds {
    fn generate(&self) -> SessionId {
        Uuid::new_v4().to_string()
    }
}

/// Base64 of `size` bytes read from the OS random source
#[derive(Debug, Clone, Copy)]
pub struct RandomTokenIds {
    size: usize,
}

impl RandomTokenIds {
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl Default for RandomTokenIds {
    fn default() -> Self {
        Self::new(32)
    }
}

impl SessionIdGenerator for RandomTokenIds {
    fn generate(&self) -> SessionId {
        let mut bytes = vec![0u8; self.size];
        match getrandom::fill(&mut bytes) {
            Ok(()) => Base64::encode_string(&bytes),
            Err(e) => {
                tracing::warn!(error = %e, "OS random source failed, falling back to uuid");
                Uuid::new_v4().to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn uuid_ids_are_unique() {
        let ids: HashSet<_> = (0..100).map(|_| UuidSessionIds.generate()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn random_token_has_base64_length() {
        let id = RandomTokenIds::new(32).generate();
        // 32 bytes -> 44 base64 chars with padding
        assert_eq!(id.len(), 44);
        assert!(!id.is_empty());
    }

    #[test]
    fn random_tokens_differ() {
        let ids = RandomTokenIds::default();
        assert_ne!(ids.generate(), ids.generate());
    }
}
