//! Snapshot format for restart recovery
//!
//! A snapshot file is a 4-byte big-endian body length followed by the body.
//! The body encodes the session-id index as a map of sid to [`SessionRecord`];
//! the user-id index is always rebuilt from the records on load.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────┐
//! │ len: u32 BE  │ body: codec(BTreeMap<sid, record>)   │
//! └──────────────┴──────────────────────────────────────┘
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::SessionId;
use crate::error::SnapshotError;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX: usize = 4;

/// Sid index as persisted, sorted so identical registries dump identical bytes
pub type SnapshotMap = BTreeMap<SessionId, SessionRecord>;

/// Transport-relevant fields of a session
///
/// Queues, channels and attachments are runtime state and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub sid: String,
    pub uid: String,
    pub remote_addr: String,
    pub connect_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_io: DateTime<Utc>,
    pub packet_count: u64,
}

/// Encoding of the snapshot body
pub trait SnapshotCodec: Send + Sync {
    fn encode(&self, sessions: &SnapshotMap) -> Result<Vec<u8>, SnapshotError>;

    fn decode(&self, body: &[u8]) -> Result<SnapshotMap, SnapshotError>;
}

/// JSON body encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl SnapshotCodec for JsonCodec {
    fn encode(&self, sessions: &SnapshotMap) -> Result<Vec<u8>, SnapshotError> {
        serde_json::to_vec(sessions).map_err(SnapshotError::Encode)
    }

    fn decode(&self, body: &[u8]) -> Result<SnapshotMap, SnapshotError> {
        serde_json::from_slice(body).map_err(SnapshotError::Decode)
    }
}

/// Prefix `body` with its big-endian length
pub fn frame(body: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    let len = u32::try_from(body.len()).map_err(|_| SnapshotError::TooLarge(body.len()))?;
    let mut framed = Vec::with_capacity(LENGTH_PREFIX + body.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(body);
    Ok(framed)
}

/// Strip the length prefix, returning exactly the declared body
///
/// Bytes past the declared length are ignored.
pub fn unframe(bytes: &[u8]) -> Result<&[u8], SnapshotError> {
    let Some((prefix, rest)) = bytes.split_first_chunk::<LENGTH_PREFIX>() else {
        return Err(SnapshotError::Truncated {
            expected: LENGTH_PREFIX,
            actual: bytes.len(),
        });
    };

    let len = u32::from_be_bytes(*prefix) as usize;
    if rest.len() < len {
        return Err(SnapshotError::Truncated {
            expected: len,
            actual: rest.len(),
        });
    }
    if rest.len() > len {
        tracing::debug!(
            trailing = rest.len() - len,
            "Ignoring bytes after snapshot body"
        );
    }
    Ok(&rest[..len])
}

/// Check that keys match records and that no user id appears twice
pub fn validate(sessions: &SnapshotMap) -> Result<(), SnapshotError> {
    let mut uids = HashSet::with_capacity(sessions.len());
    for (sid, record) in sessions {
        if *sid != record.sid {
            return Err(SnapshotError::Inconsistent(format!(
                "key '{}' holds session '{}'",
                sid, record.sid
            )));
        }
        if !uids.insert(record.uid.as_str()) {
            return Err(SnapshotError::Inconsistent(format!(
                "user '{}' bound to more than one session",
                record.uid
            )));
        }
    }
    Ok(())
}

/// Encode and write a snapshot, replacing any existing file
pub async fn write_snapshot(
    path: &Path,
    codec: &dyn SnapshotCodec,
    sessions: &SnapshotMap,
) -> Result<(), SnapshotError> {
    let framed = frame(&codec.encode(sessions)?)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, framed).await?;
    Ok(())
}

/// Read, unframe, decode and validate a snapshot
pub async fn read_snapshot(
    path: &Path,
    codec: &dyn SnapshotCodec,
) -> Result<SnapshotMap, SnapshotError> {
    let bytes = tokio::fs::read(path).await?;
    let sessions = codec.decode(unframe(&bytes)?)?;
    validate(&sessions)?;
    Ok(sessions)
}
