//! Session management

pub mod id;
pub mod manager;
pub mod queue;
pub mod recycle;
pub mod snapshot;
pub mod state;

// Re-export key types for convenience
pub use id::{RandomTokenIds, SessionId, SessionIdGenerator, UserId, UuidSessionIds};
pub use manager::SessionRegistry;
pub use queue::OutboundQueue;
pub use recycle::{CallbackFuture, RecycleSweeper, SessionCallback, SweeperState, session_callback};
pub use snapshot::{JsonCodec, SessionRecord, SnapshotCodec, SnapshotMap};
pub use state::{Attachment, Session};
