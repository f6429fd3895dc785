//! roster-core: registry of live client sessions
//!
//! This crate tracks who is currently connected to a networked service:
//!
//! - **Session registry** - [`SessionRegistry`] indexes live sessions by session id
//!   and by user id, with at most one live session per user
//! - **Sessions** - [`Session`] carries identity, activity timestamps, an opaque
//!   attachment, an [`OutboundQueue`] and an optional bounded inbound channel
//! - **Recycling** - a background sweep that evicts idle sessions and reports them
//!   through async callbacks
//! - **Snapshots** - length-prefixed dump/load of the registry for restart recovery
//! - **Dispatch** - [`dispatch::Router`] and [`dispatch::spawn_dispatch`] for
//!   draining a session's inbound channel into route handlers
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use roster_core::{SessionRegistry, session_callback};
//!
//! # async fn example() -> Result<(), roster_core::RosterError> {
//! let registry: Arc<SessionRegistry<Vec<u8>>> = Arc::new(SessionRegistry::new());
//!
//! // On connect
//! let (session, created) = registry.new_session("user-42", "203.0.113.7:51000").await;
//! assert!(created);
//!
//! // While connected
//! session.touch();
//! session.outbound().push(b"welcome".to_vec());
//!
//! // Evict sessions idle for two minutes, checking every 30 seconds
//! registry.start_recycle(
//!     Duration::from_secs(30),
//!     Duration::from_secs(120),
//!     None,
//!     Some(session_callback(|s| async move {
//!         tracing::info!(uid = %s.uid(), "session expired");
//!     })),
//! );
//!
//! // On shutdown
//! registry.stop_recycle().await;
//! registry.dump("/var/lib/roster/sessions.snapshot").await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;

// Re-export key types for convenience
pub use config::RegistryConfig;
pub use dispatch::{MessageHandler, Routable, Router, message_handler, spawn_dispatch};
pub use error::{ConfigError, RosterError, SnapshotError};
pub use session::{
    Attachment, JsonCodec, OutboundQueue, RandomTokenIds, RecycleSweeper, Session, SessionCallback,
    SessionId, SessionIdGenerator, SessionRecord, SessionRegistry, SnapshotCodec, SweeperState,
    UserId, UuidSessionIds, session_callback,
};
