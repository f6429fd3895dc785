//! SessionRegistry: the dual-indexed set of live sessions
//!
//! Every live session is reachable both by session id and by user id. Both
//! maps sit behind one lock and are always mutated together, so a session is
//! either in both indices or in neither.
//!
//! ```text
//! ┌──────────────────────── RwLock<Indices> ────────────────────────┐
//! │  by_sid: sid ──┐                                                 │
//! │                ├──▶ Arc<Session> ◀──┐                            │
//! │  by_uid: uid ──┘                    └── handed out to callers    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handles returned by lookups stay valid after the session is removed;
//! they mean "was live at lookup time", not "is still registered".

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::SnapshotError;

use super::id::{RandomTokenIds, SessionId, SessionIdGenerator, UserId, UuidSessionIds};
use super::recycle::{RecycleSweeper, SessionCallback, SweeperState};
use super::snapshot::{self, JsonCodec, SnapshotCodec, SnapshotMap};
use super::state::Session;

/// Initial capacity of each index
const INITIAL_CAPACITY: usize = 16 << 10;

/// Both indices, only ever touched together
struct Indices<M> {
    by_sid: HashMap<SessionId, Arc<Session<M>>>,
    by_uid: HashMap<UserId, Arc<Session<M>>>,
}

impl<M> Indices<M> {
    fn new() -> Self {
        Self {
            by_sid: HashMap::with_capacity(INITIAL_CAPACITY),
            by_uid: HashMap::with_capacity(INITIAL_CAPACITY),
        }
    }

    fn from_records(records: SnapshotMap, inbound_capacity: Option<usize>) -> Self {
        let mut indices = Self::new();
        for (_, record) in records {
            indices.insert(Arc::new(Session::from_record(record, inbound_capacity)));
        }
        indices
    }

    fn len(&self) -> usize {
        self.by_sid.len()
    }

    fn insert(&mut self, session: Arc<Session<M>>) {
        self.by_uid
            .insert(session.uid().to_string(), Arc::clone(&session));
        self.by_sid.insert(session.sid().to_string(), session);
    }

    /// Remove `session` from both indices if it is the instance they hold
    fn unlink(&mut self, session: &Arc<Session<M>>) -> bool {
        let in_sid = self
            .by_sid
            .get(session.sid())
            .is_some_and(|s| Arc::ptr_eq(s, session));
        if !in_sid {
            return false;
        }
        self.by_sid.remove(session.sid());
        if self
            .by_uid
            .get(session.uid())
            .is_some_and(|s| Arc::ptr_eq(s, session))
        {
            self.by_uid.remove(session.uid());
        }
        true
    }

    fn remove_sid(&mut self, sid: &str) -> Option<Arc<Session<M>>> {
        let session = self.by_sid.get(sid).cloned()?;
        self.unlink(&session);
        Some(session)
    }

    fn remove_uid(&mut self, uid: &str) -> Option<Arc<Session<M>>> {
        let session = self.by_uid.get(uid).cloned()?;
        self.unlink(&session);
        Some(session)
    }

    fn close_all(&self) {
        for session in self.by_sid.values() {
            session.close_inbound();
        }
    }
}

/// Result of one expiry scan
pub(crate) struct SweepOutcome<M> {
    /// Removed from the registry
    pub expired: Vec<Arc<Session<M>>>,
    /// Still registered
    pub live: Vec<Arc<Session<M>>>,
}

/// Registry of live sessions, indexed by session id and by user id
///
/// SessionRegistry provides:
/// - Session creation with at most one live session per user id
/// - O(1) lookup by either id
/// - Removal that also closes the session's inbound channel
/// - Periodic and on-demand recycling of idle sessions
/// - Snapshot dump/load for restart recovery
pub struct SessionRegistry<M> {
    indices: RwLock<Indices<M>>,
    ids: Arc<dyn SessionIdGenerator>,
    codec: Arc<dyn SnapshotCodec>,
    config: RegistryConfig,
    sweeper: RecycleSweeper,
}

impl<M: Send + 'static> SessionRegistry<M> {
    /// Create an empty registry with default configuration
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with the given configuration
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            indices: RwLock::new(Indices::new()),
            ids: Arc::new(UuidSessionIds),
            codec: Arc::new(JsonCodec),
            config,
            sweeper: RecycleSweeper::new(),
        }
    }

    /// Use a different session id source
    #[must_use]
    pub fn with_id_generator(mut self, ids: Arc<dyn SessionIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    /// Generate session ids as random base64 tokens of `config.id_bytes` bytes
    #[must_use]
    pub fn with_random_token_ids(self) -> Self {
        let ids = Arc::new(RandomTokenIds::new(self.config.id_bytes));
        self.with_id_generator(ids)
    }

    /// Use a different snapshot body encoding
    #[must_use]
    pub fn with_codec(mut self, codec: Arc<dyn SnapshotCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ==================== Creation ====================

    /// Create a session for `uid` with a freshly generated session id
    ///
    /// Returns the session and whether it was created. If `uid` already has a
    /// live session, that session is returned with `false`. A generated id
    /// that collides is regenerated once; if that collides too the session
    /// already holding the id is returned with `false`.
    pub async fn new_session(
        &self,
        uid: impl Into<UserId>,
        remote_addr: impl Into<String>,
    ) -> (Arc<Session<M>>, bool) {
        let uid = uid.into();
        let mut indices = self.indices.write().await;

        if let Some(existing) = indices.by_uid.get(&uid) {
            return (Arc::clone(existing), false);
        }

        let mut sid = self.ids.generate();
        if indices.by_sid.contains_key(&sid) {
            warn!(sid = %sid, "Session id collision, regenerating");
            sid = self.ids.generate();
            if let Some(existing) = indices.by_sid.get(&sid) {
                warn!(sid = %sid, "Session id collided twice");
                return (Arc::clone(existing), false);
            }
        }

        let session = Arc::new(Session::new(
            sid,
            uid,
            remote_addr,
            self.config.inbound(),
        ));
        indices.insert(Arc::clone(&session));
        drop(indices);

        debug!(sid = %session.sid(), uid = %session.uid(), "Session created");
        (session, true)
    }

    /// Create a session under a caller-supplied session id
    ///
    /// Returns `None` for an empty `sid`. Otherwise behaves like
    /// [`SessionRegistry::new_session`], returning an existing session with
    /// `false` when either id is already bound.
    pub async fn new_session_with_id(
        &self,
        sid: impl Into<SessionId>,
        uid: impl Into<UserId>,
        remote_addr: impl Into<String>,
    ) -> Option<(Arc<Session<M>>, bool)> {
        let sid = sid.into();
        if sid.is_empty() {
            return None;
        }
        let uid = uid.into();
        let mut indices = self.indices.write().await;

        if let Some(existing) = indices.by_sid.get(&sid) {
            return Some((Arc::clone(existing), false));
        }
        if let Some(existing) = indices.by_uid.get(&uid) {
            return Some((Arc::clone(existing), false));
        }

        let session = Arc::new(Session::new(
            sid,
            uid,
            remote_addr,
            self.config.inbound(),
        ));
        indices.insert(Arc::clone(&session));
        drop(indices);

        debug!(sid = %session.sid(), uid = %session.uid(), "Session created");
        Some((session, true))
    }

    // ==================== Lookup ====================

    pub async fn get_by_sid(&self, sid: &str) -> Option<Arc<Session<M>>> {
        self.indices.read().await.by_sid.get(sid).cloned()
    }

    pub async fn get_by_uid(&self, uid: &str) -> Option<Arc<Session<M>>> {
        self.indices.read().await.by_uid.get(uid).cloned()
    }

    /// Number of live sessions
    pub async fn count(&self) -> usize {
        self.indices.read().await.len()
    }

    /// Copy of all live user ids
    pub async fn all_user_ids(&self) -> Vec<UserId> {
        self.indices.read().await.by_uid.keys().cloned().collect()
    }

    /// Copy of all live session ids
    pub async fn all_session_ids(&self) -> Vec<SessionId> {
        self.indices.read().await.by_sid.keys().cloned().collect()
    }

    /// Handles to all live sessions
    pub async fn all_sessions(&self) -> Vec<Arc<Session<M>>> {
        self.indices.read().await.by_sid.values().cloned().collect()
    }

    // ==================== Removal ====================

    /// Remove this exact session instance
    ///
    /// A stale handle whose ids now belong to a newer session removes
    /// nothing. Returns the session if it was removed.
    pub async fn remove_session(&self, session: &Arc<Session<M>>) -> Option<Arc<Session<M>>> {
        let removed = self.indices.write().await.unlink(session);
        if !removed {
            return None;
        }
        session.close_inbound();
        debug!(sid = %session.sid(), uid = %session.uid(), "Session removed");
        Some(Arc::clone(session))
    }

    /// Remove the session bound to `sid`, if any
    pub async fn remove_by_sid(&self, sid: &str) -> Option<Arc<Session<M>>> {
        let session = self.indices.write().await.remove_sid(sid)?;
        session.close_inbound();
        debug!(sid = %session.sid(), uid = %session.uid(), "Session removed");
        Some(session)
    }

    /// Remove the session bound to `uid`, if any
    pub async fn remove_by_uid(&self, uid: &str) -> Option<Arc<Session<M>>> {
        let session = self.indices.write().await.remove_uid(uid)?;
        session.close_inbound();
        debug!(sid = %session.sid(), uid = %session.uid(), "Session removed");
        Some(session)
    }

    /// Drop every session without firing callbacks
    ///
    /// Inbound channels of the dropped sessions are closed. Returns how many
    /// sessions were dropped.
    pub async fn clear(&self) -> usize {
        let previous = std::mem::replace(&mut *self.indices.write().await, Indices::new());
        previous.close_all();
        info!(count = previous.len(), "Session registry cleared");
        previous.len()
    }

    // ==================== Recycling ====================

    /// Remove expired sessions, returning them along with the survivors
    pub(crate) async fn sweep(&self, timeout: Duration) -> SweepOutcome<M> {
        let now = Utc::now();
        let mut indices = self.indices.write().await;
        let (expired, live): (Vec<_>, Vec<_>) = indices
            .by_sid
            .values()
            .cloned()
            .partition(|session| session.is_expired(now, timeout));
        for session in &expired {
            indices.unlink(session);
        }
        drop(indices);

        for session in &expired {
            session.close_inbound();
            debug!(sid = %session.sid(), uid = %session.uid(), "Session expired");
        }
        SweepOutcome { expired, live }
    }

    /// Start the periodic recycle sweep
    ///
    /// Each `period`, sessions idle longer than `timeout` are removed and
    /// passed to `on_expire`; the rest are passed to `on_check`. Callbacks
    /// run as spawned tasks after the registry lock is released.
    ///
    /// Returns `true` if the sweep was started; starting twice, starting
    /// after [`SessionRegistry::stop_recycle`], or passing no callbacks is a
    /// no-op.
    pub fn start_recycle(
        self: &Arc<Self>,
        period: Duration,
        timeout: Duration,
        on_check: Option<SessionCallback<M>>,
        on_expire: Option<SessionCallback<M>>,
    ) -> bool {
        self.sweeper.start(
            Arc::downgrade(self),
            period,
            timeout,
            on_check,
            on_expire,
        )
    }

    /// Start the periodic recycle sweep with the configured period and timeout
    pub fn start_configured_recycle(
        self: &Arc<Self>,
        on_check: Option<SessionCallback<M>>,
        on_expire: Option<SessionCallback<M>>,
    ) -> bool {
        self.start_recycle(
            self.config.recycle_period,
            self.config.session_timeout,
            on_check,
            on_expire,
        )
    }

    /// Stop the periodic sweep and wait for it to exit
    pub async fn stop_recycle(&self) {
        self.sweeper.stop().await;
    }

    pub fn recycle_state(&self) -> SweeperState {
        self.sweeper.state()
    }

    /// Run one expiry scan now
    ///
    /// Works whether or not the periodic sweep is running. `on_expire` is
    /// awaited for each expired session, in turn, before returning.
    pub async fn recycle_now(
        &self,
        timeout: Duration,
        on_expire: Option<SessionCallback<M>>,
    ) -> Vec<Arc<Session<M>>> {
        let outcome = self.sweep(timeout).await;
        info!(expired = outcome.expired.len(), "Recycled sessions");

        if let Some(on_expire) = on_expire {
            for session in &outcome.expired {
                on_expire(Arc::clone(session)).await;
            }
        }
        outcome.expired
    }

    // ==================== Snapshot ====================

    /// Write all live sessions to `path`
    ///
    /// Returns the number of sessions written.
    pub async fn dump(&self, path: impl AsRef<Path>) -> Result<usize, SnapshotError> {
        let path = path.as_ref();
        let records: SnapshotMap = self
            .indices
            .read()
            .await
            .by_sid
            .iter()
            .map(|(sid, session)| (sid.clone(), session.to_record()))
            .collect();

        snapshot::write_snapshot(path, self.codec.as_ref(), &records)
            .await
            .inspect_err(|e| warn!(path = %path.display(), error = %e, "Snapshot dump failed"))?;

        info!(path = %path.display(), count = records.len(), "Dumped session snapshot");
        Ok(records.len())
    }

    /// Replace the registry content with the sessions stored at `path`
    ///
    /// The snapshot is fully decoded and validated before anything is
    /// swapped in; on error the registry is unchanged. Loaded sessions get
    /// fresh queues and channels. Returns the number of sessions loaded.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<usize, SnapshotError> {
        let path = path.as_ref();
        let records = snapshot::read_snapshot(path, self.codec.as_ref())
            .await
            .inspect_err(|e| warn!(path = %path.display(), error = %e, "Snapshot load failed"))?;

        let fresh = Indices::from_records(records, self.config.inbound());
        let count = fresh.len();
        let previous = std::mem::replace(&mut *self.indices.write().await, fresh);
        previous.close_all();

        info!(path = %path.display(), count, replaced = previous.len(), "Loaded session snapshot");
        Ok(count)
    }

    /// Dump to the configured snapshot path
    pub async fn dump_default(&self) -> Result<usize, SnapshotError> {
        self.dump(&self.config.snapshot_path).await
    }

    /// Load from the configured snapshot path
    pub async fn load_default(&self) -> Result<usize, SnapshotError> {
        self.load(&self.config.snapshot_path).await
    }
}

impl<M: Send + 'static> Default for SessionRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}
