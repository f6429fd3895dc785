//! Session struct
//!
//! A Session is the registry's record of one connected client: its identity,
//! activity timestamps, an opaque attachment, the outbound queue, and an
//! optional bounded inbound channel for asynchronous dispatch.

use std::any::Any;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::id::{SessionId, UserId};
use super::queue::OutboundQueue;
use super::snapshot::SessionRecord;

/// Application-owned value bound to a session. Never persisted or inspected.
pub type Attachment = Arc<dyn Any + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Inbound half of a session. `tx` is taken exactly once on close.
struct Inbound<M> {
    tx: Mutex<Option<mpsc::Sender<M>>>,
    rx: Mutex<Option<mpsc::Receiver<M>>>,
    closed: CancellationToken,
}

impl<M> Inbound<M> {
    fn new(capacity: Option<usize>) -> Self {
        let closed = CancellationToken::new();
        match capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                Self {
                    tx: Mutex::new(Some(tx)),
                    rx: Mutex::new(Some(rx)),
                    closed,
                }
            }
            None => {
                closed.cancel();
                Self {
                    tx: Mutex::new(None),
                    rx: Mutex::new(None),
                    closed,
                }
            }
        }
    }
}

/// One logical connected client
///
/// Identity fields are immutable. Activity timestamps are atomics so the
/// transport can record traffic without taking the registry lock; the
/// registry only reads them while sweeping.
///
/// `M` is the single message type of the connection: it is what the inbound
/// channel carries and what the outbound queue holds. Applications whose
/// requests and replies differ use an enum covering both directions. When
/// the session is drained with [`crate::dispatch::spawn_dispatch`], that
/// type is also the one implementing [`crate::dispatch::Routable`], so
/// outbound values need a route as well.
pub struct Session<M> {
    sid: SessionId,
    uid: UserId,
    remote_addr: String,
    connect_time: DateTime<Utc>,
    /// Unix millis of the last inbound packet; drives expiry
    last_activity: AtomicI64,
    /// Unix millis of the last transport read or write
    last_io: AtomicI64,
    packet_count: AtomicU64,
    attachment: Mutex<Option<Attachment>>,
    outbound: OutboundQueue<M>,
    inbound: Inbound<M>,
}

impl<M> Session<M> {
    /// Create a session connected now
    ///
    /// `inbound_capacity` of `None` creates a session without an inbound channel.
    pub fn new(
        sid: impl Into<SessionId>,
        uid: impl Into<UserId>,
        remote_addr: impl Into<String>,
        inbound_capacity: Option<usize>,
    ) -> Self {
        let now = Utc::now();
        Self {
            sid: sid.into(),
            uid: uid.into(),
            remote_addr: remote_addr.into(),
            connect_time: now,
            last_activity: AtomicI64::new(now.timestamp_millis()),
            last_io: AtomicI64::new(now.timestamp_millis()),
            packet_count: AtomicU64::new(1),
            attachment: Mutex::new(None),
            outbound: OutboundQueue::new(),
            inbound: Inbound::new(inbound_capacity),
        }
    }

    /// Rebuild a session from a persisted record with fresh runtime state
    pub fn from_record(record: SessionRecord, inbound_capacity: Option<usize>) -> Self {
        Self {
            sid: record.sid,
            uid: record.uid,
            remote_addr: record.remote_addr,
            connect_time: record.connect_time,
            last_activity: AtomicI64::new(record.last_activity.timestamp_millis()),
            last_io: AtomicI64::new(record.last_io.timestamp_millis()),
            packet_count: AtomicU64::new(record.packet_count),
            attachment: Mutex::new(None),
            outbound: OutboundQueue::new(),
            inbound: Inbound::new(inbound_capacity),
        }
    }

    /// Persistable view of this session
    pub fn to_record(&self) -> SessionRecord {
        SessionRecord {
            sid: self.sid.clone(),
            uid: self.uid.clone(),
            remote_addr: self.remote_addr.clone(),
            connect_time: self.connect_time,
            last_activity: self.last_activity(),
            last_io: self.last_io(),
            packet_count: self.packet_count(),
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn connect_time(&self) -> DateTime<Utc> {
        self.connect_time
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        from_millis(self.last_activity.load(Ordering::Acquire))
    }

    /// Overwrite the last activity time
    ///
    /// Unlike [`Session::touch`] this may move the clock backwards; it exists
    /// for collaborators that carry their own notion of activity.
    pub fn set_last_activity(&self, at: DateTime<Utc>) {
        self.last_activity
            .store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn last_io(&self) -> DateTime<Utc> {
        from_millis(self.last_io.load(Ordering::Acquire))
    }

    /// Record transport I/O now. Never moves the timestamp backwards.
    pub fn record_io(&self) {
        self.last_io
            .fetch_max(Utc::now().timestamp_millis(), Ordering::AcqRel);
    }

    pub fn packet_count(&self) -> u64 {
        self.packet_count.load(Ordering::Relaxed)
    }

    /// Record an inbound packet: bump activity to now and count it
    pub fn touch(&self) {
        let now = Utc::now().timestamp_millis();
        self.last_activity.fetch_max(now, Ordering::AcqRel);
        self.last_io.fetch_max(now, Ordering::AcqRel);
        self.packet_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether `last_activity + timeout` lies strictly before `now`
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let deadline = self
            .last_activity
            .load(Ordering::Acquire)
            .saturating_add(timeout_ms);
        now.timestamp_millis() > deadline
    }

    /// Bind an application value to this session, replacing any previous one
    pub fn set_attachment<T: Any + Send + Sync>(&self, value: T) {
        *lock(&self.attachment) = Some(Arc::new(value));
    }

    /// Typed access to the attachment; `None` if absent or of another type
    pub fn attachment<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let attachment = lock(&self.attachment).clone()?;
        attachment.downcast::<T>().ok()
    }

    /// Remove and return the attachment
    pub fn take_attachment(&self) -> Option<Attachment> {
        lock(&self.attachment).take()
    }

    /// Data waiting to be written to this session's transport
    pub fn outbound(&self) -> &OutboundQueue<M> {
        &self.outbound
    }

    /// Hand out the receiving end of the inbound channel
    ///
    /// Returns `None` when the session has no inbound channel or the receiver
    /// was already taken.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<M>> {
        lock(&self.inbound.rx).take()
    }

    fn inbound_sender(&self) -> Option<mpsc::Sender<M>> {
        lock(&self.inbound.tx).clone()
    }

    /// Deliver a message to the inbound channel
    ///
    /// Waits for capacity when the channel is full. Returns `false` without
    /// waiting further once the channel is closed, and `false` if the
    /// receiver has been dropped.
    pub async fn send_message(&self, msg: M) -> bool {
        let Some(tx) = self.inbound_sender() else {
            return false;
        };

        tokio::select! {
            biased;
            _ = self.inbound.closed.cancelled() => false,
            result = tx.send(msg) => result.is_ok(),
        }
    }

    /// Deliver a message only if the channel has room right now
    pub fn try_send_message(&self, msg: M) -> bool {
        match self.inbound_sender() {
            Some(tx) => tx.try_send(msg).is_ok(),
            None => false,
        }
    }

    /// Close the inbound channel
    ///
    /// Idempotent. Returns `true` only for the call that actually closed it.
    /// Blocked senders are released and later sends return `false`.
    pub fn close_inbound(&self) -> bool {
        let tx = lock(&self.inbound.tx).take();
        self.inbound.closed.cancel();
        tx.is_some()
    }

    pub fn is_inbound_closed(&self) -> bool {
        self.inbound.closed.is_cancelled()
    }
}

impl<M> std::fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sid", &self.sid)
            .field("uid", &self.uid)
            .field("remote_addr", &self.remote_addr)
            .field("connect_time", &self.connect_time)
            .field("last_activity", &self.last_activity())
            .field("packet_count", &self.packet_count())
            .field("outbound", &self.outbound)
            .field("inbound_closed", &self.is_inbound_closed())
            .finish()
    }
}
