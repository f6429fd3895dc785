//! Background recycling of expired sessions
//!
//! The sweeper wakes every `period`, removes sessions idle for longer than
//! `timeout` from the registry, and hands each session to a callback:
//! `on_expire` for removed sessions, `on_check` for the ones still live (a
//! hook for protocol keep-alive pings).
//!
//! ```text
//!   Idle ──start──▶ Running ──stop──▶ Stopping ──loop exited──▶ Stopped
//!     └──────────────────stop──────────────────────────────────────▲
//! ```
//!
//! `Stopped` is terminal: a stopped sweeper never starts again.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::manager::SessionRegistry;
use super::state::Session;

/// Boxed future returned by session callbacks.
pub type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Async hook invoked with a session by the sweeper.
pub type SessionCallback<M> = Arc<dyn Fn(Arc<Session<M>>) -> CallbackFuture + Send + Sync>;

/// Wrap an async closure as a [`SessionCallback`].
///
/// ```
/// use roster_core::session::session_callback;
///
/// let on_expire = session_callback::<String, _, _>(|session| async move {
///     println!("expired: {}", session.uid());
/// });
/// ```
pub fn session_callback<M, F, Fut>(f: F) -> SessionCallback<M>
where
    F: Fn(Arc<Session<M>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |session| Box::pin(f(session)))
}

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

/// Lifecycle of a [`RecycleSweeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    /// Never started
    Idle,
    /// Loop running
    Running,
    /// Stop requested, loop not yet exited
    Stopping,
    /// Loop exited; terminal
    Stopped,
}

impl From<u8> for SweeperState {
    fn from(value: u8) -> Self {
        match value {
            IDLE => SweeperState::Idle,
            RUNNING => SweeperState::Running,
            STOPPING => SweeperState::Stopping,
            _ => SweeperState::Stopped,
        }
    }
}

/// Owner of the single periodic sweep task of a registry.
pub struct RecycleSweeper {
    state: AtomicU8,
    /// Tells the loop to exit
    shutdown: CancellationToken,
    /// Cancelled when the loop task is gone (exit, panic or runtime
    /// shutdown), or on stop before start
    exited: CancellationToken,
    /// Callback tasks spawned by the loop
    callbacks: TaskTracker,
}

impl RecycleSweeper {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            shutdown: CancellationToken::new(),
            exited: CancellationToken::new(),
            callbacks: TaskTracker::new(),
        }
    }

    pub fn state(&self) -> SweeperState {
        self.state.load(Ordering::Acquire).into()
    }

    /// Spawn the sweep loop
    ///
    /// Returns `true` if this call started the loop. It is a no-op returning
    /// `false` when both callbacks are `None`, when the sweeper is already
    /// running or stopped, or when called outside a tokio runtime.
    pub fn start<M: Send + 'static>(
        &self,
        registry: Weak<SessionRegistry<M>>,
        period: Duration,
        timeout: Duration,
        on_check: Option<SessionCallback<M>>,
        on_expire: Option<SessionCallback<M>>,
    ) -> bool {
        if on_check.is_none() && on_expire.is_none() {
            return false;
        }
        if period.is_zero() {
            warn!("Refusing to start recycle sweeper with a zero period");
            return false;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Recycle sweeper needs a tokio runtime");
            return false;
        };
        if self
            .state
            .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let shutdown = self.shutdown.clone();
        let callbacks = self.callbacks.clone();
        // Moved into the task so it fires even if the task is never polled
        let exited = self.exited.clone().drop_guard();

        runtime.spawn(async move {
            let _exited = exited;
            info!(?period, ?timeout, "Recycle sweeper started");

            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => {
                        debug!("Recycle sweeper received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let Some(registry) = registry.upgrade() else {
                            debug!("Registry dropped, recycle sweeper exiting");
                            break;
                        };
                        let outcome = registry.sweep(timeout).await;
                        drop(registry);

                        debug!(
                            expired = outcome.expired.len(),
                            live = outcome.live.len(),
                            "Sweep tick"
                        );

                        if let Some(on_expire) = &on_expire {
                            for session in outcome.expired {
                                callbacks.spawn(on_expire(session));
                            }
                        }
                        if let Some(on_check) = &on_check {
                            for session in outcome.live {
                                callbacks.spawn(on_check(session));
                            }
                        }
                    }
                }
            }

            info!("Recycle sweeper stopped");
        });

        true
    }

    /// Stop the loop and wait until it and its callbacks have finished
    ///
    /// Safe to call any number of times from any number of tasks; every call
    /// returns only after the loop is gone and every callback it spawned has
    /// completed, so no callback runs after any `stop` returns. Must not be
    /// awaited from inside a sweeper callback.
    pub async fn stop(&self) {
        loop {
            match self.state.load(Ordering::Acquire) {
                IDLE => {
                    if self
                        .state
                        .compare_exchange(IDLE, STOPPED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.shutdown.cancel();
                        self.exited.cancel();
                        self.callbacks.close();
                        return;
                    }
                }
                RUNNING => {
                    if self
                        .state
                        .compare_exchange(RUNNING, STOPPING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.shutdown.cancel();
                        break;
                    }
                }
                _ => break,
            }
        }

        self.exited.cancelled().await;
        self.callbacks.close();
        self.callbacks.wait().await;
        let _ = self.state.compare_exchange(
            STOPPING,
            STOPPED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

impl Default for RecycleSweeper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RecycleSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecycleSweeper")
            .field("state", &self.state())
            .finish()
    }
}
