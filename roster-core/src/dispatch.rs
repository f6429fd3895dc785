//! Inbound message dispatch.
//!
//! Transports push decoded messages into a session with
//! [`Session::send_message`]; a dispatch task pulls them off the session's
//! inbound channel and hands each one to the handler registered for its
//! route. Handlers are application code; this module only does the routing.
//!
//! ```text
//!  transport ──send_message──▶ [inbound channel] ──▶ dispatch task ──▶ Router
//!                                                                      ├─ "login" ─▶ handler
//!                                                                      └─ "chat"  ─▶ handler
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::session::{CallbackFuture, Session};

/// A message that names the handler it should be dispatched to.
pub trait Routable {
    fn route(&self) -> &str;
}

/// Async handler invoked once per dispatched message.
pub type MessageHandler<M> =
    Arc<dyn Fn(Arc<Session<M>>, M) -> CallbackFuture + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
pub fn message_handler<M, F, Fut>(f: F) -> MessageHandler<M>
where
    F: Fn(Arc<Session<M>>, M) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |session, message| Box::pin(f(session, message)))
}

/// Table of route -> handler, with an optional fallback.
pub struct Router<M> {
    routes: HashMap<String, MessageHandler<M>>,
    fallback: Option<MessageHandler<M>>,
}

impl<M: Routable + Send + 'static> Router<M> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
            fallback: None,
        }
    }

    /// Register the handler for `route`, replacing any previous one.
    #[must_use]
    pub fn route(mut self, route: impl Into<String>, handler: MessageHandler<M>) -> Self {
        self.routes.insert(route.into(), handler);
        self
    }

    /// Handler for messages whose route has no registered handler.
    #[must_use]
    pub fn fallback(mut self, handler: MessageHandler<M>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn has_route(&self, route: &str) -> bool {
        self.routes.contains_key(route)
    }

    /// Run the handler for `message`.
    ///
    /// Returns `false` if no handler (and no fallback) matched.
    pub async fn dispatch(&self, session: &Arc<Session<M>>, message: M) -> bool {
        let handler = self
            .routes
            .get(message.route())
            .or(self.fallback.as_ref());

        match handler {
            Some(handler) => {
                trace!(sid = %session.sid(), route = message.route(), "Dispatching message");
                handler(Arc::clone(session), message).await;
                true
            }
            None => {
                warn!(sid = %session.sid(), route = message.route(), "No handler for route");
                false
            }
        }
    }
}

impl<M: Routable + Send + 'static> Default for Router<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that dispatches every inbound message of `session`.
///
/// Messages are handled one at a time in arrival order. The task ends when
/// the inbound channel closes (e.g. the session is removed) or `shutdown`
/// fires, and yields the number of messages handled. Returns `None` if the
/// session has no inbound receiver left to take.
pub fn spawn_dispatch<M: Routable + Send + 'static>(
    session: Arc<Session<M>>,
    router: Arc<Router<M>>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<usize>> {
    let mut inbound = session.take_inbound()?;

    Some(tokio::spawn(async move {
        debug!(sid = %session.sid(), "Dispatch started");
        let mut handled = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(sid = %session.sid(), "Dispatch received shutdown signal");
                    break;
                }
                message = inbound.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if router.dispatch(&session, message).await {
                        handled += 1;
                    }
                }
            }
        }

        debug!(sid = %session.sid(), handled, "Dispatch stopped");
        handled
    }))
}
