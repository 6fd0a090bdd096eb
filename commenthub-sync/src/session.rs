use std::{sync::Arc, time::Duration};

use futures::channel::oneshot;
use tokio::{sync::mpsc, time::MissedTickBehavior};

use crate::{engine::EngineMsg, feed, Backend, Config, FeedTransport};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    Unauthenticated,
    Checking,
    Authenticated,
}

/// Background tasks of one authenticated session
///
/// Dropping this cancels both the credential refresh and the event feed.
struct ActiveSession {
    id: u64,
    _refresh: oneshot::Receiver<()>,
    _feed: oneshot::Receiver<()>,
}

pub(crate) struct SessionGate {
    state: SessionState,
    last_id: u64,
    active: Option<ActiveSession>,
}

impl SessionGate {
    pub fn new() -> SessionGate {
        SessionGate {
            state: SessionState::Unauthenticated,
            last_id: 0,
            active: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the running session, if authenticated
    pub fn current(&self) -> Option<u64> {
        self.active.as_ref().map(|s| s.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == SessionState::Authenticated
    }

    /// Marks a session check as in flight; an already-running session keeps running
    pub fn begin_check(&mut self) {
        if self.state == SessionState::Unauthenticated {
            self.state = SessionState::Checking;
        }
    }

    /// Starts a new session with its refresh and feed tasks, returning its id
    pub fn open(
        &mut self,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn FeedTransport>,
        config: &Config,
        inbox: mpsc::Sender<EngineMsg>,
    ) -> u64 {
        self.close();
        self.last_id += 1;
        let id = self.last_id;

        let (refresh_cancel, refresh_guard) = oneshot::channel();
        tokio::spawn(run_refresh(
            backend,
            id,
            config.refresh_interval,
            inbox.clone(),
            refresh_cancel,
        ));
        let (feed_cancel, feed_guard) = oneshot::channel();
        tokio::spawn(feed::run_feed(
            transport,
            id,
            config.reconnect_spacing,
            inbox,
            feed_cancel,
        ));

        tracing::info!(session = id, "session authenticated");
        self.state = SessionState::Authenticated;
        self.active = Some(ActiveSession {
            id,
            _refresh: refresh_guard,
            _feed: feed_guard,
        });
        id
    }

    /// Stops the running session, if any, returning whether there was one
    pub fn close(&mut self) -> bool {
        self.state = SessionState::Unauthenticated;
        match self.active.take() {
            Some(session) => {
                tracing::info!(session = session.id, "session closed");
                true
            }
            None => false,
        }
    }
}

async fn run_refresh(
    backend: Arc<dyn Backend>,
    session: u64,
    period: Duration,
    inbox: mpsc::Sender<EngineMsg>,
    mut cancel: oneshot::Sender<()>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately, and the credential is fresh anyway
    ticker.tick().await;
    loop {
        let res = tokio::select! {
            _ = cancel.cancellation() => return,
            res = async {
                ticker.tick().await;
                backend.refresh_session().await
            } => res,
        };
        match res {
            Ok(()) => tracing::debug!(session, "refreshed session credential"),
            Err(error) => {
                tracing::warn!(session, ?error, "failed refreshing session credential");
                let _ = inbox.send(EngineMsg::SessionLost { session, error }).await;
                return;
            }
        }
    }
}
