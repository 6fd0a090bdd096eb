use std::sync::Arc;

use commenthub_api::{Comment, Credentials, Error, Page, PageWindow, SortField};
use commenthub_client::{OrderExt, TreeStore};
use futures::channel::oneshot;
use tokio::sync::{mpsc, watch};

use crate::{session::SessionGate, Backend, Config, FeedState, FeedTransport, SessionState};

/// Consistent view of the synchronization state, as published after each mutation
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub session: SessionState,
    pub feed: FeedState,
    pub window: PageWindow,
    pub forest: Arc<Vec<Comment>>,
    pub has_next: bool,
    pub has_previous: bool,

    /// Whether a page fetch for `window` is in flight
    pub loading: bool,

    pub last_error: Option<Error>,
    pub held_orphans: usize,
}

pub(crate) enum Command {
    CheckSession,
    Login(Credentials, oneshot::Sender<Result<(), Error>>),
    Logout(oneshot::Sender<Result<(), Error>>),
    SortClicked(SortField),
    GotoPage(u32),
    NextPage,
    PreviousPage,
    Refresh,
    Shutdown,
}

#[derive(Debug, Eq, PartialEq)]
pub(crate) enum FeedEvent {
    State(FeedState),
    Comment(Comment),
}

pub(crate) enum EngineMsg {
    Command(Command),
    SessionChecked {
        check: u64,
        result: Result<bool, Error>,
    },
    LoginFinished {
        result: Result<(), Error>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    SessionLost {
        session: u64,
        error: Error,
    },
    PageFetched {
        version: u64,
        result: Result<Page, Error>,
    },
    Feed {
        session: u64,
        epoch: u64,
        event: FeedEvent,
    },
}

/// Sole owner of the comment forest
///
/// Every mutation goes through `handle`, one message at a time, so a page replacement
/// and live insertions never interleave.
pub(crate) struct Engine {
    config: Config,
    backend: Arc<dyn Backend>,
    transport: Arc<dyn FeedTransport>,
    inbox: mpsc::Sender<EngineMsg>,
    snapshots: watch::Sender<Snapshot>,

    gate: SessionGate,
    store: TreeStore,
    window: PageWindow,
    // bumped on every window change and teardown, to recognize stale fetch results
    version: u64,
    // bumped on every session check, login and logout, to recognize outdated checks
    checks: u64,
    loading: bool,
    has_next: bool,
    has_previous: bool,
    feed: FeedState,
    feed_epoch: u64,
    last_error: Option<Error>,
}

impl Engine {
    pub fn spawn(
        config: Config,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn FeedTransport>,
    ) -> (mpsc::Sender<EngineMsg>, watch::Receiver<Snapshot>) {
        let (inbox, receiver) = mpsc::channel(config.inbound_capacity.max(1));
        let store = TreeStore::new(config.orphan_capacity);
        let window = PageWindow::default();
        let (snapshots, snapshots_rx) = watch::channel(Snapshot {
            // `run` starts by checking the session
            session: SessionState::Checking,
            feed: FeedState::Disconnected,
            window,
            forest: store.snapshot(),
            has_next: false,
            has_previous: false,
            loading: false,
            last_error: None,
            held_orphans: 0,
        });
        let engine = Engine {
            config,
            backend,
            transport,
            inbox: inbox.clone(),
            snapshots,
            gate: SessionGate::new(),
            store,
            window,
            version: 0,
            checks: 0,
            loading: false,
            has_next: false,
            has_previous: false,
            feed: FeedState::Disconnected,
            feed_epoch: 0,
            last_error: None,
        };
        tokio::spawn(engine.run(receiver));
        (inbox, snapshots_rx)
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<EngineMsg>) {
        self.check_session();
        self.publish();
        while let Some(msg) = receiver.recv().await {
            let keep_going = self.handle(msg);
            self.publish();
            if !keep_going {
                break;
            }
        }
        self.teardown();
        tracing::info!("comment sync engine stopped");
    }

    fn publish(&self) {
        self.snapshots.send_replace(Snapshot {
            session: self.gate.state(),
            feed: self.feed,
            window: self.window,
            forest: self.store.snapshot(),
            has_next: self.has_next,
            has_previous: self.has_previous,
            loading: self.loading,
            last_error: self.last_error.clone(),
            held_orphans: self.store.orphan_count(),
        });
    }

    /// Applies one message, returning `false` once the engine should stop
    fn handle(&mut self, msg: EngineMsg) -> bool {
        match msg {
            EngineMsg::Command(cmd) => return self.handle_command(cmd),
            EngineMsg::SessionChecked { check, result } => {
                if check == self.checks {
                    self.session_checked(result);
                } else {
                    tracing::debug!(check, "discarding outdated session check");
                }
            }
            EngineMsg::LoginFinished { result, reply } => {
                self.checks += 1;
                match &result {
                    Ok(()) => {
                        self.last_error = None;
                        self.authenticate();
                    }
                    Err(error) => {
                        tracing::warn!(?error, "login failed");
                        self.last_error = Some(error.clone());
                        // the check this login superseded will never settle the state
                        if !self.gate.is_authenticated() {
                            self.gate.close();
                        }
                    }
                }
                let _ = reply.send(result);
            }
            EngineMsg::SessionLost { session, error } => {
                if self.gate.current() == Some(session) {
                    tracing::warn!(session, ?error, "session lost");
                    self.last_error = Some(error);
                    self.teardown();
                }
            }
            EngineMsg::PageFetched { version, result } => self.page_fetched(version, result),
            EngineMsg::Feed {
                session,
                epoch,
                event,
            } => self.feed_event(session, epoch, event),
        }
        true
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::CheckSession => self.check_session(),
            Command::Login(credentials, reply) => {
                if let Err(e) = credentials.validate() {
                    let _ = reply.send(Err(e));
                    return true;
                }
                let backend = self.backend.clone();
                let inbox = self.inbox.clone();
                tokio::spawn(async move {
                    let result = backend.login(&credentials).await;
                    let _ = inbox.send(EngineMsg::LoginFinished { result, reply }).await;
                });
            }
            Command::Logout(reply) => {
                // Local state goes away whatever the backend answers
                self.checks += 1;
                self.teardown();
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let result = backend.logout().await;
                    if let Err(error) = &result {
                        tracing::error!(?error, "failed to log out from the backend");
                    }
                    let _ = reply.send(result);
                });
            }
            Command::SortClicked(field) => {
                self.set_window(PageWindow::first(self.window.sort.clicked(field)))
            }
            Command::GotoPage(page) => self.set_window(self.window.with_page(page)),
            Command::NextPage => match self.has_next {
                true => self.set_window(self.window.next()),
                false => tracing::debug!("ignoring next page request on the last page"),
            },
            Command::PreviousPage => match self.window.previous() {
                Some(w) if self.has_previous => self.set_window(w),
                _ => tracing::debug!("ignoring previous page request on the first page"),
            },
            Command::Refresh => self.fetch(),
            Command::Shutdown => return false,
        }
        true
    }

    fn check_session(&mut self) {
        self.checks += 1;
        self.gate.begin_check();
        let check = self.checks;
        let backend = self.backend.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = backend.check_session().await;
            let _ = inbox.send(EngineMsg::SessionChecked { check, result }).await;
        });
    }

    fn session_checked(&mut self, result: Result<bool, Error>) {
        match result {
            Ok(true) if self.gate.is_authenticated() => (),
            Ok(true) => self.authenticate(),
            Ok(false) => {
                tracing::info!("no valid session");
                self.teardown();
            }
            Err(error) if self.gate.is_authenticated() => {
                tracing::warn!(?error, "failed checking session, keeping the current one");
            }
            Err(error) => {
                tracing::warn!(?error, "failed checking session");
                self.last_error = Some(error);
                self.teardown();
            }
        }
    }

    fn authenticate(&mut self) {
        self.teardown();
        self.gate.open(
            self.backend.clone(),
            self.transport.clone(),
            &self.config,
            self.inbox.clone(),
        );
        self.window = PageWindow::default();
        self.fetch();
    }

    /// Drops the session and everything that was synchronized under it
    fn teardown(&mut self) {
        self.gate.close();
        self.store.clear();
        self.version += 1;
        self.loading = false;
        self.has_next = false;
        self.has_previous = false;
        self.feed = FeedState::Disconnected;
        self.feed_epoch = 0;
    }

    fn set_window(&mut self, window: PageWindow) {
        if window == self.window {
            return;
        }
        tracing::debug!(page = window.page(), ordering = %window.sort.ordering(), "switching page window");
        self.window = window;
        self.fetch();
    }

    /// Fetches `self.window`, superseding any fetch in flight
    fn fetch(&mut self) {
        self.version += 1;
        if !self.gate.is_authenticated() {
            self.loading = false;
            return;
        }
        self.loading = true;
        let version = self.version;
        let window = self.window;
        let backend = self.backend.clone();
        let inbox = self.inbox.clone();
        tokio::spawn(async move {
            let result = backend.fetch_page(&window).await;
            let _ = inbox.send(EngineMsg::PageFetched { version, result }).await;
        });
    }

    fn page_fetched(&mut self, version: u64, result: Result<Page, Error>) {
        if version != self.version {
            tracing::debug!(version, current = self.version, "discarding stale page");
            return;
        }
        self.loading = false;
        match result {
            Ok(page) => {
                self.has_next = page.has_next();
                self.has_previous = page.has_previous();
                self.store.replace_page(page.results);
                self.last_error = None;
            }
            Err(Error::Unauthorized) => {
                tracing::warn!("backend rejected the session while fetching a page");
                self.last_error = Some(Error::Unauthorized);
                self.teardown();
            }
            Err(error) => {
                tracing::warn!(?error, "failed fetching page");
                self.last_error = Some(error);
            }
        }
    }

    fn feed_event(&mut self, session: u64, epoch: u64, event: FeedEvent) {
        if self.gate.current() != Some(session) || epoch < self.feed_epoch {
            tracing::trace!(session, epoch, "ignoring event from a previous feed connection");
            return;
        }
        self.feed_epoch = epoch;
        match event {
            FeedEvent::State(state) => self.feed = state,
            FeedEvent::Comment(c) if self.feed == FeedState::Connected => {
                let outcome = self.store.insert(c);
                tracing::trace!(?outcome, "merged live comment");
            }
            FeedEvent::Comment(c) => {
                tracing::debug!(id = ?c.id, "ignoring live comment received while not connected")
            }
        }
    }
}
