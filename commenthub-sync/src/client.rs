use std::sync::Arc;

use commenthub_api::{
    CaptchaChallenge, Comment, Credentials, Error, NewComment, NewUser, SortField,
};
use futures::channel::oneshot;
use tokio::sync::{mpsc, watch};

use crate::{
    engine::{Command, Engine, EngineMsg},
    Backend, Config, FeedTransport, HttpBackend, Snapshot, WebsocketTransport,
};

fn stopped() -> Error {
    Error::Unknown(String::from("comment sync engine is not running"))
}

/// Handle on a running synchronization engine
///
/// Dropping it stops the engine.
pub struct Client {
    inbox: mpsc::Sender<EngineMsg>,
    snapshots: watch::Receiver<Snapshot>,
    backend: Arc<dyn Backend>,
}

impl Client {
    /// Starts the engine; this must be called from within a tokio runtime
    pub fn spawn(
        config: Config,
        backend: Arc<dyn Backend>,
        transport: Arc<dyn FeedTransport>,
    ) -> Client {
        let (inbox, snapshots) = Engine::spawn(config, backend.clone(), transport);
        Client {
            inbox,
            snapshots,
            backend,
        }
    }

    /// Starts the engine against the real backend described by `config`
    pub fn connect(config: Config) -> anyhow::Result<Client> {
        let backend = Arc::new(HttpBackend::new(&config)?);
        let transport = Arc::new(WebsocketTransport::new(config.feed_url.clone()));
        Ok(Client::spawn(config, backend, transport))
    }

    async fn command(&self, cmd: Command) -> Result<(), Error> {
        self.inbox
            .send(EngineMsg::Command(cmd))
            .await
            .map_err(|_| stopped())
    }

    async fn request(
        &self,
        cmd: impl FnOnce(oneshot::Sender<Result<(), Error>>) -> Command,
    ) -> Result<(), Error> {
        let (reply, answer) = oneshot::channel();
        self.command(cmd(reply)).await?;
        answer.await.map_err(|_| stopped())?
    }

    pub async fn check_session(&self) -> Result<(), Error> {
        self.command(Command::CheckSession).await
    }

    /// Logs in, resolving once the backend answered; the session then starts syncing
    pub async fn login(&self, credentials: Credentials) -> Result<(), Error> {
        self.request(|reply| Command::Login(credentials, reply))
            .await
    }

    /// Clears all local state right away, then tells the backend
    pub async fn logout(&self) -> Result<(), Error> {
        self.request(Command::Logout).await
    }

    pub async fn register(&self, user: &NewUser) -> Result<(), Error> {
        user.validate()?;
        self.backend.register(user).await
    }

    /// Applies a click on the header of `field`
    pub async fn sort_by(&self, field: SortField) -> Result<(), Error> {
        self.command(Command::SortClicked(field)).await
    }

    pub async fn goto_page(&self, page: u32) -> Result<(), Error> {
        self.command(Command::GotoPage(page)).await
    }

    pub async fn next_page(&self) -> Result<(), Error> {
        self.command(Command::NextPage).await
    }

    pub async fn previous_page(&self) -> Result<(), Error> {
        self.command(Command::PreviousPage).await
    }

    /// Re-fetches the current page, eg. after a transport error
    pub async fn refresh(&self) -> Result<(), Error> {
        self.command(Command::Refresh).await
    }

    /// Validates then submits `comment`
    ///
    /// The created comment is returned, but it only shows up in the forest once the live
    /// feed delivers it.
    pub async fn submit_comment(&self, comment: &NewComment) -> Result<Comment, Error> {
        comment.validate()?;
        self.backend.submit_comment(comment).await
    }

    pub async fn fetch_captcha(&self) -> Result<CaptchaChallenge, Error> {
        self.backend.fetch_captcha().await
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshots.clone()
    }

    /// Waits until a published snapshot satisfies `pred`
    pub async fn wait_for(&self, pred: impl Fn(&Snapshot) -> bool) -> Result<Snapshot, Error> {
        let mut snapshots = self.snapshots.clone();
        loop {
            {
                let snap = snapshots.borrow();
                if pred(&*snap) {
                    return Ok(snap.clone());
                }
            }
            snapshots.changed().await.map_err(|_| stopped())?;
        }
    }

    pub async fn shutdown(self) {
        let _ = self.command(Command::Shutdown).await;
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.inbox.try_send(EngineMsg::Command(Command::Shutdown));
    }
}
