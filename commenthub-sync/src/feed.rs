//! Live comment feed

use std::{pin::Pin, sync::Arc, time::Duration};

use commenthub_api::{Comment, Error};
use futures::{channel::oneshot, future, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::engine::{EngineMsg, FeedEvent};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FeedFrame {
    Text(String),
    Binary(Vec<u8>),

    /// Ping, pong and the like, which carry no comment
    Control,
}

/// Frames of one connection; the stream ends when the server closes it
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedFrame, Error>> + Send>>;

#[async_trait::async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn connect(&self) -> Result<FeedStream, Error>;
}

pub struct WebsocketTransport {
    url: String,
}

impl WebsocketTransport {
    pub fn new(url: String) -> WebsocketTransport {
        WebsocketTransport { url }
    }
}

#[async_trait::async_trait]
impl FeedTransport for WebsocketTransport {
    async fn connect(&self) -> Result<FeedStream, Error> {
        let (sock, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::Transport(format!("connecting to {}: {e}", self.url)))?;
        let frames = sock
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .map(|msg| match msg {
                Ok(Message::Text(t)) => Ok(FeedFrame::Text(t)),
                Ok(Message::Binary(b)) => Ok(FeedFrame::Binary(b)),
                Ok(_) => Ok(FeedFrame::Control),
                Err(e) => Err(Error::Transport(format!("reading event feed: {e}"))),
            });
        Ok(Box::pin(frames))
    }
}

/// Keeps the event feed of `session` connected until `cancel`'s receiver is dropped
///
/// Every connection attempt gets a new epoch, and everything it reports is tagged with
/// it, so that the engine can tell late messages of a previous connection apart.
pub(crate) async fn run_feed(
    transport: Arc<dyn FeedTransport>,
    session: u64,
    spacing: Option<Duration>,
    inbox: mpsc::Sender<EngineMsg>,
    mut cancel: oneshot::Sender<()>,
) {
    let mut epoch = 0;
    loop {
        epoch += 1;
        let report = |event| EngineMsg::Feed {
            session,
            epoch,
            event,
        };

        if inbox
            .send(report(FeedEvent::State(FeedState::Connecting)))
            .await
            .is_err()
        {
            return;
        }
        let connected = tokio::select! {
            _ = cancel.cancellation() => return,
            res = transport.connect() => res,
        };
        match connected {
            Err(error) => tracing::warn!(session, epoch, ?error, "failed connecting to event feed"),
            Ok(mut frames) => {
                tracing::info!(session, epoch, "connected to event feed");
                if inbox
                    .send(report(FeedEvent::State(FeedState::Connected)))
                    .await
                    .is_err()
                {
                    return;
                }
                loop {
                    let frame = tokio::select! {
                        _ = cancel.cancellation() => {
                            tracing::info!(session, epoch, "disconnected from event feed");
                            return;
                        }
                        frame = frames.next() => frame,
                    };
                    let comment = match frame {
                        None => {
                            tracing::warn!(session, epoch, "event feed closed by the server");
                            break;
                        }
                        Some(Err(error)) => {
                            tracing::warn!(session, epoch, ?error, "lost event feed connection");
                            break;
                        }
                        Some(Ok(FeedFrame::Control)) => continue,
                        Some(Ok(FeedFrame::Text(t))) => Comment::decode(t.as_bytes()),
                        Some(Ok(FeedFrame::Binary(b))) => Comment::decode(&b),
                    };
                    match comment {
                        Ok(c) => {
                            if inbox.send(report(FeedEvent::Comment(c))).await.is_err() {
                                return;
                            }
                        }
                        Err(error) => {
                            tracing::warn!(session, epoch, ?error, "dropping malformed event feed message")
                        }
                    }
                }
            }
        }

        if inbox
            .send(report(FeedEvent::State(FeedState::Disconnected)))
            .await
            .is_err()
        {
            return;
        }
        let Some(spacing) = spacing else {
            tracing::info!(session, "event feed reconnection is disabled, staying disconnected");
            return;
        };
        tokio::select! {
            _ = cancel.cancellation() => return,
            _ = tokio::time::sleep(spacing) => (),
        }
    }
}
