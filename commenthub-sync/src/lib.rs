mod client;
pub use client::Client;

mod config;
pub use config::{Config, ATTEMPT_SPACING, REFRESH_INTERVAL};

mod engine;
pub use engine::Snapshot;

mod feed;
pub use feed::{FeedFrame, FeedState, FeedStream, FeedTransport, WebsocketTransport};

mod gateway;
pub use gateway::Backend;

mod rest;
pub use rest::HttpBackend;

mod session;
pub use session::SessionState;

pub use commenthub_client::{self as store, api};
