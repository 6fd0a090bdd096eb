use std::time::Duration;

use anyhow::{anyhow, bail};

/// How often the session credential gets refreshed while authenticated
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(4 * 60);

/// Space each event feed reconnect attempt by ATTEMPT_SPACING
pub const ATTEMPT_SPACING: Duration = Duration::from_secs(1);

pub const MAX_RETRIES: u32 = 3;
pub const ORPHAN_CAPACITY: usize = commenthub_client::DEFAULT_ORPHAN_CAPACITY;
pub const INBOUND_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct Config {
    /// Base of the REST endpoints, eg. `https://example.org/api`
    pub api_base: String,

    /// Url of the live comment feed, eg. `wss://example.org/ws/comments/`
    pub feed_url: String,

    pub refresh_interval: Duration,

    /// `None` disables reconnection: a lost feed stays disconnected until next login
    pub reconnect_spacing: Option<Duration>,

    /// Retries of transient HTTP failures, on top of the first attempt
    pub max_retries: u32,

    pub orphan_capacity: usize,
    pub inbound_capacity: usize,
}

impl Config {
    /// Derives all the endpoints from the backend's `http(s)://` root
    pub fn from_host(host: &str) -> anyhow::Result<Config> {
        let host = host.trim_end_matches('/');
        let rest = host
            .strip_prefix("http")
            .ok_or_else(|| anyhow!("host {host:?} is not an http(s) url"))?;
        if !rest.starts_with("://") && !rest.starts_with("s://") {
            bail!("host {host:?} is not an http(s) url");
        }
        Ok(Config {
            api_base: format!("{host}/api"),
            feed_url: format!("ws{rest}/ws/comments/"),
            refresh_interval: REFRESH_INTERVAL,
            reconnect_spacing: Some(ATTEMPT_SPACING),
            max_retries: MAX_RETRIES,
            orphan_capacity: ORPHAN_CAPACITY,
            inbound_capacity: INBOUND_CAPACITY,
        })
    }
}
