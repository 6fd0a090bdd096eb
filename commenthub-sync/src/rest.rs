use anyhow::Context;
use commenthub_api::{
    CaptchaChallenge, Comment, Credentials, Error, NewComment, NewUser, Page, PageWindow,
};
use reqwest::{Method, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};

use crate::{Backend, Config};

/// How the transport may treat a request after a transient failure
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Delivery {
    /// Reads, which the retry middleware may repeat
    Retried,

    /// Writes, which the backend may have applied even if the answer got lost
    AtMostOnce,
}

impl Delivery {
    fn of(method: &Method) -> Delivery {
        match [Method::GET, Method::HEAD].contains(method) {
            true => Delivery::Retried,
            false => Delivery::AtMostOnce,
        }
    }
}

/// `Backend` talking to the real REST API
///
/// Credentials live in HttpOnly cookies, kept by the cookie store both clients share.
pub struct HttpBackend {
    api_base: String,
    retrying: ClientWithMiddleware,
    once: ClientWithMiddleware,
}

impl HttpBackend {
    pub fn new(config: &Config) -> anyhow::Result<HttpBackend> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("building http client")?;
        let policy = ExponentialBackoff::builder().build_with_max_retries(config.max_retries);
        let retrying = reqwest_middleware::ClientBuilder::new(client.clone())
            .with(RetryTransientMiddleware::new_with_policy(policy))
            .build();
        let once = reqwest_middleware::ClientBuilder::new(client).build();
        Ok(HttpBackend {
            api_base: config.api_base.clone(),
            retrying,
            once,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.api_base)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let client = match Delivery::of(&method) {
            Delivery::Retried => &self.retrying,
            Delivery::AtMostOnce => &self.once,
        };
        client.request(method, self.url(path))
    }

    async fn send(&self, req: RequestBuilder) -> Result<(StatusCode, Vec<u8>), Error> {
        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{e:#}")))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("reading response body: {e}")))?;
        Ok((status, body.to_vec()))
    }

    /// Sends `method path`, completed by `build`, refreshing the credential and replaying
    /// the request once if the backend answers 401
    async fn call<F>(&self, method: Method, path: &str, build: F) -> Result<(StatusCode, Vec<u8>), Error>
    where
        F: Fn(RequestBuilder) -> RequestBuilder + Send + Sync,
    {
        let (status, body) = self.send(build(self.request(method.clone(), path))).await?;
        if status != StatusCode::UNAUTHORIZED {
            return Ok((status, body));
        }
        tracing::debug!(path, "credential expired, refreshing it before replaying the request");
        self.refresh_session().await?;
        self.send(build(self.request(method, path))).await
    }
}

fn decode<T: for<'de> serde::Deserialize<'de>>(what: &str, body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| Error::Protocol(format!("parsing {what}: {e}")))
}

fn expect_success(status: StatusCode, body: &[u8]) -> Result<(), Error> {
    match status.is_success() {
        true => Ok(()),
        false => Err(Error::from_response(status, body)),
    }
}

#[async_trait::async_trait]
impl Backend for HttpBackend {
    async fn fetch_page(&self, window: &PageWindow) -> Result<Page, Error> {
        let query = window.query();
        let (status, body) = self
            .call(Method::GET, "comments/", |r| r.query(&query))
            .await?;
        match status {
            s if s.is_success() => Page::decode(&body),
            StatusCode::NOT_FOUND => {
                tracing::debug!(page = window.page(), "page is past the end, showing it empty");
                Ok(Page::empty())
            }
            s => Err(Error::from_response(s, &body)),
        }
    }

    async fn submit_comment(&self, comment: &NewComment) -> Result<Comment, Error> {
        let (status, body) = self
            .call(Method::POST, "comments/", |r| r.json(comment))
            .await?;
        expect_success(status, &body)?;
        Comment::decode(&body)
    }

    async fn fetch_captcha(&self) -> Result<CaptchaChallenge, Error> {
        let (status, body) = self.call(Method::GET, "captcha/", |r| r).await?;
        expect_success(status, &body)?;
        decode("captcha challenge", &body)
    }

    async fn check_session(&self) -> Result<bool, Error> {
        match self.call(Method::GET, "auth/check/", |r| r).await {
            Ok((s, _)) if s.is_success() => Ok(true),
            Ok((StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _)) => Ok(false),
            Ok((s, body)) => Err(Error::from_response(s, &body)),
            // the refresh credential got rejected too
            Err(Error::Unauthorized) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn refresh_session(&self) -> Result<(), Error> {
        let (status, body) = self.send(self.request(Method::POST, "token/refresh/")).await?;
        expect_success(status, &body)
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), Error> {
        let (status, body) = self
            .send(self.request(Method::POST, "auth/login/").json(credentials))
            .await?;
        expect_success(status, &body)
    }

    async fn logout(&self) -> Result<(), Error> {
        let (status, body) = self.call(Method::POST, "auth/logout/", |r| r).await?;
        expect_success(status, &body)
    }

    async fn register(&self, user: &NewUser) -> Result<(), Error> {
        let (status, body) = self
            .send(self.request(Method::POST, "auth/register/").json(user))
            .await?;
        expect_success(status, &body)
    }
}
