use commenthub_api::{
    CaptchaChallenge, Comment, Credentials, Error, NewComment, NewUser, Page, PageWindow,
};

/// Request/response side of the backend
///
/// Implementations never touch the local forest: they only fetch and submit.
#[async_trait::async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Fetches the top-level comments of `window`; a page past the end is empty
    async fn fetch_page(&self, window: &PageWindow) -> Result<Page, Error>;

    async fn submit_comment(&self, comment: &NewComment) -> Result<Comment, Error>;

    async fn fetch_captcha(&self) -> Result<CaptchaChallenge, Error>;

    /// Whether the current credential is valid
    async fn check_session(&self) -> Result<bool, Error>;

    async fn refresh_session(&self) -> Result<(), Error>;

    async fn login(&self, credentials: &Credentials) -> Result<(), Error>;

    async fn logout(&self) -> Result<(), Error>;

    async fn register(&self, user: &NewUser) -> Result<(), Error>;
}
