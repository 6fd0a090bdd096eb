use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use commenthub_client::{
    api::{
        CaptchaChallenge, Comment, CommentId, Credentials, Error, NewComment, NewUser, Page,
        PageWindow, PAGE_SIZE,
    },
    OrderExt,
};
use commenthub_sync::{Backend, FeedFrame, FeedStream, FeedTransport};
use rand::{seq::SliceRandom, Rng};
use tokio::sync::{mpsc, Mutex};

/// Characters captchas are drawn from, without the easily confused ones
const CAPTCHA_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CAPTCHA_LEN: usize = 6;

/// In-memory stand-in for the comment backend, with a single client session
pub struct MockServer {
    users: Vec<DbUser>,
    session: Option<String>,
    // flat, every comment with empty `replies`
    comments: Vec<Comment>,
    next_id: u64,
    captchas: HashMap<String, String>,
    feeds: Vec<mpsc::UnboundedSender<FeedFrame>>,
    refuse_feeds: bool,
    page_delays: HashMap<u32, Duration>,
    fail_next_fetch: Option<Error>,
}

#[derive(Debug)]
struct DbUser {
    name: String,
    email: String,
    pass: String,
}

impl Default for MockServer {
    fn default() -> MockServer {
        MockServer::new()
    }
}

impl MockServer {
    pub fn new() -> MockServer {
        MockServer {
            users: Vec::new(),
            session: None,
            comments: Vec::new(),
            next_id: 1,
            captchas: HashMap::new(),
            feeds: Vec::new(),
            refuse_feeds: false,
            page_delays: HashMap::new(),
            fail_next_fetch: None,
        }
    }

    fn relay(&mut self, frame: FeedFrame) {
        self.feeds.retain(|f| matches!(f.send(frame.clone()), Ok(())));
    }

    fn require_session(&self) -> Result<&str, Error> {
        self.session.as_deref().ok_or(Error::Unauthorized)
    }

    pub fn register(&mut self, u: &NewUser) -> Result<(), Error> {
        u.validate()?;
        if self.users.iter().any(|db| db.name == u.username) {
            return Err(Error::Unknown(String::from("Username already taken")));
        }
        let email = u.email.trim().to_lowercase();
        if self.users.iter().any(|db| db.email == email) {
            return Err(Error::Validation {
                field: String::from("email"),
                message: String::from("Email already registered"),
            });
        }
        self.users.push(DbUser {
            name: u.username.clone(),
            email,
            pass: u.password.clone(),
        });
        Ok(())
    }

    pub fn login(&mut self, c: &Credentials) -> Result<(), Error> {
        c.validate()?;
        match self
            .users
            .iter()
            .any(|u| u.name == c.username && u.pass == c.password)
        {
            true => {
                self.session = Some(c.username.clone());
                Ok(())
            }
            false => Err(Error::Unauthorized),
        }
    }

    pub fn logout(&mut self) -> Result<(), Error> {
        self.require_session()?;
        self.session = None;
        Ok(())
    }

    pub fn check_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn refresh_session(&self) -> Result<(), Error> {
        self.require_session().map(|_| ())
    }

    /// Top-level comments of `window`, each with its whole reply tree
    ///
    /// Past the last page, the page is empty, like the 404 the HTTP gateway maps.
    pub fn fetch_page(&mut self, window: &PageWindow) -> Result<Page, Error> {
        self.require_session()?;
        if let Some(e) = self.fail_next_fetch.take() {
            return Err(e);
        }
        let mut top = self
            .comments
            .iter()
            .filter(|c| c.is_top_level())
            .cloned()
            .collect::<Vec<_>>();
        window.sort.sort(&mut top);
        let count = top.len();
        let start = (window.page() as usize - 1) * PAGE_SIZE;
        if start >= count && window.page() > 1 {
            return Ok(Page::empty());
        }
        let results = top
            .into_iter()
            .skip(start)
            .take(PAGE_SIZE)
            .map(|c| self.with_replies(c))
            .collect();
        let link = |w: PageWindow| {
            format!("/api/comments/?page={}&ordering={}", w.page(), w.sort.ordering())
        };
        Ok(Page {
            count: Some(count as u64),
            results,
            next: (start + PAGE_SIZE < count).then(|| link(window.next())),
            previous: window.previous().map(link),
        })
    }

    fn with_replies(&self, mut root: Comment) -> Comment {
        let mut children = HashMap::<CommentId, Vec<CommentId>>::new();
        let mut nodes = HashMap::new();
        for c in &self.comments {
            if let Some(p) = c.parent {
                children.entry(p).or_default().push(c.id);
                nodes.insert(c.id, c.clone());
            }
        }
        for kids in children.values_mut() {
            kids.sort();
        }

        // breadth-first listing of the subtree, so that children come after their parent
        let mut order = vec![root.id];
        let mut i = 0;
        while let Some(id) = order.get(i).copied() {
            order.extend(children.get(&id).into_iter().flatten().copied());
            i += 1;
        }
        let take_replies = |id: &CommentId, nodes: &mut HashMap<CommentId, Comment>| {
            children
                .get(id)
                .into_iter()
                .flatten()
                .filter_map(|k| nodes.remove(k))
                .collect::<Vec<_>>()
        };
        for id in order.iter().skip(1).rev() {
            let replies = take_replies(id, &mut nodes);
            if let Some(node) = nodes.get_mut(id) {
                node.replies = replies;
            }
        }
        root.replies = take_replies(&root.id, &mut nodes);
        root
    }

    pub fn fetch_captcha(&mut self) -> CaptchaChallenge {
        let mut rng = rand::thread_rng();
        let text = (0..CAPTCHA_LEN)
            .map(|_| char::from(CAPTCHA_CHARS[rng.gen_range(0..CAPTCHA_CHARS.len())]))
            .collect::<String>();
        let key = uuid::Uuid::new_v4().to_string();
        self.captchas.insert(key.clone(), text);
        CaptchaChallenge {
            image_url: format!("/captcha/image/{key}/"),
            key,
        }
    }

    pub fn submit_comment(&mut self, c: &NewComment) -> Result<Comment, Error> {
        self.require_session()?;
        c.validate()?;
        // captchas are single-use, whether the answer was right or not
        let expected = self
            .captchas
            .remove(&c.captcha.key)
            .ok_or(Error::InvalidCaptcha)?;
        if expected != c.captcha.text.to_uppercase() {
            return Err(Error::InvalidCaptcha);
        }
        if let Some(parent) = c.parent {
            if !self.comments.iter().any(|p| p.id == parent) {
                return Err(Error::Validation {
                    field: String::from("parent"),
                    message: format!("Invalid pk \"{}\" - object does not exist.", parent.0),
                });
            }
        }
        let comment = Comment {
            id: CommentId(self.next_id),
            parent: c.parent,
            username: c.username.clone(),
            email: c.email.clone(),
            homepage: c.homepage.clone(),
            text: c.text.clone(),
            image: c.image.clone(),
            file: c.file.clone(),
            created_at: Utc::now(),
            replies: Vec::new(),
        };
        self.next_id += 1;
        self.comments.push(comment.clone());
        self.test_broadcast(&comment);
        Ok(comment)
    }

    pub fn open_feed(&mut self) -> Result<mpsc::UnboundedReceiver<FeedFrame>, Error> {
        if self.refuse_feeds {
            return Err(Error::Transport(String::from("connection refused")));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        self.feeds.push(sender);
        Ok(receiver)
    }

    /// Adds a user, returning its credentials
    pub fn test_add_user(&mut self, name: &str) -> Credentials {
        let user = NewUser {
            username: String::from(name),
            email: format!("{name}@example.org"),
            password: format!("{name}-password"),
        };
        self.register(&user)
            .unwrap_or_else(|e| panic!("registering test user {name}: {e}"));
        Credentials {
            username: user.username,
            password: user.password,
        }
    }

    pub fn test_captcha_answer(&self, key: &str) -> Option<&str> {
        self.captchas.get(key).map(|s| s.as_str())
    }

    /// Stores a comment without telling the feeds, as if it was created before they
    /// connected
    pub fn test_insert_comment(&mut self, parent: Option<u64>) -> Comment {
        let mut c = Comment::stub(self.next_id, parent);
        c.created_at = Utc::now();
        self.next_id += 1;
        self.comments.push(c.clone());
        c
    }

    /// Sends `c` to the feeds without storing it
    pub fn test_broadcast(&mut self, c: &Comment) {
        match serde_json::to_string(c) {
            Ok(json) => self.relay(FeedFrame::Text(json)),
            Err(e) => tracing::error!(error = ?e, "failed serializing comment for the feed"),
        }
    }

    pub fn test_push_raw(&mut self, frame: FeedFrame) {
        self.relay(frame);
    }

    /// Closes every open feed connection, as a server restart would
    pub fn test_disconnect_feeds(&mut self) {
        self.feeds.clear();
    }

    pub fn test_refuse_feeds(&mut self, refuse: bool) {
        self.refuse_feeds = refuse;
    }

    pub fn test_feed_count(&mut self) -> usize {
        self.feeds.retain(|f| !f.is_closed());
        self.feeds.len()
    }

    pub fn test_set_page_delay(&mut self, page: u32, delay: Duration) {
        self.page_delays.insert(page, delay);
    }

    pub fn test_fail_next_fetch(&mut self, e: Error) {
        self.fail_next_fetch = Some(e);
    }

    /// Invalidates the session behind the client's back
    pub fn test_expire_session(&mut self) {
        self.session = None;
    }

    pub fn test_shuffle_comments(&mut self) {
        self.comments.shuffle(&mut rand::thread_rng());
    }
}

/// Shared handle implementing the client-side backend traits on top of a `MockServer`
#[derive(Clone, Default)]
pub struct MockBackend(pub Arc<Mutex<MockServer>>);

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend::default()
    }
}

#[async_trait::async_trait]
impl Backend for MockBackend {
    async fn fetch_page(&self, window: &PageWindow) -> Result<Page, Error> {
        let (res, delay) = {
            let mut server = self.0.lock().await;
            let delay = server.page_delays.get(&window.page()).copied();
            (server.fetch_page(window), delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        res
    }

    async fn submit_comment(&self, comment: &NewComment) -> Result<Comment, Error> {
        self.0.lock().await.submit_comment(comment)
    }

    async fn fetch_captcha(&self) -> Result<CaptchaChallenge, Error> {
        Ok(self.0.lock().await.fetch_captcha())
    }

    async fn check_session(&self) -> Result<bool, Error> {
        Ok(self.0.lock().await.check_session())
    }

    async fn refresh_session(&self) -> Result<(), Error> {
        self.0.lock().await.refresh_session()
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), Error> {
        self.0.lock().await.login(credentials)
    }

    async fn logout(&self) -> Result<(), Error> {
        self.0.lock().await.logout()
    }

    async fn register(&self, user: &NewUser) -> Result<(), Error> {
        self.0.lock().await.register(user)
    }
}

#[async_trait::async_trait]
impl FeedTransport for MockBackend {
    async fn connect(&self) -> Result<FeedStream, Error> {
        let receiver = self.0.lock().await.open_feed()?;
        let frames = futures::stream::unfold(receiver, |mut r| async move {
            r.recv().await.map(|f| (Ok::<_, Error>(f), r))
        });
        Ok(Box::pin(frames))
    }
}
