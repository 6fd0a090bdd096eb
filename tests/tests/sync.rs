use std::{future::Future, sync::Arc, time::Duration};

use commenthub_api::{
    Captcha, Comment, CommentId, Error, NewComment, SortField, SortOrder, PAGE_SIZE,
};
use commenthub_client::comment;
use commenthub_mock_server::MockBackend;
use commenthub_sync::{Client, Config, FeedFrame, FeedState, SessionState, Snapshot};

const TIMEOUT: Duration = Duration::from_secs(5);

struct Harness {
    backend: MockBackend,
    client: Client,
}

fn config() -> Config {
    let mut config = Config::from_host("http://mock.invalid").expect("building config");
    config.reconnect_spacing = Some(Duration::from_millis(10));
    config
}

/// Logged-in client, with its page loaded and its feed connected
async fn setup(top_level: usize) -> Harness {
    setup_with(top_level, config()).await
}

async fn setup_with(top_level: usize, config: Config) -> Harness {
    let backend = MockBackend::new();
    let creds = {
        let mut server = backend.0.lock().await;
        for _ in 0..top_level {
            server.test_insert_comment(None);
        }
        server.test_add_user("alice")
    };
    let client = Client::spawn(config, Arc::new(backend.clone()), Arc::new(backend.clone()));
    client.login(creds).await.expect("logging in");
    let h = Harness { backend, client };
    h.wait(|s| s.feed == FeedState::Connected && !s.loading).await;
    h
}

async fn timeout<T>(what: &str, f: impl Future<Output = T>) -> T {
    tokio::time::timeout(TIMEOUT, f)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

impl Harness {
    async fn wait(&self, pred: impl Fn(&Snapshot) -> bool) -> Snapshot {
        timeout("snapshot", self.client.wait_for(pred))
            .await
            .expect("engine stopped")
    }

    async fn wait_feeds(&self, n: usize) {
        timeout("feed connections", async {
            while self.backend.0.lock().await.test_feed_count() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
    }

    async fn broadcast(&self, c: &Comment) {
        self.backend.0.lock().await.test_broadcast(c);
    }

    async fn post(&self, parent: Option<CommentId>, text: &str) -> Result<Comment, Error> {
        let challenge = self.client.fetch_captcha().await?;
        let answer = self
            .backend
            .0
            .lock()
            .await
            .test_captcha_answer(&challenge.key)
            .map(String::from)
            .expect("captcha was just issued");
        self.client
            .submit_comment(&NewComment {
                username: String::from("alice"),
                email: String::from("alice@example.org"),
                homepage: None,
                text: String::from(text),
                parent,
                image: None,
                file: None,
                captcha: Captcha {
                    key: challenge.key,
                    text: answer,
                },
            })
            .await
    }
}

fn top_ids(s: &Snapshot) -> Vec<u64> {
    s.forest.iter().map(|c| c.id.0).collect()
}

fn reply_ids(s: &Snapshot, id: CommentId) -> Vec<u64> {
    comment::find(&s.forest, id)
        .map(|c| c.replies.iter().map(|r| r.id.0).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn posted_comments_arrive_through_the_feed() {
    let h = setup(2).await;
    assert_eq!(top_ids(&h.client.snapshot()), vec![2, 1]);

    let top = h.post(None, "hello <strong>all</strong>").await.unwrap();
    let snap = h.wait(|s| s.forest.len() == 3).await;
    assert_eq!(top_ids(&snap), vec![top.id.0, 2, 1]);

    let reply = h.post(Some(CommentId(1)), "hi <i>one</i>").await.unwrap();
    let snap = h.wait(|s| comment::contains(&s.forest, reply.id)).await;
    assert_eq!(reply_ids(&snap, CommentId(1)), vec![reply.id.0]);
    assert_eq!(snap.forest.len(), 3);
}

#[tokio::test]
async fn new_top_level_comments_are_prepended_whatever_the_order() {
    let h = setup(3).await;
    h.client.sort_by(SortField::CreatedAt).await.unwrap();
    let snap = h
        .wait(|s| s.window.sort.order == SortOrder::Asc && !s.loading)
        .await;
    assert_eq!(top_ids(&snap), vec![1, 2, 3]);

    let c = h.post(None, "late").await.unwrap();
    let snap = h.wait(|s| s.forest.len() == 4).await;
    assert_eq!(top_ids(&snap), vec![c.id.0, 1, 2, 3]);
}

#[tokio::test]
async fn duplicate_deliveries_are_absorbed() {
    let h = setup(1).await;
    let reply = Comment::stub(50, Some(1));
    h.broadcast(&reply).await;
    h.broadcast(&reply).await;
    h.broadcast(&Comment::stub(1, None)).await;
    let marker = Comment::stub(51, None);
    h.broadcast(&marker).await;

    let snap = h.wait(|s| comment::contains(&s.forest, marker.id)).await;
    assert_eq!(top_ids(&snap), vec![51, 1]);
    assert_eq!(reply_ids(&snap, CommentId(1)), vec![50]);
    assert_eq!(comment::count(&snap.forest), 3);
}

#[tokio::test]
async fn replies_wait_for_their_parent() {
    let h = setup(0).await;
    h.broadcast(&Comment::stub(5, Some(99))).await;
    h.broadcast(&Comment::stub(6, Some(5))).await;
    let snap = h.wait(|s| s.held_orphans == 2).await;
    assert!(snap.forest.is_empty());

    h.broadcast(&Comment::stub(99, None)).await;
    let snap = h.wait(|s| s.held_orphans == 0).await;
    assert_eq!(top_ids(&snap), vec![99]);
    assert_eq!(reply_ids(&snap, CommentId(99)), vec![5]);
    assert_eq!(reply_ids(&snap, CommentId(5)), vec![6]);
}

#[tokio::test]
async fn page_change_drops_unresolved_orphans() {
    let h = setup(PAGE_SIZE + 2).await;
    h.broadcast(&Comment::stub(500, Some(400))).await;
    h.wait(|s| s.held_orphans == 1).await;

    h.client.next_page().await.unwrap();
    let snap = h.wait(|s| s.window.page() == 2 && !s.loading).await;
    assert_eq!(snap.forest.len(), 2);
    assert_eq!(snap.held_orphans, 0);
    assert!(snap.has_previous && !snap.has_next);

    h.client.previous_page().await.unwrap();
    let snap = h.wait(|s| s.window.page() == 1 && !s.loading).await;
    assert_eq!(snap.forest.len(), PAGE_SIZE);
}

#[tokio::test]
async fn stale_fetch_never_lands() {
    let h = setup(PAGE_SIZE + 5).await;
    h.backend
        .0
        .lock()
        .await
        .test_set_page_delay(2, Duration::from_millis(300));

    h.client.goto_page(2).await.unwrap();
    h.client.sort_by(SortField::Username).await.unwrap();
    let snap = h
        .wait(|s| s.window.sort.field == SortField::Username && !s.loading)
        .await;
    assert_eq!(snap.window.page(), 1);
    assert_eq!(snap.window.sort.order, SortOrder::Desc);
    let expected = top_ids(&snap);
    assert_eq!(expected.len(), PAGE_SIZE);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let snap = h.client.snapshot();
    assert_eq!(snap.window.page(), 1);
    assert_eq!(top_ids(&snap), expected);
}

#[tokio::test]
async fn past_the_end_page_is_empty() {
    let h = setup(3).await;
    h.client.goto_page(7).await.unwrap();
    let snap = h.wait(|s| s.window.page() == 7 && !s.loading).await;
    assert!(snap.forest.is_empty());
    assert!(!snap.has_next);
    assert_eq!(snap.last_error, None);
}

#[tokio::test]
async fn logout_tears_everything_down() {
    let h = setup(4).await;
    h.broadcast(&Comment::stub(70, Some(60))).await;
    h.wait(|s| s.held_orphans == 1).await;

    h.client.logout().await.unwrap();
    let snap = h.wait(|s| s.session == SessionState::Unauthenticated).await;
    assert_eq!(snap.feed, FeedState::Disconnected);
    assert!(snap.forest.is_empty());
    assert_eq!(snap.held_orphans, 0);
    h.wait_feeds(0).await;

    // nothing flows in anymore
    h.broadcast(&Comment::stub(71, None)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.client.snapshot().forest.is_empty());
}

#[tokio::test]
async fn failed_backend_logout_still_clears_locally() {
    let h = setup(2).await;
    h.backend.0.lock().await.test_expire_session();
    assert_eq!(h.client.logout().await, Err(Error::Unauthorized));
    let snap = h.wait(|s| s.session == SessionState::Unauthenticated).await;
    assert!(snap.forest.is_empty());
}

#[tokio::test]
async fn relogin_does_not_double_deliver() {
    let h = setup(1).await;
    let creds = h.backend.0.lock().await.test_add_user("bob");
    h.client.logout().await.unwrap();
    h.client.login(creds).await.unwrap();
    h.wait(|s| s.feed == FeedState::Connected && !s.loading).await;
    h.wait_feeds(1).await;

    let c = h.post(None, "once").await.unwrap();
    let snap = h.wait(|s| s.forest.len() == 2).await;
    assert_eq!(top_ids(&snap), vec![c.id.0, 1]);
}

#[tokio::test]
async fn feed_reconnects_after_server_drop() {
    let h = setup(1).await;
    h.backend.0.lock().await.test_disconnect_feeds();
    h.wait_feeds(1).await;
    h.wait(|s| s.feed == FeedState::Connected).await;

    let c = h.post(Some(CommentId(1)), "after reconnect").await.unwrap();
    let snap = h.wait(|s| comment::contains(&s.forest, c.id)).await;
    assert_eq!(reply_ids(&snap, CommentId(1)), vec![c.id.0]);
}

#[tokio::test]
async fn feed_stays_down_when_reconnection_is_disabled() {
    let mut config = config();
    config.reconnect_spacing = None;
    let h = setup_with(1, config).await;
    h.backend.0.lock().await.test_disconnect_feeds();
    let snap = h.wait(|s| s.feed == FeedState::Disconnected).await;
    assert_eq!(snap.session, SessionState::Authenticated);
    assert_eq!(top_ids(&snap), vec![1]);
}

#[tokio::test]
async fn refused_feed_keeps_retrying() {
    let h = setup(1).await;
    h.backend.0.lock().await.test_refuse_feeds(true);
    h.backend.0.lock().await.test_disconnect_feeds();
    h.wait(|s| s.feed != FeedState::Connected).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = h.client.snapshot();
    assert_ne!(snap.feed, FeedState::Connected);
    assert_eq!(snap.session, SessionState::Authenticated);
    assert_eq!(top_ids(&snap), vec![1]);

    h.backend.0.lock().await.test_refuse_feeds(false);
    h.wait(|s| s.feed == FeedState::Connected).await;
    h.broadcast(&Comment::stub(2, None)).await;
    let snap = h.wait(|s| s.forest.len() == 2).await;
    assert_eq!(top_ids(&snap), vec![2, 1]);
}

#[tokio::test]
async fn malformed_messages_do_not_break_the_feed() {
    let h = setup(1).await;
    h.backend
        .0
        .lock()
        .await
        .test_push_raw(FeedFrame::Text(String::from("{\"username\": \"no id\"}")));
    h.backend
        .0
        .lock()
        .await
        .test_push_raw(FeedFrame::Binary(vec![0xff, 0x00]));
    h.backend.0.lock().await.test_push_raw(FeedFrame::Control);
    h.broadcast(&Comment::stub(9, None)).await;

    let snap = h.wait(|s| s.forest.len() == 2).await;
    assert_eq!(top_ids(&snap), vec![9, 1]);
    assert_eq!(snap.feed, FeedState::Connected);
    assert_eq!(h.backend.0.lock().await.test_feed_count(), 1);
}

#[tokio::test]
async fn transport_failure_keeps_the_forest() {
    let h = setup(2).await;
    h.backend
        .0
        .lock()
        .await
        .test_fail_next_fetch(Error::Transport(String::from("connection reset")));
    h.client.refresh().await.unwrap();
    let snap = h.wait(|s| s.last_error.is_some()).await;
    assert!(snap.last_error.as_ref().is_some_and(Error::is_retryable));
    assert_eq!(top_ids(&snap), vec![2, 1]);
    assert_eq!(snap.session, SessionState::Authenticated);

    h.client.refresh().await.unwrap();
    let snap = h.wait(|s| s.last_error.is_none() && !s.loading).await;
    assert_eq!(top_ids(&snap), vec![2, 1]);
}

#[tokio::test]
async fn unauthorized_fetch_tears_down() {
    let h = setup(2).await;
    h.backend
        .0
        .lock()
        .await
        .test_fail_next_fetch(Error::Unauthorized);
    h.client.refresh().await.unwrap();
    let snap = h.wait(|s| s.session == SessionState::Unauthenticated).await;
    assert!(snap.forest.is_empty());
    assert_eq!(snap.last_error, Some(Error::Unauthorized));
}

#[tokio::test]
async fn refresh_failure_ends_the_session() {
    let mut config = config();
    config.refresh_interval = Duration::from_millis(20);
    let h = setup_with(2, config).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.client.snapshot().session, SessionState::Authenticated);

    h.backend.0.lock().await.test_expire_session();
    let snap = h.wait(|s| s.session == SessionState::Unauthenticated).await;
    assert!(snap.forest.is_empty());
    h.wait_feeds(0).await;
}

#[tokio::test]
async fn no_session_means_no_sync() {
    let backend = MockBackend::new();
    backend.0.lock().await.test_insert_comment(None);
    let client = Client::spawn(config(), Arc::new(backend.clone()), Arc::new(backend.clone()));
    let snap = timeout(
        "session check",
        client.wait_for(|s| s.session != SessionState::Checking),
    )
    .await
    .unwrap();
    assert_eq!(snap.session, SessionState::Unauthenticated);
    assert!(snap.forest.is_empty());
    assert_eq!(backend.0.lock().await.test_feed_count(), 0);
}

#[tokio::test]
async fn invalid_submissions_never_reach_the_backend() {
    let h = setup(1).await;
    let challenge = h.client.fetch_captcha().await.unwrap();
    let comment = NewComment {
        username: String::from("alice"),
        email: String::from("alice@example.org"),
        homepage: None,
        text: String::from("<script>alert(1)</script>"),
        parent: None,
        image: None,
        file: None,
        captcha: Captcha {
            key: challenge.key.clone(),
            text: String::from("whatever"),
        },
    };
    assert!(matches!(
        h.client.submit_comment(&comment).await,
        Err(Error::Validation { field, .. }) if field == "text"
    ));
    // the captcha would have been consumed by the backend
    assert!(h
        .backend
        .0
        .lock()
        .await
        .test_captcha_answer(&challenge.key)
        .is_some());
}

#[tokio::test]
async fn wrong_captcha_is_reported() {
    let h = setup(1).await;
    let challenge = h.client.fetch_captcha().await.unwrap();
    let res = h
        .client
        .submit_comment(&NewComment {
            username: String::from("alice"),
            email: String::from("alice@example.org"),
            homepage: None,
            text: String::from("hi"),
            parent: None,
            image: None,
            file: None,
            captcha: Captcha {
                key: challenge.key,
                text: String::from("WRONG1"),
            },
        })
        .await;
    assert_eq!(res, Err(Error::InvalidCaptcha));
}
