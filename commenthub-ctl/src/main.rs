use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use commenthub_mock_server::MockBackend;
use commenthub_sync::{
    api::{Captcha, CommentId, Credentials, NewComment, NewUser, SortField},
    store::{project, ViewState},
    Client, Config, SessionState, Snapshot,
};
use tokio::io::AsyncBufReadExt;

const DEMO_COMMENTS: u64 = 60;
const DEMO_LIVE_SPACING: Duration = Duration::from_secs(2);

#[derive(structopt::StructOpt)]
struct Opt {
    /// Backend root, eg. `https://comments.example.org`
    #[structopt(short, long, default_value = "http://localhost:8000")]
    host: String,

    /// Account to log in with; the password is read from COMMENTHUB_PASSWORD
    #[structopt(short, long)]
    user: Option<String>,

    /// Run against an in-memory backend filled with generated comments
    #[structopt(long)]
    demo: bool,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// Print the comment tree, then print it again on every change
    Watch {
        /// Click on the header of this column (username, email or created_at); repeat
        /// to toggle the order
        #[structopt(short, long)]
        sort: Vec<String>,

        #[structopt(short, long, default_value = "1")]
        page: u32,
    },

    /// Post a comment, answering the captcha interactively
    Post {
        #[structopt(long)]
        username: String,

        #[structopt(long)]
        email: String,

        #[structopt(long)]
        homepage: Option<String>,

        /// Id of the comment to reply to
        #[structopt(long)]
        parent: Option<u64>,

        /// Body, with `<a>`, `<code>`, `<i>` and `<strong>` markup allowed
        text: String,
    },

    /// Create an account, with the password from COMMENTHUB_PASSWORD
    Register { name: String, email: String },
}

fn password() -> anyhow::Result<String> {
    std::env::var("COMMENTHUB_PASSWORD")
        .context("retrieving COMMENTHUB_PASSWORD environment variable")
}

/// Terminal rendering of a comment body: markup is dropped, text is kept
fn render(text: &str) -> String {
    let mut res = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match (in_tag, c) {
            (false, '<') => in_tag = true,
            (true, '>') => in_tag = false,
            (false, c) => res.push(c),
            (true, _) => (),
        }
    }
    res
}

fn print_tree(snap: &Snapshot, view: &ViewState) {
    println!(
        "=== page {}, ordering {}, session {:?}, feed {:?}{}",
        snap.window.page(),
        snap.window.sort.ordering(),
        snap.session,
        snap.feed,
        match snap.loading {
            true => ", loading",
            false => "",
        },
    );
    if let Some(e) = &snap.last_error {
        println!("!!! {e}");
    }
    for row in project(&snap.forest, view, render) {
        println!(
            "{}{} {} <{}> {}: {}",
            "  ".repeat(row.indent),
            row.id,
            row.username,
            row.email,
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.body,
        );
    }
    if snap.held_orphans > 0 {
        println!("({} replies waiting for their parent)", snap.held_orphans);
    }
}

/// Fills an in-memory backend with a few threads, and keeps posting to it
async fn demo_backend() -> (MockBackend, Credentials) {
    let backend = MockBackend::new();
    let creds = {
        let mut server = backend.0.lock().await;
        let creds = server.test_add_user("demo");
        for id in 1..=DEMO_COMMENTS {
            let parent = match id % 4 {
                0 => Some(id - 1),
                3 => Some(id / 2),
                _ => None,
            };
            server.test_insert_comment(parent);
        }
        creds
    };

    let live = backend.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(DEMO_LIVE_SPACING);
        let mut last = None;
        loop {
            ticker.tick().await;
            let mut server = live.0.lock().await;
            let c = server.test_insert_comment(last.take());
            tracing::debug!(id = ?c.id, parent = ?c.parent, "demo backend posted a comment");
            server.test_broadcast(&c);
            if c.parent.is_none() {
                last = Some(c.id.0);
            }
        }
    });

    (backend, creds)
}

async fn read_line(prompt: &str) -> anyhow::Result<String> {
    println!("{prompt}");
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    lines
        .next_line()
        .await
        .context("reading from stdin")?
        .ok_or_else(|| anyhow!("stdin closed"))
}

/// Logs in if credentials are available, then waits for the session to be settled
async fn log_in(
    client: &Client,
    demo: &Option<(MockBackend, Credentials)>,
    user: Option<String>,
) -> anyhow::Result<()> {
    let creds = match (demo, user) {
        (Some((_, creds)), _) => Some(creds.clone()),
        (None, Some(username)) => Some(Credentials {
            username,
            password: password()?,
        }),
        (None, None) => None,
    };
    if let Some(creds) = creds {
        client.login(creds).await.context("logging in")?;
    }
    let snap = client
        .wait_for(|s| s.session != SessionState::Checking)
        .await?;
    match snap.session {
        SessionState::Authenticated => Ok(()),
        _ => Err(anyhow!(
            "not logged in, pass --user and set COMMENTHUB_PASSWORD"
        )),
    }
}

async fn watch(client: &Client, sort: Vec<String>, page: u32) -> anyhow::Result<()> {
    for field in sort {
        let field =
            SortField::parse(&field).ok_or_else(|| anyhow!("unknown sort field {field:?}"))?;
        client.sort_by(field).await?;
    }
    if page != 1 {
        client.goto_page(page).await?;
    }

    let view = ViewState::default();
    let mut snapshots = client.subscribe();
    loop {
        let snap = snapshots.borrow().clone();
        print_tree(&snap, &view);
        tokio::select! {
            res = snapshots.changed() => res.context("comment sync engine stopped")?,
            res = tokio::signal::ctrl_c() => {
                res.context("listening for ctrl-c")?;
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let config = Config::from_host(&opt.host)?;

    let (client, demo) = match opt.demo {
        true => {
            let (backend, creds) = demo_backend().await;
            let client = Client::spawn(config, Arc::new(backend.clone()), Arc::new(backend.clone()));
            (client, Some((backend, creds)))
        }
        false => (Client::connect(config)?, None),
    };

    match opt.cmd {
        Command::Register { name, email } => {
            let user = NewUser {
                username: name,
                email,
                password: password()?,
            };
            client.register(&user).await.context("registering")?;
            println!("registered {}", user.username);
        }
        Command::Watch { sort, page } => {
            log_in(&client, &demo, opt.user).await?;
            watch(&client, sort, page).await?;
        }
        Command::Post {
            username,
            email,
            homepage,
            parent,
            text,
        } => {
            log_in(&client, &demo, opt.user).await?;
            let challenge = client.fetch_captcha().await.context("fetching captcha")?;
            let answer = match &demo {
                Some((backend, _)) => backend
                    .0
                    .lock()
                    .await
                    .test_captcha_answer(&challenge.key)
                    .map(String::from)
                    .unwrap_or_default(),
                None => {
                    read_line(&format!(
                        "captcha at {}{}, answer:",
                        opt.host.trim_end_matches('/'),
                        challenge.image_url
                    ))
                    .await?
                }
            };
            let comment = NewComment {
                username,
                email,
                homepage,
                text,
                parent: parent.map(CommentId),
                image: None,
                file: None,
                captcha: Captcha {
                    key: challenge.key,
                    text: answer.trim().to_uppercase(),
                },
            };
            let created = client
                .submit_comment(&comment)
                .await
                .context("posting comment")?;
            println!("posted {}", created.id);
        }
    }

    client.shutdown().await;
    Ok(())
}
