use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::{Error, Time};

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct CommentId(pub u64);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Base timestamp handed out by `Comment::stub`, so that stubs sort by id
const STUB_EPOCH_SECS: i64 = 1_700_000_000;

/// A comment, owning the whole thread of its replies
///
/// Threads can be arbitrarily deep, so `Clone` and `Drop` walk them with an explicit
/// stack instead of recursing once per level.
#[derive(Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,

    /// `None` for top-level comments
    #[serde(default)]
    pub parent: Option<CommentId>,

    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub homepage: Option<String>,

    /// Body, already sanitized by the backend
    #[serde(default)]
    pub text: String,

    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub file: Option<String>,

    pub created_at: Time,

    /// Child comments, in arrival order
    #[serde(default)]
    pub replies: Vec<Comment>,
}

impl Comment {
    pub fn stub(id: u64, parent: Option<u64>) -> Comment {
        let created_at = DateTime::<Utc>::from_timestamp(STUB_EPOCH_SECS, 0).unwrap_or_default()
            + Duration::seconds(id as i64);
        Comment {
            id: CommentId(id),
            parent: parent.map(CommentId),
            username: format!("user{id}"),
            email: format!("user{id}@example.org"),
            homepage: None,
            text: format!("comment {id}"),
            image: None,
            file: None,
            created_at,
            replies: Vec::new(),
        }
    }

    /// Copy of this comment alone, without its replies
    pub fn detached(&self) -> Comment {
        Comment {
            id: self.id,
            parent: self.parent,
            username: self.username.clone(),
            email: self.email.clone(),
            homepage: self.homepage.clone(),
            text: self.text.clone(),
            image: self.image.clone(),
            file: self.file.clone(),
            created_at: self.created_at,
            replies: Vec::new(),
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    /// Parses one push-channel message
    ///
    /// Anything that is not a JSON object with at least an `id` and a `created_at` is a
    /// protocol error.
    pub fn decode(msg: &[u8]) -> Result<Comment, Error> {
        serde_json::from_slice(msg).map_err(|err| {
            Error::Protocol(format!("failed parsing comment from feed message: {err}"))
        })
    }
}

impl Clone for Comment {
    fn clone(&self) -> Comment {
        // `open[i]` is the copy being filled at depth `i + 1`, under `root`
        fn close(root: &mut Comment, open: &mut Vec<Comment>) {
            if let Some(done) = open.pop() {
                match open.last_mut() {
                    Some(parent) => parent.replies.push(done),
                    None => root.replies.push(done),
                }
            }
        }

        let mut root = self.detached();
        let mut open = Vec::new();
        let mut todo = self.replies.iter().rev().map(|r| (1, r)).collect::<Vec<_>>();
        while let Some((depth, c)) = todo.pop() {
            while open.len() >= depth {
                close(&mut root, &mut open);
            }
            open.push(c.detached());
            todo.extend(c.replies.iter().rev().map(|r| (depth + 1, r)));
        }
        while !open.is_empty() {
            close(&mut root, &mut open);
        }
        root
    }
}

impl Drop for Comment {
    fn drop(&mut self) {
        // every comment popped here has no replies left, so dropping it does not recurse
        let mut todo = std::mem::take(&mut self.replies);
        while let Some(mut c) = todo.pop() {
            todo.append(&mut c.replies);
        }
    }
}
