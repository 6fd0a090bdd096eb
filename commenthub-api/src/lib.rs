use chrono::Utc;

mod comment;
pub use comment::{Comment, CommentId};

mod error;
pub use error::Error;

mod markup;
pub use markup::{validate_markup, ALLOWED_LINK_ATTRIBUTES, ALLOWED_LINK_SCHEMES, ALLOWED_TAGS};

mod page;
pub use page::{Page, PageWindow, SortField, SortKey, SortOrder};

mod submission;
pub use submission::{Captcha, CaptchaChallenge, Credentials, NewComment, NewUser};

pub type Time = chrono::DateTime<Utc>;

/// Number of top-level comments the backend puts in one page
pub const PAGE_SIZE: usize = 25;

pub const MAX_USERNAME_LEN: usize = 50;

/// Bounds on account names, which are stricter than comment author names
pub const MIN_ACCOUNT_NAME_LEN: usize = 3;
pub const MAX_ACCOUNT_NAME_LEN: usize = 150;
pub const MIN_PASSWORD_LEN: usize = 8;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];
pub const FILE_EXTENSIONS: &[&str] = &["txt"];

// The backend stores strings in postgres, which rejects null bytes. Refuse them before
// they get a chance to produce an opaque server error.
pub fn validate_string(s: &str) -> Result<(), Error> {
    match s.contains('\0') {
        true => Err(Error::NullByteInString(String::from(s))),
        false => Ok(()),
    }
}

pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Error {
    Error::Validation {
        field: String::from(field),
        message: message.into(),
    }
}
