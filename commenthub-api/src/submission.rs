use crate::{
    invalid, validate_markup, validate_string, CommentId, Error, FILE_EXTENSIONS,
    IMAGE_EXTENSIONS, MAX_ACCOUNT_NAME_LEN, MAX_USERNAME_LEN, MIN_ACCOUNT_NAME_LEN,
    MIN_PASSWORD_LEN,
};

/// Challenge/response pair required to post a comment
#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Captcha {
    #[serde(rename = "captcha_key")]
    pub key: String,
    #[serde(rename = "captcha_text")]
    pub text: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct CaptchaChallenge {
    pub key: String,

    /// Path of the rendered challenge, relative to the backend host
    #[serde(rename = "image")]
    pub image_url: String,
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    pub username: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    pub text: String,
    pub parent: Option<CommentId>,

    /// Attachment references, as returned by the upload endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    #[serde(flatten)]
    pub captcha: Captcha,
}

impl NewComment {
    // Mirrors the checks the backend model runs, so that most rejections happen before
    // hitting the network. The backend stays authoritative.
    pub fn validate(&self) -> Result<(), Error> {
        validate_string(&self.username)?;
        validate_string(&self.email)?;
        validate_string(&self.text)?;
        validate_string(&self.captcha.key)?;
        validate_string(&self.captcha.text)?;

        let username_len = self.username.chars().count();
        if username_len == 0 || username_len > MAX_USERNAME_LEN {
            return Err(invalid(
                "username",
                format!("must be between 1 and {MAX_USERNAME_LEN} characters"),
            ));
        }
        validate_email(&self.email)?;
        if let Some(homepage) = &self.homepage {
            validate_string(homepage)?;
            if !(homepage.starts_with("http://") || homepage.starts_with("https://")) {
                return Err(invalid("homepage", "must be an http(s) url"));
            }
        }
        if self.text.trim().is_empty() {
            return Err(invalid("text", "must not be empty"));
        }
        validate_markup(&self.text)?;
        if let Some(image) = &self.image {
            validate_extension("image", image, IMAGE_EXTENSIONS)?;
        }
        if let Some(file) = &self.file {
            validate_extension("file", file, FILE_EXTENSIONS)?;
        }
        if self.captcha.key.is_empty() || self.captcha.text.is_empty() {
            return Err(Error::InvalidCaptcha);
        }
        Ok(())
    }
}

fn validate_email(email: &str) -> Result<(), Error> {
    match email.split_once('@') {
        Some((user, domain))
            if !user.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.contains(char::is_whitespace) =>
        {
            Ok(())
        }
        _ => Err(invalid("email", "not a valid email address")),
    }
}

fn validate_extension(field: &str, name: &str, allowed: &[&str]) -> Result<(), Error> {
    validate_string(name)?;
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match allowed.contains(&ext.as_str()) {
        true => Ok(()),
        false => Err(invalid(
            field,
            format!("extension must be one of {}", allowed.join(", ")),
        )),
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<(), Error> {
        validate_string(&self.username)?;
        validate_string(&self.password)?;
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl NewUser {
    pub fn validate(&self) -> Result<(), Error> {
        validate_string(&self.username)?;
        validate_string(&self.email)?;
        validate_string(&self.password)?;

        let username_len = self.username.chars().count();
        if !(MIN_ACCOUNT_NAME_LEN..=MAX_ACCOUNT_NAME_LEN).contains(&username_len) {
            return Err(invalid(
                "username",
                format!(
                    "must be between {MIN_ACCOUNT_NAME_LEN} and {MAX_ACCOUNT_NAME_LEN} characters"
                ),
            ));
        }
        if !self.username.chars().all(char::is_alphanumeric) {
            return Err(invalid("username", "must contain only letters and numbers"));
        }
        validate_email(&self.email)?;
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(invalid(
                "password",
                format!("must be at least {MIN_PASSWORD_LEN} characters long"),
            ));
        }
        Ok(())
    }
}
