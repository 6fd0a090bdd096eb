use crate::{invalid, Error};

/// Tags a comment body may contain; everything else is rejected by the backend
pub const ALLOWED_TAGS: &[&str] = &["a", "code", "i", "strong"];

/// Attributes allowed on `<a>`; the other tags take none
pub const ALLOWED_LINK_ATTRIBUTES: &[&str] = &["href", "title"];

/// Link schemes the backend keeps; relative links carry none
pub const ALLOWED_LINK_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Checks that `text` only uses the restricted markup, with every tag closed in order
///
/// The backend sanitizes bodies and rejects any body the sanitizer would rewrite, so
/// markup must already be in its canonical form: lowercase tags, double-quoted
/// attributes separated by single spaces, and `&`, `<` and `>` escaped everywhere else.
pub fn validate_markup(text: &str) -> Result<(), Error> {
    let mut open: Vec<&'static str> = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(['<', '>', '&']) {
        let special = &rest[start..];
        if special.starts_with('>') {
            return Err(invalid("text", "bare `>` must be written `&gt;`"));
        }
        if special.starts_with('&') {
            rest = &special[entity_len(special)?..];
            continue;
        }
        let end = special
            .find('>')
            .ok_or_else(|| invalid("text", "unterminated tag"))?;
        let tag = &special[1..end];
        rest = &special[end + 1..];

        if let Some(name) = tag.strip_prefix('/') {
            match open.pop() {
                Some(expected) if expected == name => continue,
                Some(expected) => {
                    return Err(invalid(
                        "text",
                        format!("expected </{expected}> but found </{name}>"),
                    ))
                }
                None => return Err(invalid("text", format!("unexpected closing tag </{name}>"))),
            }
        }

        let (name, attrs) = tag.split_once(' ').unwrap_or((tag, ""));
        let name = ALLOWED_TAGS
            .iter()
            .copied()
            .find(|t| *t == name)
            .ok_or_else(|| invalid("text", format!("tag <{name}> is not allowed")))?;
        if tag.len() > name.len() && attrs.is_empty() {
            return Err(invalid("text", format!("stray space in <{name}>")));
        }
        validate_attributes(name, attrs)?;
        open.push(name);
    }
    match open.pop() {
        Some(tag) => Err(invalid("text", format!("unclosed tag <{tag}>"))),
        None => Ok(()),
    }
}

/// Length of the character reference `s` starts with, eg. `&amp;`, `&#39;` or `&#x27;`
fn entity_len(s: &str) -> Result<usize, Error> {
    let body = &s[1..];
    let end = body
        .find(';')
        .ok_or_else(|| invalid("text", "bare `&` must be written `&amp;`"))?;
    let name = &body[..end];
    let valid = match name.strip_prefix('#') {
        Some(num) => match num.strip_prefix(['x', 'X']) {
            Some(hex) => !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()),
            None => !num.is_empty() && num.chars().all(|c| c.is_ascii_digit()),
        },
        None => {
            name.starts_with(|c: char| c.is_ascii_alphabetic())
                && name.chars().all(|c| c.is_ascii_alphanumeric())
        }
    };
    match valid {
        true => Ok(end + 2),
        false => Err(invalid("text", "bare `&` must be written `&amp;`")),
    }
}

fn validate_attributes(tag: &str, mut attrs: &str) -> Result<(), Error> {
    if attrs.is_empty() {
        return Ok(());
    }
    if tag != "a" {
        return Err(invalid("text", format!("tag <{tag}> takes no attributes")));
    }
    let mut seen = Vec::new();
    loop {
        let (key, value) = attrs
            .split_once("=\"")
            .ok_or_else(|| invalid("text", "attribute values must be double-quoted"))?;
        if !ALLOWED_LINK_ATTRIBUTES.contains(&key) {
            return Err(invalid("text", format!("attribute {key:?} is not allowed on <a>")));
        }
        if seen.contains(&key) {
            return Err(invalid("text", format!("attribute {key:?} is repeated")));
        }
        seen.push(key);
        let (value, after) = value
            .split_once('"')
            .ok_or_else(|| invalid("text", "unterminated attribute value"))?;
        validate_attribute_value(key, value)?;
        attrs = match after {
            "" => return Ok(()),
            more => more
                .strip_prefix(' ')
                .filter(|more| !more.is_empty() && !more.starts_with(' '))
                .ok_or_else(|| invalid("text", "attributes must be separated by one space"))?,
        };
    }
}

fn validate_attribute_value(key: &str, mut value: &str) -> Result<(), Error> {
    if value.contains(['<', '>']) {
        return Err(invalid("text", format!("`<` and `>` must be escaped in {key:?}")));
    }
    if key == "href" {
        let scheme_end = value.find([':', '/', '?', '#']);
        if let Some(i) = scheme_end.filter(|i| value[*i..].starts_with(':')) {
            let scheme = &value[..i];
            if !ALLOWED_LINK_SCHEMES.contains(&scheme) {
                return Err(invalid("text", format!("links to {scheme:?} are not allowed")));
            }
        }
    }
    while let Some(amp) = value.find('&') {
        value = &value[amp..];
        value = &value[entity_len(value)?..];
    }
    Ok(())
}
