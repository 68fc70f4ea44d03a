use std::fmt::Debug;

/// Accepted grammar for package identifiers.
pub trait PackageIdRule: Send + Sync + Debug {
    /// `Err` carries a human-readable reason.
    fn check(&self, id: &str) -> Result<(), String>;
}

/// `author/name`: exactly two non-empty segments, nothing path-like.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthorSlashName;

/// `@` is reserved: installed directories are named `author@name`, so an id
/// containing it could map onto another package's directory.
const FORBIDDEN_CHARS: [char; 8] = ['<', '>', ':', '|', '?', '*', '"', '@'];

impl PackageIdRule for AuthorSlashName {
    fn check(&self, id: &str) -> Result<(), String> {
        if id.trim().is_empty() {
            return Err("id is empty".to_owned());
        }
        if id.trim() != id {
            return Err("id has surrounding whitespace".to_owned());
        }
        if id.contains('\\') {
            return Err("id contains a backslash".to_owned());
        }
        if id.contains("..") {
            return Err("id contains `..`".to_owned());
        }
        if id.starts_with('/') {
            return Err("id starts with `/`".to_owned());
        }
        let bytes = id.as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            return Err("id starts with a drive prefix".to_owned());
        }
        if let Some(bad) = id
            .chars()
            .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control())
        {
            return Err(format!("id contains forbidden character {bad:?}"));
        }

        let mut segments = id.split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(author), Some(name), None) if !author.is_empty() && !name.is_empty() => Ok(()),
            _ => Err("id must have the form `author/name`".to_owned()),
        }
    }
}
