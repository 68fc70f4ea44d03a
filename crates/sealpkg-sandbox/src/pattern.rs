//! Path and host pattern matching.
//!
//! Path patterns support three forms, tried in order:
//!
//! 1. shell-style globs where `*` and `?` never cross a `/`;
//! 2. a single `**`, meaning "starts with the text before it and ends with
//!    the text after it" (one leading `/` of the suffix is dropped);
//! 3. `dir/*`, which also matches anything nested below `dir/`.
//!
//! Character classes and escapes are not supported.

/// Match one `/`-free segment against a segment pattern.
fn segment_match(pattern: &[char], text: &[char]) -> bool {
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < text.len() {
        match pattern.get(pi) {
            Some('*') => {
                backtrack = Some((pi, ti));
                pi += 1;
            }
            Some('?') => {
                pi += 1;
                ti += 1;
            }
            Some(c) if *c == text[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    pi = star + 1;
                    ti = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[pi..].iter().all(|c| *c == '*')
}

/// Glob match where wildcards stay within a single path segment.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(&path_segments)
        .all(|(pattern, segment)| {
            let pattern: Vec<char> = pattern.chars().collect();
            let segment: Vec<char> = segment.chars().collect();
            segment_match(&pattern, &segment)
        })
}

pub fn matches_pattern(path: &str, pattern: &str) -> bool {
    if glob_match(pattern, path) {
        return true;
    }

    let parts: Vec<&str> = pattern.split("**").collect();
    if let [prefix, suffix] = parts.as_slice() {
        let suffix = suffix.strip_prefix('/').unwrap_or(suffix);
        return path.starts_with(prefix) && path.ends_with(suffix);
    }

    if let Some(dir) = pattern.strip_suffix("/*") {
        return path.starts_with(&format!("{dir}/"));
    }

    false
}

/// Logical OR over `patterns`; an empty list matches nothing.
pub fn matches_any(path: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| matches_pattern(path, pattern))
}

/// Exact hostname, or `*.domain` matching `domain` and any subdomain of it.
pub fn host_matches(host: &str, pattern: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.trim().to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(domain) => host == domain || host.ends_with(&format!(".{domain}")),
        None => host == pattern,
    }
}

pub fn host_allowed(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|pattern| host_matches(host, pattern))
}
