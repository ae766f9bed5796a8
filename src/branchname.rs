//! Collision-safe branch naming.
//!
//! Branch names are derived from a task title: slugified, prefixed,
//! truncated at a word boundary, and suffixed with `-1`, `-2`, ... when
//! the name already exists among local or remote branches. The functions
//! here are pure; callers supply the set of existing names.

use std::collections::HashSet;

/// Slugify a basis string: lowercase, ASCII alphanumerics preserved,
/// everything else collapsed to single hyphens.
pub fn slugify(basis: &str) -> String {
    let mut slug = String::with_capacity(basis.len());
    let mut last_was_hyphen = true; // suppress a leading hyphen

    for ch in basis.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
    }

    while slug.ends_with('-') {
        slug.pop();
    }

    slug
}

/// Truncate a name to `max_len` characters, cutting at the last slug
/// hyphen before the limit rather than mid-word. The first `min_keep`
/// bytes are the prefix and are never cut into; a slug with no hyphen in
/// range gets a hard cut instead.
fn truncate_at_word_boundary(name: &str, max_len: usize, min_keep: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }

    let hard_cut: String = name.chars().take(max_len).collect();
    match hard_cut.get(min_keep..).and_then(|slug| slug.rfind('-')) {
        Some(idx) => hard_cut[..min_keep + idx].to_string(),
        None => hard_cut,
    }
}

/// Build a unique branch name from a basis string.
///
/// The result is `<prefix><slug>` truncated to `max_len` characters; on
/// collision against `existing`, `-1`, `-2`, ... are appended until the
/// name is free. Deterministic: same inputs, same output.
pub fn unique_branch_name(
    basis: &str,
    prefix: &str,
    max_len: usize,
    existing: &HashSet<String>,
) -> String {
    let slug = slugify(basis);
    let base = truncate_at_word_boundary(&format!("{prefix}{slug}"), max_len, prefix.len());

    if !existing.contains(&base) {
        return base;
    }

    let mut counter = 1;
    loop {
        let candidate = format!("{base}-{counter}");
        if !existing.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
