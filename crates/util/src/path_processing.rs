use std::path::{Path, PathBuf};

use dirs_next::home_dir;
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Characters that are unsafe in a single path segment on common filesystems.
static UNSAFE_SEGMENT_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\\/:*?"<>|\s]+"#).unwrap());

/// Turns an arbitrary resource URL into a single directory name.
///
/// ```rust
/// use tether_util::sanitize_path_segment;
///
/// assert_eq!(sanitize_path_segment("file:///home/me/mcp.json"), "file_home_me_mcp.json");
/// ```
pub fn sanitize_path_segment(value: &str) -> String {
    let collapsed = UNSAFE_SEGMENT_CHARS.replace_all(value, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() { "_".to_string() } else { trimmed.to_string() }
}

/// Converts a local path to a `file://` URL, resolving relative paths against the working directory.
pub fn path_to_file_url(path: &Path) -> Option<Url> {
    if path.is_absolute() {
        return Url::from_file_path(path).ok();
    }
    let cwd = std::env::current_dir().ok()?;
    Url::from_file_path(cwd.join(path)).ok()
}

/// Parses either a URL or a (possibly `~`-prefixed) filesystem path into a URL.
pub fn parse_resource_location(value: &str) -> Option<Url> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(url) = Url::parse(trimmed)
        && url.scheme().len() > 1
    {
        return Some(url);
    }
    path_to_file_url(&expand_tilde(trimmed))
}
