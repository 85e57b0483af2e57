//! # Text Processing Utilities
//!
//! Redaction of secret-looking values before launch configurations and
//! headers reach the logs. Input placeholders (`{input:<id>}`) are not
//! secrets and are left intact so logs stay useful when debugging synthesis.

use once_cell::sync::Lazy;
use regex::Regex;

/// Keywords that mark an assignment or header value as sensitive.
const SENSITIVE_KEYWORDS: &[&str] = &[
    "ACCESS_KEY",
    "API_KEY",
    "API_TOKEN",
    "AUTH_TOKEN",
    "AUTHORIZATION",
    "CLIENT_SECRET",
    "CONNECTION_STRING",
    "DATABASE_URL",
    "PASSWORD",
    "PRIVATE_KEY",
    "SECRET",
    "TOKEN",
];

/// Redacts values that look like secrets in a string.
///
/// # Example
/// ```rust
/// use tether_util::redact_sensitive;
///
/// assert_eq!(redact_sensitive("GITHUB_TOKEN=ghp_abc123"), "GITHUB_TOKEN=[REDACTED]");
/// assert_eq!(redact_sensitive("API_KEY={input:key}"), "API_KEY={input:key}");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    redact_sensitive_with(input, "[REDACTED]")
}

/// Redacts sensitive-looking values, using a custom replacement token.
pub fn redact_sensitive_with(input: &str, replacement: &str) -> String {
    let mut redacted = input.to_string();

    for pattern in get_redact_patterns().iter() {
        redacted = pattern
            .replace_all(&redacted, |captures: &regex::Captures| {
                let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or("");
                let value = captures.get(2).map(|m| m.as_str()).unwrap_or("");
                if is_input_placeholder(value) {
                    format!("{prefix}{value}")
                } else {
                    format!("{prefix}{replacement}")
                }
            })
            .to_string();
    }

    redacted
}

/// Returns true for values of the form `{input:<id>}`.
pub fn is_input_placeholder(value: &str) -> bool {
    value.starts_with("{input:") && value.ends_with('}')
}

/// Returns compiled regex patterns for detecting sensitive information.
pub fn get_redact_patterns() -> &'static Vec<Regex> {
    static REDACT_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(build_redact_patterns);

    &REDACT_PATTERNS
}

fn build_redact_patterns() -> Vec<Regex> {
    let keywords = SENSITIVE_KEYWORDS.join("|");
    vec![
        Regex::new(r"(?i)(authorization:\s*)([^\s,]+(?:\s+[^\s,{]+)?)").unwrap(),
        Regex::new(&format!(r"(?i)([A-Za-z0-9_]*?(?:{keywords})[A-Za-z0-9_]*\s*=\s*)([^\s,]+)")).unwrap(),
        Regex::new(&format!(r#"(?i)("[A-Za-z0-9_.-]*?(?:{keywords})[A-Za-z0-9_.-]*"\s*:\s*")([^"]+)"#)).unwrap(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_shell_style_sensitive_env_vars() {
        let input = "AWS_SECRET_ACCESS_KEY=supersecret";
        assert_eq!(redact_sensitive(input), "AWS_SECRET_ACCESS_KEY=[REDACTED]");
    }

    #[test]
    fn redacts_json_style_sensitive_entries() {
        let input = r#"{"clientSecret": "top-secret"}"#;
        assert_eq!(redact_sensitive(input), r#"{"clientSecret": "[REDACTED]"}"#);
    }

    #[test]
    fn redacts_authorization_headers() {
        assert_eq!(redact_sensitive("Authorization: Bearer abc.def"), "Authorization: [REDACTED]");
    }

    #[test]
    fn redacts_serialized_authorization_headers() {
        let input = r#"{"headers":{"Authorization":"Bearer abc.def","Accept":"application/json"}}"#;
        assert_eq!(
            redact_sensitive(input),
            r#"{"headers":{"Authorization":"[REDACTED]","Accept":"application/json"}}"#
        );
    }

    #[test]
    fn ignores_non_sensitive_environment_variables() {
        let input = "PORT=8080";
        assert_eq!(redact_sensitive(input), input);
    }

    #[test]
    fn keeps_input_placeholders() {
        let input = "API_KEY={input:key} PORT=8080";
        assert_eq!(redact_sensitive(input), input);
    }
}
