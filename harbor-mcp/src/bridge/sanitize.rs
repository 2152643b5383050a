//! Outbound error-message sanitization

use once_cell::sync::Lazy;
use regex::Regex;

/// Longest message forwarded to clients
const MAX_MESSAGE_LEN: usize = 200;

static ABSOLUTE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[\s:(\[])/(?:[\w.-]+/)*[\w.-]+").expect("static pattern"));

static IPV4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}\b").expect("static pattern"));

/// Strip host details from an error message before it crosses the wire:
/// absolute paths collapse to `/***`, IPv4 addresses become `*.*.*.*`,
/// and the result is capped at 200 characters.
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = ABSOLUTE_PATH.replace_all(message, |caps: &regex::Captures<'_>| {
        let matched = caps.get(0).map(|m| m.as_str()).unwrap_or("");
        // Preserve the leading delimiter the pattern swallowed
        match matched.chars().next() {
            Some(first) if first != '/' => format!("{}/***", first),
            _ => "/***".to_string(),
        }
    });
    let sanitized = IPV4.replace_all(&sanitized, "*.*.*.*");

    if sanitized.chars().count() > MAX_MESSAGE_LEN {
        let truncated: String = sanitized.chars().take(MAX_MESSAGE_LEN - 3).collect();
        format!("{}...", truncated)
    } else {
        sanitized.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_collapsed() {
        let sanitized =
            sanitize_error_message("failed to open /home/user/secrets/config.yaml for reading");
        assert!(!sanitized.contains("/home/user"));
        assert!(sanitized.contains("/***"));
    }

    #[test]
    fn test_ipv4_masked() {
        let sanitized = sanitize_error_message("connection refused by 192.168.1.44 on port 8080");
        assert!(!sanitized.contains("192.168.1.44"));
        assert!(sanitized.contains("*.*.*.*"));
    }

    #[test]
    fn test_length_cap() {
        let long = "x".repeat(500);
        let sanitized = sanitize_error_message(&long);
        assert_eq!(sanitized.chars().count(), 200);
        assert!(sanitized.ends_with("..."));
    }

    #[test]
    fn test_benign_message_untouched() {
        let message = "tool returned a validation error";
        assert_eq!(sanitize_error_message(message), message);
    }
}
