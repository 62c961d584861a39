//! Secret redaction and masking helpers for logs and user-facing diagnostics.

use std::fmt;
use std::sync::OnceLock;

use regex::{Captures, Regex};

const REDACTED: &str = "***REDACTED***";

fn bearer_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\bBearer\s+[^\s,;]+").expect("bearer token regex must compile")
    })
}

fn api_key_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(x-api-key|api[-_]?key|authorization)\s*[:=]\s*([^\s,;]+)")
            .expect("api key header regex must compile")
    })
}

fn secret_kv_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(access_token|refresh_token|client_secret|secret)\s*=\s*([^\s,&]+)")
            .expect("secret key-value regex must compile")
    })
}

/// Redact token/secret values from a string.
///
/// Covers `Bearer` tokens, API key headers in `header: value` or
/// `header=value` form, and common `secret=value` query/body pairs.
pub fn redact_secrets(input: &str) -> String {
    let step1 = bearer_token_re().replace_all(input, format!("Bearer {REDACTED}"));

    let step2 = api_key_header_re().replace_all(&step1, |caps: &Captures<'_>| {
        format!("{}: {REDACTED}", &caps[1])
    });

    secret_kv_re()
        .replace_all(&step2, |caps: &Captures<'_>| {
            format!("{}={REDACTED}", &caps[1])
        })
        .into_owned()
}

/// Wrapper that redacts secrets from anything implementing `Display`.
pub struct Redacted<T: fmt::Display>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", redact_secrets(&self.0.to_string()))
    }
}

/// Mask a secret string for user display.
///
/// Shows the first and last four characters for long secrets, a fixed
/// mask otherwise.
pub fn mask_secret(secret: &str) -> String {
    let char_count = secret.chars().count();

    if char_count > 8 {
        let prefix: String = secret.chars().take(4).collect();
        let suffix: String = secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{prefix}...{suffix}")
    } else if !secret.is_empty() {
        "****".to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_tokens() {
        let input = "request failed: Authorization: Bearer sk-abc123xyz, status 401";
        let out = redact_secrets(input);
        assert!(!out.contains("sk-abc123xyz"));
        assert!(out.contains("***REDACTED***"));
    }

    #[test]
    fn redacts_api_key_headers() {
        let out = redact_secrets("x-api-key: sk-ant-verysecret rejected");
        assert!(!out.contains("sk-ant-verysecret"));
        assert!(out.contains("x-api-key: ***REDACTED***"));
    }

    #[test]
    fn redacts_secret_kv_pairs() {
        let out = redact_secrets("retry with client_secret=abcd1234&scope=all");
        assert!(!out.contains("abcd1234"));
        assert!(out.contains("client_secret=***REDACTED***"));
    }

    #[test]
    fn leaves_ordinary_text_alone() {
        let input = "provider timed out after 30s";
        assert_eq!(redact_secrets(input), input);
    }

    #[test]
    fn redacted_wrapper_display() {
        let wrapped = Redacted("Bearer tok-1 failed");
        assert_eq!(wrapped.to_string(), "Bearer ***REDACTED*** failed");
    }

    #[test]
    fn mask_secret_long_and_short() {
        assert_eq!(mask_secret("sk-ant-api-key-12345"), "sk-a...2345");
        assert_eq!(mask_secret("short"), "****");
        assert_eq!(mask_secret(""), "");
    }
}
