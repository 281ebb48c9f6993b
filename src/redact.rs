//! Keeps installation tokens out of logs and responses.

use regex::Regex;
use std::sync::OnceLock;

const MASK: &str = "***";

fn userinfo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)(x-access-token:)[^@\s/]+@").expect("static regex compiles")
    })
}

/// Scrubs known secrets, and anything shaped like token userinfo in a URL,
/// from text before it is logged or returned.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    secrets: Vec<String>,
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.trim().is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self { secrets }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for secret in &self.secrets {
            if out.contains(secret.as_str()) {
                out = out.replace(secret.as_str(), MASK);
            }
        }
        userinfo_pattern()
            .replace_all(&out, format!("${{1}}{MASK}@"))
            .into_owned()
    }
}
