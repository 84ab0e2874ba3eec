use once_cell::sync::Lazy;
use regex::Regex;

static SECRET_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r#"(?i)(accesskey|api[_-]?key|token|password)\s*[:=]?\s*["']?([A-Za-z0-9_\-\.]{6,})["']?"#)
            .expect("valid regex"),
    ]
});

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\+?\d[\d\s\-]{6,}\d").expect("valid regex"));

/// Masks personal and credential data before it is written to logs.
#[derive(Debug, Default, Clone)]
pub struct Redactor;

impl Redactor {
    pub fn new() -> Self {
        Self
    }

    /// Keeps the last four digits of a phone number.
    pub fn mask_phone(&self, phone: &str) -> String {
        let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() <= 4 {
            return "*".repeat(digits.len());
        }
        let tail: String = digits[digits.len() - 4..].iter().collect();
        format!("{}{}", "*".repeat(digits.len() - 4), tail)
    }

    pub fn redact(&self, input: &str) -> String {
        if input.is_empty() {
            return String::new();
        }

        let mut result = input.to_string();
        for pattern in SECRET_PATTERNS.iter() {
            result = pattern
                .replace_all(&result, |caps: &regex::Captures<'_>| {
                    let key = caps
                        .get(1)
                        .map(|m| m.as_str())
                        .unwrap_or("secret")
                        .to_ascii_lowercase();
                    format!("{}=[REDACTED]", key)
                })
                .to_string();
        }

        PHONE_PATTERN
            .replace_all(&result, |caps: &regex::Captures<'_>| self.mask_phone(&caps[0]))
            .to_string()
    }
}
