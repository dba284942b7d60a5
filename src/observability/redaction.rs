//! Scrubbing of free text captured into telemetry
//!
//! Error messages and chat content end up in durable storage and in an
//! external service, so they are cut to a bounded length, stripped of any
//! backtrace and have common credentials and personal data masked.

use regex::{Captures, Regex};
use std::sync::OnceLock;

const ELLIPSIS: &str = "...";

struct RedactionPatterns {
    email: Regex,
    bearer_token: Regex,
    api_key: Regex,
    secret_field: Regex,
    card_number: Regex,
}

static PATTERNS: OnceLock<RedactionPatterns> = OnceLock::new();

fn patterns() -> &'static RedactionPatterns {
    PATTERNS.get_or_init(|| RedactionPatterns {
        email: compile(r"\b[a-zA-Z0-9._%+-]+@([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})\b"),
        bearer_token: compile(r"(?i)bearer\s+[a-zA-Z0-9\-_\.=]+"),
        api_key: compile(r"\b(sk|pk|api|key)[-_][a-zA-Z0-9_\-]{12,}\b"),
        secret_field: compile(r"(?i)\b(password|passwd|pwd|secret|token)\s*[:=]\s*\S+"),
        // Issuer ranges start with 2-6; epoch-millisecond timestamps start with 1
        card_number: compile(r"\b[2-6]\d{12,18}\b"),
    })
}

// Patterns are literals above; a failure here is a programming error.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Valid redaction pattern - compile time constant")
}

/// Mask credentials and personal data in `text`.
pub fn redact(text: &str) -> String {
    let p = patterns();
    let text = p.email.replace_all(text, "***@$1");
    let text = p.bearer_token.replace_all(&text, "Bearer [REDACTED]");
    let text = p.api_key.replace_all(&text, "[REDACTED]");
    let text = p.secret_field.replace_all(&text, "$1=[REDACTED]");
    let text = p.card_number.replace_all(&text, |caps: &Captures| {
        if passes_luhn(&caps[0]) {
            "[REDACTED]".to_string()
        } else {
            caps[0].to_string()
        }
    });
    text.into_owned()
}

/// Luhn checksum over an ASCII digit string.
fn passes_luhn(digits: &str) -> bool {
    let sum: u32 = digits
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Cut `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Drop anything that looks like a captured backtrace.
pub fn strip_backtrace(text: &str) -> &str {
    const MARKERS: [&str; 3] = ["\nStack backtrace:", "\nstack backtrace:", "\n   0: "];
    let cut = MARKERS
        .iter()
        .filter_map(|marker| text.find(marker))
        .min()
        .unwrap_or(text.len());
    text[..cut].trim_end()
}

/// Prepare an application error message for storage on a failed span.
pub fn scrub_error_message(message: &str, max_chars: usize, redact_pii: bool) -> String {
    let message = strip_backtrace(message);
    if redact_pii {
        truncate_chars(&redact(message), max_chars)
    } else {
        truncate_chars(message, max_chars)
    }
}

/// Bounded, redacted summary of chat content.
pub fn summarize_content(content: &str, max_chars: usize) -> String {
    let collapsed = content.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&redact(&collapsed), max_chars)
}
