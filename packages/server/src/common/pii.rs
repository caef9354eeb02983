//! PII detection and redaction for inbound chat.
//!
//! Every user message is scrubbed before it reaches the LLM or the
//! conversation memory. Detection is regex-based with a Luhn check on
//! card-number candidates; matched spans are replaced with typed tokens
//! (`[EMAIL]`, `[PHONE]`, ...).

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PiiKind {
    Email,
    Phone,
    Ssn,
    CreditCard,
}

impl PiiKind {
    fn token(&self) -> &'static str {
        match self {
            Self::Email => "[EMAIL]",
            Self::Phone => "[PHONE]",
            Self::Ssn => "[SSN]",
            Self::CreditCard => "[CARD]",
        }
    }
}

#[derive(Debug, Clone)]
struct Span {
    kind: PiiKind,
    start: usize,
    end: usize,
}

/// A redacted message plus what was found in it.
#[derive(Debug, Clone)]
pub struct Redacted {
    pub text: String,
    pub found: Vec<PiiKind>,
}

impl Redacted {
    pub fn was_redacted(&self) -> bool {
        !self.found.is_empty()
    }
}

lazy_static! {
    static ref EMAIL: Regex =
        Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").unwrap();
    static ref PHONE: Regex =
        Regex::new(r"(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b").unwrap();
    static ref SSN: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref CARD: Regex = Regex::new(r"\b(?:\d[ -]?){13,19}\b").unwrap();
}

/// Replace every detected span with its typed token.
pub fn redact(text: &str) -> Redacted {
    let mut spans = Vec::new();

    for m in EMAIL.find_iter(text) {
        spans.push(Span {
            kind: PiiKind::Email,
            start: m.start(),
            end: m.end(),
        });
    }
    for m in SSN.find_iter(text) {
        spans.push(Span {
            kind: PiiKind::Ssn,
            start: m.start(),
            end: m.end(),
        });
    }
    for m in CARD.find_iter(text) {
        if luhn_valid(m.as_str()) {
            spans.push(Span {
                kind: PiiKind::CreditCard,
                start: m.start(),
                end: m.end(),
            });
        }
    }
    for m in PHONE.find_iter(text) {
        // Card and SSN spans win over the looser phone pattern.
        if !spans.iter().any(|s| overlaps(s, m.start(), m.end())) {
            spans.push(Span {
                kind: PiiKind::Phone,
                start: m.start(),
                end: m.end(),
            });
        }
    }

    if spans.is_empty() {
        return Redacted {
            text: text.to_string(),
            found: Vec::new(),
        };
    }

    // Replace back-to-front so earlier offsets stay valid.
    spans.sort_by_key(|s| s.start);
    let found = spans.iter().map(|s| s.kind).collect();
    let mut result = text.to_string();
    for span in spans.iter().rev() {
        result.replace_range(span.start..span.end, span.kind.token());
    }

    Redacted {
        text: result,
        found,
    }
}

fn overlaps(span: &Span, start: usize, end: usize) -> bool {
    span.start < end && start < span.end
}

/// Standard Luhn checksum over the digits of a card candidate.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
