use once_cell::sync::Lazy;
use regex::Regex;

/// Masks literal values and PII in ad-hoc query text before it reaches a log line.
///
/// Regex based and best-effort: bound parameters never appear in command text,
/// so what remains to mask is whatever a caller inlined by hand.
static STRING_LITERAL_REGEX: Lazy<Regex> = Lazy::new(|| {
    // 'it''s' counts as one literal
    Regex::new(r"'(?:[^']|'')*'").unwrap()
});

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").unwrap());

static SSN_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static CREDIT_CARD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d[ -]*?){13,16}\b").unwrap());

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}").unwrap()
});

pub fn scrub(input: &str) -> String {
    let scrubbed = STRING_LITERAL_REGEX.replace_all(input, "'***'");
    let scrubbed = EMAIL_REGEX.replace_all(&scrubbed, "[EMAIL]");
    let scrubbed = SSN_REGEX.replace_all(&scrubbed, "[SSN]");
    // Long numeric ids get caught here too; acceptable for a log line.
    let scrubbed = CREDIT_CARD_REGEX.replace_all(&scrubbed, "[CREDIT_CARD]");
    PHONE_REGEX.replace_all(&scrubbed, "[PHONE]").into_owned()
}
