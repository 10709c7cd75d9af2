use crate::error::{Error, Result};
use crate::{Tainted, Verified};

/// Converts tainted input into a verified value, or rejects it.
///
/// # Invariants
///
/// Implementations MUST:
/// - Validate the input against their rule before calling
///   `Verified::new_unchecked`
/// - Return an [`ErrorKind::Validation`](crate::ErrorKind::Validation) error
///   on failure
/// - Not echo the rejected input in the error message
///
/// # Examples
///
/// ```
/// use http_guard::{FieldRule, FieldSanitizer, Sanitizer, Tainted};
///
/// let names = FieldSanitizer::new(FieldRule::HeaderName, 64);
/// let verified = names.sanitize(Tainted::new("X-Request-Id".to_string())).unwrap();
/// assert_eq!(verified.as_ref(), "X-Request-Id");
///
/// assert!(names.sanitize(Tainted::new("X-Bad\r\nSet-Cookie".to_string())).is_err());
/// ```
pub trait Sanitizer<T> {
    /// Validates `input`, returning it as `Verified` on success.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the input violates the rule.
    fn sanitize(&self, input: Tainted<T>) -> Result<Verified<T>>;
}

/// Character rules for the protocol fields the crate emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// RFC 7230 `token`: the only characters allowed in a header name.
    HeaderName,
    /// Visible ASCII, space and horizontal tab. No CR, LF, NUL or other
    /// control characters.
    HeaderValue,
    /// Cookie names share the header-name token grammar.
    CookieName,
    /// RFC 6265 `cookie-octet`: visible ASCII except `"` `,` `;` `\`.
    CookieValue,
    /// `Domain` and `Path` attribute values: visible ASCII except `;` `,`.
    CookieAttribute,
}

impl FieldRule {
    fn allows(self, c: char) -> bool {
        match self {
            FieldRule::HeaderName | FieldRule::CookieName => is_tchar(c),
            FieldRule::HeaderValue => c == '\t' || (' '..='~').contains(&c),
            FieldRule::CookieValue => {
                ('!'..='~').contains(&c) && !matches!(c, '"' | ',' | ';' | '\\')
            }
            FieldRule::CookieAttribute => ('!'..='~').contains(&c) && !matches!(c, ';' | ','),
        }
    }

    fn allows_empty(self) -> bool {
        matches!(self, FieldRule::HeaderValue | FieldRule::CookieValue)
    }

    fn label(self) -> &'static str {
        match self {
            FieldRule::HeaderName => "header name",
            FieldRule::HeaderValue => "header value",
            FieldRule::CookieName => "cookie name",
            FieldRule::CookieValue => "cookie value",
            FieldRule::CookieAttribute => "cookie attribute",
        }
    }
}

fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~'
        )
}

/// Whitelist sanitizer for header and cookie fields.
///
/// Unlike a general-purpose string sanitizer this never trims or rewrites
/// the input: a value is either emitted exactly as given or rejected.
///
/// # Security Properties
///
/// - CR and LF are rejected by every rule (response splitting)
/// - NUL and other control characters are rejected by every rule
/// - Length is bounded
/// - Extra characters can be forbidden per deployment
#[derive(Debug, Clone)]
pub struct FieldSanitizer {
    rule: FieldRule,
    max_len: usize,
    forbidden: Vec<char>,
}

impl FieldSanitizer {
    /// Creates a sanitizer for `rule` accepting at most `max_len` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `max_len` is 0.
    pub fn new(rule: FieldRule, max_len: usize) -> Self {
        assert!(max_len > 0, "max_len must be greater than 0");
        Self {
            rule,
            max_len,
            forbidden: Vec::new(),
        }
    }

    /// Additionally rejects every character in `chars`.
    pub fn forbidding(mut self, chars: impl IntoIterator<Item = char>) -> Self {
        self.forbidden.extend(chars);
        self
    }

    /// Returns the rule this sanitizer enforces.
    pub fn rule(&self) -> FieldRule {
        self.rule
    }

    /// Validates without consuming; used where a batch must be fully checked
    /// before anything is written.
    pub(crate) fn check(&self, value: &str) -> Result<()> {
        let label = self.rule.label();

        if value.is_empty() && !self.rule.allows_empty() {
            return Err(Error::validation(format!("{label} is empty")));
        }
        if value.len() > self.max_len {
            return Err(Error::validation(format!(
                "{label} exceeds maximum length of {}",
                self.max_len
            )));
        }
        if value.contains(['\r', '\n']) {
            return Err(Error::validation(format!(
                "{label} contains a line break"
            )));
        }
        if value
            .chars()
            .any(|c| !self.rule.allows(c) || self.forbidden.contains(&c))
        {
            return Err(Error::validation(format!(
                "{label} contains a disallowed character"
            )));
        }
        Ok(())
    }
}

impl Sanitizer<String> for FieldSanitizer {
    fn sanitize(&self, input: Tainted<String>) -> Result<Verified<String>> {
        self.check(input.peek())?;
        Ok(Verified::new_unchecked(input.into_inner()))
    }
}

/// Replaces CR, LF, tabs and other control characters with `_` and bounds the
/// length, so a value can be embedded in a single log line.
pub(crate) fn neutralize_for_log(input: &str, max_len: usize) -> String {
    input
        .chars()
        .take(max_len)
        .map(|c| if c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn sanitize(rule: FieldRule, value: &str) -> Result<Verified<String>> {
        FieldSanitizer::new(rule, 256).sanitize(Tainted::new(value.to_string()))
    }

    #[test]
    fn header_name_accepts_tokens() {
        assert!(sanitize(FieldRule::HeaderName, "Content-Security-Policy").is_ok());
        assert!(sanitize(FieldRule::HeaderName, "X-Custom_1").is_ok());
    }

    #[test]
    fn header_name_rejects_separators_and_space() {
        for bad in ["X Header", "X:Header", "", "X-\u{e9}", "X(1)"] {
            let err = sanitize(FieldRule::HeaderName, bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Validation, "accepted {bad:?}");
        }
    }

    #[test]
    fn every_rule_rejects_crlf() {
        for rule in [
            FieldRule::HeaderName,
            FieldRule::HeaderValue,
            FieldRule::CookieName,
            FieldRule::CookieValue,
            FieldRule::CookieAttribute,
        ] {
            assert!(sanitize(rule, "a\r\nb").is_err(), "{rule:?}");
            assert!(sanitize(rule, "a\nb").is_err(), "{rule:?}");
            assert!(sanitize(rule, "a\rb").is_err(), "{rule:?}");
            assert!(sanitize(rule, "a\0b").is_err(), "{rule:?}");
        }
    }

    #[test]
    fn header_value_allows_space_tab_and_punctuation() {
        let verified = sanitize(FieldRule::HeaderValue, "text/html;\tcharset=UTF-8").unwrap();
        assert_eq!(verified.as_ref(), "text/html;\tcharset=UTF-8");
        assert!(sanitize(FieldRule::HeaderValue, "").is_ok());
    }

    #[test]
    fn header_value_rejects_non_ascii() {
        assert!(sanitize(FieldRule::HeaderValue, "caf\u{e9}").is_err());
    }

    #[test]
    fn cookie_value_rejects_delimiters() {
        for bad in ["a;b", "a,b", "a b", "\"q\"", "a\\b"] {
            assert!(sanitize(FieldRule::CookieValue, bad).is_err(), "accepted {bad:?}");
        }
        assert!(sanitize(FieldRule::CookieValue, "dGVzdA_-").is_ok());
    }

    #[test]
    fn forbidden_characters_are_rejected() {
        let sanitizer = FieldSanitizer::new(FieldRule::HeaderValue, 64).forbidding(['<', '>']);

        assert!(sanitizer.sanitize(Tainted::new("<script>".to_string())).is_err());
        assert!(sanitizer.sanitize(Tainted::new("plain".to_string())).is_ok());
    }

    #[test]
    fn length_is_bounded() {
        let sanitizer = FieldSanitizer::new(FieldRule::HeaderValue, 4);

        assert!(sanitizer.sanitize(Tainted::new("abcd".to_string())).is_ok());
        let err = sanitizer.sanitize(Tainted::new("abcde".to_string())).unwrap_err();
        assert!(err.message().contains("maximum length"));
    }

    #[test]
    fn error_does_not_echo_input() {
        let err = sanitize(FieldRule::HeaderValue, "secret-value\r\n").unwrap_err();
        assert!(!err.to_string().contains("secret-value"));
    }

    #[test]
    fn neutralize_strips_line_breaks() {
        assert_eq!(neutralize_for_log("a\r\nb\tc", 100), "a__b_c");
        assert_eq!(neutralize_for_log("abcdef", 3), "abc");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Any value containing CR or LF is rejected by the header value rule.
            #[test]
            fn proptest_line_breaks_always_rejected(
                prefix in "[ -~]{0,20}",
                brk in prop_oneof![Just("\r"), Just("\n"), Just("\r\n")],
                suffix in "[ -~]{0,20}",
            ) {
                let value = format!("{prefix}{brk}{suffix}");
                prop_assert!(sanitize(FieldRule::HeaderValue, &value).is_err());
                prop_assert!(sanitize(FieldRule::CookieValue, &value).is_err());
            }
        }
    }
}
