use std::fmt;

use subtle::ConstantTimeEq;

/// A wrapper that keeps key material and tokens out of logs.
///
/// `Secret<T>` guards the encryption key handed out by a
/// [`KeyProvider`](crate::KeyProvider) and the encoded form of every
/// [`CsrfToken`](crate::CsrfToken). The wrapped value is reachable only through
/// [`expose_secret`](Self::expose_secret).
///
/// # Security Properties
///
/// - Does NOT implement `Deref`, `AsRef`, `Borrow`, `Clone`, or `Copy`
/// - Debug and Display output is always `[REDACTED]`
/// - Equality checks on byte-like secrets run in constant time
///
/// # Examples
///
/// ```
/// use http_guard::Secret;
///
/// let token = Secret::new("q3Zk9pL0".to_string());
/// assert_eq!(format!("{:?}", token), "[REDACTED]");
/// assert!(token.ct_eq_bytes(b"q3Zk9pL0"));
/// ```
// BREAKING CHANGE WARNING: Do NOT add Clone, Copy, or Default derives.
// Keys and tokens must not be duplicated implicitly.
pub struct Secret<T> {
    // BREAKING CHANGE WARNING: This field MUST remain private (CWE-532).
    inner: T,
}

impl<T> Secret<T> {
    /// Wraps a sensitive value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Explicitly exposes the secret value.
    ///
    /// # Security Warning
    ///
    /// The exposed value must not be logged or embedded in error messages.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl<T: AsRef<[u8]>> Secret<T> {
    /// Compares the secret against `candidate` without an early exit on the
    /// first differing byte.
    ///
    /// A length mismatch returns `false` immediately; lengths of tokens and
    /// keys are public.
    pub fn ct_eq_bytes(&self, candidate: &[u8]) -> bool {
        self.inner.as_ref().ct_eq(candidate).into()
    }
}

impl<T> fmt::Debug for Secret<T> {
    /// BREAKING CHANGE WARNING: This MUST unconditionally return "[REDACTED]".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    /// BREAKING CHANGE WARNING: This MUST unconditionally return "[REDACTED]".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_debug_and_display() {
        let key = Secret::new([7u8; 32]);

        assert_eq!(format!("{:?}", key), "[REDACTED]");
        assert_eq!(format!("{}", key), "[REDACTED]");
    }

    #[test]
    fn secret_redaction_hides_type() {
        let token = Secret::new("tk-123".to_string());
        let out = format!("{:?}", token);

        assert!(!out.contains("tk-123"));
        assert!(!out.contains("String"));
    }

    #[test]
    fn ct_eq_matches_exact_bytes_only() {
        let token = Secret::new("abcdef".to_string());

        assert!(token.ct_eq_bytes(b"abcdef"));
        assert!(!token.ct_eq_bytes(b"abcdeg"));
        assert!(!token.ct_eq_bytes(b"abcde"));
        assert!(!token.ct_eq_bytes(b""));
    }

    #[test]
    fn expose_returns_inner() {
        let key = Secret::new(vec![1u8, 2, 3]);
        assert_eq!(key.expose_secret(), &vec![1, 2, 3]);
    }
}
