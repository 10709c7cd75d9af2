/// A value that passed validation and may be written to the response.
///
/// [`OutboundResponse`](crate::web::OutboundResponse) only accepts
/// `Verified<HeaderField>`, so every header and cookie the crate emits has been
/// through a [`Sanitizer`](crate::Sanitizer). Redirect and forward targets,
/// sanitized upload names, and request-log lines are likewise `Verified`.
///
/// # Construction Invariants
///
/// There is no public constructor and no `From<T>`. Construction is restricted
/// to crate-internal validation paths through `new_unchecked`.
///
/// ```compile_fail
/// use http_guard::Verified;
///
/// let forged = Verified::new("Location: http://evil.example".to_string());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified<T> {
    inner: T,
}

impl<T> Verified<T> {
    /// Wraps a value without validating it.
    ///
    /// # Safety (Policy-Level)
    ///
    /// Callers must have validated `value` against the rule that the consuming
    /// sink relies on.
    pub(crate) fn new_unchecked(value: T) -> Self {
        Self { inner: value }
    }

    /// Consumes the wrapper and returns the verified value.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> AsRef<T> for Verified<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}
