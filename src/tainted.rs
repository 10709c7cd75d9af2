use std::fmt;

/// A value that arrived from the client and has not been validated.
///
/// Cookies, request parameters, headers, presented CSRF tokens, encrypted
/// blobs and uploaded file names all enter the crate as `Tainted<String>`.
/// The only ways to use the inner value are a [`Sanitizer`](crate::Sanitizer)
/// or an operation that authenticates it (for example
/// [`StateCodec::decrypt`](crate::StateCodec::decrypt)).
///
/// # Security Properties
///
/// - Does NOT implement `Deref` or any implicit conversion trait
/// - The inner value is only reachable from inside this crate
///
/// # Examples
///
/// ```
/// use http_guard::Tainted;
///
/// let presented = Tainted::new("'; DROP TABLE users; --".to_string());
/// // let s: String = presented; // does not compile
/// assert!(format!("{:?}", presented).starts_with("Tainted"));
/// ```
// BREAKING CHANGE WARNING: Do NOT remove Clone - a presented value may be checked
// against more than one rule.
#[derive(Clone)]
pub struct Tainted<T> {
    // BREAKING CHANGE WARNING: This field MUST remain private (CWE-20).
    inner: T,
}

impl<T> Tainted<T> {
    /// Wraps an untrusted value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Extracts the inner value for validation.
    ///
    /// Only sanitizers and authenticating operations inside the crate may call
    /// this.
    ///
    /// BREAKING CHANGE WARNING: Making this `pub` is a security bypass.
    pub(crate) fn into_inner(self) -> T {
        self.inner
    }

    /// Borrows the inner value for validation. Same restrictions as
    /// [`into_inner`](Self::into_inner).
    pub(crate) fn peek(&self) -> &T {
        &self.inner
    }

    /// Transforms the wrapped value without releasing the taint.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Tainted<U> {
        Tainted { inner: f(self.inner) }
    }
}

// BREAKING CHANGE WARNING: Do NOT add Deref, AsRef, Borrow, From<T>, or Into<T>.

impl<T: fmt::Debug> fmt::Debug for Tainted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tainted")
            .field("inner", &self.inner)
            .finish()
    }
}
