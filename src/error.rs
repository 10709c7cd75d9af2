use std::fmt;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error raised by one of the mediation components.
///
/// Every error carries an [`ErrorKind`] that callers match on to decide how to
/// react, and a message that is safe to log. Messages never contain the
/// rejected input, token values, or key material.
///
/// # Examples
///
/// ```
/// use http_guard::{Error, ErrorKind};
///
/// let err = Error::intrusion("csrf token mismatch");
/// assert_eq!(err.kind(), ErrorKind::Intrusion);
/// assert!(err.is_security_event());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Malformed or unsafe caller input.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Tampered or malformed encrypted state.
    pub fn encryption(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encryption, message)
    }

    /// Policy denied a redirect, forward, or request shape.
    pub fn access_control(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AccessControl, message)
    }

    /// Input consistent with an active attack.
    pub fn intrusion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Intrusion, message)
    }

    /// A valid session was required but absent.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, message)
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the log-safe message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns `true` if the caller is expected to escalate this error
    /// (terminate the session, alert) rather than just reject the input.
    pub fn is_security_event(&self) -> bool {
        matches!(self.kind, ErrorKind::Intrusion)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        // Only the error category: io messages can carry file paths.
        Self::new(ErrorKind::Io, format!("i/o failure ({:?})", err.kind()))
    }
}

/// The category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller input was malformed or unsafe; correcting the input may succeed.
    Validation,
    /// Encrypted state failed authentication or could not be decoded.
    Encryption,
    /// Policy denies the requested redirect, forward, or action.
    AccessControl,
    /// Input pattern consistent with an active attack.
    Intrusion,
    /// The operation requires a valid session that is absent.
    Authentication,
    /// A collaborator (file system, session store) failed.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "validation error"),
            ErrorKind::Encryption => write!(f, "encryption error"),
            ErrorKind::AccessControl => write!(f, "access control error"),
            ErrorKind::Intrusion => write!(f, "intrusion detected"),
            ErrorKind::Authentication => write!(f, "authentication error"),
            ErrorKind::Io => write!(f, "i/o error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        assert_eq!(Error::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::encryption("x").kind(), ErrorKind::Encryption);
        assert_eq!(Error::access_control("x").kind(), ErrorKind::AccessControl);
        assert_eq!(Error::intrusion("x").kind(), ErrorKind::Intrusion);
        assert_eq!(Error::authentication("x").kind(), ErrorKind::Authentication);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::access_control("redirect target not allowed");
        assert_eq!(
            err.to_string(),
            "access control error: redirect target not allowed"
        );
    }

    #[test]
    fn only_intrusion_is_a_security_event() {
        assert!(Error::intrusion("mismatch").is_security_event());
        assert!(!Error::validation("bad header").is_security_event());
        assert!(!Error::encryption("bad blob").is_security_event());
    }

    #[test]
    fn io_error_does_not_leak_path() {
        let io = std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "/srv/uploads/secret-name.pdf",
        );
        let err = Error::from(io);

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(!err.to_string().contains("secret-name"));
    }
}
