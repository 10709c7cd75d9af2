//! CSRF token issuance, embedding and verification.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::config::CsrfConfig;
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::random::{random_bytes, OsRandom, RandomSource};
use crate::session::SessionContext;
use crate::{Secret, Tainted};

/// A per-session anti-CSRF token.
///
/// The encoded form is URL-safe base64 without padding, so it can be placed
/// in a query string or form field as-is. `Debug` and `Display` never show
/// the token; use [`expose_secret`](Self::expose_secret) when rendering it
/// into a page.
#[derive(Clone)]
pub struct CsrfToken {
    // Shared so the session and its copies never duplicate the secret.
    inner: Arc<Secret<String>>,
}

impl CsrfToken {
    fn new(encoded: String) -> Self {
        Self {
            inner: Arc::new(Secret::new(encoded)),
        }
    }

    /// The encoded token, for embedding in a form or link.
    pub fn expose_secret(&self) -> &str {
        self.inner.expose_secret()
    }

    fn matches(&self, candidate: &str) -> bool {
        self.inner.ct_eq_bytes(candidate.as_bytes())
    }
}

impl fmt::Debug for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CsrfToken").field(&self.inner).finish()
    }
}

impl fmt::Display for CsrfToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

/// Issues and verifies CSRF tokens.
///
/// # Examples
///
/// ```
/// use http_guard::{CsrfConfig, TokenManager, Tainted};
///
/// let tokens = TokenManager::new(&CsrfConfig::default());
/// let token = tokens.issue_token();
///
/// let link = tokens.embed_token("/transfer?amount=100", &token);
/// assert!(link.starts_with("/transfer?amount=100&csrf_token="));
///
/// let presented = Tainted::new(token.expose_secret().to_string());
/// assert!(tokens.verify_token(Some(presented), &token).unwrap());
/// ```
#[derive(Clone)]
pub struct TokenManager {
    parameter_name: String,
    token_bytes: usize,
    random: Arc<dyn RandomSource>,
}

impl TokenManager {
    /// Creates a manager backed by the OS RNG.
    pub fn new(config: &CsrfConfig) -> Self {
        Self {
            parameter_name: config.parameter_name.clone(),
            token_bytes: config.token_bytes,
            random: Arc::new(OsRandom),
        }
    }

    /// Replaces the random source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Name of the request parameter that carries the token.
    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    /// Generates a fresh token.
    pub fn issue_token(&self) -> CsrfToken {
        let bytes = random_bytes(self.random.as_ref(), self.token_bytes);
        CsrfToken::new(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Generates a fresh token and stores it in `session`.
    pub fn issue_for(&self, session: &mut SessionContext) -> CsrfToken {
        let token = self.issue_token();
        session.token = token.clone();
        token
    }

    /// Appends the token parameter to `url`.
    ///
    /// The parameter goes after any existing query and before any
    /// `#fragment`. Existing parameters are left untouched.
    pub fn embed_token(&self, url: &str, token: &CsrfToken) -> String {
        let (base, fragment) = match url.find('#') {
            Some(i) => url.split_at(i),
            None => (url, ""),
        };
        let separator = if !base.contains('?') {
            "?"
        } else if base.ends_with('?') || base.ends_with('&') {
            ""
        } else {
            "&"
        };
        format!(
            "{base}{separator}{}={}{fragment}",
            self.parameter_name,
            token.expose_secret()
        )
    }

    /// Compares a presented token with the expected one in constant time.
    ///
    /// # Errors
    ///
    /// Returns an `Intrusion` error if the token is missing or differs.
    pub fn verify_token(&self, presented: Option<Tainted<String>>, expected: &CsrfToken) -> Result<bool> {
        match presented {
            Some(candidate) if expected.matches(candidate.peek()) => {
                tracing::debug!("csrf token verified");
                Ok(true)
            }
            Some(_) => {
                tracing::warn!(kind = "csrf", "csrf token mismatch");
                Err(Error::intrusion("csrf token mismatch"))
            }
            None => {
                tracing::warn!(kind = "csrf", "csrf token missing");
                Err(Error::intrusion("csrf token missing"))
            }
        }
    }

    /// Verifies the token parameter of the bound request against the
    /// session's token.
    ///
    /// # Errors
    ///
    /// Returns an `Intrusion` error if the parameter is missing or differs.
    pub fn verify_request(&self, ctx: &Ctx<'_>, session: &SessionContext) -> Result<bool> {
        self.verify_token(ctx.parameter(&self.parameter_name), session.token())
            .inspect_err(|_| {
                ctx.log()
                    .warn(format_args!("csrf check failed for {}", ctx.method()))
            })
    }
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("parameter_name", &self.parameter_name)
            .field("token_bytes", &self.token_bytes)
            .finish_non_exhaustive()
    }
}
