use std::path::Path;
use std::sync::Arc;

use crate::codec::{KeyProvider, StateCodec, StateMap};
use crate::config::SecurityConfig;
use crate::context::Ctx;
use crate::csrf::{CsrfToken, TokenManager};
use crate::emitter::{Cookie, SafeEmitter};
use crate::error::{Error, Result};
use crate::logging::{LogSink, ParameterPolicy, RequestLogger, TracingSink};
use crate::random::{OsRandom, RandomSource};
use crate::redirect::RedirectGuard;
use crate::session::{MemorySessionStore, SessionContext, SessionRotator, SessionStore};
use crate::upload::{ContentScanner, MultipartStream, NoopScanner, UploadSanitizer, UploadedFile};
use crate::Tainted;

/// Builder for [`HttpGuard`].
///
/// Collects collaborators, then validates the configuration and wires every
/// component in [`build`](Self::build). Only the key provider is required.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use http_guard::{HttpGuard, SecurityConfig, StaticKeyProvider};
///
/// let guard = HttpGuard::builder(SecurityConfig::default())
///     .key_provider(Arc::new(StaticKeyProvider::new([9u8; 32])))
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(guard.config().csrf.parameter_name, "csrf_token");
/// ```
pub struct HttpGuardBuilder {
    config: SecurityConfig,
    keys: Option<Arc<dyn KeyProvider>>,
    store: Option<Arc<dyn SessionStore>>,
    random: Arc<dyn RandomSource>,
    scanner: Arc<dyn ContentScanner>,
    sink: Arc<dyn LogSink>,
}

impl HttpGuardBuilder {
    /// Supplies the state encryption key.
    pub fn key_provider(mut self, keys: Arc<dyn KeyProvider>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Supplies the session store. Defaults to [`MemorySessionStore`].
    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Supplies the random source for tokens, identifiers and nonces.
    pub fn random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Supplies the upload content scanner. Defaults to [`NoopScanner`].
    pub fn scanner(mut self, scanner: Arc<dyn ContentScanner>) -> Self {
        self.scanner = scanner;
        self
    }

    /// Supplies the request log sink. Defaults to [`TracingSink`].
    pub fn log_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Validates the configuration and assembles the facade.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if the configuration is invalid or no
    /// key provider was supplied.
    pub fn build(self) -> Result<HttpGuard> {
        // 1. Validate everything before wiring anything
        self.config.validate()?;
        let keys = self
            .keys
            .ok_or_else(|| Error::validation("a key provider is required"))?;
        let redirects = RedirectGuard::new(&self.config.redirects)?;

        // 2. Wire components
        let tokens = TokenManager::new(&self.config.csrf).with_random(Arc::clone(&self.random));
        let codec = StateCodec::new(keys)
            .with_random(Arc::clone(&self.random))
            .with_state_cookie_name(self.config.cookies.state_cookie_name.clone());
        let emitter = SafeEmitter::new(&self.config.headers, &self.config.cookies)?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemorySessionStore::new()) as Arc<dyn SessionStore>);
        let sessions = SessionRotator::new(store, tokens.clone())
            .with_random(Arc::clone(&self.random))
            .with_cookie_name(self.config.cookies.session_cookie_name.clone());
        let uploads = UploadSanitizer::new(&self.config.uploads)
            .with_scanner(self.scanner)
            .with_random(Arc::clone(&self.random));
        let logger = RequestLogger::new(&self.config.logging, &self.config.csrf);

        tracing::debug!(
            redirect_contexts = self.config.redirects.contexts.len(),
            "http guard built"
        );

        Ok(HttpGuard {
            config: self.config,
            codec,
            tokens,
            emitter,
            redirects,
            sessions,
            uploads,
            logger,
            sink: self.sink,
        })
    }
}

/// Single entry point for HTTP mediation.
///
/// Owns one instance of each component, built from one configuration.
/// Every operation that touches the exchange takes the [`Ctx`] explicitly.
pub struct HttpGuard {
    config: SecurityConfig,
    codec: StateCodec,
    tokens: TokenManager,
    emitter: SafeEmitter,
    redirects: RedirectGuard,
    sessions: SessionRotator,
    uploads: UploadSanitizer,
    logger: RequestLogger,
    sink: Arc<dyn LogSink>,
}

impl HttpGuard {
    /// Starts building a guard from `config`.
    pub fn builder(config: SecurityConfig) -> HttpGuardBuilder {
        HttpGuardBuilder {
            config,
            keys: None,
            store: None,
            random: Arc::new(OsRandom),
            scanner: Arc::new(NoopScanner),
            sink: Arc::new(TracingSink),
        }
    }

    /// The validated configuration.
    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// State codec.
    pub fn codec(&self) -> &StateCodec {
        &self.codec
    }

    /// CSRF token manager.
    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Header and cookie emitter.
    pub fn emitter(&self) -> &SafeEmitter {
        &self.emitter
    }

    /// Redirect guard.
    pub fn redirects(&self) -> &RedirectGuard {
        &self.redirects
    }

    /// Session rotator.
    pub fn sessions(&self) -> &SessionRotator {
        &self.sessions
    }

    /// Upload sanitizer.
    pub fn uploads(&self) -> &UploadSanitizer {
        &self.uploads
    }

    // ------------------------------------------------------------------
    // Request assertions
    // ------------------------------------------------------------------

    /// Requires TLS and POST. See [`Ctx::assert_secure_request`].
    pub fn assert_secure_request(&self, ctx: &Ctx<'_>) -> Result<()> {
        ctx.assert_secure_request()
    }

    /// Appends the session's CSRF token to `url`.
    pub fn add_csrf_token(&self, url: &str, session: &SessionContext) -> String {
        self.tokens.embed_token(url, session.token())
    }

    /// Issues a fresh CSRF token into `session`.
    pub fn reset_csrf_token(&self, session: &mut SessionContext) -> CsrfToken {
        self.tokens.issue_for(session)
    }

    /// Verifies the request's CSRF token against the session.
    pub fn verify_csrf_token(&self, ctx: &Ctx<'_>, session: &SessionContext) -> Result<bool> {
        self.tokens.verify_request(ctx, session)
    }

    // ------------------------------------------------------------------
    // Response writes
    // ------------------------------------------------------------------

    /// See [`SafeEmitter::add_cookie`].
    pub fn add_cookie(
        &self,
        ctx: &mut Ctx<'_>,
        name: &str,
        value: &str,
        max_age: Option<i64>,
        domain: Option<&str>,
        path: Option<&str>,
    ) -> Result<()> {
        self.emitter.add_cookie(ctx, name, value, max_age, domain, path)
    }

    /// See [`SafeEmitter::add_cookie_with`].
    pub fn add_cookie_with(&self, ctx: &mut Ctx<'_>, cookie: Cookie) -> Result<()> {
        self.emitter.add_cookie_with(ctx, cookie)
    }

    /// See [`SafeEmitter::add_header`].
    pub fn add_header(&self, ctx: &mut Ctx<'_>, name: &str, value: &str) -> Result<()> {
        self.emitter.add_header(ctx, name, value)
    }

    /// See [`SafeEmitter::set_header`].
    pub fn set_header(&self, ctx: &mut Ctx<'_>, name: &str, value: &str) -> Result<()> {
        self.emitter.set_header(ctx, name, value)
    }

    /// See [`SafeEmitter::set_no_cache_headers`].
    pub fn set_no_cache_headers(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        self.emitter.set_no_cache_headers(ctx)
    }

    /// See [`SafeEmitter::set_safe_content_type`].
    pub fn set_safe_content_type(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        self.emitter.set_safe_content_type(ctx)
    }

    /// See [`SafeEmitter::kill_cookie`].
    pub fn kill_cookie(&self, ctx: &mut Ctx<'_>, name: &str) -> Result<()> {
        self.emitter.kill_cookie(ctx, name)
    }

    /// See [`SafeEmitter::kill_all_cookies`].
    pub fn kill_all_cookies(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        self.emitter.kill_all_cookies(ctx)
    }

    // ------------------------------------------------------------------
    // Encrypted state
    // ------------------------------------------------------------------

    /// See [`StateCodec::encrypt_value`].
    pub fn encrypt_hidden_field(&self, value: &str) -> Result<String> {
        self.codec.encrypt_value(value)
    }

    /// See [`StateCodec::decrypt_value`].
    pub fn decrypt_hidden_field(&self, blob: Tainted<String>) -> Result<String> {
        self.codec.decrypt_value(blob)
    }

    /// See [`StateCodec::encrypt_query_string`].
    pub fn encrypt_query_string(&self, query: &str) -> Result<String> {
        self.codec.encrypt_query_string(query)
    }

    /// See [`StateCodec::decrypt_query_string`].
    pub fn decrypt_query_string(&self, blob: Tainted<String>) -> Result<StateMap> {
        self.codec.decrypt_query_string(blob)
    }

    /// See [`StateCodec::encrypt_state_in_cookie`].
    pub fn encrypt_state_in_cookie(&self, ctx: &mut Ctx<'_>, state: &StateMap) -> Result<()> {
        self.codec.encrypt_state_in_cookie(ctx, &self.emitter, state)
    }

    /// See [`StateCodec::decrypt_state_from_cookie`].
    pub fn decrypt_state_from_cookie(&self, ctx: &Ctx<'_>) -> Result<StateMap> {
        self.codec.decrypt_state_from_cookie(ctx)
    }

    // ------------------------------------------------------------------
    // Navigation, sessions, uploads, logging
    // ------------------------------------------------------------------

    /// See [`RedirectGuard::safe_redirect`].
    pub fn send_redirect(&self, ctx: &mut Ctx<'_>, context: &str, location: Tainted<String>) -> Result<()> {
        self.redirects.safe_redirect(ctx, context, location)
    }

    /// See [`RedirectGuard::safe_forward`].
    pub fn send_forward(&self, ctx: &mut Ctx<'_>, context: &str, location: Tainted<String>) -> Result<()> {
        self.redirects.safe_forward(ctx, context, location)
    }

    /// See [`SessionRotator::change_session_identifier`].
    pub fn change_session_identifier(&self, ctx: &mut Ctx<'_>) -> Result<SessionContext> {
        self.sessions.change_session_identifier(ctx, &self.emitter)
    }

    /// See [`UploadSanitizer::accept_upload`].
    pub fn accept_upload(
        &self,
        stream: &mut dyn MultipartStream,
        temp_dir: &Path,
        final_dir: &Path,
    ) -> Result<Vec<UploadedFile>> {
        self.uploads.accept_upload(stream, temp_dir, final_dir)
    }

    /// Logs the request to the configured sink with the default policy.
    pub fn log_request(&self, ctx: &Ctx<'_>) {
        self.logger.log_request(ctx, self.sink.as_ref());
    }

    /// Logs the request to the configured sink with an explicit policy.
    pub fn log_request_with(&self, ctx: &Ctx<'_>, policy: &ParameterPolicy) {
        self.logger.log_request_with(ctx, self.sink.as_ref(), policy);
    }
}

impl std::fmt::Debug for HttpGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGuard")
            .field("codec", &self.codec)
            .field("tokens", &self.tokens)
            .field("redirects", &self.redirects)
            .finish_non_exhaustive()
    }
}
