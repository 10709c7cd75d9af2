//! Session identifier rotation.
//!
//! Rotating the identifier at privilege changes (typically login) defeats
//! session fixation: an identifier planted before authentication is dead
//! afterwards. [`SessionRotator::rotate`] invalidates the old identifier
//! before the new one becomes resolvable, so no request can ever observe
//! both as live.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;

use crate::context::Ctx;
use crate::csrf::{CsrfToken, TokenManager};
use crate::emitter::{Cookie, SafeEmitter};
use crate::error::{Error, Result};
use crate::random::{random_bytes, OsRandom, RandomSource};

const SESSION_ID_BYTES: usize = 32;

/// Session attribute values.
pub type Attributes = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// A live session: identifier, attributes and current CSRF token.
#[derive(Clone)]
pub struct SessionContext {
    id: String,
    attributes: Attributes,
    pub(crate) token: CsrfToken,
}

impl SessionContext {
    pub(crate) fn new(id: String, attributes: Attributes, token: CsrfToken) -> Self {
        Self {
            id,
            attributes,
            token,
        }
    }

    /// Session identifier, as carried in the session cookie.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current CSRF token.
    pub fn token(&self) -> &CsrfToken {
        &self.token
    }

    /// All attributes.
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Typed attribute lookup.
    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        self.attributes.get(name)?.downcast_ref::<T>()
    }

    /// Sets an attribute, replacing any previous value.
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, name: impl Into<String>, value: T) {
        self.attributes.insert(name.into(), Arc::new(value));
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.attributes.keys().collect();
        names.sort();
        f.debug_struct("SessionContext")
            .field("id", &"[REDACTED]")
            .field("attributes", &names)
            .field("token", &self.token)
            .finish()
    }
}

/// Persistent session storage.
pub trait SessionStore: Send + Sync {
    /// Looks up a session by identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn load(&self, id: &str) -> Result<Option<SessionContext>>;

    /// Stores a session under its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn save(&self, session: &SessionContext) -> Result<()>;

    /// Removes a session, returning it if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn invalidate(&self, id: &str) -> Result<Option<SessionContext>>;
}

/// In-process session store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, SessionContext>>,
}

impl MemorySessionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Returns `true` if no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Returns `true` if `id` resolves to a live session.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self, id: &str) -> Result<Option<SessionContext>> {
        Ok(self.sessions.lock().get(id).cloned())
    }

    fn save(&self, session: &SessionContext) -> Result<()> {
        self.sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn invalidate(&self, id: &str) -> Result<Option<SessionContext>> {
        Ok(self.sessions.lock().remove(id))
    }
}

/// Creates sessions and rotates their identifiers.
///
/// Rotations of the same identifier are serialized. Rotations of different
/// identifiers proceed in parallel.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use http_guard::{Attributes, CsrfConfig, MemorySessionStore, SessionRotator, TokenManager};
///
/// let store = Arc::new(MemorySessionStore::new());
/// let rotator = SessionRotator::new(store.clone(), TokenManager::new(&CsrfConfig::default()));
///
/// let mut session = rotator.establish(Attributes::new()).unwrap();
/// session.set_attribute("user", "alice".to_string());
/// let old_id = session.id().to_string();
/// # use http_guard::SessionStore;
/// store.save(&session).unwrap();
///
/// let rotated = rotator.rotate(&old_id).unwrap();
/// assert_ne!(rotated.id(), old_id);
/// assert_eq!(rotated.attribute::<String>("user").map(String::as_str), Some("alice"));
/// assert!(!store.contains(&old_id));
/// ```
pub struct SessionRotator {
    store: Arc<dyn SessionStore>,
    tokens: TokenManager,
    random: Arc<dyn RandomSource>,
    cookie_name: String,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRotator {
    /// Creates a rotator over `store`.
    pub fn new(store: Arc<dyn SessionStore>, tokens: TokenManager) -> Self {
        Self {
            store,
            tokens,
            random: Arc::new(OsRandom),
            cookie_name: "SESSIONID".to_string(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the identifier source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Sets the session cookie name.
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.cookie_name = name.into();
        self
    }

    /// Creates and stores a new session.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the session cannot be saved.
    pub fn establish(&self, attributes: Attributes) -> Result<SessionContext> {
        let session = SessionContext::new(self.new_id(), attributes, self.tokens.issue_token());
        self.store.save(&session)?;
        tracing::debug!("session established");
        Ok(session)
    }

    /// Moves a session to a fresh identifier with a fresh CSRF token.
    ///
    /// Attributes carry over unchanged. The old identifier is invalidated
    /// before the new one is saved; if saving fails the old session is put
    /// back and the error returned.
    ///
    /// # Errors
    ///
    /// Returns an `Authentication` error if `current_id` is not a live
    /// session, or the store's error if it cannot be updated.
    pub fn rotate(&self, current_id: &str) -> Result<SessionContext> {
        self.rotate_then(current_id, |_| Ok(()))
    }

    /// Rotates, then runs `commit` on the new session while the id lock is
    /// still held. If `commit` fails the rotation is undone: the new id is
    /// dropped and the old session is live again.
    fn rotate_then(
        &self,
        current_id: &str,
        commit: impl FnOnce(&SessionContext) -> Result<()>,
    ) -> Result<SessionContext> {
        self.with_session_lock(current_id, || {
            let Some(old) = self.store.load(current_id)? else {
                tracing::warn!("rotation requested for unknown session");
                return Err(Error::authentication("no active session"));
            };

            let mut rotated = old.clone();
            rotated.id = self.new_id();
            self.tokens.issue_for(&mut rotated);

            self.store.invalidate(current_id)?;
            if let Err(err) = self.store.save(&rotated) {
                tracing::warn!(kind = %err.kind(), "rotated session not saved, restoring");
                if let Err(restore) = self.store.save(&old) {
                    tracing::warn!(kind = %restore.kind(), "session restore failed");
                }
                return Err(err);
            }

            if let Err(err) = commit(&rotated) {
                tracing::warn!(kind = %err.kind(), "rotation not committed, restoring");
                self.store.invalidate(rotated.id())?;
                self.store.save(&old)?;
                return Err(err);
            }

            tracing::debug!("session identifier rotated");
            Ok(rotated)
        })
    }

    /// Rotates the session named by the request's session cookie and sets
    /// the cookie to the new identifier.
    ///
    /// # Errors
    ///
    /// Returns an `Authentication` error if the request carries no session
    /// cookie or the session is not live. If the new cookie fails
    /// validation the old session stays live and its `Validation` error is
    /// returned.
    pub fn change_session_identifier(
        &self,
        ctx: &mut Ctx<'_>,
        emitter: &SafeEmitter,
    ) -> Result<SessionContext> {
        let Some(current) = ctx.cookie(&self.cookie_name) else {
            ctx.log().warn(format_args!("session cookie absent"));
            return Err(Error::authentication("no active session"));
        };
        let rotated = self.rotate_then(current.peek(), |rotated| {
            emitter.add_cookie_with(ctx, Cookie::new(&self.cookie_name, rotated.id()).path("/"))
        })?;
        ctx.log().info(format_args!("session identifier changed"));
        Ok(rotated)
    }

    fn new_id(&self) -> String {
        URL_SAFE_NO_PAD.encode(random_bytes(self.random.as_ref(), SESSION_ID_BYTES))
    }

    fn with_session_lock<R>(&self, id: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let lock = Arc::clone(self.locks.lock().entry(id.to_string()).or_default());
        let result = {
            let _held = lock.lock();
            f()
        };

        let mut table = self.locks.lock();
        // Table entry plus ours: nobody else is waiting on this id.
        if Arc::strong_count(&lock) == 2 {
            table.remove(id);
        }
        result
    }
}

impl fmt::Debug for SessionRotator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRotator")
            .field("cookie_name", &self.cookie_name)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}
