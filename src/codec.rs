//! Authenticated encryption of opaque client-held state.
//!
//! Hidden form fields, query strings and cookies that must survive a round
//! trip through the browser are sealed with AES-256-GCM. The wire form is
//!
//! ```text
//! base64url( version ‖ nonce[12] ‖ ciphertext ‖ tag[16] )
//! ```
//!
//! The associated data binds each blob to its purpose (`hidden-field`,
//! `query-string`, `state`, `cookie:<name>`), so a blob minted for one use
//! is rejected in another. Every decryption failure produces the same error
//! so callers cannot distinguish a wrong key from a corrupted blob.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use url::form_urlencoded;

use crate::context::Ctx;
use crate::emitter::{Cookie, SafeEmitter};
use crate::error::{Error, Result};
use crate::random::{OsRandom, RandomSource};
use crate::{Secret, Tainted};

const VERSION: u8 = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

const DECRYPT_FAILED: &str = "unable to decrypt protected value";
const ENCRYPT_FAILED: &str = "unable to encrypt protected value";

/// A 256-bit AES key.
pub type StateKey = Secret<[u8; 32]>;

/// Supplies the current encryption key.
///
/// Key management lives outside this crate. The codec asks for the key once
/// per operation and holds that snapshot until the operation completes.
pub trait KeyProvider: Send + Sync {
    /// Returns the key to use for this operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the key store is unavailable.
    fn current_key(&self) -> Result<Arc<StateKey>>;
}

/// A fixed key.
#[derive(Debug)]
pub struct StaticKeyProvider {
    key: Arc<StateKey>,
}

impl StaticKeyProvider {
    /// Wraps a fixed key.
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Arc::new(Secret::new(key)),
        }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn current_key(&self) -> Result<Arc<StateKey>> {
        Ok(Arc::clone(&self.key))
    }
}

/// A key that can be replaced while the codec is in use.
///
/// Operations already in flight keep the key they started with.
#[derive(Debug)]
pub struct RotatingKeyProvider {
    key: RwLock<Arc<StateKey>>,
}

impl RotatingKeyProvider {
    /// Starts with `key`.
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: RwLock::new(Arc::new(Secret::new(key))),
        }
    }

    /// Replaces the key for all subsequent operations.
    pub fn rotate(&self, key: [u8; 32]) {
        *self.key.write() = Arc::new(Secret::new(key));
    }
}

impl KeyProvider for RotatingKeyProvider {
    fn current_key(&self) -> Result<Arc<StateKey>> {
        Ok(Arc::clone(&self.key.read()))
    }
}

/// Ordered string map carried inside an encrypted blob.
///
/// Keys are unique. Inserting an existing key replaces its value, and a
/// decoded blob with repeated keys keeps the last value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateMap {
    entries: BTreeMap<String, String>,
}

impl StateMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Removes a value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, String> {
        self.entries.iter()
    }

    fn to_form(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        serializer.extend_pairs(self.entries.iter());
        serializer.finish()
    }

    fn from_form(form: &str) -> Self {
        form_urlencoded::parse(form.as_bytes())
            .into_owned()
            .collect()
    }
}

impl From<BTreeMap<String, String>> for StateMap {
    fn from(entries: BTreeMap<String, String>) -> Self {
        Self { entries }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StateMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = StateMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl IntoIterator for StateMap {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Purpose label bound into the associated data.
#[derive(Debug, Clone, Copy)]
enum Purpose<'a> {
    HiddenField,
    QueryString,
    State,
    Cookie(&'a str),
}

impl Purpose<'_> {
    fn aad(&self) -> Vec<u8> {
        let mut aad = vec![VERSION];
        match self {
            Purpose::HiddenField => aad.extend_from_slice(b"hidden-field"),
            Purpose::QueryString => aad.extend_from_slice(b"query-string"),
            Purpose::State => aad.extend_from_slice(b"state"),
            Purpose::Cookie(name) => {
                aad.extend_from_slice(b"cookie:");
                aad.extend_from_slice(name.as_bytes());
            }
        }
        aad
    }

    fn label(&self) -> &'static str {
        match self {
            Purpose::HiddenField => "hidden-field",
            Purpose::QueryString => "query-string",
            Purpose::State => "state",
            Purpose::Cookie(_) => "cookie",
        }
    }
}

/// Seals and opens client-held state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use http_guard::{StateCodec, StateMap, StaticKeyProvider, Tainted};
///
/// let codec = StateCodec::new(Arc::new(StaticKeyProvider::new([7u8; 32])));
///
/// let mut state = StateMap::new();
/// state.insert("cart", "42");
///
/// let blob = codec.encrypt(&state).unwrap();
/// let opened = codec.decrypt(Tainted::new(blob)).unwrap();
/// assert_eq!(opened.get("cart"), Some("42"));
/// ```
///
/// # Security Properties
///
/// - Fresh random nonce per seal.
/// - Tampering, truncation, wrong key, wrong purpose and unknown version all
///   fail with one indistinguishable `Encryption` error.
/// - The key is read once per call, so a concurrent rotation never mixes
///   keys inside one operation.
pub struct StateCodec {
    keys: Arc<dyn KeyProvider>,
    random: Arc<dyn RandomSource>,
    state_cookie_name: String,
}

impl StateCodec {
    /// Creates a codec with the OS RNG and the default state cookie name.
    pub fn new(keys: Arc<dyn KeyProvider>) -> Self {
        Self {
            keys,
            random: Arc::new(OsRandom),
            state_cookie_name: "state".to_string(),
        }
    }

    /// Replaces the nonce source.
    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Sets the cookie used by the cookie state operations.
    pub fn with_state_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.state_cookie_name = name.into();
        self
    }

    /// Seals a state map.
    ///
    /// # Errors
    ///
    /// Returns an `Encryption` error if the key is unavailable.
    pub fn encrypt(&self, state: &StateMap) -> Result<String> {
        self.seal(state.to_form().as_bytes(), Purpose::State)
    }

    /// Opens a sealed state map.
    ///
    /// # Errors
    ///
    /// Returns an `Encryption` error on any failure.
    pub fn decrypt(&self, blob: Tainted<String>) -> Result<StateMap> {
        let form = self.open(blob.peek(), Purpose::State)?;
        Ok(StateMap::from_form(&form))
    }

    /// Seals a single hidden form field value.
    pub fn encrypt_value(&self, value: &str) -> Result<String> {
        self.seal(value.as_bytes(), Purpose::HiddenField)
    }

    /// Opens a hidden form field value.
    pub fn decrypt_value(&self, blob: Tainted<String>) -> Result<String> {
        self.open(blob.peek(), Purpose::HiddenField)
    }

    /// Seals a query string so its parameters cannot be read or altered.
    ///
    /// A leading `?` is dropped before sealing.
    pub fn encrypt_query_string(&self, query: &str) -> Result<String> {
        let query = query.strip_prefix('?').unwrap_or(query);
        self.seal(query.as_bytes(), Purpose::QueryString)
    }

    /// Opens a sealed query string into its parameters.
    pub fn decrypt_query_string(&self, blob: Tainted<String>) -> Result<StateMap> {
        let query = self.open(blob.peek(), Purpose::QueryString)?;
        Ok(StateMap::from_form(&query))
    }

    /// Seals `state` into the state cookie.
    ///
    /// # Errors
    ///
    /// Returns an `Encryption` error if sealing fails, or a `Validation`
    /// error if the resulting cookie exceeds the emitter's limits.
    pub fn encrypt_state_in_cookie(
        &self,
        ctx: &mut Ctx<'_>,
        emitter: &SafeEmitter,
        state: &StateMap,
    ) -> Result<()> {
        let blob = self.seal(
            state.to_form().as_bytes(),
            Purpose::Cookie(&self.state_cookie_name),
        )?;
        emitter.add_cookie_with(ctx, Cookie::new(&self.state_cookie_name, blob).path("/"))
    }

    /// Opens the state cookie sent with the request.
    ///
    /// # Errors
    ///
    /// Returns an `Encryption` error if the cookie is missing or invalid.
    pub fn decrypt_state_from_cookie(&self, ctx: &Ctx<'_>) -> Result<StateMap> {
        let Some(blob) = ctx.cookie(&self.state_cookie_name) else {
            ctx.log().debug(format_args!("state cookie absent"));
            return Err(Error::encryption(DECRYPT_FAILED));
        };
        let form = self
            .open(blob.peek(), Purpose::Cookie(&self.state_cookie_name))
            .inspect_err(|_| ctx.log().warn(format_args!("state cookie rejected")))?;
        Ok(StateMap::from_form(&form))
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        let key = self.keys.current_key().map_err(|e| {
            tracing::warn!(kind = %e.kind(), "key provider unavailable");
            Error::encryption(ENCRYPT_FAILED)
        })?;
        Aes256Gcm::new_from_slice(key.expose_secret())
            .map_err(|_| Error::encryption(ENCRYPT_FAILED))
    }

    fn seal(&self, plaintext: &[u8], purpose: Purpose<'_>) -> Result<String> {
        let cipher = self.cipher()?;

        let mut nonce = [0u8; NONCE_LEN];
        self.random.fill(&mut nonce);

        let aad = purpose.aad();
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: &aad,
                },
            )
            .map_err(|_| Error::encryption(ENCRYPT_FAILED))?;

        let mut blob = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        blob.push(VERSION);
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        tracing::debug!(purpose = purpose.label(), len = blob.len(), "sealed value");
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    fn open(&self, encoded: &str, purpose: Purpose<'_>) -> Result<String> {
        let opened = self.try_open(encoded, purpose);
        if opened.is_none() {
            tracing::warn!(purpose = purpose.label(), "protected value failed authentication");
        }
        opened.ok_or_else(|| Error::encryption(DECRYPT_FAILED))
    }

    fn try_open(&self, encoded: &str, purpose: Purpose<'_>) -> Option<String> {
        let blob = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if blob.len() < 1 + NONCE_LEN + TAG_LEN || blob[0] != VERSION {
            return None;
        }
        let (nonce, ciphertext) = blob[1..].split_at(NONCE_LEN);

        let cipher = self.cipher().ok()?;
        let aad = purpose.aad();
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .ok()?;
        String::from_utf8(plaintext).ok()
    }
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateCodec")
            .field("state_cookie_name", &self.state_cookie_name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn codec() -> StateCodec {
        StateCodec::new(Arc::new(StaticKeyProvider::new([1u8; 32])))
    }

    fn sample() -> StateMap {
        [("user", "alice"), ("step", "2"), ("note", "a=b&c d")]
            .into_iter()
            .collect()
    }

    #[test]
    fn round_trip() {
        let codec = codec();
        let blob = codec.encrypt(&sample()).unwrap();

        assert_eq!(codec.decrypt(Tainted::new(blob)).unwrap(), sample());
    }

    #[test]
    fn blob_is_url_safe() {
        let blob = codec().encrypt(&sample()).unwrap();
        assert!(blob
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn nonces_differ_between_seals() {
        let codec = codec();
        assert_ne!(
            codec.encrypt(&sample()).unwrap(),
            codec.encrypt(&sample()).unwrap()
        );
    }

    #[test]
    fn wrong_key_and_garbage_fail_identically() {
        let blob = codec().encrypt(&sample()).unwrap();
        let other = StateCodec::new(Arc::new(StaticKeyProvider::new([2u8; 32])));

        let wrong_key = other.decrypt(Tainted::new(blob)).unwrap_err();
        let garbage = other.decrypt(Tainted::new("!!not base64!!".to_string())).unwrap_err();
        let short = other.decrypt(Tainted::new("AQ".to_string())).unwrap_err();

        assert_eq!(wrong_key.kind(), ErrorKind::Encryption);
        assert_eq!(wrong_key, garbage);
        assert_eq!(wrong_key, short);
    }

    #[test]
    fn purpose_binding_rejects_cross_use() {
        let codec = codec();
        let hidden = codec.encrypt_value("account=7").unwrap();

        assert_eq!(codec.decrypt_value(Tainted::new(hidden.clone())).unwrap(), "account=7");
        assert!(codec.decrypt(Tainted::new(hidden.clone())).is_err());
        assert!(codec.decrypt_query_string(Tainted::new(hidden)).is_err());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let codec = codec();
        let mut raw = URL_SAFE_NO_PAD.decode(codec.encrypt(&sample()).unwrap()).unwrap();
        raw[0] = 2;

        let err = codec
            .decrypt(Tainted::new(URL_SAFE_NO_PAD.encode(raw)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encryption);
    }

    #[test]
    fn query_string_round_trip() {
        let codec = codec();
        let blob = codec.encrypt_query_string("?acct=42&view=full+page").unwrap();
        let params = codec.decrypt_query_string(Tainted::new(blob)).unwrap();

        assert_eq!(params.get("acct"), Some("42"));
        assert_eq!(params.get("view"), Some("full page"));
    }

    #[test]
    fn repeated_keys_keep_last_value() {
        let codec = codec();
        let blob = codec.encrypt_query_string("a=1&a=2").unwrap();
        let params = codec.decrypt_query_string(Tainted::new(blob)).unwrap();

        assert_eq!(params.len(), 1);
        assert_eq!(params.get("a"), Some("2"));
    }

    #[test]
    fn rotation_applies_to_later_calls() {
        let provider = Arc::new(RotatingKeyProvider::new([3u8; 32]));
        let codec = StateCodec::new(provider.clone());
        let before = codec.encrypt(&sample()).unwrap();

        provider.rotate([4u8; 32]);
        let after = codec.encrypt(&sample()).unwrap();

        assert!(codec.decrypt(Tainted::new(before)).is_err());
        assert_eq!(codec.decrypt(Tainted::new(after)).unwrap(), sample());
    }

    #[test]
    fn unavailable_key_is_encryption_error() {
        struct Offline;
        impl KeyProvider for Offline {
            fn current_key(&self) -> Result<Arc<StateKey>> {
                Err(Error::new(ErrorKind::Io, "kms down"))
            }
        }

        let codec = StateCodec::new(Arc::new(Offline));
        let err = codec.encrypt(&sample()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encryption);
        assert!(!err.to_string().contains("kms"));
    }

    mod proptests {
        use super::*;
        use crate::test_utils::arb_state_map;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(64))]

            #[test]
            fn proptest_round_trip(entries in arb_state_map()) {
                let codec = codec();
                let state = StateMap::from(entries);
                let blob = codec.encrypt(&state).unwrap();

                prop_assert_eq!(codec.decrypt(Tainted::new(blob)).unwrap(), state);
            }

            #[test]
            fn proptest_single_bit_flip_fails(
                entries in arb_state_map(),
                position in any::<prop::sample::Index>(),
                bit in 0u8..8,
            ) {
                let codec = codec();
                let blob = codec.encrypt(&StateMap::from(entries)).unwrap();
                let mut raw = URL_SAFE_NO_PAD.decode(blob).unwrap();
                let i = position.index(raw.len());
                raw[i] ^= 1 << bit;

                let err = codec
                    .decrypt(Tainted::new(URL_SAFE_NO_PAD.encode(raw)))
                    .unwrap_err();
                prop_assert_eq!(err.kind(), ErrorKind::Encryption);
            }
        }
    }
}
