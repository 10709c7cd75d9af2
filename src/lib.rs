//! HTTP mediation layer using taint tracking and explicit request context.
//!
//! This crate sits between application code and the raw HTTP exchange and
//! defends against:
//! - **Cross-site request forgery**: per-session tokens, constant-time checks
//! - **Response splitting**: every header and cookie is validated before it
//!   reaches the response
//! - **State tampering**: hidden fields, query strings and cookies are sealed
//!   with authenticated encryption
//! - **Session fixation**: identifiers rotate atomically at privilege changes
//! - **Open redirects**: destinations must normalize into an allow-list
//! - **Unsafe uploads**: names, types and sizes are checked before any file
//!   lands in its final directory
//!
//! # Core Types
//!
//! - [`Tainted<T>`]: untrusted input read from the request
//! - [`Verified<T>`]: the only kind of value a response write accepts
//! - [`Sanitizer<T>`]: the only path from one to the other
//! - [`Secret<T>`]: redacts keys and tokens in all formatting
//! - [`Ctx`]: the request id, request and response of one exchange
//! - [`HttpGuard`]: builder-assembled facade over every component
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use http_guard::web::{RecordingResponse, RequestAdapter};
//! use http_guard::{Ctx, HttpGuard, HttpMethod, SecurityConfig, StaticKeyProvider};
//!
//! let guard = HttpGuard::builder(SecurityConfig::default())
//!     .key_provider(Arc::new(StaticKeyProvider::new([42u8; 32])))
//!     .build()
//!     .expect("valid configuration");
//!
//! let request = RequestAdapter::new(HttpMethod::Get, "/account");
//! let mut response = RecordingResponse::new();
//! let mut ctx = Ctx::new("req-1", &request, &mut response);
//!
//! guard.set_no_cache_headers(&mut ctx).unwrap();
//!
//! // Header injection never reaches the response
//! assert!(guard
//!     .add_header(&mut ctx, "X-Note", "ok\r\nSet-Cookie: admin=1")
//!     .is_err());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod config;
mod context;
mod csrf;
mod emitter;
mod error;
mod gate;
mod http;
mod logging;
mod random;
mod redirect;
mod sanitizer;
mod secret;
mod session;
mod tainted;
mod upload;
mod verified;
pub mod web;

#[cfg(test)]
mod test_utils;

pub use codec::{KeyProvider, RotatingKeyProvider, StateCodec, StateKey, StateMap, StaticKeyProvider};
pub use config::{
    CookieConfig, CsrfConfig, HeaderConfig, LoggingConfig, RedirectConfig, SameSite,
    SecurityConfig, UploadConfig,
};
pub use context::Ctx;
pub use csrf::{CsrfToken, TokenManager};
pub use emitter::{Cookie, SafeEmitter};
pub use error::{Error, ErrorKind, Result};
pub use gate::{HttpGuard, HttpGuardBuilder};
pub use http::{HeaderField, HttpMethod};
pub use logging::{LogSink, MemorySink, ParameterPolicy, RequestLog, RequestLogger, TracingSink};
pub use random::{OsRandom, RandomSource};
pub use redirect::RedirectGuard;
pub use sanitizer::{FieldRule, FieldSanitizer, Sanitizer};
pub use secret::Secret;
pub use session::{Attributes, MemorySessionStore, SessionContext, SessionRotator, SessionStore};
pub use tainted::Tainted;
pub use upload::{
    ContentScanner, FilenameSanitizer, MemoryMultipart, MultipartStream, NoopScanner,
    UploadPart, UploadSanitizer, UploadedFile,
};
pub use verified::Verified;
