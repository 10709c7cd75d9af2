//! Transport capability surface.
//!
//! This module is the boundary between a concrete HTTP server and the
//! mediation components. It defines the minimal operations the components
//! need and nothing framework-specific:
//! - [`InboundRequest`]: read method, URL, headers, cookies, parameters, TLS
//! - [`OutboundResponse`]: write validated headers, issue redirects/forwards
//!
//! # Design Principles
//!
//! 1. **No Framework Dependencies**: integrations implement the two traits
//!    for their own request/response types.
//!
//! 2. **Verified Writes Only**: every `OutboundResponse` method takes a
//!    [`Verified`] value. Code outside this crate cannot construct one, so the
//!    [`SafeEmitter`](crate::SafeEmitter) and
//!    [`RedirectGuard`](crate::RedirectGuard) are the only writers.
//!
//! 3. **Taint at Boundary**: raw strings from `InboundRequest` are wrapped in
//!    [`Tainted`](crate::Tainted) by [`Ctx`](crate::Ctx) before application
//!    code sees them.
//!
//! [`RequestAdapter`] and [`RecordingResponse`] are in-memory
//! implementations for tests and for embedding behind servers that buffer
//! the exchange.

mod adapter;
mod recorder;

pub use adapter::RequestAdapter;
pub use recorder::RecordingResponse;

use crate::error::Result;
use crate::http::{HeaderField, HttpMethod};
use crate::Verified;

/// Read access to the incoming request.
pub trait InboundRequest {
    /// Request method.
    fn method(&self) -> HttpMethod;

    /// Client address as reported by the transport.
    fn remote_addr(&self) -> &str;

    /// Request target (path and query) as received.
    fn url(&self) -> &str;

    /// Whether the exchange arrived over TLS.
    fn is_secure(&self) -> bool;

    /// First value of the named header, matched case-insensitively.
    fn header(&self, name: &str) -> Option<&str>;

    /// Value of the first cookie with exactly this name.
    fn cookie(&self, name: &str) -> Option<&str>;

    /// Names of all cookies sent with the request, in order.
    fn cookie_names(&self) -> Vec<&str>;

    /// First value of the named query or form parameter.
    fn parameter(&self, name: &str) -> Option<&str>;

    /// All query and form parameters, in order, repeated names included.
    fn parameters(&self) -> Vec<(&str, &str)>;
}

/// Write access to the outgoing response.
pub trait OutboundResponse {
    /// Appends a header, keeping existing headers with the same name.
    fn add_header(&mut self, header: Verified<HeaderField>);

    /// Replaces every header with the same name.
    fn set_header(&mut self, header: Verified<HeaderField>);

    /// Sends a redirect to an allow-listed location.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot commit the redirect.
    fn send_redirect(&mut self, location: Verified<String>) -> Result<()>;

    /// Dispatches the request server-side to a non-public resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot dispatch.
    fn forward(&mut self, path: Verified<String>) -> Result<()>;
}
