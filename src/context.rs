use crate::error::{Error, Result};
use crate::http::HttpMethod;
use crate::logging::RequestLog;
use crate::web::{InboundRequest, OutboundResponse};
use crate::Tainted;

/// Per-exchange context: the request id plus the bound request and response.
///
/// Every mediation operation takes a `Ctx` explicitly instead of reaching for
/// a thread-local "current request". Two exchanges on two threads therefore
/// cannot observe each other's request or response.
///
/// Values read from the request come back as [`Tainted`]. The response is
/// only reachable through the crate's components, which write
/// [`Verified`](crate::Verified) values.
///
/// # Examples
///
/// ```
/// use http_guard::web::{RecordingResponse, RequestAdapter};
/// use http_guard::{Ctx, HttpMethod};
///
/// let request = RequestAdapter::new(HttpMethod::Get, "/search?q=rust");
/// let mut response = RecordingResponse::new();
/// let ctx = Ctx::new("req-1", &request, &mut response);
///
/// assert_eq!(ctx.request_id(), "req-1");
/// assert_eq!(ctx.method(), HttpMethod::Get);
/// assert!(ctx.parameter("q").is_some());
/// assert!(ctx.parameter("missing").is_none());
/// ```
pub struct Ctx<'a> {
    request_id: String,
    request: &'a dyn InboundRequest,
    response: &'a mut dyn OutboundResponse,
}

impl<'a> Ctx<'a> {
    /// Binds a request and response for one exchange.
    pub fn new(
        request_id: impl Into<String>,
        request: &'a dyn InboundRequest,
        response: &'a mut dyn OutboundResponse,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            request,
            response,
        }
    }

    /// Returns the request ID for this context.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Request method.
    pub fn method(&self) -> HttpMethod {
        self.request.method()
    }

    /// Client address. Informational only; not an identity.
    pub fn remote_addr(&self) -> &str {
        self.request.remote_addr()
    }

    /// Request target as received, still untrusted.
    pub fn url(&self) -> Tainted<String> {
        Tainted::new(self.request.url().to_string())
    }

    /// Whether the exchange arrived over TLS.
    pub fn is_secure(&self) -> bool {
        self.request.is_secure()
    }

    /// First value of the named request header.
    pub fn header(&self, name: &str) -> Option<Tainted<String>> {
        self.request.header(name).map(|v| Tainted::new(v.to_string()))
    }

    /// Value of the named request cookie.
    ///
    /// Cookies are client-controlled, so the value is returned tainted.
    pub fn cookie(&self, name: &str) -> Option<Tainted<String>> {
        self.request.cookie(name).map(|v| Tainted::new(v.to_string()))
    }

    /// Names of all cookies presented with the request.
    pub fn cookie_names(&self) -> Vec<Tainted<String>> {
        self.request
            .cookie_names()
            .into_iter()
            .map(|n| Tainted::new(n.to_string()))
            .collect()
    }

    /// First value of the named query or form parameter.
    pub fn parameter(&self, name: &str) -> Option<Tainted<String>> {
        self.request
            .parameter(name)
            .map(|v| Tainted::new(v.to_string()))
    }

    /// Distinct parameter names, in first-seen order.
    pub fn parameter_names(&self) -> Vec<Tainted<String>> {
        let mut seen: Vec<&str> = Vec::new();
        for (name, _) in self.request.parameters() {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen.into_iter()
            .map(|n| Tainted::new(n.to_string()))
            .collect()
    }

    /// Requires the exchange to be a POST over TLS.
    ///
    /// Use on endpoints that accept credentials or other sensitive data so
    /// they never travel in a URL or in cleartext.
    ///
    /// # Errors
    ///
    /// Returns an `AccessControl` error if the request is not secure or is
    /// not a POST.
    pub fn assert_secure_request(&self) -> Result<()> {
        if !self.request.is_secure() {
            self.log()
                .warn(format_args!("insecure channel for sensitive request"));
            return Err(Error::access_control("request must use TLS"));
        }
        if self.request.method() != HttpMethod::Post {
            self.log()
                .warn(format_args!("sensitive request with method {}", self.method()));
            return Err(Error::access_control("request must use POST"));
        }
        Ok(())
    }

    /// The request bound to this exchange.
    pub fn current_request(&self) -> &dyn InboundRequest {
        self.request
    }

    /// The response bound to this exchange.
    ///
    /// Writes still require [`Verified`](crate::Verified) values, so holding
    /// the response does not bypass validation.
    pub fn current_response(&mut self) -> &mut dyn OutboundResponse {
        self.response
    }

    /// Request-scoped logger.
    pub fn log(&self) -> RequestLog<'_> {
        RequestLog::new(&self.request_id)
    }

    pub(crate) fn request_parameters(&self) -> Vec<(&str, &str)> {
        self.request.parameters()
    }

    pub(crate) fn raw_url(&self) -> &str {
        self.request.url()
    }
}

impl std::fmt::Debug for Ctx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("request_id", &self.request_id)
            .field("method", &self.request.method())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::{RecordingResponse, RequestAdapter};
    use crate::ErrorKind;

    #[test]
    fn accessors_wrap_values_in_taint() {
        let request = RequestAdapter::new(HttpMethod::Get, "/a?x=1&y=2&x=3")
            .with_header("Referer", "https://example.com/")
            .with_cookie("theme", "dark");
        let mut response = RecordingResponse::new();
        let ctx = Ctx::new("req-1", &request, &mut response);

        assert_eq!(ctx.parameter("x").unwrap().peek(), "1");
        assert_eq!(ctx.cookie("theme").unwrap().peek(), "dark");
        assert_eq!(ctx.header("referer").unwrap().peek(), "https://example.com/");
        assert_eq!(ctx.url().peek(), "/a?x=1&y=2&x=3");
        assert!(ctx.cookie("missing").is_none());
    }

    #[test]
    fn parameter_names_are_distinct() {
        let request = RequestAdapter::new(HttpMethod::Get, "/a?x=1&y=2&x=3");
        let mut response = RecordingResponse::new();
        let ctx = Ctx::new("req-1", &request, &mut response);

        let names: Vec<String> = ctx
            .parameter_names()
            .into_iter()
            .map(Tainted::into_inner)
            .collect();
        assert_eq!(names, vec!["x", "y"]);
    }

    #[test]
    fn secure_post_passes() {
        let request = RequestAdapter::new(HttpMethod::Post, "/login").secure(true);
        let mut response = RecordingResponse::new();
        let ctx = Ctx::new("req-1", &request, &mut response);

        assert!(ctx.assert_secure_request().is_ok());
    }

    #[test]
    fn plaintext_post_is_rejected() {
        let request = RequestAdapter::new(HttpMethod::Post, "/login");
        let mut response = RecordingResponse::new();
        let ctx = Ctx::new("req-1", &request, &mut response);

        let err = ctx.assert_secure_request().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessControl);
    }

    #[test]
    fn secure_get_is_rejected() {
        let request = RequestAdapter::new(HttpMethod::Get, "/login?password=x").secure(true);
        let mut response = RecordingResponse::new();
        let ctx = Ctx::new("req-1", &request, &mut response);

        let err = ctx.assert_secure_request().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessControl);
        assert!(!err.to_string().contains("password"));
    }

    #[test]
    fn debug_omits_request_data() {
        let request = RequestAdapter::new(HttpMethod::Get, "/?token=abc");
        let mut response = RecordingResponse::new();
        let ctx = Ctx::new("req-9", &request, &mut response);

        let out = format!("{:?}", ctx);
        assert!(out.contains("req-9"));
        assert!(!out.contains("abc"));
    }
}
