//! In-memory request for tests and buffered integrations.

use url::form_urlencoded;

use crate::http::HttpMethod;

use super::InboundRequest;

/// An owned, framework-independent request.
///
/// Query parameters are parsed from the URL on construction; form parameters
/// are added with [`with_form_param`](Self::with_form_param).
///
/// # Examples
///
/// ```
/// use http_guard::web::{InboundRequest, RequestAdapter};
/// use http_guard::HttpMethod;
///
/// let request = RequestAdapter::new(HttpMethod::Post, "/transfer?amount=100")
///     .with_remote_addr("203.0.113.7")
///     .with_cookie("SESSIONID", "abc")
///     .with_form_param("to", "alice")
///     .secure(true);
///
/// assert_eq!(request.parameter("amount"), Some("100"));
/// assert_eq!(request.parameter("to"), Some("alice"));
/// assert_eq!(request.cookie("SESSIONID"), Some("abc"));
/// assert!(request.is_secure());
/// ```
#[derive(Debug, Clone)]
pub struct RequestAdapter {
    method: HttpMethod,
    url: String,
    remote_addr: String,
    secure: bool,
    headers: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

impl RequestAdapter {
    /// Creates a request for `url`, parsing its query string into parameters.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        let url = url.into();
        let params = url
            .split_once('?')
            .map(|(_, rest)| {
                let query = rest.split_once('#').map_or(rest, |(q, _)| q);
                form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method,
            url,
            remote_addr: "127.0.0.1".to_string(),
            secure: false,
            headers: Vec::new(),
            cookies: Vec::new(),
            params,
        }
    }

    /// Sets the client address.
    pub fn with_remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = addr.into();
        self
    }

    /// Marks the exchange as TLS or plaintext.
    pub fn secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Adds a request header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Adds a request cookie.
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Adds a form parameter after the query parameters.
    pub fn with_form_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }
}

impl InboundRequest for RequestAdapter {
    fn method(&self) -> HttpMethod {
        self.method
    }

    fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn is_secure(&self) -> bool {
        self.secure
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn cookie_names(&self) -> Vec<&str> {
        self.cookies.iter().map(|(n, _)| n.as_str()).collect()
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn parameters(&self) -> Vec<(&str, &str)> {
        self.params
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parameters_are_parsed() {
        let request = RequestAdapter::new(HttpMethod::Get, "/search?q=rust+lang&page=2#top");

        assert_eq!(request.parameter("q"), Some("rust lang"));
        assert_eq!(request.parameter("page"), Some("2"));
        assert_eq!(request.parameters().len(), 2);
    }

    #[test]
    fn url_without_query_has_no_parameters() {
        let request = RequestAdapter::new(HttpMethod::Get, "/home");
        assert!(request.parameters().is_empty());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = RequestAdapter::new(HttpMethod::Get, "/").with_header("User-Agent", "curl");

        assert_eq!(request.header("user-agent"), Some("curl"));
        assert_eq!(request.header("Accept"), None);
    }

    #[test]
    fn first_cookie_wins() {
        let request = RequestAdapter::new(HttpMethod::Get, "/")
            .with_cookie("a", "1")
            .with_cookie("a", "2")
            .with_cookie("b", "3");

        assert_eq!(request.cookie("a"), Some("1"));
        assert_eq!(request.cookie_names(), vec!["a", "a", "b"]);
    }

    #[test]
    fn form_params_follow_query_params() {
        let request = RequestAdapter::new(HttpMethod::Post, "/login?next=%2Fhome")
            .with_form_param("user", "alice");

        assert_eq!(
            request.parameters(),
            vec![("next", "/home"), ("user", "alice")]
        );
    }
}
