//! Recording response for tests and buffered integrations.

use crate::error::Result;
use crate::http::HeaderField;
use crate::Verified;

use super::OutboundResponse;

/// A response that records every write instead of performing I/O.
///
/// Keeps tests deterministic and offline, and doubles as a buffer for
/// integrations that assemble the real response after the handler returns.
///
/// # Examples
///
/// ```
/// use http_guard::web::RecordingResponse;
///
/// let response = RecordingResponse::new();
/// assert!(response.headers().is_empty());
/// assert!(response.redirected_to().is_none());
/// ```
#[derive(Debug, Clone, Default)]
pub struct RecordingResponse {
    headers: Vec<HeaderField>,
    redirect: Option<String>,
    forward: Option<String>,
}

impl RecordingResponse {
    /// Creates an empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// All headers in write order.
    pub fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    /// Values of every header named `name`, matched case-insensitively.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
            .collect()
    }

    /// Location of the committed redirect, if any.
    pub fn redirected_to(&self) -> Option<&str> {
        self.redirect.as_deref()
    }

    /// Target of the committed forward, if any.
    pub fn forwarded_to(&self) -> Option<&str> {
        self.forward.as_deref()
    }

    /// Returns `true` if nothing has been written.
    pub fn is_untouched(&self) -> bool {
        self.headers.is_empty() && self.redirect.is_none() && self.forward.is_none()
    }
}

impl OutboundResponse for RecordingResponse {
    fn add_header(&mut self, header: Verified<HeaderField>) {
        self.headers.push(header.into_inner());
    }

    fn set_header(&mut self, header: Verified<HeaderField>) {
        let header = header.into_inner();
        self.headers
            .retain(|h| !h.name.eq_ignore_ascii_case(&header.name));
        self.headers.push(header);
    }

    fn send_redirect(&mut self, location: Verified<String>) -> Result<()> {
        self.redirect = Some(location.into_inner());
        Ok(())
    }

    fn forward(&mut self, path: Verified<String>) -> Result<()> {
        self.forward = Some(path.into_inner());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str, value: &str) -> Verified<HeaderField> {
        Verified::new_unchecked(HeaderField {
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    #[test]
    fn add_header_appends() {
        let mut response = RecordingResponse::new();
        response.add_header(field("Cache-Control", "no-store"));
        response.add_header(field("Cache-Control", "no-cache"));

        assert_eq!(
            response.header_values("cache-control"),
            vec!["no-store", "no-cache"]
        );
    }

    #[test]
    fn set_header_replaces_all_with_same_name() {
        let mut response = RecordingResponse::new();
        response.add_header(field("X-Frame-Options", "SAMEORIGIN"));
        response.add_header(field("x-frame-options", "ALLOW"));
        response.add_header(field("Vary", "Cookie"));
        response.set_header(field("X-Frame-Options", "DENY"));

        assert_eq!(response.header_values("X-Frame-Options"), vec!["DENY"]);
        assert_eq!(response.headers().len(), 2);
    }

    #[test]
    fn redirect_and_forward_are_recorded() {
        let mut response = RecordingResponse::new();
        assert!(response.is_untouched());

        response
            .send_redirect(Verified::new_unchecked("/app/ok".to_string()))
            .unwrap();
        response
            .forward(Verified::new_unchecked("/WEB-INF/view".to_string()))
            .unwrap();

        assert_eq!(response.redirected_to(), Some("/app/ok"));
        assert_eq!(response.forwarded_to(), Some("/WEB-INF/view"));
        assert!(!response.is_untouched());
    }
}
