//! Allow-listed redirects and forwards.
//!
//! Destinations are resolved before they are compared:
//!
//! 1. Empty input, control characters, whitespace and backslashes are
//!    rejected outright.
//! 2. The path is percent-decoded repeatedly, up to a fixed number of
//!    rounds, so encoded traversal such as `%252e%252e` is seen as `..`.
//! 3. Relative paths must start with exactly one `/`. Dot segments are
//!    removed and a path that climbs above the root is rejected.
//! 4. Absolute URLs must be `http` or `https` with no user info.
//!
//! Matching is by whole path segment, so `/app` admits `/app/x` but not
//! `/application`.

use std::collections::HashMap;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use url::Url;

use crate::config::RedirectConfig;
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::{Tainted, Verified};

const MAX_DECODE_ROUNDS: usize = 3;

/// Characters re-encoded when a decoded path is written back out.
const PATH_ENCODE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, PartialEq, Eq)]
enum AllowEntry {
    Path(String),
    Origin {
        scheme: String,
        host: String,
        port: Option<u16>,
        path: String,
    },
}

impl AllowEntry {
    fn parse(entry: &str) -> Option<Self> {
        if entry.starts_with('/') && !entry.starts_with("//") {
            let path = normalize_path(entry)?;
            return Some(AllowEntry::Path(path));
        }
        let url = Url::parse(entry).ok()?;
        if !matches!(url.scheme(), "http" | "https") || !url.username().is_empty() {
            return None;
        }
        Some(AllowEntry::Origin {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_ascii_lowercase(),
            port: url.port_or_known_default(),
            path: normalize_path(url.path())?,
        })
    }

    fn admits(&self, target: &Target) -> bool {
        match (self, target) {
            (AllowEntry::Path(prefix), Target::Relative { path, .. }) => {
                within(path, prefix)
            }
            (
                AllowEntry::Origin {
                    scheme,
                    host,
                    port,
                    path: prefix,
                },
                Target::Absolute { url, path },
            ) => {
                url.scheme() == scheme.as_str()
                    && url.host_str().map(str::to_ascii_lowercase).as_deref() == Some(host.as_str())
                    && url.port_or_known_default() == *port
                    && within(path, prefix)
            }
            _ => false,
        }
    }
}

#[derive(Debug)]
enum Target {
    Relative { path: String, rest: String },
    Absolute { url: Url, path: String },
}

impl Target {
    fn resolve(location: &str) -> Option<Self> {
        if location.is_empty()
            || location
                .chars()
                .any(|c| c.is_control() || c.is_whitespace() || c == '\\')
        {
            return None;
        }

        if location.starts_with('/') {
            let split = location.find(['?', '#']).unwrap_or(location.len());
            let (raw_path, rest) = location.split_at(split);
            let decoded = decode_fully(raw_path)?;
            if decoded.starts_with("//") || decoded.contains('\\') {
                return None;
            }
            return Some(Target::Relative {
                path: normalize_path(&decoded)?,
                rest: rest.to_string(),
            });
        }

        let lower = location.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return None;
        }
        let url = Url::parse(location).ok()?;
        if !url.username().is_empty() || url.password().is_some() || url.host_str().is_none() {
            return None;
        }
        let decoded = decode_fully(url.path())?;
        if decoded.contains('\\') {
            return None;
        }
        let path = normalize_path(&decoded)?;
        Some(Target::Absolute { url, path })
    }

    fn render(&self) -> String {
        match self {
            Target::Relative { path, rest } => {
                format!("{}{}", utf8_percent_encode(path, PATH_ENCODE), rest)
            }
            Target::Absolute { url, .. } => url.to_string(),
        }
    }
}

/// Percent-decodes until stable. Gives up if still changing after the
/// round limit, or if a round produces invalid UTF-8 or control characters.
fn decode_fully(input: &str) -> Option<String> {
    let mut current = input.to_string();
    for _ in 0..=MAX_DECODE_ROUNDS {
        let next = percent_decode_str(&current).decode_utf8().ok()?.into_owned();
        if next.chars().any(char::is_control) {
            return None;
        }
        if next == current {
            return Some(current);
        }
        current = next;
    }
    None
}

/// Removes `.`, `..` and empty segments. `None` if the path climbs above
/// the root.
fn normalize_path(path: &str) -> Option<String> {
    let body = path.strip_prefix('/')?;
    let mut stack: Vec<&str> = Vec::new();
    let mut trailing_slash = body.is_empty() || body.ends_with('/');

    let segments: Vec<&str> = body.split('/').collect();
    let last = segments.len().saturating_sub(1);
    for (i, segment) in segments.into_iter().enumerate() {
        match segment {
            "." => trailing_slash |= i == last,
            ".." => {
                stack.pop()?;
                trailing_slash |= i == last;
            }
            "" => {}
            other => stack.push(other),
        }
    }

    let mut out = format!("/{}", stack.join("/"));
    if trailing_slash && !stack.is_empty() {
        out.push('/');
    }
    Some(out)
}

/// Segment-aware prefix test.
fn within(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Validates redirect and forward destinations against per-context
/// allow-lists.
///
/// # Examples
///
/// ```
/// use http_guard::web::{RecordingResponse, RequestAdapter};
/// use http_guard::{Ctx, HttpMethod, RedirectGuard, SecurityConfig, Tainted};
///
/// let config = SecurityConfig::from_toml_str(r#"
///     [redirects.contexts]
///     app = ["/app/"]
/// "#).unwrap();
/// let guard = RedirectGuard::new(&config.redirects).unwrap();
///
/// let request = RequestAdapter::new(HttpMethod::Get, "/login");
/// let mut response = RecordingResponse::new();
/// let mut ctx = Ctx::new("req-1", &request, &mut response);
///
/// guard.safe_redirect(&mut ctx, "app", Tainted::new("/app/home".to_string())).unwrap();
/// assert!(guard
///     .safe_redirect(&mut ctx, "app", Tainted::new("https://evil.example/".to_string()))
///     .is_err());
/// # drop(ctx);
/// assert_eq!(response.redirected_to(), Some("/app/home"));
/// ```
#[derive(Debug, Clone)]
pub struct RedirectGuard {
    contexts: HashMap<String, Vec<AllowEntry>>,
    forward_namespace: String,
}

impl RedirectGuard {
    /// Builds the guard from configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if an allow-list entry or the forward
    /// namespace cannot be parsed.
    pub fn new(config: &RedirectConfig) -> Result<Self> {
        let mut contexts = HashMap::new();
        for (context, entries) in &config.contexts {
            let parsed = entries
                .iter()
                .map(|e| AllowEntry::parse(e))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    Error::validation(format!("invalid allow-list entry in context {context}"))
                })?;
            contexts.insert(context.clone(), parsed);
        }
        let forward_namespace = normalize_path(&config.forward_namespace)
            .ok_or_else(|| Error::validation("invalid forward namespace"))?;

        Ok(Self {
            contexts,
            forward_namespace,
        })
    }

    /// Resolves `location` and checks it against the context allow-list.
    ///
    /// # Errors
    ///
    /// Returns an `AccessControl` error if the context is unknown or the
    /// destination is not allowed.
    pub fn check_redirect(&self, context: &str, location: &Tainted<String>) -> Result<Verified<String>> {
        let entries = self.entries(context)?;
        let target = Target::resolve(location.peek())
            .filter(|t| entries.iter().any(|e| e.admits(t)))
            .ok_or_else(|| {
                tracing::warn!(context = %context, "redirect destination rejected");
                Error::access_control("redirect destination not allowed")
            })?;
        Ok(Verified::new_unchecked(target.render()))
    }

    /// Redirects to `location` if the context allows it.
    ///
    /// # Errors
    ///
    /// Returns an `AccessControl` error, without redirecting, if the
    /// destination is not allowed.
    pub fn safe_redirect(&self, ctx: &mut Ctx<'_>, context: &str, location: Tainted<String>) -> Result<()> {
        let verified = self.check_redirect(context, &location)?;
        ctx.log()
            .debug(format_args!("redirect in context {context}"));
        ctx.current_response().send_redirect(verified)
    }

    /// Forwards to a non-public resource inside the forward namespace.
    ///
    /// Only relative paths are accepted. The path must be inside the forward
    /// namespace and admitted by the context allow-list.
    ///
    /// # Errors
    ///
    /// Returns an `AccessControl` error, without forwarding, otherwise.
    pub fn safe_forward(&self, ctx: &mut Ctx<'_>, context: &str, location: Tainted<String>) -> Result<()> {
        let entries = self.entries(context)?;
        let target = Target::resolve(location.peek())
            .filter(|t| match t {
                Target::Relative { path, .. } => within(path, &self.forward_namespace),
                Target::Absolute { .. } => false,
            })
            .filter(|t| entries.iter().any(|e| e.admits(t)))
            .ok_or_else(|| {
                ctx.log()
                    .warn(format_args!("forward destination rejected in context {context}"));
                Error::access_control("forward destination not allowed")
            })?;

        ctx.current_response()
            .forward(Verified::new_unchecked(target.render()))
    }

    fn entries(&self, context: &str) -> Result<&[AllowEntry]> {
        self.contexts
            .get(context)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::access_control("unknown redirect context"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpMethod;
    use crate::web::{RecordingResponse, RequestAdapter};
    use crate::ErrorKind;

    fn guard() -> RedirectGuard {
        let mut config = RedirectConfig::default();
        config.contexts.insert(
            "app".to_string(),
            vec![
                "/app/".to_string(),
                "https://partner.example/callback".to_string(),
            ],
        );
        config.contexts.insert(
            "views".to_string(),
            vec!["/WEB-INF/views/".to_string(), "/public/".to_string()],
        );
        RedirectGuard::new(&config).unwrap()
    }

    fn check(location: &str) -> Result<String> {
        guard()
            .check_redirect("app", &Tainted::new(location.to_string()))
            .map(Verified::into_inner)
    }

    #[test]
    fn allowed_relative_paths() {
        assert_eq!(check("/app/ok").unwrap(), "/app/ok");
        assert_eq!(check("/app").unwrap(), "/app");
        assert_eq!(check("/app/a/./b?x=1#top").unwrap(), "/app/a/b?x=1#top");
        assert_eq!(check("/app/a/../b").unwrap(), "/app/b");
    }

    #[test]
    fn segment_boundary_is_respected() {
        assert!(check("/application").is_err());
        assert!(check("/apple/x").is_err());
    }

    #[test]
    fn traversal_out_of_prefix_is_rejected() {
        for location in [
            "/app/../admin",
            "/app/%2e%2e/admin",
            "/app/%252e%252e/admin",
            "/app/..%2Fadmin",
            "/../etc/passwd",
        ] {
            let err = check(location).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AccessControl, "{location}");
        }
    }

    #[test]
    fn protocol_relative_and_backslash_are_rejected() {
        for location in [
            "//evil.example/app/",
            "/%2Fevil.example/app/",
            "/app\\..\\admin",
            "/app/%5C..%5Cadmin",
            "\\\\evil.example",
        ] {
            assert!(check(location).is_err(), "{location}");
        }
    }

    #[test]
    fn control_characters_and_whitespace_are_rejected() {
        for location in ["", "/app/\r\nSet-Cookie: x=1", "/app/%0d%0a", " /app/", "/app/a b"] {
            assert!(check(location).is_err(), "{location:?}");
        }
    }

    #[test]
    fn absolute_urls_must_match_origin_and_path() {
        assert!(check("https://partner.example/callback?code=1").is_ok());
        assert!(check("https://PARTNER.example:443/callback/step").is_ok());
        assert!(check("http://partner.example/callback").is_err());
        assert!(check("https://partner.example:8443/callback").is_err());
        assert!(check("https://partner.example/other").is_err());
        assert!(check("https://evil.example/callback").is_err());
        assert!(check("https://partner.example.evil.example/callback").is_err());
    }

    #[test]
    fn userinfo_and_foreign_schemes_are_rejected() {
        assert!(check("https://user@partner.example/callback").is_err());
        assert!(check("https://partner.example@evil.example/callback").is_err());
        assert!(check("javascript:alert(1)").is_err());
        assert!(check("data:text/html,hi").is_err());
    }

    #[test]
    fn unknown_context_is_access_control() {
        let err = guard()
            .check_redirect("nope", &Tainted::new("/app/ok".to_string()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AccessControl);
    }

    #[test]
    fn rejected_redirect_leaves_response_untouched() {
        let request = RequestAdapter::new(HttpMethod::Get, "/");
        let mut response = RecordingResponse::new();
        {
            let mut ctx = Ctx::new("req-1", &request, &mut response);
            let err = guard()
                .safe_redirect(&mut ctx, "app", Tainted::new("http://evil.example/".to_string()))
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AccessControl);
        }
        assert!(response.is_untouched());
    }

    #[test]
    fn forward_requires_namespace_and_allow_list() {
        let request = RequestAdapter::new(HttpMethod::Get, "/");
        let mut response = RecordingResponse::new();
        {
            let mut ctx = Ctx::new("req-1", &request, &mut response);
            let g = guard();

            assert!(g
                .safe_forward(&mut ctx, "views", Tainted::new("/public/page".to_string()))
                .is_err());
            assert!(g
                .safe_forward(&mut ctx, "views", Tainted::new("/WEB-INF/secrets/db".to_string()))
                .is_err());
            assert!(g
                .safe_forward(&mut ctx, "views", Tainted::new("https://partner.example/".to_string()))
                .is_err());
            g.safe_forward(&mut ctx, "views", Tainted::new("/WEB-INF/views/home".to_string()))
                .unwrap();
        }
        assert_eq!(response.forwarded_to(), Some("/WEB-INF/views/home"));
        assert!(response.redirected_to().is_none());
    }

    #[test]
    fn invalid_allow_list_entry_fails_construction() {
        let mut config = RedirectConfig::default();
        config
            .contexts
            .insert("bad".to_string(), vec!["ftp://files.example/".to_string()]);

        assert_eq!(
            RedirectGuard::new(&config).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn normalize_path_cases() {
        assert_eq!(normalize_path("/").as_deref(), Some("/"));
        assert_eq!(normalize_path("/a/b/../c/").as_deref(), Some("/a/c/"));
        assert_eq!(normalize_path("/a/.").as_deref(), Some("/a/"));
        assert_eq!(normalize_path("/a/.."), Some("/".to_string()));
        assert_eq!(normalize_path("/.."), None);
        assert_eq!(normalize_path("relative"), None);
        assert_eq!(normalize_path("/a//b").as_deref(), Some("/a/b"));
        assert_eq!(normalize_path("/.//evil.example/").as_deref(), Some("/evil.example/"));
    }

    #[test]
    fn root_allow_list_never_yields_protocol_relative() {
        let mut config = RedirectConfig::default();
        config
            .contexts
            .insert("site".to_string(), vec!["/".to_string()]);
        let guard = RedirectGuard::new(&config).unwrap();

        for location in ["/.//evil.example/", "/x/..//evil.example/", "/./%2F/evil.example"] {
            let verified = guard
                .check_redirect("site", &Tainted::new(location.to_string()))
                .map(Verified::into_inner);
            if let Ok(target) = verified {
                assert!(!target.starts_with("//"), "{location} -> {target}");
            }
        }
        assert_eq!(
            guard
                .check_redirect("site", &Tainted::new("/.//evil.example/".to_string()))
                .map(Verified::into_inner)
                .unwrap(),
            "/evil.example/"
        );
    }

    #[test]
    fn decode_is_bounded() {
        assert_eq!(decode_fully("/a%2541").as_deref(), Some("/aA"));
        assert_eq!(decode_fully("/%25252525252e"), None);
    }
}
