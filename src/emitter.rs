//! Injection-safe header and cookie emission.
//!
//! Every entry point validates all of its fields before touching the
//! response. A rejected write leaves the response exactly as it was.

use crate::config::{CookieConfig, HeaderConfig, SameSite};
use crate::context::Ctx;
use crate::error::{Error, Result};
use crate::http::{HeaderField, CACHE_CONTROL, CONTENT_TYPE, EXPIRES, SET_COOKIE};
use crate::sanitizer::{FieldRule, FieldSanitizer, Sanitizer};
use crate::{Tainted, Verified};

/// A cookie to be written through [`SafeEmitter::add_cookie_with`].
///
/// `HttpOnly` is always added. `Secure` is added when the exchange is TLS.
///
/// # Examples
///
/// ```
/// use http_guard::Cookie;
///
/// let cookie = Cookie::new("prefs", "compact").max_age(3600).path("/");
/// assert_eq!(cookie.name(), "prefs");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    max_age: Option<i64>,
    domain: Option<String>,
    path: Option<String>,
}

impl Cookie {
    /// A session cookie with no attributes.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            max_age: None,
            domain: None,
            path: None,
        }
    }

    /// Lifetime in seconds. Zero or negative expires the cookie immediately.
    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Domain attribute.
    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Path attribute.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Cookie name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Writes headers and cookies after validating them.
///
/// # Security Properties
///
/// - CR and LF can never reach a header name or value (response splitting).
/// - Header names are RFC 7230 tokens.
/// - Cookie values exclude `;`, `,`, whitespace, quotes and backslash.
/// - Every cookie is `HttpOnly`; TLS exchanges also get `Secure`.
/// - Multi-header operations validate all headers before writing any.
#[derive(Debug, Clone)]
pub struct SafeEmitter {
    header_name: FieldSanitizer,
    header_value: FieldSanitizer,
    cookie_name: FieldSanitizer,
    cookie_value: FieldSanitizer,
    cookie_attribute: FieldSanitizer,
    cookie_header: FieldSanitizer,
    same_site: SameSite,
    content_type: String,
}

impl SafeEmitter {
    /// Builds an emitter from the header and cookie configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if any configured length limit is 0.
    pub fn new(headers: &HeaderConfig, cookies: &CookieConfig) -> Result<Self> {
        if headers.max_name_len == 0 || headers.max_value_len == 0 || cookies.max_cookie_len == 0 {
            return Err(Error::validation("header and cookie length limits must be positive"));
        }
        let forbidden: Vec<char> = headers.forbidden_value_chars.chars().collect();
        Ok(Self {
            header_name: FieldSanitizer::new(FieldRule::HeaderName, headers.max_name_len),
            header_value: FieldSanitizer::new(FieldRule::HeaderValue, headers.max_value_len)
                .forbidding(forbidden.iter().copied()),
            cookie_name: FieldSanitizer::new(FieldRule::CookieName, headers.max_name_len),
            cookie_value: FieldSanitizer::new(FieldRule::CookieValue, cookies.max_cookie_len),
            cookie_attribute: FieldSanitizer::new(FieldRule::CookieAttribute, headers.max_value_len),
            cookie_header: FieldSanitizer::new(FieldRule::HeaderValue, cookies.max_cookie_len)
                .forbidding(forbidden),
            same_site: cookies.same_site,
            content_type: headers.content_type.clone(),
        })
    }

    /// Adds a cookie from positional parts.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if any part is unsafe or the rendered
    /// `Set-Cookie` header is too long.
    pub fn add_cookie(
        &self,
        ctx: &mut Ctx<'_>,
        name: &str,
        value: &str,
        max_age: Option<i64>,
        domain: Option<&str>,
        path: Option<&str>,
    ) -> Result<()> {
        let mut cookie = Cookie::new(name, value);
        cookie.max_age = max_age;
        cookie.domain = domain.map(str::to_string);
        cookie.path = path.map(str::to_string);
        self.add_cookie_with(ctx, cookie)
    }

    /// Adds a cookie.
    ///
    /// # Errors
    ///
    /// See [`add_cookie`](Self::add_cookie).
    pub fn add_cookie_with(&self, ctx: &mut Ctx<'_>, cookie: Cookie) -> Result<()> {
        let header = self.render_cookie(cookie, ctx.is_secure())?;
        ctx.current_response().add_header(header);
        Ok(())
    }

    /// Appends a header, keeping any existing values.
    pub fn add_header(&self, ctx: &mut Ctx<'_>, name: &str, value: &str) -> Result<()> {
        let header = self.verify_header(name, value)?;
        ctx.current_response().add_header(header);
        Ok(())
    }

    /// Replaces any existing values of a header.
    pub fn set_header(&self, ctx: &mut Ctx<'_>, name: &str, value: &str) -> Result<()> {
        let header = self.verify_header(name, value)?;
        ctx.current_response().set_header(header);
        Ok(())
    }

    /// Marks the response as uncacheable by browsers and proxies.
    pub fn set_no_cache_headers(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let no_store = self.verify_header(CACHE_CONTROL, "no-store")?;
        let no_cache = self.verify_header(CACHE_CONTROL, "no-cache")?;
        let revalidate = self.verify_header(CACHE_CONTROL, "must-revalidate")?;
        let expires = self.verify_header(EXPIRES, "-1")?;

        let response = ctx.current_response();
        response.set_header(no_store);
        response.add_header(no_cache);
        response.add_header(revalidate);
        response.set_header(expires);
        Ok(())
    }

    /// Sets the configured content type, which always names a charset.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error if the configured type has no charset.
    pub fn set_safe_content_type(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        if !self.content_type.to_ascii_lowercase().contains("charset=") {
            return Err(Error::validation("content type must name a charset"));
        }
        let header = self.verify_header(CONTENT_TYPE, &self.content_type)?;
        ctx.current_response().set_header(header);
        Ok(())
    }

    /// Expires the named cookie in the browser.
    pub fn kill_cookie(&self, ctx: &mut Ctx<'_>, name: &str) -> Result<()> {
        let header = self.render_cookie(Self::expired(name), ctx.is_secure())?;
        ctx.current_response().add_header(header);
        Ok(())
    }

    /// Expires every cookie the browser sent with this request.
    ///
    /// Cookies set earlier in this response are not affected.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error, and writes nothing, if any presented
    /// cookie name is not a valid token.
    pub fn kill_all_cookies(&self, ctx: &mut Ctx<'_>) -> Result<()> {
        let secure = ctx.is_secure();
        let mut names: Vec<String> = Vec::new();
        for name in ctx.cookie_names() {
            let name = self.cookie_name.sanitize(name)?.into_inner();
            if !names.contains(&name) {
                names.push(name);
            }
        }

        let headers = names
            .iter()
            .map(|name| self.render_cookie(Self::expired(name), secure))
            .collect::<Result<Vec<_>>>()?;

        let count = headers.len();
        let response = ctx.current_response();
        for header in headers {
            response.add_header(header);
        }
        ctx.log().debug(format_args!("expired {count} cookies"));
        Ok(())
    }

    fn expired(name: &str) -> Cookie {
        Cookie::new(name, "").max_age(0).path("/")
    }

    fn verify_header(&self, name: &str, value: &str) -> Result<Verified<HeaderField>> {
        let name = self.header_name.sanitize(Tainted::new(name.to_string()))?;
        let value = self.header_value.sanitize(Tainted::new(value.to_string()))?;
        Ok(Verified::new_unchecked(HeaderField {
            name: name.into_inner(),
            value: value.into_inner(),
        }))
    }

    fn render_cookie(&self, cookie: Cookie, secure: bool) -> Result<Verified<HeaderField>> {
        let name = self.cookie_name.sanitize(Tainted::new(cookie.name))?;
        let value = self.cookie_value.sanitize(Tainted::new(cookie.value))?;

        let mut rendered = format!("{}={}", name.as_ref(), value.as_ref());
        if let Some(max_age) = cookie.max_age {
            rendered.push_str(&format!("; Max-Age={}", max_age.max(0)));
        }
        if let Some(domain) = cookie.domain {
            let domain = self.cookie_attribute.sanitize(Tainted::new(domain))?;
            rendered.push_str(&format!("; Domain={}", domain.as_ref()));
        }
        if let Some(path) = cookie.path {
            let path = self.cookie_attribute.sanitize(Tainted::new(path))?;
            rendered.push_str(&format!("; Path={}", path.as_ref()));
        }
        if secure {
            rendered.push_str("; Secure");
        }
        rendered.push_str("; HttpOnly");
        rendered.push_str(&format!("; SameSite={}", self.same_site.as_str()));

        let value = self.cookie_header.sanitize(Tainted::new(rendered))?;
        Ok(Verified::new_unchecked(HeaderField {
            name: SET_COOKIE.to_string(),
            value: value.into_inner(),
        }))
    }
}
