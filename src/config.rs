//! Deployment configuration.
//!
//! All sections derive `Deserialize` with `#[serde(default)]`, so a TOML file
//! only needs to name what it changes:
//!
//! ```
//! use http_guard::SecurityConfig;
//!
//! let config = SecurityConfig::from_toml_str(r#"
//!     [redirects.contexts]
//!     app = ["/app/", "https://partner.example/callback"]
//!
//!     [uploads]
//!     max_file_size = 1048576
//!     allowed_content_types = ["image/png"]
//!     allowed_extensions = ["png"]
//! "#).unwrap();
//!
//! assert_eq!(config.csrf.parameter_name, "csrf_token");
//! assert_eq!(config.uploads.max_file_size, 1_048_576);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// CSRF token settings.
    pub csrf: CsrfConfig,
    /// Cookie emission settings.
    pub cookies: CookieConfig,
    /// Header emission settings.
    pub headers: HeaderConfig,
    /// Redirect and forward allow-lists.
    pub redirects: RedirectConfig,
    /// Upload limits.
    pub uploads: UploadConfig,
    /// Request logging settings.
    pub logging: LoggingConfig,
}

/// CSRF token settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Request parameter that carries the token.
    pub parameter_name: String,
    /// Raw token size in bytes before encoding.
    pub token_bytes: usize,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            parameter_name: "csrf_token".to_string(),
            token_bytes: 32,
        }
    }
}

/// SameSite cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum SameSite {
    /// Only sent in a first-party context.
    Strict,
    /// Sent with top-level navigations.
    #[default]
    Lax,
    /// Sent in all contexts. Browsers require `Secure` with this.
    None,
}

impl SameSite {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Cookie emission settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Cookie holding encrypted state written by the state codec.
    pub state_cookie_name: String,
    /// Cookie holding the session identifier.
    pub session_cookie_name: String,
    /// SameSite attribute added to every cookie.
    pub same_site: SameSite,
    /// Upper bound for a complete `Set-Cookie` header value.
    pub max_cookie_len: usize,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            state_cookie_name: "state".to_string(),
            session_cookie_name: "SESSIONID".to_string(),
            same_site: SameSite::Lax,
            max_cookie_len: 4096,
        }
    }
}

/// Header emission settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Maximum header name length.
    pub max_name_len: usize,
    /// Maximum header value length.
    pub max_value_len: usize,
    /// Characters rejected in header values on top of the base rule.
    pub forbidden_value_chars: String,
    /// Content type set by `set_safe_content_type`. Must name a charset.
    pub content_type: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            max_name_len: 64,
            max_value_len: 4096,
            forbidden_value_chars: String::new(),
            content_type: "text/html; charset=UTF-8".to_string(),
        }
    }
}

/// Redirect and forward allow-lists.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedirectConfig {
    /// Allowed destinations per context. Entries are path prefixes
    /// (`/app/`) or absolute prefixes (`https://host/path`).
    pub contexts: HashMap<String, Vec<String>>,
    /// Namespace that is only reachable through a server-side forward.
    pub forward_namespace: String,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            contexts: HashMap::new(),
            forward_namespace: "/WEB-INF/".to_string(),
        }
    }
}

/// Upload limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted file in bytes.
    pub max_file_size: u64,
    /// Most parts accepted in a single request.
    pub max_files: usize,
    /// Accepted content types, compared case-insensitively without parameters.
    pub allowed_content_types: Vec<String>,
    /// Accepted file extensions, compared case-insensitively.
    pub allowed_extensions: Vec<String>,
    /// Longest accepted file name.
    pub max_filename_len: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_files: 16,
            allowed_content_types: vec![
                "image/png".to_string(),
                "image/jpeg".to_string(),
                "application/pdf".to_string(),
                "text/plain".to_string(),
            ],
            allowed_extensions: vec![
                "png".to_string(),
                "jpg".to_string(),
                "jpeg".to_string(),
                "pdf".to_string(),
                "txt".to_string(),
            ],
            max_filename_len: 255,
        }
    }
}

/// Request logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Replacement text for obfuscated parameter values.
    pub mask: String,
    /// Parameters obfuscated by the default policy.
    pub sensitive_parameters: BTreeSet<String>,
    /// Longest value written for a single parameter.
    pub max_value_len: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            mask: "********".to_string(),
            sensitive_parameters: ["password", "passwd", "secret", "token", "ssn"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_value_len: 256,
        }
    }
}

impl SecurityConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the document does not parse or fails
    /// [`validate`](Self::validate).
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: SecurityConfig = toml::from_str(source)
            .map_err(|e| Error::validation(format!("invalid configuration: {}", e.message())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an i/o error if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks semantic constraints serde cannot express.
    ///
    /// Every problem is collected before failing so an operator sees the
    /// whole list at once.
    ///
    /// # Errors
    ///
    /// Returns a validation error listing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.csrf.token_bytes < 16 {
            problems.push("csrf.token_bytes must be at least 16 (128 bits)".to_string());
        }
        if self.csrf.parameter_name.is_empty()
            || !self
                .csrf
                .parameter_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            problems.push("csrf.parameter_name must be non-empty [A-Za-z0-9_-]".to_string());
        }
        for (field, name) in [
            ("cookies.state_cookie_name", &self.cookies.state_cookie_name),
            ("cookies.session_cookie_name", &self.cookies.session_cookie_name),
        ] {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
                problems.push(format!("{field} must be non-empty [A-Za-z0-9_-]"));
            }
        }
        if self.cookies.max_cookie_len == 0 {
            problems.push("cookies.max_cookie_len must be positive".to_string());
        }
        if self.headers.max_name_len == 0 || self.headers.max_value_len == 0 {
            problems.push("headers length limits must be positive".to_string());
        }
        if !self.headers.content_type.to_ascii_lowercase().contains("charset=") {
            problems.push("headers.content_type must name a charset".to_string());
        }
        if !self.redirects.forward_namespace.starts_with('/')
            || !self.redirects.forward_namespace.ends_with('/')
            || self.redirects.forward_namespace == "/"
        {
            problems.push("redirects.forward_namespace must be a directory like /WEB-INF/".to_string());
        }
        for (context, entries) in &self.redirects.contexts {
            if entries.is_empty() {
                problems.push(format!("redirects.contexts.{context} is empty"));
            }
            for entry in entries {
                if !(entry.starts_with('/') && !entry.starts_with("//"))
                    && !entry.starts_with("https://")
                    && !entry.starts_with("http://")
                {
                    problems.push(format!(
                        "redirects.contexts.{context}: entries must be /paths or http(s) URLs"
                    ));
                }
            }
        }
        if self.uploads.max_file_size == 0 || self.uploads.max_files == 0 {
            problems.push("uploads limits must be positive".to_string());
        }
        if self.uploads.max_filename_len == 0 || self.uploads.max_filename_len > 255 {
            problems.push("uploads.max_filename_len must be within 1..=255".to_string());
        }
        if self.logging.mask.is_empty() {
            problems.push("logging.mask must not be empty".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(format!(
                "invalid configuration: {}",
                problems.join("; ")
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn defaults_are_valid() {
        SecurityConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = SecurityConfig::from_toml_str(
            r#"
            [csrf]
            parameter_name = "ctoken"

            [cookies]
            same_site = "Strict"
            "#,
        )
        .unwrap();

        assert_eq!(config.csrf.parameter_name, "ctoken");
        assert_eq!(config.csrf.token_bytes, 32);
        assert_eq!(config.cookies.same_site, SameSite::Strict);
        assert_eq!(config.cookies.state_cookie_name, "state");
    }

    #[test]
    fn validation_collects_every_problem() {
        let mut config = SecurityConfig::default();
        config.csrf.token_bytes = 8;
        config.headers.content_type = "text/html".to_string();
        config.redirects.forward_namespace = "/".to_string();

        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.message().contains("token_bytes"));
        assert!(err.message().contains("charset"));
        assert!(err.message().contains("forward_namespace"));
    }

    #[test]
    fn protocol_relative_allow_list_entry_rejected() {
        let result = SecurityConfig::from_toml_str(
            r#"
            [redirects.contexts]
            app = ["//evil.example/"]
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn malformed_toml_is_a_validation_error() {
        let err = SecurityConfig::from_toml_str("[csrf\nparameter_name=").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = SecurityConfig::load(Path::new("/nonexistent/http-guard.toml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
