//! Request logging with parameter obfuscation.
//!
//! [`RequestLogger`] renders one line per request:
//!
//! ```text
//! <remote> <METHOD> <path> [k1=v1, k2=v2]
//! ```
//!
//! The query string is left off the path; its parameters appear in the
//! bracketed list with masking applied. Parameters are sorted by name. Every rendered field has control
//! characters replaced before formatting, so a request cannot forge extra
//! log lines. The CSRF token parameter is masked under every policy.

use std::collections::BTreeSet;
use std::fmt;

use parking_lot::Mutex;

use crate::config::{CsrfConfig, LoggingConfig};
use crate::context::Ctx;
use crate::sanitizer::neutralize_for_log;
use crate::Verified;

/// Request-scoped `tracing` logger.
///
/// Obtained from [`Ctx::log`]. All messages carry the request ID as a
/// structured field. [`Secret`](crate::Secret) values print as
/// `[REDACTED]` through their `Debug` and `Display` implementations.
#[derive(Debug)]
pub struct RequestLog<'a> {
    request_id: &'a str,
}

impl<'a> RequestLog<'a> {
    pub(crate) fn new(request_id: &'a str) -> Self {
        Self { request_id }
    }

    /// Returns the request ID associated with this logger.
    pub fn request_id(&self) -> &str {
        self.request_id
    }

    /// Logs an info-level message with request ID.
    pub fn info(&self, args: fmt::Arguments<'_>) {
        tracing::info!(request_id = %self.request_id, "{}", args);
    }

    /// Logs a security event.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        tracing::warn!(request_id = %self.request_id, "{}", args);
    }

    /// Logs a debug-level message with request ID.
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(request_id = %self.request_id, "{}", args);
    }
}

/// Destination for rendered request lines.
///
/// Implementations only ever receive lines the logger has already
/// neutralized.
pub trait LogSink: Send + Sync {
    /// Records one line for the given request.
    fn write(&self, request_id: &str, line: &Verified<String>);
}

/// Forwards request lines to `tracing` at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn write(&self, request_id: &str, line: &Verified<String>) {
        tracing::info!(request_id = %request_id, target_kind = "http_request", "{}", line.as_ref());
    }
}

/// Collects lines in memory.
///
/// # Examples
///
/// ```
/// use http_guard::MemorySink;
///
/// let sink = MemorySink::new();
/// assert!(sink.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded lines.
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Runs `f` over the recorded lines without cloning them.
    pub fn with_lines<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[String]) -> R,
    {
        f(&self.lines.lock())
    }

    /// Copies out the recorded lines.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }
}

impl LogSink for MemorySink {
    fn write(&self, _request_id: &str, line: &Verified<String>) {
        self.lines.lock().push(line.as_ref().clone());
    }
}

/// Which parameter values appear in a request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterPolicy {
    /// Every value is written (the CSRF token is still masked).
    LogAll,
    /// Values of the named parameters are replaced by the mask.
    Obfuscate(BTreeSet<String>),
}

/// Renders and writes one line per request.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    mask: String,
    max_value_len: usize,
    default_policy: ParameterPolicy,
    csrf_parameter: String,
}

impl RequestLogger {
    /// Builds a logger whose default policy obfuscates the configured
    /// sensitive parameters.
    pub fn new(logging: &LoggingConfig, csrf: &CsrfConfig) -> Self {
        Self {
            mask: logging.mask.clone(),
            max_value_len: logging.max_value_len,
            default_policy: ParameterPolicy::Obfuscate(logging.sensitive_parameters.clone()),
            csrf_parameter: csrf.parameter_name.clone(),
        }
    }

    /// Logs the bound request with the default policy.
    pub fn log_request(&self, ctx: &Ctx<'_>, sink: &dyn LogSink) {
        self.log_request_with(ctx, sink, &self.default_policy);
    }

    /// Logs the bound request with an explicit policy.
    pub fn log_request_with(&self, ctx: &Ctx<'_>, sink: &dyn LogSink, policy: &ParameterPolicy) {
        let line = self.render(ctx, policy);
        sink.write(ctx.request_id(), &Verified::new_unchecked(line));
    }

    fn render(&self, ctx: &Ctx<'_>, policy: &ParameterPolicy) -> String {
        let mut params = ctx.request_parameters();
        params.sort_by(|a, b| a.0.cmp(b.0));

        let rendered: Vec<String> = params
            .into_iter()
            .map(|(name, value)| {
                let shown = if self.is_masked(name, policy) {
                    self.mask.clone()
                } else {
                    neutralize_for_log(value, self.max_value_len)
                };
                format!("{}={}", neutralize_for_log(name, self.max_value_len), shown)
            })
            .collect();

        let url = ctx.raw_url();
        let path = url.find(['?', '#']).map_or(url, |end| &url[..end]);

        format!(
            "{} {} {} [{}]",
            neutralize_for_log(ctx.remote_addr(), self.max_value_len),
            ctx.method(),
            neutralize_for_log(path, self.max_value_len),
            rendered.join(", ")
        )
    }

    fn is_masked(&self, name: &str, policy: &ParameterPolicy) -> bool {
        if name == self.csrf_parameter {
            return true;
        }
        match policy {
            ParameterPolicy::LogAll => false,
            ParameterPolicy::Obfuscate(names) => names.contains(name),
        }
    }
}
