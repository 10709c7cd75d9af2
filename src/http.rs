use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// HTTP method of the bound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// HTTP GET method
    Get,
    /// HTTP HEAD method
    Head,
    /// HTTP POST method
    Post,
    /// HTTP PUT method
    Put,
    /// HTTP DELETE method
    Delete,
    /// HTTP PATCH method
    Patch,
    /// HTTP OPTIONS method
    Options,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Head => write!(f, "HEAD"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Put => write!(f, "PUT"),
            HttpMethod::Delete => write!(f, "DELETE"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Options => write!(f, "OPTIONS"),
        }
    }
}

impl FromStr for HttpMethod {
    type Err = Error;

    /// Parses a method token. Methods are case-sensitive (RFC 9110 §9.1).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "DELETE" => Ok(HttpMethod::Delete),
            "PATCH" => Ok(HttpMethod::Patch),
            "OPTIONS" => Ok(HttpMethod::Options),
            _ => Err(Error::validation("unsupported http method")),
        }
    }
}

/// A header ready to be written: name and value, both validated.
///
/// Only obtainable as `Verified<HeaderField>` from the
/// [`SafeEmitter`](crate::SafeEmitter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

pub(crate) const SET_COOKIE: &str = "Set-Cookie";
pub(crate) const CACHE_CONTROL: &str = "Cache-Control";
pub(crate) const EXPIRES: &str = "Expires";
pub(crate) const CONTENT_TYPE: &str = "Content-Type";
