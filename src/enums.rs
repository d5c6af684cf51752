//! Small value types shared across the crate.

use std::fmt;

/// HTTP protocol version of a single message.
///
/// Only 1.0 and 1.1 are modeled -- HTTP/2 is an explicit non-goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    /// Default keep-alive behavior for this version in the absence of
    /// an explicit `Connection` header: 1.0 connections close unless
    /// told to keep alive, 1.1 connections stay open unless told to
    /// close.
    pub fn closes_by_default(self) -> bool {
        matches!(self, Version::Http10)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Version::Http10 => write!(f, "HTTP/1.0"),
            Version::Http11 => write!(f, "HTTP/1.1"),
        }
    }
}

/// Role a `Stream` plays in an exchange. Immutable for the stream's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// The request method of the current exchange.
///
/// Stored as an owned string because it is read off the wire (server
/// side) or supplied by the caller (client side) rather than drawn from
/// a fixed set, but the handful of methods the state machine cares
/// about get dedicated predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method(pub(crate) Box<str>);

impl Method {
    pub fn new(s: impl Into<Box<str>>) -> Method {
        Method(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_head(&self) -> bool {
        self.0.eq_ignore_ascii_case("HEAD")
    }

    pub fn is_get(&self) -> bool {
        self.0.eq_ignore_ascii_case("GET")
    }

    pub fn is_connect(&self) -> bool {
        self.0.eq_ignore_ascii_case("CONNECT")
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
