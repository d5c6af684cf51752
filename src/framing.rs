//! The body framing selector: from a header set and the peer's HTTP
//! version, choose among chunked, content-length, or close-delimited
//! body framing.
//!
//! Represented as a tagged enum rather than a set of booleans/options --
//! this makes the match in `write_chunk`/the body reader exhaustive and
//! removes any "unknown body type" branch.

use crate::enums::{Method, Version};
use crate::error::ProtocolError;
use crate::headers::{self, HeaderList};

/// How the end of a message body is determined on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Chunked,
    Length(u64),
    Close,
}

/// Decide `close_when_done` from the `Connection` header and the peer's
/// version: for a 1.0 peer, close unless `keep-alive` is present; for a
/// 1.1 peer, close iff `close` is present.
pub fn close_when_done(headers: &HeaderList, peer_version: Version) -> bool {
    let connection = headers.get_all("connection");
    let mut keep_alive = false;
    let mut close = false;
    for value in connection {
        if headers::is_keep_alive(value) {
            keep_alive = true;
        }
        if headers::is_close(value) {
            close = true;
        }
    }
    match peer_version {
        Version::Http10 => !keep_alive,
        Version::Http11 => close,
    }
}

/// Outcome of choosing outbound framing: the framing itself plus
/// whether the connection must close once this message is done.
#[derive(Debug, Clone, Copy)]
pub struct OutboundFraming {
    pub framing: Option<BodyFraming>,
    pub close_when_done: bool,
}

/// Select outbound framing for `write_headers`.
///
/// `is_server` distinguishes the "client has no framing hint" invariant
/// violation (client-only) from the server's "default to close" rule.
pub fn select_outbound(
    headers: &HeaderList,
    method: &Method,
    peer_version: Version,
    end_stream: bool,
    is_server: bool,
) -> Result<OutboundFraming, ProtocolError> {
    if method.is_connect() {
        return Ok(OutboundFraming { framing: None, close_when_done: true });
    }

    let mut close = close_when_done(headers, peer_version);

    if end_stream {
        return Ok(OutboundFraming { framing: None, close_when_done: close });
    }

    if let Some(te) = headers.get("transfer-encoding") {
        if headers::is_chunked(te) {
            return Ok(OutboundFraming { framing: Some(BodyFraming::Chunked), close_when_done: close });
        }
    }

    if let Some(cl) = headers.get("content-length") {
        let len = parse_content_length(cl)?;
        return Ok(OutboundFraming { framing: Some(BodyFraming::Length(len)), close_when_done: close });
    }

    if close {
        return Ok(OutboundFraming { framing: Some(BodyFraming::Close), close_when_done: close });
    }

    if is_server {
        close = true;
        tracing::debug!("server response has no framing hint, defaulting to close-delimited");
        return Ok(OutboundFraming { framing: Some(BodyFraming::Close), close_when_done: close });
    }

    Err(ProtocolError::NoFramingHint)
}

/// Parse a `Content-Length` value: must match `^\d+$` and fit a
/// reasonable integer (capped at 12 digits so a pathological value
/// can't be used to stall the reader forever on overflow-adjacent
/// input).
pub fn parse_content_length(value: &[u8]) -> Result<u64, ProtocolError> {
    let s = std::str::from_utf8(value)
        .map_err(|_| ProtocolError::NonNumericContentLength(String::from_utf8_lossy(value).into_owned()))?;
    if s.is_empty() || s.len() > 12 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::NonNumericContentLength(s.to_string()));
    }
    s.parse::<u64>().map_err(|_| ProtocolError::NonNumericContentLength(s.to_string()))
}

/// Select inbound framing for the body reader.
///
/// Returns `None` when no body is expected at all (callers check that
/// separately via `no_body_expected`); this function is only consulted
/// once a body is known to exist.
pub fn select_inbound(headers: &HeaderList) -> Result<BodyFraming, ProtocolError> {
    if let Some(te) = headers.get("transfer-encoding") {
        if headers::is_chunked(te) {
            return Ok(BodyFraming::Chunked);
        }
        return Err(ProtocolError::UnknownTransferEncoding(
            String::from_utf8_lossy(te).into_owned(),
        ));
    }
    if let Some(cl) = headers.get("content-length") {
        return Ok(BodyFraming::Length(parse_content_length(cl)?));
    }
    Ok(BodyFraming::Close)
}

/// No-body detection.
///
/// Client side: no body iff the request method was `HEAD`.
/// Server side: no body iff the method is `GET`/`HEAD` and none of
/// `content-length`, `content-type`, `transfer-encoding` is present.
pub fn no_body_expected(is_server: bool, method: &Method, headers: &HeaderList) -> bool {
    if !is_server {
        return method.is_head();
    }
    (method.is_get() || method.is_head())
        && !headers.contains("content-length")
        && !headers.contains("content-type")
        && !headers.contains("transfer-encoding")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{AUTHORITY, METHOD};

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderList {
        let mut h = HeaderList::new();
        for (n, v) in pairs {
            h.push(n, v.as_bytes().to_vec());
        }
        h
    }

    #[test]
    fn http10_closes_unless_keep_alive() {
        let h = headers_with(&[]);
        assert!(close_when_done(&h, Version::Http10));
        let h = headers_with(&[("Connection", "keep-alive")]);
        assert!(!close_when_done(&h, Version::Http10));
    }

    #[test]
    fn http11_keeps_alive_unless_close() {
        let h = headers_with(&[]);
        assert!(!close_when_done(&h, Version::Http11));
        let h = headers_with(&[("Connection", "close")]);
        assert!(close_when_done(&h, Version::Http11));
    }

    #[test]
    fn connect_forces_close_framing() {
        let h = headers_with(&[]);
        let out = select_outbound(&h, &Method::new("CONNECT"), Version::Http11, false, false).unwrap();
        assert_eq!(out.framing, None);
        assert!(out.close_when_done);
    }

    #[test]
    fn server_defaults_to_close_when_no_hint() {
        let h = headers_with(&[]);
        let out = select_outbound(&h, &Method::new("GET"), Version::Http11, false, true).unwrap();
        assert_eq!(out.framing, Some(BodyFraming::Close));
        assert!(out.close_when_done);
    }

    #[test]
    fn client_with_no_hint_is_invariant_violation() {
        let h = headers_with(&[]);
        let err = select_outbound(&h, &Method::new("POST"), Version::Http11, false, false).unwrap_err();
        assert!(matches!(err, ProtocolError::NoFramingHint));
    }

    #[test]
    fn chunked_takes_priority_over_length() {
        let h = headers_with(&[("Transfer-Encoding", "chunked"), ("Content-Length", "5")]);
        let out = select_outbound(&h, &Method::new("POST"), Version::Http11, false, false).unwrap();
        assert_eq!(out.framing, Some(BodyFraming::Chunked));
    }

    #[test]
    fn get_headers_no_body_for_head_client() {
        let h = headers_with(&[]);
        assert!(no_body_expected(false, &Method::new("HEAD"), &h));
    }

    #[test]
    fn get_headers_server_infers_no_body() {
        let h = headers_with(&[]);
        assert!(no_body_expected(true, &Method::new("GET"), &h));
        let h = headers_with(&[("Content-Length", "5")]);
        assert!(!no_body_expected(true, &Method::new("GET"), &h));
        let h = headers_with(&[(AUTHORITY, "ignored")]);
        assert!(no_body_expected(true, &Method::new(METHOD), &h));
    }

    #[test]
    fn content_length_rejects_non_numeric() {
        assert!(parse_content_length(b"5").is_ok());
        assert!(parse_content_length(b"5x").is_err());
        assert!(parse_content_length(b"").is_err());
        assert!(parse_content_length(b"1234567890123").is_err());
    }
}
