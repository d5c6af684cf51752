//! The external interfaces: everything the stream state machine calls
//! to actually move bytes, and nothing else. The stream never touches a
//! socket or parses a byte itself -- it composes these operations.
//!
//! `Transport` is the trait; `IoTransport<T>` is the one concrete
//! implementation in this crate, built on `httparse` for request/status
//! line and header-block tokenizing, and `bytes` for owned chunk
//! payloads, over any `T: AsyncRead + AsyncWrite + Unpin`.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time;

use crate::enums::{Method, Version};
use crate::error::StreamError;

/// Headers to allocate on the stack before falling back to a heap
/// vector for requests with an unusually large header count.
const MIN_HEADERS: usize = 16;
const MAX_HEADERS: usize = 1024;
const MAX_HEADER_BUF: usize = 64 * 1024;
const READ_CHUNK: usize = 8 * 1024;

/// The operations a `Stream` depends on to actually move bytes; this
/// trait simply gives each operation a Rust signature.
pub trait Transport: Send {
    /// Read `(method, target, version)` from the request line, and
    /// stage the header block so that `next_header` can drain it.
    fn read_request_line(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<(Method, String, Version), StreamError>> + Send;

    /// Read `(version, status, reason)` from the status line, and stage
    /// the header block so that `next_header` can drain it.
    fn read_status_line(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<(Version, u16, String), StreamError>> + Send;

    /// Return the next staged header field, or `None` at the headers
    /// terminator.
    fn next_header(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<(String, Vec<u8>)>, StreamError>> + Send;

    /// Read one chunk of a chunked body, or `None` at the zero-length
    /// terminator.
    fn read_body_chunk(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Option<Bytes>, StreamError>> + Send;

    /// Read up to `max_bytes` of a length- or close-delimited body.
    /// A negative value means "up to `|n|` bytes", used by
    /// close-delimited reads that have no declared total.
    fn read_body_by_length(
        &mut self,
        max_bytes: i64,
        timeout: Duration,
    ) -> impl Future<Output = Result<Bytes, StreamError>> + Send;

    /// Read trailer fields after a chunked body's zero-length chunk,
    /// returning them all at once (trailers are rare and small; unlike
    /// the main header block there is no pipelining concern).
    fn read_trailers(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<(String, Vec<u8>)>, StreamError>> + Send;

    fn write_request_line(
        &mut self,
        method: &str,
        target: &str,
        version: Version,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn write_status_line(
        &mut self,
        version: Version,
        status: u16,
        reason: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn write_header(
        &mut self,
        name: &str,
        value: &[u8],
        timeout: Duration,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn write_headers_done(&mut self, timeout: Duration) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn write_body_chunk(&mut self, data: &[u8], timeout: Duration) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn write_body_last_chunk(&mut self, timeout: Duration) -> impl Future<Output = Result<(), StreamError>> + Send;

    fn write_body_plain(&mut self, data: &[u8], timeout: Duration) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Shut down the write half of the socket.
    fn shutdown_write(&mut self) -> impl Future<Output = ()> + Send;

    /// True if the write half has already reached EOF (peer reset or a
    /// prior fatal error), used by `write_headers`'s `req_cond` wait.
    fn is_write_eof(&self) -> bool;

    /// True if the underlying socket is TLS-secured, used to set
    /// `:scheme`. There's no handshake here; this is a static fact
    /// about the transport, not a handshake operation.
    fn is_tls(&self) -> bool;
}

/// The reference `Transport` implementation: request/status-line and
/// header-block tokenizing via `httparse`, over any async duplex byte
/// stream.
pub struct IoTransport<T> {
    io: T,
    read_buf: BytesMut,
    staged_headers: VecDeque<(String, Vec<u8>)>,
    write_eof: bool,
    tls: bool,
}

impl<T> IoTransport<T> {
    pub fn new(io: T) -> IoTransport<T> {
        IoTransport {
            io,
            read_buf: BytesMut::new(),
            staged_headers: VecDeque::new(),
            write_eof: false,
            tls: false,
        }
    }

    /// Mark this transport as TLS-secured so `:scheme` comes out
    /// `https`. There is no handshake here (non-goal); the caller
    /// supplies the fact once it has done its own TLS setup.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

impl<T: tokio::io::AsyncRead + Unpin + Send> IoTransport<T> {
    async fn read_more(&mut self, deadline: time::Instant) -> Result<usize, StreamError> {
        if self.read_buf.len() > MAX_HEADER_BUF {
            return Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "header section too large",
            )));
        }
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        if remaining.is_zero() {
            return Err(StreamError::TimedOut);
        }
        let mut chunk = [0u8; READ_CHUNK];
        let n = time::timeout(remaining, self.io.read(&mut chunk))
            .await
            .map_err(|_| StreamError::TimedOut)?
            .map_err(map_io_error)?;
        if n == 0 {
            return Err(StreamError::Eof);
        }
        self.read_buf.extend_from_slice(&chunk[..n]);
        Ok(n)
    }

    /// Read until `terminator` appears, used for chunk-size lines and
    /// trailer fields, where `httparse`'s whole-head parser doesn't
    /// apply.
    async fn fill_until(&mut self, terminator: &[u8], timeout: Duration) -> Result<usize, StreamError> {
        let deadline = time::Instant::now() + timeout;
        loop {
            if let Some(pos) = find(&self.read_buf, terminator) {
                return Ok(pos + terminator.len());
            }
            self.read_more(deadline).await?;
        }
    }

    /// Parse a request line + header block with `httparse`, growing
    /// the header array on `TooManyHeaders`, and stage the parsed
    /// fields for `next_header` to drain one at a time.
    async fn parse_request_head(&mut self, timeout: Duration) -> Result<(Method, String, Version), StreamError> {
        let deadline = time::Instant::now() + timeout;
        loop {
            let mut small = [httparse::EMPTY_HEADER; MIN_HEADERS];
            let mut big;
            let mut req = httparse::Request::new(&mut small);
            let mut result = req.parse(&self.read_buf);
            if matches!(result, Err(httparse::Error::TooManyHeaders)) {
                big = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
                req = httparse::Request::new(&mut big);
                result = req.parse(&self.read_buf);
            }
            match result.map_err(parse_error)? {
                httparse::Status::Complete(consumed) => {
                    let method = Method::new(req.method.unwrap_or("").to_string());
                    let target = req.path.unwrap_or("").to_string();
                    let version = if req.version == Some(1) { Version::Http11 } else { Version::Http10 };
                    for h in req.headers.iter() {
                        if h.name.is_empty() && h.value.is_empty() {
                            continue;
                        }
                        self.staged_headers.push_back((h.name.to_string(), h.value.to_vec()));
                    }
                    self.read_buf.advance_past(consumed);
                    return Ok((method, target, version));
                }
                httparse::Status::Partial => {
                    self.read_more(deadline).await?;
                }
            }
        }
    }

    async fn parse_response_head(&mut self, timeout: Duration) -> Result<(Version, u16, String), StreamError> {
        let deadline = time::Instant::now() + timeout;
        loop {
            let mut small = [httparse::EMPTY_HEADER; MIN_HEADERS];
            let mut big;
            let mut resp = httparse::Response::new(&mut small);
            let mut result = resp.parse(&self.read_buf);
            if matches!(result, Err(httparse::Error::TooManyHeaders)) {
                big = vec![httparse::EMPTY_HEADER; MAX_HEADERS];
                resp = httparse::Response::new(&mut big);
                result = resp.parse(&self.read_buf);
            }
            match result.map_err(parse_error)? {
                httparse::Status::Complete(consumed) => {
                    let version = if resp.version == Some(1) { Version::Http11 } else { Version::Http10 };
                    let code = resp.code.unwrap_or(0);
                    let reason = resp.reason.unwrap_or("").to_string();
                    for h in resp.headers.iter() {
                        if h.name.is_empty() && h.value.is_empty() {
                            continue;
                        }
                        self.staged_headers.push_back((h.name.to_string(), h.value.to_vec()));
                    }
                    self.read_buf.advance_past(consumed);
                    return Ok((version, code, reason));
                }
                httparse::Status::Partial => {
                    self.read_more(deadline).await?;
                }
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_error(e: httparse::Error) -> StreamError {
    StreamError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// An abrupt peer reset surfaces from the OS as `BrokenPipe` (write) or
/// `ConnectionReset`/`ConnectionAborted` (read/write), not as a clean
/// `n == 0` read. All three mean the same thing this crate's `Eof`
/// means: the peer is gone.
fn map_io_error(e: std::io::Error) -> StreamError {
    use std::io::ErrorKind::*;
    match e.kind() {
        BrokenPipe | ConnectionReset | ConnectionAborted => StreamError::Eof,
        _ => StreamError::Io(e),
    }
}

impl<T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send> Transport for IoTransport<T> {
    async fn read_request_line(&mut self, timeout: Duration) -> Result<(Method, String, Version), StreamError> {
        self.parse_request_head(timeout).await
    }

    async fn read_status_line(&mut self, timeout: Duration) -> Result<(Version, u16, String), StreamError> {
        self.parse_response_head(timeout).await
    }

    async fn next_header(&mut self, _timeout: Duration) -> Result<Option<(String, Vec<u8>)>, StreamError> {
        // Headers were tokenized all at once by `httparse` in
        // `read_request_line`/`read_status_line`; this drains the
        // staged queue, so no further I/O or deadline applies.
        Ok(self.staged_headers.pop_front())
    }

    async fn read_body_chunk(&mut self, timeout: Duration) -> Result<Option<Bytes>, StreamError> {
        let deadline = time::Instant::now() + timeout;
        let size_end = self.fill_until(b"\r\n", timeout).await?;
        let size_line = self.read_buf.split_to(size_end);
        let size_line = &size_line[..size_line.len() - 2];
        let size_str = size_line.split(|&b| b == b';').next().unwrap_or(size_line);
        let size = std::str::from_utf8(size_str)
            .ok()
            .and_then(|s| u64::from_str_radix(s.trim(), 16).ok())
            .ok_or_else(bad_line)?;
        if size == 0 {
            // The size line alone is consumed here; the trailer
            // section (possibly empty) that follows is `read_trailers`'s
            // job, not this method's.
            return Ok(None);
        }
        let want = size as usize + 2; // chunk data + trailing CRLF
        while self.read_buf.len() < want {
            self.read_more(deadline).await?;
        }
        let mut data = self.read_buf.split_to(want);
        data.truncate(size as usize);
        Ok(Some(data.freeze()))
    }

    async fn read_body_by_length(&mut self, max_bytes: i64, timeout: Duration) -> Result<Bytes, StreamError> {
        let deadline = time::Instant::now() + timeout;
        if !self.read_buf.is_empty() {
            let take = if max_bytes < 0 {
                self.read_buf.len()
            } else {
                self.read_buf.len().min(max_bytes as usize)
            };
            return Ok(self.read_buf.split_to(take).freeze());
        }
        let cap = if max_bytes < 0 { READ_CHUNK } else { (max_bytes as usize).min(READ_CHUNK) };
        let mut buf = vec![0u8; cap.max(1)];
        let remaining = deadline.saturating_duration_since(time::Instant::now());
        let n = time::timeout(remaining, self.io.read(&mut buf))
            .await
            .map_err(|_| StreamError::TimedOut)?
            .map_err(map_io_error)?;
        if n == 0 {
            return Err(StreamError::Eof);
        }
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    async fn read_trailers(&mut self, timeout: Duration) -> Result<Vec<(String, Vec<u8>)>, StreamError> {
        let deadline = time::Instant::now() + timeout;
        let mut trailers = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(time::Instant::now());
            let end = self.fill_until(b"\r\n", remaining).await?;
            let line = self.read_buf.split_to(end);
            let line = &line[..line.len() - 2];
            if line.is_empty() {
                return Ok(trailers);
            }
            let colon = line.iter().position(|&b| b == b':').ok_or_else(bad_line)?;
            let name = String::from_utf8_lossy(&line[..colon]).into_owned();
            let value = trim(&line[colon + 1..]).to_vec();
            trailers.push((name, value));
        }
    }

    async fn write_request_line(
        &mut self,
        method: &str,
        target: &str,
        version: Version,
        timeout: Duration,
    ) -> Result<(), StreamError> {
        let line = format!("{method} {target} {version}\r\n");
        write_all_timeout(&mut self.io, line.as_bytes(), timeout).await
    }

    async fn write_status_line(
        &mut self,
        version: Version,
        status: u16,
        reason: &str,
        timeout: Duration,
    ) -> Result<(), StreamError> {
        let line = format!("{version} {status} {reason}\r\n");
        write_all_timeout(&mut self.io, line.as_bytes(), timeout).await
    }

    async fn write_header(&mut self, name: &str, value: &[u8], timeout: Duration) -> Result<(), StreamError> {
        let mut line = Vec::with_capacity(name.len() + value.len() + 4);
        line.extend_from_slice(name.as_bytes());
        line.extend_from_slice(b": ");
        line.extend_from_slice(value);
        line.extend_from_slice(b"\r\n");
        write_all_timeout(&mut self.io, &line, timeout).await
    }

    async fn write_headers_done(&mut self, timeout: Duration) -> Result<(), StreamError> {
        write_all_timeout(&mut self.io, b"\r\n", timeout).await
    }

    async fn write_body_chunk(&mut self, data: &[u8], timeout: Duration) -> Result<(), StreamError> {
        if data.is_empty() {
            return Ok(());
        }
        let mut framed = format!("{:x}\r\n", data.len()).into_bytes();
        framed.extend_from_slice(data);
        framed.extend_from_slice(b"\r\n");
        write_all_timeout(&mut self.io, &framed, timeout).await
    }

    async fn write_body_last_chunk(&mut self, timeout: Duration) -> Result<(), StreamError> {
        write_all_timeout(&mut self.io, b"0\r\n\r\n", timeout).await
    }

    async fn write_body_plain(&mut self, data: &[u8], timeout: Duration) -> Result<(), StreamError> {
        write_all_timeout(&mut self.io, data, timeout).await
    }

    async fn shutdown_write(&mut self) {
        let _ = AsyncWriteExt::shutdown(&mut self.io).await;
        self.write_eof = true;
    }

    fn is_write_eof(&self) -> bool {
        self.write_eof
    }

    fn is_tls(&self) -> bool {
        self.tls
    }
}

async fn write_all_timeout<T: tokio::io::AsyncWrite + Unpin>(
    io: &mut T,
    data: &[u8],
    timeout: Duration,
) -> Result<(), StreamError> {
    time::timeout(timeout, io.write_all(data))
        .await
        .map_err(|_| StreamError::TimedOut)?
        .map_err(map_io_error)?;
    Ok(())
}

fn bad_line() -> StreamError {
    StreamError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed line"))
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

/// Drop a known-consumed prefix without caring about its contents.
trait AdvancePast {
    fn advance_past(&mut self, n: usize);
}

impl AdvancePast for BytesMut {
    fn advance_past(&mut self, n: usize) {
        let _ = self.split_to(n.min(self.len()));
    }
}
