//! The `Stream` state machine (~65% of the core): the per-exchange
//! object that drives a single request/response pair, identical for
//! client and server roles but with the roles reversed.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::body_reader::BodyReader;
use crate::connection::{Connection, ConnectionRef};
use crate::enums::{Method, Role, Version};
use crate::error::{ProtocolError, StreamError};
use crate::framing::{self, BodyFraming};
use crate::headers::{self, HeaderList};
use crate::pipeline::StreamId;
use crate::transport::Transport;

/// The five states of an HTTP/1.x exchange, shared by client and server
/// streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Open,
    HalfClosedLocal,
    HalfClosedRemote,
    Closed,
}

/// The two half-direction completion events that drive transitions.
/// `HeadersSent` is the client-only `idle -> open` kickoff; `LocalEnd`
/// and `RemoteEnd` are the symmetric half-direction completions:
/// finishing one direction moves `open` to the corresponding half-closed
/// state, and finishing the other moves any half-closed state to
/// `closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    HeadersSent,
    LocalEnd,
    RemoteEnd,
}

impl State {
    fn apply(self, event: Event) -> State {
        use State::*;
        match (self, event) {
            (Idle, Event::HeadersSent) => Open,
            (Open, Event::LocalEnd) => HalfClosedLocal,
            (Open, Event::RemoteEnd) => HalfClosedRemote,
            (HalfClosedRemote, Event::LocalEnd) => Closed,
            (HalfClosedLocal, Event::RemoteEnd) => Closed,
            // A no-body exchange can finish a direction before the
            // other has formally opened (e.g. a stream abandoned right
            // after headers); applying the event still walks the graph
            // towards `closed` rather than getting stuck, matching
            // "finishing both from idle directly ... must also reach
            // closed".
            (Idle, Event::LocalEnd) => HalfClosedLocal,
            (Idle, Event::RemoteEnd) => HalfClosedRemote,
            (other, _) => other,
        }
    }

    pub fn is_closed(self) -> bool {
        matches!(self, State::Closed)
    }
}

/// The per-exchange HTTP/1.x stream. Generic over the transport it
/// drives (see `transport::Transport`); role-reversed for client vs.
/// server use by `Role`.
pub struct Stream<T> {
    role: Role,
    id: StreamId,
    connection: ConnectionRef<T>,

    state: State,
    state_cond: Notify,

    headers: HeaderList,
    headers_complete: bool,
    headers_cond: Notify,

    req_method: Option<Method>,
    peer_version: Option<Version>,

    body_write_type: Option<BodyFraming>,
    close_when_done: bool,
    stats_sent: u64,

    body_reader: Option<BodyReader>,
}

impl<T: Transport> Stream<T> {
    pub(crate) fn new(role: Role, id: StreamId, connection: ConnectionRef<T>) -> Stream<T> {
        Stream {
            role,
            id,
            connection,
            state: State::Idle,
            state_cond: Notify::new(),
            headers: HeaderList::new(),
            headers_complete: false,
            headers_cond: Notify::new(),
            req_method: None,
            peer_version: None,
            body_write_type: None,
            close_when_done: false,
            stats_sent: 0,
            body_reader: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats_sent(&self) -> u64 {
        self.stats_sent
    }

    /// Suspend until the state machine's `state_cond` fires, i.e. until
    /// some half-direction completes. Exposed so a caller can watch a
    /// stream's progress (e.g. to detect abandonment) without polling
    /// `state()` in a loop -- the explicit suspension point the
    /// "coroutine control flow" design note asks for.
    pub async fn wait_for_state_change(&self) {
        self.state_cond.notified().await;
    }

    /// Suspend until `get_headers` has completed once, for a caller
    /// that wants to know headers are available without driving the
    /// read itself.
    pub async fn wait_for_headers(&self) {
        if self.headers_complete {
            return;
        }
        self.headers_cond.notified().await;
    }

    fn connection(&self) -> std::sync::Arc<Connection<T>> {
        self.connection.upgrade().expect("connection dropped while a live stream still referenced it")
    }

    /// Apply a half-direction event: update `state`, release whichever
    /// lock is bound to that transition, and wake `state_cond`. This is
    /// the *only* place the pipeline/request lock is released.
    fn set_state(&mut self, event: Event, conn: &Connection<T>) {
        let new_state = self.state.apply(event);
        if new_state == self.state {
            return;
        }
        tracing::trace!(role = ?self.role, from = ?self.state, to = ?new_state, ?event, "stream state transition");
        self.state = new_state;
        match (self.role, event) {
            // Read-side completion: release the read-side lock.
            (Role::Server, Event::RemoteEnd) => conn.pipeline.release_req_lock(self.id),
            (Role::Client, Event::RemoteEnd) => conn.pipeline.pop_if_head(self.id),
            // Write-side completion: release the write-side lock.
            (Role::Client, Event::LocalEnd) => conn.pipeline.release_req_lock(self.id),
            (Role::Server, Event::LocalEnd) => conn.pipeline.pop_if_head(self.id),
            (_, Event::HeadersSent) => {}
        }
        self.state_cond.notify_waiters();
    }

    /// Idempotent: the cached header set from the first successful
    /// call.
    pub async fn get_headers(&mut self, timeout: Duration) -> Result<&HeaderList, StreamError> {
        if self.headers_complete {
            return Ok(&self.headers);
        }
        let conn = self.connection();

        match self.role {
            Role::Server => {
                if self.state == State::Idle {
                    conn.pipeline.acquire_req_lock(self.id, timeout).await?;
                    let (method, target, version) = {
                        let mut transport = conn.transport.lock().await;
                        transport.read_request_line(timeout).await?
                    };
                    self.peer_version = Some(version);
                    if method.is_connect() {
                        self.headers.set_pseudo(headers::AUTHORITY, target);
                    } else {
                        self.headers.set_pseudo(headers::PATH, target);
                    }
                    let is_tls = conn.transport.lock().await.is_tls();
                    self.headers.set_pseudo(headers::SCHEME, if is_tls { "https" } else { "http" });
                    self.headers.set_pseudo(headers::METHOD, method.as_str().to_string());
                    self.req_method = Some(method);
                    // A server stream joins the pipeline FIFO the moment
                    // its request starts being read, so responses are
                    // written back in the same order requests arrived.
                    conn.pipeline.push(self.id);
                    self.set_state(Event::HeadersSent, &conn);
                }
            }
            Role::Client => {
                if self.state == State::Idle {
                    ProtocolError::ClientReadBeforeWrite.panic();
                }
                if self.headers.pseudo(headers::STATUS).is_none() {
                    if !conn.pipeline.is_head(self.id) {
                        ProtocolError::NotPipelineHead.panic();
                    }
                    let (version, status, _reason) = {
                        let mut transport = conn.transport.lock().await;
                        transport.read_status_line(timeout).await?
                    };
                    self.peer_version = Some(version);
                    self.headers.set_pseudo(headers::STATUS, status.to_string());
                }
            }
        }

        loop {
            let next = {
                let mut transport = conn.transport.lock().await;
                transport.next_header(timeout).await?
            };
            match next {
                Some((name, value)) => {
                    if name.eq_ignore_ascii_case("host") {
                        self.headers.set_pseudo(headers::AUTHORITY, String::from_utf8_lossy(&value).into_owned());
                    } else {
                        self.headers.push(&name, value);
                    }
                }
                None => break,
            }
        }
        self.headers_complete = true;
        self.headers_cond.notify_waiters();

        let is_server = self.role == Role::Server;
        let method = self.req_method.clone().unwrap_or_else(|| Method::new(""));
        if framing::no_body_expected(is_server, &method, &self.headers) {
            self.set_state(Event::RemoteEnd, &conn);
        }

        Ok(&self.headers)
    }

    /// Write the local headers (request line + fields for a client, or
    /// status line + fields for a server), choose outbound body
    /// framing exactly once, and optionally end the local direction.
    ///
    /// `headers` must have its pseudo-headers pre-populated by the
    /// caller: `:method`/`:path` (or `:authority` for `CONNECT`) for a
    /// client, `:status` for a server.
    pub async fn write_headers(
        &mut self,
        headers: HeaderList,
        end_stream: bool,
        timeout: Duration,
    ) -> Result<(), StreamError> {
        if matches!(self.state, State::Closed | State::HalfClosedLocal) {
            return Err(StreamError::Eof);
        }
        let conn = self.connection();

        match self.role {
            Role::Client => {
                if self.state == State::Idle {
                    let method_str = headers
                        .pseudo(headers::METHOD)
                        .map(str::to_string)
                        .unwrap_or_else(|| ProtocolError::MissingMethod.panic());
                    let method = Method::new(method_str.clone());

                    let target = if method.is_connect() {
                        if headers.pseudo(headers::PATH).is_some() {
                            ProtocolError::ConnectWithPath.panic();
                        }
                        headers
                            .pseudo(headers::AUTHORITY)
                            .map(str::to_string)
                            .unwrap_or_else(|| ProtocolError::MissingMethod.panic())
                    } else {
                        headers.pseudo(headers::PATH).map(str::to_string).unwrap_or_default()
                    };

                    if conn.transport.lock().await.is_write_eof() {
                        return Err(StreamError::Eof);
                    }
                    conn.pipeline.acquire_req_lock(self.id, timeout).await?;
                    conn.pipeline.push(self.id);

                    let version = Version::Http11;
                    {
                        let mut transport = conn.transport.lock().await;
                        transport.write_request_line(&method_str, &target, version, timeout).await?;
                    }
                    self.req_method = Some(method);
                    self.peer_version = self.peer_version.or(Some(version));
                    self.set_state(Event::HeadersSent, &conn);
                }
            }
            Role::Server => {
                if !matches!(self.state, State::Open | State::HalfClosedRemote) || !conn.pipeline.is_head(self.id) {
                    ProtocolError::WrongState { state: "server write_headers requires open/half-closed-remote at pipeline head" }.panic();
                }
                let status: u16 = headers
                    .pseudo(headers::STATUS)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| ProtocolError::WrongState { state: "missing :status" }.panic());
                let reason = crate::reason::reason_phrase(status);
                let version = self.peer_version.unwrap_or(Version::Http11);
                let mut transport = conn.transport.lock().await;
                transport.write_status_line(version, status, reason, timeout).await?;
            }
        }

        let method = self.req_method.clone().unwrap_or_else(|| Method::new(""));
        let peer_version = self.peer_version.unwrap_or(Version::Http11);
        let is_server = self.role == Role::Server;

        let outbound = framing::select_outbound(&headers, &method, peer_version, end_stream, is_server)
            .unwrap_or_else(|e| e.panic());
        self.close_when_done = outbound.close_when_done;

        // A client that ends the stream at `write_headers` (no body)
        // emits an explicit zero-length so the server doesn't wait for
        // one. Only needed when the connection is staying open -- a
        // closing connection already tells the server the message is
        // over.
        let synth_zero_length =
            end_stream && !is_server && !method.is_head() && !outbound.close_when_done;

        {
            let mut transport = conn.transport.lock().await;
            for (name, value) in emission_order(&headers, &method) {
                transport.write_header(name, value, timeout).await?;
            }
            if synth_zero_length {
                transport.write_header("Content-Length", b"0", timeout).await?;
            }
            transport.write_headers_done(timeout).await?;
        }

        self.body_write_type = outbound.framing;

        if end_stream {
            self.set_state(Event::LocalEnd, &conn);
        }
        if self.close_when_done {
            let mut transport = conn.transport.lock().await;
            transport.shutdown_write().await;
        }

        Ok(())
    }

    /// Pull the next chunk of the received body, constructing the body
    /// reader from the (already-fetched) headers on first call.
    pub async fn get_next_chunk(&mut self, timeout: Duration) -> Result<Bytes, StreamError> {
        self.get_headers(timeout).await?;
        let conn = self.connection();

        if matches!(self.state, State::HalfClosedRemote | State::Closed) {
            // The remote half was already retired, either by the
            // no-body inference in `get_headers` or by a prior
            // `get_next_chunk` reaching its terminator: there is no
            // body left to read, so don't construct a reader and block
            // on one that will never produce anything.
            return Err(StreamError::Eof);
        }

        if self.body_reader.is_none() {
            let framing = framing::select_inbound(&self.headers).unwrap_or_else(|e| e.panic());
            self.body_reader = Some(BodyReader::new(framing));
        }

        let reader = self.body_reader.as_mut().expect("constructed above");
        let transport_conn = conn.clone();
        let mut transport = transport_conn.transport.lock().await;
        let result = reader.next(&mut *transport, &mut self.headers, timeout).await;
        drop(transport);

        match result {
            Ok(bytes) => Ok(bytes),
            Err(StreamError::Eof) => {
                self.set_state(Event::RemoteEnd, &conn);
                Err(StreamError::Eof)
            }
            Err(other) => Err(other),
        }
    }

    /// Write one chunk of the local body, per the framing chosen by
    /// `write_headers`.
    pub async fn write_chunk(&mut self, chunk: &[u8], end_stream: bool, timeout: Duration) -> Result<(), StreamError> {
        if !matches!(self.state, State::Open | State::HalfClosedRemote) {
            ProtocolError::WrongState { state: "write_chunk requires open or half-closed-remote" }.panic();
        }
        let conn = self.connection();

        match self.role {
            Role::Client => {
                if !conn.pipeline.owns_req_lock(self.id) {
                    ProtocolError::NotPipelineHead.panic();
                }
            }
            Role::Server => {
                if !conn.pipeline.is_head(self.id) {
                    ProtocolError::NotPipelineHead.panic();
                }
            }
        }

        let framing = self.body_write_type.unwrap_or_else(|| ProtocolError::FramingNotChosen.panic());

        {
            let mut transport = conn.transport.lock().await;
            match framing {
                BodyFraming::Chunked => {
                    if !chunk.is_empty() {
                        transport.write_body_chunk(chunk, timeout).await?;
                    }
                    if end_stream {
                        // "0\r\n\r\n": chunk terminator plus an empty
                        // trailer section. Real trailer fields, if any,
                        // are inbound-only in this design (see
                        // `BodyReader::next`); nothing here writes them.
                        transport.write_body_last_chunk(timeout).await?;
                    }
                }
                BodyFraming::Length(left) => {
                    transport.write_body_plain(chunk, timeout).await?;
                    let consumed = chunk.len() as u64;
                    let remaining = left.checked_sub(consumed).unwrap_or_else(|| {
                        ProtocolError::ContentLengthMismatch { left }.panic()
                    });
                    self.body_write_type = Some(BodyFraming::Length(remaining));
                    if end_stream && remaining != 0 {
                        ProtocolError::ContentLengthMismatch { left: remaining }.panic();
                    }
                }
                BodyFraming::Close => {
                    transport.write_body_plain(chunk, timeout).await?;
                }
            }
        }

        self.stats_sent += chunk.len() as u64;

        if end_stream {
            if self.close_when_done {
                let mut transport = conn.transport.lock().await;
                transport.shutdown_write().await;
            }
            self.set_state(Event::LocalEnd, &conn);
        }

        Ok(())
    }

    /// Best-effort abandonment.
    pub async fn shutdown(&mut self) {
        let conn = self.connection();

        // Drain any unread remote body, ignoring errors.
        if matches!(self.state, State::Idle | State::Open | State::HalfClosedLocal) {
            loop {
                match self.get_next_chunk(Duration::from_secs(5)).await {
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        }

        // A server that received the full request but hasn't finished
        // the response: fabricate a terminal body so the socket is left
        // in a defined state.
        if self.role == Role::Server && self.state == State::HalfClosedRemote {
            if let Some(framing) = self.body_write_type {
                let mut transport = conn.transport.lock().await;
                match framing {
                    BodyFraming::Chunked => {
                        let _ = transport.write_body_last_chunk(Duration::from_secs(5)).await;
                    }
                    BodyFraming::Length(left) => {
                        if left > 0 {
                            let zeros = vec![0u8; left.min(64 * 1024) as usize];
                            let _ = transport.write_body_plain(&zeros, Duration::from_secs(5)).await;
                        }
                    }
                    BodyFraming::Close => {}
                }
                if self.close_when_done {
                    transport.shutdown_write().await;
                }
            }
            // `body_write_type` unset: the source tolerates closing
            // without synthesizing a body here (Design Notes, open
            // question (a)); we preserve that rather than inventing a
            // framing.
        }

        self.state = State::Closed;
        conn.pipeline.release_req_lock(self.id);
        conn.pipeline.pop_if_head(self.id);
        self.state_cond.notify_waiters();
    }
}

/// Ordinary-field emission order for `write_headers`: pseudo-headers
/// are suppressed except `:authority`, which is emitted as `Host` for
/// non-`CONNECT` requests.
fn emission_order<'a>(headers: &'a HeaderList, method: &Method) -> Vec<(&'a str, &'a [u8])> {
    let mut out: Vec<(&str, &[u8])> = Vec::new();
    if !method.is_connect() {
        if let Some(authority) = headers.pseudo(headers::AUTHORITY) {
            out.push(("Host", authority.as_bytes()));
        }
    }
    out.extend(headers.ordinary());
    out
}
