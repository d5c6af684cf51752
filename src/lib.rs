//! An HTTP/1.x stream state machine shared between client and server
//! roles: the same five-state exchange (idle, open, half-closed-local,
//! half-closed-remote, closed), the same pipelined ordering guarantees,
//! and the same body-framing rules, regardless of which side of the
//! connection is driving it.
//!
//! `Connection` owns the transport and the pipeline; `open_stream`
//! hands out a `Stream` for each request/response exchange. Streams
//! hold only a weak back-reference to their connection, so a
//! connection may outlive any number of completed streams.
//!
//! The crate never touches a socket directly: all wire I/O goes
//! through the `Transport` trait, implemented here by `IoTransport`
//! over any `tokio::io::{AsyncRead, AsyncWrite}` type.

mod body_reader;
mod connection;
mod enums;
mod error;
mod framing;
mod headers;
mod pipeline;
mod reason;
mod stream;
mod transport;

pub use connection::Connection;
pub use enums::{Method, Role, Version};
pub use error::{ProtocolError, StreamError};
pub use framing::BodyFraming;
pub use headers::HeaderList;
pub use pipeline::StreamId;
pub use stream::{State, Stream};
pub use transport::{IoTransport, Transport};

pub mod header_names {
    pub use crate::headers::{AUTHORITY, METHOD, PATH, SCHEME, STATUS};
}
