//! A connection owns the transport and the pipeline; streams hold only
//! a non-owning (`Weak`) reference to it, per the "back-reference to
//! connection" design note: "Implement as a borrow / weak handle, never
//! as shared ownership." The connection outlives its streams, and a
//! stream's lifetime (ending at `closed`) is independent of the
//! connection's.

use std::sync::{Arc, Weak};

use tokio::sync::Mutex as AsyncMutex;

use crate::enums::Role;
use crate::pipeline::Pipeline;
use crate::stream::Stream;
use crate::transport::Transport;

/// Owns the shared transport and the per-connection pipeline
/// coordinator. Create one per accepted (server) or dialed (client)
/// socket, wrap it in an `Arc`, and hand out streams with
/// `open_stream`.
pub struct Connection<T> {
    pub(crate) transport: AsyncMutex<T>,
    pub(crate) pipeline: Pipeline,
}

impl<T: Transport> Connection<T> {
    pub fn new(transport: T) -> Arc<Connection<T>> {
        Arc::new(Connection { transport: AsyncMutex::new(transport), pipeline: Pipeline::new() })
    }

    /// Create a new stream for this connection, in the given role.
    /// Multiple streams may be live at once (pipelining); the pipeline
    /// coordinator, not this method, is what serializes their access
    /// to the socket.
    pub fn open_stream(self: &Arc<Self>, role: Role) -> Stream<T> {
        let id = self.pipeline.allocate_id();
        Stream::new(role, id, Arc::downgrade(self))
    }
}

/// A non-owning handle back to a connection, exactly the weak
/// back-reference the design note asks for.
pub(crate) type ConnectionRef<T> = Weak<Connection<T>>;
