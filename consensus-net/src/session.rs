//! The session seam between connection workers and the transport.
//!
//! Workers only see [`Connector`] and [`Session`]. The TCP implementation
//! lives in [`crate::transport`]; tests plug in their own.

use {
    crate::{
        error::Result,
        message::{ConsensusNetMessage, NodeId},
    },
    std::{
        net::SocketAddr,
        sync::{Arc, Condvar, Mutex, PoisonError},
    },
};

/// A decoded message together with the session it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Node id bound by the session handshake.
    pub from: NodeId,
    /// Remote socket address of the session.
    pub addr: SocketAddr,
    pub message: ConsensusNetMessage,
}

/// A live, handshaken connection to one peer.
pub trait Session: Send + Sync {
    fn node_id(&self) -> NodeId;

    fn peer_addr(&self) -> SocketAddr;

    /// Write one message. Fails once the session has ended.
    fn send(&self, message: &ConsensusNetMessage) -> Result<()>;

    /// End the session. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Block until the session ends, locally or remotely.
    fn wait_closed(&self);
}

/// Opens outbound sessions.
pub trait Connector: Send + Sync {
    fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn Session>>;
}

/// One-shot "session ended" latch.
#[derive(Debug, Default)]
pub struct CloseSignal {
    closed: Mutex<bool>,
    cvar: Condvar,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the latch. Returns `true` for the call that actually closed it.
    pub fn close(&self) -> bool {
        let mut closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return false;
        }
        *closed = true;
        self.cvar.notify_all();
        true
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait(&self) {
        let closed = self.closed.lock().unwrap_or_else(PoisonError::into_inner);
        let _closed = self
            .cvar
            .wait_while(closed, |closed| !*closed)
            .unwrap_or_else(PoisonError::into_inner);
    }
}
