//! Error types for the peer connection layer.

use {crate::config::ConfigError, solana_pubkey::Pubkey, std::net::SocketAddr, thiserror::Error};

/// Errors that can occur in the peer connection layer.
#[derive(Error, Debug)]
pub enum ConsensusNetError {
    /// Failed to serialize or deserialize a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Message exceeds the maximum allowed size.
    #[error("message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge {
        /// Actual message size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// No live session to this peer.
    #[error("unknown peer: {0}")]
    UnknownPeer(Pubkey),

    /// A worker's scheduling inbox is full.
    #[error("connection queue of worker {worker} is full")]
    QueueFull {
        /// The worker whose inbox rejected the request.
        worker: usize,
    },

    /// The registry or worker is shutting down.
    #[error("peer registry is shutting down")]
    ShuttingDown,

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The channel used to deliver inbound messages is closed.
    #[error("inbound channel closed")]
    ChannelClosed,

    /// Connection to a peer was refused or could not be opened.
    #[error("connection failed to {0}: {1}")]
    ConnectionFailed(SocketAddr, String),

    /// The session handshake did not complete.
    #[error("handshake with {0} failed: {1}")]
    HandshakeFailed(SocketAddr, String),

    /// Writing to a session that has already ended.
    #[error("session to {0} is closed")]
    SessionClosed(Pubkey),

    /// A configured peer address could not be resolved.
    #[error("failed to resolve peer address {0:?}: {1}")]
    Resolve(String, String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Convenience result type for connection layer operations.
pub type Result<T> = std::result::Result<T, ConsensusNetError>;
