//! Peer connection layer for block-proposal consensus
//!
//! This crate keeps a node connected to its peers and carries proposal
//! traffic between them. It handles:
//!
//! - **Connection workers**: a fixed pool of threads, each holding at most
//!   one outbound session. Pending connection attempts live in per-worker
//!   work-stealing deques so idle workers pick up a busy sibling's backlog.
//! - **Bounded retry**: a failed attempt or an ended session is retried
//!   with exponential back-off until the request's attempts run out.
//! - **Peer registry**: who is connected through which worker, plus
//!   broadcast and targeted sends over the live sessions.
//! - **Transport**: length-prefixed bincode frames over TCP with a `Hello`
//!   handshake that binds each session to a node id.
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────────────────────────────────────────┐
//!  │  Proposal consensus                             │
//!  │  → broadcast / send_to        ← InboundMessage  │
//!  └──────────────┬───────────────────────▲──────────┘
//!                 │                       │ crossbeam channel
//!  ┌──────────────▼─────────────┐         │
//!  │  PeerRegistry              │         │
//!  │  connected map, scheduling │         │
//!  └──────┬───────────────┬─────┘         │
//!         │ inbox         │ inbox         │
//!  ┌──────▼──────┐ ┌──────▼──────┐  ┌─────┴───────────┐
//!  │ Worker 0    │ │ Worker 1    │  │ session readers │
//!  │ deque+steal │◄┤ deque+steal │  │ + listener      │
//!  └──────┬──────┘ └──────┬──────┘  └─────▲───────────┘
//!         │ Connector     │               │
//!  ┌──────▼───────────────▼───────────────┴──────────┐
//!  │  TCP sessions (length-prefixed frames)          │
//!  └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]        | `NetConfig` defaults, dev overrides, validation |
//! | [`message`]       | Wire types, bincode ser/de, framing helpers |
//! | [`request`]       | `ConnectionRequest` and retry back-off |
//! | [`queue`]         | Per-worker request deque and scheduling inbox |
//! | [`session`]       | `Session` / `Connector` seam |
//! | [`worker`]        | Connection worker threads |
//! | [`peer_registry`] | Worker pool ownership, connected peers, broadcast |
//! | [`transport`]     | TCP sessions, handshake, inbound listener |
//! | [`resolver`]      | Peer string resolution |
//! | [`error`]         | Crate-wide error enum |

pub mod config;
pub mod error;
pub mod message;
pub mod peer_registry;
pub mod queue;
pub mod request;
pub mod resolver;
pub mod session;
pub mod transport;
pub mod worker;

pub use {
    config::NetConfig,
    error::{ConsensusNetError, Result},
    message::{BlockData, ConsensusMessage, ConsensusNetMessage, NodeId, ProposalId, ProposalPayload},
    peer_registry::PeerRegistry,
    session::{Connector, InboundMessage, Session},
};
