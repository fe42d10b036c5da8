//! Message types and serialization for proposal consensus traffic.
//!
//! All messages are serialized with bincode. The [`ConsensusNetMessage`]
//! enum is the top-level wire type: every frame on a peer session is a
//! length-prefixed bincode encoding of this enum.

use {
    crate::error::{ConsensusNetError, Result},
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_pubkey::Pubkey,
    std::{
        fmt,
        io::{Read, Write},
    },
};

/// Identity of a node on the network.
pub type NodeId = Pubkey;

/// Size of the little-endian length prefix in front of every frame.
pub const FRAME_HEADER_LEN: usize = 4;

// ── Proposal identity ───────────────────────────────────────────────────────

/// Random identifier of one proposal round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProposalId(pub u64);

impl ProposalId {
    pub fn new_random() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Body shared by every consensus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub proposal_id: ProposalId,
    /// Node driving the round.
    pub proposer_id: NodeId,
    /// Hash of the candidate block.
    pub block_hash: Hash,
}

/// Phase-structured consensus messages.
///
/// `Prepare`/`Commit` flow from the proposer to every peer; `Promise`,
/// `Accepted` and `Rejected` are the replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    Prepare(ProposalPayload),
    Promise(ProposalPayload),
    Commit(ProposalPayload),
    Accepted(ProposalPayload),
    Rejected(ProposalPayload),
}

impl ConsensusMessage {
    pub fn payload(&self) -> &ProposalPayload {
        match self {
            Self::Prepare(p)
            | Self::Promise(p)
            | Self::Commit(p)
            | Self::Accepted(p)
            | Self::Rejected(p) => p,
        }
    }

    pub fn proposal_id(&self) -> ProposalId {
        self.payload().proposal_id
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Prepare(_) => "prepare",
            Self::Promise(_) => "promise",
            Self::Commit(_) => "commit",
            Self::Accepted(_) => "accepted",
            Self::Rejected(_) => "rejected",
        }
    }
}

// ── Block data ──────────────────────────────────────────────────────────────

/// Candidate block as carried on the wire.
///
/// The payload is opaque here; decoding it belongs to the block codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockData {
    /// Content hash over parent linkage, height, proposer and payload.
    pub hash: Hash,
    pub parent_hash: Hash,
    pub height: u64,
    pub proposer: NodeId,
    pub payload: Vec<u8>,
}

impl BlockData {
    /// Build a block and compute its content hash.
    pub fn new(parent_hash: Hash, height: u64, proposer: NodeId, payload: Vec<u8>) -> Self {
        let hash = Self::compute_hash(&parent_hash, height, &proposer, &payload);
        Self {
            hash,
            parent_hash,
            height,
            proposer,
            payload,
        }
    }

    pub fn compute_hash(parent_hash: &Hash, height: u64, proposer: &NodeId, payload: &[u8]) -> Hash {
        solana_sha256_hasher::hashv(&[
            parent_hash.as_ref(),
            &height.to_le_bytes(),
            proposer.as_ref(),
            payload,
        ])
    }

    /// Whether `hash` matches the block contents.
    pub fn verify_hash(&self) -> bool {
        self.hash == Self::compute_hash(&self.parent_hash, self.height, &self.proposer, &self.payload)
    }
}

// ── Wire message ────────────────────────────────────────────────────────────

/// Top-level message exchanged on a peer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusNetMessage {
    /// First frame in both directions. Binds the session to a node id.
    Hello { node_id: NodeId },

    /// A proposal round message.
    Consensus(ConsensusMessage),

    /// Ask a peer for a block it proposed.
    BlockRequest { block_hash: Hash },

    /// Reply to [`ConsensusNetMessage::BlockRequest`].
    BlockResponse(BlockData),
}

// ── Serialisation helpers ───────────────────────────────────────────────────

impl ConsensusNetMessage {
    /// Serialize this message to bytes using bincode.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(ConsensusNetError::Serialization)
    }

    /// Deserialize a message from bytes.
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::deserialize(data).map_err(ConsensusNetError::Serialization)
    }

    /// Serialize with a 4-byte little-endian length prefix.
    ///
    /// Wire format: `[len: u32-le][payload: len bytes]`
    pub fn serialize_framed(&self, max_size: usize) -> Result<Vec<u8>> {
        let payload = self.serialize()?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|_| payload.len() <= max_size)
            .ok_or(ConsensusNetError::MessageTooLarge {
                size: payload.len(),
                max: max_size,
            })?;
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN.saturating_add(payload.len()));
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Read the length prefix from a 4-byte buffer.
    pub fn read_frame_len(header: &[u8; FRAME_HEADER_LEN]) -> usize {
        usize::try_from(u32::from_le_bytes(*header)).unwrap_or(usize::MAX)
    }

    /// Write one framed message and flush.
    pub fn write_to<W: Write>(&self, writer: &mut W, max_size: usize) -> Result<()> {
        let frame = self.serialize_framed(max_size)?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    /// Read exactly one framed message, rejecting frames above `max_size`
    /// before allocating the payload.
    pub fn read_from<R: Read>(reader: &mut R, max_size: usize) -> Result<Self> {
        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let len = Self::read_frame_len(&header);
        if len > max_size {
            return Err(ConsensusNetError::MessageTooLarge {
                size: len,
                max: max_size,
            });
        }
        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        Self::deserialize(&payload)
    }

    /// Return a human-readable tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Consensus(msg) => msg.kind(),
            Self::BlockRequest { .. } => "block_request",
            Self::BlockResponse(_) => "block_response",
        }
    }
}

impl From<ConsensusMessage> for ConsensusNetMessage {
    fn from(msg: ConsensusMessage) -> Self {
        Self::Consensus(msg)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
