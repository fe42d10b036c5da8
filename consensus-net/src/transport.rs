//! TCP transport for peer sessions.
//!
//! Every connection starts with a `Hello` exchange that binds the remote
//! node id; after that each side reads length-prefixed frames on a
//! dedicated reader thread and forwards them to the inbound channel.
//!
//! ## Wire format
//!
//! ```text
//! [4 bytes: payload length (u32-le)] [N bytes: bincode payload]
//! ```
//!
//! The reader validates the length against `max_message_size` before
//! reading the payload.

use {
    crate::{
        config::NetConfig,
        error::{ConsensusNetError, Result},
        message::{ConsensusNetMessage, NodeId},
        session::{CloseSignal, Connector, InboundMessage, Session},
    },
    crossbeam_channel::{Receiver, Sender},
    log::{debug, error, info, warn},
    std::{
        io::ErrorKind,
        net::{Shutdown, SocketAddr, TcpListener, TcpStream},
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex, PoisonError,
        },
        thread::{self, Builder, JoinHandle},
        time::Duration,
    },
};

/// How often the listener checks for new connections and the exit flag.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Channel carrying inbound messages from every session to consensus.
pub fn inbound_channel(config: &NetConfig) -> (Sender<InboundMessage>, Receiver<InboundMessage>) {
    crossbeam_channel::bounded(config.inbound_channel_capacity)
}

// ── Sessions ────────────────────────────────────────────────────────────────

/// A handshaken TCP connection to one peer.
pub struct TcpSession {
    node_id: NodeId,
    peer_addr: SocketAddr,
    writer: Mutex<TcpStream>,
    /// Clone of the socket used only to shut it down.
    control: TcpStream,
    signal: CloseSignal,
    max_message_size: usize,
}

impl TcpSession {
    /// Spawn the reader for an already handshaken `stream`.
    fn start(
        stream: TcpStream,
        node_id: NodeId,
        peer_addr: SocketAddr,
        max_message_size: usize,
        inbound_sender: Sender<InboundMessage>,
    ) -> Result<Arc<Self>> {
        stream.set_read_timeout(None)?;
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;
        let session = Arc::new(Self {
            node_id,
            peer_addr,
            writer: Mutex::new(stream),
            control,
            signal: CloseSignal::new(),
            max_message_size,
        });
        let reader_session = Arc::clone(&session);
        let spawned = Builder::new()
            .name("ledgerNetRdr".to_string())
            .spawn(move || reader_session.read_loop(reader, inbound_sender));
        if let Err(err) = spawned {
            session.close();
            return Err(err.into());
        }
        Ok(session)
    }

    /// Forward frames until EOF, a read error or a closed inbound channel.
    fn read_loop(&self, mut stream: TcpStream, inbound_sender: Sender<InboundMessage>) {
        loop {
            match ConsensusNetMessage::read_from(&mut stream, self.max_message_size) {
                Ok(ConsensusNetMessage::Hello { node_id }) => {
                    warn!("{} sent a second hello as {node_id}, ignoring", self.peer_addr);
                }
                Ok(message) => {
                    debug!("received {} from {}", message.kind(), self.node_id);
                    let inbound = InboundMessage {
                        from: self.node_id,
                        addr: self.peer_addr,
                        message,
                    };
                    if inbound_sender.send(inbound).is_err() {
                        info!(
                            "inbound channel closed, stopping reader for {}",
                            self.peer_addr
                        );
                        break;
                    }
                }
                Err(ConsensusNetError::Serialization(err)) => {
                    // The frame was consumed in full; the stream is still aligned.
                    warn!("undecodable frame from {}: {err}", self.peer_addr);
                }
                Err(ConsensusNetError::Transport(err))
                    if matches!(
                        err.kind(),
                        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset
                    ) || self.is_closed() =>
                {
                    break;
                }
                Err(err) => {
                    warn!("read error from {}: {err}", self.peer_addr);
                    break;
                }
            }
        }
        self.close();
        debug!("session with {} at {} closed", self.node_id, self.peer_addr);
    }
}

impl Session for TcpSession {
    fn node_id(&self) -> NodeId {
        self.node_id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn send(&self, message: &ConsensusNetMessage) -> Result<()> {
        if self.is_closed() {
            return Err(ConsensusNetError::SessionClosed(self.node_id));
        }
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = message.write_to(&mut *writer, self.max_message_size);
        if let Err(ConsensusNetError::Transport(_)) = &result {
            self.close();
        }
        result
    }

    fn close(&self) {
        if self.signal.close() {
            // Unblocks the reader; errors mean the socket is already gone.
            let _ = self.control.shutdown(Shutdown::Both);
        }
    }

    fn is_closed(&self) -> bool {
        self.signal.is_closed()
    }

    fn wait_closed(&self) {
        self.signal.wait();
    }
}

// ── Handshake ───────────────────────────────────────────────────────────────

/// Exchange `Hello` frames. The dialing side speaks first.
fn handshake(
    stream: &mut TcpStream,
    local_id: NodeId,
    dialer: bool,
    config: &NetConfig,
) -> Result<NodeId> {
    let peer_addr = stream.peer_addr()?;
    stream.set_read_timeout(Some(config.connect_timeout()))?;
    stream.set_nodelay(true)?;

    let hello = ConsensusNetMessage::Hello { node_id: local_id };
    if dialer {
        hello.write_to(stream, config.max_message_size)?;
    }
    let remote_id = match ConsensusNetMessage::read_from(stream, config.max_message_size) {
        Ok(ConsensusNetMessage::Hello { node_id }) => node_id,
        Ok(other) => {
            return Err(ConsensusNetError::HandshakeFailed(
                peer_addr,
                format!("expected hello, got {}", other.kind()),
            ));
        }
        Err(err) => return Err(ConsensusNetError::HandshakeFailed(peer_addr, err.to_string())),
    };
    if !dialer {
        hello.write_to(stream, config.max_message_size)?;
    }
    if remote_id == local_id {
        return Err(ConsensusNetError::HandshakeFailed(
            peer_addr,
            "connected to self".to_string(),
        ));
    }
    Ok(remote_id)
}

// ── Outbound ────────────────────────────────────────────────────────────────

/// Opens outbound TCP sessions for connection workers.
pub struct TcpConnector {
    local_id: NodeId,
    config: NetConfig,
    inbound_sender: Sender<InboundMessage>,
}

impl TcpConnector {
    pub fn new(local_id: NodeId, config: NetConfig, inbound_sender: Sender<InboundMessage>) -> Self {
        Self {
            local_id,
            config,
            inbound_sender,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr) -> Result<Arc<dyn Session>> {
        let mut stream = TcpStream::connect_timeout(&addr, self.config.connect_timeout())
            .map_err(|err| ConsensusNetError::ConnectionFailed(addr, err.to_string()))?;
        let node_id = handshake(&mut stream, self.local_id, true, &self.config)?;
        let session = TcpSession::start(
            stream,
            node_id,
            addr,
            self.config.max_message_size,
            self.inbound_sender.clone(),
        )?;
        Ok(session)
    }
}

// ── Inbound ─────────────────────────────────────────────────────────────────

/// Accepts inbound TCP connections and delivers their messages.
pub struct TransportListener {
    listener: TcpListener,
    local_id: NodeId,
    config: NetConfig,
    inbound_sender: Sender<InboundMessage>,
}

/// Handle returned by [`TransportListener::start`] to control the listener.
pub struct TransportHandle {
    local_addr: SocketAddr,
    exit: Arc<AtomicBool>,
    sessions: Arc<Mutex<Vec<Arc<TcpSession>>>>,
    thread: Option<JoinHandle<()>>,
}

impl TransportListener {
    /// Bind to `config.bind_addr`.
    pub fn bind(
        local_id: NodeId,
        config: NetConfig,
        inbound_sender: Sender<InboundMessage>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            local_id,
            config,
            inbound_sender,
        })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Start accepting on a dedicated thread.
    pub fn start(self) -> Result<TransportHandle> {
        let local_addr = self.local_addr()?;
        let exit = Arc::new(AtomicBool::new(false));
        let sessions = Arc::new(Mutex::new(Vec::new()));
        info!("peer transport listening on {local_addr}");

        let thread = {
            let exit = Arc::clone(&exit);
            let sessions = Arc::clone(&sessions);
            Builder::new()
                .name("ledgerNetLsnr".to_string())
                .spawn(move || self.accept_loop(&exit, &sessions))?
        };

        Ok(TransportHandle {
            local_addr,
            exit,
            sessions,
            thread: Some(thread),
        })
    }

    fn accept_loop(self, exit: &AtomicBool, sessions: &Arc<Mutex<Vec<Arc<TcpSession>>>>) {
        while !exit.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    debug!("accepted connection from {addr}");
                    self.spawn_handshake(stream, addr, sessions);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(err) => {
                    error!("accept error: {err}");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!("peer transport listener exiting");
    }

    /// Handshake off the accept thread so a slow peer cannot stall it.
    fn spawn_handshake(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        sessions: &Arc<Mutex<Vec<Arc<TcpSession>>>>,
    ) {
        let local_id = self.local_id;
        let config = self.config.clone();
        let inbound_sender = self.inbound_sender.clone();
        let sessions = Arc::clone(sessions);
        let spawned = Builder::new()
            .name("ledgerNetHshk".to_string())
            .spawn(move || {
                match accept_session(stream, local_id, &config, inbound_sender) {
                    Ok(session) => {
                        info!("inbound session from {} at {addr}", session.node_id());
                        let mut sessions =
                            sessions.lock().unwrap_or_else(PoisonError::into_inner);
                        sessions.retain(|s| !s.is_closed());
                        sessions.push(session);
                    }
                    Err(err) => warn!("inbound handshake with {addr} failed: {err}"),
                }
            });
        if let Err(err) = spawned {
            error!("failed to spawn handshake thread for {addr}: {err}");
        }
    }
}

fn accept_session(
    mut stream: TcpStream,
    local_id: NodeId,
    config: &NetConfig,
    inbound_sender: Sender<InboundMessage>,
) -> Result<Arc<TcpSession>> {
    stream.set_nonblocking(false)?;
    let addr = stream.peer_addr()?;
    let node_id = handshake(&mut stream, local_id, false, config)?;
    TcpSession::start(stream, node_id, addr, config.max_message_size, inbound_sender)
}

impl TransportHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of inbound sessions still open.
    pub fn inbound_session_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Stop accepting, close inbound sessions and join the listener.
    pub fn shutdown(&mut self) {
        self.exit.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("peer transport listener panicked");
            }
        }
        for session in self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            session.close();
        }
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
