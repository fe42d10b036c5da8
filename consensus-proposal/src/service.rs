//! Inbound dispatch thread.
//!
//! Drains the channel fed by session reader threads and hands every
//! message to the [`ProposalHandler`]. While idle it expires remote
//! proposals that outlived their TTL.

use {
    crate::handler::ProposalHandler,
    crossbeam_channel::{Receiver, RecvTimeoutError},
    ledger_consensus_net::InboundMessage,
    log::*,
    std::{
        io,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        thread::{self, Builder, JoinHandle},
        time::{Duration, Instant},
    },
};

pub struct InboundDispatcher {
    thread: JoinHandle<()>,
}

impl InboundDispatcher {
    /// Start the dispatch thread.
    ///
    /// * `poll`: how long to block on the channel before checking `exit`
    ///   and stale proposals.
    /// * `exit`: shutdown flag shared with the host.
    pub fn new(
        handler: Arc<ProposalHandler>,
        receiver: Receiver<InboundMessage>,
        poll: Duration,
        exit: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let thread = Builder::new()
            .name("ledgerPropDisp".to_string())
            .spawn(move || Self::run(&handler, &receiver, poll, &exit))?;
        Ok(Self { thread })
    }

    pub fn join(self) -> thread::Result<()> {
        self.thread.join()
    }

    fn run(
        handler: &ProposalHandler,
        receiver: &Receiver<InboundMessage>,
        poll: Duration,
        exit: &AtomicBool,
    ) {
        info!("InboundDispatcher: started (node {})", handler.local_id());
        let mut last_sweep = Instant::now();

        loop {
            if exit.load(Ordering::Relaxed) {
                info!("InboundDispatcher: exit signal received, shutting down");
                break;
            }

            match receiver.recv_timeout(poll) {
                Ok(InboundMessage { from, addr, message }) => {
                    trace!("InboundDispatcher: {} from {from} ({addr})", message.kind());
                    handler.on_message(from, message);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("InboundDispatcher: inbound channel disconnected, shutting down");
                    break;
                }
            }

            // Once per poll interval, busy or idle.
            let now = Instant::now();
            if now.saturating_duration_since(last_sweep) >= poll {
                handler.expire_stale(now);
                last_sweep = now;
            }
        }
    }
}
