//! Connection workers.
//!
//! One OS thread per worker. A worker takes requests from its own queue
//! (or steals from a sibling), opens a session, holds it until it ends and
//! then reschedules with exponential back-off until the request's attempts
//! run out.

use {
    crate::{
        peer_registry::RegistryShared,
        queue::{ConnectionRequestQueue, QueueHandle},
        request::{Backoff, ConnectionRequest},
        session::{Connector, Session},
    },
    crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError},
    log::{debug, info, trace, warn},
    std::{
        io,
        sync::{Arc, Mutex, PoisonError},
        thread::{Builder, JoinHandle},
        time::Duration,
    },
};

/// How long an idle worker waits for new work before trying to steal again.
const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// The part of a worker visible to the registry: run state, live session
/// and the shutdown wake-up.
pub struct WorkerSlot {
    id: usize,
    state: Mutex<WorkerState>,
    session: Mutex<Option<Arc<dyn Session>>>,
    wakeup_sender: Sender<()>,
    wakeup_receiver: Receiver<()>,
}

impl WorkerSlot {
    pub fn new(id: usize) -> Self {
        let (wakeup_sender, wakeup_receiver) = crossbeam_channel::bounded(1);
        Self {
            id,
            state: Mutex::new(WorkerState::Starting),
            session: Mutex::new(None),
            wakeup_sender,
            wakeup_receiver,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn is_stopping(&self) -> bool {
        matches!(self.state(), WorkerState::Stopping | WorkerState::Stopped)
    }

    /// Current live session, if any.
    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Install `session` unless the worker is stopping. Callers hold the
    /// registry's connected-map lock.
    pub(crate) fn install(&self, session: Arc<dyn Session>) -> bool {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_stopping() {
            return false;
        }
        *slot = Some(session);
        true
    }

    pub(crate) fn take_session(&self) -> Option<Arc<dyn Session>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Ask the worker to stop: mark it Stopping, wake it from any back-off
    /// or idle wait and end its live session.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state != WorkerState::Stopped {
                *state = WorkerState::Stopping;
            }
        }
        match self.wakeup_sender.try_send(()) {
            // Full: a wake-up is already pending.
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                debug!("worker {}: wake-up channel closed", self.id);
            }
        }
        if let Some(session) = self.session() {
            debug!("worker {}: closing session to {}", self.id, session.peer_addr());
            session.close();
        }
    }
}

/// A connection worker, built on the caller's thread and moved onto its
/// own thread by [`ConnectionWorker::spawn`].
pub struct ConnectionWorker {
    slot: Arc<WorkerSlot>,
    queue: ConnectionRequestQueue,
    siblings: Arc<[QueueHandle]>,
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    shared: Arc<RegistryShared>,
}

impl ConnectionWorker {
    pub(crate) fn new(
        slot: Arc<WorkerSlot>,
        queue: ConnectionRequestQueue,
        siblings: Arc<[QueueHandle]>,
        connector: Arc<dyn Connector>,
        backoff: Backoff,
        shared: Arc<RegistryShared>,
    ) -> Self {
        Self {
            slot,
            queue,
            siblings,
            connector,
            backoff,
            shared,
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        Builder::new()
            .name(format!("ledgerConnWkr{}", self.slot.id()))
            .spawn(move || self.run())
    }

    fn run(self) {
        let id = self.slot.id();
        {
            let mut state = self.slot.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == WorkerState::Starting {
                *state = WorkerState::Running;
            }
        }
        info!("connection worker {id} started");

        let mut rng = rand::rng();
        while !self.slot.is_stopping() {
            match self.queue.next_request(&self.siblings, &mut rng) {
                Some(request) => self.process(request),
                None => self.idle_wait(),
            }
        }

        // Requests still queued here are abandoned.
        self.queue.drain_inbox();
        while let Some(request) = self.queue.pop() {
            self.shared.untrack(&request.addr);
        }
        self.slot.set_state(WorkerState::Stopped);
        info!("connection worker {id} stopped");
    }

    /// One attempt for `request`, then reschedule or drop it.
    fn process(&self, mut request: ConnectionRequest) {
        let id = self.slot.id();
        request.record_attempt();
        debug!(
            "worker {id}: connecting to {} (attempt {}/{})",
            request.addr, request.attempts_used, request.max_attempts
        );

        match self.connector.connect(request.addr) {
            Ok(session) => self.hold(session),
            Err(err) => warn!(
                "worker {id}: connection to {} failed (attempt {}/{}): {err}",
                request.addr, request.attempts_used, request.max_attempts
            ),
        }

        if self.slot.is_stopping() {
            self.shared.untrack(&request.addr);
            return;
        }

        match request.reschedule() {
            Some(next) => {
                let delay = self.backoff.delay(next.attempts_used);
                trace!("worker {id}: retrying {} in {delay:?}", next.addr);
                if self.sleep(delay) {
                    self.queue.push(next);
                } else {
                    self.shared.untrack(&next.addr);
                }
            }
            None => {
                warn!(
                    "worker {id}: giving up on {} after {} attempts",
                    request.addr, request.attempts_used
                );
                self.shared.untrack(&request.addr);
            }
        }
    }

    /// Publish `session`, block until it ends, then retract it.
    fn hold(&self, session: Arc<dyn Session>) {
        let id = self.slot.id();
        let node_id = session.node_id();
        let addr = session.peer_addr();
        if !self.shared.install_session(id, Arc::clone(&session)) {
            session.close();
            return;
        }
        info!("worker {id}: session established with {node_id} at {addr}");
        session.wait_closed();
        self.shared.remove_session(id);
        info!("worker {id}: session with {node_id} at {addr} ended");
    }

    /// Wait for scheduled work, a shutdown wake-up or the idle poll.
    fn idle_wait(&self) {
        crossbeam_channel::select! {
            recv(self.queue.inbox()) -> request => {
                if let Ok(request) = request {
                    self.queue.push(request);
                }
            }
            recv(self.slot.wakeup_receiver) -> _ => {}
            default(IDLE_POLL) => {}
        }
    }

    /// Back-off sleep. Returns `false` when interrupted by shutdown.
    fn sleep(&self, delay: Duration) -> bool {
        match self.slot.wakeup_receiver.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => !self.slot.is_stopping(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Block until every handle has joined, logging panicked workers.
pub(crate) fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().map(str::to_owned);
        if handle.join().is_err() {
            warn!("{} panicked", name.as_deref().unwrap_or("connection worker"));
        }
    }
}
