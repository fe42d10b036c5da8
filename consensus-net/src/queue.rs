//! Per-worker queues of pending connection requests.
//!
//! Each worker owns a [`ConnectionRequestQueue`]: a work-stealing deque it
//! alone pushes to, fed by a bounded inbox that any thread may schedule
//! into. Everyone else sees the queue through a [`QueueHandle`], which can
//! schedule into the inbox and steal from both the deque and the inbox.

use {
    crate::{
        error::{ConsensusNetError, Result},
        request::ConnectionRequest,
    },
    crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError},
    ledger_work_stealing::{Stealer, WorkStealingDeque},
    log::trace,
    rand::Rng,
    std::thread,
};

/// Owner side of a worker's request queue. Only the worker thread holds it.
pub struct ConnectionRequestQueue {
    worker_id: usize,
    deque: WorkStealingDeque<ConnectionRequest>,
    inbox: Receiver<ConnectionRequest>,
}

/// Shared side of a worker's request queue.
#[derive(Clone)]
pub struct QueueHandle {
    worker_id: usize,
    stealer: Stealer<ConnectionRequest>,
    sender: Sender<ConnectionRequest>,
    inbox: Receiver<ConnectionRequest>,
}

impl ConnectionRequestQueue {
    pub fn new(
        worker_id: usize,
        initial_capacity: usize,
        inbox_capacity: usize,
    ) -> (Self, QueueHandle) {
        let deque = WorkStealingDeque::new(initial_capacity);
        let (sender, inbox) = crossbeam_channel::bounded(inbox_capacity);
        let handle = QueueHandle {
            worker_id,
            stealer: deque.stealer(),
            sender,
            inbox: inbox.clone(),
        };
        (
            Self {
                worker_id,
                deque,
                inbox,
            },
            handle,
        )
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Push a request onto the local deque.
    pub fn push(&self, request: ConnectionRequest) {
        self.deque.push(request);
    }

    pub fn pop(&self) -> Option<ConnectionRequest> {
        self.deque.pop()
    }

    /// Move every scheduled request from the inbox onto the local deque.
    pub fn drain_inbox(&self) -> usize {
        let mut moved = 0usize;
        loop {
            match self.inbox.try_recv() {
                Ok(request) => {
                    self.deque.push(request);
                    moved = moved.saturating_add(1);
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return moved,
            }
        }
    }

    pub(crate) fn inbox(&self) -> &Receiver<ConnectionRequest> {
        &self.inbox
    }

    /// Requests held locally, inbox included.
    pub fn len(&self) -> usize {
        self.deque.len().saturating_add(self.inbox.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next request for this worker: drain the inbox, pop local work, else
    /// steal from one uniformly chosen sibling. Yields and returns `None`
    /// when nothing was found.
    pub fn next_request<R: Rng>(
        &self,
        siblings: &[QueueHandle],
        rng: &mut R,
    ) -> Option<ConnectionRequest> {
        self.drain_inbox();
        if let Some(request) = self.pop() {
            return Some(request);
        }

        let others = siblings
            .iter()
            .filter(|handle| handle.worker_id != self.worker_id)
            .count();
        if others > 0 {
            let pick = rng.random_range(0..others);
            let victim = siblings
                .iter()
                .filter(|handle| handle.worker_id != self.worker_id)
                .nth(pick);
            if let Some(request) = victim.and_then(QueueHandle::steal) {
                trace!(
                    "worker {} stole request for {} from worker {}",
                    self.worker_id,
                    request.addr,
                    victim.map_or(0, QueueHandle::worker_id),
                );
                return Some(request);
            }
        }

        thread::yield_now();
        None
    }
}

impl QueueHandle {
    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    /// Schedule a request for this worker without blocking.
    pub fn schedule(&self, request: ConnectionRequest) -> Result<()> {
        self.sender.try_send(request).map_err(|err| match err {
            TrySendError::Full(_) => ConsensusNetError::QueueFull {
                worker: self.worker_id,
            },
            TrySendError::Disconnected(_) => ConsensusNetError::ShuttingDown,
        })
    }

    /// Take the oldest request from the deque, else from the inbox.
    pub fn steal(&self) -> Option<ConnectionRequest> {
        self.stealer
            .steal()
            .or_else(|| self.inbox.try_recv().ok())
    }

    pub fn pending(&self) -> usize {
        self.stealer.len().saturating_add(self.inbox.len())
    }
}
