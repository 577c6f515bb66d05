use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};

use crate::error::ControlError;
use crate::model::{Command, ReplyGroup};

/// Lifecycle of a [`Job`]. `Queued -> Cancelled` and
/// `Queued -> Executing -> {Success, Error}` are the only valid paths; once a
/// job reaches a terminal state it never transitions again.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum JobStatus {
    Queued,
    Executing,
    Success,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Cancelled)
    }
}

type ReplyTx = oneshot::Sender<Result<ReplyGroup, ControlError>>;
type ReplyRx = oneshot::Receiver<Result<ReplyGroup, ControlError>>;

/// A handle to a submitted [`Command`]. Resolves exactly once, via
/// [`Job::wait`], to either a successful [`ReplyGroup`] or a
/// [`ControlError`]. Can be polled for its current [`JobStatus`] without
/// consuming it, and cancelled while still `Queued`.
pub struct Job {
    id: u64,
    status: Arc<Mutex<JobStatus>>,
    reply_rx: Option<ReplyRx>,
    queue: CommandQueue,
}

impl Job {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    /// Cancels this job. Only effective while still `Queued`; a no-op (returns
    /// `false`) once dispatch has begun.
    pub fn cancel(&self) -> bool {
        self.queue.cancel(self.id)
    }

    /// Consumes the handle, waiting for the job's terminal outcome.
    pub async fn wait(mut self) -> Result<ReplyGroup, ControlError> {
        match self.reply_rx.take().expect("wait called once").await {
            Ok(result) => result,
            Err(_) => Err(ControlError::Closed),
        }
    }
}

struct Inner {
    next_id: u64,
    pending: VecDeque<(u64, Command)>,
    reply_txs: HashMap<u64, ReplyTx>,
    statuses: HashMap<u64, Arc<Mutex<JobStatus>>>,
    current: Option<u64>,
}

/// FIFO queue of in-flight [`Command`]s for one [`crate::Connection`], with a
/// single-slot "currently executing" discipline (invariant i: at most one
/// `Executing` job per connection).
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                pending: VecDeque::new(),
                reply_txs: HashMap::new(),
                statuses: HashMap::new(),
                current: None,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Resolves whenever the queue's state changes in a way that might let
    /// the writer task make progress (a new command enqueued, or the
    /// in-flight slot freed up). Callers must obtain this future *before*
    /// re-checking the condition they're waiting on, per `Notify`'s
    /// single-permit-is-remembered guarantee for `notify_one`.
    pub fn notified(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.notify.notified()
    }

    pub fn enqueue(&self, command: Command) -> Job {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        let status = Arc::new(Mutex::new(JobStatus::Queued));
        let (tx, rx) = oneshot::channel();
        inner.pending.push_back((id, command));
        inner.reply_txs.insert(id, tx);
        inner.statuses.insert(id, status.clone());
        drop(inner);
        self.notify.notify_one();
        Job {
            id,
            status,
            reply_rx: Some(rx),
            queue: self.clone(),
        }
    }

    fn cancel(&self, job_id: u64) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(pos) = inner.pending.iter().position(|(id, _)| *id == job_id) else {
            return false;
        };
        inner.pending.remove(pos);
        if let Some(status) = inner.statuses.remove(&job_id) {
            *status.lock().unwrap() = JobStatus::Cancelled;
        }
        if let Some(tx) = inner.reply_txs.remove(&job_id) {
            let _ = tx.send(Err(ControlError::Cancelled));
        }
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Pops the next queued command if nothing is currently executing,
    /// marking it `Executing`. Called by the connection's writer task.
    pub fn begin_next(&self) -> Option<(u64, Command)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.current.is_some() {
            return None;
        }
        let (id, command) = inner.pending.pop_front()?;
        if let Some(status) = inner.statuses.get(&id) {
            *status.lock().unwrap() = JobStatus::Executing;
        }
        inner.current = Some(id);
        Some((id, command))
    }

    pub fn current(&self) -> Option<u64> {
        self.inner.lock().unwrap().current
    }

    /// Completes the currently-executing job with `result`, clearing the
    /// in-flight slot so the next command can be dispatched.
    pub fn complete_current(&self, result: Result<ReplyGroup, ControlError>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(id) = inner.current.take() else {
            return;
        };
        let terminal = if result.is_ok() {
            JobStatus::Success
        } else {
            JobStatus::Error
        };
        if let Some(status) = inner.statuses.remove(&id) {
            *status.lock().unwrap() = terminal;
        }
        if let Some(tx) = inner.reply_txs.remove(&id) {
            let _ = tx.send(result);
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Fails every still-`Queued` job with `cause`, leaving any `Executing`
    /// job untouched. Used when a superseding lifecycle Action interrupts
    /// this connection's command stream.
    pub fn interrupt(&self, cause: ControlError) {
        let mut inner = self.inner.lock().unwrap();
        let drained: Vec<(u64, Command)> = inner.pending.drain(..).collect();
        for (id, _) in drained {
            if let Some(status) = inner.statuses.remove(&id) {
                *status.lock().unwrap() = JobStatus::Error;
            }
            if let Some(tx) = inner.reply_txs.remove(&id) {
                let _ = tx.send(Err(cause.clone()));
            }
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Tears the queue down: fails the executing job (if any) with `cause`
    /// and cancels every queued job.
    pub fn close(&self, cause: ControlError) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(id) = inner.current.take() {
            if let Some(status) = inner.statuses.remove(&id) {
                *status.lock().unwrap() = JobStatus::Error;
            }
            if let Some(tx) = inner.reply_txs.remove(&id) {
                let _ = tx.send(Err(cause.clone()));
            }
        }
        let drained: Vec<(u64, Command)> = inner.pending.drain(..).collect();
        for (id, _) in drained {
            if let Some(status) = inner.statuses.remove(&id) {
                *status.lock().unwrap() = JobStatus::Cancelled;
            }
            if let Some(tx) = inner.reply_txs.remove(&id) {
                let _ = tx.send(Err(ControlError::Cancelled));
            }
        }
        drop(inner);
        self.notify.notify_one();
    }
}
