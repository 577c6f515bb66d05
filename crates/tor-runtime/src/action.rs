//! The Action Processor (C7): a FIFO queue of lifecycle actions
//! (start/stop/restart) with the single-in-flight discipline from
//! [`tor_ctl::queue::CommandQueue`], plus the precedence and coalescing rules
//! §4.7 layers on top of it:
//!
//! - a `StopDaemon` enqueued while a `StartDaemon`/`RestartDaemon` is
//!   executing interrupts it and jumps the pending queue;
//! - a `StopDaemon` enqueued while another is already pending or executing
//!   coalesces onto it as a child, rather than running twice;
//! - a `StartDaemon`/`RestartDaemon` enqueued while a `StopDaemon` is
//!   executing is failed immediately rather than queued.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, Notify};

use tor_ctl::{Config, JobStatus};

use crate::error::RuntimeError;

/// One lifecycle action the Runtime Manager can be asked to perform.
/// `StartDaemon`/`RestartDaemon` carry the [`Config`] to apply via `SETCONF`
/// during the post-auth sequence, per §4.7 step (5).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ActionKind {
    StartDaemon(Config),
    StopDaemon,
    RestartDaemon(Config),
}

impl ActionKind {
    fn is_start_like(&self) -> bool {
        matches!(self, Self::StartDaemon(_) | Self::RestartDaemon(_))
    }
}

type ActionTx = oneshot::Sender<Result<(), RuntimeError>>;
type ActionRx = oneshot::Receiver<Result<(), RuntimeError>>;

/// A handle to a submitted [`ActionKind`]. Resolves exactly once, via
/// [`ActionJob::wait`].
pub struct ActionJob {
    id: u64,
    status: Arc<Mutex<JobStatus>>,
    reply_rx: Option<ActionRx>,
    queue: ActionQueue,
}

impl ActionJob {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    pub fn cancel(&self) -> bool {
        self.queue.cancel(self.id)
    }

    pub async fn wait(mut self) -> Result<(), RuntimeError> {
        match self.reply_rx.take().expect("wait called once").await {
            Ok(result) => result,
            Err(_) => Err(RuntimeError::Destroyed),
        }
    }
}

struct Inner {
    next_id: u64,
    pending: VecDeque<(u64, ActionKind)>,
    reply_txs: HashMap<u64, ActionTx>,
    statuses: HashMap<u64, Arc<Mutex<JobStatus>>>,
    /// Children coalesced onto a pending or executing `StopDaemon`, keyed by
    /// that job's id; they resolve with the same result it does.
    stop_children: HashMap<u64, Vec<u64>>,
    current: Option<(u64, ActionKind)>,
}

impl Inner {
    fn pending_stop_leader(&self) -> Option<u64> {
        if let Some((id, ActionKind::StopDaemon)) = &self.current {
            return Some(*id);
        }
        self.pending
            .iter()
            .find(|(_, kind)| *kind == ActionKind::StopDaemon)
            .map(|(id, _)| *id)
    }

    fn resolve(&mut self, id: u64, result: Result<(), RuntimeError>, terminal: JobStatus) {
        if let Some(status) = self.statuses.remove(&id) {
            *status.lock().unwrap() = terminal;
        }
        if let Some(tx) = self.reply_txs.remove(&id) {
            let _ = tx.send(result.clone());
        }
        if let Some(children) = self.stop_children.remove(&id) {
            for child in children {
                if let Some(status) = self.statuses.remove(&child) {
                    *status.lock().unwrap() = terminal;
                }
                if let Some(tx) = self.reply_txs.remove(&child) {
                    let _ = tx.send(result.clone());
                }
            }
        }
    }
}

/// FIFO queue of lifecycle [`ActionKind`]s for one Runtime Manager instance,
/// with the precedence/coalescing rules from §4.7 applied at enqueue time.
#[derive(Clone)]
pub struct ActionQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                pending: VecDeque::new(),
                reply_txs: HashMap::new(),
                statuses: HashMap::new(),
                stop_children: HashMap::new(),
                current: None,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn notified(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.notify.notified()
    }

    fn next_job(&self, inner: &mut Inner, id: u64) -> ActionJob {
        let status = Arc::new(Mutex::new(JobStatus::Queued));
        let (tx, rx) = oneshot::channel();
        inner.reply_txs.insert(id, tx);
        inner.statuses.insert(id, status.clone());
        ActionJob {
            id,
            status,
            reply_rx: Some(rx),
            queue: self.clone(),
        }
    }

    /// Submits `action`, applying §4.7's precedence and coalescing rules.
    pub fn enqueue(&self, action: ActionKind) -> ActionJob {
        let mut inner = self.inner.lock().unwrap();

        if action == ActionKind::StopDaemon {
            if let Some(leader) = inner.pending_stop_leader() {
                let id = inner.next_id;
                inner.next_id += 1;
                let job = self.next_job(&mut inner, id);
                inner.stop_children.entry(leader).or_default().push(id);
                drop(inner);
                return job;
            }
        }

        if action.is_start_like() {
            if let Some((_, ActionKind::StopDaemon)) = &inner.current {
                let id = inner.next_id;
                inner.next_id += 1;
                let status = Arc::new(Mutex::new(JobStatus::Error));
                let (tx, rx) = oneshot::channel();
                let _ = tx.send(Err(RuntimeError::Interrupted));
                inner.statuses.insert(id, status.clone());
                drop(inner);
                return ActionJob {
                    id,
                    status,
                    reply_rx: Some(rx),
                    queue: self.clone(),
                };
            }
        }

        let id = inner.next_id;
        inner.next_id += 1;
        let job = self.next_job(&mut inner, id);

        if action == ActionKind::StopDaemon {
            let executing_interrupt = match &inner.current {
                Some((executing_id, kind)) if kind.is_start_like() => Some(*executing_id),
                _ => None,
            };
            if let Some(executing_id) = executing_interrupt {
                inner.resolve(executing_id, Err(RuntimeError::Interrupted), JobStatus::Error);
                inner.current = None;
            }
            inner.pending.push_front((id, action));
        } else {
            inner.pending.push_back((id, action));
        }

        drop(inner);
        self.notify.notify_one();
        job
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
            let _ = tx.send(Err(RuntimeError::Interrupted));
        }
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Pops the next queued action if nothing is currently executing.
    pub fn begin_next(&self) -> Option<(u64, ActionKind)> {
        let mut inner = self.inner.lock().unwrap();
        if inner.current.is_some() {
            return None;
        }
        let (id, action) = inner.pending.pop_front()?;
        if let Some(status) = inner.statuses.get(&id) {
            *status.lock().unwrap() = JobStatus::Executing;
        }
        inner.current = Some((id, action.clone()));
        Some((id, action))
    }

    pub fn current(&self) -> Option<(u64, ActionKind)> {
        self.inner.lock().unwrap().current.clone()
    }

    pub fn complete_current(&self, id: u64, result: Result<(), RuntimeError>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.current.as_ref().map(|(cid, _)| *cid) != Some(id) {
            return;
        }
        inner.current = None;
        let terminal = if result.is_ok() { JobStatus::Success } else { JobStatus::Error };
        inner.resolve(id, result, terminal);
        drop(inner);
        self.notify.notify_one();
    }

    /// Fails every queued and executing action with [`RuntimeError::Destroyed`].
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner.current.take() {
            inner.resolve(id, Err(RuntimeError::Destroyed), JobStatus::Error);
        }
        let drained: Vec<(u64, ActionKind)> = inner.pending.drain(..).collect();
        for (id, _) in drained {
            inner.resolve(id, Err(RuntimeError::Destroyed), JobStatus::Cancelled);
        }
        drop(inner);
        self.notify.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_single_in_flight() {
        let queue = ActionQueue::new();
        let start = queue.enqueue(ActionKind::StartDaemon(Config::new()));
        let restart = queue.enqueue(ActionKind::RestartDaemon(Config::new()));
        assert_eq!(start.status(), JobStatus::Queued);

        let (id, _) = queue.begin_next().unwrap();
        assert!(queue.begin_next().is_none());
        queue.complete_current(id, Ok(()));
        assert!(start.wait().await.is_ok());

        let (id, _) = queue.begin_next().unwrap();
        queue.complete_current(id, Ok(()));
        assert!(restart.wait().await.is_ok());
    }

    #[tokio::test]
    async fn stop_interrupts_executing_start_and_jumps_the_queue() {
        let queue = ActionQueue::new();
        let start = queue.enqueue(ActionKind::StartDaemon(Config::new()));
        let (start_id, _) = queue.begin_next().unwrap();
        assert_eq!(start.status(), JobStatus::Executing);

        let also_queued_restart = queue.enqueue(ActionKind::RestartDaemon(Config::new()));
        let stop = queue.enqueue(ActionKind::StopDaemon);

        assert!(matches!(start.wait().await, Err(RuntimeError::Interrupted)));
        // the executing slot was cleared by the interrupt, so the jumped
        // Stop is immediately available.
        let (next_id, next_kind) = queue.begin_next().unwrap();
        assert_ne!(next_id, start_id);
        assert_eq!(next_kind, ActionKind::StopDaemon);
        queue.complete_current(next_id, Ok(()));
        assert!(stop.wait().await.is_ok());

        let (restart_id, restart_kind) = queue.begin_next().unwrap();
        assert_eq!(restart_kind, ActionKind::RestartDaemon(Config::new()));
        queue.complete_current(restart_id, Ok(()));
        assert!(also_queued_restart.wait().await.is_ok());
    }

    #[tokio::test]
    async fn additional_stops_coalesce_onto_the_pending_one() {
        let queue = ActionQueue::new();
        let first_stop = queue.enqueue(ActionKind::StopDaemon);
        let second_stop = queue.enqueue(ActionKind::StopDaemon);

        let (id, kind) = queue.begin_next().unwrap();
        assert_eq!(kind, ActionKind::StopDaemon);
        assert!(queue.begin_next().is_none(), "second stop did not enqueue separately");

        queue.complete_current(id, Ok(()));
        assert!(first_stop.wait().await.is_ok());
        assert!(second_stop.wait().await.is_ok());
    }

    #[tokio::test]
    async fn start_enqueued_during_executing_stop_is_interrupted_immediately() {
        let queue = ActionQueue::new();
        queue.enqueue(ActionKind::StopDaemon);
        queue.begin_next().unwrap();

        let start = queue.enqueue(ActionKind::StartDaemon(Config::new()));
        assert!(matches!(start.wait().await, Err(RuntimeError::Interrupted)));
    }

    #[tokio::test]
    async fn close_fails_queued_and_executing_actions() {
        let queue = ActionQueue::new();
        let executing = queue.enqueue(ActionKind::StartDaemon(Config::new()));
        let queued = queue.enqueue(ActionKind::RestartDaemon(Config::new()));
        queue.begin_next().unwrap();

        queue.close();
        assert!(matches!(executing.wait().await, Err(RuntimeError::Destroyed)));
        assert!(matches!(queued.wait().await, Err(RuntimeError::Destroyed)));
    }
}
