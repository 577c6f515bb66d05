use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tor_line::{AsyncBoundedLineReader, AsyncBoundedLineResult, DEFAULT_MAX_LINE_BYTES};

use crate::bus::{EventBus, EventKind, Executor, Observer, SubscriptionHandle};
use crate::dispatcher::Dispatcher;
use crate::error::ControlError;
use crate::model::Command;
use crate::parser::ReplyParser;
use crate::queue::{CommandQueue, Job};

type DisconnectCallback = Box<dyn FnOnce(ControlError) + Send + 'static>;

/// Owns the control socket and the reader/writer tasks that drive it. Not
/// reusable once [`Connection::disconnect`] has run — callers get a fresh
/// `Connection` from the runtime on reconnect/restart.
pub struct Connection {
    queue: CommandQueue,
    bus: EventBus,
    closed: Arc<AtomicBool>,
    on_disconnect: Arc<Mutex<Option<DisconnectCallback>>>,
    tasks: Vec<JoinHandle<()>>,
    default_timeout: Duration,
}

impl Connection {
    pub async fn connect_tcp(addr: SocketAddr) -> Result<Self, ControlError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_io(stream, DEFAULT_MAX_LINE_BYTES))
    }

    pub async fn connect_unix(path: impl AsRef<Path>) -> Result<Self, ControlError> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self::from_io(stream, DEFAULT_MAX_LINE_BYTES))
    }

    /// Builds a `Connection` over an arbitrary duplex byte stream. Public so
    /// `tor-runtime` and integration tests can drive the reader/writer/
    /// dispatcher loop over a `tokio::io::duplex` pair standing in for a real
    /// control socket, the same substitution-for-a-subprocess technique used
    /// elsewhere in this workspace's test suites.
    pub fn from_io<S>(stream: S, max_line_bytes: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let queue = CommandQueue::new();
        let bus = EventBus::new();
        let closed = Arc::new(AtomicBool::new(false));
        let on_disconnect: Arc<Mutex<Option<DisconnectCallback>>> = Arc::new(Mutex::new(None));

        let dispatcher = Dispatcher::new(queue.clone(), bus.clone());

        let (refresh_tx, mut refresh_rx) = tokio::sync::mpsc::unbounded_channel();
        bus.set_refresh_channel(refresh_tx);
        let refresh_queue = queue.clone();
        let refresh_bus = bus.clone();
        let refresh_task = tokio::spawn(async move {
            while refresh_rx.recv().await.is_some() {
                // Drain any further coalesced requests so a burst of
                // subscribes issues exactly one SETEVENTS.
                while refresh_rx.try_recv().is_ok() {}
                let mut command = Command::new("SETEVENTS");
                for keyword in refresh_bus.required_events() {
                    command = command.arg(keyword);
                }
                let job = refresh_queue.enqueue(command);
                let _ = job.wait().await;
            }
        });

        let reader_closed = closed.clone();
        let reader_queue = queue.clone();
        let reader_on_disconnect = on_disconnect.clone();
        let reader_task = tokio::spawn(async move {
            let mut reader = AsyncBoundedLineReader::new(read_half, max_line_bytes);
            let mut parser = ReplyParser::new();
            let cause = loop {
                match reader.next_line().await {
                    AsyncBoundedLineResult::Line { bytes, .. } => {
                        debug!(bytes = bytes.len(), "control line received");
                        match parser.feed_line(&bytes) {
                            Ok(Some(unit)) => {
                                if let Err(err) = dispatcher.dispatch(unit) {
                                    break err;
                                }
                            }
                            Ok(None) => {}
                            Err(err) => break err,
                        }
                    }
                    AsyncBoundedLineResult::LineTooLong { observed_bytes, .. } => {
                        warn!(observed_bytes, "oversized control line, treating as protocol error");
                        break ControlError::protocol("line exceeded maximum size");
                    }
                    AsyncBoundedLineResult::IoError { .. } => break ControlError::Io {
                        message: "control socket read failed".to_string(),
                    },
                    AsyncBoundedLineResult::Eof => break ControlError::Closed,
                }
            };
            reader_closed.store(true, Ordering::SeqCst);
            reader_queue.close(cause.clone());
            if let Some(callback) = reader_on_disconnect.lock().unwrap().take() {
                callback(cause);
            }
        });

        let writer_queue = queue.clone();
        let writer_task = tokio::spawn(async move {
            let mut write_half = write_half;
            loop {
                let notified = writer_queue.notified();
                match writer_queue.begin_next() {
                    Some((_, command)) => {
                        let bytes = command.to_wire();
                        if write_half.write_all(&bytes).await.is_err() {
                            return;
                        }
                        if write_half.flush().await.is_err() {
                            return;
                        }
                    }
                    None => notified.await,
                }
            }
        });

        Self {
            queue,
            bus,
            closed,
            on_disconnect,
            tasks: vec![reader_task, writer_task, refresh_task],
            default_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Enqueues `command` and applies the per-command wall-clock timeout: if
    /// it expires, the job fails with `Timeout` and the connection is torn
    /// down (the control protocol gives no way to abort a reply mid-flight).
    pub async fn send(&self, command: Command) -> Result<crate::model::ReplyGroup, ControlError> {
        if self.is_closed() {
            return Err(ControlError::Closed);
        }
        let job = self.queue.enqueue(command);
        match tokio::time::timeout(self.default_timeout, job.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.queue.close(ControlError::Timeout {
                    timeout: self.default_timeout,
                });
                self.closed.store(true, Ordering::SeqCst);
                Err(ControlError::Timeout {
                    timeout: self.default_timeout,
                })
            }
        }
    }

    /// Enqueues `command` without awaiting its reply, for callers that want
    /// to track the [`Job`] (e.g. to cancel it while still queued).
    pub fn enqueue(&self, command: Command) -> Job {
        self.queue.enqueue(command)
    }

    pub fn subscribe(
        &self,
        kind: EventKind,
        executor: Executor,
        observer: Observer,
    ) -> SubscriptionHandle {
        self.bus.subscribe(kind, executor, observer)
    }

    pub fn unsubscribe(&self, kind: EventKind, handle: SubscriptionHandle) {
        self.bus.unsubscribe(kind, handle);
    }

    /// Merges `keywords` into the raw tor event set `SETEVENTS` is refreshed
    /// with; see [`EventBus::require_events`].
    pub fn require_events(&self, keywords: impl IntoIterator<Item = String>) {
        self.bus.require_events(keywords);
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Registers a one-shot callback invoked exactly once when the
    /// connection closes, whether by an explicit [`Connection::disconnect`]
    /// or because the peer closed the socket.
    pub fn on_disconnect(&self, callback: impl FnOnce(ControlError) + Send + 'static) {
        *self.on_disconnect.lock().unwrap() = Some(Box::new(callback));
    }

    /// Called by the runtime's Action Processor when a superseding lifecycle
    /// Action interrupts this connection's command stream (invariant: the
    /// executing job, if any, is left to finish).
    pub fn interrupt_queued(&self) {
        self.queue.interrupt(ControlError::Interrupted);
    }

    pub fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue.close(ControlError::Closed);
        for task in &self.tasks {
            task.abort();
        }
        if let Some(callback) = self.on_disconnect.lock().unwrap().take() {
            callback(ControlError::Closed);
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
