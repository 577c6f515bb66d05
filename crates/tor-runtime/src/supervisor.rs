//! Process Supervisor (C9): spawns tor, drains stdout/stderr line by line
//! classifying each into a [`tor_ctl::LogLine`] and feeding bootstrap/listener
//! notices to the [`StateMachine`], and observes process exit.

use std::ffi::OsString;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use tor_line::AsyncBoundedLineReader;
use tor_ctl::{BusEvent, EventBus, EventKind, LifecycleEvent, LogLevel, LogLine};

use crate::error::RuntimeError;
use crate::log_classify::{
    classify_stderr_line, classify_stdout_line, parse_bootstrap_percent, parse_listener_notice,
    LogSeverity, ListenerNotice,
};
use crate::state::StateMachine;

fn to_log_level(severity: LogSeverity) -> LogLevel {
    match severity {
        LogSeverity::Debug => LogLevel::Debug,
        LogSeverity::Info => LogLevel::Info,
        LogSeverity::Warn => LogLevel::Warn,
        LogSeverity::Error => LogLevel::Error,
    }
}

/// Spawns the tor binary with a retry for the transient "text file busy"
/// condition seen right after extracting a freshly-installed binary,
/// mirroring the retry this workspace's other process-spawning crates use.
fn spawn_with_retry(command: &mut Command, binary: &Path) -> Result<Child, RuntimeError> {
    let mut backoff = Duration::from_millis(2);
    for attempt in 0..5 {
        match command.spawn() {
            Ok(child) => return Ok(child),
            Err(source) => {
                let is_busy = matches!(source.kind(), std::io::ErrorKind::ExecutableFileBusy)
                    || source.raw_os_error() == Some(26);
                if is_busy && attempt < 4 {
                    std::thread::sleep(backoff);
                    backoff = std::cmp::min(backoff * 2, Duration::from_millis(50));
                    continue;
                }
                return Err(RuntimeError::Spawn {
                    binary: binary.to_path_buf(),
                    message: source.to_string(),
                });
            }
        }
    }
    unreachable!("spawn_with_retry should return before exhausting retries")
}

/// Owns the tor child process and the tasks draining its stdout/stderr and
/// awaiting its exit. Scoped to the process's lifetime (§3's `Process`
/// lifecycle): dropping it aborts the drain/exit tasks and kills the child.
pub struct ProcessSupervisor {
    child: Arc<AsyncMutex<Child>>,
    tasks: Vec<JoinHandle<()>>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
    pid: u32,
}

impl ProcessSupervisor {
    pub async fn spawn(
        binary: &Path,
        argv: Vec<OsString>,
        bus: EventBus,
        state: Arc<StateMachine>,
    ) -> Result<Self, RuntimeError> {
        let mut command = Command::new(binary);
        command
            .args(&argv)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = spawn_with_retry(&mut command, binary)?;
        let pid = child.id().unwrap_or(0);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RuntimeError::ProcessIo { message: "tor stdout pipe unavailable".into() })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RuntimeError::ProcessIo { message: "tor stderr pipe unavailable".into() })?;

        bus.publish(
            EventKind::Lifecycle,
            BusEvent::Lifecycle(LifecycleEvent::ProcessSpawned { pid }),
        );

        let stdout_bus = bus.clone();
        let stdout_state = state.clone();
        let stdout_task = tokio::spawn(async move {
            let mut reader = AsyncBoundedLineReader::new(stdout, tor_line::DEFAULT_MAX_LINE_BYTES);
            loop {
                use tor_line::AsyncBoundedLineResult as R;
                match reader.next_line().await {
                    R::Line { bytes, .. } => {
                        let line = String::from_utf8_lossy(&bytes).into_owned();
                        handle_stdout_line(&line, &stdout_bus, &stdout_state);
                    }
                    R::LineTooLong { observed_bytes, .. } => {
                        warn!(observed_bytes, "oversized tor stdout line, discarding");
                    }
                    R::IoError { .. } => break,
                    R::Eof => break,
                }
            }
        });

        let stderr_bus = bus.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = AsyncBoundedLineReader::new(stderr, tor_line::DEFAULT_MAX_LINE_BYTES);
            loop {
                use tor_line::AsyncBoundedLineResult as R;
                match reader.next_line().await {
                    R::Line { bytes, .. } => {
                        let line = String::from_utf8_lossy(&bytes).into_owned();
                        let level = to_log_level(classify_stderr_line(&line));
                        stderr_bus.publish(
                            EventKind::Log,
                            BusEvent::Log(LogLine {
                                level,
                                text: line.into(),
                            }),
                        );
                    }
                    R::LineTooLong { observed_bytes, .. } => {
                        warn!(observed_bytes, "oversized tor stderr line, discarding");
                    }
                    R::IoError { .. } => break,
                    R::Eof => break,
                }
            }
        });

        let child = Arc::new(AsyncMutex::new(child));
        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());

        let exit_child = child.clone();
        let exit_bus = bus.clone();
        let exit_state = state;
        let exit_flag = exited.clone();
        let exit_signal = exit_notify.clone();
        let exit_task = tokio::spawn(async move {
            let status = exit_child.lock().await.wait().await;
            let code = status.ok().and_then(|s| s.code());
            debug!(?code, "tor process exited");
            exit_bus.publish(
                EventKind::Lifecycle,
                BusEvent::Lifecycle(LifecycleEvent::ProcessExited { code }),
            );
            // The daemon only stays Stopping if StopDaemon is what triggered
            // the exit; an unexpected exit while On/Starting also resolves
            // to Off, per §4.9.
            exit_state.mark_off();
            exit_flag.store(true, Ordering::SeqCst);
            exit_signal.notify_waiters();
        });

        Ok(Self {
            child,
            tasks: vec![stdout_task, stderr_task, exit_task],
            exited,
            exit_notify,
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Sends a kill signal and returns immediately; pair with
    /// [`Self::wait_for_exit`] to observe completion.
    pub async fn terminate(&self) -> Result<(), RuntimeError> {
        if self.exited.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.child
            .lock()
            .await
            .start_kill()
            .map_err(|source| RuntimeError::ProcessIo { message: source.to_string() })
    }

    pub async fn wait_for_exit(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        self.exit_notify.notified().await;
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn handle_stdout_line(line: &str, bus: &EventBus, state: &StateMachine) {
    let severity = classify_stdout_line(line);
    bus.publish(
        EventKind::Log,
        BusEvent::Log(LogLine {
            level: to_log_level(severity),
            text: line.into(),
        }),
    );

    if let Some(pct) = parse_bootstrap_percent(line) {
        state.on_bootstrap(pct);
    }
    match parse_listener_notice(line) {
        Some(ListenerNotice::Opened { kind, address }) => state.on_listener_opened(kind, address),
        Some(ListenerNotice::Closing { kind, address }) => {
            state.on_listener_closed(kind, &address)
        }
        None => {}
    }
}
