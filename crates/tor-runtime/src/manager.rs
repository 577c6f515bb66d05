//! The Runtime Manager (C10): composes the action processor (C7), state
//! machine (C8), process supervisor (C9), and control connection behind a
//! single facade, keyed by an [`InstanceId`] serialized against the
//! process-wide lock map.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tor_ctl::{
    Command, Config, Connection, ControlError, EventKind, Executor, Job, NetworkState, Observer,
    SubscriptionHandle,
};

use crate::action::{ActionJob, ActionKind, ActionQueue};
use crate::auth::negotiate_authentication;
use crate::config::{build_argv, ControlPortSpec, HostPaths, ResourceProvider, SocksPortSpec};
use crate::error::RuntimeError;
use crate::lock_map::{self, InstanceId};
use crate::port_file::{control_port_file_path, read_control_endpoint, ControlEndpoint};
use crate::state::StateMachine;
use crate::supervisor::ProcessSupervisor;

/// Host-level facts a caller can read off a running (or not-yet-started)
/// manager: paths and the instance identity, per §4.10's `environment()`.
#[derive(Debug, Clone)]
pub struct Environment {
    pub instance_id: InstanceId,
    pub binary: PathBuf,
}

struct Shared {
    instance_id: InstanceId,
    binary: PathBuf,
    resource_provider: Arc<dyn ResourceProvider>,
    control_port: ControlPortSpec,
    socks_port: SocksPortSpec,
    command_timeout: Duration,
    take_ownership: bool,
    default_executors: HashMap<EventKind, Executor>,
    bus: tor_ctl::EventBus,
    state: Arc<StateMachine>,
    connection: AsyncMutex<Option<Connection>>,
    supervisor: AsyncMutex<Option<ProcessSupervisor>>,
    instance_lock: Arc<tokio::sync::Mutex<()>>,
    destroyed: AtomicBool,
}

/// Composes the control protocol engine and the lifecycle supervisor behind
/// one facade. Construct via [`crate::RuntimeManagerBuilder`].
pub struct RuntimeManager {
    shared: Arc<Shared>,
    action_queue: ActionQueue,
    driver: JoinHandle<()>,
}

impl RuntimeManager {
    pub(crate) fn new(
        instance_id: InstanceId,
        binary: PathBuf,
        resource_provider: Arc<dyn ResourceProvider>,
        control_port: ControlPortSpec,
        socks_port: SocksPortSpec,
        command_timeout: Duration,
        take_ownership: bool,
        default_executors: HashMap<EventKind, Executor>,
    ) -> Self {
        let bus = tor_ctl::EventBus::new();
        let state = Arc::new(StateMachine::new(bus.clone()));
        let instance_lock = lock_map::lock_for(&instance_id);

        let shared = Arc::new(Shared {
            instance_id,
            binary,
            resource_provider,
            control_port,
            socks_port,
            command_timeout,
            take_ownership,
            default_executors,
            bus,
            state,
            connection: AsyncMutex::new(None),
            supervisor: AsyncMutex::new(None),
            instance_lock,
            destroyed: AtomicBool::new(false),
        });

        let action_queue = ActionQueue::new();
        let driver = spawn_driver(shared.clone(), action_queue.clone());

        Self {
            shared,
            action_queue,
            driver,
        }
    }

    /// Submits a lifecycle action; see §4.7 for precedence/coalescing rules.
    pub fn enqueue_action(&self, action: ActionKind) -> Result<ActionJob, RuntimeError> {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Destroyed);
        }
        Ok(self.action_queue.enqueue(action))
    }

    /// Submits a control-protocol command to the current connection, if any.
    pub async fn enqueue_command(&self, command: Command) -> Result<Job, RuntimeError> {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            return Err(RuntimeError::Destroyed);
        }
        let guard = self.shared.connection.lock().await;
        match guard.as_ref() {
            Some(connection) => Ok(connection.enqueue(command)),
            None => Err(RuntimeError::Control(ControlError::Closed)),
        }
    }

    pub fn subscribe(&self, kind: EventKind, executor: Executor, observer: Observer) -> SubscriptionHandle {
        self.shared.bus.subscribe(kind, executor, observer)
    }

    /// Subscribes `observer` to `kind` on the [`RuntimeManagerBuilder`]'s
    /// configured default executor for that kind, falling back to
    /// `Background` if none was set.
    pub fn subscribe_default(&self, kind: EventKind, observer: Observer) -> SubscriptionHandle {
        let executor = self
            .shared
            .default_executors
            .get(&kind)
            .copied()
            .unwrap_or(Executor::Background);
        self.shared.bus.subscribe(kind, executor, observer)
    }

    pub fn unsubscribe(&self, kind: EventKind, handle: SubscriptionHandle) {
        self.shared.bus.unsubscribe(kind, handle);
    }

    pub fn state(&self) -> tor_ctl::RuntimeState {
        self.shared.state.current()
    }

    pub fn addresses(&self) -> tor_ctl::AddressInfo {
        self.shared.state.addresses()
    }

    pub fn environment(&self) -> Environment {
        Environment {
            instance_id: self.shared.instance_id.clone(),
            binary: self.shared.binary.clone(),
        }
    }

    pub async fn pid(&self) -> Option<u32> {
        self.shared.supervisor.lock().await.as_ref().map(|s| s.pid())
    }

    /// Irreversibly shuts the runtime down: fails every non-terminal Job with
    /// `Destroyed`, tears down the connection and process, and releases this
    /// instance's slot in the process-wide lock map.
    pub async fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.action_queue.close();
        self.driver.abort();

        if let Some(connection) = self.shared.connection.lock().await.take() {
            connection.disconnect();
        }
        if let Some(supervisor) = self.shared.supervisor.lock().await.take() {
            let _ = supervisor.terminate().await;
        }
        lock_map::release(&self.shared.instance_id);
    }
}

impl Drop for RuntimeManager {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

fn spawn_driver(shared: Arc<Shared>, action_queue: ActionQueue) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let notified = action_queue.notified();
            match action_queue.begin_next() {
                Some((id, action)) => {
                    let result = run_action(&shared, action).await;
                    if let Err(err) = &result {
                        error!(?err, "lifecycle action failed");
                    }
                    action_queue.complete_current(id, result);
                }
                None => notified.await,
            }
        }
    })
}

async fn run_action(shared: &Arc<Shared>, action: ActionKind) -> Result<(), RuntimeError> {
    let _guard = shared.instance_lock.clone().lock_owned().await;
    match action {
        ActionKind::StartDaemon(config) => run_start(shared, config).await,
        ActionKind::StopDaemon => run_stop(shared).await,
        ActionKind::RestartDaemon(config) => {
            if !shared.state.current().daemon.is_off() {
                run_stop(shared).await?;
            }
            run_start(shared, config).await
        }
    }
}

async fn run_start(shared: &Arc<Shared>, config: Config) -> Result<(), RuntimeError> {
    if shared.state.current().daemon.is_on() {
        return Ok(());
    }
    shared.state.mark_starting();

    // (1) resource installation
    let paths: HostPaths = shared.resource_provider.install()?;

    // (2)+(3) argv construction and process spawn
    let owning_pid = std::process::id();
    let port_file = control_port_file_path(&paths.data_directory);
    crate::port_file::clear_stale(&port_file).map_err(|source| RuntimeError::Config {
        detail: format!("could not clear stale control port file {}: {source}", port_file.display()),
    })?;
    let argv = build_argv(&paths, &shared.control_port, &shared.socks_port, &port_file, owning_pid);
    let supervisor = ProcessSupervisor::spawn(&shared.binary, argv, shared.bus.clone(), shared.state.clone()).await?;
    let pid = supervisor.pid();
    info!(pid, "tor process spawned");

    // (4) wait for the control port to be announced, then connect and authenticate
    let endpoint = tokio::select! {
        result = read_control_endpoint(&port_file) => result?,
        _ = supervisor.wait_for_exit() => {
            return Err(RuntimeError::ExitedBeforeReady { code: None });
        }
    };

    let connection = match endpoint {
        ControlEndpoint::Tcp(addr) => Connection::connect_tcp(addr).await?,
        ControlEndpoint::Unix(path) => Connection::connect_unix(path).await?,
    };
    let connection = connection.with_default_timeout(shared.command_timeout);

    let cookie_path = crate::config::cookie_auth_path(&paths.data_directory);
    negotiate_authentication(&connection, &cookie_path).await?;

    *shared.supervisor.lock().await = Some(supervisor);
    *shared.connection.lock().await = Some(connection);

    // (5) the rest of the startup sequence continues independently of the
    // Action's completion (it only bears on bootstrap, which is observable
    // via state).
    spawn_post_auth_sequence(shared.clone(), config);

    Ok(())
}

fn spawn_post_auth_sequence(shared: Arc<Shared>, config: Config) {
    tokio::spawn(async move {
        let guard = shared.connection.lock().await;
        let Some(connection) = guard.as_ref() else { return };

        connection.require_events([
            "STATUS_CLIENT".to_string(),
            "NETWORK_LIVENESS".to_string(),
            "CONF_CHANGED".to_string(),
        ]);

        // Internal state stitching: runs on the Immediate executor per §5,
        // since no user code should observe a half-applied state transition.
        let stitch_state = shared.state.clone();
        connection.subscribe(
            EventKind::Control,
            Executor::Immediate,
            Arc::new(move |event| {
                let tor_ctl::BusEvent::Control(record) = event else {
                    return;
                };
                if let Some(pct) = crate::control_events::bootstrap_from_status_client(&record) {
                    stitch_state.on_bootstrap(pct);
                }
                if let Some(network) = crate::control_events::network_state_from_liveness(&record) {
                    stitch_state.on_network(network);
                }
            }),
        );

        if shared.take_ownership {
            if let Err(err) = connection.send(Command::new("TAKEOWNERSHIP")).await {
                warn!(?err, "TAKEOWNERSHIP failed");
            }
        }

        // (5) settings that cannot be given on the command line are written
        // here, one SETCONF per Setting.
        for setting in config.settings() {
            let mut command = Command::new("SETCONF");
            if setting.arguments.is_empty() {
                command = command.arg(setting.keyword.clone());
            } else {
                for value in &setting.arguments {
                    command = command.arg(format!("{}={}", setting.keyword, value));
                }
            }
            if let Err(err) = connection.send(command).await {
                warn!(?err, keyword = %setting.keyword, "SETCONF failed");
            }
        }

        match connection
            .send(Command::new("SETCONF").arg("DisableNetwork=0"))
            .await
        {
            Ok(_) => shared.state.on_network(NetworkState::Enabled),
            Err(err) => warn!(?err, "failed to clear DisableNetwork"),
        }
    });
}

async fn run_stop(shared: &Arc<Shared>) -> Result<(), RuntimeError> {
    if shared.state.current().daemon.is_off() {
        return Ok(());
    }
    shared.state.mark_stopping();

    let connection = shared.connection.lock().await.take();
    // Per §4.7: SHUTDOWN via control if connected, otherwise terminate
    // directly. A successful SHUTDOWN is not force-killed — it's a graceful
    // request, so the process is simply awaited below.
    let mut force_terminate = true;
    if let Some(connection) = connection {
        // §4.4: a superseding Action interrupts the connection's still-
        // queued commands (not the one already executing, which is left to
        // finish) before SHUTDOWN jumps the queue.
        connection.interrupt_queued();
        match connection.send(Command::new("SIGNAL").arg("SHUTDOWN")).await {
            Ok(_) => force_terminate = false,
            Err(err) => warn!(?err, "SIGNAL SHUTDOWN failed, terminating process directly"),
        }
        connection.disconnect();
    }

    let supervisor = shared.supervisor.lock().await.take();
    if let Some(supervisor) = supervisor {
        if force_terminate && !supervisor.has_exited() {
            let _ = supervisor.terminate().await;
        }
        supervisor.wait_for_exit().await;
    }

    shared.state.mark_off();
    Ok(())
}
