//! Chained-setter builder for [`crate::RuntimeManager`], mirroring this
//! workspace's client builders: every setter takes `self` by value and
//! returns `Self`, defaults live in one place, and `build()` does the one-time
//! validation instead of scattering `Option` checks through the facade.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tor_ctl::{Executor, EventKind};

use crate::config::{
    default_binary_path, ControlPortSpec, DefaultResourceProvider, HostPaths, ResourceProvider,
    SocksPortSpec,
};
use crate::error::RuntimeError;
use crate::lock_map::InstanceId;
use crate::manager::RuntimeManager;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Host-level configuration for one [`crate::RuntimeManager`]. The tor
/// protocol configuration itself (`Config`/`Setting`) is not set here — it is
/// supplied separately on each `ActionKind::StartDaemon`/`RestartDaemon`
/// value passed to `enqueue_action`, and applied via `SETCONF` once that
/// action reaches its post-auth sequence.
pub struct RuntimeManagerBuilder {
    binary: PathBuf,
    data_directory: Option<PathBuf>,
    cache_directory: Option<PathBuf>,
    geoip_file: Option<PathBuf>,
    geoip6_file: Option<PathBuf>,
    control_port: ControlPortSpec,
    socks_port: SocksPortSpec,
    command_timeout: Duration,
    take_ownership: bool,
    executors: HashMap<EventKind, Executor>,
    instance_id: Option<String>,
    resource_provider: Option<Arc<dyn ResourceProvider>>,
}

impl Default for RuntimeManagerBuilder {
    fn default() -> Self {
        Self {
            binary: default_binary_path(),
            data_directory: None,
            cache_directory: None,
            geoip_file: None,
            geoip6_file: None,
            control_port: ControlPortSpec::Auto,
            socks_port: SocksPortSpec::Auto,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            take_ownership: true,
            executors: HashMap::new(),
            instance_id: None,
            resource_provider: None,
        }
    }
}

impl RuntimeManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the path to the tor binary. Defaults to `TOR_BINARY` when present,
    /// else bare `tor` resolved against `PATH` at spawn time.
    pub fn binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn data_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_directory = Some(dir.into());
        self
    }

    pub fn cache_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_directory = Some(dir.into());
        self
    }

    pub fn geoip_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.geoip_file = Some(path.into());
        self
    }

    pub fn geoip6_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.geoip6_file = Some(path.into());
        self
    }

    pub fn control_port(mut self, spec: ControlPortSpec) -> Self {
        self.control_port = spec;
        self
    }

    pub fn socks_port(mut self, spec: SocksPortSpec) -> Self {
        self.socks_port = spec;
        self
    }

    /// Overrides the per-command wall-clock timeout. Defaults to 30 seconds.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Whether `StartDaemon`'s step 5 should issue `TAKEOWNERSHIP`. Defaults
    /// to `true`: `--__OwningControllerProcess` is always passed, so tor will
    /// exit if this process dies unless ownership is explicitly disclaimed.
    pub fn take_ownership(mut self, enabled: bool) -> Self {
        self.take_ownership = enabled;
        self
    }

    /// Overrides the [`Executor`] a given [`EventKind`]'s subscribers run on
    /// by default. Individual `subscribe` calls may still override this
    /// per-call; this only sets the manager's recommended default.
    pub fn default_executor(mut self, kind: EventKind, executor: Executor) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    /// Sets the opaque [`InstanceId`] this manager serializes lifecycle
    /// operations under. Defaults to the data directory's path, so two
    /// managers pointed at the same directory automatically serialize.
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Overrides how `HostPaths` are installed before the first spawn.
    /// Defaults to [`DefaultResourceProvider`] (create data/cache dirs,
    /// require the geoip files to already exist).
    pub fn resource_provider(mut self, provider: Arc<dyn ResourceProvider>) -> Self {
        self.resource_provider = Some(provider);
        self
    }

    pub fn build(self) -> Result<RuntimeManager, RuntimeError> {
        let data_directory = self
            .data_directory
            .ok_or_else(|| RuntimeError::config("data_directory is required"))?;
        let cache_directory = self.cache_directory.unwrap_or_else(|| data_directory.join("cache"));
        let geoip_file = self
            .geoip_file
            .ok_or_else(|| RuntimeError::config("geoip_file is required"))?;
        let geoip6_file = self
            .geoip6_file
            .ok_or_else(|| RuntimeError::config("geoip6_file is required"))?;

        let instance_id = InstanceId::new(
            self.instance_id
                .unwrap_or_else(|| data_directory.to_string_lossy().into_owned()),
        );

        let paths = HostPaths {
            data_directory,
            cache_directory,
            geoip_file,
            geoip6_file,
        };
        let resource_provider = self
            .resource_provider
            .unwrap_or_else(|| Arc::new(DefaultResourceProvider::new(paths)));

        Ok(RuntimeManager::new(
            instance_id,
            self.binary,
            resource_provider,
            self.control_port,
            self.socks_port,
            self.command_timeout,
            self.take_ownership,
            self.executors,
        ))
    }
}
