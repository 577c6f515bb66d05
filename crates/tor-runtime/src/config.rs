//! Host-level configuration: binary resolution, data/cache/geoip paths, and
//! the argv the supervisor (C9) hands to `tor`. The tor *protocol*
//! configuration (`Config`/`Setting`, with the port-collision normalization)
//! lives in [`tor_ctl::Config`]; this module is purely about what this
//! process needs on disk and on the command line to start one.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::RuntimeError;

pub const TOR_BINARY_ENV: &str = "TOR_BINARY";

/// Resolves the tor binary: an explicit override, else `TOR_BINARY`, else
/// bare `tor` resolved against `PATH` by the OS at spawn time.
pub fn default_binary_path() -> PathBuf {
    std::env::var_os(TOR_BINARY_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("tor"))
}

/// Host-level paths and process-identity knobs the Runtime Manager needs to
/// spawn tor, independent of the tor configuration settings themselves.
#[derive(Debug, Clone)]
pub struct HostPaths {
    pub data_directory: PathBuf,
    pub cache_directory: PathBuf,
    pub geoip_file: PathBuf,
    pub geoip6_file: PathBuf,
}

/// Installs (creates, if missing) the directories/files tor needs before it
/// is spawned. Kept behind a trait so tests and embedders that ship their
/// own geoip files can substitute a no-op or a resource-extracting
/// implementation without touching the action processor.
pub trait ResourceProvider: Send + Sync {
    fn install(&self) -> Result<HostPaths, RuntimeError>;
}

/// Creates `data_directory`/`cache_directory` if missing and requires the
/// geoip files to already exist at the given paths (this crate does not ship
/// or download geoip databases; packaging them is out of scope, per §1).
pub struct DefaultResourceProvider {
    paths: HostPaths,
}

impl DefaultResourceProvider {
    pub fn new(paths: HostPaths) -> Self {
        Self { paths }
    }
}

impl ResourceProvider for DefaultResourceProvider {
    fn install(&self) -> Result<HostPaths, RuntimeError> {
        std::fs::create_dir_all(&self.paths.data_directory).map_err(|source| RuntimeError::Config {
            detail: format!(
                "could not create data directory {}: {source}",
                self.paths.data_directory.display()
            ),
        })?;
        std::fs::create_dir_all(&self.paths.cache_directory).map_err(|source| RuntimeError::Config {
            detail: format!(
                "could not create cache directory {}: {source}",
                self.paths.cache_directory.display()
            ),
        })?;
        for (label, path) in [
            ("GeoIPFile", &self.paths.geoip_file),
            ("GeoIPv6File", &self.paths.geoip6_file),
        ] {
            if !path.exists() {
                return Err(RuntimeError::Config {
                    detail: format!("{label} not found at {}", path.display()),
                });
            }
        }
        Ok(self.paths.clone())
    }
}

/// Where the control port should listen, independent of how it's phrased on
/// the wire (`auto`, `unix:path`, or an explicit TCP port).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ControlPortSpec {
    Auto,
    Tcp(u16),
    Unix(PathBuf),
}

impl ControlPortSpec {
    fn argv_value(&self) -> OsString {
        match self {
            ControlPortSpec::Auto => OsString::from("auto"),
            ControlPortSpec::Tcp(port) => OsString::from(port.to_string()),
            ControlPortSpec::Unix(path) => {
                let mut value = OsString::from("unix:");
                value.push(path.as_os_str());
                value
            }
        }
    }
}

/// Where the SOCKS port should listen; `Disabled` maps to `SocksPort 0`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SocksPortSpec {
    Auto,
    Disabled,
    Tcp(u16),
    Unix(PathBuf),
}

impl SocksPortSpec {
    fn argv_value(&self) -> OsString {
        match self {
            SocksPortSpec::Auto => OsString::from("auto"),
            SocksPortSpec::Disabled => OsString::from("0"),
            SocksPortSpec::Tcp(port) => OsString::from(port.to_string()),
            SocksPortSpec::Unix(path) => {
                let mut value = OsString::from("unix:");
                value.push(path.as_os_str());
                value
            }
        }
    }
}

/// Builds the argv §6 requires for the initial spawn: directories, geoip
/// files, the control/socks port directives, and the flags that keep tor a
/// foreground, network-disabled, owned child process until the Action
/// Processor finishes its startup sequence.
///
/// `--ControlPortWriteToFile` is always passed, even for an explicit
/// `ControlPortSpec`, so [`crate::port_file`] has exactly one discovery path
/// regardless of whether the port was `auto` or fixed.
pub fn build_argv(
    paths: &HostPaths,
    control_port: &ControlPortSpec,
    socks_port: &SocksPortSpec,
    control_port_file: &Path,
    owning_pid: u32,
) -> Vec<OsString> {
    fn flag(name: &str, value: impl Into<OsString>) -> [OsString; 2] {
        [OsString::from(name), value.into()]
    }

    let mut argv = Vec::new();
    argv.extend(flag("--DataDirectory", paths.data_directory.as_os_str()));
    argv.extend(flag("--CacheDirectory", paths.cache_directory.as_os_str()));
    argv.extend(flag("--GeoIPFile", paths.geoip_file.as_os_str()));
    argv.extend(flag("--GeoIPv6File", paths.geoip6_file.as_os_str()));
    argv.extend(flag("--ControlPort", control_port.argv_value()));
    argv.extend(flag("--ControlPortWriteToFile", control_port_file.as_os_str()));
    argv.extend(flag("--SocksPort", socks_port.argv_value()));
    argv.extend(flag("--DisableNetwork", "1"));
    argv.extend(flag("--RunAsDaemon", "0"));
    argv.extend(flag("--__OwningControllerProcess", owning_pid.to_string()));
    argv
}

pub fn cookie_auth_path(data_directory: &Path) -> PathBuf {
    data_directory.join("control_auth_cookie")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_includes_required_flags_in_order() {
        let paths = HostPaths {
            data_directory: PathBuf::from("/tmp/data"),
            cache_directory: PathBuf::from("/tmp/cache"),
            geoip_file: PathBuf::from("/tmp/geoip"),
            geoip6_file: PathBuf::from("/tmp/geoip6"),
        };
        let port_file = PathBuf::from("/tmp/data/control_port");
        let argv = build_argv(&paths, &ControlPortSpec::Auto, &SocksPortSpec::Tcp(9150), &port_file, 4242);
        let joined: Vec<String> = argv.into_iter().map(|s| s.to_string_lossy().into_owned()).collect();
        assert_eq!(
            joined,
            vec![
                "--DataDirectory",
                "/tmp/data",
                "--CacheDirectory",
                "/tmp/cache",
                "--GeoIPFile",
                "/tmp/geoip",
                "--GeoIPv6File",
                "/tmp/geoip6",
                "--ControlPort",
                "auto",
                "--ControlPortWriteToFile",
                "/tmp/data/control_port",
                "--SocksPort",
                "9150",
                "--DisableNetwork",
                "1",
                "--RunAsDaemon",
                "0",
                "--__OwningControllerProcess",
                "4242",
            ]
        );
    }

    #[test]
    fn unix_socket_specs_are_prefixed() {
        let spec = ControlPortSpec::Unix(PathBuf::from("/tmp/ctl.sock"));
        assert_eq!(spec.argv_value(), OsString::from("unix:/tmp/ctl.sock"));
    }

    #[test]
    fn socks_disabled_maps_to_zero() {
        assert_eq!(SocksPortSpec::Disabled.argv_value(), OsString::from("0"));
    }
}
