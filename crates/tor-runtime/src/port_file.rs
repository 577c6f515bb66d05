//! Discovers the control port tor actually bound, via the file it writes
//! when spawned with `--ControlPortWriteToFile` (§6's `--ControlPort`
//! directive covers *what tor is told to listen on*; this covers *what it
//! ended up listening on*, which matters for `auto` and is just as useful
//! to confirm for an explicit port).
//!
//! tor writes one line: `PORT=host:port` for a TCP control port, or
//! `UNIX_PORT=/path/to/socket` for a unix-domain one. The file does not
//! exist until the control listener is actually open, so discovery is a
//! short poll rather than a one-shot read.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::error::RuntimeError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const POLL_ATTEMPTS: usize = 500; // 10s at 20ms, generous relative to tor's typical startup

/// Where the control port ended up listening, as tor reported it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ControlEndpoint {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

pub fn control_port_file_path(data_directory: &Path) -> PathBuf {
    data_directory.join("control_port")
}

/// Removes a stale port file left over from a previous run under the same
/// `DataDirectory`, so a failed read can't be mistaken for tor's current
/// endpoint. Absence of the file is not an error.
pub fn clear_stale(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn parse_control_port_file(contents: &str) -> Result<ControlEndpoint, RuntimeError> {
    let line = contents
        .lines()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| RuntimeError::config("control port file was empty"))?
        .trim();

    if let Some(rest) = line.strip_prefix("PORT=") {
        let addr: SocketAddr = rest
            .parse()
            .map_err(|_| RuntimeError::config(format!("unparseable control port file line: {line}")))?;
        Ok(ControlEndpoint::Tcp(addr))
    } else if let Some(rest) = line.strip_prefix("UNIX_PORT=") {
        Ok(ControlEndpoint::Unix(PathBuf::from(rest)))
    } else {
        Err(RuntimeError::config(format!(
            "unrecognized control port file line: {line}"
        )))
    }
}

/// Polls for `path` to appear and contain a parseable endpoint. Callers race
/// this against the supervisor's exit future (§4.7 step 4), since a
/// misconfigured tor can exit before ever writing the file.
pub async fn read_control_endpoint(path: &Path) -> Result<ControlEndpoint, RuntimeError> {
    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for attempt in 0..POLL_ATTEMPTS {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) if !contents.trim().is_empty() => {
                return parse_control_port_file(&contents);
            }
            Ok(_) | Err(_) => {
                if attempt + 1 == POLL_ATTEMPTS {
                    return Err(RuntimeError::config(format!(
                        "control port file {} never appeared",
                        path.display()
                    )));
                }
                ticker.tick().await;
            }
        }
    }
    unreachable!("loop returns before exhausting POLL_ATTEMPTS")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tcp_port_line() {
        let endpoint = parse_control_port_file("PORT=127.0.0.1:9051\n").unwrap();
        assert_eq!(endpoint, ControlEndpoint::Tcp("127.0.0.1:9051".parse().unwrap()));
    }

    #[test]
    fn parses_unix_port_line() {
        let endpoint = parse_control_port_file("UNIX_PORT=/tmp/tor-control.sock\n").unwrap();
        assert_eq!(endpoint, ControlEndpoint::Unix(PathBuf::from("/tmp/tor-control.sock")));
    }

    #[test]
    fn rejects_unrecognized_line() {
        assert!(parse_control_port_file("GARBAGE\n").is_err());
    }

    #[test]
    fn rejects_empty_contents() {
        assert!(parse_control_port_file("\n\n").is_err());
    }

    #[tokio::test]
    async fn read_control_endpoint_sees_a_file_written_after_polling_starts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_port");
        let write_path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            tokio::fs::write(&write_path, "PORT=127.0.0.1:9999\n").await.unwrap();
        });
        let endpoint = read_control_endpoint(&path).await.unwrap();
        assert_eq!(endpoint, ControlEndpoint::Tcp("127.0.0.1:9999".parse().unwrap()));
    }

    #[test]
    fn clear_stale_is_a_noop_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control_port");
        assert!(clear_stale(&path).is_ok());
    }
}
