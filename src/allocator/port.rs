use crate::error::{Error, Result};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

/// Decides whether a local TCP port can be handed to a new instance.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probes the real port space on this host.
///
/// A port is free when nothing accepts a connection on `127.0.0.1` and it can
/// be bound on both `127.0.0.1` and `0.0.0.0`. Checking both bind addresses
/// catches listeners on either (macOS lets the two coexist).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpPortProbe;

const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);

impl PortProbe for TcpPortProbe {
    fn is_free(&self, port: u16) -> bool {
        let loopback = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if TcpStream::connect_timeout(&loopback, CONNECT_TIMEOUT).is_ok() {
            return false;
        }
        // Linux refuses 0.0.0.0 while 127.0.0.1 is held, so release in between
        match TcpListener::bind(loopback) {
            Ok(listener) => drop(listener),
            Err(_) => return false,
        }
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
    }
}

/// Linear probe upward from `start` for a port that is neither recorded in
/// `reserved` nor in use on the host.
///
/// Gives up after `attempts` candidates or at the top of the port range.
pub fn find_free_port(
    probe: &dyn PortProbe,
    start: u16,
    reserved: &HashSet<u16>,
    attempts: u32,
) -> Result<u16> {
    if start == 0 {
        return Err(Error::Allocation("starting port must be non-zero".to_string()));
    }

    let mut port = start;
    for _ in 0..attempts {
        if reserved.contains(&port) {
            tracing::debug!("Port {} is recorded for another instance", port);
        } else if probe.is_free(port) {
            return Ok(port);
        } else {
            tracing::debug!("Port {} is in use", port);
        }

        port = match port.checked_add(1) {
            Some(next) => next,
            None => {
                return Err(Error::Allocation(format!(
                    "ran past port 65535 searching upward from {}",
                    start
                )))
            }
        };
    }

    Err(Error::Allocation(format!(
        "no free port in {} attempts starting at {}",
        attempts, start
    )))
}
