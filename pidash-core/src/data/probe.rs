//! TCP connectivity probe for the remote.
//!
//! A connect with a short timeout stands in for `ping`: it needs no extra
//! privileges and also proves the API port is accepting connections.

use super::provider::ConnectivityCheck;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Probe that succeeds if any resolved address of `host:port` accepts a TCP connection.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: strip_user(&host.into()).to_string(),
            port,
            timeout,
        }
    }

    pub fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn resolve(&self) -> Vec<SocketAddr> {
        match (self.host.as_str(), self.port).to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!(remote = %self.target(), error = %e, "could not resolve remote host");
                Vec::new()
            }
        }
    }
}

impl ConnectivityCheck for TcpProbe {
    fn is_reachable(&self) -> bool {
        let online = self
            .resolve()
            .iter()
            .any(|addr| TcpStream::connect_timeout(addr, self.timeout).is_ok());
        info!(remote = %self.target(), online, "remote connectivity check");
        online
    }
}

/// Accept `user@host` as written in SSH-style host settings.
fn strip_user(host: &str) -> &str {
    host.rsplit_once('@').map_or(host, |(_, h)| h)
}
