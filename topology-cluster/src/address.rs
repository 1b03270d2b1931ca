use std::fmt::{Display, Formatter};
use std::net::SocketAddr;

use bincode::{Decode, Encode};
use thiserror::Error;

/// Environment variables naming the meta server rendezvous point. Both the
/// meta server itself and every compute graph node read the same pair.
pub const META_SERVER_HOST_ENV: &str = "TOPO_META_SERVER_HOST";
pub const META_SERVER_PORT_ENV: &str = "TOPO_META_SERVER_PORT";

const MIN_PORT: u32 = 1;
const MAX_PORT: u32 = 65535;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Encode, Decode)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub async fn socket_addr(&self) -> std::io::Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port)).await?;
        addrs.next().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no socket addr resolved for {}", self),
            )
        })
    }
}

impl Display for NodeAddress {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("meta server host is not set in env {META_SERVER_HOST_ENV}")]
    MissingHost,
    #[error("meta server port is not set in env {META_SERVER_PORT_ENV}")]
    MissingPort,
    #[error("meta server port `{0}` is not an integer")]
    InvalidPort(String),
    #[error("meta server port {0} is out of range ({MIN_PORT}~{MAX_PORT})")]
    PortOutOfRange(u32),
}

/// Reads the meta server address from the process environment. Pure with
/// respect to everything but the two env vars.
pub fn resolve_meta_server_address() -> Result<NodeAddress, ConfigurationError> {
    let host = std::env::var(META_SERVER_HOST_ENV).ok();
    let port = std::env::var(META_SERVER_PORT_ENV).ok();
    resolve_address(host, port)
}

fn resolve_address(
    host: Option<String>,
    port: Option<String>,
) -> Result<NodeAddress, ConfigurationError> {
    let host = host
        .filter(|h| !h.is_empty())
        .ok_or(ConfigurationError::MissingHost)?;
    let port = port
        .filter(|p| !p.is_empty())
        .ok_or(ConfigurationError::MissingPort)?;
    let port = port
        .parse::<u32>()
        .map_err(|_| ConfigurationError::InvalidPort(port))?;
    if !(MIN_PORT..=MAX_PORT).contains(&port) {
        return Err(ConfigurationError::PortOutOfRange(port));
    }
    Ok(NodeAddress::new(host, port as u16))
}

#[cfg(test)]
mod test {
    use crate::address::{
        resolve_address, resolve_meta_server_address, ConfigurationError, NodeAddress,
        META_SERVER_HOST_ENV, META_SERVER_PORT_ENV,
    };

    #[test]
    fn test_resolve_address() {
        let addr = resolve_address(Some("10.0.0.3".to_string()), Some("8118".to_string())).unwrap();
        assert_eq!(addr, NodeAddress::new("10.0.0.3", 8118));

        let edge = resolve_address(Some("h".to_string()), Some("1".to_string())).unwrap();
        assert_eq!(edge.port, 1);
        let edge = resolve_address(Some("h".to_string()), Some("65535".to_string())).unwrap();
        assert_eq!(edge.port, 65535);

        assert!(matches!(
            resolve_address(None, Some("8118".to_string())),
            Err(ConfigurationError::MissingHost)
        ));
        assert!(matches!(
            resolve_address(Some("".to_string()), Some("8118".to_string())),
            Err(ConfigurationError::MissingHost)
        ));
        assert!(matches!(
            resolve_address(Some("h".to_string()), None),
            Err(ConfigurationError::MissingPort)
        ));
        assert!(matches!(
            resolve_address(Some("h".to_string()), Some("".to_string())),
            Err(ConfigurationError::MissingPort)
        ));
        assert!(matches!(
            resolve_address(Some("h".to_string()), Some("port".to_string())),
            Err(ConfigurationError::InvalidPort(_))
        ));
        assert!(matches!(
            resolve_address(Some("h".to_string()), Some("0".to_string())),
            Err(ConfigurationError::PortOutOfRange(0))
        ));
        assert!(matches!(
            resolve_address(Some("h".to_string()), Some("65536".to_string())),
            Err(ConfigurationError::PortOutOfRange(65536))
        ));
    }

    // the only test in this binary that touches the env vars
    #[test]
    fn test_resolve_from_env() {
        std::env::set_var(META_SERVER_HOST_ENV, "127.0.0.1");
        std::env::set_var(META_SERVER_PORT_ENV, "8118");
        let addr = resolve_meta_server_address().unwrap();
        assert_eq!(addr, NodeAddress::new("127.0.0.1", 8118));
        std::env::remove_var(META_SERVER_PORT_ENV);
        assert!(matches!(
            resolve_meta_server_address(),
            Err(ConfigurationError::MissingPort)
        ));
        std::env::remove_var(META_SERVER_HOST_ENV);
    }
}
