//! Outbound connections through Tor's SOCKS5 proxy.

use super::{CIRCUIT_TIMEOUT_SECS, DEFAULT_SERVICE_PORT, DEFAULT_SOCKS_PORT};
use crate::error::{Error, Result};
use crate::identity::OnionAddress;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// How to reach the local Tor SOCKS proxy.
#[derive(Debug, Clone)]
pub struct TorSocksConfig {
    /// SOCKS5 proxy address.
    pub socks_addr: SocketAddr,
    /// Per-dial timeout, covering circuit build time.
    pub timeout: Duration,
    /// Remote port to connect to on the hidden service.
    pub service_port: u16,
}

impl Default for TorSocksConfig {
    fn default() -> Self {
        Self {
            socks_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SOCKS_PORT)),
            timeout: Duration::from_secs(CIRCUIT_TIMEOUT_SECS),
            service_port: DEFAULT_SERVICE_PORT,
        }
    }
}

/// Dial a hidden service through the SOCKS5 proxy, returning the connected
/// stream once the SOCKS handshake completes.
pub async fn dial(config: &TorSocksConfig, target: &OnionAddress) -> Result<TcpStream> {
    let stream = tokio::time::timeout(config.timeout, TcpStream::connect(config.socks_addr))
        .await
        .map_err(|_| Error::Timeout)?
        .map_err(|e| Error::Tor(format!("connect to SOCKS proxy: {}", e)))?;

    tokio::time::timeout(
        config.timeout,
        socks5_connect(stream, target, config.service_port),
    )
    .await
    .map_err(|_| Error::Timeout)?
}

async fn socks5_connect(
    mut stream: TcpStream,
    target: &OnionAddress,
    port: u16,
) -> Result<TcpStream> {
    // Greeting: version 5, one method, no auth.
    stream
        .write_all(&[0x05, 0x01, 0x00])
        .await
        .map_err(|e| Error::Tor(format!("SOCKS5 greeting: {}", e)))?;

    let mut reply = [0u8; 2];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|e| Error::Tor(format!("SOCKS5 greeting reply: {}", e)))?;
    if reply != [0x05, 0x00] {
        return Err(Error::Tor("SOCKS5 method negotiation failed".into()));
    }

    // Connect request with a domain-name target.
    let host = target.as_str().as_bytes();
    if host.len() > 255 {
        return Err(Error::Tor("hostname too long for SOCKS5".into()));
    }
    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[0x05, 0x01, 0x00, 0x03, host.len() as u8]);
    request.extend_from_slice(host);
    request.extend_from_slice(&port.to_be_bytes());
    stream
        .write_all(&request)
        .await
        .map_err(|e| Error::Tor(format!("SOCKS5 connect: {}", e)))?;

    let mut head = [0u8; 4];
    stream
        .read_exact(&mut head)
        .await
        .map_err(|e| Error::Tor(format!("SOCKS5 connect reply: {}", e)))?;
    if head[0] != 0x05 {
        return Err(Error::Tor("bad SOCKS5 version in reply".into()));
    }
    if head[1] != 0x00 {
        return Err(Error::Tor(format!("SOCKS5 connect refused: code {}", head[1])));
    }

    // Consume the bound address, which we do not use.
    match head[3] {
        0x01 => {
            let mut rest = [0u8; 6];
            stream
                .read_exact(&mut rest)
                .await
                .map_err(|e| Error::Tor(e.to_string()))?;
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| Error::Tor(e.to_string()))?;
            let mut rest = vec![0u8; len[0] as usize + 2];
            stream
                .read_exact(&mut rest)
                .await
                .map_err(|e| Error::Tor(e.to_string()))?;
        }
        0x04 => {
            let mut rest = [0u8; 18];
            stream
                .read_exact(&mut rest)
                .await
                .map_err(|e| Error::Tor(e.to_string()))?;
        }
        other => {
            return Err(Error::Tor(format!("bad SOCKS5 address type {}", other)));
        }
    }

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TorSocksConfig::default();
        assert_eq!(config.socks_addr.port(), DEFAULT_SOCKS_PORT);
        assert_eq!(config.service_port, DEFAULT_SERVICE_PORT);
    }
}
