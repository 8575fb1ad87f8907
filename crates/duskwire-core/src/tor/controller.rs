//! Tor ControlPort client.
//!
//! Speaks the ControlPort line protocol: AUTHENTICATE (cookie, password or
//! null), ADD_ONION/DEL_ONION for hidden-service lifecycle, and readiness
//! probes.

use crate::error::{Error, Result};
use crate::identity::Identity;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Authentication method for the ControlPort.
#[derive(Debug, Clone)]
pub enum TorAuth {
    /// No authentication configured.
    None,
    /// Cookie file authentication.
    Cookie(String),
    /// Hashed-password authentication.
    Password(String),
}

/// Parsed PROTOCOLINFO reply.
#[derive(Debug)]
pub struct ControlInfo {
    /// Advertised authentication methods.
    pub auth_methods: Vec<String>,
    /// Cookie file path, when cookie auth is available.
    pub cookie_file: Option<String>,
}

/// A connected ControlPort session.
pub struct TorController {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    authenticated: bool,
}

impl TorController {
    /// Connect to the ControlPort.
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Tor(format!("connect to control port: {}", e)))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: write_half,
            authenticated: false,
        })
    }

    async fn command(&mut self, cmd: &str) -> Result<Vec<String>> {
        self.writer
            .write_all(format!("{}\r\n", cmd).as_bytes())
            .await
            .map_err(|e| Error::Tor(format!("send control command: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| Error::Tor(format!("flush control command: {}", e)))?;

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            self.reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Tor(format!("read control reply: {}", e)))?;
            let line = line.trim_end().to_string();
            if line.len() < 4 {
                continue;
            }

            // "250-..." continues a reply, "250 ..." terminates it. Any
            // non-2xx code is an error.
            let code = &line[..3];
            let separator = line.as_bytes()[3] as char;
            if code.starts_with('2') {
                lines.push(line[4..].to_string());
                if separator == ' ' {
                    break;
                }
            } else {
                return Err(Error::Tor(format!("control port error: {}", line)));
            }
        }
        Ok(lines)
    }

    /// Query supported authentication methods.
    pub async fn protocol_info(&mut self) -> Result<ControlInfo> {
        let lines = self.command("PROTOCOLINFO 1").await?;

        let mut auth_methods = Vec::new();
        let mut cookie_file = None;
        for line in lines {
            let Some(auth) = line.strip_prefix("AUTH ") else {
                continue;
            };
            if let Some(at) = auth.find("METHODS=") {
                let rest = &auth[at + 8..];
                let end = rest.find(' ').unwrap_or(rest.len());
                auth_methods = rest[..end].split(',').map(String::from).collect();
            }
            if let Some(at) = auth.find("COOKIEFILE=\"") {
                let rest = &auth[at + 12..];
                if let Some(end) = rest.find('"') {
                    cookie_file = Some(rest[..end].to_string());
                }
            }
        }

        Ok(ControlInfo {
            auth_methods,
            cookie_file,
        })
    }

    /// Authenticate with an explicit method.
    pub async fn authenticate(&mut self, auth: TorAuth) -> Result<()> {
        let cmd = match auth {
            TorAuth::None => "AUTHENTICATE".to_string(),
            TorAuth::Cookie(path) => {
                let cookie = std::fs::read(&path)
                    .map_err(|e| Error::Tor(format!("read cookie {}: {}", path, e)))?;
                format!("AUTHENTICATE {}", hex::encode(cookie))
            }
            TorAuth::Password(password) => {
                format!("AUTHENTICATE \"{}\"", escape_control_string(&password))
            }
        };
        self.command(&cmd).await?;
        self.authenticated = true;
        tracing::info!("authenticated with Tor control port");
        Ok(())
    }

    /// Authenticate with whatever the daemon advertises: cookie first, then
    /// well-known cookie paths, then null auth.
    pub async fn authenticate_auto(&mut self) -> Result<()> {
        let info = self.protocol_info().await?;

        let cookie_capable = info
            .auth_methods
            .iter()
            .any(|m| m == "COOKIE" || m == "SAFECOOKIE");
        if cookie_capable {
            let mut candidates = Vec::new();
            candidates.extend(info.cookie_file.clone());
            candidates.extend(
                [
                    "/run/tor/control.authcookie",
                    "/var/run/tor/control.authcookie",
                    "/var/lib/tor/control_auth_cookie",
                ]
                .iter()
                .map(|p| p.to_string()),
            );

            for path in candidates {
                if !Path::new(&path).exists() {
                    continue;
                }
                match self.authenticate(TorAuth::Cookie(path.clone())).await {
                    Ok(()) => return Ok(()),
                    Err(e) => tracing::debug!(path = %path, error = %e, "cookie auth failed"),
                }
            }
        }

        if info.auth_methods.iter().any(|m| m == "NULL") {
            return self.authenticate(TorAuth::None).await;
        }

        Err(Error::Tor("no usable control port authentication".into()))
    }

    /// Register an ephemeral hidden service for an identity. Returns the
    /// service id (hostname without `.onion`).
    pub async fn add_onion(
        &mut self,
        identity: &Identity,
        virtual_port: u16,
        local_port: u16,
    ) -> Result<String> {
        if !self.authenticated {
            return Err(Error::Tor("not authenticated".into()));
        }

        // ADD_ONION wants the 64-byte expanded secret key, not the seed.
        let expanded = expand_ed25519_seed(&identity.secret_key_bytes());
        let cmd = format!(
            "ADD_ONION ED25519-V3:{} Port={},127.0.0.1:{}",
            BASE64.encode(expanded),
            virtual_port,
            local_port
        );

        let reply = self.command(&cmd).await?;
        let service_id = reply
            .iter()
            .find_map(|line| line.strip_prefix("ServiceID="))
            .map(String::from)
            .ok_or_else(|| Error::Tor("no ServiceID in ADD_ONION reply".into()))?;

        if service_id != identity.onion_address().hostname() {
            tracing::warn!(
                expected = %identity.onion_address().hostname(),
                got = %service_id,
                "Tor derived a different onion address"
            );
        }

        tracing::info!(service_id = %service_id, virtual_port, local_port, "hidden service registered");
        Ok(service_id)
    }

    /// Tear down a hidden service.
    pub async fn del_onion(&mut self, service_id: &str) -> Result<()> {
        if !self.authenticated {
            return Err(Error::Tor("not authenticated".into()));
        }
        self.command(&format!("DEL_ONION {}", service_id)).await?;
        tracing::info!(service_id = %service_id, "hidden service removed");
        Ok(())
    }

    /// Whether Tor has established circuits.
    pub async fn is_ready(&mut self) -> Result<bool> {
        let lines = self.command("GETINFO status/circuit-established").await?;
        Ok(lines.iter().any(|l| l.contains("circuit-established=1")))
    }

    /// Poll until circuits are established or the timeout expires.
    pub async fn wait_ready(&mut self, timeout: std::time::Duration) -> Result<()> {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.is_ready().await? {
                return Ok(());
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
        Err(Error::Timeout)
    }
}

/// Expand an Ed25519 seed to the 64-byte form ADD_ONION expects: SHA-512 of
/// the seed with the scalar half clamped.
fn expand_ed25519_seed(seed: &[u8; 32]) -> [u8; 64] {
    use sha2::{Digest, Sha512};

    let mut expanded = [0u8; 64];
    expanded.copy_from_slice(&Sha512::digest(seed));
    expanded[0] &= 248;
    expanded[31] &= 127;
    expanded[31] |= 64;
    expanded
}

fn escape_control_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_expansion_is_clamped() {
        let expanded = expand_ed25519_seed(&[0u8; 32]);
        assert_eq!(expanded.len(), 64);
        assert_eq!(expanded[0] & 7, 0);
        assert_eq!(expanded[31] & 128, 0);
        assert_eq!(expanded[31] & 64, 64);
    }

    #[test]
    fn control_string_escaping() {
        assert_eq!(escape_control_string("plain"), "plain");
        assert_eq!(escape_control_string("a\"b"), "a\\\"b");
        assert_eq!(escape_control_string("a\\b"), "a\\\\b");
    }
}
