//! The accept side of a hidden service.
//!
//! Binds a loopback listener, registers the identity's onion service with
//! the Tor daemon, and yields the streams Tor forwards to it.

use super::controller::TorController;
use super::{DEFAULT_CONTROL_PORT, DEFAULT_SERVICE_PORT};
use crate::error::{Error, Result};
use crate::identity::{Identity, OnionAddress};
use crate::logging::RedactedOnion;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// Hidden-service parameters.
#[derive(Debug, Clone)]
pub struct HiddenServiceConfig {
    /// Loopback port Tor forwards accepted streams to. 0 picks a free one.
    pub local_port: u16,
    /// ControlPort address of the local Tor daemon.
    pub control_addr: String,
    /// Virtual port exposed on the onion address.
    pub virtual_port: u16,
}

impl Default for HiddenServiceConfig {
    fn default() -> Self {
        Self {
            local_port: 0,
            control_addr: format!("127.0.0.1:{}", DEFAULT_CONTROL_PORT),
            virtual_port: DEFAULT_SERVICE_PORT,
        }
    }
}

/// A running hidden service for one local identity.
pub struct HiddenService {
    onion_address: OnionAddress,
    service_id: String,
    listener: TcpListener,
    controller: Arc<Mutex<TorController>>,
}

impl HiddenService {
    /// Register the identity's onion service and start listening.
    pub async fn start(identity: &Identity, config: HiddenServiceConfig) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", config.local_port))
            .await
            .map_err(|e| Error::Tor(format!("bind local listener: {}", e)))?;
        let local_port = listener
            .local_addr()
            .map_err(|e| Error::Tor(format!("listener address: {}", e)))?
            .port();

        let mut controller = TorController::connect(&config.control_addr).await?;
        controller.authenticate_auto().await?;
        controller
            .wait_ready(std::time::Duration::from_secs(60))
            .await
            .map_err(|_| Error::Tor("Tor has no circuits after 60s".into()))?;

        let service_id = controller
            .add_onion(identity, config.virtual_port, local_port)
            .await?;

        tracing::info!(
            onion = %RedactedOnion(identity.onion_address().as_str()),
            local_port,
            virtual_port = config.virtual_port,
            "hidden service listening"
        );

        Ok(Self {
            onion_address: identity.onion_address().clone(),
            service_id,
            listener,
            controller: Arc::new(Mutex::new(controller)),
        })
    }

    /// Accept the next stream Tor forwards to this service.
    pub async fn accept(&self) -> Result<TcpStream> {
        let (stream, _) = self
            .listener
            .accept()
            .await
            .map_err(|e| Error::Tor(format!("accept: {}", e)))?;
        Ok(stream)
    }

    /// The service's onion address.
    pub fn onion_address(&self) -> &OnionAddress {
        &self.onion_address
    }

    /// Deregister the service from Tor and stop listening.
    pub async fn stop(self) -> Result<()> {
        let mut controller = self.controller.lock().await;
        if let Err(e) = controller.del_onion(&self.service_id).await {
            tracing::warn!(error = %e, "failed to remove hidden service");
        }
        Ok(())
    }
}
