//! Pairing claimant: exchange a one-time code for a device credential.

use std::sync::Arc;

use desktop_agent_core::{DeviceProfile, PairingCode, PairingError, PairingService};
use tokio::sync::watch;

use crate::auth::AuthCoordinator;

/// Submits pairing codes. One attempt per call; retry policy is the caller's.
pub struct PairingClaimant {
    service: Arc<dyn PairingService>,
    auth: Arc<AuthCoordinator>,
    device: watch::Receiver<DeviceProfile>,
}

impl PairingClaimant {
    #[must_use]
    pub fn new(
        service: Arc<dyn PairingService>,
        auth: Arc<AuthCoordinator>,
        device: watch::Receiver<DeviceProfile>,
    ) -> Self {
        Self {
            service,
            auth,
            device,
        }
    }

    /// Claim `input`, store the credential and bring the connection up.
    ///
    /// # Errors
    /// [`PairingError::InvalidFormat`] before any network call if the code is
    /// malformed; otherwise whatever the service or the store reported.
    pub async fn claim(&self, input: &str) -> Result<(), PairingError> {
        let code = PairingCode::parse(input)?;
        let device = self.device.borrow().clone();
        tracing::info!(device = %device.name, "claiming pairing code");

        let credential = match self.service.claim(&code, &device).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!("pairing failed: {e}");
                return Err(e);
            }
        };

        self.auth
            .install(credential)
            .await
            .map_err(|e| PairingError::Storage(e.to_string()))?;
        tracing::info!("device paired");

        self.auth
            .startup()
            .await
            .map_err(|e| PairingError::Storage(e.to_string()))?;
        Ok(())
    }
}
