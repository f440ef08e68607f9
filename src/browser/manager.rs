//! Session lifecycle management.
//!
//! The controller never launches or tears down browsers itself; it goes
//! through a [`SessionManager`], which owns at most one live session at a
//! time and can replace it wholesale after a fatal error.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::{BrowserSession, SessionConfig};
use crate::error::PortalError;

/// Owns the browser session used by the processing pipeline.
#[async_trait]
pub trait SessionManager: Send {
    type Session: Send + Sync;

    /// Return the existing live session, or launch a new one with a fresh
    /// isolated profile. Idempotent.
    async fn acquire(&mut self) -> Result<Arc<Self::Session>, PortalError>;

    /// Terminate the session and delete its profile storage. Safe to call
    /// when no session is live.
    async fn release(&mut self) -> Result<(), PortalError>;

    /// Force `release` then `acquire`. Used after a fatal error so later
    /// records never run against poisoned browser state.
    async fn recreate(&mut self) -> Result<Arc<Self::Session>, PortalError>;
}

/// Chrome-backed session manager for the sequential pipeline.
pub struct ChromeSessionManager {
    config: SessionConfig,
    current: Option<Arc<BrowserSession>>,
}

impl ChromeSessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            current: None,
        }
    }
}

#[async_trait]
impl SessionManager for ChromeSessionManager {
    type Session = BrowserSession;

    async fn acquire(&mut self) -> Result<Arc<BrowserSession>, PortalError> {
        // Probe the existing session; a dead Chrome process means the handle
        // is useless and must be replaced, not reused.
        if let Some(session) = &self.current {
            if session.is_alive() {
                return Ok(session.clone());
            }
            warn!("Session {} is dead, replacing it", session.id());
            self.release().await?;
        }

        let session = Arc::new(
            BrowserSession::launch(self.config.clone())
                .await
                .map_err(PortalError::from)?,
        );
        self.current = Some(session.clone());
        Ok(session)
    }

    async fn release(&mut self) -> Result<(), PortalError> {
        if let Some(session) = self.current.take() {
            if let Err(e) = session.close().await {
                warn!("Error closing session {}: {}", session.id(), e);
            }
            // The profile directory is removed from disk when the last
            // clone of the session drops.
        }
        Ok(())
    }

    async fn recreate(&mut self) -> Result<Arc<BrowserSession>, PortalError> {
        info!("Recreating browser session after fatal error");
        self.release().await?;
        self.acquire().await
    }
}
