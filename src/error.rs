//! Run-level error taxonomy.
//!
//! Every failure that can happen while a record is in flight is folded into
//! [`PortalError`] so the controller can classify it: terminal for the
//! record, retryable, or fatal for the whole browser session.

use thiserror::Error;

use crate::browser::BrowserError;

/// Errors raised while processing records against a portal.
#[derive(Error, Debug)]
pub enum PortalError {
    /// A required field is missing or malformed for this portal. Terminal
    /// for the record, consumes no retry budget.
    #[error("record data error: {0}")]
    RecordData(String),

    /// The portal page did not reach the expected state. Retryable.
    #[error("navigation error: {0}")]
    Navigation(String),

    /// A bounded wait expired. Retryable.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The challenge gate could not be solved within its attempt bound.
    /// Counts as one failed attempt for the record.
    #[error("captcha unsolved: {0}")]
    CaptchaUnsolved(String),

    /// The browser process crashed or stopped responding. The session must
    /// be torn down and recreated before any further work.
    #[error("session fatal: {0}")]
    SessionFatal(String),

    /// Portal login was rejected. Fatal at startup (exit code 2).
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PortalError {
    /// Terminal errors burn the record immediately, skipping the retry queue.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PortalError::RecordData(_))
    }

    /// Session-fatal errors require `SessionManager::recreate` before the
    /// queue can continue.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, PortalError::SessionFatal(_))
    }
}

impl From<BrowserError> for PortalError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Timeout(msg) => PortalError::Timeout(msg),
            BrowserError::NavigationFailed(msg) => PortalError::Navigation(msg),
            BrowserError::ElementNotFound(msg) => {
                PortalError::Navigation(format!("element not found: {msg}"))
            }
            BrowserError::JavaScriptError(msg) => {
                PortalError::Navigation(format!("script failed: {msg}"))
            }
            BrowserError::LaunchFailed(msg) | BrowserError::ConnectionLost(msg) => {
                PortalError::SessionFatal(msg)
            }
            BrowserError::IoError(e) => PortalError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_data_is_terminal_only() {
        assert!(PortalError::RecordData("missing serial".into()).is_terminal());
        assert!(!PortalError::Timeout("wait expired".into()).is_terminal());
        assert!(!PortalError::SessionFatal("chrome died".into()).is_terminal());
    }

    #[test]
    fn connection_loss_maps_to_session_fatal() {
        let err: PortalError = BrowserError::ConnectionLost("ws closed".into()).into();
        assert!(err.is_session_fatal());
        assert!(!err.is_terminal());
    }

    #[test]
    fn timeout_maps_to_retryable_timeout() {
        let err: PortalError = BrowserError::Timeout("navigation".into()).into();
        assert!(matches!(err, PortalError::Timeout(_)));
        assert!(!err.is_session_fatal());
    }
}
