//! Run configuration.
//!
//! One value assembled at startup from CLI flags and passed explicitly into
//! the components that need it. There is no process-global configuration.

use crate::browser::SessionConfig;
use crate::pacing::Pacing;

/// Tunables for one run.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunConfig {
    /// Attempts a record gets before it is terminally failed.
    pub max_row_retries: u32,
    /// Audio challenge rounds before the gate counts as unsolved.
    pub max_audio_rounds: u32,
    /// Per-operation browser timeout in seconds.
    pub timeout_secs: u64,
    /// Inter-record delay window in milliseconds.
    pub min_record_delay_ms: u64,
    pub max_record_delay_ms: u64,
    /// Run the browser headless.
    pub headless: bool,
    /// Override for the speech recognizer endpoint.
    pub transcriber_endpoint: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_row_retries: 3,
            max_audio_rounds: 5,
            timeout_secs: 25,
            min_record_delay_ms: 2000,
            max_record_delay_ms: 5000,
            headless: true,
            transcriber_endpoint: None,
        }
    }
}

impl RunConfig {
    /// Shrink the pacing window for trusted/fast portals.
    pub fn fast_mode(mut self) -> Self {
        self.min_record_delay_ms = 200;
        self.max_record_delay_ms = 500;
        self
    }

    pub fn pacing(&self) -> Pacing {
        Pacing::new(self.min_record_delay_ms, self.max_record_delay_ms)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            headless: self.headless,
            timeout_secs: self.timeout_secs,
            ..SessionConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_bounded() {
        let config = RunConfig::default();
        assert_eq!(config.max_row_retries, 3);
        assert_eq!(config.max_audio_rounds, 5);
        assert!(config.min_record_delay_ms <= config.max_record_delay_ms);
    }

    #[test]
    fn fast_mode_shrinks_pacing_only() {
        let config = RunConfig::default().fast_mode();
        assert_eq!(config.max_record_delay_ms, 500);
        assert_eq!(config.max_row_retries, 3);
    }
}
