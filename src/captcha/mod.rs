//! Challenge gate handling.
//!
//! Checkbox-then-audio escalation with a hard bound on audio rounds.

mod flow;
mod solver;
mod transcribe;

pub use flow::{AudioOutcome, CaptchaError, CaptchaState, ChallengeFlow};
pub use solver::RecaptchaSolver;
pub use transcribe::{HttpTranscriber, Transcribe};
