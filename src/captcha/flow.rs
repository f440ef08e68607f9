//! Challenge escalation state machine.
//!
//! The checkbox path is tried first (cheapest); failure escalates to the
//! audio challenge, which may loop when the widget demands another round.
//! Every audio round is counted against a hard bound, so the flow always
//! terminates even against a widget that keeps asking for more.

use thiserror::Error;

/// State of one challenge gate, scoped to a single submit attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaState {
    Unsolved,
    CheckboxTried,
    AudioRequested,
    AudioSolving,
    Solved,
    Failed,
}

/// Result of submitting one audio transcript to the widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioOutcome {
    /// The widget accepted the answer.
    Accepted,
    /// The widget wants another round ("multiple correct solutions
    /// required", or a reloaded challenge after a near miss).
    AnotherRound,
    /// The widget refused to continue (e.g. "try again later").
    Rejected,
}

#[derive(Error, Debug)]
pub enum CaptchaError {
    #[error("challenge could not be solved: {0}")]
    Unsolvable(String),

    #[error("audio transcription failed: {0}")]
    Transcription(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("audio attempt bound reached after {rounds} rounds")]
    Exhausted { rounds: u32 },
}

/// Tracks one gate through checkbox → audio escalation.
#[derive(Debug)]
pub struct ChallengeFlow {
    state: CaptchaState,
    audio_rounds: u32,
    max_audio_rounds: u32,
    trace: Vec<CaptchaState>,
}

impl ChallengeFlow {
    pub fn new(max_audio_rounds: u32) -> Self {
        Self {
            state: CaptchaState::Unsolved,
            audio_rounds: 0,
            max_audio_rounds: max_audio_rounds.max(1),
            trace: vec![CaptchaState::Unsolved],
        }
    }

    pub fn state(&self) -> CaptchaState {
        self.state
    }

    /// All states visited so far, in order.
    pub fn trace(&self) -> &[CaptchaState] {
        &self.trace
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, CaptchaState::Solved | CaptchaState::Failed)
    }

    fn transition(&mut self, next: CaptchaState) -> CaptchaState {
        self.state = next;
        self.trace.push(next);
        next
    }

    /// The checkbox was clicked; `solved` is whether the widget accepted it
    /// without a challenge.
    pub fn checkbox_tried(&mut self, solved: bool) -> CaptchaState {
        self.transition(CaptchaState::CheckboxTried);
        if solved {
            self.transition(CaptchaState::Solved)
        } else {
            self.transition(CaptchaState::AudioRequested)
        }
    }

    /// Start one audio round. Fails (and moves to `Failed`) once the round
    /// bound is used up; this is the guarantee that the loop terminates.
    pub fn begin_audio_round(&mut self) -> Result<(), CaptchaError> {
        if self.audio_rounds >= self.max_audio_rounds {
            self.transition(CaptchaState::Failed);
            return Err(CaptchaError::Exhausted {
                rounds: self.audio_rounds,
            });
        }
        self.audio_rounds += 1;
        self.transition(CaptchaState::AudioSolving);
        Ok(())
    }

    /// Fold the widget's verdict on one submitted transcript into the flow.
    pub fn audio_submitted(&mut self, outcome: AudioOutcome) -> CaptchaState {
        match outcome {
            AudioOutcome::Accepted => self.transition(CaptchaState::Solved),
            AudioOutcome::AnotherRound => self.transition(CaptchaState::AudioRequested),
            AudioOutcome::Rejected => self.transition(CaptchaState::Failed),
        }
    }

    /// Unexpected error path: the flow ends as `Failed`, whatever state it
    /// was in.
    pub fn fail(&mut self) -> CaptchaState {
        self.transition(CaptchaState::Failed)
    }

    pub fn audio_rounds(&self) -> u32 {
        self.audio_rounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkbox_success_trace() {
        let mut flow = ChallengeFlow::new(5);
        assert_eq!(flow.checkbox_tried(true), CaptchaState::Solved);
        assert_eq!(
            flow.trace(),
            &[
                CaptchaState::Unsolved,
                CaptchaState::CheckboxTried,
                CaptchaState::Solved
            ]
        );
        assert!(flow.is_terminal());
        assert_eq!(flow.audio_rounds(), 0);
    }

    #[test]
    fn checkbox_failure_escalates_to_audio() {
        let mut flow = ChallengeFlow::new(5);
        assert_eq!(flow.checkbox_tried(false), CaptchaState::AudioRequested);
        flow.begin_audio_round().unwrap();
        assert_eq!(flow.state(), CaptchaState::AudioSolving);
        assert_eq!(
            flow.audio_submitted(AudioOutcome::Accepted),
            CaptchaState::Solved
        );
    }

    #[test]
    fn endless_another_round_terminates_at_bound() {
        let max = 4;
        let mut flow = ChallengeFlow::new(max);
        flow.checkbox_tried(false);

        let mut rounds = 0;
        loop {
            match flow.begin_audio_round() {
                Ok(()) => {
                    rounds += 1;
                    // Widget always demands another round.
                    flow.audio_submitted(AudioOutcome::AnotherRound);
                }
                Err(CaptchaError::Exhausted { rounds: seen }) => {
                    assert_eq!(seen, max);
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(rounds <= max, "loop exceeded its bound");
        }

        assert_eq!(flow.state(), CaptchaState::Failed);
        assert!(flow.is_terminal());
    }

    #[test]
    fn widget_rejection_fails_the_flow() {
        let mut flow = ChallengeFlow::new(5);
        flow.checkbox_tried(false);
        flow.begin_audio_round().unwrap();
        assert_eq!(
            flow.audio_submitted(AudioOutcome::Rejected),
            CaptchaState::Failed
        );
    }

    #[test]
    fn zero_bound_is_clamped_to_one_round() {
        let mut flow = ChallengeFlow::new(0);
        flow.checkbox_tried(false);
        assert!(flow.begin_audio_round().is_ok());
        flow.audio_submitted(AudioOutcome::AnotherRound);
        assert!(flow.begin_audio_round().is_err());
    }
}
