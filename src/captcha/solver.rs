//! reCAPTCHA solving against a live page.
//!
//! The checkbox and challenge widgets are cross-origin iframes; under site
//! isolation they surface as their own CDP targets, which is how their DOM
//! is reached here. The pure escalation logic lives in [`ChallengeFlow`];
//! this module is only the browser-facing driver around it.

use std::time::Duration;

use chromiumoxide::Page;
use tracing::{debug, info, warn};

use super::{AudioOutcome, CaptchaError, CaptchaState, ChallengeFlow, Transcribe};
use crate::browser::{BrowserError, BrowserSession};
use crate::snapshot::SnapshotSink;

/// URL fragments identifying the widget's targets.
const ANCHOR_FRAME: &str = "api2/anchor";
const CHALLENGE_FRAME: &str = "api2/bframe";

/// Widget text signalling one more audio round is needed.
const MORE_SOLUTIONS: &str = "Multiple correct solutions required";

/// Solves a reCAPTCHA gate via checkbox-then-audio escalation.
pub struct RecaptchaSolver {
    transcriber: Box<dyn Transcribe>,
    http: reqwest::Client,
    max_audio_rounds: u32,
    snapshots: SnapshotSink,
}

impl RecaptchaSolver {
    pub fn new(
        transcriber: Box<dyn Transcribe>,
        max_audio_rounds: u32,
        snapshots: SnapshotSink,
    ) -> Result<Self, CaptchaError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CaptchaError::Network(e.to_string()))?;

        Ok(Self {
            transcriber,
            http,
            max_audio_rounds,
            snapshots,
        })
    }

    /// True when a challenge widget is present on the working page.
    pub async fn gate_present(&self, session: &BrowserSession) -> Result<bool, BrowserError> {
        let value = session
            .evaluate("!!document.querySelector(\"iframe[title*='reCAPTCHA'], .g-recaptcha\")")
            .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    /// Drive the gate to completion. Returns the visited state trace on
    /// success; on failure a debug snapshot is captured and the flow ends
    /// as `Failed`.
    pub async fn solve(
        &self,
        session: &BrowserSession,
    ) -> Result<Vec<CaptchaState>, CaptchaError> {
        let mut flow = ChallengeFlow::new(self.max_audio_rounds);

        if let Err(e) = self.click_checkbox(session).await {
            debug!("Checkbox click failed: {}", e);
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let solved = self.is_solved(session).await.unwrap_or(false);
        if flow.checkbox_tried(solved) == CaptchaState::Solved {
            info!("reCAPTCHA solved via checkbox");
            return Ok(flow.trace().to_vec());
        }

        info!("Checkbox not accepted, falling back to audio challenge");
        match self.solve_audio(session, &mut flow).await {
            Ok(()) => Ok(flow.trace().to_vec()),
            Err(e) => {
                if !flow.is_terminal() {
                    flow.fail();
                }
                warn!("Audio challenge failed: {}", e);
                self.snapshots.capture(session, "captcha_fail").await;
                Err(e)
            }
        }
    }

    /// Click the widget checkbox. Prefers the anchor target's own DOM and
    /// falls back to a coordinate click through the host-page iframe box.
    async fn click_checkbox(&self, session: &BrowserSession) -> Result<(), BrowserError> {
        if let Some(anchor) = session.page_matching(ANCHOR_FRAME).await? {
            let checkbox = anchor
                .find_element("#recaptcha-anchor")
                .await
                .map_err(|e| BrowserError::ElementNotFound(format!("#recaptcha-anchor: {e}")))?;
            checkbox
                .click()
                .await
                .map_err(|e| BrowserError::JavaScriptError(e.to_string()))?;
            return Ok(());
        }

        let (x, y, _w, h) = session.element_box("iframe[title*='reCAPTCHA']").await?;
        session.click_at(x + 28.0, y + h / 2.0).await
    }

    /// Whether the widget has accepted a solution. The host page's response
    /// token fills in on success; the anchor checkbox state is the backup
    /// signal.
    async fn is_solved(&self, session: &BrowserSession) -> Result<bool, BrowserError> {
        let value = session
            .evaluate(
                "(() => { const t = document.querySelector('#g-recaptcha-response, \
                 textarea[name=\"g-recaptcha-response\"]'); \
                 return !!(t && t.value && t.value.length > 0); })()",
            )
            .await?;
        if value.as_bool().unwrap_or(false) {
            return Ok(true);
        }

        if let Some(anchor) = session.page_matching(ANCHOR_FRAME).await? {
            if let Ok(checkbox) = anchor.find_element("#recaptcha-anchor").await {
                if let Ok(Some(checked)) = checkbox.attribute("aria-checked").await {
                    return Ok(checked == "true");
                }
            }
        }
        Ok(false)
    }

    async fn solve_audio(
        &self,
        session: &BrowserSession,
        flow: &mut ChallengeFlow,
    ) -> Result<(), CaptchaError> {
        let challenge = session
            .page_matching(CHALLENGE_FRAME)
            .await
            .map_err(|e| CaptchaError::Unsolvable(e.to_string()))?
            .ok_or_else(|| CaptchaError::Unsolvable("challenge frame not found".into()))?;

        self.click_in_frame(&challenge, "#recaptcha-audio-button")
            .await?;
        tokio::time::sleep(Duration::from_secs(2)).await;

        loop {
            flow.begin_audio_round()?;

            let audio_url = self
                .wait_for_audio_src(session, &challenge)
                .await?;
            info!(
                "Audio challenge round {}: {}",
                flow.audio_rounds(),
                audio_url
            );

            let audio = self
                .http
                .get(&audio_url)
                .send()
                .await
                .map_err(|e| CaptchaError::Network(e.to_string()))?
                .bytes()
                .await
                .map_err(|e| CaptchaError::Network(e.to_string()))?;

            let answer = self.transcriber.transcribe(&audio).await?;
            info!("Recognized transcript: {}", answer);

            let input = challenge
                .find_element("#audio-response")
                .await
                .map_err(|e| CaptchaError::Unsolvable(format!("#audio-response: {e}")))?;
            input.click().await.ok();
            input
                .type_str(&answer.to_lowercase())
                .await
                .map_err(|e| CaptchaError::Unsolvable(e.to_string()))?;

            self.click_in_frame(&challenge, "#recaptcha-verify-button")
                .await?;
            tokio::time::sleep(Duration::from_secs(3)).await;

            let outcome = self.judge_round(session, &challenge).await?;
            match flow.audio_submitted(outcome) {
                CaptchaState::Solved => {
                    info!(
                        "reCAPTCHA solved via audio after {} round(s)",
                        flow.audio_rounds()
                    );
                    return Ok(());
                }
                CaptchaState::AudioRequested => {
                    debug!("Widget requested another audio round");
                }
                _ => {
                    return Err(CaptchaError::Unsolvable(
                        "widget refused the audio challenge".into(),
                    ));
                }
            }
        }
    }

    /// Wait for the round's audio payload URL, resolved absolute.
    async fn wait_for_audio_src(
        &self,
        session: &BrowserSession,
        challenge: &Page,
    ) -> Result<String, CaptchaError> {
        let deadline = tokio::time::Instant::now() + session.timeout();
        loop {
            if let Ok(element) = challenge.find_element("#audio-source").await {
                if let Ok(Some(src)) = element.attribute("src").await {
                    if !src.is_empty() {
                        return resolve_url(challenge, &src).await;
                    }
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CaptchaError::Unsolvable(
                    "audio source did not appear".into(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Classify the widget's reaction to one submitted transcript.
    async fn judge_round(
        &self,
        session: &BrowserSession,
        challenge: &Page,
    ) -> Result<AudioOutcome, CaptchaError> {
        // Hard refusal ("Try again later") ends the challenge outright.
        if let Ok(header) = challenge.find_element(".rc-doscaptcha-header").await {
            if header.inner_text().await.ok().flatten().is_some() {
                return Ok(AudioOutcome::Rejected);
            }
        }

        if let Ok(error) = challenge
            .find_element(".rc-audiochallenge-error-message")
            .await
        {
            if let Ok(Some(text)) = error.inner_text().await {
                if text.contains(MORE_SOLUTIONS) {
                    return Ok(AudioOutcome::AnotherRound);
                }
            }
        }

        let solved = self
            .is_solved(session)
            .await
            .map_err(|e| CaptchaError::Unsolvable(e.to_string()))?;
        if solved {
            Ok(AudioOutcome::Accepted)
        } else {
            // A wrong answer reloads a fresh challenge; spend another
            // bounded round on it.
            Ok(AudioOutcome::AnotherRound)
        }
    }

    async fn click_in_frame(&self, frame: &Page, selector: &str) -> Result<(), CaptchaError> {
        let element = frame
            .find_element(selector)
            .await
            .map_err(|e| CaptchaError::Unsolvable(format!("{selector}: {e}")))?;
        element
            .click()
            .await
            .map_err(|e| CaptchaError::Unsolvable(e.to_string()))?;
        Ok(())
    }
}

/// Resolve a possibly-relative audio URL against the challenge frame.
async fn resolve_url(challenge: &Page, src: &str) -> Result<String, CaptchaError> {
    if src.starts_with("http://") || src.starts_with("https://") {
        return Ok(src.to_string());
    }
    let base = challenge
        .url()
        .await
        .ok()
        .flatten()
        .ok_or_else(|| CaptchaError::Unsolvable("challenge frame has no URL".into()))?;
    let resolved = url::Url::parse(&base)
        .and_then(|b| b.join(src))
        .map_err(|e| CaptchaError::Unsolvable(format!("bad audio URL '{src}': {e}")))?;
    Ok(resolved.to_string())
}
