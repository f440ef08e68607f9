//! Audio challenge transcription.
//!
//! The audio payload is shipped to a speech-to-text HTTP endpoint and the
//! first transcript alternative comes back as the challenge answer. The
//! trait keeps the solver testable without a speech backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::CaptchaError;

/// Default recognizer endpoint (Chromium's web-speech API shape: newline
/// separated JSON with `result[].alternative[].transcript`).
const DEFAULT_ENDPOINT: &str =
    "http://www.google.com/speech-api/v2/recognize?client=chromium&lang=en-US";

/// Turns challenge audio into text.
#[async_trait]
pub trait Transcribe: Send + Sync {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CaptchaError>;
}

/// HTTP speech-to-text client.
pub struct HttpTranscriber {
    endpoint: String,
    client: Client,
}

impl HttpTranscriber {
    pub fn new(endpoint: Option<String>) -> Result<Self, CaptchaError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CaptchaError::Network(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            client,
        })
    }

    /// Parse the newline-separated JSON response. Empty `{"result":[]}`
    /// keepalive lines precede the real payload.
    fn parse_response(body: &str) -> Option<String> {
        for line in body.lines() {
            let json: serde_json::Value = match serde_json::from_str(line) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let transcript = json
                .get("result")
                .and_then(|r| r.get(0))
                .and_then(|r| r.get("alternative"))
                .and_then(|a| a.get(0))
                .and_then(|a| a.get("transcript"))
                .and_then(|t| t.as_str());
            if let Some(text) = transcript {
                let text = text.trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }
        None
    }
}

#[async_trait]
impl Transcribe for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8]) -> Result<String, CaptchaError> {
        debug!("Transcribing {} bytes of challenge audio", audio.len());

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "audio/mpeg")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| CaptchaError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(CaptchaError::Transcription(format!(
                "recognizer returned HTTP {}",
                response.status()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| CaptchaError::Network(e.to_string()))?;

        Self::parse_response(&body).ok_or_else(|| {
            CaptchaError::Transcription("no transcript in recognizer response".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn parses_keepalive_then_transcript() {
        let body = "{\"result\":[]}\n\
            {\"result\":[{\"alternative\":[{\"transcript\":\"seven four two\",\"confidence\":0.9}],\"final\":true}],\"result_index\":0}\n";
        assert_eq!(
            HttpTranscriber::parse_response(body),
            Some("seven four two".to_string())
        );
    }

    #[test]
    fn empty_response_yields_none() {
        assert_eq!(HttpTranscriber::parse_response("{\"result\":[]}\n"), None);
        assert_eq!(HttpTranscriber::parse_response(""), None);
    }

    #[tokio::test]
    async fn posts_audio_and_returns_transcript() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/recognize"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "{\"result\":[]}\n{\"result\":[{\"alternative\":[{\"transcript\":\"hello world\"}]}]}\n",
            ))
            .mount(&server)
            .await;

        let transcriber =
            HttpTranscriber::new(Some(format!("{}/recognize", server.uri()))).unwrap();
        let text = transcriber.transcribe(b"fake-mp3-bytes").await.unwrap();
        assert_eq!(text, "hello world");
    }

    #[tokio::test]
    async fn server_error_is_a_transcription_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let transcriber = HttpTranscriber::new(Some(server.uri())).unwrap();
        let err = transcriber.transcribe(b"bytes").await.unwrap_err();
        assert!(matches!(err, CaptchaError::Transcription(_)));
    }
}
