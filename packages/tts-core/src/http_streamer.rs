//! HTTP client for streaming synthesis requests to the remote TTS server.
//!
//! Posts a synthesis request and invokes a callback for each chunk of audio
//! as the response body arrives, rather than buffering the whole response.

use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::{TtsError, TtsResult};
use crate::protocol_constants::{HTTP_READ_IDLE_TIMEOUT_SECS, HTTP_TOTAL_TIMEOUT_SECS};

/// A synthesis request sent to the remote server.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub speed: f32,
    pub lang: String,
    pub stream: bool,
    pub format: String,
}

/// A single chunk of audio received from the synthesis response body.
#[derive(Debug, Clone)]
pub struct ReceivedChunk {
    pub bytes: bytes::Bytes,
    pub sequence: u64,
    pub received_at: Instant,
}

/// Timing recorded for a single streaming request.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingTiming {
    pub time_to_first_byte: Option<Duration>,
    pub time_to_first_chunk: Option<Duration>,
}

/// Streams a synthesis request, invoking `on_chunk` for each chunk of the
/// response body. Returns timing information once the body is exhausted.
pub struct HttpStreamer {
    client: Client,
    base_url: String,
}

impl HttpStreamer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(HTTP_TOTAL_TIMEOUT_SECS))
                .build()
                .expect("reqwest client builds with a fixed static config"),
            base_url: base_url.into(),
        }
    }

    pub async fn stream(
        &self,
        request: &SynthesisRequest,
        cancel: &CancellationToken,
        mut on_chunk: impl FnMut(ReceivedChunk),
    ) -> TtsResult<StreamingTiming> {
        let start = Instant::now();
        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));

        tracing::info!(url, text_len = request.text.len(), "posting synthesis request");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TtsError::Network(e.to_string()))?;

        let mut timing = StreamingTiming::default();
        timing.time_to_first_byte = Some(start.elapsed());

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Http { status, body });
        }

        let mut stream = response.bytes_stream();
        let mut sequence = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(TtsError::Canceled("speak() canceled".into()));
                }
                next = tokio::time::timeout(
                    Duration::from_secs(HTTP_READ_IDLE_TIMEOUT_SECS),
                    stream.next(),
                ) => next,
            };

            let chunk = match next {
                Ok(Some(Ok(bytes))) => bytes,
                Ok(Some(Err(e))) => return Err(TtsError::Network(e.to_string())),
                Ok(None) => break,
                Err(_) => return Err(TtsError::Timeout("synthesis stream idle".into())),
            };

            if chunk.is_empty() {
                continue;
            }

            if timing.time_to_first_chunk.is_none() {
                timing.time_to_first_chunk = Some(start.elapsed());
            }

            on_chunk(ReceivedChunk {
                bytes: chunk,
                sequence,
                received_at: Instant::now(),
            });
            sequence += 1;
        }

        Ok(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesis_request_serializes_expected_fields() {
        let req = SynthesisRequest {
            text: "hi".into(),
            voice: "default".into(),
            speed: 1.0,
            lang: "en".into(),
            stream: true,
            format: "pcm".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["format"], "pcm");
    }
}
