use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::{debug, error, info};

use super::{SpeechError, SpeechToText, TranscriptSegment};

#[derive(Debug, Serialize)]
struct TranscriptionPayload {
    content: String, // base64 WAV
    language: String,
    timestamps: bool,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    result: TranscriptionResult,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResult {
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
    code: Option<String>,
}

/// Encode raw f32 samples as 16-bit mono WAV, in memory.
fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SpeechError> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)
            .map_err(|e| SpeechError::Rejected(format!("failed to encode audio: {e}")))?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| SpeechError::Rejected(format!("failed to encode audio: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| SpeechError::Rejected(format!("failed to encode audio: {e}")))?;
    }
    Ok(cursor.into_inner())
}

pub struct HttpSpeechProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpSpeechProvider {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Self {
        info!("Initialized speech provider with endpoint: {}", endpoint);
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl SpeechToText for HttpSpeechProvider {
    fn name(&self) -> &'static str {
        "speech API"
    }

    async fn transcribe(
        &self,
        samples: &[f32],
        sample_rate: u32,
        language: &str,
    ) -> Result<TranscriptSegment, SpeechError> {
        let wav = encode_wav(samples, sample_rate)?;

        let body = TranscriptionPayload {
            content: BASE64.encode(&wav),
            language: language.to_string(),
            timestamps: false,
        };

        debug!("Sending {} byte chunk to speech API", wav.len());

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| SpeechError::Unavailable(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            error!(
                "speech API request failed with status {}: {}",
                status, response_text
            );

            if let Ok(err) = serde_json::from_str::<ErrorResponse>(&response_text) {
                return Err(SpeechError::Rejected(format!(
                    "{} (code: {:?})",
                    err.error.message, err.error.code
                )));
            }
            return Err(SpeechError::Unavailable(format!(
                "status {status}: {response_text}"
            )));
        }

        let transcription: TranscriptionResponse = serde_json::from_str(&response_text)
            .map_err(|e| SpeechError::Rejected(format!("unexpected response shape: {e}")))?;

        let text = transcription.result.text.trim().to_string();
        if text.is_empty() {
            return Err(SpeechError::NoSpeech);
        }

        debug!("Transcription complete: {} chars", text.len());
        Ok(TranscriptSegment {
            text,
            language: language.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wav_produces_riff_container() {
        let samples = vec![0.0f32, 0.5, -0.5, 1.0, -1.0];
        let wav = encode_wav(&samples, 16000).unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        // 44-byte header plus two bytes per 16-bit sample.
        assert_eq!(wav.len(), 44 + samples.len() * 2);
    }

    #[test]
    fn test_encode_wav_clamps_out_of_range_samples() {
        let wav = encode_wav(&[2.0, -2.0], 16000).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let decoded: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(decoded, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn test_success_response_parses_text() {
        let body = r#"{"result":{"text":"  hello there  "}}"#;
        let parsed: TranscriptionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.result.text.trim(), "hello there");
    }

    #[test]
    fn test_error_response_parses_message() {
        let body = r#"{"error":{"message":"invalid audio","code":"bad_request"}}"#;
        let parsed: ErrorResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.error.message, "invalid audio");
        assert_eq!(parsed.error.code.as_deref(), Some("bad_request"));
    }
}
