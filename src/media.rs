//! Speech and image enrichment for chat replies
//!
//! Both are best-effort: a failure is logged and the reply goes out without it.

use crate::config::ProviderConfig;
use crate::error::ChatError;
use crate::models::TurnOutcome;
use crate::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const SPEECH_MODEL: &str = "gpt-4o-mini-tts";
const SPEECH_VOICE: &str = "onyx";
const IMAGE_MODEL: &str = "dall-e-3";
const IMAGE_SIZE: &str = "1024x1024";

#[async_trait::async_trait]
pub trait MediaClient: Send + Sync {
    /// Spoken rendition of `text` (mp3 bytes)
    async fn speech(&self, text: &str) -> Result<Vec<u8>>;

    /// Illustration of a stock or commodity (png bytes)
    async fn image(&self, subject: &str) -> Result<Vec<u8>>;
}

pub fn image_prompt(subject: &str) -> String {
    format!(
        "An image representing the splendour of {subject}, showing the history and unique aspects about {subject}, in a vibrant pop-art style"
    )
}

pub struct OpenAiMediaClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiMediaClient {
    pub fn new(provider: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ChatError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: provider.api_key.clone(),
            base_url: provider.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::MediaError(format!("{} request failed: {}", path, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::MediaError(format!(
                "{} returned {}: {}",
                path, status, error_text
            )));
        }

        Ok(response)
    }
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: String,
    size: &'a str,
    n: u32,
    response_format: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[async_trait::async_trait]
impl MediaClient for OpenAiMediaClient {
    async fn speech(&self, text: &str) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: SPEECH_MODEL,
            voice: SPEECH_VOICE,
            input: text,
        };

        let response = self.post("audio/speech", &request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChatError::MediaError(format!("failed to read audio: {}", e)))?;

        Ok(bytes.to_vec())
    }

    async fn image(&self, subject: &str) -> Result<Vec<u8>> {
        let request = ImageRequest {
            model: IMAGE_MODEL,
            prompt: image_prompt(subject),
            size: IMAGE_SIZE,
            n: 1,
            response_format: "b64_json",
        };

        let response: ImageResponse = self
            .post("images/generations", &request)
            .await?
            .json()
            .await
            .map_err(|e| ChatError::MediaError(format!("unparseable image response: {}", e)))?;

        let encoded = response
            .data
            .into_iter()
            .next()
            .and_then(|d| d.b64_json)
            .ok_or_else(|| ChatError::MediaError("image response carried no data".to_string()))?;

        BASE64
            .decode(encoded)
            .map_err(|e| ChatError::MediaError(format!("invalid image payload: {}", e)))
    }
}

/// Media attached to one reply
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Enrichment {
    pub audio: Option<Vec<u8>>,
    pub image: Option<Vec<u8>>,
}

impl Enrichment {
    pub fn audio_base64(&self) -> Option<String> {
        self.audio.as_ref().map(|bytes| BASE64.encode(bytes))
    }

    pub fn image_base64(&self) -> Option<String> {
        self.image.as_ref().map(|bytes| BASE64.encode(bytes))
    }
}

/// Speech for the final text and an image of the first touched name, concurrently
pub async fn enrich(media: &dyn MediaClient, outcome: &TurnOutcome) -> Enrichment {
    let speech = async {
        match media.speech(&outcome.final_text).await {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!("Speech generation failed: {}", e);
                None
            }
        }
    };

    let image = async {
        let subject = outcome.image_subject()?;
        match media.image(subject).await {
            Ok(image) => {
                info!(subject = %subject, bytes = image.len(), "Image generated");
                Some(image)
            }
            Err(e) => {
                error!(subject = %subject, "Image generation failed: {}", e);
                None
            }
        }
    };

    let (audio, image) = tokio::join!(speech, image);
    Enrichment { audio, image }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Conversation;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingMedia {
        fail_speech: bool,
        subjects: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl MediaClient for RecordingMedia {
        async fn speech(&self, text: &str) -> Result<Vec<u8>> {
            if self.fail_speech {
                return Err(ChatError::MediaError("quota".into()));
            }
            Ok(text.as_bytes().to_vec())
        }

        async fn image(&self, subject: &str) -> Result<Vec<u8>> {
            self.subjects.lock().await.push(subject.to_string());
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
    }

    fn outcome(touched: &[&str]) -> TurnOutcome {
        TurnOutcome {
            final_text: "Gold is $1.42.".into(),
            history: Conversation::new(),
            touched: touched.iter().map(|s| s.to_string()).collect(),
            iterations: 1,
        }
    }

    #[tokio::test]
    async fn test_image_only_for_first_touched() {
        let media = RecordingMedia::default();
        let enrichment = enrich(&media, &outcome(&["gold", "silver"])).await;

        assert_eq!(enrichment.audio.as_deref(), Some("Gold is $1.42.".as_bytes()));
        assert!(enrichment.image.is_some());
        assert_eq!(*media.subjects.lock().await, vec!["gold"]);
        assert_eq!(enrichment.image_base64().as_deref(), Some("iVBORw=="));
    }

    #[tokio::test]
    async fn test_no_touched_means_no_image() {
        let media = RecordingMedia::default();
        let enrichment = enrich(&media, &outcome(&[])).await;
        assert!(enrichment.image.is_none());
        assert!(media.subjects.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let media = RecordingMedia {
            fail_speech: true,
            ..Default::default()
        };
        let enrichment = enrich(&media, &outcome(&["gold"])).await;
        assert!(enrichment.audio.is_none());
        assert!(enrichment.image.is_some());
    }

    #[test]
    fn test_image_prompt() {
        let prompt = image_prompt("gold");
        assert!(prompt.starts_with("An image representing the splendour of gold"));
        assert!(prompt.ends_with("in a vibrant pop-art style"));
    }
}
