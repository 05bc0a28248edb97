//! OpenAI-compatible chat-completions client
//!
//! OpenAI, Anthropic and Gemini all expose the same `/chat/completions`
//! wire format, so one client covers every provider; only the base URL,
//! key and model differ. Uses a long-lived reqwest::Client for pooling.

use super::{ModelClient, TextStream};
use crate::config::ProviderConfig;
use crate::error::ChatError;
use crate::models::{
    Conversation, Message, ModelReply, ToolCall, ToolDeclaration, ToolInvocationRequest, ToolSpec,
};
use crate::Result;
use async_stream::stream;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

const STREAM_DONE: &str = "[DONE]";

pub struct OpenAiCompatibleClient {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    /// Whole-request limit for blocking calls; idle limit between stream events
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    pub fn new(provider: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| ChatError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: provider.api_key.clone(),
            endpoint: format!(
                "{}/chat/completions",
                provider.base_url.trim_end_matches('/')
            ),
            model: provider.model.clone(),
            timeout,
        })
    }

    fn build_request<'a>(
        &'a self,
        system: &str,
        conversation: &'a Conversation,
        tools: &[ToolDeclaration],
        stream: bool,
    ) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(system));
        messages.extend(conversation.messages().iter().cloned());

        ChatCompletionRequest {
            model: &self.model,
            messages,
            tools: if tools.is_empty() {
                None
            } else {
                Some(tools.iter().map(ToolDeclaration::to_spec).collect())
            },
            stream,
        }
    }

    /// Streamed bodies outlive any fixed deadline, so only blocking calls get one
    fn post(&self, request: &ChatCompletionRequest<'_>) -> RequestBuilder {
        let builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request);

        if request.stream {
            builder
        } else {
            builder.timeout(self.timeout)
        }
    }

    async fn send(&self, request: &ChatCompletionRequest<'_>) -> Result<reqwest::Response> {
        let response = self.post(request).send().await.map_err(|e| {
            error!(model = %self.model, "Model request failed: {}", e);
            ChatError::ProviderUnavailable(format!("{} request failed: {}", self.model, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(model = %self.model, %status, "Model error response: {}", error_text);
            return Err(ChatError::ProviderUnavailable(format!(
                "{} returned {}: {}",
                self.model, status, error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait::async_trait]
impl ModelClient for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDeclaration],
    ) -> Result<ModelReply> {
        let request = self.build_request(system, conversation, tools, false);

        info!(
            model = %self.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "Calling chat completions"
        );

        let response = self.send(&request).await?;

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            error!(model = %self.model, "Failed to parse completion: {}", e);
            ChatError::ProtocolViolation(format!("unparseable completion: {}", e))
        })?;

        parse_completion(completion)
    }

    async fn complete_streaming(
        &self,
        system: &str,
        conversation: &Conversation,
    ) -> Result<TextStream> {
        let request = self.build_request(system, conversation, &[], true);
        info!(model = %self.model, messages = request.messages.len(), "Calling streaming chat completions");

        let response = self.send(&request).await?;
        Ok(decode_text_stream(
            response.bytes_stream(),
            self.model.clone(),
            self.timeout,
        ))
    }
}

/// Turn a raw SSE byte stream into text fragments, ending at `[DONE]`
fn decode_text_stream<S, B, E>(bytes: S, model: String, idle_timeout: Duration) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut events = Box::pin(bytes.eventsource());

    let text = stream! {
        let mut finished = false;
        let mut failed = false;

        loop {
            let event = match tokio::time::timeout(idle_timeout, events.next()).await {
                Ok(Some(Ok(event))) => event,
                Ok(None) => break,
                Ok(Some(Err(e))) => {
                    error!(model = %model, "Stream interrupted: {}", e);
                    failed = true;
                    yield Err(ChatError::ProviderUnavailable(format!("stream interrupted: {}", e)));
                    break;
                }
                Err(_) => {
                    error!(model = %model, "Stream idle for {}s", idle_timeout.as_secs());
                    failed = true;
                    yield Err(ChatError::ProviderUnavailable(format!(
                        "stream idle for {}s",
                        idle_timeout.as_secs()
                    )));
                    break;
                }
            };

            match parse_stream_data(&event.data) {
                Some(SseEvent::Fragment(fragment)) => yield Ok(fragment),
                Some(SseEvent::Done) => {
                    finished = true;
                    break;
                }
                Some(SseEvent::Invalid(reason)) => {
                    failed = true;
                    yield Err(ChatError::ProtocolViolation(reason));
                    break;
                }
                None => {}
            }
        }

        if finished {
            debug!(model = %model, "Stream completed");
        } else if !failed {
            yield Err(ChatError::ProviderUnavailable(
                "stream closed before the end marker".to_string(),
            ));
        }
    };

    Box::pin(text)
}

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolSpec>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Classify the first choice of a completion
fn parse_completion(completion: ChatCompletionResponse) -> Result<ModelReply> {
    let choice = completion.choices.into_iter().next().ok_or_else(|| {
        ChatError::ProtocolViolation("completion carried no choices".to_string())
    })?;

    // A tool_calls finish with no calls still continues the loop
    let calls = choice.message.tool_calls.unwrap_or_default();
    if !calls.is_empty() || choice.finish_reason.as_deref() == Some("tool_calls") {
        let requests = calls.iter().map(ToolInvocationRequest::from).collect();
        return Ok(ModelReply::ToolCallsRequested {
            requests,
            assistant_message: Message::assistant_tool_calls(choice.message.content, calls),
        });
    }

    match choice.message.content {
        Some(text) => Ok(ModelReply::FinalText(text)),
        None => Err(ChatError::ProtocolViolation(format!(
            "completion has neither text nor tool calls (finish_reason: {})",
            choice.finish_reason.as_deref().unwrap_or("none")
        ))),
    }
}

//
// ================= SSE Decoding =================
//

#[derive(Debug, PartialEq)]
enum SseEvent {
    Fragment(String),
    Done,
    Invalid(String),
}

/// Classify one event's data field; `None` for events that carry no text
fn parse_stream_data(data: &str) -> Option<SseEvent> {
    let data = data.trim();
    if data.is_empty() {
        return None;
    }
    if data == STREAM_DONE {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
            .map(SseEvent::Fragment),
        Err(e) => Some(SseEvent::Invalid(format!("unparseable stream chunk: {}", e))),
    }
}
