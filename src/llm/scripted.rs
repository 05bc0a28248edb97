//! Scripted model client
//!
//! Plays back a fixed sequence of replies and records what it was asked.
//! Used by tests and by the offline demo when no provider key is set.

use super::{ModelClient, TextStream};
use crate::error::ChatError;
use crate::models::{
    Conversation, FunctionCall, Message, ModelReply, Role, ToolCall, ToolDeclaration,
    ToolInvocationRequest,
};
use crate::Result;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One scripted response
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Reply(ModelReply),
    /// Final text made of the tool results that follow the last assistant turn
    EchoToolResults,
    /// Fail the call as an unreachable provider
    Unavailable(String),
    /// Stream these fragments, then the end marker unless `complete` is false
    Stream {
        fragments: Vec<String>,
        complete: bool,
    },
}

impl ScriptStep {
    pub fn text(text: impl Into<String>) -> Self {
        ScriptStep::Reply(ModelReply::FinalText(text.into()))
    }

    /// Request one call per `(name, arguments)` pair, with generated ids
    pub fn calls(calls: &[(&str, &str)]) -> Self {
        let calls: Vec<ToolCall> = calls
            .iter()
            .map(|(name, arguments)| ToolCall {
                id: format!("call_{}", Uuid::new_v4().simple()),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            })
            .collect();

        ScriptStep::Reply(ModelReply::ToolCallsRequested {
            requests: calls.iter().map(ToolInvocationRequest::from).collect(),
            assistant_message: Message::assistant_tool_calls(None, calls),
        })
    }

    pub fn call(name: &str, arguments: &str) -> Self {
        Self::calls(&[(name, arguments)])
    }

    pub fn stream(fragments: &[&str]) -> Self {
        ScriptStep::Stream {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            complete: true,
        }
    }
}

/// What one call to the client received
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system: String,
    pub conversation: Conversation,
    pub tool_names: Vec<String>,
    pub streaming: bool,
}

pub struct ScriptedModelClient {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedModelClient {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(vec![]),
        }
    }

    /// Script that looks up one stock and reads the result back
    pub fn price_demo(stock: &str) -> Self {
        let arguments = serde_json::json!({ "desired_stock": stock }).to_string();
        Self::new(vec![
            ScriptStep::call("get_stock_price", &arguments),
            ScriptStep::EchoToolResults,
        ])
    }

    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.steps.lock().await.len()
    }

    async fn next_step(
        &self,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDeclaration],
        streaming: bool,
    ) -> Result<ScriptStep> {
        self.requests.lock().await.push(RecordedRequest {
            system: system.to_string(),
            conversation: conversation.clone(),
            tool_names: tools.iter().map(|t| t.name.to_string()).collect(),
            streaming,
        });

        self.steps.lock().await.pop_front().ok_or_else(|| {
            ChatError::ProviderUnavailable("scripted model has no replies left".to_string())
        })
    }
}

fn trailing_tool_results(conversation: &Conversation) -> String {
    let results: Vec<&str> = conversation
        .messages()
        .iter()
        .rev()
        .take_while(|m| m.role == Role::Tool)
        .filter_map(|m| m.content.as_deref())
        .collect();

    results.into_iter().rev().collect::<Vec<_>>().join("\n")
}

#[async_trait::async_trait]
impl ModelClient for ScriptedModelClient {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        system: &str,
        conversation: &Conversation,
        tools: &[ToolDeclaration],
    ) -> Result<ModelReply> {
        match self.next_step(system, conversation, tools, false).await? {
            ScriptStep::Reply(reply) => Ok(reply),
            ScriptStep::EchoToolResults => {
                Ok(ModelReply::FinalText(trailing_tool_results(conversation)))
            }
            ScriptStep::Unavailable(reason) => Err(ChatError::ProviderUnavailable(reason)),
            ScriptStep::Stream { .. } => Err(ChatError::ProtocolViolation(
                "stream step used for a blocking call".to_string(),
            )),
        }
    }

    async fn complete_streaming(
        &self,
        system: &str,
        conversation: &Conversation,
    ) -> Result<TextStream> {
        let (fragments, complete) = match self.next_step(system, conversation, &[], true).await? {
            ScriptStep::Stream {
                fragments,
                complete,
            } => (fragments, complete),
            ScriptStep::Reply(ModelReply::FinalText(text)) => (vec![text], true),
            ScriptStep::EchoToolResults => (vec![trailing_tool_results(conversation)], true),
            ScriptStep::Unavailable(reason) => return Err(ChatError::ProviderUnavailable(reason)),
            ScriptStep::Reply(ModelReply::ToolCallsRequested { .. }) => {
                return Err(ChatError::ProtocolViolation(
                    "tool calls are not available while streaming".to_string(),
                ))
            }
        };

        let mut items: Vec<Result<String>> = fragments.into_iter().map(Ok).collect();
        if !complete {
            items.push(Err(ChatError::ProviderUnavailable(
                "stream closed before the end marker".to_string(),
            )));
        }

        Ok(Box::pin(futures::stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_replays_in_order_and_records() {
        let client = ScriptedModelClient::new(vec![
            ScriptStep::call("get_stock_price", r#"{"desired_stock":"gold"}"#),
            ScriptStep::text("Gold is $1.42."),
        ]);
        let conversation = Conversation::from(vec![Message::user("gold?")]);

        let first = client.complete("sys", &conversation, &[]).await.unwrap();
        assert!(matches!(first, ModelReply::ToolCallsRequested { .. }));
        let second = client.complete("sys", &conversation, &[]).await.unwrap();
        assert_eq!(second, ModelReply::FinalText("Gold is $1.42.".into()));

        assert!(client.complete("sys", &conversation, &[]).await.is_err());
        assert_eq!(client.requests().await.len(), 3);
    }

    #[tokio::test]
    async fn test_generated_call_ids_are_unique() {
        let step = ScriptStep::calls(&[("a", "{}"), ("b", "{}")]);
        match step {
            ScriptStep::Reply(ModelReply::ToolCallsRequested { requests, .. }) => {
                assert_ne!(requests[0].id, requests[1].id);
            }
            _ => panic!("expected tool calls"),
        }
    }

    #[tokio::test]
    async fn test_echo_uses_trailing_tool_results() {
        let client = ScriptedModelClient::new(vec![ScriptStep::EchoToolResults]);
        let conversation = Conversation::from(vec![
            Message::user("gold?"),
            Message::assistant_tool_calls(None, vec![]),
            Message::tool_result("a", "Price of gold is $1.42"),
        ]);

        let reply = client.complete("sys", &conversation, &[]).await.unwrap();
        assert_eq!(reply, ModelReply::FinalText("Price of gold is $1.42".into()));
    }

    #[tokio::test]
    async fn test_incomplete_stream_ends_with_error() {
        let client = ScriptedModelClient::new(vec![ScriptStep::Stream {
            fragments: vec!["Hel".into(), "lo".into()],
            complete: false,
        }]);

        let mut stream = client
            .complete_streaming("sys", &Conversation::new())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "Hel");
        assert_eq!(stream.next().await.unwrap().unwrap(), "lo");
        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }
}
