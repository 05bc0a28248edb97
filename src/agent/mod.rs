//! Conversation orchestrator - the tool-augmented response loop
//!
//! USER → MODEL → (TOOL CALLS → RESOLVE → MODEL)* → FINAL TEXT
//!
//! Each iteration appends the assistant's tool-call message verbatim,
//! then exactly one tool message per request, in request order.

use crate::error::ChatError;
use crate::llm::{ModelClient, TextStream};
use crate::models::{
    Conversation, Message, ModelReply, ToolInvocationRequest, TurnOutcome,
};
use crate::tools::ToolRegistry;
use crate::Result;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const SYSTEM_MESSAGE: &str = "You are a helpful assistant for a stock broker called CaishenAI. \
Give short, courteous answers, no more than 1 sentence. \
Always be accurate. If you don't know the answer, say so.";

pub struct ChatOrchestrator {
    client: Arc<dyn ModelClient>,
    registry: Arc<ToolRegistry>,
    max_tool_iterations: u32,
    system_message: String,
}

impl ChatOrchestrator {
    pub fn new(
        client: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        max_tool_iterations: u32,
    ) -> Self {
        Self {
            client,
            registry,
            max_tool_iterations,
            system_message: SYSTEM_MESSAGE.to_string(),
        }
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = system_message.into();
        self
    }

    /// Run one user turn to completion
    pub async fn run_turn(&self, history: Conversation, user_message: &str) -> Result<TurnOutcome> {
        history.validate_pairing()?;

        let mut conversation = history;
        conversation.push(Message::user(user_message));

        let declarations = self.registry.declarations();
        let mut iterations: u32 = 0;
        let mut touched: Vec<String> = Vec::new();

        info!(
            model = %self.client.model(),
            history_len = conversation.len(),
            tools = declarations.len(),
            "Orchestrator: starting turn"
        );

        loop {
            let reply = self
                .client
                .complete(&self.system_message, &conversation, &declarations)
                .await
                .map_err(|e| log_model_failure(e, &conversation))?;

            match reply {
                ModelReply::FinalText(text) => {
                    conversation.push(Message::assistant(text.clone()));

                    info!(
                        iterations,
                        touched = ?touched,
                        history_len = conversation.len(),
                        "Orchestrator: turn complete"
                    );

                    return Ok(TurnOutcome {
                        final_text: text,
                        history: conversation,
                        touched,
                        iterations,
                    });
                }
                ModelReply::ToolCallsRequested {
                    requests,
                    assistant_message,
                } => {
                    if iterations == self.max_tool_iterations {
                        warn!(
                            iterations,
                            pending = requests.len(),
                            "Tool loop cap reached"
                        );
                        return Err(ChatError::ToolLoopExceeded {
                            iterations,
                            history: Box::new(conversation),
                        });
                    }

                    check_requests_match(&requests, &assistant_message)
                        .map_err(|e| log_model_failure(e, &conversation))?;

                    conversation.push(assistant_message);

                    for request in &requests {
                        let content = self.resolve(request, &mut touched).await;
                        conversation.push(Message::tool_result(request.id.clone(), content));
                    }

                    iterations += 1;
                    debug!(iterations, resolved = requests.len(), "Tool calls resolved");
                }
            }
        }
    }

    /// Start a plain streamed reply; no tools are advertised
    pub async fn stream_turn(
        &self,
        history: Conversation,
        user_message: &str,
    ) -> Result<StreamingTurn> {
        history.validate_pairing()?;

        let mut conversation = history;
        conversation.push(Message::user(user_message));

        info!(
            model = %self.client.model(),
            history_len = conversation.len(),
            "Orchestrator: starting streamed turn"
        );

        let stream = self
            .client
            .complete_streaming(&self.system_message, &conversation)
            .await
            .map_err(|e| log_model_failure(e, &conversation))?;

        Ok(StreamingTurn {
            conversation,
            stream,
            text: String::new(),
            drained: false,
            failed: false,
        })
    }

    /// Tool failures become a readable tool message; only successes touch names
    async fn resolve(&self, request: &ToolInvocationRequest, touched: &mut Vec<String>) -> String {
        match self.registry.invoke(request).await {
            Ok(output) => {
                for name in output.touched {
                    if !touched.iter().any(|t| t.eq_ignore_ascii_case(&name)) {
                        touched.push(name);
                    }
                }
                output.text
            }
            Err(error) => {
                warn!(tool = %request.name, call_id = %request.id, "Reporting tool error to model: {}", error);
                tool_error_text(&error)
            }
        }
    }
}

fn tool_error_text(error: &ChatError) -> String {
    match error {
        ChatError::UnknownTool(name) => format!("Error: there is no tool named '{}'", name),
        other => format!("Error: {}", other),
    }
}

/// The assistant message must announce exactly the calls being resolved
fn check_requests_match(requests: &[ToolInvocationRequest], assistant_message: &Message) -> Result<()> {
    let announced: Vec<&str> = assistant_message
        .requested_calls()
        .iter()
        .map(|c| c.id.as_str())
        .collect();
    let requested: Vec<&str> = requests.iter().map(|r| r.id.as_str()).collect();

    if announced != requested {
        return Err(ChatError::ProtocolViolation(format!(
            "assistant message announces calls {:?} but requests were {:?}",
            announced, requested
        )));
    }
    Ok(())
}

fn log_model_failure(error: ChatError, conversation: &Conversation) -> ChatError {
    match &error {
        ChatError::ProtocolViolation(reason) => error!(
            reason = %reason,
            messages = ?conversation.messages(),
            "Model reply violated the chat protocol"
        ),
        other => error!("Model call failed: {}", other),
    }
    error
}

/// A streamed reply in progress.
///
/// Fragments are pulled with [`StreamingTurn::next_fragment`]. Once the stream
/// reaches its end marker, [`StreamingTurn::finish`] returns the updated
/// history. Dropping the turn abandons it; the caller's history is untouched.
pub struct StreamingTurn {
    conversation: Conversation,
    stream: TextStream,
    text: String,
    drained: bool,
    failed: bool,
}

impl StreamingTurn {
    /// Next fragment, or `None` once the stream has ended
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        if self.drained || self.failed {
            return None;
        }

        match self.stream.next().await {
            Some(Ok(fragment)) => {
                self.text.push_str(&fragment);
                Some(Ok(fragment))
            }
            Some(Err(error)) => {
                warn!("Streamed reply failed: {}", error);
                self.failed = true;
                Some(Err(error))
            }
            None => {
                self.drained = true;
                None
            }
        }
    }

    /// Text received so far
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_drained(&self) -> bool {
        self.drained
    }

    /// History plus the user message and the full assistant reply
    pub fn finish(self) -> Result<Conversation> {
        if !self.drained || self.failed {
            return Err(ChatError::StreamNotDrained);
        }

        let mut conversation = self.conversation;
        conversation.push(Message::assistant(self.text));
        Ok(conversation)
    }
}
