//! Core data models for the stock chat orchestrator

use crate::error::ChatError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fmt;

//
// ================= Messages =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A function call embedded in an assistant message, in provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded argument object, exactly as the provider sent it
    #[serde(default)]
    pub arguments: String,
}

fn default_call_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// Assistant turn that requests tool calls (content is usually empty)
    /// With no calls the message degrades to plain (possibly empty) assistant text
    pub fn assistant_tool_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        if calls.is_empty() {
            return Self::assistant(content.unwrap_or_default());
        }
        Self {
            role: Role::Assistant,
            content,
            tool_calls: Some(calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Tool calls carried by this message, empty for anything but a requesting assistant turn
    pub fn requested_calls(&self) -> &[ToolCall] {
        self.tool_calls.as_deref().unwrap_or_default()
    }
}

//
// ================= Conversation =================
//

/// Ordered message history, replayed verbatim to the model on every call
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }

    /// Check that every tool result answers a request of the assistant turn
    /// directly before it, and that every request got exactly one result.
    pub fn validate_pairing(&self) -> Result<()> {
        let mut open: HashSet<&str> = HashSet::new();

        for (index, message) in self.messages.iter().enumerate() {
            match message.role {
                Role::Tool => {
                    let id = message.tool_call_id.as_deref().ok_or_else(|| {
                        ChatError::ProtocolViolation(format!(
                            "tool message at {} has no tool_call_id",
                            index
                        ))
                    })?;
                    if !open.remove(id) {
                        return Err(ChatError::ProtocolViolation(format!(
                            "tool message at {} answers unknown or already answered call {}",
                            index, id
                        )));
                    }
                }
                _ => {
                    if !open.is_empty() {
                        return Err(ChatError::ProtocolViolation(format!(
                            "message at {} follows {} unanswered tool call(s)",
                            index,
                            open.len()
                        )));
                    }
                    for call in message.requested_calls() {
                        open.insert(call.id.as_str());
                    }
                }
            }
        }

        if open.is_empty() {
            Ok(())
        } else {
            Err(ChatError::ProtocolViolation(format!(
                "{} tool call(s) left unanswered",
                open.len()
            )))
        }
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

//
// ================= Tool Declarations =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSchema {
    pub name: &'static str,
    pub param_type: ParamType,
    pub description: &'static str,
    pub required: bool,
}

/// Name, description and parameter schema advertised to the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParameterSchema>,
}

#[derive(Serialize, Clone, Debug)]
pub struct ToolSpec {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Serialize, Clone, Debug)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDeclaration {
    /// JSON-schema object describing the parameters
    pub fn parameters_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = vec![];

        for param in &self.parameters {
            properties.insert(
                param.name.to_string(),
                json!({
                    "type": param.param_type.as_str(),
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(param.name);
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    pub fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name.to_string(),
                description: self.description.to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

//
// ================= Model Replies =================
//

/// One requested function execution, produced by the model client
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocationRequest {
    pub id: String,
    pub name: String,
    /// Raw JSON argument payload; parsed at invocation time
    pub arguments: String,
}

impl From<&ToolCall> for ToolInvocationRequest {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.function.name.clone(),
            arguments: call.function.arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    FinalText(String),
    ToolCallsRequested {
        requests: Vec<ToolInvocationRequest>,
        /// Must be appended verbatim ahead of the tool results
        assistant_message: Message,
    },
}

//
// ================= Tool I/O =================
//

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub text: String,
    /// Stock or commodity names this call referred to
    pub touched: Vec<String>,
}

impl ToolOutput {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            touched: vec![],
        }
    }

    pub fn touching(text: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            touched: vec![name.into()],
        }
    }
}

//
// ================= Prices =================
//

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub symbol: String,
    pub price: f64,
}

//
// ================= Final Result =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnOutcome {
    pub final_text: String,
    pub history: Conversation,
    /// Touched names in first-touched order, without duplicates
    pub touched: Vec<String>,
    pub iterations: u32,
}

impl TurnOutcome {
    /// Subject for the illustrative image: only the first touched name is used
    pub fn image_subject(&self) -> Option<&str> {
        self.touched.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: "get_stock_price".to_string(),
                arguments: r#"{"desired_stock":"gold"}"#.to_string(),
            },
        }
    }

    #[test]
    fn test_pairing_accepts_answered_calls() {
        let conversation = Conversation::from(vec![
            Message::user("price of gold and silver?"),
            Message::assistant_tool_calls(None, vec![call("a"), call("b")]),
            Message::tool_result("a", "Price of gold is $1.42"),
            Message::tool_result("b", "Price of silver is $0.89"),
            Message::assistant("Gold is $1.42 and silver is $0.89."),
        ]);
        assert!(conversation.validate_pairing().is_ok());
    }

    #[test]
    fn test_pairing_rejects_orphan_tool_message() {
        let conversation = Conversation::from(vec![
            Message::user("hi"),
            Message::tool_result("zzz", "stray"),
        ]);
        assert!(matches!(
            conversation.validate_pairing(),
            Err(ChatError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_pairing_rejects_unanswered_call() {
        let conversation = Conversation::from(vec![
            Message::user("price of gold?"),
            Message::assistant_tool_calls(None, vec![call("a"), call("b")]),
            Message::tool_result("a", "Price of gold is $1.42"),
            Message::assistant("done"),
        ]);
        assert!(conversation.validate_pairing().is_err());
    }

    #[test]
    fn test_pairing_rejects_duplicate_answer() {
        let conversation = Conversation::from(vec![
            Message::assistant_tool_calls(None, vec![call("a")]),
            Message::tool_result("a", "one"),
            Message::tool_result("a", "two"),
        ]);
        assert!(conversation.validate_pairing().is_err());
    }

    #[test]
    fn test_message_wire_format() {
        let message = Message::tool_result("call_1", "Price of gold is $1.42");
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");
        assert!(json.get("tool_calls").is_none());

        let assistant = Message::assistant_tool_calls(None, vec![call("call_1")]);
        let json = serde_json::to_value(&assistant).unwrap();
        assert_eq!(json["tool_calls"][0]["type"], "function");
        assert_eq!(json["tool_calls"][0]["function"]["name"], "get_stock_price");
    }

    #[test]
    fn test_declaration_schema() {
        let declaration = ToolDeclaration {
            name: "get_stock_price",
            description: "Get the price of a desired_stock.",
            parameters: vec![ParameterSchema {
                name: "desired_stock",
                param_type: ParamType::String,
                description: "The stock that the customer wants to know the price of",
                required: true,
            }],
        };

        let spec = serde_json::to_value(declaration.to_spec()).unwrap();
        assert_eq!(spec["type"], "function");
        assert_eq!(spec["function"]["name"], "get_stock_price");
        assert_eq!(spec["function"]["parameters"]["required"][0], "desired_stock");
        assert_eq!(spec["function"]["parameters"]["additionalProperties"], false);
    }

    #[test]
    fn test_image_subject_is_first_touched() {
        let outcome = TurnOutcome {
            final_text: "ok".into(),
            history: Conversation::new(),
            touched: vec!["gold".into(), "silver".into()],
            iterations: 1,
        };
        assert_eq!(outcome.image_subject(), Some("gold"));
    }
}
