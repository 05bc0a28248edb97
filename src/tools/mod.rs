//! Tool trait and registry
//!
//! Tools are looked up by the name the model asked for. Arguments are
//! parsed and checked against the declared schema before a tool runs.

pub mod schema;
pub mod stock;

pub use stock::{GetStockPriceTool, SetStockPriceTool};

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::models::{ToolDeclaration, ToolInvocationRequest, ToolOutput};
use crate::store::PriceStore;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A function the model may call
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn declaration(&self) -> ToolDeclaration;

    /// Runs with arguments already validated against `declaration()`
    async fn execute(&self, args: &Value) -> Result<ToolOutput>;
}

struct RegisteredTool {
    declaration: ToolDeclaration,
    tool: Arc<dyn Tool>,
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, so declarations are advertised deterministically
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: vec![],
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let declaration = tool.declaration();
        let name = declaration.name.to_string();

        if self.tools.contains_key(&name) {
            return Err(ChatError::DuplicateTool(name));
        }

        debug!(tool = %name, "Registered tool");
        self.order.push(name.clone());
        self.tools.insert(name, RegisteredTool { declaration, tool });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|entry| entry.declaration.clone())
            .collect()
    }

    /// Declarations for a subset of tools; unknown names are skipped
    pub fn declarations_for(&self, names: &[&str]) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter(|name| names.contains(&name.as_str()))
            .filter_map(|name| self.tools.get(name))
            .map(|entry| entry.declaration.clone())
            .collect()
    }

    /// Resolve one request: look up, parse, validate, execute
    pub async fn invoke(&self, request: &ToolInvocationRequest) -> Result<ToolOutput> {
        let entry = self
            .tools
            .get(&request.name)
            .ok_or_else(|| ChatError::UnknownTool(request.name.clone()))?;

        let args = schema::parse_arguments(&request.name, &request.arguments)?;
        schema::validate_arguments(&entry.declaration, &args)?;

        let start = Instant::now();
        let result = entry.tool.execute(&args).await;
        let execution_time_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(output) => info!(
                tool = %request.name,
                call_id = %request.id,
                execution_time_ms,
                touched = ?output.touched,
                "Tool executed"
            ),
            Err(error) => warn!(
                tool = %request.name,
                call_id = %request.id,
                execution_time_ms,
                "Tool failed: {}",
                error
            ),
        }

        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry with the price tools; `set_stock_price` only when updates are allowed
pub fn create_default_registry(
    store: Arc<dyn PriceStore>,
    config: &ChatConfig,
) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    registry.register(Arc::new(GetStockPriceTool::new(store.clone())))?;
    if config.allow_price_updates {
        registry.register(Arc::new(SetStockPriceTool::new(store)))?;
    }

    info!(tools = registry.len(), "Tool registry ready");
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryPriceStore, EXAMPLE_PRICES};

    async fn registry(allow_updates: bool) -> ToolRegistry {
        let store: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
        store.seed(EXAMPLE_PRICES).await.unwrap();
        let config = ChatConfig {
            allow_price_updates: allow_updates,
            ..ChatConfig::default()
        };
        create_default_registry(store, &config).unwrap()
    }

    fn request(name: &str, arguments: &str) -> ToolInvocationRequest {
        ToolInvocationRequest {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    #[tokio::test]
    async fn test_default_registry_contents() {
        let read_only = registry(false).await;
        assert_eq!(read_only.len(), 1);
        assert!(read_only.contains("get_stock_price"));
        assert!(!read_only.contains("set_stock_price"));

        let writable = registry(true).await;
        let names: Vec<&str> = writable.declarations().iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["get_stock_price", "set_stock_price"]);
        assert_eq!(writable.declarations_for(&["set_stock_price", "nope"]).len(), 1);
    }

    #[tokio::test]
    async fn test_blank_stock_name_answers_no_price() {
        let registry = registry(false).await;
        let output = registry
            .invoke(&request("get_stock_price", r#"{"desired_stock":"  "}"#))
            .await
            .unwrap();
        assert_eq!(output.text, stock::NO_PRICE_DATA);
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let mut registry = registry(false).await;
        let store: Arc<dyn PriceStore> = Arc::new(InMemoryPriceStore::new());
        let result = registry.register(Arc::new(GetStockPriceTool::new(store)));
        assert!(matches!(result, Err(ChatError::DuplicateTool(name)) if name == "get_stock_price"));
    }

    #[tokio::test]
    async fn test_invoke_known_tool() {
        let registry = registry(false).await;
        let output = registry
            .invoke(&request("get_stock_price", r#"{"desired_stock":"silver"}"#))
            .await
            .unwrap();
        assert_eq!(output.text, "Price of silver is $0.89");
    }

    #[tokio::test]
    async fn test_invoke_failures() {
        let registry = registry(false).await;

        assert!(matches!(
            registry.invoke(&request("get_weather", "{}")).await,
            Err(ChatError::UnknownTool(_))
        ));
        assert!(matches!(
            registry.invoke(&request("get_stock_price", "{\"desired_stock\":")).await,
            Err(ChatError::MalformedToolArguments { .. })
        ));
        assert!(matches!(
            registry.invoke(&request("get_stock_price", r#"{"stock":"gold"}"#)).await,
            Err(ChatError::ArgumentValidationFailed { .. })
        ));
    }
}
