//! Price tools backed by the price store

use super::Tool;
use crate::error::ChatError;
use crate::models::{ParamType, ParameterSchema, ToolDeclaration, ToolOutput};
use crate::store::PriceStore;
use crate::Result;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const NO_PRICE_DATA: &str = "No price data available for this stock";
pub const PRICES_UNAVAILABLE: &str = "Price data is unavailable right now, please try again later";

fn string_arg<'a>(tool: &str, args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::ArgumentValidationFailed {
            tool: tool.to_string(),
            reason: format!("'{}' must be a string", name),
        })
}

pub struct GetStockPriceTool {
    store: Arc<dyn PriceStore>,
}

impl GetStockPriceTool {
    pub fn new(store: Arc<dyn PriceStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for GetStockPriceTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: "get_stock_price",
            description: "Get the price of a desired_stock.",
            parameters: vec![ParameterSchema {
                name: "desired_stock",
                param_type: ParamType::String,
                description: "The stock that the customer wants to know the price of",
                required: true,
            }],
        }
    }

    async fn execute(&self, args: &Value) -> Result<ToolOutput> {
        let stock = string_arg("get_stock_price", args, "desired_stock")?.trim();
        info!(stock = %stock, "Tool get_stock_price called");

        // The name counts as touched whether or not a price exists.
        let text = match self.store.lookup(stock).await {
            Ok(Some(price)) => format!("Price of {} is ${}", stock, price),
            Ok(None) => NO_PRICE_DATA.to_string(),
            Err(ChatError::InvalidSymbol(_)) => return Ok(ToolOutput::plain(NO_PRICE_DATA)),
            Err(error) => {
                warn!(stock = %stock, "Price lookup failed: {}", error);
                return Ok(ToolOutput::plain(PRICES_UNAVAILABLE));
            }
        };

        Ok(ToolOutput::touching(text, stock))
    }
}

pub struct SetStockPriceTool {
    store: Arc<dyn PriceStore>,
}

impl SetStockPriceTool {
    pub fn new(store: Arc<dyn PriceStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for SetStockPriceTool {
    fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: "set_stock_price",
            description: "Record a new price for a stock or commodity.",
            parameters: vec![
                ParameterSchema {
                    name: "stock",
                    param_type: ParamType::String,
                    description: "The stock or commodity to update",
                    required: true,
                },
                ParameterSchema {
                    name: "price",
                    param_type: ParamType::Number,
                    description: "The new price in dollars",
                    required: true,
                },
            ],
        }
    }

    async fn execute(&self, args: &Value) -> Result<ToolOutput> {
        let stock = string_arg("set_stock_price", args, "stock")?.trim();
        let price = args.get("price").and_then(Value::as_f64).ok_or_else(|| {
            ChatError::ArgumentValidationFailed {
                tool: "set_stock_price".to_string(),
                reason: "'price' must be a number".to_string(),
            }
        })?;

        info!(stock = %stock, price, "Tool set_stock_price called");

        let text = match self.store.upsert(stock, price).await {
            Ok(()) => format!("Price of {} set to ${}", stock, price),
            Err(ChatError::InvalidPrice(rejected)) => format!(
                "Cannot set price of {} to {}: prices must be non-negative numbers",
                stock, rejected
            ),
            Err(ChatError::InvalidSymbol(_)) => {
                return Ok(ToolOutput::plain("Cannot set a price without a stock name"))
            }
            Err(error) => {
                warn!(stock = %stock, "Price update failed: {}", error);
                return Ok(ToolOutput::plain(PRICES_UNAVAILABLE));
            }
        };

        Ok(ToolOutput::touching(text, stock))
    }
}
