//! Snarky summaries of stock websites

use crate::error::ChatError;
use crate::fetcher::ContentFetcher;
use crate::llm::{ModelClient, TextStream};
use crate::models::{Conversation, Message, ModelReply};
use crate::Result;
use std::sync::Arc;
use tracing::info;

pub const SUMMARY_SYSTEM_MESSAGE: &str = "You are a helpful assistant that analyzes the contents of a stock related website, \
and provides a short, snarky, humorous summary of the website and the performance of the available stocks, \
ignoring text that might be navigation related. \
Respond in markdown. Do not wrap the markdown in a code block - respond just with the markdown.";

const SUMMARY_PROMPT: &str = "Here are the contents of a website. Provide a short summary of this website. \
Create a table outlining the performance of the stocks with 3 columns: stock name, performance (good, bad, neutral), volatility (High, Mid, Low). \
If it includes news or announcements, then summarize these too.";

fn summary_prompt(company_name: Option<&str>, contents: &str) -> String {
    match company_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => format!(
            "{} {}. Here is their landing page:\n{}",
            SUMMARY_PROMPT, name, contents
        ),
        None => format!("{} Here is the landing page:\n{}", SUMMARY_PROMPT, contents),
    }
}

pub struct PageSummarizer {
    client: Arc<dyn ModelClient>,
    fetcher: Arc<dyn ContentFetcher>,
}

impl PageSummarizer {
    pub fn new(client: Arc<dyn ModelClient>, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self { client, fetcher }
    }

    async fn prompt(&self, url: &str, company_name: Option<&str>) -> Result<Conversation> {
        let contents = self.fetcher.fetch(url).await?;
        Ok(Conversation::from(vec![Message::user(summary_prompt(
            company_name,
            &contents,
        ))]))
    }

    /// Markdown summary of the page at `url`, optionally naming the company it belongs to
    pub async fn summarize(&self, url: &str, company_name: Option<&str>) -> Result<String> {
        let conversation = self.prompt(url, company_name).await?;

        info!(url = %url, model = %self.client.model(), "Summarizing page");

        match self
            .client
            .complete(SUMMARY_SYSTEM_MESSAGE, &conversation, &[])
            .await?
        {
            ModelReply::FinalText(summary) => Ok(summary),
            ModelReply::ToolCallsRequested { requests, .. } => Err(ChatError::ProtocolViolation(
                format!("summary request answered with {} tool call(s)", requests.len()),
            )),
        }
    }

    /// Same prompt as `summarize`, answered fragment by fragment
    pub async fn summarize_streaming(
        &self,
        url: &str,
        company_name: Option<&str>,
    ) -> Result<TextStream> {
        let conversation = self.prompt(url, company_name).await?;

        info!(url = %url, model = %self.client.model(), "Streaming page summary");

        self.client
            .complete_streaming(SUMMARY_SYSTEM_MESSAGE, &conversation)
            .await
    }
}
