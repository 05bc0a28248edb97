use caishen_chat::{
    agent::ChatOrchestrator,
    config::ChatConfig,
    fetcher::HttpContentFetcher,
    llm::{ModelClient, ModelClients, ScriptedModelClient},
    models::Conversation,
    store::open_price_store,
    summarizer::PageSummarizer,
    tools::{create_default_registry, ToolRegistry},
};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "Commands: /prices, /summarize <url> [company name], /reset, /quit";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing (stderr, so replies stay readable)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ChatConfig::from_env()?;
    let streaming = std::env::args().any(|arg| arg == "--stream");

    info!("CaishenAI stock chat starting");

    let store = open_price_store(&config).await;
    let registry = Arc::new(create_default_registry(store.clone(), &config)?);
    let clients = ModelClients::from_config(&config)?;

    let client = match clients.get(None) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("{}; running the offline price demo", e);
            None
        }
    };

    println!("Welcome to CaishenAI. {}", HELP);
    if client.is_none() {
        println!("No model provider key found. Offline demo: type a stock name to look up its price.");
    }

    let mut history = Conversation::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit", _) | ("/exit", _) => break,
            ("/reset", _) => {
                history = Conversation::new();
                println!("Conversation cleared.");
            }
            ("/prices", _) => match store.list().await {
                Ok(records) if records.is_empty() => println!("No prices stored."),
                Ok(records) => {
                    for record in records {
                        println!("  {:<12} ${}", record.symbol, record.price);
                    }
                }
                Err(e) => println!("{}", e.user_message()),
            },
            ("/summarize", args) => match &client {
                Some(client) => {
                    let (url, company) = args
                        .split_once(' ')
                        .map_or((args, None), |(url, company)| (url, Some(company)));
                    let summarizer =
                        PageSummarizer::new(client.clone(), Arc::new(HttpContentFetcher::new()?));
                    summarize(&summarizer, url, company, streaming).await;
                }
                None => println!("Summaries need a model provider key."),
            },
            _ => match &client {
                Some(client) => {
                    let orchestrator = ChatOrchestrator::new(
                        client.clone(),
                        registry.clone(),
                        config.max_tool_iterations,
                    );
                    history = if streaming {
                        stream_reply(&orchestrator, history, line).await
                    } else {
                        reply(&orchestrator, history, line).await
                    };
                }
                None => offline_demo(registry.clone(), config.max_tool_iterations, line).await,
            },
        }
    }

    println!("Goodbye.");
    Ok(())
}

/// Run one turn; on failure keep whatever history is still valid
async fn reply(orchestrator: &ChatOrchestrator, history: Conversation, line: &str) -> Conversation {
    match orchestrator.run_turn(history.clone(), line).await {
        Ok(outcome) => {
            println!("{}", outcome.final_text);
            outcome.history
        }
        Err(e) => {
            println!("{}", e.user_message());
            e.partial_history().cloned().unwrap_or(history)
        }
    }
}

async fn stream_reply(
    orchestrator: &ChatOrchestrator,
    history: Conversation,
    line: &str,
) -> Conversation {
    let mut turn = match orchestrator.stream_turn(history.clone(), line).await {
        Ok(turn) => turn,
        Err(e) => {
            println!("{}", e.user_message());
            return history;
        }
    };

    while let Some(fragment) = turn.next_fragment().await {
        match fragment {
            Ok(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            Err(e) => {
                println!("\n{}", e.user_message());
                return history;
            }
        }
    }
    println!();

    turn.finish().unwrap_or(history)
}

async fn summarize(summarizer: &PageSummarizer, url: &str, company: Option<&str>, streaming: bool) {
    if !streaming {
        match summarizer.summarize(url, company).await {
            Ok(summary) => println!("{}", summary),
            Err(e) => println!("{}", e.user_message()),
        }
        return;
    }

    let mut fragments = match summarizer.summarize_streaming(url, company).await {
        Ok(fragments) => fragments,
        Err(e) => {
            println!("{}", e.user_message());
            return;
        }
    };

    while let Some(fragment) = fragments.next().await {
        match fragment {
            Ok(text) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            Err(e) => {
                println!("\n{}", e.user_message());
                return;
            }
        }
    }
    println!();
}

async fn offline_demo(registry: Arc<ToolRegistry>, max_tool_iterations: u32, stock: &str) {
    let client: Arc<dyn ModelClient> = Arc::new(ScriptedModelClient::price_demo(stock));
    let orchestrator = ChatOrchestrator::new(client, registry, max_tool_iterations);

    let question = format!("What is the price of {}?", stock);
    match orchestrator.run_turn(Conversation::new(), &question).await {
        Ok(outcome) => println!("{}", outcome.final_text),
        Err(e) => println!("{}", e.user_message()),
    }
}
