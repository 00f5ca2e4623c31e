//! QuickAsk CLI host.
//!
//! Thin driver for the pipeline crates: loads preferences and stores,
//! resolves the chosen action's template against live context, runs one
//! ask, and prints the answer as it streams. Anything host-UI-specific
//! stays behind the service traits.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::EnvFilter;

use prompt_host::actions::ActionStore;
use prompt_host::history::HistoryStore;
use prompt_host::models::ModelStore;
use prompt_host::{AskOutcome, ChatSession, ChatSubscriptions, TemplateEngine, ToolRegistry};
use providers::openai::OpenAIClient;
use services::context::{NoBrowser, NoSelection, SystemClipboard};
use services::speech::SayCommand;
use services::store::{load_or, FileKvStore, KvStore};
use shared::config::Preferences;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("usage: quickask [action-title]");
        eprintln!("Runs the named action (default action when omitted) against live context.");
        return Ok(());
    }

    let store: Arc<dyn KvStore> = Arc::new(FileKvStore::in_data_dir()?);
    let mut prefs: Preferences =
        load_or(store.as_ref(), "preferences", Preferences::default).await?;
    if prefs.api_key.trim().is_empty() {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            prefs.api_key = key;
        }
    }

    let actions = ActionStore::load(store.clone()).await?;
    let models = ModelStore::load(store.clone()).await?;
    let history = HistoryStore::load(store.clone()).await?;

    let action = match args.first() {
        Some(title) => actions
            .all()
            .iter()
            .find(|a| a.title.eq_ignore_ascii_case(title))
            .cloned(),
        None => actions.default_action().cloned(),
    }
    .context("no matching action configured")?;
    let model = models.resolve(&action.model_id);

    let client = OpenAIClient::from_preferences(&prefs)?;
    let registry = ToolRegistry::builtin(&prefs);
    let engine = TemplateEngine::new(
        Arc::new(NoSelection),
        Arc::new(SystemClipboard),
        Arc::new(NoBrowser),
    );
    let streaming = prefs.use_stream;

    let (mut session, subscriptions) =
        ChatSession::new(prefs, client, registry, history, Arc::new(SayCommand::new()));
    let ChatSubscriptions {
        mut stream,
        mut tool_events,
    } = subscriptions;

    tokio::spawn(async move {
        while let Some(event) = tool_events.recv().await {
            eprintln!("[{}] {}", event.tool, event.detail);
        }
    });
    let printer = tokio::spawn(async move {
        let mut printed = 0usize;
        while stream.changed().await.is_ok() {
            let partial = stream.borrow_and_update().clone();
            if let Some(turn) = partial {
                // deltas only ever append, so the boundary is char-safe
                if turn.answer.len() > printed {
                    print!("{}", &turn.answer[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = turn.answer.len();
                }
            }
        }
    });

    eprintln!("Executing {} ...", action.title);
    let outcome = session.ask_action(&engine, &action, &model).await;
    printer.abort();

    match outcome {
        AskOutcome::Answered => {
            if streaming {
                println!();
            } else {
                let answer = session
                    .turns()
                    .last()
                    .map(|t| t.answer.clone())
                    .unwrap_or_default();
                println!("{}", answer);
            }
            eprintln!("{} Executed", action.title);
            Ok(())
        }
        AskOutcome::RateLimited { message } | AskOutcome::Failed { message } => {
            bail!("Failed to execute {}: {}", action.title, message)
        }
    }
}
