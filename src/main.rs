use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use ragnote_core::agent::{ChatOrchestrator, TurnContext, TurnEvent, TurnOutcome};
use ragnote_core::chat::{AgentConfig, Chat, Role};
use ragnote_core::core::config::defaults::generate_default_agents;
use ragnote_core::core::config::{AppConfig, AppPaths, ConfigService};
use ragnote_core::core::logging;
use ragnote_core::history::{ChatStore, SqliteChatStore};
use ragnote_core::llm::{LlmService, ProviderRegistry};
use ragnote_core::rag::{
    get_or_create_table, FsDocumentSource, RemoteEmbeddingFunction, RetrievalResolver,
    SearchIndex, VectorDb,
};
use ragnote_core::tools::{CreateNoteTool, SearchTool, ToolRegistry};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let config = ConfigService::new(paths.clone());
    let app = config.app_config().context("Failed to load configuration")?;
    let vault = match &app.vault_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Failed to resolve vault directory")?,
    };

    let store = Arc::new(
        SqliteChatStore::new(paths.db_path.clone())
            .await
            .context("Failed to open chat store")?,
    );
    let index = open_index(&app, &paths.vector_db_path, &vault).await?;

    let mut tools = ToolRegistry::new();
    tools.register("createNote", Arc::new(CreateNoteTool::new(vault.clone())));
    if let Some(index) = &index {
        tools.register("search", Arc::new(SearchTool::new(index.clone())));
    }

    let agent = select_agent(index.is_some());
    let retrieval = RetrievalResolver::new(index, Arc::new(FsDocumentSource::new(vault)));
    let llm = LlmService::new(config.clone(), ProviderRegistry::with_defaults());
    let orchestrator = ChatOrchestrator::new(llm, store.clone(), retrieval, tools)
        .with_chat_settings(app.chat.clone());

    tracing::info!(agent = %agent.name, "ragnote ready");
    println!("Agent: {}. Type /new for a fresh chat, /quit to exit.", agent.name);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut chat = Chat::new();

    loop {
        prompt("> ")?;
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        match line.trim() {
            "/quit" => break,
            "/new" => {
                chat = Chat::new();
                println!("Started a new chat.");
                continue;
            }
            _ => {}
        }

        let mut outcome = run_turn(&orchestrator, &mut chat, &line, &agent).await;
        while let Ok(TurnOutcome::AwaitingToolApproval(calls)) = &outcome {
            let Some(call) = calls.first().cloned() else {
                break;
            };
            prompt(&format!(
                "Run tool {} with {}? [y/N] ",
                call.name, call.arguments
            ))?;
            let answer = lines.next_line().await.context("Failed to read input")?;
            if !matches!(answer.as_deref().map(str::trim), Some("y" | "Y" | "yes")) {
                println!("Skipped.");
                break;
            }
            outcome = run_approved(&orchestrator, &mut chat, &call.id).await;
        }

        match outcome {
            Ok(TurnOutcome::Cancelled) => {
                println!("\n[cancelled]");
                store
                    .save_chat(&chat)
                    .await
                    .context("Failed to save cancelled chat")?;
            }
            Ok(_) => {}
            Err(err) => tracing::debug!("Turn ended with error: {}", err),
        }
    }

    Ok(())
}

async fn open_index(
    app: &AppConfig,
    db_path: &Path,
    vault: &Path,
) -> anyhow::Result<Option<Arc<dyn SearchIndex>>> {
    let Some(embedding) = &app.embedding else {
        tracing::warn!("No embedding configured, semantic search is disabled");
        return Ok(None);
    };

    let db = VectorDb::open(db_path)
        .await
        .context("Failed to open vector database")?;
    let function = Arc::new(RemoteEmbeddingFunction::new(embedding.clone()));
    let table = get_or_create_table(&db, function, &vault.to_string_lossy())
        .await
        .context("Failed to open vector table")?;
    tracing::info!(table = %table.name(), status = ?table.status(), "Vector table ready");
    let index: Arc<dyn SearchIndex> = Arc::new(table);
    Ok(Some(index))
}

fn select_agent(has_index: bool) -> AgentConfig {
    let wanted = std::env::var("RAGNOTE_AGENT").unwrap_or_else(|_| "Default".to_string());
    let agents = generate_default_agents();
    let mut agent = agents
        .iter()
        .find(|a| a.name == wanted)
        .or_else(|| agents.first())
        .cloned()
        .unwrap_or_default();
    if !has_index {
        agent.filters.limit = 0;
        agent.tool_definitions.retain(|t| t.name != "search");
    }
    agent
}

async fn run_turn(
    orchestrator: &ChatOrchestrator,
    chat: &mut Chat,
    input: &str,
    agent: &AgentConfig,
) -> Result<TurnOutcome, ragnote_core::EngineError> {
    let (ctx, renderer, watcher) = start_turn();
    let outcome = orchestrator
        .handle_turn(chat, input, agent, &ctx)
        .await;
    finish_turn(ctx, renderer, watcher).await;
    outcome
}

async fn run_approved(
    orchestrator: &ChatOrchestrator,
    chat: &mut Chat,
    call_id: &str,
) -> Result<TurnOutcome, ragnote_core::EngineError> {
    let (ctx, renderer, watcher) = start_turn();
    let outcome = orchestrator.run_pending_tool_call(chat, call_id, &ctx).await;
    finish_turn(ctx, renderer, watcher).await;
    outcome
}

fn start_turn() -> (
    TurnContext,
    tokio::task::JoinHandle<()>,
    tokio::task::JoinHandle<()>,
) {
    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(render(rx));
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });
    (TurnContext::new(cancel).with_events(tx), renderer, watcher)
}

async fn finish_turn(
    ctx: TurnContext,
    renderer: tokio::task::JoinHandle<()>,
    watcher: tokio::task::JoinHandle<()>,
) {
    watcher.abort();
    drop(ctx);
    let _ = renderer.await;
}

/// Print the trailing assistant message as it grows.
async fn render(mut rx: mpsc::UnboundedReceiver<TurnEvent>) {
    let mut current = usize::MAX;
    let mut printed = 0;

    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::ChatUpdated(chat) => {
                let Some(index) = chat.messages.len().checked_sub(1) else {
                    continue;
                };
                let message = &chat.messages[index];
                if message.role != Role::Assistant {
                    continue;
                }
                let text = message.text();
                if index != current || text.len() < printed || !text.is_char_boundary(printed) {
                    current = index;
                    printed = 0;
                }
                if text.len() > printed {
                    print!("{}", &text[printed..]);
                    let _ = std::io::stdout().flush();
                    printed = text.len();
                }
            }
            TurnEvent::Advisory(notice) => eprintln!("\n{}", notice),
            TurnEvent::StateChanged(_) => {}
        }
    }
    if printed > 0 {
        println!();
    }
}

fn prompt(text: &str) -> anyhow::Result<()> {
    print!("{}", text);
    std::io::stdout().flush().context("Failed to flush stdout")
}
