use std::io::Write;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::prelude::*;

use hive_mind::agent::{self, Assistant, AssistantConfig, TurnRequest};
use hive_mind::api;
use hive_mind::config::HiveConfig;
use hive_mind::error::Error;
use hive_mind::llm::{Reasoning, create_provider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = HiveConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...  (or HIVE_LLM_BACKEND=openai + OPENAI_API_KEY)");
        std::process::exit(1);
    });

    // Initialize tracing; the guard flushes the log file on exit.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "hive-mind.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    eprintln!("🐝 hive-mind v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.llm.model);
    eprintln!("   Workspace: {}", config.workspace_dir.display());
    eprintln!("   Files: {}", config.files_dir.display());
    eprintln!("   API: http://{}/api/turn", config.http_addr);
    eprintln!("   Type a message and press Enter. /cancel drops a pending workflow, /quit exits.\n");

    // ── Assistant ───────────────────────────────────────────────────────
    let llm = create_provider(&config.llm)?;
    let backend = Arc::new(Reasoning::new(llm));
    let assistant =
        Arc::new(Assistant::from_config(&AssistantConfig::from(&config), backend).await?);

    let _reaper = agent::spawn_reaper(
        Arc::clone(&assistant),
        config.reaper_interval,
        config.session_ttl,
    );

    // ── HTTP ────────────────────────────────────────────────────────────
    let addr = config.http_addr;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = api::routes(Arc::clone(&assistant));
    tokio::spawn(async move {
        tracing::info!(addr = %addr, "HTTP server started");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP server stopped");
        }
    });

    repl(&assistant).await?;
    Ok(())
}

/// Stdin loop. A suspended workflow's session id is remembered and the next
/// line answers it.
async fn repl(assistant: &Assistant) -> std::io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut thread_id: Option<String> = None;
    let mut pending: Option<String> = None;

    eprint!("> ");
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {
                eprint!("> ");
                continue;
            }
            "/quit" => break,
            "/cancel" => {
                let cancelled = match pending.take() {
                    Some(id) => assistant.abandon(&id).await.then_some(id),
                    None => None,
                };
                match cancelled {
                    Some(id) => eprintln!("Cancelled {id}"),
                    None => eprintln!("Nothing to cancel"),
                }
                eprint!("> ");
                continue;
            }
            _ => {}
        }

        let mut request = TurnRequest::new(line);
        request.thread_id = thread_id.clone();
        request.session_id = pending.take();

        match assistant.handle_turn(request).await {
            Ok(reply) => {
                if let Some(text) = &reply.reply {
                    println!("\n{text}\n");
                }
                if let Some(key) = &reply.stream_key
                    && let Some(mut stream) = assistant.open_stream(key)
                {
                    println!();
                    while let Some(chunk) = stream.next().await {
                        match chunk {
                            Ok(text) => {
                                print!("{text}");
                                std::io::stdout().flush()?;
                            }
                            Err(e) => eprintln!("\n❌ {e}"),
                        }
                    }
                    println!("\n");
                }
                pending = reply.session_id;
                thread_id = Some(reply.thread_id);
            }
            Err(Error::Workflow(e)) if e.is_session_not_found() => {
                eprintln!("That workflow is gone; starting fresh.");
            }
            Err(e) => {
                tracing::error!(error = %e, "Turn failed");
                eprintln!("❌ {e}");
            }
        }
        eprint!("> ");
    }
    Ok(())
}
