//! `deskmate chat`: interactive or single-message chat mode.

use std::io::Write;
use std::sync::Arc;

use deskmate_agent::{AgentLoop, AgentStreamEvent};
use deskmate_config::AppConfig;
use deskmate_core::memory::MemoryStore;
use deskmate_core::session::SessionStore;
use deskmate_core::SessionKey;
use deskmate_storage::{open_pool, SqliteMemoryStore, SqliteSessionStore};
use tokio::io::AsyncBufReadExt;

pub async fn run(
    message: Option<String>,
    user: String,
    session: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    // Check for an API key early and give a clear error
    if config.api_key.as_deref().unwrap_or("").is_empty() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    DESKMATE_API_KEY");
        eprintln!("    OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add api_key to your config file:");
        eprintln!(
            "    {}",
            AppConfig::config_dir().join("config.toml").display()
        );
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let provider = deskmate_providers::build_from_config(&config)?;
    let pool = open_pool(&config.storage.db_path).await?;
    let sessions: Arc<dyn SessionStore> = Arc::new(SqliteSessionStore::new(pool.clone()));
    let memories: Arc<dyn MemoryStore> = Arc::new(SqliteMemoryStore::new(pool));
    let agent = AgentLoop::new(&config, provider, sessions, memories);

    let key = SessionKey::new(user, session);

    if let Some(message) = message {
        // Single message mode: the answer streams straight to stdout so
        // the output can be piped.
        if !stream_turn(&agent, key, message).await? {
            return Err("Chat turn failed. See above for details.".into());
        }
    } else {
        run_repl(&agent, key, &config).await?;
    }

    Ok(())
}

/// Stream one turn to the terminal. The answer goes to stdout as it
/// arrives; tool activity and errors go to stderr. Returns false if the
/// turn ended with an error event.
async fn stream_turn(
    agent: &AgentLoop,
    key: SessionKey,
    message: String,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut rx = agent.run(key, message, None);
    let mut failed = false;

    while let Some(event) = rx.recv().await {
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                std::io::stdout().flush()?;
            }
            AgentStreamEvent::ToolCall { name, .. } => {
                eprintln!("  [{name}...]");
            }
            AgentStreamEvent::ToolResult { name, success, .. } => {
                if !success {
                    eprintln!("  [{name} failed]");
                }
            }
            AgentStreamEvent::Done { .. } => {
                println!();
            }
            AgentStreamEvent::Error { message } => {
                eprintln!("  [Error] {message}");
                failed = true;
            }
        }
    }

    Ok(!failed)
}

async fn run_repl(
    agent: &AgentLoop,
    key: SessionKey,
    config: &AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    // Show which tools are actually registered for this session; the
    // set depends on which credentials are configured.
    let context = agent.context(&key, None).await?;
    let tool_names = context.registry.names().join(", ");

    println!();
    println!("  ╔══════════════════════════════════════╗");
    println!("  ║       Deskmate Interactive Chat      ║");
    println!("  ╚══════════════════════════════════════╝");
    println!();
    println!("  Model:    {}", config.model);
    println!("  Session:  {key}");
    println!("  Tools:    {tool_names}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            break;
        }

        println!();
        stream_turn(agent, key.clone(), input.to_string()).await?;
        println!();
    }

    println!();
    println!("  Goodbye!");
    println!();

    Ok(())
}
