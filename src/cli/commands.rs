use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use super::{Cli, Commands, ConfigAction, SearchOpts, UserOpts};
use crate::backup::{ColdBackup, SnapshotMessage};
use crate::config::{validate_config_object, Config};
use crate::memory::{reconcile, resolve_embedding_provider, MemoryHit, MemoryStore};
use crate::sessions::{normalize_username, SessionStore};

/// Characters of content shown per search hit.
const HIT_PREVIEW_CHARS: usize = 120;

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Chat(opts) => chat(opts).await,
        Commands::Search(opts) => search(opts).await,
        Commands::History(opts) => history(opts).await,
        Commands::Reconcile(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let username = normalize_username(&opts.user)?;
            let store = open_store(&config).await?;
            let report = reconcile(&store, &ColdBackup::from_config(&config), &username).await?;
            println!(
                "{username}: examined {}, appended {}, failed {}",
                report.examined, report.appended, report.failed
            );
            Ok(())
        }
        Commands::InitDb(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            let store = open_store(&config).await?;
            let stats = store.stats().await?;
            println!(
                "memory schema ready at {} ({} records, {} users)",
                store.path().display(),
                stats.records,
                stats.users
            );
            Ok(())
        }
        Commands::Config(opts) => {
            let config = Config::load(opts.config.as_deref())?;
            match opts.action {
                ConfigAction::Show => {
                    println!("{}", serde_json::to_string_pretty(&redacted(config))?);
                }
                ConfigAction::Validate => {
                    validate_config_object(&config)?;
                    info!("Configuration is valid");
                }
                ConfigAction::Init => {
                    Config::write_default(opts.config.as_deref().unwrap_or("cintessa.json"))?;
                    info!("Configuration file created");
                }
            }
            Ok(())
        }
        Commands::Version => {
            println!("cintessa {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn open_store(config: &Config) -> Result<MemoryStore> {
    let embedder = resolve_embedding_provider(&config.embedding)?;
    let store = MemoryStore::from_config(config, embedder)?;
    store.ensure_schema().await?;
    Ok(store)
}

fn redacted(mut config: Config) -> Config {
    for key in [&mut config.completion.api_key, &mut config.embedding.api_key] {
        if key.is_some() {
            *key = Some("***".to_string());
        }
    }
    config
}

async fn search(opts: SearchOpts) -> Result<()> {
    let config = Config::load(opts.config.as_deref())?;
    let username = normalize_username(&opts.user)?;
    let store = open_store(&config).await?;

    let query = opts.query.join(" ");
    let limit = opts.limit.unwrap_or(store.default_limit());
    let hits = store.search(&username, &query, limit).await?;

    if hits.is_empty() {
        println!("no memories found");
    }
    for hit in &hits {
        println!("{}", format_hit(hit));
    }
    Ok(())
}

async fn history(opts: UserOpts) -> Result<()> {
    let config = Config::load(opts.config.as_deref())?;
    let username = normalize_username(&opts.user)?;

    match ColdBackup::from_config(&config).load(&username).await? {
        Some(snapshot) if !snapshot.is_empty() => {
            for message in &snapshot.messages {
                println!("{}", format_message(message));
            }
        }
        _ => println!("no conversation stored for {username}"),
    }
    Ok(())
}

async fn chat(opts: UserOpts) -> Result<()> {
    let config = Config::load(opts.config.as_deref())?;
    let sessions = Arc::new(SessionStore::from_config(&config).await?);
    let session = sessions.sign_in(&opts.user).await?;
    let username = session.username().to_string();

    for message in session.history().await? {
        println!("{}", format_message(&message));
    }
    println!("signed in as {username}; /search <query>, /logout or /quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{username}> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" => break,
            "/logout" => {
                sessions.sign_out(&username).await?;
                println!("signed out");
                break;
            }
            _ if line.starts_with("/search") => {
                let query = line.trim_start_matches("/search").trim();
                match session.search(query, None).await {
                    Ok(hits) if hits.is_empty() => println!("no memories found"),
                    Ok(hits) => hits.iter().for_each(|h| println!("{}", format_hit(h))),
                    Err(e) => eprintln!("error: {e}"),
                }
            }
            text => match session.send(text).await {
                Ok(outcome) => {
                    println!("{}", outcome.reply);
                    for warning in &outcome.warnings {
                        eprintln!("warning: {warning}");
                    }
                }
                Err(e) => eprintln!("error: {e}"),
            },
        }
    }
    Ok(())
}

/// `YYYY-MM-DD HH:MM  –  <first 120 chars>` on a single line.
pub fn format_hit(hit: &MemoryHit) -> String {
    let preview: String = hit
        .content
        .chars()
        .take(HIT_PREVIEW_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    format!("{}  –  {}", hit.timestamp.format("%Y-%m-%d %H:%M"), preview)
}

pub fn format_message(message: &SnapshotMessage) -> String {
    format!(
        "[{}] {}: {}",
        message.ts.format("%Y-%m-%d %H:%M"),
        message.role,
        message.content
    )
}
