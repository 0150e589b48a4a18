mod bot;
mod broadcast;
mod callback;
mod config;
mod dispatch;
mod keyboard;
mod registry;
mod runtime;
mod session;
mod tagging;
mod tags;
mod telegram;
mod views;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::Config;
use registry::{ChatRecord, ChatRegistry};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Owner-only Telegram bot for tagging groups and broadcasting to them")]
struct Cli {
    /// Path to TOML config file.
    #[arg(
        long,
        global = true,
        env = "CHATCAST_CONFIG",
        default_value = "chat-broadcaster.toml"
    )]
    config: PathBuf,

    /// Log level filter, e.g. info,debug,trace.
    #[arg(long, global = true, env = "CHATCAST_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommand {
    /// Run the bot until ctrl-c.
    Run,
    /// Print the registered group chats and their tags.
    Chats(ChatsArgs),
}

#[derive(Debug, Clone, Args, Default)]
struct ChatsArgs {
    /// Only chats tagged with this branch slug.
    #[arg(long)]
    branch: Option<String>,
    /// Emit output as JSON.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log)?;

    let command = cli.command.clone().unwrap_or(CliCommand::Run);
    match command {
        CliCommand::Run => run_bot(&cli).await,
        CliCommand::Chats(args) => run_chats_command(&cli, args).await,
    }
}

async fn run_bot(cli: &Cli) -> Result<()> {
    let cfg = Config::load(&cli.config)?;
    let runtime = runtime::BotRuntime::new(cfg).await?;
    runtime.run().await
}

async fn run_chats_command(cli: &Cli, args: ChatsArgs) -> Result<()> {
    let cfg = Config::load_offline(&cli.config)?;
    let registry = ChatRegistry::open(cfg.storage.path.clone()).await?;
    let records = registry.list(args.branch.as_deref()).await?;
    if args.json {
        print_json_value(&chats_json(&records)?);
    } else {
        let catalog = cfg.tags.catalog();
        for record in &records {
            println!("{}", views::registry_line(&catalog, record));
        }
        println!(
            "{} chats ({} registry at {})",
            records.len(),
            registry.backend_name(),
            cfg.storage.path.display()
        );
    }
    Ok(())
}

fn chats_json(records: &[ChatRecord]) -> Result<Value> {
    Ok(serde_json::to_value(records)?)
}

fn print_json_value(value: &Value) {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    println!("{rendered}");
}

fn init_logging(filter: &str) -> Result<()> {
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env)
        .with_target(false)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChatKind;

    #[test]
    fn cli_defaults_to_run() {
        let cli = Cli::parse_from(["chat-broadcaster"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.log, "info");
    }

    #[test]
    fn cli_parses_chats_command_and_flags() {
        let cli = Cli::parse_from([
            "chat-broadcaster",
            "--config",
            "bot.toml",
            "chats",
            "--branch",
            "krylatskoe",
            "--json",
        ]);
        assert_eq!(cli.config, PathBuf::from("bot.toml"));
        match cli.command {
            Some(CliCommand::Chats(args)) => {
                assert_eq!(args.branch.as_deref(), Some("krylatskoe"));
                assert!(args.json);
            }
            _ => panic!("expected chats command"),
        }
    }

    #[test]
    fn chats_json_lists_records_with_tags() {
        let records = vec![ChatRecord {
            chat_id: -100_42,
            title: "Kids".to_owned(),
            chat_kind: ChatKind::Supergroup,
            branch: Some("krylatskoe".to_owned()),
            age: None,
            level: None,
            updated_at_ms: 1,
        }];
        let value = chats_json(&records).expect("json");
        assert_eq!(value[0]["chat_id"], -10042);
        assert_eq!(value[0]["chat_kind"], "supergroup");
        assert_eq!(value[0]["branch"], "krylatskoe");
        assert!(value[0]["age"].is_null());
    }
}
