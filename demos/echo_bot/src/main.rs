//! Echo Bot Example
//!
//! Demonstrates listener groups, the hook tiers and cron items.
//!
//! | Hook | Trigger | Reply |
//! |------|---------|-------|
//! | prefix `!echo ` | `!echo hi` | `hi` |
//! | prefix `!ping` | `!ping` | `Pong!` |
//! | prefix `!help` | `!help` | command list |
//! | mention | message mentioning the bot | a wave reaction |
//! | keyword `hello` | `Hello there` | greeting |
//! | catch-all | anything else | logged only |
//! | cron `0 * * * *` | top of every hour | heartbeat log |
//!
//! Passing `--admin-group <id>` adds an `admin` group scoped to that group
//! with a `!uptime` command; it is consulted before the root group.
//!
//! # Usage
//!
//! ```bash
//! cargo run --package echo-bot -- --account +15551234567
//! cargo run --package echo-bot -- --account +15551234567 --connection tcp://127.0.0.1:7583
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use tether::prelude::*;
use tether::runtime::config::validate_config;
use tether::runtime::logging;
use tracing::{error, info};

const HELP_TEXT: &str = "Echo Bot commands:\n\
    !echo <text>  echo text back\n\
    !ping         Pong!\n\
    !help         this help\n\
    !uptime       time since start (admin group)";

#[derive(Parser, Debug)]
#[command(version, about = "A simple echo bot for the Tether framework")]
struct Args {
    /// Account the bot acts as (overrides the config file).
    #[arg(short, long)]
    account: Option<String>,

    /// Relay connection string, e.g. `ipc://` or `tcp://127.0.0.1:7583`.
    #[arg(short, long)]
    connection: Option<String>,

    /// Configuration file to load instead of searching the default paths.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Group id for the admin-only commands.
    #[arg(long)]
    admin_group: Option<String>,
}

// ============================================================================
// Hooks
// ============================================================================

fn register_commands(group: &ListenerGroup) {
    group.on_prefix(
        "!echo ",
        message_hook(|client, ctx, msg| async move {
            let content = msg.text().and_then(|t| t.strip_prefix("!echo ")).unwrap_or_default();
            client.reply(&ctx, content).await?.await?;
            Ok(true)
        }),
    );

    group.on_prefix(
        "!ping",
        message_hook(|client, ctx, _msg| async move {
            client.reply(&ctx, "Pong!").await?;
            Ok(true)
        }),
    );

    group.on_prefix(
        "!help",
        message_hook(|client, ctx, _msg| async move {
            client.reply(&ctx, HELP_TEXT).await?;
            Ok(true)
        }),
    );
}

fn register_conversation(group: &ListenerGroup, account: AccountId) {
    group.on_mention(
        account,
        message_hook(|client, _ctx, msg| async move {
            client.send_reaction(&msg, "👋").await?;
            Ok(true)
        }),
    );

    group.on_keyword(
        "hello",
        KeywordOptions::default(),
        message_hook(|client, ctx, msg| async move {
            let name = msg.sender_name.as_deref().unwrap_or("there");
            client.reply(&ctx, &format!("Hello, {name}!")).await?;
            Ok(true)
        }),
    );

    group.on_message(message_hook(|_client, ctx, msg| async move {
        info!(
            "[{}] {}: {}",
            ctx,
            msg.sender,
            msg.text().unwrap_or_default()
        );
        Ok(false)
    }));
}

fn admin_group(group_id: String) -> ListenerGroup {
    let started = Local::now();
    let group = ListenerGroup::with_contexts("admin", [group_id]);

    group.on_prefix(
        "!uptime",
        message_hook(move |client, ctx, _msg| async move {
            let uptime = (Local::now() - started).num_seconds();
            client.reply(&ctx, &format!("Up for {uptime}s")).await?;
            Ok(true)
        }),
    );
    group
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load()?;
    if let Some(account) = args.account {
        config.session.account = Some(account);
    }
    if let Some(connection) = args.connection {
        config.session.connection = connection;
    }
    validate_config(&config)?;
    logging::init_from_config(&config.logging);

    let session = BotSession::from_config(&config).await?;
    let root = session.root();

    root.set_error_handler(Arc::new(|e, callback| {
        error!(callback = %callback, "Hook failed: {e:#}");
        // A failing cron item is not rescheduled.
        !callback.is_cron()
    }));
    register_commands(root);
    register_conversation(root, session.account().clone());

    root.on_started(task_callback(|client| async move {
        info!(account = %client.account(), "Echo bot started");
        Ok(())
    }));
    root.on_cron(
        "0 * * * *",
        task_callback(|client| async move {
            info!(account = %client.account(), "Still alive");
            Ok(())
        }),
    )?;

    if let Some(group_id) = args.admin_group {
        session.add_group(admin_group(group_id));
    }

    session.run_until_signal().await?;
    Ok(())
}
