//! recollect — recall engine for a group-chat image-archive bot.
//!
//! The binary is a line-oriented harness standing in for the chat
//! platform glue: inbound events arrive as JSON objects on stdin, one per
//! line, and the engine's outbound actions are printed as JSON on stdout.
//! Real platform integration subscribes to chat events and executes the
//! actions instead; the engine core is identical either way.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use recollect::dispatch::{Dispatcher, InboundMessage, TagCommand, TagDownload};
use recollect::{config, store::Store};

#[derive(Parser)]
#[command(name = "recollect", version, about = "Recall engine for a group-chat image-archive bot")]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json", env = "RECOLLECT_CONFIG")]
    config: PathBuf,
}

/// One stdin line. `tag` carries download outcomes inline because the
/// harness has no real downloader; the platform glue performs downloads
/// between `prepare_tag` and `complete_tag` instead.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Event {
    Message(InboundMessage),
    Tag {
        #[serde(flatten)]
        command: TagCommand,
        #[serde(default)]
        downloads: Vec<TagDownload>,
    },
    Bind {
        group_id: i64,
        user_id: i64,
        nickname: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let cfg = match config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %args.config.display(), error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let store = match Store::open(&cfg.database_path) {
        Ok(store) => store,
        Err(e) => {
            error!(path = %cfg.database_path, error = %e, "failed to open store");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        db = %cfg.database_path,
        image_dir = %cfg.image_dir.display(),
        groups = cfg.enabled_groups.len(),
        cache = cfg.cache_size,
        "recollect starting"
    );

    let dispatcher = Dispatcher::new(&cfg, store);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "unparseable event line");
                continue;
            }
        };
        let actions = match event {
            Event::Message(msg) => dispatcher.handle_message(&msg).await,
            Event::Tag { command, downloads } => match dispatcher.prepare_tag(&command).await {
                Ok(plan) => dispatcher.complete_tag(&plan, &downloads).await,
                Err(action) => vec![action],
            },
            Event::Bind {
                group_id,
                user_id,
                nickname,
            } => vec![dispatcher.bind_command(group_id, user_id, &nickname).await],
        };
        for action in actions {
            match serde_json::to_string(&action) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "failed to serialize action"),
            }
        }
    }

    dispatcher.store().close().await;
    info!("shutting down");
}
