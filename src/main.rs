use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use threadline_runtime::echo::{EchoEngine, HeuristicTitleGenerator};
use threadline_runtime::history::PageLimits;
use threadline_runtime::input::AttachmentLimits;
use threadline_runtime::{ConversationService, ServiceConfig};
use threadline_settings::Settings;
use threadline_store::{Database, EventRepo, SessionRepo};
use threadline_telemetry::{init_telemetry, parse_level, TelemetryConfig};

#[derive(Debug, Parser)]
#[command(name = "threadline", about = "Conversational session backend")]
struct Cli {
    /// Settings file (defaults to ~/.threadline/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database file.
    #[arg(long)]
    db: Option<PathBuf>,
}

fn service_config(settings: &Settings) -> ServiceConfig {
    ServiceConfig {
        heartbeat_interval: Duration::from_secs(settings.chat.heartbeat_secs),
        attachment_limits: AttachmentLimits {
            max_files: settings.chat.max_attachments,
            max_image_bytes: settings.chat.max_image_bytes,
            max_pdf_bytes: settings.chat.max_pdf_bytes,
        },
        page_limits: PageLimits {
            default_limit: settings.history.default_limit,
            max_limit: settings.history.max_limit,
        },
        share_default_days: settings.share.default_expiry_days,
        share_max_days: settings.share.max_expiry_days,
        ..ServiceConfig::default()
    }
}

/// Level names were checked by `Settings::validate`.
fn telemetry_config(settings: &Settings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(tracing::Level::INFO),
        module_levels: settings
            .logging
            .module_levels
            .iter()
            .filter_map(|(module, level)| Some((module.clone(), parse_level(level)?)))
            .collect(),
        json: settings.logging.json,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => threadline_settings::load_settings_from_path(path),
        None => threadline_settings::load_settings(),
    }
    .context("failed to load settings")?;

    init_telemetry(&telemetry_config(&settings)).context("failed to install tracing subscriber")?;

    tracing::info!("starting threadline");

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| threadline_settings::database_path(&settings));
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = Database::open(&db_path).context("failed to open database")?;
    tracing::info!(path = %db_path.display(), "database opened");

    let sessions = Arc::new(SessionRepo::new(db.clone()));
    let events = Arc::new(EventRepo::new(db.clone()));
    let engine = Arc::new(EchoEngine::new(settings.chat.agent_name.clone(), events.clone()));
    let service = Arc::new(ConversationService::with_repos(
        sessions,
        events,
        db,
        engine,
        Arc::new(HeuristicTitleGenerator),
        service_config(&settings),
    ));

    let config = threadline_server::ServerConfig {
        host: settings.server.host.clone(),
        port: cli.port.unwrap_or(settings.server.port),
        ..Default::default()
    };
    let handle = threadline_server::start(config, service)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "threadline ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.abort();
    Ok(())
}
