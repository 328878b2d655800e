//! Background conversation titling.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use threadline_core::engine::TitleGenerator;
use threadline_core::ids::SessionId;
use threadline_store::ThreadRegistry;

const TITLE_MAX_CHARS: usize = 80;

/// Title the session in the background unless it already has one.
/// Failures are logged; the chat never waits on this.
pub fn spawn_title_task(
    registry: Arc<ThreadRegistry>,
    generator: Arc<dyn TitleGenerator>,
    session_id: SessionId,
    seed: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(e) = ensure_title(&registry, generator.as_ref(), &session_id, &seed).await {
            warn!(session_id = %session_id, error = %e, "title generation failed");
        }
    })
}

#[derive(Debug, thiserror::Error)]
pub enum TitleError {
    #[error(transparent)]
    Store(#[from] threadline_store::StoreError),
    #[error(transparent)]
    Engine(#[from] threadline_core::errors::EngineError),
}

/// Returns the title written, or `None` when nothing was done.
pub async fn ensure_title(
    registry: &ThreadRegistry,
    generator: &dyn TitleGenerator,
    session_id: &SessionId,
    seed: &str,
) -> Result<Option<String>, TitleError> {
    if seed.trim().is_empty() {
        return Ok(None);
    }
    if registry.title(session_id)?.is_some() {
        debug!(session_id = %session_id, "session already titled");
        return Ok(None);
    }

    let raw = generator.generate(seed).await?;
    let title = sanitize_title(&raw);
    if title.is_empty() {
        return Ok(None);
    }
    registry.set_title(session_id, &title)?;
    info!(session_id = %session_id, title = %title, "session titled");
    Ok(Some(title))
}

/// First non-empty line, without markdown emphasis or quotes.
pub fn sanitize_title(raw: &str) -> String {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default();
    let line = line.strip_prefix("Title:").unwrap_or(line);
    let cleaned: String = line
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '#' | '`' | '"' | '\'' | '“' | '”'))
        .collect();
    cleaned.trim().chars().take(TITLE_MAX_CHARS).collect::<String>().trim_end().to_string()
}
