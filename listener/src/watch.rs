/// Filesystem watch installation.
///
/// The `notify` callback runs on the watcher's own thread and feeds every
/// event straight into the [`EventFilter`]; nothing is queued, the shared
/// activity flag is the only hand-off to the tick loop.
use std::path::PathBuf;

use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};

use crate::event::EventFilter;

/// Starts watching `paths`. The returned watcher must be kept alive for as
/// long as events should be delivered.
pub fn install(paths: &[PathBuf], recursive: bool, filter: EventFilter) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                filter.on_notify_event(&event);
            }
            Err(e) => tracing::warn!("[watch] Watcher error: {e}"),
        },
        NotifyConfig::default(),
    )
    .context("Failed to create file watcher")?;

    let mode = if recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };

    for path in paths {
        watcher
            .watch(path, mode)
            .with_context(|| format!("Failed to watch {}", path.display()))?;
        tracing::info!("[watch] Watching {} ({mode:?})", path.display());
    }

    Ok(watcher)
}
