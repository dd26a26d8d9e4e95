//! Module directory watching and debounced hot reload.
//!
//! File events are forwarded into a tokio channel. Once a relevant event
//! arrives the task keeps draining until the directory has been quiet for
//! the configured debounce period, then runs one full reload on the
//! blocking pool.

use std::path::Path;
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::host::ModuleHost;

/// Watches the host's module directory while alive.
pub struct ModuleWatcher {
    _watcher: RecommendedWatcher,
    handle: JoinHandle<()>,
}

impl ModuleWatcher {
    /// Start watching. Must be called inside a tokio runtime.
    pub fn spawn(host: Arc<ModuleHost>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let filter_host = host.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if is_relevant(&event, |path| filter_host.is_module_file(path)) {
                        let _ = tx.send(event);
                    }
                }
                Err(e) => tracing::warn!("File watcher error: {}", e),
            },
            notify::Config::default(),
        )?;
        watcher.watch(host.module_dir(), RecursiveMode::NonRecursive)?;

        tracing::info!(
            path = %host.module_dir().display(),
            debounce_ms = host.config().debounce_ms,
            "Watching module directory"
        );
        let handle = tokio::spawn(Self::run(host, rx));

        Ok(Self {
            _watcher: watcher,
            handle,
        })
    }

    async fn run(host: Arc<ModuleHost>, mut rx: mpsc::UnboundedReceiver<Event>) {
        let debounce = host.config().debounce();

        while let Some(first) = rx.recv().await {
            let mut events = 1usize;
            tracing::debug!(paths = ?first.paths, "Module directory changed");

            // Wait out the burst.
            loop {
                match tokio::time::timeout(debounce, rx.recv()).await {
                    Ok(Some(_)) => events += 1,
                    Ok(None) => return,
                    Err(_) => break,
                }
            }

            tracing::info!(events, "Reloading modules after file changes");
            let reload_host = host.clone();
            match tokio::task::spawn_blocking(move || reload_host.load_all()).await {
                Ok(Ok(report)) => tracing::info!(
                    generation = ?report.generation,
                    active = report.active.len(),
                    skipped = report.skipped.len(),
                    failed = report.failures.len(),
                    "Hot reload finished"
                ),
                Ok(Err(e)) => tracing::error!("Hot reload failed: {}", e),
                Err(e) => tracing::error!("Hot reload task failed: {}", e),
            }
        }
    }
}

impl Drop for ModuleWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Whether `event` creates, changes or removes a module file.
fn is_relevant(event: &Event, is_module_file: impl Fn(&Path) -> bool) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    kind_matches && event.paths.iter().any(|p| is_module_file(p))
}
