//! View collaborator for hosts without a presentation layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use modhost_sdk::{ModuleResult, ViewHandle, ViewHost, WindowId, WindowRequest};
use parking_lot::Mutex;

/// Accepts window requests and views without showing anything.
///
/// Windows get sequential ids. Ready views are kept until the module is
/// deactivated, the same as a real presentation layer must do.
#[derive(Debug, Default)]
pub struct HeadlessViewHost {
    next_window: AtomicU64,
    views: Mutex<HashMap<String, ViewHandle>>,
}

impl HeadlessViewHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Modules whose view is currently attached.
    pub fn attached_views(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.views.lock().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl ViewHost for HeadlessViewHost {
    fn create_window(&self, module_id: &str, request: WindowRequest) -> ModuleResult<WindowId> {
        let id = WindowId(self.next_window.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::info!(
            module_id = %module_id,
            window = id.0,
            title = %request.title,
            width = request.width,
            height = request.height,
            "Window requested (headless)"
        );
        Ok(id)
    }

    fn view_ready(&self, module_id: &str, view: ViewHandle) {
        tracing::debug!(module_id = %module_id, "View attached");
        self.views.lock().insert(module_id.to_string(), view);
    }

    fn module_deactivated(&self, module_id: &str) {
        // Dropped outside the lock; the handle may release a generation.
        let view = self.views.lock().remove(module_id);
        drop(view);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_ids_are_sequential() {
        let host = HeadlessViewHost::new();
        let first = host.create_window("a", WindowRequest::new("A")).unwrap();
        let second = host.create_window("b", WindowRequest::new("B")).unwrap();
        assert_eq!(first, WindowId(1));
        assert_eq!(second, WindowId(2));
    }

    #[test]
    fn test_view_released_on_deactivate() {
        let host = HeadlessViewHost::new();
        host.view_ready("clock", ViewHandle::new("face"));
        assert_eq!(host.attached_views(), vec!["clock".to_string()]);

        host.module_deactivated("clock");
        assert!(host.attached_views().is_empty());
    }
}
