//! Sample ModHost modules.
//!
//! Built as a native library this crate exports all three modules through
//! the fixed entry points. Hosts that compile it in can enable them with
//! marker files instead, using the per-module manifests below.

pub mod clock_widget;
pub mod counter_panel;
pub mod counter_service;

use modhost_sdk::prelude::*;
use modhost_sdk::ModuleManifest;

pub use clock_widget::{ClockConfig, ClockFace, ClockTick, ClockWidget, CLOCK_WIDGET_ID};
pub use counter_panel::{CounterPanel, PanelConfig, PanelView, COUNTER_PANEL_ID};
pub use counter_service::{Counter, CounterService, COUNTER_SERVICE_ID};

declare_modules! {
    dependency => CounterService::new,
    extension => CounterPanel::new,
    extension => ClockWidget::new,
}

/// The counter service together with its panel.
pub fn counter_manifest() -> ModuleManifest {
    ModuleManifest::new()
        .with_dependency(|| -> Arc<dyn DependencyModule> { Arc::new(CounterService::new()) })
        .with_extension(|| -> Box<dyn ExtensionModule> { Box::new(CounterPanel::new()) })
}

/// The clock widget alone.
pub fn clock_manifest() -> ModuleManifest {
    ModuleManifest::new()
        .with_extension(|| -> Box<dyn ExtensionModule> { Box::new(ClockWidget::new()) })
}
