//! Counter Panel
//!
//! An extension that counts clock ticks through the counter service and
//! persists the running total in its config file.

use modhost_sdk::prelude::*;
use modhost_sdk::Capability;
use serde::{Deserialize, Serialize};

use crate::clock_widget::ClockTick;
use crate::counter_service::{Counter, COUNTER_SERVICE_ID};

pub const COUNTER_PANEL_ID: &str = "samples.counter_panel";

/// Shared-data key holding the panel's window id while it is active.
pub const WINDOW_KEY: &str = "samples.counter_panel.window";

const TICKS: &str = "ticks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub title: String,
    /// Ticks counted by earlier instances.
    pub total_ticks: u64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            title: "Counter".to_string(),
            total_ticks: 0,
        }
    }
}

/// The view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelView {
    pub title: String,
}

#[derive(Default)]
pub struct CounterPanel {
    host: Option<Arc<HostApi>>,
    config: PanelConfig,
    counter: Option<Capability<dyn Counter>>,
    on_tick: Option<EventHandler<ClockTick>>,
}

impl CounterPanel {
    pub fn new() -> Self {
        Self::default()
    }

    fn host(&self) -> ModuleResult<&Arc<HostApi>> {
        self.host
            .as_ref()
            .ok_or_else(|| ModuleError::Other("counter panel is not initialized".into()))
    }
}

impl ExtensionModule for CounterPanel {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(COUNTER_PANEL_ID, "Counter Panel", Version::new(0, 4, 0))
            .with_description("Counts clock ticks")
    }

    fn dependencies(&self) -> Vec<DependencySpec> {
        vec![DependencySpec::required(COUNTER_SERVICE_ID)]
    }

    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
        self.config = host.load_config(PanelConfig::default());

        // Without the service the panel still shows, it just never counts.
        self.counter = host
            .get_dependency(COUNTER_SERVICE_ID)
            .and_then(|dep| dep.capability::<dyn Counter>());
        if self.counter.is_none() {
            host.warn("counter service unavailable, ticks will not be counted");
        }

        if let Some(counter) = self.counter.clone() {
            self.on_tick = Some(host.subscribe(move |_: &ClockTick| {
                counter.increment(TICKS);
            }));
        }
        self.host = Some(host);
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        let host = self.host()?;
        host.start_timer("activate");
        let window = host.create_window(
            WindowRequest::new(self.config.title.clone())
                .with_size(320, 200)
                .fixed_size(),
        )?;
        host.share(WINDOW_KEY, window);
        if let Some(elapsed) = host.stop_timer("activate") {
            host.debug(format!("activated in {:?}", elapsed));
        }
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        // The shared window id pins this generation; take it back.
        self.host()?.shared_data().remove(WINDOW_KEY);
        Ok(())
    }

    fn view(&self) -> Option<ViewHandle> {
        Some(ViewHandle::new(PanelView {
            title: self.config.title.clone(),
        }))
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        let host = self.host()?.clone();
        if let Some(handler) = self.on_tick.take() {
            host.unsubscribe(&handler);
        }

        if let Some(counter) = self.counter.take() {
            self.config.total_ticks += counter.get(TICKS);
            counter.reset(TICKS);
        }
        host.save_config(&self.config)?;
        host.info(format!("{} ticks counted so far", self.config.total_ticks));

        self.host = None;
        Ok(())
    }
}
