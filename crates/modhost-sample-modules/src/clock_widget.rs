//! Clock Widget
//!
//! An extension that shows the time. It asks for an optional weather
//! service and falls back to time only when none is loaded.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use modhost_sdk::prelude::*;
use serde::{Deserialize, Serialize};

pub const CLOCK_WIDGET_ID: &str = "samples.clock";
pub const WEATHER_SERVICE_ID: &str = "samples.weather";
pub const DEFAULT_FORMAT: &str = "%H:%M:%S";

/// chrono panics while displaying a format with unknown specifiers.
fn is_valid_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Published every time the clock is activated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockTick {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// chrono format string.
    pub format: String,
    pub show_weather: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_FORMAT.to_string(),
            show_weather: true,
        }
    }
}

/// The view handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockFace {
    pub format: String,
    pub weather: bool,
}

impl ClockFace {
    /// Falls back to [`DEFAULT_FORMAT`] when the format does not parse.
    pub fn render(&self, at: DateTime<Utc>) -> String {
        if is_valid_format(&self.format) {
            at.format(&self.format).to_string()
        } else {
            at.format(DEFAULT_FORMAT).to_string()
        }
    }
}

#[derive(Default)]
pub struct ClockWidget {
    host: Option<Arc<HostApi>>,
    config: ClockConfig,
    weather: bool,
}

impl ClockWidget {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExtensionModule for ClockWidget {
    fn info(&self) -> ModuleInfo {
        ModuleInfo::new(CLOCK_WIDGET_ID, "Clock", Version::new(0, 2, 0))
            .with_description("Shows the current time")
    }

    fn dependencies(&self) -> Vec<DependencySpec> {
        vec![DependencySpec::optional(WEATHER_SERVICE_ID)]
    }

    fn initialize(&mut self, host: Arc<HostApi>) -> ModuleResult<()> {
        self.config = host.load_config(ClockConfig::default());
        if !is_valid_format(&self.config.format) {
            host.warn(format!(
                "invalid time format {:?}, using {}",
                self.config.format, DEFAULT_FORMAT
            ));
            self.config.format = DEFAULT_FORMAT.to_string();
        }
        self.weather = self.config.show_weather && host.has_dependency(WEATHER_SERVICE_ID);
        if self.config.show_weather && !self.weather {
            host.info("weather service not loaded, showing time only");
        }
        self.host = Some(host);
        Ok(())
    }

    fn activate(&mut self) -> ModuleResult<()> {
        let host = self
            .host
            .as_ref()
            .ok_or_else(|| ModuleError::ActivationFailed("not initialized".into()))?;
        let now = Utc::now();
        host.publish(ClockTick { at: now });
        host.debug(format!("clock showing {}", now.format(&self.config.format)));
        Ok(())
    }

    fn deactivate(&mut self) -> ModuleResult<()> {
        Ok(())
    }

    fn view(&self) -> Option<ViewHandle> {
        Some(ViewHandle::new(ClockFace {
            format: self.config.format.clone(),
            weather: self.weather,
        }))
    }

    fn dispose(&mut self) -> ModuleResult<()> {
        self.host = None;
        Ok(())
    }
}
