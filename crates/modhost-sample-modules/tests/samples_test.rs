//! The sample modules running inside a real host.

use modhost_core::sdk::WindowId;
use modhost_core::{BuiltinModuleTable, HostConfig, ModuleHost};
use modhost_sample_modules::counter_panel::WINDOW_KEY;
use modhost_sample_modules::{
    clock_manifest, counter_manifest, modhost_manifest, Counter, PanelConfig, CLOCK_WIDGET_ID,
    COUNTER_PANEL_ID, COUNTER_SERVICE_ID,
};
use tempfile::TempDir;

fn host(markers: &[&str]) -> (ModuleHost, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HostConfig::with_base_dir(dir.path());
    config.reclaim_grace_ms = 5;

    let table = BuiltinModuleTable::new()
        .register("samples", modhost_manifest)
        .register("counter", counter_manifest)
        .register("clock", clock_manifest);
    let host = ModuleHost::builder(config)
        .with_builtin(table)
        .with_native(false)
        .build()
        .unwrap();
    for marker in markers {
        std::fs::write(host.module_dir().join(format!("{}.module", marker)), b"").unwrap();
    }
    (host, dir)
}

fn ticks(host: &ModuleHost) -> u64 {
    host.get_dependency(COUNTER_SERVICE_ID)
        .and_then(|dep| dep.capability::<dyn Counter>())
        .map(|counter| counter.get("ticks"))
        .unwrap_or(0)
}

#[test]
fn test_all_samples_become_active() {
    let (host, _dir) = host(&["samples"]);
    let report = host.load_all().unwrap();

    assert_eq!(
        report.active,
        vec![
            COUNTER_SERVICE_ID.to_string(),
            COUNTER_PANEL_ID.to_string(),
            CLOCK_WIDGET_ID.to_string(),
        ]
    );
    // The clock's weather service is optional and absent.
    assert_eq!(report.missing_dependencies.len(), 1);
    assert!(!report.missing_dependencies[0].required);

    // The panel subscribed before the clock ticked.
    assert_eq!(ticks(&host), 1);
    assert!(host.shared_data().try_get::<WindowId>(WINDOW_KEY).is_some());
}

#[test]
fn test_reload_reclaims_and_persists_total() {
    let (host, _dir) = host(&["samples"]);
    host.load_all().unwrap();

    let second = host.load_all().unwrap();
    assert!(second.reclamation.unwrap().is_reclaimed());
    assert_eq!(ticks(&host), 1);

    host.shutdown();
    let path = host
        .config()
        .config_dir
        .join(COUNTER_PANEL_ID)
        .join("config.json");
    let saved: PanelConfig = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(saved.total_ticks, 2);
}

#[test]
fn test_unloading_panel_releases_window() {
    let (host, _dir) = host(&["counter"]);
    host.load_all().unwrap();
    assert!(host.shared_data().has(WINDOW_KEY));

    host.unload(COUNTER_PANEL_ID).unwrap();
    assert!(!host.shared_data().has(WINDOW_KEY));
    assert!(host.descriptor(COUNTER_SERVICE_ID).unwrap().is_active());
}

#[test]
fn test_clock_with_bad_format_still_activates() {
    let (host, _dir) = host(&[]);
    let data_dir = host.config().config_dir.join(CLOCK_WIDGET_ID);
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(data_dir.join("config.json"), r#"{"format":"%Q"}"#).unwrap();
    std::fs::write(host.module_dir().join("clock.module"), b"").unwrap();

    let report = host.load_all().unwrap();
    assert!(report.failures.is_empty());
    assert_eq!(report.active, vec![CLOCK_WIDGET_ID.to_string()]);
}

#[test]
fn test_clock_alone() {
    let (host, _dir) = host(&["clock"]);
    let report = host.load_all().unwrap();
    assert_eq!(report.active, vec![CLOCK_WIDGET_ID.to_string()]);
    assert!(host.get_dependency(COUNTER_SERVICE_ID).is_none());
}
