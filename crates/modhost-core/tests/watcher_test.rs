//! Hot reload driven by file system events.

mod common;

use std::time::Duration;

use common::{touch, Fixture};
use modhost_core::ModuleWatcher;

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_new_module_file_triggers_reload() {
    let fixture = Fixture::with_config(&["clock"], |config| config.debounce_ms = 50);
    let (host, _dir) = fixture.into_shared();
    let first = host.load_all().unwrap().generation;

    let watcher = ModuleWatcher::spawn(host.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    touch(host.module_dir(), "orphan");

    let reloaded = wait_for(|| {
        host.descriptor("test.orphan")
            .is_some_and(|d| d.is_active())
    })
    .await;
    assert!(reloaded, "orphan module was not loaded by the watcher");
    assert!(host.descriptor("test.clock").unwrap().is_active());
    assert_ne!(host.current_generation(), first);

    drop(watcher);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_removed_module_file_unloads() {
    let fixture = Fixture::with_config(&["clock", "orphan"], |config| config.debounce_ms = 50);
    let (host, _dir) = fixture.into_shared();
    host.load_all().unwrap();

    let watcher = ModuleWatcher::spawn(host.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::remove_file(host.module_dir().join("orphan.module")).unwrap();

    let unloaded = wait_for(|| {
        host.descriptor("test.orphan")
            .is_some_and(|d| !d.is_loaded)
    })
    .await;
    assert!(unloaded, "orphan module is still loaded");
    assert!(host.descriptor("test.clock").unwrap().is_active());

    drop(watcher);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unrelated_files_are_ignored() {
    let fixture = Fixture::with_config(&["clock"], |config| config.debounce_ms = 50);
    let (host, _dir) = fixture.into_shared();
    let generation = host.load_all().unwrap().generation;

    let watcher = ModuleWatcher::spawn(host.clone()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    std::fs::write(host.module_dir().join("notes.txt"), b"not a module").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(host.current_generation(), generation);
    drop(watcher);
}
