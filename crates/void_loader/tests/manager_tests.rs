//! Integration tests for the module manager over a plugin directory

mod common;

use common::{init_logging, install, module_file, revision_of, Revision};
use parking_lot::Mutex;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use void_loader::*;

const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn loaded(name: &str, path: std::path::PathBuf, active: bool) -> ModuleEvent {
    ModuleEvent::Loaded {
        name: name.to_string(),
        path,
        active,
    }
}

#[test]
fn test_startup_list_decides_active_modules() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("Alpha")).unwrap();
    let alpha = install(Revision::First, &dir.path().join("Alpha"), &module_file("Alpha"));
    let beta = install(Revision::First, dir.path(), &module_file("Beta"));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let manager = ModuleManagerBuilder::new(dir.path())
        .set_startup_modules(["Alpha"])
        .on_event(move |event| sink.lock().push(event.clone()))
        .build()
        .unwrap();

    assert_eq!(manager.modules(), vec!["Alpha".to_string()]);
    assert_eq!(manager.inactive_modules(), vec!["Beta".to_string()]);
    assert_eq!(*seen.lock(), vec![loaded("Alpha", alpha, true), loaded("Beta", beta, false)]);

    let module = manager.module("Alpha").unwrap();
    assert_eq!(module.info().unwrap().name, "Fixture");
    assert!(manager.module("Beta").is_none());
    assert!(manager.context("Beta").unwrap().is_loaded());
}

#[test]
fn test_activate_and_deactivate() {
    let dir = tempfile::tempdir().unwrap();
    install(Revision::First, dir.path(), &module_file("Alpha"));
    install(Revision::First, dir.path(), &module_file("Beta"));

    let manager = ModuleManagerBuilder::new(dir.path())
        .set_startup_modules(Vec::<String>::new())
        .build()
        .unwrap();
    assert!(manager.modules().is_empty());
    assert_eq!(manager.is_active("Alpha"), Some(false));

    manager.activate("Beta").unwrap();
    assert_eq!(manager.modules(), vec!["Beta".to_string()]);
    assert_eq!(revision_of(&manager.module("Beta").unwrap()), 1);

    manager.deactivate("Beta").unwrap();
    assert!(manager.module("Beta").is_none());

    assert!(matches!(manager.deactivate("Beta"), Err(LoaderError::InvalidArgument { .. })));
    assert!(matches!(manager.activate("Gamma"), Err(LoaderError::InvalidArgument { .. })));
    assert_eq!(manager.is_active("Gamma"), None);
}

#[test]
fn test_rescan_loads_reloads_and_unloads() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    install(Revision::First, dir.path(), &module_file("Alpha"));
    install(Revision::First, dir.path(), &module_file("Beta"));

    let manager = ModuleManagerBuilder::new(dir.path())
        .set_inactive_on_load(true)
        .build()
        .unwrap();
    let events = manager.subscribe();
    assert_eq!(manager.modules(), vec!["Alpha".to_string(), "Beta".to_string()]);

    let old_alpha = manager.module("Alpha").unwrap();
    let beta_tracker = manager.context("Beta").unwrap().track();

    // New after startup: inactive. Replaced: reloaded in place. Deleted: unloaded.
    let gamma = install(Revision::First, dir.path(), &module_file("Gamma"));
    let alpha = install(Revision::Next, dir.path(), &module_file("Alpha"));
    fs::remove_file(dir.path().join(module_file("Beta"))).unwrap();
    manager.rescan();

    let received: Vec<ModuleEvent> = events.try_iter().collect();
    assert_eq!(
        received,
        vec![
            ModuleEvent::Unloaded {
                name: "Alpha".to_string(),
                was_active: true
            },
            loaded("Alpha", alpha, true),
            ModuleEvent::Unloaded {
                name: "Beta".to_string(),
                was_active: true
            },
            loaded("Gamma", gamma, false),
        ]
    );

    assert_eq!(manager.modules(), vec!["Alpha".to_string()]);
    assert_eq!(manager.inactive_modules(), vec!["Gamma".to_string()]);
    assert_eq!(revision_of(&manager.module("Alpha").unwrap()), 2);
    assert_eq!(revision_of(&old_alpha), 1);
    beta_tracker.verify_reclaimed(DEFAULT_RECLAIM_ATTEMPTS).unwrap();

    // Nothing changed since
    manager.rescan();
    assert!(events.try_recv().is_err());
}

#[test]
fn test_explicit_load_unload_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let plugins = dir.path().join("plugins");
    let manager = ModuleManager::new(ModuleManagerConfig::new(&plugins)).unwrap();
    assert!(plugins.is_dir());
    let events = manager.subscribe();

    let outside = tempfile::tempdir().unwrap();
    let path = install(Revision::First, outside.path(), &module_file("Delta"));
    assert_eq!(manager.load(&path).unwrap(), "Delta");
    assert!(matches!(manager.load(&path), Err(LoaderError::InvalidArgument { .. })));

    let held = manager.module("Delta").unwrap();
    let tracker = manager.unload("Delta").unwrap();
    assert!(tracker.is_alive());
    drop(held);
    tracker.verify_reclaimed(DEFAULT_RECLAIM_ATTEMPTS).unwrap();
    assert!(matches!(manager.unload("Delta"), Err(LoaderError::InvalidArgument { .. })));

    let broken = install(Revision::FutureApi, outside.path(), &module_file("Broken"));
    assert!(matches!(manager.load(&broken), Err(LoaderError::VersionMismatch { .. })));
    assert!(manager.is_active("Broken").is_none());

    let received: Vec<ModuleEvent> = events.try_iter().collect();
    assert_eq!(received.len(), 3);
    assert!(matches!(&received[2], ModuleEvent::Failed { path, .. } if *path == broken));
}

#[test]
fn test_reload_keeps_module_state() {
    let dir = tempfile::tempdir().unwrap();
    install(Revision::First, dir.path(), &module_file("Alpha"));
    let manager = ModuleManagerBuilder::new(dir.path())
        .set_startup_modules(Vec::<String>::new())
        .build()
        .unwrap();

    install(Revision::Next, dir.path(), &module_file("Alpha"));
    manager.reload("Alpha").unwrap();

    assert_eq!(manager.is_active("Alpha"), Some(false));
    manager.activate("Alpha").unwrap();
    assert_eq!(revision_of(&manager.module("Alpha").unwrap()), 2);
}

#[cfg(feature = "hot-reload")]
#[test]
fn test_watched_directory_picks_up_new_module() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let manager = ModuleManagerBuilder::new(dir.path())
        .enable_hot_reload(Duration::from_millis(100))
        .build()
        .unwrap();
    let events = manager.subscribe();

    let path = install(Revision::First, dir.path(), &module_file("Echo"));

    let event = events.recv_timeout(EVENT_TIMEOUT).unwrap();
    assert_eq!(event, loaded("Echo", path, true));
    assert_eq!(manager.modules(), vec!["Echo".to_string()]);
    manager.stop();
}
