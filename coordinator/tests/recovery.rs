//! Crash and recovery scenarios.

mod common;

use std::sync::Arc;

use durabletx_common::{ActionStatus, OutputObjectState, PrepareOutcome, Uid};
use durabletx_coordinator::{CoordinatorConfig, TransactionManager, TxContext, TxState, ACTION_TYPE};
use durabletx_participant::ScriptedResource;
use durabletx_store::{FileObjectStore, FileStoreOptions, ObjectStore, StateKind, VolatileObjectStore};

use common::{create_test_manager, create_test_resources};

/// Begin a transaction over `resources` and prepare it, then drop the
/// manager as if the process had died.
async fn crash_after_prepare(store: Arc<dyn ObjectStore>, resources: &[Arc<ScriptedResource>]) -> Uid {
    let manager = create_test_manager(store);
    let ctx = TxContext::new();
    let tx = manager.begin(&ctx, None).await.unwrap();
    for resource in resources {
        manager
            .enlist_resource(&ctx, tx, resource.clone())
            .await
            .unwrap();
    }
    assert_eq!(manager.prepare(&ctx, tx).await.unwrap(), PrepareOutcome::Ok);
    tx
}

fn restart(store: Arc<dyn ObjectStore>, resources: &[Arc<ScriptedResource>]) -> TransactionManager {
    let manager = create_test_manager(store);
    for resource in resources {
        manager.register_resource(resource.clone());
    }
    manager
}

#[tokio::test]
async fn test_crash_after_prepare_commits_once() {
    let store: Arc<dyn ObjectStore> = Arc::new(VolatileObjectStore::new());
    let resources = create_test_resources(&["a", "b", "c"]);
    let tx = crash_after_prepare(store.clone(), &resources).await;

    let manager = restart(store.clone(), &resources);
    assert_eq!(manager.lookup(tx).unwrap(), TxState::Ghost);

    let report = manager.recovery().scan_once().await.unwrap();
    assert_eq!(report.recovered, 1);
    for resource in &resources {
        assert_eq!(resource.calls().commit, 1);
        assert!(resource.is_committed(tx));
    }
    assert_eq!(manager.lookup(tx).unwrap(), TxState::Unknown);
    assert_eq!(manager.metrics().snapshot().transactions_recovered, 1);
}

#[tokio::test]
async fn test_replaying_a_committed_log_changes_nothing() {
    let store: Arc<dyn ObjectStore> = Arc::new(VolatileObjectStore::new());
    let resources = create_test_resources(&["a", "b"]);
    let tx = crash_after_prepare(store.clone(), &resources).await;
    let log = store.read(tx, ACTION_TYPE).unwrap().unwrap().into_output();

    let manager = restart(store.clone(), &resources);
    manager.recovery().scan_once().await.unwrap();

    // the same log shows up again, e.g. restored from a backup
    store.write(tx, ACTION_TYPE, &log, StateKind::Committed).unwrap();
    let report = manager.recovery().scan_once().await.unwrap();
    assert_eq!(report.recovered, 1);
    for resource in &resources {
        assert_eq!(resource.committed_count(), 1);
        assert!(resource.is_committed(tx));
    }
    assert!(store.all_ids(ACTION_TYPE).unwrap().is_empty());
}

#[tokio::test]
async fn test_live_transaction_not_recovered() {
    let store: Arc<dyn ObjectStore> = Arc::new(VolatileObjectStore::new());
    let manager = create_test_manager(store.clone());
    let ctx = TxContext::new();
    let resources = create_test_resources(&["a", "b"]);

    let tx = manager.begin(&ctx, None).await.unwrap();
    for resource in &resources {
        manager
            .enlist_resource(&ctx, tx, resource.clone())
            .await
            .unwrap();
    }
    manager.prepare(&ctx, tx).await.unwrap();

    let report = manager.recovery().scan_once().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(resources[0].calls().commit, 0);

    assert_eq!(manager.commit(&ctx, tx).await.unwrap(), ActionStatus::Committed);
    assert_eq!(resources[0].calls().commit, 1);
}

#[tokio::test]
async fn test_file_store_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let open = || -> Arc<dyn ObjectStore> {
        Arc::new(FileObjectStore::open(dir.path(), FileStoreOptions::default()).unwrap())
    };
    let resources = create_test_resources(&["db", "queue"]);
    let tx = crash_after_prepare(open(), &resources).await;

    let manager = restart(open(), &resources);
    assert_eq!(manager.store().all_ids(ACTION_TYPE).unwrap(), vec![tx]);

    let report = manager.recovery().scan_once().await.unwrap();
    assert_eq!(report.recovered, 1);
    assert!(resources.iter().all(|r| r.is_committed(tx)));
    assert!(open().all_ids(ACTION_TYPE).unwrap().is_empty());
}

#[tokio::test]
async fn test_shadowed_state_promoted_by_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let open = || -> Arc<dyn ObjectStore> {
        Arc::new(FileObjectStore::open(dir.path(), FileStoreOptions::default()).unwrap())
    };
    let object = Uid::new();
    let type_name = "/App/Document";
    let document = |version: u64| {
        let mut os = OutputObjectState::new(object, type_name);
        os.pack_u64(version);
        os.pack_bytes(&[7u8; 512]).unwrap();
        os
    };
    open()
        .write(object, type_name, &document(1), StateKind::Committed)
        .unwrap();

    let config = CoordinatorConfig {
        max_log_state_size: 64,
        ..CoordinatorConfig::in_memory()
    };
    let tx = {
        let manager = TransactionManager::with_store(config.clone(), open());
        let ctx = TxContext::new();
        let tx = manager.begin(&ctx, None).await.unwrap();
        manager.persist(&ctx, tx, document(2)).await.unwrap();
        manager
            .enlist_resource(&ctx, tx, Arc::new(ScriptedResource::new("index")))
            .await
            .unwrap();
        manager.prepare(&ctx, tx).await.unwrap();
        tx
    };

    // before recovery only the old version is visible
    let mut is = open().read(object, type_name).unwrap().unwrap();
    assert_eq!(is.unpack_u64().unwrap(), 1);

    let manager = TransactionManager::with_store(config, open());
    manager.register_resource(Arc::new(ScriptedResource::new("index")));
    let report = manager.recovery().scan_once().await.unwrap();
    assert_eq!(report.scanned, 1);

    let mut is = open().read(object, type_name).unwrap().unwrap();
    assert_eq!(is.unpack_u64().unwrap(), 2);
    assert_eq!(manager.lookup(tx).unwrap(), TxState::Unknown);
}
