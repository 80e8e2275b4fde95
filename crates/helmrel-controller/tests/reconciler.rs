mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use helmrel_backend::{BackendError, DynBackend, MemoryBackend, Operation};
use helmrel_controller::{
    Action, ControllerConfig, ErrorKind, FailureClassifier, ReconcileError, Reconciler,
};
use helmrel_core::{Phase, ReleaseRecord};
use helmrel_storage::{DynStore, Informer, MemoryStore, ReleaseCache};
use tokio_util::sync::CancellationToken;

struct Fixture {
    store: Arc<MemoryStore>,
    backend: Arc<MemoryBackend>,
    cache: Arc<ReleaseCache>,
    reconciler: Reconciler,
    shutdown: CancellationToken,
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(nginx_backend());
    let dyn_store: DynStore = store.clone();
    let dyn_backend: DynBackend = backend.clone();

    let informer = Informer::new(dyn_store.clone());
    let cache = informer.cache();
    let shutdown = CancellationToken::new();
    informer.spawn(shutdown.clone());
    assert!(cache.wait_for_sync(Duration::from_secs(5)).await);

    let reconciler = Reconciler::new(
        Arc::new(ControllerConfig {
            default_repo_url: REPO.into(),
            ..ControllerConfig::default()
        }),
        cache.clone(),
        dyn_store,
        dyn_backend,
    );
    Fixture {
        store,
        backend,
        cache,
        reconciler,
        shutdown,
    }
}

impl Fixture {
    async fn create(&self, record: ReleaseRecord) {
        let created = self.store.create(record).unwrap();
        let key = created.key().unwrap();
        let cache = self.cache.clone();
        wait_for("cache", move || {
            cache
                .get(&key)
                .is_some_and(|r| r.resource_version() == created.resource_version())
        })
        .await;
    }
}

#[tokio::test]
async fn test_install_then_upgrade() {
    let f = fixture().await;
    f.create(ReleaseRecord::new("default", "web", spec("1.2.0"))).await;

    let action = f.reconciler.reconcile(&key("web")).await.unwrap();
    assert_eq!(action, Action::Installed { revision: 1 });

    let current = f.store.get_record(&key("web")).unwrap();
    wait_for("status in cache", || {
        f.cache
            .get(&key("web"))
            .is_some_and(|r| r.resource_version() == current.resource_version())
    })
    .await;

    let action = f.reconciler.reconcile(&key("web")).await.unwrap();
    assert_eq!(action, Action::Upgraded { revision: 2 });
    f.shutdown.cancel();
}

#[tokio::test]
async fn test_upgrade_passes_force_and_recreate() {
    let f = fixture().await;
    let mut spec = spec("1.2.0");
    spec.force = true;
    spec.recreate = true;
    spec.values = "replicaCount: 3".into();
    f.create(ReleaseRecord::new("default", "web", spec)).await;
    f.reconciler.reconcile(&key("web")).await.unwrap();

    let current = f.store.get_record(&key("web")).unwrap();
    wait_for("status in cache", || {
        f.cache
            .get(&key("web"))
            .is_some_and(|r| r.resource_version() == current.resource_version())
    })
    .await;
    f.reconciler.reconcile(&key("web")).await.unwrap();

    let upgrade = f
        .backend
        .calls()
        .into_iter()
        .find(|c| c.operation() == Operation::Upgrade)
        .unwrap();
    match upgrade {
        helmrel_backend::Call::Upgrade { flags, values, .. } => {
            assert!(flags.force);
            assert!(flags.recreate);
            assert_eq!(values, "replicaCount: 3");
        }
        other => panic!("unexpected call {other:?}"),
    }
    f.shutdown.cancel();
}

#[tokio::test]
async fn test_missing_record_uninstalls() {
    let f = fixture().await;
    let action = f.reconciler.reconcile(&key("web")).await.unwrap();
    assert_eq!(action, Action::AlreadyGone);

    f.backend.fail_next(
        Operation::Uninstall,
        BackendError::unavailable(Operation::Uninstall, "connection reset"),
    );
    let err = f.reconciler.reconcile(&key("web")).await.unwrap_err();
    assert!(matches!(err, ReconcileError::Uninstall { .. }));
    assert_eq!(err.kind(), ErrorKind::Transient);
    f.shutdown.cancel();
}

#[tokio::test]
async fn test_history_errors_are_classified() {
    let f = fixture().await;
    f.create(ReleaseRecord::new("default", "web", spec("1.2.0"))).await;

    f.backend.fail_next(
        Operation::History,
        BackendError::unavailable(Operation::History, "tiller unreachable"),
    );
    let err = f.reconciler.reconcile(&key("web")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);

    f.backend.fail_next(
        Operation::History,
        BackendError::rejected(Operation::History, "release is corrupt"),
    );
    let err = f.reconciler.reconcile(&key("web")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecordAttributable);
    assert_eq!(f.backend.call_count(Operation::Install), 0);
    f.shutdown.cancel();
}

#[tokio::test]
async fn test_unresolvable_source_is_record_attributable() {
    let f = fixture().await;
    f.create(ReleaseRecord::new("default", "web", spec("0.0.1"))).await;

    let err = f.reconciler.reconcile(&key("web")).await.unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::Backend {
            operation: Operation::ResolveSource,
            ..
        }
    ));
    assert_eq!(err.kind(), ErrorKind::RecordAttributable);
    f.shutdown.cancel();
}

#[tokio::test]
async fn test_status_release_read_failure_is_only_logged() {
    let f = fixture().await;
    f.create(ReleaseRecord::new("default", "web", spec("1.2.0"))).await;
    f.backend.fail_next(
        Operation::ReleaseStatus,
        BackendError::unavailable(Operation::ReleaseStatus, "timeout"),
    );

    let action = f.reconciler.reconcile(&key("web")).await.unwrap();
    assert_eq!(action, Action::Installed { revision: 1 });
    f.shutdown.cancel();
}

#[tokio::test]
async fn test_failure_is_not_written_onto_a_newer_spec() {
    let f = fixture().await;
    f.create(ReleaseRecord::new("default", "web", spec("9.9.9"))).await;
    let err = f.reconciler.reconcile(&key("web")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RecordAttributable);
    assert_eq!(err.attempted_generation(), Some(1));

    // The user fixes the version while the failed attempt is being retired.
    let fixed = f.store.update_spec(&key("web"), spec("1.2.0")).unwrap();
    assert_eq!(fixed.metadata.generation, 2);

    let store: DynStore = f.store.clone();
    let failures = FailureClassifier::new(f.cache.clone(), store);
    let written = failures.record_failure(&key("web"), &err).await.unwrap();
    assert!(written.is_none());

    let current = f.store.get_record(&key("web")).unwrap();
    assert_ne!(current.phase(), Phase::Failed);
    assert!(current.status.failure_message.is_none());
    f.shutdown.cancel();
}

#[tokio::test]
async fn test_failure_is_written_onto_the_attempted_spec() {
    let f = fixture().await;
    f.create(ReleaseRecord::new("default", "web", spec("9.9.9"))).await;
    let err = f.reconciler.reconcile(&key("web")).await.unwrap_err();

    let store: DynStore = f.store.clone();
    let failures = FailureClassifier::new(f.cache.clone(), store);
    let written = failures
        .record_failure(&key("web"), &err)
        .await
        .unwrap()
        .expect("failure recorded");
    assert_eq!(written.phase(), Phase::Failed);
    assert_eq!(written.metadata.generation, 1);
    assert!(
        written
            .status
            .failure_message
            .as_deref()
            .is_some_and(|m| m.starts_with("resolve_source failed"))
    );
    f.shutdown.cancel();
}
