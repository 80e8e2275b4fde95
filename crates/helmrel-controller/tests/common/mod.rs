#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use helmrel_backend::{DynBackend, MemoryBackend};
use helmrel_controller::{
    Controller, ControllerConfig, ControllerError, ErrorKind, ErrorSink, ExponentialBackoff,
    ReconcileError, WorkQueue,
};
use helmrel_core::{Phase, ReleaseKey, ReleaseRecord, ReleaseSpec, StoreEvent};
use helmrel_storage::{DynStore, MemoryStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const REPO: &str = "https://charts.example.com";

/// Error sink that keeps every report.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(ReleaseKey, ErrorKind, String)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(ReleaseKey, ErrorKind, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn report(&self, key: &ReleaseKey, err: &ReconcileError) {
        self.reports
            .lock()
            .unwrap()
            .push((key.clone(), err.kind(), err.to_string()));
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub backend: Arc<MemoryBackend>,
    pub sink: Arc<RecordingSink>,
    pub queue: WorkQueue,
    pub shutdown: CancellationToken,
    pub handle: JoinHandle<Result<(), ControllerError>>,
    /// Every phase the store ever published, in order.
    pub phases: Arc<Mutex<Vec<(String, Phase)>>>,
}

impl Harness {
    pub fn key(&self, name: &str) -> ReleaseKey {
        key(name)
    }

    pub fn record(&self, name: &str) -> Arc<ReleaseRecord> {
        self.store.get_record(&key(name)).expect("record exists")
    }

    pub fn phases_of(&self, name: &str) -> Vec<Phase> {
        let display = format!("default/{name}");
        self.phases
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == display)
            .map(|(_, p)| *p)
            .collect()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle
            .await
            .expect("controller task panicked")
            .expect("controller failed");
    }
}

pub fn key(name: &str) -> ReleaseKey {
    ReleaseKey::new("default", name).unwrap()
}

pub fn spec(version: &str) -> ReleaseSpec {
    ReleaseSpec {
        chart_name: "nginx".into(),
        version: version.into(),
        ..Default::default()
    }
}

pub fn config() -> ControllerConfig {
    ControllerConfig {
        default_repo_url: REPO.into(),
        resync_interval: Duration::ZERO,
        backoff: ExponentialBackoff::new(Duration::from_millis(1), Duration::from_millis(50)),
        cache_sync_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

pub fn nginx_backend() -> MemoryBackend {
    MemoryBackend::new().with_chart(REPO, "nginx", &["1.2.0", "1.3.0"])
}

pub fn start(config: ControllerConfig, backend: MemoryBackend) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(backend);
    let sink = Arc::new(RecordingSink::default());

    let phases = Arc::new(Mutex::new(Vec::new()));
    let mut events = store.broadcaster().subscribe();
    let recorded = phases.clone();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let StoreEvent::Put(record) = event {
                recorded
                    .lock()
                    .unwrap()
                    .push((record.display_key(), record.phase()));
            }
        }
    });

    let dyn_store: DynStore = store.clone();
    let dyn_backend: DynBackend = backend.clone();
    let controller =
        Controller::new(config, dyn_store, dyn_backend).with_error_sink(sink.clone());
    let queue = controller.queue().clone();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(controller.run(shutdown.clone()));

    Harness {
        store,
        backend,
        sink,
        queue,
        shutdown,
        handle,
        phases,
    }
}

/// Polls `condition` until it holds, panicking after five seconds.
pub async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Lets any stray work settle before asserting that nothing else happened.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}
