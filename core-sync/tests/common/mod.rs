//! In-memory collaborators and a harness shared by the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::identity::{Identity, IdentityProvider};
use bridge_traits::network::{NetworkChangeStream, NetworkInfo, NetworkMonitor, NetworkType};
use bridge_traits::remote::{MediaDocument, MetadataStore, ObjectStore};
use bridge_traits::time::ManualClock;
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use core_runtime::config::{OperationTimeouts, RetrySettings};
use core_runtime::events::EventBus;
use core_sync::{
    CaptureIntake, CaptureRequest, EngineDeps, MediaKind, QuarantineStore, QueueItemId,
    QueueStore, RecordKey, RetryPolicy, SqliteQueueStore, SyncEngine,
};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

pub const OWNER: &str = "user-1";

// ============================================================================
// Remote stores
// ============================================================================

/// Object store keyed by object key; a repeated put overwrites.
#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<HashMap<String, (Bytes, String)>>,
    pub calls: AtomicUsize,
    failures: Mutex<VecDeque<BridgeError>>,
    gate: Mutex<Option<Arc<Gate>>>,
    hang: Mutex<bool>,
    panic_next: Mutex<bool>,
}

/// Lets a test hold an upload in flight.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

impl FakeObjectStore {
    pub fn fail_next(&self, err: BridgeError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn hold_next(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn hang_forever(&self) {
        *self.hang.lock().unwrap() = true;
    }

    pub fn panic_next(&self) {
        *self.panic_next.lock().unwrap() = true;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(&self, object_key: &str, data: Bytes, content_type: &str) -> BridgeResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        if std::mem::take(&mut *self.panic_next.lock().unwrap()) {
            panic!("object store exploded");
        }
        if *self.hang.lock().unwrap() {
            std::future::pending::<()>().await;
        }
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        self.objects
            .lock()
            .unwrap()
            .insert(object_key.to_string(), (data, content_type.to_string()));
        Ok(format!("https://objects.example/{}", object_key))
    }
}

#[derive(Default)]
pub struct FakeMetadataStore {
    pub documents: Mutex<HashMap<String, MediaDocument>>,
    pub calls: AtomicUsize,
    failures: Mutex<VecDeque<BridgeError>>,
}

impl FakeMetadataStore {
    pub fn fail_next(&self, err: BridgeError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn document(&self, id: &str) -> Option<MediaDocument> {
        self.documents.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().unwrap().len()
    }
}

#[async_trait]
impl MetadataStore for FakeMetadataStore {
    async fn create_or_replace(&self, document_id: &str, document: MediaDocument) -> BridgeResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.documents
            .lock()
            .unwrap()
            .insert(document_id.to_string(), document);
        Ok(())
    }
}

// ============================================================================
// Identity & network
// ============================================================================

pub struct FakeIdentity {
    current: Mutex<Option<Identity>>,
    pub calls: AtomicUsize,
}

impl FakeIdentity {
    pub fn signed_in(user_id: &str) -> Self {
        Self {
            current: Mutex::new(Some(Identity::new(user_id, "token-abc"))),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            current: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn sign_in(&self, user_id: &str) {
        *self.current.lock().unwrap() = Some(Identity::new(user_id, "token-abc"));
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn current_identity(&self) -> BridgeResult<Option<Identity>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.current.lock().unwrap().clone())
    }
}

/// Network monitor driven by the test through a channel.
pub struct FakeNetwork {
    connected: Mutex<bool>,
    changes: Mutex<Option<mpsc::UnboundedReceiver<NetworkInfo>>>,
    sender: mpsc::UnboundedSender<NetworkInfo>,
}

impl FakeNetwork {
    pub fn new(connected: bool) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            connected: Mutex::new(connected),
            changes: Mutex::new(Some(receiver)),
            sender,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock().unwrap() = connected;
        let info = if connected {
            NetworkInfo::connected(NetworkType::WiFi)
        } else {
            NetworkInfo::disconnected()
        };
        let _ = self.sender.send(info);
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<NetworkInfo>);

#[async_trait]
impl NetworkChangeStream for ChannelStream {
    async fn next(&mut self) -> Option<NetworkInfo> {
        self.0.recv().await
    }
}

#[async_trait]
impl NetworkMonitor for FakeNetwork {
    async fn get_network_info(&self) -> BridgeResult<NetworkInfo> {
        Ok(if *self.connected.lock().unwrap() {
            NetworkInfo::connected(NetworkType::WiFi)
        } else {
            NetworkInfo::disconnected()
        })
    }

    async fn subscribe_changes(&self) -> BridgeResult<Box<dyn NetworkChangeStream>> {
        let receiver = self
            .changes
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| BridgeError::OperationFailed("already subscribed".to_string()))?;
        Ok(Box::new(ChannelStream(receiver)))
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn retry_settings() -> RetrySettings {
    RetrySettings {
        base_delay: Duration::from_secs(30),
        max_delay: Duration::from_secs(3600),
        throttle_multiplier: 4,
        global_retry_delay: Duration::from_secs(300),
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub db_path: PathBuf,
    pub key: RecordKey,
    pub store: Arc<SqliteQueueStore>,
    pub quarantine: Arc<QuarantineStore>,
    pub objects: Arc<FakeObjectStore>,
    pub documents: Arc<FakeMetadataStore>,
    pub identity: Arc<FakeIdentity>,
    pub network: Option<Arc<FakeNetwork>>,
    pub clock: Arc<ManualClock>,
    pub bus: EventBus,
    pub engine: Arc<SyncEngine>,
    pub intake: CaptureIntake,
}

pub struct HarnessBuilder {
    identity: FakeIdentity,
    network: Option<Arc<FakeNetwork>>,
    timeouts: OperationTimeouts,
}

impl HarnessBuilder {
    pub fn identity(mut self, identity: FakeIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn network(mut self, network: FakeNetwork) -> Self {
        self.network = Some(Arc::new(network));
        self
    }

    pub fn timeouts(mut self, timeouts: OperationTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub async fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("upload_queue.db");
        let key = RecordKey::generate();
        let bus = EventBus::new(256);

        let store = Arc::new(
            SqliteQueueStore::open(&db_path, &key, Some(bus.clone()))
                .await
                .unwrap(),
        );
        let fs = Arc::new(TokioFileSystem::with_data_directory(dir.path().to_path_buf()));
        let quarantine = Arc::new(QuarantineStore::new(dir.path().join("quarantine"), fs));
        quarantine.init().await.unwrap();
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();

        let objects = Arc::new(FakeObjectStore::default());
        let documents = Arc::new(FakeMetadataStore::default());
        let identity = Arc::new(self.identity);
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
        ));

        let engine = Arc::new(SyncEngine::new(
            EngineDeps {
                store: store.clone(),
                quarantine: quarantine.clone(),
                identity_provider: identity.clone(),
                object_store: objects.clone(),
                metadata_store: documents.clone(),
                network_monitor: self
                    .network
                    .clone()
                    .map(|n| n as Arc<dyn NetworkMonitor>),
                clock: clock.clone(),
                event_bus: bus.clone(),
            },
            RetryPolicy::new(&retry_settings()),
            self.timeouts,
        ));
        let intake = CaptureIntake::new(quarantine.clone(), store.clone(), clock.clone(), bus.clone());

        Harness {
            dir,
            db_path,
            key,
            store,
            quarantine,
            objects,
            documents,
            identity,
            network: self.network,
            clock,
            bus,
            engine,
            intake,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            identity: FakeIdentity::signed_in(OWNER),
            network: None,
            timeouts: OperationTimeouts::default(),
        }
    }

    pub async fn new() -> Self {
        Self::builder().build().await
    }

    /// Write a temporary capture file as the camera would.
    pub fn capture_file(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join("inbox").join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    pub async fn enqueue(&self, name: &str, kind: MediaKind, bytes: &[u8]) -> QueueItemId {
        let source = self.capture_file(name, bytes);
        self.intake
            .enqueue(CaptureRequest::new(source, kind, OWNER).with_caption(name))
            .await
            .unwrap()
    }

    pub async fn pending(&self) -> usize {
        self.store.list().await.unwrap().len()
    }

    pub fn advance(&self, seconds: i64) {
        self.clock.advance(chrono::Duration::seconds(seconds));
    }
}
