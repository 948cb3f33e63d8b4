//! End-to-end behaviour of the upload service over on-disk state.

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::error::{BridgeError, Result as BridgeResult};
use bridge_traits::identity::{Identity, IdentityProvider};
use bridge_traits::remote::{MediaDocument, MetadataStore, ObjectStore};
use bridge_traits::storage::SecureStore;
use bytes::Bytes;
use core_service::{
    CaptureRequest, CoreConfig, CoreError, MediaKind, QueueEvent, RunOutcome, TriggerSource,
    UploadService,
};
use core_sync::{PassOutcome, SyncError};
use mockall::mock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const OWNER: &str = "user-1";

#[derive(Default)]
struct MemorySecureStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
        self.secrets
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
        self.secrets.lock().unwrap().remove(key);
        Ok(())
    }
}

struct SwitchableIdentity(Mutex<Option<Identity>>);

impl SwitchableIdentity {
    fn new(user: Option<&str>) -> Self {
        Self(Mutex::new(user.map(|u| Identity::new(u, "token"))))
    }

    fn sign_in(&self, user: &str) {
        *self.0.lock().unwrap() = Some(Identity::new(user, "token"));
    }
}

#[async_trait]
impl IdentityProvider for SwitchableIdentity {
    async fn current_identity(&self) -> BridgeResult<Option<Identity>> {
        Ok(self.0.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct Remote {
    objects: Mutex<HashMap<String, Bytes>>,
    documents: Mutex<HashMap<String, MediaDocument>>,
}

#[async_trait]
impl ObjectStore for Remote {
    async fn put(&self, object_key: &str, data: Bytes, _content_type: &str) -> BridgeResult<String> {
        self.objects
            .lock()
            .unwrap()
            .insert(object_key.to_string(), data);
        Ok(format!("mem://{}", object_key))
    }
}

#[async_trait]
impl MetadataStore for Remote {
    async fn create_or_replace(&self, document_id: &str, document: MediaDocument) -> BridgeResult<()> {
        self.documents
            .lock()
            .unwrap()
            .insert(document_id.to_string(), document);
        Ok(())
    }
}

mock! {
    Secrets {}

    #[async_trait]
    impl SecureStore for Secrets {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()>;
        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>>;
        async fn delete_secret(&self, key: &str) -> BridgeResult<()>;
    }
}

struct Env {
    dir: TempDir,
    secrets: Arc<dyn SecureStore>,
    identity: Arc<SwitchableIdentity>,
    remote: Arc<Remote>,
}

impl Env {
    fn new(user: Option<&str>) -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("inbox")).unwrap();
        Self {
            dir,
            secrets: Arc::new(MemorySecureStore::default()),
            identity: Arc::new(SwitchableIdentity::new(user)),
            remote: Arc::new(Remote::default()),
        }
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.dir.path().join("captures")
    }

    fn config(&self) -> CoreConfig {
        CoreConfig::builder()
            .database_path(self.dir.path().join("upload_queue.db"))
            .quarantine_dir(self.quarantine_dir())
            .identity_provider(self.identity.clone())
            .object_store(self.remote.clone())
            .metadata_store(self.remote.clone())
            .secure_store(self.secrets.clone())
            .file_system(Arc::new(TokioFileSystem::with_data_directory(
                self.dir.path().to_path_buf(),
            )))
            .build()
            .unwrap()
    }

    fn capture(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.dir.path().join("inbox").join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

/// Run a pass of our own, waiting out any pass an enqueue already started.
async fn drain(service: &UploadService) -> u64 {
    loop {
        match service.trigger_and_wait(TriggerSource::Manual).await {
            Some(RunOutcome::Coalesced) => {
                let mut status = service.status();
                status.wait_for(|s| !s.running).await.unwrap();
            }
            Some(RunOutcome::Ran {
                last: PassOutcome::Completed(summary),
                ..
            }) => return summary.uploaded,
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_enqueue_then_upload() {
    let env = Env::new(Some(OWNER));
    let service = UploadService::bootstrap(env.config()).await.unwrap();

    let source = env.capture("shot.tmp", b"jpeg bytes");
    let id = service
        .enqueue(CaptureRequest::new(&source, MediaKind::Photo, OWNER).with_caption("hello"))
        .await
        .unwrap();
    assert!(!source.exists());

    drain(&service).await;

    assert!(service.pending_items().await.unwrap().is_empty());
    assert_eq!(service.status().borrow().pending, 0);
    let objects = env.remote.objects.lock().unwrap();
    assert_eq!(
        objects[&format!("captures/{}.jpg", id)],
        Bytes::from_static(b"jpeg bytes")
    );
    let documents = env.remote.documents.lock().unwrap();
    assert_eq!(documents[&id.to_string()].caption.as_deref(), Some("hello"));
    assert_eq!(std::fs::read_dir(env.quarantine_dir()).unwrap().count(), 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_missing_capture_is_reported_to_caller() {
    let env = Env::new(Some(OWNER));
    let service = UploadService::bootstrap(env.config()).await.unwrap();

    let result = service
        .enqueue(CaptureRequest::new(
            env.dir.path().join("inbox").join("never-written.tmp"),
            MediaKind::Video,
            OWNER,
        ))
        .await;

    assert!(matches!(
        result,
        Err(CoreError::Sync(SyncError::FileMissing { .. }))
    ));
    assert!(service.pending_items().await.unwrap().is_empty());
    service.shutdown().await;
}

#[tokio::test]
async fn test_queue_survives_restart() {
    let env = Env::new(None);
    let service = UploadService::bootstrap(env.config()).await.unwrap();
    let source = env.capture("clip.tmp", b"mp4");
    let id = service
        .enqueue(CaptureRequest::new(&source, MediaKind::Video, OWNER))
        .await
        .unwrap();
    service.shutdown().await;
    drop(service);

    env.identity.sign_in(OWNER);
    let service = UploadService::bootstrap(env.config()).await.unwrap();

    let pending = service.pending_items().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, id);
    assert_eq!(service.status().borrow().pending, 1);

    assert_eq!(drain(&service).await, 1);
    assert!(env
        .remote
        .objects
        .lock()
        .unwrap()
        .contains_key(&format!("captures/{}.mp4", id)));
    service.shutdown().await;
}

#[tokio::test]
async fn test_bootstrap_sweeps_orphaned_files() {
    let env = Env::new(None);
    let service = UploadService::bootstrap(env.config()).await.unwrap();
    let source = env.capture("kept.tmp", b"keep me");
    let id = service
        .enqueue(CaptureRequest::new(&source, MediaKind::Photo, OWNER))
        .await
        .unwrap();
    service.shutdown().await;
    drop(service);

    let orphan = env.quarantine_dir().join("left-behind.jpg");
    std::fs::write(&orphan, b"no record").unwrap();

    let service = UploadService::bootstrap(env.config()).await.unwrap();

    assert!(!orphan.exists());
    let pending = service.pending_items().await.unwrap();
    assert_eq!(pending[0].id, id);
    assert!(pending[0].owned_file_path.exists());
    service.shutdown().await;
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_refused() {
    let env = Env::new(Some(OWNER));
    let service = UploadService::bootstrap(env.config()).await.unwrap();
    service.shutdown().await;

    let source = env.capture("late.tmp", b"jpeg");
    let result = service
        .enqueue(CaptureRequest::new(&source, MediaKind::Photo, OWNER))
        .await;

    assert!(matches!(result, Err(CoreError::ShutDown)));
    assert!(source.exists());
    assert_eq!(service.trigger_and_wait(TriggerSource::Manual).await, None);
}

#[tokio::test]
async fn test_enqueue_publishes_event() {
    let env = Env::new(None);
    let service = UploadService::bootstrap(env.config()).await.unwrap();
    let mut events = service.subscribe().filter(|e| {
        matches!(e, core_service::CoreEvent::Queue(QueueEvent::Enqueued { .. }))
    });

    let source = env.capture("shot.tmp", b"jpeg");
    let id = service
        .enqueue(CaptureRequest::new(&source, MediaKind::Photo, OWNER))
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        core_service::CoreEvent::Queue(QueueEvent::Enqueued {
            item_id, pending, ..
        }) => {
            assert_eq!(item_id, id.to_string());
            assert_eq!(pending, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
    service.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_record_key_fails_bootstrap() {
    let env = Env::new(Some(OWNER));
    let mut secrets = MockSecrets::new();
    secrets
        .expect_get_secret()
        .returning(|_| Ok(Some(vec![1, 2, 3])));
    secrets.expect_set_secret().never();

    let mut config = env.config();
    config.secure_store = Arc::new(secrets);

    let result = UploadService::bootstrap(config).await;
    assert!(matches!(
        result,
        Err(CoreError::Sync(SyncError::Encryption(_)))
    ));
}

#[tokio::test]
async fn test_secure_store_failure_fails_bootstrap() {
    let env = Env::new(Some(OWNER));
    let mut secrets = MockSecrets::new();
    secrets
        .expect_get_secret()
        .returning(|_| Err(BridgeError::NotAvailable("keychain locked".to_string())));

    let mut config = env.config();
    config.secure_store = Arc::new(secrets);

    assert!(UploadService::bootstrap(config).await.is_err());
}
