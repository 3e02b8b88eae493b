//! Observed state and state stores
//!
//! The engine hands every [`ObservedState`] it produces to a [`StateStore`]
//! as the baseline for the next pass. [`FileStateStore`] keeps them in
//! `.converge/state.json` next to a backup and a lock file.

use crate::descriptor::ResourceDescriptor;
use crate::error::{ReconcileError, Result};
use crate::value::{AttrValue, Attributes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio::time::{Instant, sleep};

const STATE_VERSION: u32 = 1;
const STATE_DIR: &str = ".converge";
const STATE_FILE: &str = "state.json";
const STATE_BACKUP: &str = "state.json.backup";
const LOCK_FILE: &str = "lock.json";
const STALE_LOCK_HOURS: i64 = 1;
const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(5);
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(20);

/// Attributes of a resource as last reported by the platform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Resource kind
    pub kind: String,

    /// Platform identifier
    pub id: String,

    pub attributes: Attributes,

    /// Work request of the last mutation, if it was asynchronous
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_work_request_id: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl ObservedState {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.into(),
            id: id.into(),
            attributes: Attributes::new(),
            last_work_request_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build the state for `id` from the attributes sent (`base`) and the
    /// platform's read-back (`server`). Server values win; values the
    /// platform does not echo back (write-only secrets) are kept from
    /// `base`, and the identity field is filled in when missing.
    pub fn merged(
        descriptor: &ResourceDescriptor,
        id: impl Into<String>,
        base: &Attributes,
        server: &Attributes,
    ) -> Self {
        let mut state = Self::new(descriptor.kind(), id);
        state.attributes = base.clone();
        state
            .attributes
            .extend(server.iter().map(|(k, v)| (k.clone(), v.clone())));
        state
            .attributes
            .entry(descriptor.identity_field().to_string())
            .or_insert_with(|| AttrValue::from(state.id.clone()));
        state
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_work_request(mut self, work_request_id: Option<String>) -> Self {
        self.last_work_request_id = work_request_id;
        self
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.attributes.insert(key.into(), value.into());
        self.updated_at = Utc::now();
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.attributes.get(key)
    }
}

/// Persists observed state by resource address
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Last saved state for `address`, if any
    async fn load(&self, address: &str) -> Result<Option<ObservedState>>;

    async fn save(&self, address: &str, state: &ObservedState) -> Result<()>;

    /// Forget `address`; returns the removed state
    async fn remove(&self, address: &str) -> Result<Option<ObservedState>>;
}

/// Contents of the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State file version
    pub version: u32,

    /// Last modified timestamp
    pub updated_at: DateTime<Utc>,

    /// Resources indexed by address
    pub resources: BTreeMap<String, ObservedState>,
}

impl Default for StateFile {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            updated_at: Utc::now(),
            resources: BTreeMap::new(),
        }
    }
}

impl StateFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_resource(&mut self, address: impl Into<String>, state: ObservedState) {
        self.resources.insert(address.into(), state);
        self.updated_at = Utc::now();
    }

    pub fn remove_resource(&mut self, address: &str) -> Option<ObservedState> {
        let result = self.resources.remove(address);
        if result.is_some() {
            self.updated_at = Utc::now();
        }
        result
    }

    pub fn get_resource(&self, address: &str) -> Option<&ObservedState> {
        self.resources.get(address)
    }
}

/// Process-local state store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    resources: RwLock<BTreeMap<String, ObservedState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.resources.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.resources.read().await.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, address: &str) -> Result<Option<ObservedState>> {
        Ok(self.resources.read().await.get(address).cloned())
    }

    async fn save(&self, address: &str, state: &ObservedState) -> Result<()> {
        self.resources
            .write()
            .await
            .insert(address.to_string(), state.clone());
        Ok(())
    }

    async fn remove(&self, address: &str) -> Result<Option<ObservedState>> {
        Ok(self.resources.write().await.remove(address))
    }
}

/// JSON file state store under `<root>/.converge/`
pub struct FileStateStore {
    root: PathBuf,
    /// How long a writer waits for a held lock before failing
    lock_wait: Duration,
}

impl FileStateStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// Zero makes writers fail with [`ReconcileError::Lock`] immediately
    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir().join(STATE_BACKUP)
    }

    fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    fn temp_path(&self) -> PathBuf {
        self.state_dir().join(format!(
            "{}.{}.tmp",
            STATE_FILE,
            uuid::Uuid::new_v4().simple()
        ))
    }

    async fn ensure_state_dir(&self) -> Result<()> {
        let dir = self.state_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            tracing::debug!(path = %dir.display(), "Created state directory");
        }
        Ok(())
    }

    /// Read the whole state file; a missing file is an empty state
    pub async fn read_all(&self) -> Result<StateFile> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No state file yet");
                return Ok(StateFile::new());
            }
            Err(e) => return Err(e.into()),
        };
        let state: StateFile = serde_json::from_str(&content)?;

        if state.version > STATE_VERSION {
            return Err(ReconcileError::State(format!(
                "State file version {} is newer than supported version {}",
                state.version, STATE_VERSION
            )));
        }

        tracing::debug!(resources = state.resources.len(), "Loaded state");
        Ok(state)
    }

    /// Replace the state file, keeping a copy of the previous one as a backup.
    ///
    /// The new content is written to a temporary file and renamed over
    /// `state.json`, so readers see either the old or the new file.
    pub async fn write_all(&self, state: &StateFile) -> Result<()> {
        self.ensure_state_dir().await?;

        let path = self.state_path();
        if path.exists() {
            let backup = self.backup_path();
            fs::copy(&path, &backup).await?;
            tracing::debug!(path = %backup.display(), "Backed up previous state");
        }

        let content = serde_json::to_string_pretty(state)?;
        let temp = self.temp_path();
        if let Err(e) = fs::write(&temp, content).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        fs::rename(&temp, &path).await?;

        tracing::debug!(resources = state.resources.len(), "Saved state");
        Ok(())
    }

    /// Take the lock file for exclusive access, failing with
    /// [`ReconcileError::Lock`] while another holder has it
    pub async fn acquire_lock(&self) -> Result<StateLock> {
        self.ensure_state_dir().await?;

        let lock_path = self.lock_path();
        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        if let Err(e) = create_lock_file(&lock_path, &content).await {
            if e.kind() != io::ErrorKind::AlreadyExists {
                return Err(e.into());
            }
            break_stale_lock(&lock_path).await?;
            create_lock_file(&lock_path, &content)
                .await
                .map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => {
                        ReconcileError::Lock("State lock was taken by another writer".to_string())
                    }
                    _ => e.into(),
                })?;
        }

        tracing::debug!(path = %lock_path.display(), "Acquired state lock");
        Ok(StateLock {
            lock_path,
            released: false,
        })
    }

    /// [`acquire_lock`](Self::acquire_lock), retried until `lock_wait` runs out
    async fn wait_for_lock(&self) -> Result<StateLock> {
        let deadline = Instant::now() + self.lock_wait;
        loop {
            match self.acquire_lock().await {
                Err(ReconcileError::Lock(reason)) if Instant::now() < deadline => {
                    tracing::trace!(reason = %reason, "Waiting for state lock");
                    sleep(LOCK_RETRY_INTERVAL).await;
                }
                result => return result,
            }
        }
    }

    async fn modify<T>(&self, change: impl FnOnce(&mut StateFile) -> T) -> Result<T> {
        let lock = self.wait_for_lock().await?;
        let outcome = async {
            let mut file = self.read_all().await?;
            let value = change(&mut file);
            self.write_all(&file).await?;
            Ok::<_, ReconcileError>(value)
        }
        .await;
        lock.release().await?;
        outcome
    }
}

async fn create_lock_file(path: &Path, content: &str) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

/// Remove the lock at `path` if its holder is older than an hour.
/// A live holder is reported as [`ReconcileError::Lock`].
async fn break_stale_lock(path: &Path) -> Result<()> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    // An unparsable lock is one its holder is still writing
    let Ok(lock_info) = serde_json::from_str::<LockInfo>(&content) else {
        return Err(ReconcileError::Lock(
            "State lock is being taken by another writer".to_string(),
        ));
    };

    let age = Utc::now().signed_duration_since(lock_info.acquired_at);
    if age.num_hours() < STALE_LOCK_HOURS {
        return Err(ReconcileError::Lock(format!(
            "State is locked by {} since {}",
            lock_info.holder, lock_info.acquired_at
        )));
    }

    tracing::warn!(
        holder = %lock_info.holder,
        acquired_at = %lock_info.acquired_at,
        "Removing stale state lock"
    );
    match fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, address: &str) -> Result<Option<ObservedState>> {
        Ok(self.read_all().await?.resources.remove(address))
    }

    async fn save(&self, address: &str, state: &ObservedState) -> Result<()> {
        let state = state.clone();
        self.modify(move |file| file.set_resource(address, state))
            .await
    }

    async fn remove(&self, address: &str) -> Result<Option<ObservedState>> {
        self.modify(|file| file.remove_resource(address)).await
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    acquired_at: DateTime<Utc>,
}

/// RAII guard for the state lock file
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            if self.lock_path.exists() {
                fs::remove_file(&self.lock_path).await?;
                tracing::debug!("Released state lock");
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released && self.lock_path.exists() {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{AttrType, AttributeSchema};
    use std::sync::Arc;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    fn certificate() -> ObservedState {
        ObservedState::new("load_balancer_certificate", "lb-1/cert-a")
            .with_attribute("certificate_name", "cert-a")
            .with_attribute("public_certificate", "-----BEGIN CERTIFICATE-----")
    }

    #[tokio::test]
    async fn test_file_store_save_load() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let state = certificate();

        assert_ok!(store.save("load_balancer_certificate.main", &state).await);

        let loaded = store
            .load("load_balancer_certificate.main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, state);
        assert!(!temp_dir.path().join(".converge/lock.json").exists());
    }

    #[tokio::test]
    async fn test_file_store_keeps_backup() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        store.save("a", &certificate()).await.unwrap();
        store.save("b", &certificate()).await.unwrap();

        assert!(temp_dir.path().join(".converge/state.json.backup").exists());
        assert_eq!(store.read_all().await.unwrap().resources.len(), 2);

        let removed = store.remove("a").await.unwrap();
        assert!(removed.is_some());
        assert!(store.load("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_replaces_file_whole() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        store.save("a", &certificate()).await.unwrap();
        store.save("b", &certificate()).await.unwrap();

        let backup = std::fs::read_to_string(temp_dir.path().join(".converge/state.json.backup"))
            .unwrap();
        let previous: StateFile = serde_json::from_str(&backup).unwrap();
        assert_eq!(previous.resources.len(), 1);
        assert!(previous.get_resource("a").is_some());

        let leftovers = std::fs::read_dir(temp_dir.path().join(STATE_DIR))
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_empty_state() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());

        assert!(store.read_all().await.unwrap().resources.is_empty());
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_held_lock_blocks_writers() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path()).with_lock_wait(Duration::ZERO);

        let lock = store.acquire_lock().await.unwrap();
        let err = assert_err!(store.save("a", &certificate()).await);
        assert!(matches!(err, ReconcileError::Lock(_)));
        assert!(matches!(
            store.acquire_lock().await,
            Err(ReconcileError::Lock(_))
        ));

        lock.release().await.unwrap();
        assert_ok!(store.save("a", &certificate()).await);
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path()).with_lock_wait(Duration::ZERO);
        std::fs::create_dir_all(temp_dir.path().join(STATE_DIR)).unwrap();
        let stale = LockInfo {
            holder: "crashed-host".to_string(),
            acquired_at: Utc::now() - chrono::Duration::hours(2),
        };
        std::fs::write(
            temp_dir.path().join(".converge/lock.json"),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        assert_ok!(store.save("a", &certificate()).await);
        assert!(!temp_dir.path().join(".converge/lock.json").exists());
    }

    /// Writers to distinct addresses queue on the lock; none is lost
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_are_serialized() {
        let temp_dir = tempdir().unwrap();
        let store = Arc::new(FileStateStore::new(temp_dir.path()));
        let state = certificate();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let state = state.clone();
                tokio::spawn(async move { store.save(&format!("cert.{}", i), &state).await })
            })
            .collect();
        for handle in handles {
            assert_ok!(handle.await.unwrap());
        }

        let file = store.read_all().await.unwrap();
        assert_eq!(file.resources.len(), 8);
        for i in 0..8 {
            assert_eq!(file.get_resource(&format!("cert.{}", i)), Some(&state));
        }
        assert!(!temp_dir.path().join(".converge/lock.json").exists());
    }

    #[tokio::test]
    async fn test_newer_version_rejected() {
        let temp_dir = tempdir().unwrap();
        let store = FileStateStore::new(temp_dir.path());
        let mut file = StateFile::new();
        file.version = STATE_VERSION + 1;
        store.write_all(&file).await.unwrap();

        assert!(matches!(
            store.read_all().await,
            Err(ReconcileError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStateStore::new();
        store.save("x", &certificate()).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.remove("x").await.unwrap().is_some());
        assert!(store.is_empty().await);
    }

    #[test]
    fn test_merged_keeps_unechoed_values() {
        let descriptor = ResourceDescriptor::new("load_balancer_certificate", "certificate_id")
            .attribute(AttributeSchema::required("certificate_name", AttrType::String))
            .attribute(AttributeSchema::optional("private_key", AttrType::String).sensitive());

        let mut sent = Attributes::new();
        sent.insert("certificate_name".into(), AttrValue::from("cert-a"));
        sent.insert("private_key".into(), AttrValue::from("secret"));
        let mut server = Attributes::new();
        server.insert("certificate_name".into(), AttrValue::from("cert-a"));
        server.insert("state".into(), AttrValue::from("ACTIVE"));

        let state = ObservedState::merged(&descriptor, "c-1", &sent, &server);
        assert_eq!(state.get("private_key"), Some(&AttrValue::from("secret")));
        assert_eq!(state.get("state"), Some(&AttrValue::from("ACTIVE")));
        assert_eq!(state.get("certificate_id"), Some(&AttrValue::from("c-1")));
    }
}
