//! In-process fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use deedbox::app::App;
use deedbox::config::{parse_config, Config};
use deedbox_core::embedding::Embedder;
use deedbox_core::generate::AnswerGenerator;
use deedbox_core::models::RemoteEntry;
use deedbox_core::remote::RemoteStorage;
use deedbox_core::store::memory::InMemoryStore;
use deedbox_core::store::ChunkStore;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

struct RemoteFile {
    bytes: Vec<u8>,
    modified: DateTime<Utc>,
    hash: Option<String>,
}

/// Remote tree held in memory, with switches for injecting failures.
#[derive(Default)]
pub struct FakeRemote {
    files: Mutex<BTreeMap<String, RemoteFile>>,
    failing: Mutex<BTreeSet<String>>,
    listing_fails: AtomicBool,
    download_delay: Mutex<Option<Duration>>,
    pub downloads: AtomicUsize,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, path: &str, content: &str, modified_secs: i64) {
        self.insert(path, content, modified_secs, None);
    }

    /// Like [`put`](Self::put) but with a fixed provider hash.
    pub fn put_hashed(&self, path: &str, content: &str, hash: &str) {
        self.insert(path, content, 0, Some(hash.to_string()));
    }

    fn insert(&self, path: &str, content: &str, modified_secs: i64, hash: Option<String>) {
        let modified = Utc.timestamp_opt(1_700_000_000 + modified_secs, 0).unwrap();
        self.files.lock().unwrap().insert(
            path.to_string(),
            RemoteFile {
                bytes: content.as_bytes().to_vec(),
                modified,
                hash,
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    pub fn fail_download(&self, path: &str) {
        self.failing.lock().unwrap().insert(path.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn fail_listing(&self, fail: bool) {
        self.listing_fails.store(fail, Ordering::SeqCst);
    }

    pub fn delay_downloads(&self, delay: Duration) {
        *self.download_delay.lock().unwrap() = Some(delay);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStorage for FakeRemote {
    fn name(&self) -> &str {
        "fake"
    }

    fn root(&self) -> &str {
        "/"
    }

    async fn list(&self) -> anyhow::Result<Vec<RemoteEntry>> {
        if self.listing_fails.load(Ordering::SeqCst) {
            anyhow::bail!("remote unreachable");
        }
        let files = self.files.lock().unwrap();
        Ok(files
            .iter()
            .map(|(path, f)| RemoteEntry {
                path: path.clone(),
                content_hash: Some(
                    f.hash
                        .clone()
                        .unwrap_or_else(|| format!("{:x}", Sha256::digest(&f.bytes))),
                ),
                size: f.bytes.len() as u64,
                remote_modified_at: f.modified,
            })
            .collect())
    }

    async fn download(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        let delay = *self.download_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().contains(path) {
            anyhow::bail!("injected download failure for {}", path);
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let files = self.files.lock().unwrap();
        files
            .get(path)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| anyhow::anyhow!("no such remote file: {}", path))
    }
}

const VOCABULARY: [&str; 8] = [
    "lease", "rent", "deposit", "roof", "tax", "insurance", "garden", "parking",
];

/// Deterministic embedder: one dimension per vocabulary word plus a bias.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = VOCABULARY
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

/// Keyword embedder that parks every call until the test releases it.
pub struct GatedEmbedder {
    pub inner: KeywordEmbedder,
    pub entered: tokio::sync::Notify,
    pub release: tokio::sync::Semaphore,
}

impl GatedEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: KeywordEmbedder::default(),
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Semaphore::new(0),
        })
    }
}

#[async_trait]
impl Embedder for GatedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.entered.notify_one();
        let _permit = self.release.acquire().await?;
        self.inner.embed(texts).await
    }
}

/// Generator that reports what it received and counts its calls.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl AnswerGenerator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, query: &str, context: &str, _prompt: &str) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("Q: {} | context: {} chars", query, context.len()))
    }
}

/// Workspace for one test: temp dirs, config and the fakes.
pub struct Harness {
    pub tmp: TempDir,
    pub config: Config,
    pub remote: Arc<FakeRemote>,
    pub store: Arc<InMemoryStore>,
    pub embedder: Arc<KeywordEmbedder>,
    pub generator: Arc<EchoGenerator>,
}

pub fn test_config(root: &Path, extra: &str) -> Config {
    let toml = format!(
        r#"[sync]
local_root = "{root}/documents"
manifest_path = "{root}/state/manifest.json"
status_path = "{root}/state/sync_status.json"
concurrency = 3
timeout_secs = 5

[remote]
provider = "filesystem"
root = "{root}/remote"

[db]
path = "{root}/state/chunks.sqlite"

[chunking]
max_tokens = 20
overlap_tokens = 4
boundary_tolerance_tokens = 5

[retrieval]
default_top_k = 4
max_top_k = 10

[generation]
provider = "extractive"
timeout_secs = 5
{extra}
"#,
        root = root.display(),
        extra = extra
    );
    parse_config(&toml).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config("")
    }

    pub fn with_config(extra: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path(), extra);
        Self {
            tmp,
            config,
            remote: FakeRemote::new(),
            store: Arc::new(InMemoryStore::new()),
            embedder: Arc::new(KeywordEmbedder::default()),
            generator: Arc::new(EchoGenerator::default()),
        }
    }

    pub fn remote_storage(&self) -> Option<Arc<dyn RemoteStorage>> {
        Some(self.remote.clone() as Arc<dyn RemoteStorage>)
    }

    pub fn app(&self) -> App {
        App::from_parts(
            &self.config,
            self.remote_storage(),
            self.store.clone() as Arc<dyn ChunkStore>,
            self.embedder.clone(),
            self.generator.clone(),
        )
        .unwrap()
    }

    pub fn local_root(&self) -> PathBuf {
        self.config.sync.local_root.clone()
    }

    pub fn local_file(&self, path: &str) -> PathBuf {
        self.local_root().join(path)
    }
}
