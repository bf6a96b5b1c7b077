//! Wiring: builds the long-lived services from a [`Config`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use deedbox_core::embedding::Embedder;
use deedbox_core::generate::AnswerGenerator;
use deedbox_core::remote::RemoteStorage;
use deedbox_core::store::ChunkStore;
use deedbox_core::Error;

use crate::config::{Config, RemoteConfig};
use crate::embedding::{create_embedder, DisabledEmbedder};
use crate::generation::{create_generator, ExtractiveGenerator};
use crate::index::EmbeddingIndex;
use crate::job::{run_sync_job, SyncReport};
use crate::remote_dropbox::DropboxRemote;
use crate::remote_fs::FilesystemRemote;
use crate::retrieval::{RetrievalService, RetrievalSettings};
use crate::sqlite_store::SqliteStore;
use crate::sync::{SyncReconciler, SyncSettings};

/// What a process is about to do; decides which providers get built.
///
/// Providers read their credentials at construction, so a command only
/// builds the ones it will call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// `sync`: the remote, plus the embedder when `index_after_sync` is set.
    Sync,
    /// `index`: the embedder.
    Index,
    /// `search`: the embedder and the generator.
    Search,
    /// `indexed`: only the chunk store.
    Inspect,
    /// `serve`: embedder and generator; the remote only when a periodic
    /// sync is configured.
    Serve,
}

impl Role {
    fn needs_remote(self, config: &Config) -> bool {
        match self {
            Role::Sync => true,
            Role::Serve => config.sync.interval_secs.is_some(),
            _ => false,
        }
    }

    fn needs_embedder(self, config: &Config) -> bool {
        match self {
            Role::Sync => config.sync.index_after_sync,
            Role::Index | Role::Search | Role::Serve => true,
            Role::Inspect => false,
        }
    }

    fn needs_generator(self) -> bool {
        matches!(self, Role::Search | Role::Serve)
    }
}

/// Everything a command or the server needs, sharing one index.
pub struct App {
    pub config: Config,
    pub retrieval: Arc<RetrievalService>,
    reconciler: Option<Arc<SyncReconciler>>,
}

impl App {
    /// Open the chunk database and construct the providers `role` uses.
    ///
    /// Providers the role never calls are replaced by credential-free
    /// stand-ins ([`DisabledEmbedder`], [`ExtractiveGenerator`]).
    pub async fn from_config(config: &Config, role: Role) -> Result<Self> {
        let remote = if role.needs_remote(config) {
            Some(create_remote(&config.remote)?)
        } else {
            None
        };
        let embedder: Arc<dyn Embedder> = if role.needs_embedder(config) {
            create_embedder(&config.embedding)?
        } else {
            Arc::new(DisabledEmbedder)
        };
        let generator: Arc<dyn AnswerGenerator> = if role.needs_generator() {
            create_generator(&config.generation)?
        } else {
            Arc::new(ExtractiveGenerator::default())
        };
        let store = SqliteStore::open(&config.db.path).await?;
        Self::from_parts(config, remote, Arc::new(store), embedder, generator)
    }

    /// Assemble from explicit capabilities. Without a remote the app can
    /// index and search but not sync.
    pub fn from_parts(
        config: &Config,
        remote: Option<Arc<dyn RemoteStorage>>,
        store: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Result<Self> {
        let index = Arc::new(EmbeddingIndex::new(
            store,
            embedder,
            Duration::from_secs(config.embedding.timeout_secs),
            config.embedding.batch_size,
        ));
        let settings = RetrievalSettings {
            local_root: config.sync.local_root.clone(),
            chunking: config.chunking.to_chunk_config(),
            default_top_k: config.retrieval.default_top_k,
            max_top_k: config.retrieval.max_top_k,
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        };
        let retrieval = RetrievalService::new(Arc::clone(&index), generator, settings)?;
        let reconciler = match remote {
            Some(remote) => Some(Arc::new(
                SyncReconciler::new(remote, SyncSettings::from_config(config))?.with_index(index),
            )),
            None => None,
        };
        Ok(Self {
            config: config.clone(),
            retrieval: Arc::new(retrieval),
            reconciler,
        })
    }

    /// The sync executor; [`Error::Config`] when no remote was built.
    pub fn reconciler(&self) -> deedbox_core::Result<&Arc<SyncReconciler>> {
        self.reconciler
            .as_ref()
            .ok_or_else(|| Error::Config("no remote storage configured for this process".into()))
    }

    /// One sync job, indexing afterwards when `sync.index_after_sync` is set.
    pub async fn sync(&self) -> deedbox_core::Result<SyncReport> {
        let reconciler = self.reconciler()?;
        let retrieval = self
            .config
            .sync
            .index_after_sync
            .then_some(self.retrieval.as_ref());
        run_sync_job(reconciler, retrieval).await
    }
}

/// Build the configured remote backend.
pub fn create_remote(config: &RemoteConfig) -> Result<Arc<dyn RemoteStorage>> {
    match config.provider.as_str() {
        "dropbox" => Ok(Arc::new(
            DropboxRemote::from_config(config).context("failed to set up Dropbox remote")?,
        )),
        "filesystem" => Ok(Arc::new(FilesystemRemote::new(&config.root))),
        other => bail!("Unknown remote provider: {}", other),
    }
}
