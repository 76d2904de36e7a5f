use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::types::{NodeStatus, Roadmap, RoadmapNode, Session, StorageData};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Roadmap already exists for user: {0}")]
    DuplicateRoadmap(String),
    #[error("Roadmap not found for user: {0}")]
    RoadmapNotFound(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Background task failed: {0}")]
    Task(String),
}

/// A single-document mutation applied under the store's write lock.
#[derive(Clone, Debug)]
pub enum RoadmapEdit {
    /// Swap interest and the whole node list; statuses are taken as given.
    Replace {
        interest: String,
        nodes: Vec<RoadmapNode>,
    },
    SetNodeStatus { node_id: String, status: NodeStatus },
}

impl RoadmapEdit {
    fn apply(self, roadmap: &mut Roadmap) -> Result<(), StorageError> {
        match self {
            RoadmapEdit::Replace { interest, nodes } => {
                roadmap.interest = interest;
                roadmap.nodes = nodes;
            }
            RoadmapEdit::SetNodeStatus { node_id, status } => {
                let node = roadmap
                    .nodes
                    .iter_mut()
                    .find(|n| n.id == node_id)
                    .ok_or(StorageError::NodeNotFound(node_id))?;
                node.status = status;
            }
        }
        Ok(())
    }
}

/// Persistence seam for roadmaps and sessions.
///
/// Implementations enforce one roadmap per user on insert and apply each
/// [`RoadmapEdit`] atomically, so concurrent edits to different nodes of the
/// same roadmap never overwrite each other.
#[async_trait]
pub trait RoadmapStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn find_roadmap(&self, user: &str) -> Result<Option<Roadmap>, StorageError>;

    async fn insert_roadmap(&self, roadmap: Roadmap) -> Result<Roadmap, StorageError>;

    async fn update_roadmap(&self, user: &str, edit: RoadmapEdit)
    -> Result<Roadmap, StorageError>;

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StorageError>;

    async fn insert_session(&self, session: Session) -> Result<Session, StorageError>;

    async fn remove_session(&self, token: &str) -> Result<bool, StorageError>;

    /// Drop sessions created before `cutoff`; returns how many went.
    async fn prune_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
}

impl StorageData {
    fn insert_roadmap(&mut self, mut roadmap: Roadmap) -> Result<Roadmap, StorageError> {
        if self.roadmaps.contains_key(&roadmap.user) {
            return Err(StorageError::DuplicateRoadmap(roadmap.user));
        }
        roadmap.updated_at = Utc::now();
        self.roadmaps.insert(roadmap.user.clone(), roadmap.clone());
        Ok(roadmap)
    }

    fn update_roadmap(&mut self, user: &str, edit: RoadmapEdit) -> Result<Roadmap, StorageError> {
        let roadmap = self
            .roadmaps
            .get_mut(user)
            .ok_or_else(|| StorageError::RoadmapNotFound(user.to_string()))?;
        edit.apply(roadmap)?;
        roadmap.updated_at = Utc::now();
        Ok(roadmap.clone())
    }

    fn insert_session(&mut self, session: Session) -> Session {
        self.sessions.insert(session.token.clone(), session.clone());
        session
    }

    fn prune_sessions(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.created_at >= cutoff);
        before - self.sessions.len()
    }
}

/// Roadmaps and sessions kept in one JSON document on disk.
///
/// The file is the source of truth: other processes (the `session` and
/// `import` commands) write it while a server runs. Every lookup and every
/// write re-reads it under the lock, so a write never clobbers records it has
/// not seen. Changes are flushed through a temporary file and an atomic rename
/// and only then committed in memory; a failed flush leaves both untouched.
///
/// The lock is per process. Two processes writing in the same instant can
/// still race between read and rename.
pub struct JsonFileStore {
    storage_path: PathBuf,
    data: Mutex<StorageData>,
}

impl JsonFileStore {
    pub const FILE_NAME: &'static str = "roadmaps.json";

    /// Open (or create) the store file inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir)?;
        let storage_path = data_dir.join(Self::FILE_NAME);

        let data = if storage_path.exists() {
            read_snapshot(&storage_path)?
        } else {
            let data = StorageData::default();
            write_snapshot(&storage_path, &data)?;
            data
        };

        tracing::info!(
            path = %storage_path.display(),
            roadmaps = data.roadmaps.len(),
            sessions = data.sessions.len(),
            "Opened roadmap store"
        );
        Ok(Self {
            storage_path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.storage_path
    }

    async fn save_snapshot_async(
        storage_path: PathBuf,
        data: StorageData,
    ) -> Result<(), StorageError> {
        tokio::task::spawn_blocking(move || write_snapshot(&storage_path, &data))
            .await
            .map_err(|e| StorageError::Task(format!("spawn_blocking failed: {e}")))?
    }

    async fn load_snapshot_async(storage_path: PathBuf) -> Result<StorageData, StorageError> {
        tokio::task::spawn_blocking(move || {
            if storage_path.exists() {
                read_snapshot(&storage_path)
            } else {
                Ok(StorageData::default())
            }
        })
        .await
        .map_err(|e| StorageError::Task(format!("spawn_blocking failed: {e}")))?
    }

    /// Refresh from disk and run a read-only lookup.
    async fn read_through<T>(
        &self,
        lookup: impl FnOnce(&StorageData) -> T,
    ) -> Result<T, StorageError> {
        let mut guard = self.data.lock().await;
        *guard = Self::load_snapshot_async(self.storage_path.clone()).await?;
        Ok(lookup(&guard))
    }

    /// Apply `change` to the current file contents, persist, then commit.
    async fn write_through<T>(
        &self,
        change: impl FnOnce(&mut StorageData) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut guard = self.data.lock().await;
        let mut staged = Self::load_snapshot_async(self.storage_path.clone()).await?;
        let out = change(&mut staged)?;
        Self::save_snapshot_async(self.storage_path.clone(), staged.clone()).await?;
        *guard = staged;
        Ok(out)
    }
}

fn read_snapshot(storage_path: &Path) -> Result<StorageData, StorageError> {
    let mut file = File::open(storage_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(serde_json::from_str(&contents)?)
}

fn write_snapshot(storage_path: &Path, data: &StorageData) -> Result<(), StorageError> {
    if let Some(parent) = storage_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // per-process temp name; the CLI and a server may flush concurrently
    let temp = storage_path.with_extension(format!("tmp-{}", std::process::id()));
    let mut f = File::create(&temp)?;
    let content = serde_json::to_string_pretty(data)?;
    f.write_all(content.as_bytes())?;
    f.sync_all()?;
    fs::rename(temp, storage_path)?;
    Ok(())
}

#[async_trait]
impl RoadmapStore for JsonFileStore {
    fn backend_name(&self) -> &'static str {
        "json-file"
    }

    async fn find_roadmap(&self, user: &str) -> Result<Option<Roadmap>, StorageError> {
        self.read_through(|data| data.roadmaps.get(user).cloned())
            .await
    }

    async fn insert_roadmap(&self, roadmap: Roadmap) -> Result<Roadmap, StorageError> {
        self.write_through(|data| data.insert_roadmap(roadmap)).await
    }

    async fn update_roadmap(
        &self,
        user: &str,
        edit: RoadmapEdit,
    ) -> Result<Roadmap, StorageError> {
        self.write_through(|data| data.update_roadmap(user, edit))
            .await
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StorageError> {
        self.read_through(|data| data.sessions.get(token).cloned())
            .await
    }

    async fn insert_session(&self, session: Session) -> Result<Session, StorageError> {
        self.write_through(|data| Ok(data.insert_session(session)))
            .await
    }

    async fn remove_session(&self, token: &str) -> Result<bool, StorageError> {
        self.write_through(|data| Ok(data.sessions.remove(token).is_some()))
            .await
    }

    async fn prune_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.write_through(|data| Ok(data.prune_sessions(cutoff)))
            .await
    }
}

/// Process-local store; contents are lost on exit.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StorageData>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoadmapStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn find_roadmap(&self, user: &str) -> Result<Option<Roadmap>, StorageError> {
        Ok(self.data.lock().await.roadmaps.get(user).cloned())
    }

    async fn insert_roadmap(&self, roadmap: Roadmap) -> Result<Roadmap, StorageError> {
        self.data.lock().await.insert_roadmap(roadmap)
    }

    async fn update_roadmap(
        &self,
        user: &str,
        edit: RoadmapEdit,
    ) -> Result<Roadmap, StorageError> {
        self.data.lock().await.update_roadmap(user, edit)
    }

    async fn find_session(&self, token: &str) -> Result<Option<Session>, StorageError> {
        Ok(self.data.lock().await.sessions.get(token).cloned())
    }

    async fn insert_session(&self, session: Session) -> Result<Session, StorageError> {
        Ok(self.data.lock().await.insert_session(session))
    }

    async fn remove_session(&self, token: &str) -> Result<bool, StorageError> {
        Ok(self.data.lock().await.sessions.remove(token).is_some())
    }

    async fn prune_sessions(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        Ok(self.data.lock().await.prune_sessions(cutoff))
    }
}
