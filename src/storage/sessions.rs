use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::StorageError;
use crate::interpolate::SpatialModel;
use crate::scanner::{ScanSession, ScanState};

#[derive(Debug, Clone, Serialize)]
pub struct SessionEntry {
    pub id: String,
    pub state: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub samples: usize,
    pub absent: usize,
}

impl SessionEntry {
    fn from_session(session: &ScanSession) -> Self {
        SessionEntry {
            id: session.session_id.clone(),
            state: session.state.label().to_string(),
            started_at: session.started_at,
            finished_at: session.finished_at,
            samples: session.samples.len(),
            absent: session.absent_count(),
        }
    }
}

/// Scan sessions as YAML and fitted models as bincode under one base folder.
pub struct SessionStore {
    base: PathBuf,
}

impl SessionStore {
    pub fn new(base: PathBuf) -> Self {
        SessionStore { base }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn sessions_path(&self) -> PathBuf {
        self.base.join("sessions")
    }

    fn session_path(&self, id: &str) -> PathBuf {
        self.sessions_path().join(format!("{}.yaml", id))
    }

    fn model_path(&self, id: &str) -> PathBuf {
        self.base.join("models").join(format!("{}.bin", id))
    }

    pub fn save_session(&self, session: &ScanSession) -> Result<PathBuf, StorageError> {
        std::fs::create_dir_all(self.sessions_path())?;
        let path = self.session_path(&session.session_id);
        std::fs::write(&path, serde_yaml::to_string(session)?)?;
        info!(
            "Saved session {} ({} samples) to {}",
            session.session_id,
            session.samples.len(),
            path.display()
        );
        Ok(path)
    }

    pub fn load_session(&self, id: &str) -> Result<ScanSession, StorageError> {
        let path = self.session_path(id);
        if !path.exists() {
            return Err(StorageError::NotFound(id.to_string()));
        }
        Self::load_session_file(&path)
    }

    pub fn load_session_file(path: &Path) -> Result<ScanSession, StorageError> {
        let content = std::fs::read_to_string(path)?;
        let session: ScanSession = serde_yaml::from_str(&content)?;
        if matches!(session.state, ScanState::Running { .. }) {
            warn!(
                "Session {} was saved while still running",
                session.session_id
            );
        }
        Ok(session)
    }

    /// Sorted by start time; unreadable files are logged and skipped.
    pub fn list_sessions(&self) -> Result<Vec<SessionEntry>, StorageError> {
        let path = self.sessions_path();
        if !path.exists() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for entry in path.read_dir()? {
            let entry_path = entry?.path();
            if !entry_path.is_file() {
                continue;
            }
            match Self::load_session_file(&entry_path) {
                Ok(session) => entries.push(SessionEntry::from_session(&session)),
                Err(e) => error!("Failed to load session {}: {}", entry_path.display(), e),
            }
        }

        entries.sort_by_key(|e| e.started_at);
        Ok(entries)
    }

    /// Keyed by the source session id.
    pub fn save_model(&self, model: &SpatialModel) -> Result<PathBuf, StorageError> {
        let path = self.model_path(&model.session_id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bincode::serialize(model)?)?;
        info!("Saved model for {} to {}", model.session_id, path.display());
        Ok(path)
    }

    pub fn load_model(&self, session_id: &str) -> Result<SpatialModel, StorageError> {
        let path = self.model_path(session_id);
        if !path.exists() {
            return Err(StorageError::NotFound(session_id.to_string()));
        }
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}
