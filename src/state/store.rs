use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::RecordingState;

/// Storage for the recovery state
#[async_trait::async_trait]
pub trait RecordingStore: Send + Sync {
    /// Current state, `None` when nothing is recording
    async fn get_state(&self) -> Result<Option<RecordingState>>;

    /// Replace the current state
    async fn set_state(&self, state: &RecordingState) -> Result<()>;

    async fn delete_state(&self) -> Result<()>;
}

/// State kept as a JSON file on local disk
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl RecordingStore for FileStateStore {
    async fn get_state(&self) -> Result<Option<RecordingState>> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read state file {}", self.path.display())
                })
            }
        };

        if contents.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let state = serde_json::from_slice(&contents)
            .with_context(|| format!("Invalid state file {}", self.path.display()))?;

        Ok(Some(state))
    }

    async fn set_state(&self, state: &RecordingState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create state directory")?;
            }
        }

        let contents = serde_json::to_vec_pretty(state)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, contents)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!("State saved: {} record(s)", state.records_ids.len());
        Ok(())
    }

    async fn delete_state(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("State cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to delete state file {}", self.path.display())),
        }
    }
}

/// Process-local state, lost on restart
#[derive(Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<RecordingState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: RecordingState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

#[async_trait::async_trait]
impl RecordingStore for MemoryStateStore {
    async fn get_state(&self) -> Result<Option<RecordingState>> {
        Ok(self.state.lock().clone())
    }

    async fn set_state(&self, state: &RecordingState) -> Result<()> {
        *self.state.lock() = Some(state.clone());
        Ok(())
    }

    async fn delete_state(&self) -> Result<()> {
        *self.state.lock() = None;
        Ok(())
    }
}
