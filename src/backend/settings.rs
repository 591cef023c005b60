use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::{watch, Mutex};

use crate::common::error::ChatResult;

/// Set once the user has signed in on this device.
pub const HAS_LOGGED_IN: &str = "has_logged_in";

/// Small persistent flag store with change notification.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Current value (false when unset) followed by every change.
    async fn watch_flag(&self, key: &str) -> ChatResult<watch::Receiver<bool>>;
    async fn set_flag(&self, key: &str, value: bool) -> ChatResult<()>;
    async fn clear_all(&self) -> ChatResult<()>;
}

struct SettingsState {
    flags: HashMap<String, bool>,
    watchers: HashMap<String, watch::Sender<bool>>,
}

/// Flags persisted as a JSON object in one file.
#[derive(Clone)]
pub struct FileSettingsStore {
    path: Option<PathBuf>,
    state: Arc<Mutex<SettingsState>>,
}

impl FileSettingsStore {
    /// Open (or start) the settings file at `path`. A corrupt file is ignored.
    pub async fn open(path: impl AsRef<Path>) -> ChatResult<Self> {
        let path = path.as_ref().to_path_buf();
        let flags = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("Ignoring unreadable settings file {}: {}", path.display(), e);
                HashMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self::with_flags(Some(path), flags))
    }

    /// Settings that live only as long as the process.
    pub fn in_memory() -> Self {
        Self::with_flags(None, HashMap::new())
    }

    fn with_flags(path: Option<PathBuf>, flags: HashMap<String, bool>) -> Self {
        Self {
            path,
            state: Arc::new(Mutex::new(SettingsState { flags, watchers: HashMap::new() })),
        }
    }

    async fn persist(&self, flags: &HashMap<String, bool>) -> ChatResult<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serde_json::to_vec_pretty(flags)?).await?;
        debug!("Settings saved to {}", path.display());
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for FileSettingsStore {
    async fn watch_flag(&self, key: &str) -> ChatResult<watch::Receiver<bool>> {
        let mut state = self.state.lock().await;
        let current = state.flags.get(key).copied().unwrap_or(false);
        let sender = state
            .watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(current).0);
        Ok(sender.subscribe())
    }

    async fn set_flag(&self, key: &str, value: bool) -> ChatResult<()> {
        let mut state = self.state.lock().await;
        state.flags.insert(key.to_string(), value);
        self.persist(&state.flags).await?;
        if let Some(sender) = state.watchers.get(key) {
            sender.send_replace(value);
        }
        Ok(())
    }

    async fn clear_all(&self) -> ChatResult<()> {
        let mut state = self.state.lock().await;
        state.flags.clear();
        self.persist(&state.flags).await?;
        for sender in state.watchers.values() {
            sender.send_replace(false);
        }
        Ok(())
    }
}
