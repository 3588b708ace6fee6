use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ClientError;

/// Device-local "already voted here" memory, one `voted_{poll_id}` key per
/// poll. Best effort only: the server's voter set is the authority, this
/// lets a device that voted recognise itself without a signed-in session.
#[derive(Clone)]
pub struct VotedMarkers {
    inner: Arc<Mutex<MarkersInner>>,
}

struct MarkersInner {
    /// `None` keeps markers in memory only.
    path: Option<PathBuf>,
    entries: BTreeMap<String, bool>,
}

fn marker_key(poll_id: Uuid) -> String {
    format!("voted_{}", poll_id)
}

impl VotedMarkers {
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MarkersInner {
                path: None,
                entries: BTreeMap::new(),
            })),
        }
    }

    /// Load markers from a JSON file. A missing file starts empty; so does an
    /// unreadable one, which is overwritten on the next `mark_voted`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref().to_path_buf();

        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring corrupt voted markers in {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        debug!("Loaded voted markers from {}", path.display());
        Ok(Self {
            inner: Arc::new(Mutex::new(MarkersInner {
                path: Some(path),
                entries,
            })),
        })
    }

    pub fn has_voted(&self, poll_id: Uuid) -> bool {
        match self.inner.lock() {
            Ok(inner) => inner.entries.get(&marker_key(poll_id)).copied().unwrap_or(false),
            Err(e) => {
                warn!("Voted markers lock poisoned: {}", e);
                false
            }
        }
    }

    /// Remember a vote and persist it. The in-memory marker is kept even if
    /// writing the file fails.
    pub fn mark_voted(&self, poll_id: Uuid) -> Result<(), ClientError> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| ClientError::Io(std::io::Error::other(e.to_string())))?;
        inner.entries.insert(marker_key(poll_id), true);

        let Some(path) = inner.path.clone() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&path, serde_json::to_vec_pretty(&inner.entries)?)?;
        Ok(())
    }
}
