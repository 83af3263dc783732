//! In-flight upload table.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::task::UploadTask;

/// Table of in-flight uploads, keyed by media id.
///
/// Constructed once at session start and injected into every task.
/// Handles are cheap clones sharing one table. A task is inserted
/// before it starts and removed by its own termination handling, so a
/// lookup-then-kill race never cancels a stale task silently: worst
/// case the kill is a harmless no-op on a terminated task.
#[derive(Clone, Default)]
pub struct UploadRegistry {
    tasks: Arc<RwLock<HashMap<String, Arc<UploadTask>>>>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `task` under its media id, before the task starts.
    /// Overwriting a live entry is allowed (the newer task supersedes)
    /// but unexpected.
    pub fn register(&self, task: Arc<UploadTask>) {
        let media_id = task.media_id().to_string();
        let mut tasks = self.tasks.write().unwrap();
        if tasks.insert(media_id.clone(), task).is_some() {
            warn!(media_id = %media_id, "superseding an upload already registered");
        }
    }

    /// Kills the upload registered under `media_id`. A missing entry
    /// is a no-op: the upload may have already finished.
    pub fn cancel(&self, media_id: &str) {
        let task = self.tasks.read().unwrap().get(media_id).cloned();
        match task {
            Some(task) => {
                warn!(media_id = %media_id, "cancelling upload");
                task.kill(false);
            }
            None => debug!(media_id = %media_id, "cancel for an unknown upload ignored"),
        }
    }

    /// Removes the entry for `media_id` if it still refers to `task`,
    /// so a superseded task's termination never evicts its
    /// replacement. Safe when the entry was already replaced or
    /// removed.
    pub(crate) fn unregister(&self, media_id: &str, task: &Arc<UploadTask>) {
        let mut tasks = self.tasks.write().unwrap();
        match tasks.get(media_id) {
            Some(current) if Arc::ptr_eq(current, task) => {
                tasks.remove(media_id);
                debug!(media_id = %media_id, "upload unregistered");
            }
            Some(_) => debug!(media_id = %media_id, "upload entry already superseded"),
            None => debug!(media_id = %media_id, "upload entry already removed"),
        }
    }

    /// Looks up a live upload.
    pub fn get(&self, media_id: &str) -> Option<Arc<UploadTask>> {
        self.tasks.read().unwrap().get(media_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().unwrap().is_empty()
    }
}
