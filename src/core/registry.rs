//! Job registry: the active download items of one session

use crate::core::item::DownloadItem;
use crate::error::{DataReelError, Result};
use crate::types::JobId;
use std::collections::HashMap;

/// Unordered collection of items keyed by [`JobId`].
///
/// Owned by the engine and only touched from its loop, so it needs no locking.
#[derive(Debug, Default)]
pub struct JobRegistry {
    items: HashMap<JobId, DownloadItem>,
    next_id: u64,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next unused id.
    pub fn allocate_id(&mut self) -> JobId {
        self.next_id += 1;
        JobId(self.next_id)
    }

    /// Register an item under its own id.
    pub fn register(&mut self, item: DownloadItem) -> JobId {
        let id = item.id();
        self.next_id = self.next_id.max(id.0);
        self.items.insert(id, item);
        id
    }

    /// Deregister an item and hand it back. Refused while its process is
    /// still attached; cancel it and let the exit be reaped first.
    pub fn remove(&mut self, id: JobId) -> Result<DownloadItem> {
        let item = self.items.get(&id).ok_or(DataReelError::UnknownJob(id))?;
        if item.has_process() {
            return Err(DataReelError::StillRunning);
        }
        self.items.remove(&id).ok_or(DataReelError::UnknownJob(id))
    }

    pub fn get(&self, id: JobId) -> Result<&DownloadItem> {
        self.items.get(&id).ok_or(DataReelError::UnknownJob(id))
    }

    pub fn get_mut(&mut self, id: JobId) -> Result<&mut DownloadItem> {
        self.items.get_mut(&id).ok_or(DataReelError::UnknownJob(id))
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.items.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DownloadItem> {
        self.items.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DownloadItem> {
        self.items.values_mut()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items with a process attached
    pub fn running_count(&self) -> usize {
        self.items.values().filter(|i| i.has_process()).count()
    }

    /// Remove every finished item without a process, returning how many went.
    pub fn clear_finished(&mut self) -> usize {
        let before = self.items.len();
        self.items
            .retain(|_, item| !(item.status().is_terminal() && !item.has_process()));
        before - self.items.len()
    }
}
