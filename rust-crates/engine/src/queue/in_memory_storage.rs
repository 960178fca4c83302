use crate::queue::{
    SpinId,
    SpinRequest,
    storage::{
        SpinStorage,
        StorageResult,
    },
};
use anyhow::anyhow;
use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        Mutex,
    },
};

#[derive(Clone, Default)]
pub struct InMemorySpinStorage {
    records: Arc<Mutex<BTreeMap<SpinId, SpinRequest>>>,
}

impl InMemorySpinStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_with_requests(requests: impl IntoIterator<Item = SpinRequest>) -> Self {
        let records = requests.into_iter().map(|r| (r.id, r)).collect();
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub fn records(&self) -> Arc<Mutex<BTreeMap<SpinId, SpinRequest>>> {
        self.records.clone()
    }
}

impl SpinStorage for InMemorySpinStorage {
    fn load_all(&self) -> StorageResult<Vec<SpinRequest>> {
        let guard = self
            .records
            .lock()
            .map_err(|_| anyhow!("in-memory spin storage poisoned"))?;
        Ok(guard.values().cloned().collect())
    }

    fn upsert(&mut self, request: &SpinRequest) -> StorageResult<()> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| anyhow!("in-memory spin storage poisoned"))?;
        guard.insert(request.id, request.clone());
        Ok(())
    }

    fn remove(&mut self, id: SpinId) -> StorageResult<()> {
        let mut guard = self
            .records
            .lock()
            .map_err(|_| anyhow!("in-memory spin storage poisoned"))?;
        guard.remove(&id);
        Ok(())
    }
}
