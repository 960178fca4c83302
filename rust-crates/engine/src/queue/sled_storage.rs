// Sled-backed persistence for spin requests.
use crate::queue::{
    SpinId,
    SpinRequest,
    storage::{
        SpinStorage,
        StorageResult,
    },
};
use anyhow::Context;
use sled::{
    Config,
    Db,
    Tree,
};
use std::path::Path;

const SPIN_TREE: &str = "spin_requests";

#[derive(Clone)]
pub struct SledSpinStorage {
    tree: Tree,
}

impl SledSpinStorage {
    pub fn new(db: &Db) -> StorageResult<Self> {
        let tree = db
            .open_tree(SPIN_TREE)
            .context("open spin_requests tree")?;
        Ok(Self { tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = Config::default()
            .path(path)
            .open()
            .context("open sled database")?;
        Self::new(&db)
    }

    fn key(id: SpinId) -> [u8; 8] {
        id.0.to_be_bytes()
    }
}

impl SpinStorage for SledSpinStorage {
    fn load_all(&self) -> StorageResult<Vec<SpinRequest>> {
        let mut requests = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = entry.context("iterate spin requests")?;
            let request: SpinRequest = serde_json::from_slice(&value)
                .with_context(|| format!("deserialize spin request at key {key:?}"))?;
            requests.push(request);
        }
        Ok(requests)
    }

    fn upsert(&mut self, request: &SpinRequest) -> StorageResult<()> {
        let bytes = serde_json::to_vec(request).context("serialize spin request")?;
        self.tree
            .insert(Self::key(request.id), bytes)
            .context("insert spin request")?;
        self.tree.flush().context("flush spin requests")?;
        Ok(())
    }

    fn remove(&mut self, id: SpinId) -> StorageResult<()> {
        self.tree
            .remove(Self::key(id))
            .context("remove spin request")?;
        self.tree.flush().context("flush spin requests")?;
        Ok(())
    }
}
