use crate::queue::{
    SpinId,
    SpinRequest,
};

pub type StorageResult<T> = anyhow::Result<T>;

/// Write-through persistence for the spin queue.
pub trait SpinStorage {
    /// every stored request, in any order
    fn load_all(&self) -> StorageResult<Vec<SpinRequest>>;

    /// write or overwrite the request with the same id
    fn upsert(&mut self, request: &SpinRequest) -> StorageResult<()>;

    /// delete a request; deleting an unknown id is not an error
    fn remove(&mut self, id: SpinId) -> StorageResult<()>;
}
