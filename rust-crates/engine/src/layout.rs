use crate::{
    EngineError,
    Result,
    error::LayoutError,
    symbols::ReelStrips,
};
use std::sync::{
    Arc,
    Mutex,
    MutexGuard,
    PoisonError,
};
use tracing::{
    error,
    info,
};

/// Supplies the physical reel strips, one string of symbol codes per reel.
pub trait ReelLayoutSource {
    fn reel_strips(&self) -> impl Future<Output = Result<Vec<String>, LayoutError>> + Send;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutState {
    Unloaded,
    Ready(Arc<ReelStrips>),
    /// Loading failed. Stays this way until [`LayoutCache::retry`] succeeds.
    Unavailable { reason: String },
}

/// Session cache in front of a [`ReelLayoutSource`]. Fails closed: without a successfully
/// loaded layout no strips are handed out.
pub struct LayoutCache<L> {
    source: L,
    state: Mutex<LayoutState>,
}

impl<L> LayoutCache<L>
where
    L: ReelLayoutSource,
{
    pub fn new(source: L) -> Self {
        Self {
            source,
            state: Mutex::new(LayoutState::Unloaded),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LayoutState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> LayoutState {
        self.lock().clone()
    }

    pub fn source(&self) -> &L {
        &self.source
    }

    /// Strips loaded earlier in this session, without touching the source.
    pub fn strips(&self) -> Result<Arc<ReelStrips>> {
        match &*self.lock() {
            LayoutState::Ready(strips) => Ok(strips.clone()),
            LayoutState::Unloaded => Err(EngineError::LayoutUnavailable {
                reason: "reel layout not loaded".to_string(),
            }),
            LayoutState::Unavailable { reason } => Err(EngineError::LayoutUnavailable {
                reason: reason.clone(),
            }),
        }
    }

    /// Fetches the layout on first use. A previous failure is returned as is.
    pub async fn load(&self) -> Result<Arc<ReelStrips>> {
        if !matches!(self.state(), LayoutState::Unloaded) {
            return self.strips();
        }
        self.fetch().await
    }

    /// Fetches again regardless of the cached state.
    pub async fn retry(&self) -> Result<Arc<ReelStrips>> {
        self.fetch().await
    }

    async fn fetch(&self) -> Result<Arc<ReelStrips>> {
        let fetched = self
            .source
            .reel_strips()
            .await
            .and_then(|raw| ReelStrips::from_strings(&raw));
        let mut state = self.lock();
        match fetched {
            Ok(strips) => {
                info!(lengths = ?strips.lengths(), "reel layout loaded");
                let strips = Arc::new(strips);
                *state = LayoutState::Ready(strips.clone());
                Ok(strips)
            }
            Err(err) => {
                error!(%err, "reel layout unavailable, spins disabled");
                let reason = err.to_string();
                *state = LayoutState::Unavailable {
                    reason: reason.clone(),
                };
                Err(EngineError::LayoutUnavailable { reason })
            }
        }
    }
}
