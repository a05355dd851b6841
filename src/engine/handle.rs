use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{anyhow, Result};
use tracing::info;

use super::Engine;

/// Lazily initialized, shared engine handle. The first caller loads the
/// corpus under a lock; concurrent first callers wait on that lock and then
/// observe the finished engine instead of loading again. A failed load leaves
/// the cell empty so a later call can retry.
#[derive(Debug, Default)]
pub struct EngineCell {
    slot: OnceLock<Arc<Engine>>,
    init: Mutex<()>,
    loads: AtomicUsize,
}

impl EngineCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init<F>(&self, load: F) -> Result<Arc<Engine>>
    where
        F: FnOnce() -> Result<Engine>,
    {
        if let Some(engine) = self.slot.get() {
            return Ok(Arc::clone(engine));
        }

        let _guard = self
            .init
            .lock()
            .map_err(|_| anyhow!("engine initialization lock is poisoned"))?;
        if let Some(engine) = self.slot.get() {
            return Ok(Arc::clone(engine));
        }

        let attempt = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let engine = Arc::new(load()?);
        info!(
            units = engine.unit_count(),
            attempt,
            "engine initialized"
        );

        // Only the lock holder ever sets the slot.
        let _ = self.slot.set(Arc::clone(&engine));
        Ok(engine)
    }

    /// Number of load attempts started.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}
