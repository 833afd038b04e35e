use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::PoolInner;
use crate::browser::RendererProcess;

/// Exclusive use of one renderer process until released or destroyed.
///
/// Dropping a lease without calling [`RendererPool::release`] or
/// [`RendererPool::destroy`] returns the process to the pool, so a cancelled
/// job can never leak capacity.
///
/// [`RendererPool::release`]: super::RendererPool::release
/// [`RendererPool::destroy`]: super::RendererPool::destroy
pub struct Lease {
    id: u64,
    process: Arc<dyn RendererProcess>,
    pool: Arc<PoolInner>,
    armed: bool,
}

impl Lease {
    pub(super) fn new(id: u64, process: Arc<dyn RendererProcess>, pool: Arc<PoolInner>) -> Self {
        Self {
            id,
            process,
            pool,
            armed: true,
        }
    }

    /// Pool-assigned identifier of the leased process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn process(&self) -> &dyn RendererProcess {
        &*self.process
    }

    /// Settles the lease without returning the process anywhere.
    pub(super) fn disarm(mut self) -> (u64, Arc<dyn RendererProcess>) {
        self.armed = false;
        (self.id, Arc::clone(&self.process))
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("id", &self.id)
            .field("armed", &self.armed)
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.armed {
            debug!(renderer = self.id, "lease dropped without release; returning it");
            self.pool.return_process(self.id, Arc::clone(&self.process));
        }
    }
}
