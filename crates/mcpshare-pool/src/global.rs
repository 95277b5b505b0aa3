//! Process-wide pool handle
//!
//! Nothing is created implicitly: the composition root calls [`install`]
//! once, consumers call [`get`]. Tests reset the slot with [`reset_for_tests`].

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::pool::ConnectionPool;

static POOL: RwLock<Option<Arc<ConnectionPool>>> = parking_lot::const_rwlock(None);

/// Install the process-wide pool. Hands the pool back if one is already set.
pub fn install(pool: Arc<ConnectionPool>) -> Result<(), Arc<ConnectionPool>> {
    let mut slot = POOL.write();
    if slot.is_some() {
        return Err(pool);
    }
    *slot = Some(pool);
    debug!("Installed process-wide connection pool");
    Ok(())
}

pub fn get() -> Option<Arc<ConnectionPool>> {
    POOL.read().clone()
}

/// Clear the slot, returning whatever was installed
pub fn reset_for_tests() -> Option<Arc<ConnectionPool>> {
    POOL.write().take()
}
