//! In-process stand-ins for the engine's external edges.
//!
//! [`MemoryStore`] implements all three storage contracts with the same
//! outcome semantics as `PgStore`; [`ScriptedAccrual`] answers like the
//! accrual authority, one scripted reply at a time. Neither needs a
//! database or a network, so scenario tests under `tests/` can drive the
//! real service and the real worker pool end to end.

use std::sync::Arc;

use mart_engine::EngineDeps;

mod accrual;
mod memory;

pub use accrual::{ScriptedAccrual, ScriptedReply};
pub use memory::MemoryStore;

/// Wire a fresh [`MemoryStore`] and [`ScriptedAccrual`] into engine deps.
///
/// The store handle backs all three storage roles, so assertions made
/// through it observe exactly what the engine wrote.
pub fn memory_deps() -> (Arc<MemoryStore>, Arc<ScriptedAccrual>, EngineDeps) {
    let store = Arc::new(MemoryStore::new());
    let accrual = Arc::new(ScriptedAccrual::new());
    let deps = EngineDeps {
        orders: store.clone(),
        ledger: store.clone(),
        queue: store.clone(),
        accrual: accrual.clone(),
    };
    (store, accrual, deps)
}
