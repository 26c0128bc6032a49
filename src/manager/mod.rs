//! State managers that pool state objects and track field-level changes.
//!
//! The [`OptimizedStateManager`] keeps one live object per logical state id,
//! applies updates in place, and records a bounded history of what changed.

mod history;
mod optimized;

pub use history::{ChangeHistory, StateUpdate, UpdateKind};
pub use optimized::{ManagerStats, MemoryStats, OptimizedStateManager};
