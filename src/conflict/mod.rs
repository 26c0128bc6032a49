//! Conflict detection and resolution between divergent state snapshots.

mod enhanced;
mod strategy;

pub use enhanced::{
    Conflict, ConflictType, EnhancedStateManager, FieldDifference, ResolutionContext,
    StateVersion,
};
pub use strategy::{ConflictResolver, ResolutionStrategy};
