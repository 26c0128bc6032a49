//! Owner of one serializer and the managers built on it.

use crate::config::SyncConfig;
use crate::conflict::EnhancedStateManager;
use crate::error::Result;
use crate::manager::OptimizedStateManager;
use crate::serializer::StateSerializer;
use std::sync::Arc;
use tracing::debug;

/// One serializer and the managers that share it.
///
/// A long-lived service constructs this once and hands out the pieces.
pub struct SyncRegistry {
    config: SyncConfig,
    serializer: Arc<StateSerializer>,
    manager: Arc<OptimizedStateManager>,
    enhanced: EnhancedStateManager,
}

impl SyncRegistry {
    /// Validate `config` and wire up the components.
    pub fn new(config: SyncConfig) -> Result<Self> {
        config.validate()?;

        let serializer = Arc::new(StateSerializer::new(config.serializer.clone()));
        let manager = Arc::new(OptimizedStateManager::new(
            config.manager.clone(),
            Arc::clone(&serializer),
        ));
        let enhanced = EnhancedStateManager::new(config.enhanced.clone(), Arc::clone(&manager));

        debug!(
            max_cache_size = config.serializer.max_cache_size,
            max_pool_size = config.manager.max_pool_size,
            strategy = %config.enhanced.strategy,
            "initialized sync registry"
        );

        Ok(Self {
            config,
            serializer,
            manager,
            enhanced,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn serializer(&self) -> &Arc<StateSerializer> {
        &self.serializer
    }

    pub fn manager(&self) -> &Arc<OptimizedStateManager> {
        &self.manager
    }

    pub fn enhanced(&self) -> &EnhancedStateManager {
        &self.enhanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::error::SyncError;
    use crate::types::{state_from_json, WireFormat};
    use serde_json::json;

    #[test]
    fn test_components_share_serializer() {
        let registry = SyncRegistry::new(SyncConfig::default()).unwrap();
        assert!(Arc::ptr_eq(
            registry.serializer(),
            registry.manager().serializer()
        ));
        assert!(Arc::ptr_eq(registry.manager(), registry.enhanced().manager()));

        let state = state_from_json(json!({"a": 1}));
        registry
            .serializer()
            .serialize(&state, WireFormat::Json, true, false)
            .unwrap();
        assert!(registry.manager().serializer().is_cached(&state));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SyncConfig {
            manager: ManagerConfig {
                max_pool_size: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            SyncRegistry::new(config),
            Err(SyncError::InvalidConfig(_))
        ));
    }
}
