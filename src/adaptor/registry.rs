use super::{SunoAdaptor, TaskAdaptor};
use crate::task::TaskPlatform;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Adaptors keyed by platform, built once at startup.
#[derive(Clone, Default)]
pub struct AdaptorRegistry {
    adaptors: HashMap<TaskPlatform, Arc<dyn TaskAdaptor>>,
}

impl AdaptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adaptor, each bounded by `fetch_timeout`.
    pub fn with_builtin(fetch_timeout: Duration) -> Self {
        Self::new().register(Arc::new(SunoAdaptor::new(fetch_timeout)))
    }

    /// Adds `adaptor`, replacing any previous one for its platform.
    pub fn register(mut self, adaptor: Arc<dyn TaskAdaptor>) -> Self {
        self.adaptors.insert(adaptor.platform(), adaptor);
        self
    }

    pub fn resolve(&self, platform: &TaskPlatform) -> Option<Arc<dyn TaskAdaptor>> {
        self.adaptors.get(platform).cloned()
    }

    pub fn platforms(&self) -> Vec<TaskPlatform> {
        let mut platforms: Vec<TaskPlatform> = self.adaptors.keys().cloned().collect();
        platforms.sort();
        platforms
    }

    pub fn len(&self) -> usize {
        self.adaptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adaptors.is_empty()
    }
}
