use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::BridgeError;
use crate::spec::component::{ComponentConfig, ComponentSpec};

/// Registered component specs, keyed by tag.
#[derive(Default)]
pub struct SpecRegistry {
    specs: Mutex<HashMap<String, Arc<ComponentSpec>>>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `config` and register it. Tags are unique.
    pub fn register(&self, config: ComponentConfig) -> Result<Arc<ComponentSpec>, BridgeError> {
        let spec = Arc::new(ComponentSpec::from_config(config)?);
        let mut specs = self.specs.lock();
        if specs.contains_key(&spec.tag) {
            return Err(BridgeError::spec(&spec.tag, "tag is already registered"));
        }
        specs.insert(spec.tag.clone(), spec.clone());
        debug!(tag = %spec.tag, domain = %spec.domain, "component registered");
        Ok(spec)
    }

    pub fn get(&self, tag: &str) -> Option<Arc<ComponentSpec>> {
        self.specs.lock().get(tag).cloned()
    }

    /// Forget a tag. Live instances keep their `Arc` to the spec.
    pub fn unregister(&self, tag: &str) -> bool {
        self.specs.lock().remove(tag).is_some()
    }

    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.specs.lock().keys().cloned().collect();
        tags.sort();
        tags
    }
}
