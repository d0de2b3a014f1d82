//! The public factory surface: a [`Bridge`] per host page, a [`Component`] per
//! registered spec, an [`Instance`] per embedding.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::BridgeConfig;
use crate::env::Environment;
use crate::error::BridgeError;
use crate::lifecycle::Instance;
use crate::messenger::Messenger;
use crate::props::{self, Props};
use crate::registry::Registry;
use crate::spec::{ComponentConfig, ComponentSpec, SpecRegistry};
use crate::window::WindowHost;

/// Owns everything shared by the components of one host page.
pub struct Bridge {
    env: Arc<dyn Environment>,
    registry: Arc<Registry>,
    messenger: Arc<Messenger>,
    host: WindowHost,
    specs: SpecRegistry,
    config: BridgeConfig,
}

impl Bridge {
    /// Create the bridge and start listening on the host window.
    ///
    /// Must be called from inside a tokio runtime. Components declared in
    /// `config` are registered immediately. Zero timeouts or a zero poll
    /// interval are rejected with [`BridgeError::Config`].
    pub fn new(env: Arc<dyn Environment>, config: BridgeConfig) -> Result<Arc<Self>, BridgeError> {
        config.validate()?;
        let specs = SpecRegistry::new();
        for component in config.components.iter().cloned() {
            specs.register(component)?;
        }

        let registry = Arc::new(Registry::default());
        let messenger = Messenger::new(env.clone(), registry.clone());
        messenger.start();
        debug!(host = ?env.host_window(), components = specs.tags().len(), "bridge started");

        Ok(Arc::new(Self {
            host: WindowHost::new(env.clone()),
            env,
            registry,
            messenger,
            specs,
            config,
        }))
    }

    /// Register a component spec and return its factory.
    pub fn create(self: &Arc<Self>, config: ComponentConfig) -> Result<Component, BridgeError> {
        let spec = self.specs.register(config)?;
        Ok(Component {
            spec,
            bridge: self.clone(),
        })
    }

    /// The factory for an already registered tag.
    pub fn component(self: &Arc<Self>, tag: &str) -> Option<Component> {
        self.specs.get(tag).map(|spec| Component {
            spec,
            bridge: self.clone(),
        })
    }

    pub fn specs(&self) -> &SpecRegistry {
        &self.specs
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn env(&self) -> &Arc<dyn Environment> {
        &self.env
    }

    /// Instances currently bound to a window.
    pub fn bound_instances(&self) -> usize {
        self.registry.binding_count()
    }

    /// Calls still waiting for the child's answer.
    pub fn pending_calls(&self) -> usize {
        self.registry.pending().len()
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn messenger(&self) -> &Messenger {
        &self.messenger
    }

    pub(crate) fn host(&self) -> &WindowHost {
        &self.host
    }
}

/// Factory for instances of one component spec.
#[derive(Clone)]
pub struct Component {
    spec: Arc<ComponentSpec>,
    bridge: Arc<Bridge>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("tag", &self.spec.tag)
            .finish()
    }
}

impl Component {
    pub fn tag(&self) -> &str {
        &self.spec.tag
    }

    pub fn spec(&self) -> &Arc<ComponentSpec> {
        &self.spec
    }

    /// Validate `props` and create an instance. Nothing is opened until
    /// [`Instance::render`].
    pub fn init(&self, props: Props) -> Result<Instance, BridgeError> {
        let serialized = props::serialize(&self.spec, props)?;
        Ok(Instance::new(
            self.spec.clone(),
            self.bridge.clone(),
            serialized,
        ))
    }
}
