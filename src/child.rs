//! The child window's half of the bridge.
//!
//! A child page learns who it is from its own URL: the parent appends
//! `crossframe_id` (the instance id) and `crossframe_parent` (the parent's
//! origin). [`ChildBridge::connect`] sends the `init` handshake to the parent
//! at exactly that origin and receives the props in reply. From then on the
//! child accepts messages only from its parent window at the parent origin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use crate::env::{Environment, PostedMessage, WindowId};
use crate::envelope::{Envelope, Kind, EVENT_CLOSE, EVENT_INIT, EVENT_RESIZE};
use crate::error::BridgeError;
use crate::props::{function_id, Callback, CallbackResult};
use crate::registry::{PendingGuard, PendingTable};

/// Query parameter carrying the instance id.
pub const INSTANCE_PARAM: &str = "crossframe_id";
/// Query parameter carrying the parent page's origin.
pub const PARENT_PARAM: &str = "crossframe_parent";

/// What a freshly loaded child knows about its embedding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadContext {
    pub instance_id: String,
    pub parent_origin: String,
}

impl LoadContext {
    pub fn from_url(url: &Url) -> Result<Self, BridgeError> {
        let mut instance_id = None;
        let mut parent_origin = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                INSTANCE_PARAM => instance_id = Some(value.into_owned()),
                PARENT_PARAM => parent_origin = Some(value.into_owned()),
                _ => {}
            }
        }
        match (instance_id, parent_origin) {
            (Some(instance_id), Some(parent_origin)) => Ok(Self {
                instance_id,
                parent_origin,
            }),
            _ => Err(BridgeError::Handshake {
                reason: format!("`{url}` carries no load context"),
            }),
        }
    }
}

struct ChildInner {
    env: Arc<dyn Environment>,
    window: WindowId,
    parent: WindowId,
    context: LoadContext,
    pending: PendingTable,
    exports: Mutex<HashMap<String, Value>>,
    methods: Mutex<HashMap<String, Callback>>,
    closed: watch::Sender<bool>,
}

impl ChildInner {
    fn post(&self, envelope: &Envelope) -> Result<(), BridgeError> {
        let data = envelope.encode().map_err(|err| BridgeError::Remote {
            message: err.to_string(),
        })?;
        self.env
            .post_message(self.window, self.parent, data, &self.context.parent_origin);
        Ok(())
    }

    fn reply(&self, envelope: Envelope) {
        if let Err(err) = self.post(&envelope) {
            debug!(error = %err, "could not reply to parent");
        }
    }

    fn dispatch(&self, message: PostedMessage) {
        if message.source != self.parent || message.origin != self.context.parent_origin {
            debug!(source = ?message.source, origin = %message.origin, "child discarding foreign message");
            return;
        }
        let Ok(envelope) = Envelope::decode(&message.data) else {
            return;
        };
        let instance = self.context.instance_id.as_str();
        if envelope.instance_id != instance {
            debug!(expected = %instance, got = %envelope.instance_id, "child discarding message for another instance");
            return;
        }

        if envelope.is_response() {
            let call_id = envelope.call_id.as_deref().unwrap_or_default();
            let result = match envelope.kind {
                Kind::Error => Err(BridgeError::Remote {
                    message: envelope.message.clone().unwrap_or_default(),
                }),
                _ => Ok(envelope.value.clone().unwrap_or(Value::Null)),
            };
            if !self.pending.resolve(call_id, instance, result) {
                debug!(%call_id, "child discarding unmatched response");
            }
            return;
        }

        let call_id = envelope.call_id.as_deref();
        match envelope.kind {
            Kind::PropertyGet => {
                let Some(call_id) = call_id else { return };
                let name = envelope.name.as_deref().unwrap_or_default();
                let value = self.exports.lock().get(name).cloned();
                self.reply(match value {
                    Some(value) => Envelope::method_result(instance, call_id, value),
                    None => Envelope::error(instance, Some(call_id), format!("`{name}` is not exported")),
                });
            }
            Kind::MethodInvoke => {
                let Some(call_id) = call_id else { return };
                let name = envelope.name.as_deref().unwrap_or_default();
                let method = self.methods.lock().get(name).cloned();
                let reply = match method {
                    Some(method) => match method.call(envelope.args.clone().unwrap_or_default()) {
                        Ok(value) => Envelope::method_result(instance, call_id, value),
                        Err(message) => Envelope::error(instance, Some(call_id), message),
                    },
                    None => Envelope::error(instance, Some(call_id), format!("`{name}` is not exposed")),
                };
                self.reply(reply);
            }
            Kind::LifecycleEvent if envelope.is_event(EVENT_CLOSE) => {
                self.closed.send_replace(true);
            }
            _ => debug!(kind = ?envelope.kind, "child ignoring envelope"),
        }
    }
}

/// A connected child.
pub struct ChildBridge {
    inner: Arc<ChildInner>,
    props: Map<String, Value>,
    timeout: Duration,
    listener: JoinHandle<()>,
}

impl ChildBridge {
    /// Handshake with the parent of `window`, which was loaded from `url`.
    pub async fn connect(
        env: Arc<dyn Environment>,
        window: WindowId,
        url: &Url,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let mut bridge = Self::attach(env, window, url, timeout)?;
        bridge.handshake().await?;
        Ok(bridge)
    }

    /// Start listening without announcing the child yet, so exports and
    /// methods are in place before the parent can ask for them.
    pub fn attach(
        env: Arc<dyn Environment>,
        window: WindowId,
        url: &Url,
        timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let context = LoadContext::from_url(url)?;
        let parent = env.parent_window(window).ok_or_else(|| BridgeError::Handshake {
            reason: "window has no parent or opener".to_string(),
        })?;

        let mut inbox = env.listen(window);
        let (closed, _) = watch::channel(false);
        let inner = Arc::new(ChildInner {
            env,
            window,
            parent,
            context,
            pending: PendingTable::default(),
            exports: Mutex::new(HashMap::new()),
            methods: Mutex::new(HashMap::new()),
            closed,
        });
        let listener = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(message) = inbox.recv().await {
                    inner.dispatch(message);
                }
                inner.closed.send_replace(true);
            })
        };

        Ok(Self {
            inner,
            props: Map::new(),
            timeout,
            listener,
        })
    }

    /// Send `init` and store the props the parent answers with.
    pub async fn handshake(&mut self) -> Result<(), BridgeError> {
        let instance = self.inner.context.instance_id.clone();
        let reply = self
            .request(Envelope::lifecycle(&instance, EVENT_INIT, None), self.timeout)
            .await
            .map_err(|err| BridgeError::Handshake {
                reason: err.to_string(),
            })?;
        match reply.get("props") {
            Some(Value::Object(props)) => self.props = props.clone(),
            _ => {
                return Err(BridgeError::Handshake {
                    reason: "reply carries no props".to_string(),
                })
            }
        }
        debug!(%instance, props = self.props.len(), "child connected");
        Ok(())
    }

    async fn request(&self, mut envelope: Envelope, timeout: Duration) -> Result<Value, BridgeError> {
        let instance = self.inner.context.instance_id.clone();
        let operation = format!("{:?} `{}`", envelope.kind, envelope.name.as_deref().unwrap_or("?"));
        let (call_id, rx) = self.inner.pending.insert(&instance, &operation);
        let _guard = PendingGuard::new(&self.inner.pending, &call_id);
        envelope.call_id = Some(call_id);
        self.inner.post(&envelope)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::closed(instance)),
            Err(_) => Err(BridgeError::timeout(operation)),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.inner.context.instance_id
    }

    pub fn parent_origin(&self) -> &str {
        &self.inner.context.parent_origin
    }

    pub fn props(&self) -> &Map<String, Value> {
        &self.props
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    /// Call a function prop supplied by the parent.
    pub async fn call(&self, prop: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let function = self
            .props
            .get(prop)
            .and_then(function_id)
            .ok_or_else(|| BridgeError::prop(prop, "not a function prop"))?
            .to_string();
        self.call_function(&function, args).await
    }

    /// Call a parent function by its raw id.
    pub async fn call_function(&self, function_id: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let envelope = Envelope::method_invoke(self.instance_id(), function_id, args);
        self.request(envelope, self.timeout).await
    }

    /// Read a prop's current value from the parent.
    pub async fn get(&self, name: &str) -> Result<Value, BridgeError> {
        let envelope = Envelope::property_get(self.instance_id(), name);
        self.request(envelope, self.timeout).await
    }

    /// Make `value` readable by the parent's `Instance::get`.
    pub fn export(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.inner.exports.lock().insert(name.into(), value.into());
    }

    /// Make `f` callable by the parent's `Instance::invoke`.
    pub fn expose<F>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Vec<Value>) -> CallbackResult + Send + Sync + 'static,
    {
        self.inner
            .methods
            .lock()
            .insert(name.into(), Callback::new(f));
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<(), BridgeError> {
        let value = json!({ "width": width, "height": height });
        self.inner.post(&Envelope::lifecycle(
            self.instance_id(),
            EVENT_RESIZE,
            Some(value),
        ))
    }

    /// Ask the parent to close the component.
    pub fn close(&self) -> Result<(), BridgeError> {
        self.inner
            .post(&Envelope::lifecycle(self.instance_id(), EVENT_CLOSE, None))
    }

    pub fn report_error(&self, message: impl Into<String>) -> Result<(), BridgeError> {
        self.inner
            .post(&Envelope::error(self.instance_id(), None, message))
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    /// Resolves once the parent closed the component or the window went away.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Drop for ChildBridge {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// Report a failure to the parent without completing the handshake, e.g.
/// when the child page cannot initialise.
pub fn report_load_error(
    env: &dyn Environment,
    window: WindowId,
    url: &Url,
    message: impl Into<String>,
) -> Result<(), BridgeError> {
    let context = LoadContext::from_url(url)?;
    let parent = env.parent_window(window).ok_or_else(|| BridgeError::Handshake {
        reason: "window has no parent or opener".to_string(),
    })?;
    let data = Envelope::error(&context.instance_id, None, message)
        .encode()
        .map_err(|err| BridgeError::Remote {
            message: err.to_string(),
        })?;
    env.post_message(window, parent, data, &context.parent_origin);
    Ok(())
}
