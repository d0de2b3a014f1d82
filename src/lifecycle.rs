//! The per-instance state machine.
//!
//! ```text
//! Initial ─render─▶ Rendering ─handshake─▶ Rendered ─▶ Active ─▶ Closing ─▶ Closed
//!                                                                    (any) ─▶ Destroyed
//! ```
//!
//! Close is idempotent whichever path triggers it (explicit `close`, the child
//! asking, the hosting element disappearing) and fires `onClose` exactly once
//! for an instance that rendered. `destroy` closes first, synchronously.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bridge::Bridge;
use crate::child::{INSTANCE_PARAM, PARENT_PARAM};
use crate::env::NodeId;
use crate::envelope::{Envelope, Kind, EVENT_CLOSE, EVENT_INIT, EVENT_RESIZE};
use crate::error::BridgeError;
use crate::props::{
    materialize_remote_call, FunctionTable, SerializedProps, ON_CLOSE, ON_ERROR, ON_RENDERED,
};
use crate::registry::InboundHandler;
use crate::spec::ComponentSpec;
use crate::watcher::{DomWatcher, PopupWatcher, Watcher};
use crate::window::{Context, Dimensions, RenderTarget, WindowHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    Initial,
    Rendering,
    Rendered,
    Active,
    Closing,
    Closed,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::Rendering => "rendering",
            Self::Rendered => "rendered",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseReason {
    Requested,
    Child,
    Removed,
    Destroyed,
}

/// One embedding of a component.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    id: String,
    spec: Arc<ComponentSpec>,
    bridge: Arc<Bridge>,
    values: Map<String, Value>,
    query: Vec<(String, String)>,
    functions: FunctionTable,
    state: Mutex<LifecycleState>,
    window: Mutex<Option<WindowHandle>>,
    watcher: Mutex<Option<Watcher>>,
    render_signal: Mutex<Option<oneshot::Sender<Result<(), BridgeError>>>>,
}

impl Instance {
    pub(crate) fn new(spec: Arc<ComponentSpec>, bridge: Arc<Bridge>, props: SerializedProps) -> Self {
        let id = Uuid::new_v4().to_string();
        debug!(instance = %id, tag = %spec.tag, "instance created");
        Self {
            inner: Arc::new(InstanceInner {
                id,
                spec,
                bridge,
                values: props.values,
                query: props.query,
                functions: props.functions,
                state: Mutex::new(LifecycleState::Initial),
                window: Mutex::new(None),
                watcher: Mutex::new(None),
                render_signal: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn tag(&self) -> &str {
        &self.inner.spec.tag
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    /// The prop snapshot sent to the child (functions appear as references).
    pub fn props(&self) -> &Map<String, Value> {
        &self.inner.values
    }

    pub fn window(&self) -> Option<WindowHandle> {
        *self.inner.window.lock()
    }

    pub fn hosted_element(&self) -> Option<NodeId> {
        self.window().and_then(|handle| handle.element())
    }

    /// Render into `container` (or a popup, if that is the component's default
    /// context). Resolves once the child has completed its handshake.
    pub async fn render(&self, container: NodeId) -> Result<(), BridgeError> {
        let target = match self.inner.spec.context {
            Context::Iframe => RenderTarget::Iframe { container },
            Context::Popup => RenderTarget::Popup,
        };
        self.render_to(target).await
    }

    pub async fn render_popup(&self) -> Result<(), BridgeError> {
        self.render_to(RenderTarget::Popup).await
    }

    pub async fn render_to(&self, target: RenderTarget) -> Result<(), BridgeError> {
        self.inner.begin_render()?;
        let result = self.inner.render(target).await;
        if let Err(err) = &result {
            warn!(instance = %self.inner.id, error = %err, "render failed");
            self.inner.abort_render();
        }
        result
    }

    /// Close the component. Never fails; repeated calls are no-ops.
    ///
    /// Completes synchronously; the `async` signature only mirrors `render`.
    pub async fn close(&self) {
        self.inner.close_now(CloseReason::Requested);
    }

    /// Close (if needed) and release everything the instance holds.
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Read a value the child exported.
    pub async fn get(&self, name: &str) -> Result<Value, BridgeError> {
        self.get_with_timeout(name, self.inner.bridge.config().call_timeout())
            .await
    }

    pub async fn get_with_timeout(&self, name: &str, timeout: Duration) -> Result<Value, BridgeError> {
        self.inner.ensure_active("get a property")?;
        let envelope = Envelope::property_get(&self.inner.id, name);
        self.inner.bridge.messenger().send(envelope, timeout).await
    }

    /// Call a method the child exposed.
    pub async fn invoke(&self, name: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        self.invoke_with_timeout(name, args, self.inner.bridge.config().call_timeout())
            .await
    }

    pub async fn invoke_with_timeout(
        &self,
        name: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Value, BridgeError> {
        self.inner.ensure_active("invoke a method")?;
        let envelope = Envelope::method_invoke(&self.inner.id, name, args);
        self.inner.bridge.messenger().send(envelope, timeout).await
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<(), BridgeError> {
        self.inner.ensure_active("resize")?;
        match self.window() {
            Some(handle) => self
                .inner
                .bridge
                .host()
                .resize(&handle, Dimensions::new(width, height)),
            None => Err(BridgeError::closed(&self.inner.id)),
        }
    }

    pub fn focus(&self) -> Result<(), BridgeError> {
        self.inner.ensure_active("focus")?;
        match self.window() {
            Some(handle) => self.inner.bridge.host().focus(&handle),
            None => Err(BridgeError::closed(&self.inner.id)),
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.inner.id)
            .field("tag", &self.inner.spec.tag)
            .field("state", &self.state())
            .finish()
    }
}

impl InstanceInner {
    fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.lock();
        debug!(instance = %self.id, from = %*state, to = %next, "transition");
        *state = next;
    }

    fn begin_render(&self) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if *state != LifecycleState::Initial {
            return Err(BridgeError::InvalidState {
                operation: "render",
                state: *state,
            });
        }
        *state = LifecycleState::Rendering;
        Ok(())
    }

    fn ensure_active(&self, operation: &'static str) -> Result<(), BridgeError> {
        match *self.state.lock() {
            LifecycleState::Active => Ok(()),
            LifecycleState::Destroyed => Err(BridgeError::destroyed(&self.id)),
            LifecycleState::Closing | LifecycleState::Closed => Err(BridgeError::closed(&self.id)),
            state => Err(BridgeError::InvalidState { operation, state }),
        }
    }

    fn interrupted(&self, state: LifecycleState) -> BridgeError {
        match state {
            LifecycleState::Destroyed => BridgeError::destroyed(&self.id),
            _ => BridgeError::closed(&self.id),
        }
    }

    fn window_name(&self) -> String {
        format!("__crossframe__{}__{}", self.spec.tag, self.id)
    }

    async fn render(self: &Arc<Self>, target: RenderTarget) -> Result<(), BridgeError> {
        let bridge = self.bridge.clone();
        let mut url = self.spec.resolve_url(&self.values).await?;

        let env = bridge.env();
        let parent_origin = env
            .window_origin(env.host_window())
            .unwrap_or_else(|| "null".to_string());
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(INSTANCE_PARAM, &self.id);
            query.append_pair(PARENT_PARAM, &parent_origin);
            for (name, value) in &self.query {
                query.append_pair(name, value);
            }
        }

        let (tx, rx) = oneshot::channel();
        {
            let state = *self.state.lock();
            if state != LifecycleState::Rendering {
                return Err(self.interrupted(state));
            }
            *self.render_signal.lock() = Some(tx);
        }

        let handle = bridge.host().open(
            &target,
            &url,
            &self.window_name(),
            self.spec.dimensions,
            self.spec.popup_proxy,
        )?;
        *self.window.lock() = Some(handle);
        let handler: Weak<dyn InboundHandler> = Arc::downgrade(self) as Weak<dyn InboundHandler>;
        bridge
            .registry()
            .bind(&self.id, handle.window(), self.spec.domain.clone(), handler);
        self.attach_watcher(&handle);
        debug!(instance = %self.id, window = ?handle.window(), %url, "waiting for child handshake");

        match tokio::time::timeout(bridge.config().render_timeout(), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::destroyed(&self.id)),
            Err(_) => Err(BridgeError::timeout("child handshake")),
        }
    }

    fn attach_watcher(self: &Arc<Self>, handle: &WindowHandle) {
        let weak = Arc::downgrade(self);
        let on_removed = move || {
            if let Some(inner) = weak.upgrade() {
                inner.close_now(CloseReason::Removed);
            }
        };
        let env = self.bridge.env();
        let watcher = match *handle {
            WindowHandle::Frame { element, .. } => {
                Watcher::Dom(DomWatcher::watch(env, element, on_removed))
            }
            WindowHandle::Popup { window, .. } => Watcher::Popup(PopupWatcher::watch(
                env,
                window,
                self.bridge.config().popup_poll_interval(),
                on_removed,
            )),
        };
        *self.watcher.lock() = Some(watcher);

        // The element may already have been detached while the watcher was set up.
        if !matches!(
            *self.state.lock(),
            LifecycleState::Rendering | LifecycleState::Rendered | LifecycleState::Active
        ) {
            let stale = self.watcher.lock().take();
            drop(stale);
        }
    }

    /// Undo a render that failed after leaving `Initial`. `onClose` does not
    /// fire: the component never rendered.
    fn abort_render(&self) {
        let was_rendering = {
            let mut state = self.state.lock();
            let rendering = *state == LifecycleState::Rendering;
            if rendering {
                *state = LifecycleState::Closing;
            }
            rendering
        };
        if was_rendering {
            let signal = self.render_signal.lock().take();
            drop(signal);
            let watcher = self.watcher.lock().take();
            drop(watcher);
            let handle = self.window.lock().take();
            if let Some(handle) = handle {
                self.bridge.host().close(&handle);
            }
            self.set_state(LifecycleState::Closed);
        }
        self.bridge
            .registry()
            .release(&self.id, &BridgeError::closed(&self.id));
    }

    fn close_now(&self, reason: CloseReason) {
        let previous = {
            let mut state = self.state.lock();
            let previous = *state;
            match previous {
                LifecycleState::Closing | LifecycleState::Closed | LifecycleState::Destroyed => {
                    return
                }
                LifecycleState::Initial => {
                    *state = LifecycleState::Closed;
                    return;
                }
                _ => *state = LifecycleState::Closing,
            }
            previous
        };
        debug!(instance = %self.id, ?reason, from = %previous, "closing");

        let watcher = self.watcher.lock().take();
        drop(watcher);

        let signal = self.render_signal.lock().take();
        if let Some(signal) = signal {
            let _ = signal.send(Err(BridgeError::closed(&self.id)));
        }

        if matches!(previous, LifecycleState::Rendered | LifecycleState::Active) {
            self.fire(ON_CLOSE, Vec::new());
        }

        let handle = self.window.lock().take();
        if let Some(handle) = handle {
            if reason != CloseReason::Child {
                self.bridge
                    .messenger()
                    .post(&Envelope::lifecycle(&self.id, EVENT_CLOSE, None));
            }
            self.bridge.host().close(&handle);
        }
        // `destroy` sweeps with its own error right after this.
        if reason != CloseReason::Destroyed {
            self.bridge
                .registry()
                .release(&self.id, &BridgeError::closed(&self.id));
        }

        self.set_state(LifecycleState::Closed);
    }

    fn destroy(&self) {
        let signal = self.render_signal.lock().take();
        if let Some(signal) = signal {
            let _ = signal.send(Err(BridgeError::destroyed(&self.id)));
        }
        self.close_now(CloseReason::Destroyed);
        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Destroyed {
                return;
            }
            *state = LifecycleState::Destroyed;
        }
        let swept = self
            .bridge
            .registry()
            .release(&self.id, &BridgeError::destroyed(&self.id));
        let released = self.functions.clear();
        debug!(instance = %self.id, swept, released, "destroyed");
    }

    /// Invoke a lifecycle callback prop, if the host supplied one.
    fn fire(&self, prop: &str, args: Vec<Value>) {
        if let Some(callback) = self.functions.by_prop(prop) {
            if let Err(err) = callback.call(args) {
                warn!(instance = %self.id, prop, error = %err, "lifecycle callback failed");
            }
        }
    }

    fn reply(&self, envelope: Envelope) {
        self.bridge.messenger().post(&envelope);
    }

    fn on_handshake(&self, envelope: &Envelope) {
        let Some(call_id) = envelope.call_id.as_deref() else {
            warn!(instance = %self.id, "handshake without call id");
            return;
        };
        let state = *self.state.lock();
        if state != LifecycleState::Rendering {
            warn!(instance = %self.id, %state, "unexpected handshake");
            self.reply(Envelope::error(
                &self.id,
                Some(call_id),
                format!("unexpected handshake while {state}"),
            ));
            return;
        }

        let payload = json!({ "props": Value::Object(self.values.clone()) });
        self.reply(Envelope::method_result(&self.id, call_id, payload));
        self.set_state(LifecycleState::Rendered);

        let handle = *self.window.lock();
        if let Some(handle) = handle {
            self.bridge.host().show(&handle);
        }
        self.fire(ON_RENDERED, Vec::new());

        {
            let mut state = self.state.lock();
            if *state == LifecycleState::Rendered {
                *state = LifecycleState::Active;
            }
        }
        let signal = self.render_signal.lock().take();
        if let Some(signal) = signal {
            let _ = signal.send(Ok(()));
        }
    }

    fn on_invoke(&self, envelope: Envelope) {
        let Some(call_id) = envelope.call_id.as_deref() else {
            debug!(instance = %self.id, "method-invoke without call id");
            return;
        };
        let state = *self.state.lock();
        let reply = if state != LifecycleState::Active {
            Envelope::error(&self.id, Some(call_id), format!("instance is {state}"))
        } else {
            let function_id = envelope.name.as_deref().unwrap_or_default();
            let args = envelope.args.clone().unwrap_or_default();
            match materialize_remote_call(&self.functions, function_id, args) {
                Ok(value) => Envelope::method_result(&self.id, call_id, value),
                Err(err) => Envelope::error(&self.id, Some(call_id), remote_message(err)),
            }
        };
        self.reply(reply);
    }

    fn on_property_get(&self, envelope: &Envelope) {
        let Some(call_id) = envelope.call_id.as_deref() else {
            return;
        };
        let name = envelope.name.as_deref().unwrap_or_default();
        let reply = match self.values.get(name) {
            Some(value) => Envelope::method_result(&self.id, call_id, value.clone()),
            None => Envelope::error(&self.id, Some(call_id), format!("unknown property `{name}`")),
        };
        self.reply(reply);
    }

    fn on_child_error(&self, envelope: &Envelope) {
        let message = envelope.message.clone().unwrap_or_default();
        let state = *self.state.lock();
        match state {
            LifecycleState::Rendering => {
                let signal = self.render_signal.lock().take();
                if let Some(signal) = signal {
                    let _ = signal.send(Err(BridgeError::Remote { message }));
                }
            }
            LifecycleState::Rendered | LifecycleState::Active => {
                if self.functions.by_prop(ON_ERROR).is_some() {
                    self.fire(ON_ERROR, vec![Value::String(message)]);
                } else {
                    warn!(instance = %self.id, %message, "child reported an error");
                }
            }
            _ => debug!(instance = %self.id, %message, "ignoring child error"),
        }
    }

    fn on_resize(&self, envelope: &Envelope) {
        if *self.state.lock() != LifecycleState::Active {
            return;
        }
        let dimensions: Dimensions = match envelope
            .value
            .clone()
            .map(serde_json::from_value::<Dimensions>)
            .transpose()
        {
            Ok(Some(dimensions)) => dimensions,
            Ok(None) => return,
            Err(err) => {
                debug!(instance = %self.id, error = %err, "malformed resize request");
                return;
            }
        };
        let handle = *self.window.lock();
        if let Some(handle) = handle {
            if let Err(err) = self.bridge.host().resize(&handle, dimensions) {
                warn!(instance = %self.id, error = %err, "resize failed");
            }
        }
    }
}

impl InboundHandler for InstanceInner {
    fn on_envelope(&self, envelope: Envelope) {
        match envelope.kind {
            Kind::LifecycleEvent if envelope.is_event(EVENT_INIT) => self.on_handshake(&envelope),
            Kind::LifecycleEvent if envelope.is_event(EVENT_CLOSE) => {
                self.close_now(CloseReason::Child)
            }
            Kind::LifecycleEvent if envelope.is_event(EVENT_RESIZE) => self.on_resize(&envelope),
            Kind::MethodInvoke => self.on_invoke(envelope),
            Kind::PropertyGet => self.on_property_get(&envelope),
            Kind::Error => self.on_child_error(&envelope),
            _ => debug!(instance = %self.id, kind = ?envelope.kind, name = ?envelope.name, "ignoring envelope"),
        }
    }
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        if self.bridge.registry().is_bound(&self.id) {
            self.bridge
                .registry()
                .release(&self.id, &BridgeError::destroyed(&self.id));
        }
    }
}

fn remote_message(err: BridgeError) -> String {
    match err {
        BridgeError::Remote { message } => message,
        other => other.to_string(),
    }
}
