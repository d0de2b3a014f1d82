//! Origin-checked request/response transport between the host page and the
//! child windows it embeds.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::env::{Environment, PostedMessage};
use crate::envelope::{Envelope, Kind};
use crate::error::BridgeError;
use crate::registry::{PendingGuard, Registry};

pub(crate) struct Messenger {
    env: Arc<dyn Environment>,
    registry: Arc<Registry>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Messenger {
    pub fn new(env: Arc<dyn Environment>, registry: Arc<Registry>) -> Arc<Self> {
        Arc::new(Self {
            env,
            registry,
            listener: Mutex::new(None),
        })
    }

    /// Start pumping the host window's inbox. Must run inside a tokio runtime.
    pub fn start(self: &Arc<Self>) {
        let mut inbox = self.env.listen(self.env.host_window());
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                let Some(messenger) = weak.upgrade() else {
                    break;
                };
                messenger.dispatch(message);
            }
            debug!("host inbox closed");
        });
        if let Some(previous) = self.listener.lock().replace(task) {
            previous.abort();
        }
    }

    /// Fire-and-forget delivery to the window bound to `envelope.instance_id`.
    /// Returns `false` when the instance has no binding.
    pub fn post(&self, envelope: &Envelope) -> bool {
        let Some(binding) = self.registry.lookup(&envelope.instance_id) else {
            debug!(instance = %envelope.instance_id, kind = ?envelope.kind, "no binding, dropping outbound message");
            return false;
        };
        let data = match envelope.encode() {
            Ok(data) => data,
            Err(err) => {
                warn!(instance = %envelope.instance_id, error = %err, "could not encode envelope");
                return false;
            }
        };
        self.env.post_message(
            self.env.host_window(),
            binding.window,
            data,
            binding.domain.target_origin(),
        );
        true
    }

    /// Send a request and wait for its correlated answer.
    ///
    /// The call id is assigned here. On timeout the pending entry is evicted, so
    /// a late answer is discarded like any other unmatched message.
    pub async fn send(&self, mut envelope: Envelope, timeout: Duration) -> Result<Value, BridgeError> {
        let instance = envelope.instance_id.clone();
        if !self.registry.is_bound(&instance) {
            return Err(BridgeError::destroyed(instance));
        }
        let operation = describe(&envelope);
        let pending = self.registry.pending();
        let (call_id, rx) = pending.insert(&instance, &operation);
        let _guard = PendingGuard::new(pending, &call_id);
        envelope.call_id = Some(call_id.clone());

        if !self.post(&envelope) {
            return Err(BridgeError::destroyed(instance));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::destroyed(instance)),
            Err(_) => {
                debug!(%instance, %call_id, %operation, "call timed out");
                Err(BridgeError::timeout(operation))
            }
        }
    }

    /// Route one inbound message. Anything failing the trust checks is dropped
    /// here and never reaches a handler.
    fn dispatch(&self, message: PostedMessage) {
        let envelope = match Envelope::decode(&message.data) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(source = ?message.source, error = %err, "discarding non-envelope message");
                return;
            }
        };
        let instance = envelope.instance_id.as_str();

        let Some(binding) = self.registry.lookup(instance) else {
            debug!(%instance, "discarding message for unknown instance");
            return;
        };
        if binding.window != message.source {
            debug!(%instance, source = ?message.source, expected = ?binding.window, "discarding message from unexpected window");
            return;
        }
        if !binding.domain.matches(&message.origin) {
            debug!(%instance, origin = %message.origin, expected = %binding.domain, "discarding message from unexpected origin");
            return;
        }

        if envelope.is_response() {
            let call_id = envelope.call_id.as_deref().unwrap_or_default();
            if self.registry.pending().contains(call_id) {
                let result = match envelope.kind {
                    Kind::Error => Err(BridgeError::Remote {
                        message: envelope.message.clone().unwrap_or_default(),
                    }),
                    _ => Ok(envelope.value.clone().unwrap_or(Value::Null)),
                };
                if !self.registry.pending().resolve(call_id, instance, result) {
                    debug!(%instance, %call_id, "discarding response for another instance's call");
                }
                return;
            }
            // Late replies to timed-out or dropped calls end here, errors included.
            debug!(%instance, %call_id, "discarding unmatched response");
            return;
        }

        match binding.handler.upgrade() {
            Some(handler) => handler.on_envelope(envelope),
            None => debug!(%instance, "instance dropped, discarding message"),
        }
    }
}

impl Drop for Messenger {
    fn drop(&mut self) {
        if let Some(task) = self.listener.lock().take() {
            task.abort();
        }
    }
}

fn describe(envelope: &Envelope) -> String {
    let name = envelope.name.as_deref().unwrap_or("?");
    match envelope.kind {
        Kind::PropertyGet => format!("property-get `{name}`"),
        Kind::MethodInvoke => format!("method-invoke `{name}`"),
        Kind::LifecycleEvent => format!("lifecycle-event `{name}`"),
        Kind::MethodResult | Kind::Error => "response".to_string(),
    }
}
