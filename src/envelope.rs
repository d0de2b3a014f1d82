//! The unit exchanged over the bridge.
//!
//! On the wire an envelope is a JSON object:
//!
//! ```json
//! { "instanceId": "…", "kind": "method-invoke", "callId": "…", "name": "onLogin-0", "args": [1] }
//! ```
//!
//! Requests (`property-get`, `method-invoke`, and the `init` lifecycle event)
//! carry a `callId`; the answer is a `method-result` or `error` with the same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Child → parent handshake. Carries a call id; the reply holds the props.
pub const EVENT_INIT: &str = "init";
/// Either side asks the other to close.
pub const EVENT_CLOSE: &str = "close";
/// Child asks the parent to resize the hosting window; `value` is a `Dimensions`.
pub const EVENT_RESIZE: &str = "resize";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kind {
    PropertyGet,
    MethodInvoke,
    MethodResult,
    LifecycleEvent,
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub instance_id: String,
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Envelope {
    fn bare(instance_id: &str, kind: Kind) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            kind,
            call_id: None,
            name: None,
            args: None,
            value: None,
            message: None,
        }
    }

    pub fn property_get(instance_id: &str, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::bare(instance_id, Kind::PropertyGet)
        }
    }

    pub fn method_invoke(instance_id: &str, name: &str, args: Vec<Value>) -> Self {
        Self {
            name: Some(name.to_string()),
            args: Some(args),
            ..Self::bare(instance_id, Kind::MethodInvoke)
        }
    }

    pub fn method_result(instance_id: &str, call_id: &str, value: Value) -> Self {
        Self {
            call_id: Some(call_id.to_string()),
            value: Some(value),
            ..Self::bare(instance_id, Kind::MethodResult)
        }
    }

    pub fn error(instance_id: &str, call_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            call_id: call_id.map(str::to_string),
            message: Some(message.into()),
            ..Self::bare(instance_id, Kind::Error)
        }
    }

    pub fn lifecycle(instance_id: &str, event: &str, value: Option<Value>) -> Self {
        Self {
            name: Some(event.to_string()),
            value,
            ..Self::bare(instance_id, Kind::LifecycleEvent)
        }
    }

    /// Whether this envelope expects a correlated answer.
    pub fn is_request(&self) -> bool {
        match self.kind {
            Kind::PropertyGet | Kind::MethodInvoke => true,
            Kind::LifecycleEvent => self.call_id.is_some(),
            Kind::MethodResult | Kind::Error => false,
        }
    }

    /// Whether this envelope answers a request.
    pub fn is_response(&self) -> bool {
        matches!(self.kind, Kind::MethodResult | Kind::Error) && self.call_id.is_some()
    }

    pub fn is_event(&self, event: &str) -> bool {
        self.kind == Kind::LifecycleEvent && self.name.as_deref() == Some(event)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
