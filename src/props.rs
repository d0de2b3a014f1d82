//! Prop validation and marshaling.
//!
//! Values cross the boundary by copy. Functions never do: each function prop
//! is registered in the instance's [`FunctionTable`] and replaced on the wire
//! by `{"__crossframe_fn__": "<id>"}`. The child invokes it by id.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BridgeError;
use crate::spec::ComponentSpec;

/// Key of the object standing in for a function prop on the wire.
pub const FUNCTION_MARKER: &str = "__crossframe_fn__";

pub const ON_RENDERED: &str = "onRendered";
pub const ON_CLOSE: &str = "onClose";
pub const ON_ERROR: &str = "onError";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropType {
    String,
    Number,
    Boolean,
    Function,
    Object,
    Array,
}

impl PropType {
    pub fn accepts(&self, value: &PropValue) -> bool {
        match value {
            PropValue::Function(_) => *self == Self::Function,
            PropValue::Value(value) => self.accepts_json(value),
        }
    }

    pub(crate) fn accepts_json(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Function => false,
        }
    }

    /// Whether values of this type can travel in the child URL's query.
    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::String | Self::Number | Self::Boolean)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Function => "function",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for PropType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of one prop in a component spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropDefinition {
    #[serde(rename = "type")]
    pub prop_type: PropType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Also pass the value to the child in its URL query.
    #[serde(default)]
    pub query_param: bool,
}

impl PropDefinition {
    pub fn new(prop_type: PropType) -> Self {
        Self {
            prop_type,
            required: false,
            default: None,
            query_param: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn query_param(mut self) -> Self {
        self.query_param = true;
        self
    }
}

pub type CallbackResult = Result<Value, String>;

/// A parent-side function handed to the child as a prop.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Vec<Value>) -> CallbackResult + Send + Sync>);

impl Callback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallbackResult + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, args: Vec<Value>) -> CallbackResult {
        (self.0)(args)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback(..)")
    }
}

#[derive(Clone, Debug)]
pub enum PropValue {
    Value(Value),
    Function(Callback),
}

/// The prop bag an instance is created with.
#[derive(Clone, Debug, Default)]
pub struct Props(BTreeMap<String, PropValue>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), PropValue::Value(value.into()));
        self
    }

    pub fn with_fn<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> CallbackResult + Send + Sync + 'static,
    {
        self.0
            .insert(name.into(), PropValue::Function(Callback::new(f)));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: PropValue) {
        self.0.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&PropValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropValue)> {
        self.0.iter()
    }
}

/// Per-instance table of the parent functions the child may call.
#[derive(Default)]
pub struct FunctionTable {
    entries: Mutex<HashMap<String, (String, Callback)>>,
    next: AtomicU64,
}

impl FunctionTable {
    pub(crate) fn register(&self, prop: &str, callback: Callback) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let id = format!("{prop}-{n}");
        self.entries
            .lock()
            .insert(id.clone(), (prop.to_string(), callback));
        id
    }

    pub fn get(&self, function_id: &str) -> Option<Callback> {
        self.entries
            .lock()
            .get(function_id)
            .map(|(_, callback)| callback.clone())
    }

    /// The callback supplied for prop `prop`, if any.
    pub fn by_prop(&self, prop: &str) -> Option<Callback> {
        self.entries
            .lock()
            .values()
            .find(|(name, _)| name == prop)
            .map(|(_, callback)| callback.clone())
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Props ready to cross the boundary.
pub struct SerializedProps {
    /// Handshake payload: plain values plus function references.
    pub values: Map<String, Value>,
    /// Pairs appended to the child URL.
    pub query: Vec<(String, String)>,
    pub functions: FunctionTable,
}

/// Validate `props` against `spec` and marshal them.
///
/// Fails before anything is registered: unknown props, missing required props
/// and type mismatches are all [`BridgeError::PropValidation`]. `null` counts as
/// absent.
pub fn serialize(spec: &ComponentSpec, props: Props) -> Result<SerializedProps, BridgeError> {
    for (name, value) in props.iter() {
        let Some(definition) = spec.props.get(name) else {
            return Err(BridgeError::prop(name, "not declared by the component"));
        };
        if matches!(value, PropValue::Value(Value::Null)) {
            continue;
        }
        if !definition.prop_type.accepts(value) {
            return Err(BridgeError::prop(
                name,
                format!("expected {}", definition.prop_type),
            ));
        }
    }

    let mut resolved: BTreeMap<String, PropValue> = BTreeMap::new();
    for (name, definition) in &spec.props {
        let supplied = match props.get(name) {
            Some(PropValue::Value(Value::Null)) | None => None,
            Some(value) => Some(value.clone()),
        };
        match (supplied, &definition.default) {
            (Some(value), _) => {
                resolved.insert(name.clone(), value);
            }
            (None, Some(default)) => {
                resolved.insert(name.clone(), PropValue::Value(default.clone()));
            }
            (None, None) if definition.required => {
                return Err(BridgeError::prop(name, "required prop is missing"));
            }
            (None, None) => {}
        }
    }

    let functions = FunctionTable::default();
    let mut values = Map::new();
    let mut query = Vec::new();
    for (name, value) in resolved {
        match value {
            PropValue::Function(callback) => {
                let id = functions.register(&name, callback);
                values.insert(name, function_ref(&id));
            }
            PropValue::Value(value) => {
                let definition = &spec.props[&name];
                if definition.query_param && definition.prop_type.is_scalar() {
                    query.push((name.clone(), query_value(&value)));
                }
                values.insert(name, value);
            }
        }
    }

    Ok(SerializedProps {
        values,
        query,
        functions,
    })
}

/// Run the parent function a child asked for.
pub fn materialize_remote_call(
    functions: &FunctionTable,
    function_id: &str,
    args: Vec<Value>,
) -> Result<Value, BridgeError> {
    let callback = functions.get(function_id).ok_or_else(|| BridgeError::Remote {
        message: format!("unknown function `{function_id}`"),
    })?;
    callback
        .call(args)
        .map_err(|message| BridgeError::Remote { message })
}

pub fn function_ref(id: &str) -> Value {
    let mut marker = Map::new();
    marker.insert(FUNCTION_MARKER.to_string(), Value::String(id.to_string()));
    Value::Object(marker)
}

/// The function id inside a wire value, if it is a function reference.
pub fn function_id(value: &Value) -> Option<&str> {
    value.as_object()?.get(FUNCTION_MARKER)?.as_str()
}

fn query_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
