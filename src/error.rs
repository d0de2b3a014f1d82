use crate::lifecycle::LifecycleState;

/// Errors surfaced by the bridge.
///
/// Messages that fail the origin or window check never become an error: they
/// are dropped at the messenger and only show up in `debug` logs.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum BridgeError {
    #[error("invalid component spec `{tag}`: {reason}")]
    SpecValidation { tag: String, reason: String },

    #[error("invalid prop `{prop}`: {reason}")]
    PropValidation { prop: String, reason: String },

    #[error("could not create window: {reason}")]
    WindowCreation { reason: String },

    #[error("window operation failed: {reason}")]
    Window { reason: String },

    #[error("could not resolve component url: {reason}")]
    Url { reason: String },

    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    #[error("instance {instance} was destroyed")]
    InstanceDestroyed { instance: String },

    #[error("instance {instance} was closed")]
    InstanceClosed { instance: String },

    #[error("remote error: {message}")]
    Remote { message: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("handshake failed: {reason}")]
    Handshake { reason: String },

    #[error("invalid configuration: {reason}")]
    Config { reason: String },
}

impl BridgeError {
    /// Returns `true` for failures scoped to a single call rather than the instance.
    pub fn is_call_scoped(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Remote { .. })
    }

    pub(crate) fn prop(prop: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PropValidation {
            prop: prop.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn spec(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SpecValidation {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn destroyed(instance: impl Into<String>) -> Self {
        Self::InstanceDestroyed {
            instance: instance.into(),
        }
    }

    pub(crate) fn closed(instance: impl Into<String>) -> Self {
        Self::InstanceClosed {
            instance: instance.into(),
        }
    }

    pub(crate) fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}
