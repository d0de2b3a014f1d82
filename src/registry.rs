//! Process-wide bookkeeping shared by the messenger and the instances.
//!
//! Two maps live here and nowhere else: instance id → window binding, and
//! call id → pending completion. Both are pruned when an instance is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::env::WindowId;
use crate::envelope::Envelope;
use crate::error::BridgeError;
use crate::origin::Domain;

pub(crate) type CallResult = Result<Value, BridgeError>;

/// Receives envelopes that passed the window and origin checks.
pub(crate) trait InboundHandler: Send + Sync {
    fn on_envelope(&self, envelope: Envelope);
}

struct PendingCall {
    instance: String,
    operation: String,
    tx: oneshot::Sender<CallResult>,
}

/// Call id → pending completion.
#[derive(Default)]
pub(crate) struct PendingTable {
    calls: Mutex<HashMap<String, PendingCall>>,
    next: AtomicU64,
}

impl PendingTable {
    pub fn insert(&self, instance: &str, operation: &str) -> (String, oneshot::Receiver<CallResult>) {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        let call_id = format!("call-{n}");
        let (tx, rx) = oneshot::channel();
        self.calls.lock().insert(
            call_id.clone(),
            PendingCall {
                instance: instance.to_string(),
                operation: operation.to_string(),
                tx,
            },
        );
        (call_id, rx)
    }

    /// Complete a pending call. A response only counts for the instance that
    /// issued the call; anything else is left untouched.
    pub fn resolve(&self, call_id: &str, instance: &str, result: CallResult) -> bool {
        let mut calls = self.calls.lock();
        match calls.get(call_id) {
            Some(call) if call.instance == instance => {}
            _ => return false,
        }
        let Some(call) = calls.remove(call_id) else {
            return false;
        };
        drop(calls);
        // The receiver may have gone away already (caller dropped the future).
        let _ = call.tx.send(result);
        true
    }

    pub fn evict(&self, call_id: &str) -> bool {
        self.calls.lock().remove(call_id).is_some()
    }

    /// Reject every pending call of `instance` with `err`.
    pub fn reject_instance(&self, instance: &str, err: &BridgeError) -> usize {
        let swept: Vec<PendingCall> = {
            let mut calls = self.calls.lock();
            let ids: Vec<String> = calls
                .iter()
                .filter(|(_, call)| call.instance == instance)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| calls.remove(id)).collect()
        };
        let count = swept.len();
        for call in swept {
            tracing::debug!(instance, operation = %call.operation, "rejecting pending call");
            let _ = call.tx.send(Err(err.clone()));
        }
        count
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.calls.lock().contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

/// Evicts its call id when dropped, so an abandoned `send` never leaks an entry.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingTable,
    call_id: String,
}

impl<'a> PendingGuard<'a> {
    pub fn new(table: &'a PendingTable, call_id: &str) -> Self {
        Self {
            table,
            call_id: call_id.to_string(),
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.evict(&self.call_id);
    }
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub window: WindowId,
    pub domain: Domain,
    pub handler: Weak<dyn InboundHandler>,
}

#[derive(Default)]
pub(crate) struct Registry {
    bindings: Mutex<HashMap<String, Binding>>,
    pending: PendingTable,
}

impl Registry {
    pub fn bind(
        &self,
        instance: &str,
        window: WindowId,
        domain: Domain,
        handler: Weak<dyn InboundHandler>,
    ) {
        self.bindings.lock().insert(
            instance.to_string(),
            Binding {
                window,
                domain,
                handler,
            },
        );
    }

    pub fn lookup(&self, instance: &str) -> Option<Binding> {
        self.bindings.lock().get(instance).cloned()
    }

    pub fn is_bound(&self, instance: &str) -> bool {
        self.bindings.lock().contains_key(instance)
    }

    /// Drop the binding and reject every call still waiting on the instance.
    pub fn release(&self, instance: &str, reason: &BridgeError) -> usize {
        self.bindings.lock().remove(instance);
        self.pending.reject_instance(instance, reason)
    }

    pub fn pending(&self) -> &PendingTable {
        &self.pending
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.lock().len()
    }
}
