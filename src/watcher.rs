//! Detects that a hosted window went away without an explicit close.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::env::{Environment, MutationCallback, NodeId, ObserverId, WindowId};

type OnRemoved = Arc<dyn Fn() + Send + Sync>;

/// Whether `node` is attached to the document, looking through shadow roots.
pub fn is_connected(env: &dyn Environment, node: NodeId) -> bool {
    let document = env.document();
    let mut current = node;
    loop {
        if current == document {
            return true;
        }
        current = match env.parent_node(current) {
            Some(parent) => parent,
            None => match env.shadow_host(current) {
                Some(host) => host,
                None => return false,
            },
        };
    }
}

/// The document plus every shadow root between it and `node`.
fn tree_roots(env: &dyn Environment, node: NodeId) -> Vec<NodeId> {
    let mut roots = Vec::new();
    let mut current = node;
    loop {
        match env.parent_node(current) {
            Some(parent) => current = parent,
            None => {
                roots.push(current);
                match env.shadow_host(current) {
                    Some(host) => current = host,
                    None => return roots,
                }
            }
        }
    }
}

/// Watches an element and fires once, synchronously, when it is no longer
/// connected.
///
/// Mutation observation stops at shadow boundaries, so every tree root on the
/// path to the document is observed separately.
pub struct DomWatcher {
    env: Weak<dyn Environment>,
    observers: Vec<ObserverId>,
}

impl DomWatcher {
    pub fn watch<F>(env: &Arc<dyn Environment>, element: NodeId, on_removed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let on_removed: OnRemoved = Arc::new(on_removed);
        let fired = Arc::new(AtomicBool::new(false));
        let weak_env = Arc::downgrade(env);

        let callback: MutationCallback = {
            let weak_env = weak_env.clone();
            let fired = fired.clone();
            let on_removed = on_removed.clone();
            Arc::new(move |_record| {
                let Some(env) = weak_env.upgrade() else {
                    return;
                };
                if !is_connected(&*env, element) && !fired.swap(true, Ordering::SeqCst) {
                    debug!(?element, "hosted element removed");
                    on_removed();
                }
            })
        };

        let observers = tree_roots(&**env, element)
            .into_iter()
            .map(|root| env.observe(root, callback.clone()))
            .collect();

        let watcher = Self {
            env: weak_env,
            observers,
        };
        if !is_connected(&**env, element) && !fired.swap(true, Ordering::SeqCst) {
            on_removed();
        }
        watcher
    }
}

impl Drop for DomWatcher {
    fn drop(&mut self) {
        if let Some(env) = self.env.upgrade() {
            for observer in self.observers.drain(..) {
                env.disconnect(observer);
            }
        }
    }
}

/// Polls a popup and fires once when the user (or anything else) closed it.
pub struct PopupWatcher {
    task: JoinHandle<()>,
}

impl PopupWatcher {
    pub fn watch<F>(env: &Arc<dyn Environment>, window: WindowId, interval: Duration, on_closed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let env = Arc::downgrade(env);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let closed = match env.upgrade() {
                    Some(env) => env.is_window_closed(window),
                    None => return,
                };
                if closed {
                    debug!(?window, "popup closed");
                    on_closed();
                    return;
                }
            }
        });
        Self { task }
    }
}

impl Drop for PopupWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub enum Watcher {
    Dom(DomWatcher),
    Popup(PopupWatcher),
}
