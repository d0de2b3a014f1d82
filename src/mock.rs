//! An in-memory browser.
//!
//! [`MockEnvironment`] keeps a DOM (with shadow roots), a set of windows with
//! origins, and `postMessage` queues, and applies the browser rules the bridge
//! relies on. Child pages are plain async functions registered with
//! [`MockEnvironment::serve`]; one is spawned whenever a window loads its URL.
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use crossframe::mock::MockEnvironment;
//!
//! let env = MockEnvironment::new("mock://host.com")?;
//! env.serve("mock://child.com/child.htm", |page| async move {
//!     if let Ok(child) = page.connect().await {
//!         child.closed().await;
//!     }
//! })?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use url::Url;

use crate::child::{report_load_error, ChildBridge};
use crate::env::{
    EnvError, Environment, FrameOptions, HostedFrame, MutationCallback, MutationRecord, NodeId,
    ObserverId, PostedMessage, WindowId, WindowOptions,
};
use crate::error::BridgeError;
use crate::origin::origin_of;
use crate::window::{Dimensions, Geometry};

const SCREEN: Dimensions = Dimensions {
    width: 1280,
    height: 800,
};
const CHILD_TIMEOUT: Duration = Duration::from_secs(10);

type PageFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Page = Arc<dyn Fn(ChildPage) -> PageFuture + Send + Sync>;

struct Node {
    tag: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    shadow_root: Option<NodeId>,
    /// Set on shadow roots only.
    host: Option<NodeId>,
    attributes: BTreeMap<String, String>,
    frame: Option<WindowId>,
    visible: bool,
    size: Option<Dimensions>,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            parent: None,
            children: Vec::new(),
            shadow_root: None,
            host: None,
            attributes: BTreeMap::new(),
            frame: None,
            visible: true,
            size: None,
        }
    }
}

struct MockWindow {
    url: Option<Url>,
    origin: String,
    parent: Option<WindowId>,
    geometry: Option<Geometry>,
    closed: bool,
    listeners: Vec<mpsc::UnboundedSender<PostedMessage>>,
}

impl MockWindow {
    fn unload(&mut self) {
        self.listeners.clear();
    }
}

struct MockState {
    next: u64,
    host: WindowId,
    document: NodeId,
    body: NodeId,
    nodes: HashMap<NodeId, Node>,
    windows: HashMap<WindowId, MockWindow>,
    observers: HashMap<ObserverId, (NodeId, MutationCallback)>,
    block_popups: bool,
    focused: Option<WindowId>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next += 1;
        self.next
    }

    fn add_window(&mut self, url: Option<Url>, origin: String, parent: Option<WindowId>) -> WindowId {
        let id = WindowId(self.next_id());
        self.windows.insert(
            id,
            MockWindow {
                url,
                origin,
                parent,
                geometry: None,
                closed: false,
                listeners: Vec::new(),
            },
        );
        id
    }

    fn add_node(&mut self, tag: &str) -> NodeId {
        let id = NodeId(self.next_id());
        self.nodes.insert(id, Node::new(tag));
        id
    }

    fn host_origin(&self) -> String {
        self.windows
            .get(&self.host)
            .map(|window| window.origin.clone())
            .unwrap_or_else(|| "null".to_string())
    }

    fn open_window_origin(&self, window: WindowId) -> Option<&str> {
        self.windows
            .get(&window)
            .filter(|window| !window.closed)
            .map(|window| window.origin.as_str())
    }

    /// Whether the host page may script `window` directly, or through `relay`.
    fn check_access(&self, window: WindowId, relay: Option<WindowId>) -> Result<(), EnvError> {
        let host = self.host_origin();
        match self.open_window_origin(window) {
            None => Err(EnvError::NoSuchWindow(window)),
            Some(origin) if origin == host => Ok(()),
            Some(_) => match relay.and_then(|relay| self.open_window_origin(relay)) {
                Some(origin) if origin == host => Ok(()),
                _ => Err(EnvError::AccessDenied(window)),
            },
        }
    }

    /// Observers whose root contains `target` within the same tree.
    fn observers_of(&self, target: NodeId) -> Vec<MutationCallback> {
        let mut path = vec![target];
        let mut current = target;
        while let Some(parent) = self.nodes.get(&current).and_then(|node| node.parent) {
            path.push(parent);
            current = parent;
        }
        self.observers
            .values()
            .filter(|(root, _)| path.contains(root))
            .map(|(_, callback)| callback.clone())
            .collect()
    }

    /// `node` and everything below it, shadow trees included.
    fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().copied());
                stack.extend(node.shadow_root);
            }
        }
        out
    }

    fn close(&mut self, window: WindowId) {
        if let Some(window) = self.windows.get_mut(&window) {
            window.closed = true;
            window.unload();
        }
    }
}

/// In-memory [`Environment`] with browser-like origin and DOM semantics.
pub struct MockEnvironment {
    this: Weak<MockEnvironment>,
    state: Mutex<MockState>,
    pages: Mutex<HashMap<String, Page>>,
}

impl MockEnvironment {
    /// A browser whose top-level page is loaded from `host_url`.
    pub fn new(host_url: &str) -> Result<Arc<Self>, url::ParseError> {
        let url = Url::parse(host_url)?;
        Ok(Arc::new_cyclic(|this| {
            let mut state = MockState {
                next: 0,
                host: WindowId(0),
                document: NodeId(0),
                body: NodeId(0),
                nodes: HashMap::new(),
                windows: HashMap::new(),
                observers: HashMap::new(),
                block_popups: false,
                focused: None,
            };
            let origin = origin_of(&url);
            state.host = state.add_window(Some(url), origin, None);
            state.document = state.add_node("#document");
            state.body = state.add_node("body");
            let (document, body) = (state.document, state.body);
            if let Some(node) = state.nodes.get_mut(&document) {
                node.children.push(body);
            }
            if let Some(node) = state.nodes.get_mut(&body) {
                node.parent = Some(document);
            }
            Self {
                this: this.clone(),
                state: Mutex::new(state),
                pages: Mutex::new(HashMap::new()),
            }
        }))
    }

    /// Register the page served at `url` (query and fragment are ignored).
    pub fn serve<F, Fut>(&self, url: &str, page: F) -> Result<(), url::ParseError>
    where
        F: Fn(ChildPage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let url = Url::parse(url)?;
        let handler: Page = Arc::new(move |child| -> PageFuture { Box::pin(page(child)) });
        self.pages.lock().insert(page_key(&url), handler);
        Ok(())
    }

    fn launch(&self, window: WindowId, url: &Url) {
        let page = self.pages.lock().get(&page_key(url)).cloned();
        let (Some(page), Some(env)) = (page, self.this.upgrade()) else {
            trace!(%url, "nothing served");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(%url, "no runtime, page not started");
            return;
        };
        debug!(?window, %url, "loading page");
        runtime.spawn(page(ChildPage {
            env,
            window,
            url: url.clone(),
        }));
    }

    fn notify(&self, target: NodeId, record: MutationRecord) {
        let callbacks = self.state.lock().observers_of(target);
        for callback in callbacks {
            callback(&record);
        }
    }

    // -------- test helpers --------

    pub fn body(&self) -> NodeId {
        self.state.lock().body
    }

    /// A detached element.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.state.lock().add_node(tag)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<(), EnvError> {
        {
            let mut state = self.state.lock();
            if !state.nodes.contains_key(&parent) {
                return Err(EnvError::NoSuchNode(parent));
            }
            let previous = match state.nodes.get_mut(&child) {
                Some(node) => node.parent.replace(parent),
                None => return Err(EnvError::NoSuchNode(child)),
            };
            if let Some(previous) = previous.and_then(|p| state.nodes.get_mut(&p)) {
                previous.children.retain(|c| *c != child);
            }
            if let Some(node) = state.nodes.get_mut(&parent) {
                node.children.push(child);
            }
        }
        self.notify(
            parent,
            MutationRecord {
                target: Some(parent),
                added: vec![child],
                removed: Vec::new(),
            },
        );
        Ok(())
    }

    /// Attach an open shadow root to `host` and return it.
    pub fn attach_shadow(&self, host: NodeId) -> Result<NodeId, EnvError> {
        let mut state = self.state.lock();
        if !state.nodes.contains_key(&host) {
            return Err(EnvError::NoSuchNode(host));
        }
        let root = state.add_node("#shadow-root");
        if let Some(node) = state.nodes.get_mut(&root) {
            node.host = Some(host);
        }
        if let Some(node) = state.nodes.get_mut(&host) {
            node.shadow_root = Some(root);
        }
        Ok(root)
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.state
            .lock()
            .nodes
            .get(&node)
            .map(|node| node.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, node: NodeId) -> Option<String> {
        self.state.lock().nodes.get(&node).map(|node| node.tag.clone())
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<String> {
        self.state
            .lock()
            .nodes
            .get(&node)
            .and_then(|node| node.attributes.get(name).cloned())
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        crate::watcher::is_connected(self, node)
    }

    pub fn frame_window(&self, element: NodeId) -> Option<WindowId> {
        self.state.lock().nodes.get(&element).and_then(|node| node.frame)
    }

    pub fn is_visible(&self, element: NodeId) -> bool {
        self.state
            .lock()
            .nodes
            .get(&element)
            .map_or(false, |node| node.visible)
    }

    pub fn frame_size(&self, element: NodeId) -> Option<Dimensions> {
        self.state.lock().nodes.get(&element).and_then(|node| node.size)
    }

    pub fn window_url(&self, window: WindowId) -> Option<Url> {
        self.state
            .lock()
            .windows
            .get(&window)
            .and_then(|window| window.url.clone())
    }

    pub fn window_geometry(&self, window: WindowId) -> Option<Geometry> {
        self.state
            .lock()
            .windows
            .get(&window)
            .and_then(|window| window.geometry)
    }

    /// Top-level and frame windows still open, host excluded.
    pub fn open_windows(&self) -> Vec<WindowId> {
        let state = self.state.lock();
        let mut open: Vec<WindowId> = state
            .windows
            .iter()
            .filter(|(id, window)| **id != state.host && !window.closed)
            .map(|(id, _)| *id)
            .collect();
        open.sort();
        open
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.state.lock().focused
    }

    /// Make every following `open_window` fail like a popup blocker would.
    pub fn set_block_popups(&self, block: bool) {
        self.state.lock().block_popups = block;
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().observers.len()
    }
}

impl Environment for MockEnvironment {
    fn host_window(&self) -> WindowId {
        self.state.lock().host
    }

    fn window_origin(&self, window: WindowId) -> Option<String> {
        self.state
            .lock()
            .open_window_origin(window)
            .map(str::to_string)
    }

    fn parent_window(&self, window: WindowId) -> Option<WindowId> {
        self.state
            .lock()
            .windows
            .get(&window)
            .and_then(|window| window.parent)
    }

    fn post_message(&self, source: WindowId, target: WindowId, data: String, target_origin: &str) {
        let mut state = self.state.lock();
        let origin = state
            .windows
            .get(&source)
            .map(|window| window.origin.clone())
            .unwrap_or_else(|| "null".to_string());
        let Some(window) = state.windows.get_mut(&target).filter(|window| !window.closed) else {
            trace!(?target, "post to closed window");
            return;
        };
        if target_origin != "*" && target_origin != window.origin {
            debug!(?target, %target_origin, actual = %window.origin, "target origin mismatch, message dropped");
            return;
        }
        let message = PostedMessage {
            source,
            origin,
            data,
        };
        window
            .listeners
            .retain(|listener| listener.send(message.clone()).is_ok());
    }

    fn listen(&self, window: WindowId) -> mpsc::UnboundedReceiver<PostedMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(window) = self
            .state
            .lock()
            .windows
            .get_mut(&window)
            .filter(|window| !window.closed)
        {
            window.listeners.push(tx);
        }
        rx
    }

    fn screen_size(&self) -> Dimensions {
        SCREEN
    }

    fn open_window(&self, options: &WindowOptions) -> Result<WindowId, EnvError> {
        let window = {
            let mut state = self.state.lock();
            if state.block_popups {
                return Err(EnvError::Blocked);
            }
            let origin = match &options.url {
                Some(url) => origin_of(url),
                None => state.host_origin(),
            };
            let opener = state.host;
            let window = state.add_window(options.url.clone(), origin, Some(opener));
            if let Some(entry) = state.windows.get_mut(&window) {
                entry.geometry = Some(options.geometry);
            }
            window
        };
        if let Some(url) = &options.url {
            self.launch(window, url);
        }
        Ok(window)
    }

    fn navigate(&self, window: WindowId, url: &Url) -> Result<(), EnvError> {
        {
            let mut state = self.state.lock();
            let Some(entry) = state.windows.get_mut(&window).filter(|entry| !entry.closed) else {
                return Err(EnvError::NoSuchWindow(window));
            };
            entry.unload();
            entry.url = Some(url.clone());
            entry.origin = origin_of(url);
        }
        self.launch(window, url);
        Ok(())
    }

    fn resize_window(
        &self,
        window: WindowId,
        geometry: &Geometry,
        relay: Option<WindowId>,
    ) -> Result<(), EnvError> {
        let mut state = self.state.lock();
        state.check_access(window, relay)?;
        if let Some(entry) = state.windows.get_mut(&window) {
            entry.geometry = Some(*geometry);
        }
        Ok(())
    }

    fn focus_window(&self, window: WindowId, relay: Option<WindowId>) -> Result<(), EnvError> {
        let mut state = self.state.lock();
        state.check_access(window, relay)?;
        state.focused = Some(window);
        Ok(())
    }

    fn close_window(&self, window: WindowId) {
        self.state.lock().close(window);
    }

    fn is_window_closed(&self, window: WindowId) -> bool {
        self.state
            .lock()
            .windows
            .get(&window)
            .map_or(true, |window| window.closed)
    }

    fn document(&self) -> NodeId {
        self.state.lock().document
    }

    fn parent_node(&self, node: NodeId) -> Option<NodeId> {
        self.state.lock().nodes.get(&node).and_then(|node| node.parent)
    }

    fn shadow_host(&self, node: NodeId) -> Option<NodeId> {
        self.state.lock().nodes.get(&node).and_then(|node| node.host)
    }

    fn observe(&self, root: NodeId, callback: MutationCallback) -> ObserverId {
        let mut state = self.state.lock();
        let id = ObserverId(state.next_id());
        state.observers.insert(id, (root, callback));
        id
    }

    fn disconnect(&self, observer: ObserverId) {
        self.state.lock().observers.remove(&observer);
    }

    fn create_frame(
        &self,
        container: NodeId,
        options: &FrameOptions,
    ) -> Result<HostedFrame, EnvError> {
        let frame = {
            let mut state = self.state.lock();
            if !state.nodes.contains_key(&container) {
                return Err(EnvError::NoSuchNode(container));
            }
            let parent = state.host;
            let window = state.add_window(Some(options.url.clone()), origin_of(&options.url), Some(parent));
            let element = state.add_node("iframe");
            if let Some(node) = state.nodes.get_mut(&element) {
                node.parent = Some(container);
                node.frame = Some(window);
                node.visible = !options.hidden;
                node.size = Some(options.dimensions);
                node.attributes.insert("name".into(), options.name.clone());
                node.attributes.insert("src".into(), options.url.to_string());
            }
            if let Some(node) = state.nodes.get_mut(&container) {
                node.children.push(element);
            }
            HostedFrame { element, window }
        };
        self.notify(
            container,
            MutationRecord {
                target: Some(container),
                added: vec![frame.element],
                removed: Vec::new(),
            },
        );
        self.launch(frame.window, &options.url);
        Ok(frame)
    }

    fn remove_node(&self, node: NodeId) {
        let parent = {
            let mut state = self.state.lock();
            let Some(parent) = state.nodes.get_mut(&node).and_then(|entry| entry.parent.take()) else {
                return;
            };
            if let Some(entry) = state.nodes.get_mut(&parent) {
                entry.children.retain(|child| *child != node);
            }
            let frames: Vec<WindowId> = state
                .subtree(node)
                .into_iter()
                .filter_map(|id| state.nodes.get(&id).and_then(|entry| entry.frame))
                .collect();
            for frame in frames {
                state.close(frame);
            }
            parent
        };
        self.notify(
            parent,
            MutationRecord {
                target: Some(parent),
                added: Vec::new(),
                removed: vec![node],
            },
        );
    }

    fn set_frame_size(&self, element: NodeId, dimensions: &Dimensions) -> Result<(), EnvError> {
        match self.state.lock().nodes.get_mut(&element) {
            Some(node) if node.frame.is_some() => {
                node.size = Some(*dimensions);
                Ok(())
            }
            _ => Err(EnvError::NoSuchNode(element)),
        }
    }

    fn set_visible(&self, element: NodeId, visible: bool) -> Result<(), EnvError> {
        match self.state.lock().nodes.get_mut(&element) {
            Some(node) => {
                node.visible = visible;
                Ok(())
            }
            None => Err(EnvError::NoSuchNode(element)),
        }
    }
}

/// A page loaded into a window of a [`MockEnvironment`].
#[derive(Clone)]
pub struct ChildPage {
    pub env: Arc<MockEnvironment>,
    pub window: WindowId,
    pub url: Url,
}

impl ChildPage {
    /// Run the child side of the handshake.
    pub async fn connect(&self) -> Result<ChildBridge, BridgeError> {
        self.connect_with_timeout(CHILD_TIMEOUT).await
    }

    pub async fn connect_with_timeout(&self, timeout: Duration) -> Result<ChildBridge, BridgeError> {
        let env: Arc<dyn Environment> = self.env.clone();
        ChildBridge::connect(env, self.window, &self.url, timeout).await
    }

    /// Listen without handshaking; see [`ChildBridge::attach`].
    pub fn attach(&self) -> Result<ChildBridge, BridgeError> {
        let env: Arc<dyn Environment> = self.env.clone();
        ChildBridge::attach(env, self.window, &self.url, CHILD_TIMEOUT)
    }

    /// Fail the parent's render without connecting.
    pub fn report_error(&self, message: &str) -> Result<(), BridgeError> {
        report_load_error(&*self.env, self.window, &self.url, message)
    }
}

fn page_key(url: &Url) -> String {
    format!("{}{}", origin_of(url), url.path())
}
