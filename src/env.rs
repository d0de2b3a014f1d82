//! The host environment seam.
//!
//! Everything the bridge needs from a browser goes through [`Environment`]:
//! window creation, `postMessage`-style delivery, and enough of the DOM to
//! watch a hosted element. Implementations must apply browser semantics:
//!
//! - `post_message` drops the message when `target_origin` is neither `*` nor
//!   the target window's current origin, and stamps the source window's origin
//!   on delivery.
//! - `observe` reports mutations within the observed root's tree only; it does
//!   not see into shadow roots attached below it.
//! - `resize_window`/`focus_window` on a window whose origin differs from the
//!   host page fail with [`EnvError::AccessDenied`] unless relayed through a
//!   same-origin window.
//! - A page loaded into a new window must not run before the task that
//!   created the window yields, as in a browser event loop.

use std::sync::Arc;

use tokio::sync::mpsc;
use url::Url;

use crate::window::{Dimensions, Geometry};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(pub u64);

/// A message as delivered to a window's listeners.
#[derive(Clone, Debug)]
pub struct PostedMessage {
    pub source: WindowId,
    pub origin: String,
    pub data: String,
}

/// One batch of child-list changes under an observed root.
#[derive(Clone, Debug, Default)]
pub struct MutationRecord {
    pub target: Option<NodeId>,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

pub type MutationCallback = Arc<dyn Fn(&MutationRecord) + Send + Sync>;

/// Options for an iframe created inside a container.
#[derive(Clone, Debug)]
pub struct FrameOptions {
    pub url: Url,
    pub name: String,
    pub dimensions: Dimensions,
    pub hidden: bool,
}

/// A freshly created iframe element and the window it hosts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostedFrame {
    pub element: NodeId,
    pub window: WindowId,
}

/// Options for a top-level window. `url: None` opens a blank same-origin
/// document that can be navigated later.
#[derive(Clone, Debug)]
pub struct WindowOptions {
    pub url: Option<Url>,
    pub name: String,
    pub geometry: Geometry,
    pub hidden: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EnvError {
    #[error("window creation was blocked")]
    Blocked,
    #[error("no such node: {0:?}")]
    NoSuchNode(NodeId),
    #[error("no such window: {0:?}")]
    NoSuchWindow(WindowId),
    #[error("access denied to cross-origin window {0:?}")]
    AccessDenied(WindowId),
}

pub trait Environment: Send + Sync + 'static {
    // -------- windows & messaging --------

    /// The window of the page embedding components.
    fn host_window(&self) -> WindowId;
    fn window_origin(&self, window: WindowId) -> Option<String>;
    /// `window.parent` for frames, `window.opener` for popups.
    fn parent_window(&self, window: WindowId) -> Option<WindowId>;
    fn post_message(&self, source: WindowId, target: WindowId, data: String, target_origin: &str);
    /// Subscribe to messages delivered to `window`. The channel closes when the
    /// window closes or navigates away.
    fn listen(&self, window: WindowId) -> mpsc::UnboundedReceiver<PostedMessage>;
    fn screen_size(&self) -> Dimensions;

    fn open_window(&self, options: &WindowOptions) -> Result<WindowId, EnvError>;
    fn navigate(&self, window: WindowId, url: &Url) -> Result<(), EnvError>;
    fn resize_window(
        &self,
        window: WindowId,
        geometry: &Geometry,
        relay: Option<WindowId>,
    ) -> Result<(), EnvError>;
    fn focus_window(&self, window: WindowId, relay: Option<WindowId>) -> Result<(), EnvError>;
    fn close_window(&self, window: WindowId);
    fn is_window_closed(&self, window: WindowId) -> bool;

    // -------- DOM --------

    fn document(&self) -> NodeId;
    fn parent_node(&self, node: NodeId) -> Option<NodeId>;
    /// For a shadow root, the element hosting it.
    fn shadow_host(&self, node: NodeId) -> Option<NodeId>;
    fn observe(&self, root: NodeId, callback: MutationCallback) -> ObserverId;
    fn disconnect(&self, observer: ObserverId);

    fn create_frame(
        &self,
        container: NodeId,
        options: &FrameOptions,
    ) -> Result<HostedFrame, EnvError>;
    /// Detach `node` from its parent. Frames in the removed subtree unload.
    fn remove_node(&self, node: NodeId);
    fn set_frame_size(&self, element: NodeId, dimensions: &Dimensions) -> Result<(), EnvError>;
    fn set_visible(&self, element: NodeId, visible: bool) -> Result<(), EnvError>;
}
