use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::env::{EnvError, Environment, FrameOptions, NodeId, WindowId, WindowOptions};
use crate::error::BridgeError;

const DEFAULT_WIDTH: u32 = 300;
const DEFAULT_HEIGHT: u32 = 150;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

/// Position and size of a top-level window, in screen pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    /// Centre a window of `size` on a screen of `screen`.
    pub fn centered(size: Dimensions, screen: Dimensions) -> Self {
        let left = (i64::from(screen.width) - i64::from(size.width)) / 2;
        let top = (i64::from(screen.height) - i64::from(size.height)) / 2;
        Self {
            left: left.max(0) as i32,
            top: top.max(0) as i32,
            width: size.width,
            height: size.height,
        }
    }

    fn hidden() -> Self {
        Self {
            left: 0,
            top: 0,
            width: 1,
            height: 1,
        }
    }
}

/// Where a component renders when the caller does not say otherwise.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    #[default]
    Iframe,
    Popup,
}

/// Where a particular render goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderTarget {
    Iframe { container: NodeId },
    Popup,
}

/// The window hosting one component instance. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowHandle {
    Frame {
        element: NodeId,
        container: NodeId,
        window: WindowId,
    },
    Popup {
        window: WindowId,
        /// Hidden same-domain window kept open to relay resize/focus after the
        /// popup navigates cross-origin.
        proxy: Option<WindowId>,
    },
}

impl WindowHandle {
    pub fn window(&self) -> WindowId {
        match self {
            Self::Frame { window, .. } | Self::Popup { window, .. } => *window,
        }
    }

    pub fn element(&self) -> Option<NodeId> {
        match self {
            Self::Frame { element, .. } => Some(*element),
            Self::Popup { .. } => None,
        }
    }
}

/// Creates, resizes and tears down the windows hosting components.
pub struct WindowHost {
    env: Arc<dyn Environment>,
}

impl WindowHost {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self { env }
    }

    /// Open the hosting window for `url`.
    ///
    /// Iframes start hidden and are shown once the child completes its
    /// handshake. Popups are opened blank first so that the optional proxy and
    /// the popup exist before any cross-origin navigation happens.
    pub fn open(
        &self,
        target: &RenderTarget,
        url: &Url,
        name: &str,
        dimensions: Dimensions,
        use_proxy: bool,
    ) -> Result<WindowHandle, BridgeError> {
        match *target {
            RenderTarget::Iframe { container } => {
                let options = FrameOptions {
                    url: url.clone(),
                    name: name.to_string(),
                    dimensions,
                    hidden: true,
                };
                let frame = self
                    .env
                    .create_frame(container, &options)
                    .map_err(creation_error)?;
                debug!(element = ?frame.element, window = ?frame.window, %url, "iframe created");
                Ok(WindowHandle::Frame {
                    element: frame.element,
                    container,
                    window: frame.window,
                })
            }
            RenderTarget::Popup => self.open_popup(url, name, dimensions, use_proxy),
        }
    }

    fn open_popup(
        &self,
        url: &Url,
        name: &str,
        dimensions: Dimensions,
        use_proxy: bool,
    ) -> Result<WindowHandle, BridgeError> {
        let proxy = if use_proxy {
            let options = WindowOptions {
                url: None,
                name: format!("{name}__proxy"),
                geometry: Geometry::hidden(),
                hidden: true,
            };
            Some(self.env.open_window(&options).map_err(creation_error)?)
        } else {
            None
        };

        let options = WindowOptions {
            url: None,
            name: name.to_string(),
            geometry: Geometry::centered(dimensions, self.env.screen_size()),
            hidden: false,
        };
        let window = match self.env.open_window(&options) {
            Ok(window) => window,
            Err(err) => {
                if let Some(proxy) = proxy {
                    self.env.close_window(proxy);
                }
                return Err(creation_error(err));
            }
        };

        if let Err(err) = self.env.navigate(window, url) {
            self.env.close_window(window);
            if let Some(proxy) = proxy {
                self.env.close_window(proxy);
            }
            return Err(creation_error(err));
        }

        debug!(?window, ?proxy, %url, "popup opened");
        Ok(WindowHandle::Popup { window, proxy })
    }

    /// Best-effort teardown; the window may already be gone.
    pub fn close(&self, handle: &WindowHandle) {
        match *handle {
            WindowHandle::Frame { element, .. } => self.env.remove_node(element),
            WindowHandle::Popup { window, proxy } => {
                self.env.close_window(window);
                if let Some(proxy) = proxy {
                    self.env.close_window(proxy);
                }
            }
        }
    }

    pub fn resize(&self, handle: &WindowHandle, dimensions: Dimensions) -> Result<(), BridgeError> {
        let result = match *handle {
            WindowHandle::Frame { element, .. } => self.env.set_frame_size(element, &dimensions),
            WindowHandle::Popup { window, proxy } => {
                let geometry = Geometry::centered(dimensions, self.env.screen_size());
                self.env.resize_window(window, &geometry, proxy)
            }
        };
        result.map_err(|err| BridgeError::Window {
            reason: format!("resize failed: {err}"),
        })
    }

    pub fn show(&self, handle: &WindowHandle) {
        if let WindowHandle::Frame { element, .. } = *handle {
            if let Err(err) = self.env.set_visible(element, true) {
                warn!(?element, error = %err, "could not show frame");
            }
        }
    }

    pub fn focus(&self, handle: &WindowHandle) -> Result<(), BridgeError> {
        match *handle {
            WindowHandle::Frame { .. } => Ok(()),
            WindowHandle::Popup { window, proxy } => {
                self.env
                    .focus_window(window, proxy)
                    .map_err(|err| BridgeError::Window {
                        reason: format!("focus failed: {err}"),
                    })
            }
        }
    }
}

fn creation_error(err: EnvError) -> BridgeError {
    BridgeError::WindowCreation {
        reason: err.to_string(),
    }
}
