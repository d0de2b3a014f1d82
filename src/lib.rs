//! # crossframe
//!
//! A **cross-window component bridge**: a provider publishes a component that
//! runs in its own iframe or popup, on its own origin, and a host page embeds
//! it behind a declared contract of typed props in and callbacks out.
//!
//! - Host components in an **iframe** (inside a caller-supplied container) or a
//!   **popup** (with a hidden same-domain proxy window for resize/focus)
//! - Marshal props across the boundary, **including functions**, which stay on
//!   the parent and are called by id
//! - Drive every instance through one **lifecycle state machine**
//! - **Watch the DOM** so a component removed without `close()` still tears
//!   down, shadow DOM included
//!
//! ---
//!
//! ## How it fits together
//!
//! The browser is behind the [`Environment`] trait. Everything else is plain
//! Rust on tokio:
//!
//! 1. [`Bridge::create`] validates a [`ComponentConfig`] and returns a
//!    [`Component`] factory.
//! 2. [`Component::init`] validates a [`Props`] bag and returns an
//!    [`Instance`].
//! 3. [`Instance::render`] opens the hosting window with the child URL and
//!    waits for the child's `init` handshake, answered with the props.
//! 4. The child reads props, calls parent functions, exports values and
//!    methods ([`ChildBridge`]). The parent reads and calls them with
//!    [`Instance::get`] and [`Instance::invoke`].
//! 5. [`Instance::close`] or [`Instance::destroy`] (or the hosting element
//!    disappearing) tear everything down, firing `onClose` once.
//!
//! ### Trust boundary
//!
//! Every inbound message is checked against the window the instance was
//! rendered into **and** the component's declared domain. Anything else is
//! dropped silently and only shows up in `debug` logs. Outbound messages are
//! posted with the declared domain as target origin.
//!
//! ---
//!
//! ## Quick start (against the in-memory browser)
//!
//! ```no_run
//! use crossframe::{
//!     Bridge, BridgeConfig, ComponentConfig, MockEnvironment, PropDefinition, PropType, Props,
//! };
//! use serde_json::json;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let env = MockEnvironment::new("mock://host.com")?;
//!
//!     // The provider's page.
//!     env.serve("mock://child.com/login.htm", |page| async move {
//!         let Ok(child) = page.connect().await else { return };
//!         let _ = child.call("onLogin", vec![json!("alice")]).await;
//!         child.closed().await;
//!     })?;
//!
//!     let bridge = Bridge::new(env.clone(), BridgeConfig::default())?;
//!     let login = bridge.create(
//!         ComponentConfig::new("login")
//!             .url("/login.htm")
//!             .domain("mock://child.com")
//!             .prop("onLogin", PropDefinition::new(PropType::Function).required()),
//!     )?;
//!
//!     let instance = login.init(Props::new().with_fn("onLogin", |args| {
//!         println!("logged in as {}", args[0]);
//!         Ok(json!(null))
//!     }))?;
//!     instance.render(env.body()).await?;
//!     instance.destroy();
//!     Ok(())
//! }
//! ```
//!
//! Every prop must be declared with [`ComponentConfig::prop`]; only
//! `onRendered`, `onClose` and `onError` are declared implicitly.
//!
//! ---
//!
//! ## Configuration
//!
//! [`BridgeConfig`] holds the timeouts and, optionally, components to register
//! at startup. It loads from TOML:
//!
//! ```no_run
//! use crossframe::BridgeConfig;
//!
//! let config = BridgeConfig::load("crossframe.toml").unwrap();
//! assert!(config.call_timeout_ms > 0);
//! ```
//!
//! ---
//!
//! ## Logging
//!
//! The crate logs through `tracing`: transitions and discarded messages at
//! `debug`, failed callbacks and render failures at `warn`. Install any
//! subscriber to see them.
//!
//! ---
//!
//! ## Crate layout
//!
//! - [`bridge`]: the factory surface.
//! - [`lifecycle`]: per-instance state machine.
//! - [`props`], [`spec`]: contracts and their validation.
//! - [`envelope`]: wire format.
//! - [`window`], [`watcher`]: hosting windows and noticing they went away.
//! - [`child`]: the child window's side.
//! - [`env`], [`mock`]: the browser seam and its in-memory implementation.

pub mod bridge;
pub mod child;
pub mod config;
pub mod env;
pub mod envelope;
pub mod error;
pub mod lifecycle;
pub(crate) mod messenger;
#[cfg(feature = "mock")]
pub mod mock;
pub mod origin;
pub mod props;
pub(crate) mod registry;
pub mod spec;
pub mod watcher;
pub mod window;

// -------- Factory re-exports --------

#[doc(inline)]
pub use bridge::{Bridge, Component};
#[doc(inline)]
pub use config::BridgeConfig;
#[doc(inline)]
pub use error::BridgeError;
#[doc(inline)]
pub use lifecycle::{Instance, LifecycleState};
#[doc(inline)]
pub use props::{Callback, PropDefinition, PropType, Props};
#[doc(inline)]
pub use spec::ComponentConfig;

// -------- Environment re-exports --------

#[doc(inline)]
pub use child::ChildBridge;
#[doc(inline)]
pub use env::{Environment, NodeId, WindowId};
#[cfg(feature = "mock")]
#[doc(inline)]
pub use mock::MockEnvironment;
#[doc(inline)]
pub use window::{Context, Dimensions, RenderTarget, WindowHandle};
