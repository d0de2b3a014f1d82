mod common;

use std::time::Duration;

use common::*;
use crossframe::window::Geometry;
use crossframe::{BridgeError, Context, Dimensions, Environment, LifecycleState, Props, WindowHandle};

#[tokio::test]
async fn popup_opens_with_a_same_origin_proxy() {
    let (env, bridge) = setup();
    serve_child(&env);
    let rendered = Recorder::new();
    let instance = bridge
        .create(t1().context(Context::Popup).dimensions(400, 300))
        .expect("create")
        .init(Props::new().with_fn("onRendered", rendered.callback()))
        .expect("init");

    instance.render_popup().await.expect("render");
    assert_eq!(rendered.count(), 1);

    let Some(WindowHandle::Popup { window, proxy: Some(proxy) }) = instance.window() else {
        panic!("expected a popup with a proxy, got {:?}", instance.window());
    };
    assert_eq!(env.open_windows(), vec![proxy, window]);
    assert_eq!(env.window_origin(proxy).as_deref(), Some(HOST));
    assert_eq!(env.window_origin(window).as_deref(), Some(CHILD_DOMAIN));
    assert_eq!(
        env.window_geometry(window),
        Some(Geometry::centered(
            Dimensions::new(400, 300),
            env.screen_size()
        ))
    );
    assert!(instance.hosted_element().is_none());

    assert_eq!(instance.get("title").await, Ok(serde_json::json!("hello from child")));

    instance.destroy();
    assert!(env.is_window_closed(window));
    assert!(env.is_window_closed(proxy));
    assert!(env.open_windows().is_empty());
}

#[tokio::test]
async fn default_context_decides_where_render_goes() {
    let (env, bridge) = setup();
    serve_child(&env);
    let instance = bridge
        .create(t1().context(Context::Popup))
        .expect("create")
        .init(Props::new())
        .expect("init");
    let container = container(&env);

    instance.render(container).await.expect("render");

    assert!(matches!(instance.window(), Some(WindowHandle::Popup { .. })));
    assert!(env.children(container).is_empty());
    instance.destroy();
}

#[tokio::test]
async fn resize_and_focus_are_relayed_through_the_proxy() {
    let (env, bridge) = setup();
    serve_child(&env);
    let instance = bridge
        .create(t1())
        .expect("create")
        .init(Props::new())
        .expect("init");
    instance.render_popup().await.expect("render");
    let window = instance.window().expect("window").window();

    instance.resize(800, 600).expect("resize");
    assert_eq!(
        env.window_geometry(window),
        Some(Geometry::centered(
            Dimensions::new(800, 600),
            env.screen_size()
        ))
    );

    instance.focus().expect("focus");
    assert_eq!(env.focused_window(), Some(window));

    instance.destroy();
}

#[tokio::test]
async fn without_proxy_cross_origin_resize_is_denied() {
    let (env, bridge) = setup();
    serve_child(&env);
    let instance = bridge
        .create(t1().popup_proxy(false))
        .expect("create")
        .init(Props::new())
        .expect("init");
    instance.render_popup().await.expect("render");
    assert!(matches!(
        instance.window(),
        Some(WindowHandle::Popup { proxy: None, .. })
    ));

    let err = instance.resize(800, 600).expect_err("denied");
    assert!(matches!(err, BridgeError::Window { .. }));
    assert_eq!(instance.state(), LifecycleState::Active);

    instance.destroy();
}

#[tokio::test]
async fn blocked_popup_fails_render() {
    let (env, bridge) = setup();
    serve_child(&env);
    env.set_block_popups(true);
    let closed = Recorder::new();
    let instance = bridge
        .create(t1())
        .expect("create")
        .init(Props::new().with_fn("onClose", closed.callback()))
        .expect("init");

    let err = instance.render_popup().await.expect_err("blocked");
    assert!(matches!(err, BridgeError::WindowCreation { .. }));
    assert_eq!(instance.state(), LifecycleState::Closed);
    assert!(env.open_windows().is_empty());
    assert_eq!(bridge.bound_instances(), 0);

    instance.destroy();
    assert_eq!(closed.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn user_closing_the_popup_closes_the_instance() {
    let (env, bridge) = setup();
    serve_child(&env);
    let closed = Recorder::new();
    let instance = bridge
        .create(t1())
        .expect("create")
        .init(Props::new().with_fn("onClose", closed.callback()))
        .expect("init");
    instance.render_popup().await.expect("render");
    let Some(WindowHandle::Popup { window, proxy }) = instance.window() else {
        panic!("expected a popup");
    };

    env.close_window(window);
    tokio::time::sleep(bridge.config().popup_poll_interval() * 3).await;

    assert_eq!(closed.count(), 1);
    assert_eq!(instance.state(), LifecycleState::Closed);
    if let Some(proxy) = proxy {
        assert!(env.is_window_closed(proxy));
    }

    instance.destroy();
    assert_eq!(closed.count(), 1);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(closed.count(), 1);
}
