mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use crossframe::env::WindowOptions;
use crossframe::envelope::{Envelope, EVENT_CLOSE};
use crossframe::window::Geometry;
use crossframe::{BridgeError, Environment, LifecycleState, Props};
use serde_json::json;
use url::Url;

fn open_rogue(env: &crossframe::MockEnvironment) -> crossframe::WindowId {
    env.open_window(&WindowOptions {
        url: Some(Url::parse("mock://child.com/rogue.htm").expect("url")),
        name: "rogue".to_string(),
        geometry: Geometry {
            left: 0,
            top: 0,
            width: 10,
            height: 10,
        },
        hidden: false,
    })
    .expect("rogue window")
}

fn post(env: &crossframe::MockEnvironment, from: crossframe::WindowId, envelope: &Envelope) {
    let data = envelope.encode().expect("encode");
    env.post_message(from, env.host_window(), data, "*");
}

#[tokio::test]
async fn messages_from_other_windows_are_ignored() {
    let (env, bridge) = setup();
    serve_silent_child(&env);
    let closed = Recorder::new();
    let instance = bridge
        .create(t1())
        .expect("create")
        .init(Props::new().with_fn("onClose", closed.callback()))
        .expect("init");
    instance.render(container(&env)).await.expect("render");

    let pending = {
        let instance = instance.clone();
        tokio::spawn(async move { instance.get("title").await })
    };
    settle().await;
    assert_eq!(bridge.pending_calls(), 1);

    // Same origin as the component, wrong window.
    let rogue = open_rogue(&env);
    post(&env, rogue, &Envelope::lifecycle(instance.id(), EVENT_CLOSE, None));
    for n in 0..4 {
        let call_id = format!("call-{n}");
        post(&env, rogue, &Envelope::method_result(instance.id(), &call_id, json!("forged")));
        post(&env, rogue, &Envelope::error(instance.id(), Some(&call_id), "forged"));
    }
    env.post_message(rogue, env.host_window(), "not json".to_string(), "*");
    settle().await;

    assert_eq!(instance.state(), LifecycleState::Active);
    assert_eq!(closed.count(), 0);
    assert_eq!(bridge.pending_calls(), 1);
    assert!(!pending.is_finished());

    instance.destroy();
    let err = pending.await.expect("join").expect_err("swept");
    assert!(matches!(err, BridgeError::InstanceDestroyed { .. }));
}

#[tokio::test]
async fn responses_are_scoped_to_their_instance() {
    let (env, bridge) = setup();
    serve_child(&env);
    let component = bridge.create(t1()).expect("create");
    let first = component.init(Props::new()).expect("init");
    let second = component.init(Props::new()).expect("init");
    first.render(container(&env)).await.expect("render");
    second.render(container(&env)).await.expect("render");

    // The second child's window cannot act for the first instance.
    let second_window = second.window().expect("window").window();
    post(&env, second_window, &Envelope::lifecycle(first.id(), EVENT_CLOSE, None));
    settle().await;
    assert_eq!(first.state(), LifecycleState::Active);

    let (a, b) = tokio::join!(
        first.invoke("echo", vec![json!("first")]),
        second.invoke("echo", vec![json!("second")]),
    );
    assert_eq!(a, Ok(json!(["first"])));
    assert_eq!(b, Ok(json!(["second"])));

    first.destroy();
    second.destroy();
}

#[tokio::test(start_paused = true)]
async fn handshake_from_the_wrong_origin_is_dropped() {
    let (env, bridge) = setup();
    // The child window is navigated away before it announces itself.
    env.serve(CHILD_URL, |page| async move {
        let mut evil = Url::parse("mock://evil.com/child.htm").expect("url");
        evil.set_query(page.url.query());
        let _ = page.env.navigate(page.window, &evil);
    })
    .expect("serve");
    env.serve("mock://evil.com/child.htm", |page| async move {
        let _ = page.connect().await;
    })
    .expect("serve");

    let rendered = Recorder::new();
    let instance = bridge
        .create(t1())
        .expect("create")
        .init(Props::new().with_fn("onRendered", rendered.callback()))
        .expect("init");

    let err = instance.render(container(&env)).await.expect_err("render");
    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert_eq!(rendered.count(), 0);
    assert_eq!(instance.state(), LifecycleState::Closed);
}

#[tokio::test(start_paused = true)]
async fn messages_are_not_delivered_once_the_child_leaves_the_domain() {
    let (env, bridge) = setup();
    let received = Arc::new(AtomicUsize::new(0));
    env.serve(CHILD_URL, |page| async move {
        let Ok(child) = page.connect().await else { return };
        drop(child);
        let evil = Url::parse("mock://evil.com/steal.htm").expect("url");
        let _ = page.env.navigate(page.window, &evil);
    })
    .expect("serve");
    {
        let received = received.clone();
        env.serve("mock://evil.com/steal.htm", move |page| {
            let received = received.clone();
            async move {
                let mut inbox = page.env.listen(page.window);
                while inbox.recv().await.is_some() {
                    received.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .expect("serve");
    }

    let instance = bridge
        .create(t1())
        .expect("create")
        .init(Props::new())
        .expect("init");
    instance.render(container(&env)).await.expect("render");
    settle().await;

    let err = instance.get("title").await.expect_err("nobody answers");
    assert!(matches!(err, BridgeError::Timeout { .. }));
    assert_eq!(received.load(Ordering::SeqCst), 0);

    instance.destroy();
}
