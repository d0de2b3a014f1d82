mod common;

use common::*;
use crossframe::{BridgeError, ComponentConfig, PropDefinition, PropType, Props};
use serde_json::{json, Value};

fn profile() -> ComponentConfig {
    t1().prop("user", PropDefinition::new(PropType::String).required().query_param())
        .prop("age", PropDefinition::new(PropType::Number).query_param())
        .prop("size", PropDefinition::new(PropType::Number).with_default(3))
        .prop("tags", PropDefinition::new(PropType::Array))
        .prop("onSave", PropDefinition::new(PropType::Function))
}

fn assert_prop_error(result: Result<crossframe::Instance, BridgeError>, expected: &str) {
    match result {
        Err(BridgeError::PropValidation { prop, .. }) => assert_eq!(prop, expected),
        other => panic!("expected a prop error for `{expected}`, got {other:?}"),
    }
}

#[tokio::test]
async fn rejects_bad_props_before_anything_opens() {
    let (env, bridge) = setup();
    let component = bridge.create(profile()).expect("create");

    assert_prop_error(component.init(Props::new()), "user");
    assert_prop_error(component.init(Props::new().with("user", Value::Null)), "user");
    assert_prop_error(component.init(Props::new().with("user", 7)), "user");
    assert_prop_error(
        component.init(Props::new().with_fn("user", |_| Ok(Value::Null))),
        "user",
    );
    assert_prop_error(
        component.init(Props::new().with("user", "bob").with("bogus", 1)),
        "bogus",
    );
    assert_prop_error(
        component.init(Props::new().with("user", "bob").with("tags", json!({}))),
        "tags",
    );
    assert_prop_error(
        component.init(Props::new().with("user", "bob").with("onSave", "not a function")),
        "onSave",
    );
    assert_prop_error(
        component.init(Props::new().with("user", "bob").with("onClose", true)),
        "onClose",
    );

    assert!(env.open_windows().is_empty());
    assert_eq!(bridge.bound_instances(), 0);
}

#[tokio::test]
async fn defaults_fill_absent_and_null_props() {
    let (_env, bridge) = setup();
    let component = bridge.create(profile()).expect("create");

    let instance = component
        .init(Props::new().with("user", "bob").with("size", Value::Null))
        .expect("init");
    let props = instance.props();
    assert_eq!(props.get("size"), Some(&json!(3)));
    assert_eq!(props.get("user"), Some(&json!("bob")));
    assert!(!props.contains_key("age"));
    assert!(!props.contains_key("onSave"));

    let instance = component
        .init(Props::new().with("user", "bob").with("size", 10))
        .expect("init");
    assert_eq!(instance.props().get("size"), Some(&json!(10)));
}

#[tokio::test]
async fn query_params_are_appended_to_the_child_url() {
    let (env, bridge) = setup();
    serve_child(&env);
    let instance = bridge
        .create(profile())
        .expect("create")
        .init(
            Props::new()
                .with("user", "bob smith")
                .with("age", 42)
                .with("tags", json!(["a"])),
        )
        .expect("init");
    instance.render(container(&env)).await.expect("render");

    let window = instance.window().expect("window").window();
    let url = env.window_url(window).expect("url");
    let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert!(query.contains(&("user".to_string(), "bob smith".to_string())));
    assert!(query.contains(&("age".to_string(), "42".to_string())));
    assert!(!query.iter().any(|(key, _)| key == "tags" || key == "size"));

    instance.destroy();
}

#[tokio::test]
async fn every_function_prop_gets_its_own_reference() {
    let (_env, bridge) = setup();
    let component = bridge.create(profile()).expect("create");
    let first = component
        .init(
            Props::new()
                .with("user", "a")
                .with_fn("onSave", |_| Ok(Value::Null))
                .with_fn("onClose", |_| Ok(Value::Null)),
        )
        .expect("init");

    let on_save = crossframe::props::function_id(&first.props()["onSave"]).expect("ref");
    let on_close = crossframe::props::function_id(&first.props()["onClose"]).expect("ref");
    assert_ne!(on_save, on_close);
    assert!(!first.props().contains_key("onRendered"));
}
