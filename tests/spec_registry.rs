mod common;

use common::*;
use crossframe::child::{INSTANCE_PARAM, PARENT_PARAM};
use crossframe::origin::Domain;
use crossframe::spec::{ComponentSpec, UrlResolver};
use crossframe::{BridgeError, ComponentConfig, LifecycleState, PropDefinition, PropType, Props};

fn spec_error(config: ComponentConfig) -> String {
    match ComponentSpec::from_config(config) {
        Err(BridgeError::SpecValidation { reason, .. }) => reason,
        Err(other) => panic!("expected a spec error, got {other}"),
        Ok(spec) => panic!("expected a spec error, got {spec:?}"),
    }
}

#[test]
fn rejects_malformed_component_definitions() {
    spec_error(ComponentConfig::new("Bad Tag").url("mock://child.com/a.htm"));
    spec_error(ComponentConfig::new("no-url"));
    spec_error(
        ComponentConfig::new("both")
            .url("mock://child.com/a.htm")
            .url_fn(|_| "/a.htm".to_string()),
    );
    spec_error(ComponentConfig::new("relative").url("/a.htm"));
    spec_error(
        ComponentConfig::new("mismatch")
            .url("mock://child.com/a.htm")
            .domain("mock://other.com"),
    );
    spec_error(
        ComponentConfig::new("zero")
            .url("mock://child.com/a.htm")
            .dimensions(0, 100),
    );
    spec_error(
        ComponentConfig::new("bad-default")
            .url("mock://child.com/a.htm")
            .prop("n", PropDefinition::new(PropType::Number).with_default("three")),
    );
    spec_error(
        ComponentConfig::new("fn-default")
            .url("mock://child.com/a.htm")
            .prop("f", PropDefinition::new(PropType::Function).with_default(1)),
    );
    spec_error(
        ComponentConfig::new("object-query")
            .url("mock://child.com/a.htm")
            .prop("o", PropDefinition::new(PropType::Object).query_param()),
    );
    let reason = spec_error(
        ComponentConfig::new("reserved")
            .url("mock://child.com/a.htm")
            .prop("onClose", PropDefinition::new(PropType::String)),
    );
    assert!(reason.contains("onClose"));

    for param in [INSTANCE_PARAM, PARENT_PARAM] {
        let reason = spec_error(
            ComponentConfig::new("handshake-param")
                .url("mock://child.com/a.htm")
                .prop(param, PropDefinition::new(PropType::String).query_param()),
        );
        assert!(reason.contains(param));
    }
}

#[test]
fn domain_is_derived_or_declared() {
    let spec = ComponentSpec::from_config(ComponentConfig::new("abs").url("mock://child.com/a.htm"))
        .expect("spec");
    assert_eq!(spec.domain, Domain::Exact("mock://child.com".to_string()));

    let spec = ComponentSpec::from_config(
        ComponentConfig::new("rel")
            .url("/a.htm")
            .domain("mock://child.com/ignored/path"),
    )
    .expect("spec");
    assert_eq!(spec.domain, Domain::Exact("mock://child.com".to_string()));

    let spec = ComponentSpec::from_config(ComponentConfig::new("any").url_fn(|_| "mock://x.com/".into()))
        .expect("spec");
    assert_eq!(spec.domain, Domain::Any);

    let spec = ComponentSpec::from_config(ComponentConfig::new("builtins").url("mock://child.com/"))
        .expect("spec");
    for builtin in ["onRendered", "onClose", "onError"] {
        assert_eq!(spec.props[builtin].prop_type, PropType::Function);
    }
}

#[tokio::test]
async fn tags_are_unique_per_bridge() {
    let (_env, bridge) = setup();
    bridge.create(t1()).expect("create");
    let err = bridge.create(t1()).expect_err("duplicate");
    assert!(matches!(err, BridgeError::SpecValidation { .. }));

    bridge
        .create(ComponentConfig::new("t2").url("mock://child.com/two.htm"))
        .expect("create");
    assert_eq!(bridge.specs().tags(), vec!["t1".to_string(), "t2".to_string()]);
    assert_eq!(bridge.component("t2").map(|c| c.tag().to_string()), Some("t2".to_string()));
    assert!(bridge.component("t3").is_none());

    assert!(bridge.specs().unregister("t1"));
    bridge.create(t1()).expect("tag is free again");
}

#[tokio::test]
async fn resolved_url_must_stay_on_the_domain() {
    let (env, bridge) = setup();
    serve_child(&env);
    let instance = bridge
        .create(
            ComponentConfig::new("escape")
                .url_fn(|_| "mock://evil.com/child.htm".to_string())
                .domain(CHILD_DOMAIN),
        )
        .expect("create")
        .init(Props::new())
        .expect("init");

    let err = instance.render(container(&env)).await.expect_err("render");
    assert!(matches!(err, BridgeError::Url { .. }));
    assert_eq!(instance.state(), LifecycleState::Closed);
    assert!(env.open_windows().is_empty());
}

#[tokio::test]
async fn async_resolver_sees_the_props() {
    let (env, bridge) = setup();
    serve_child(&env);
    let resolver = UrlResolver::new(|props| {
        let page = props
            .get("page")
            .and_then(|value| value.as_str())
            .unwrap_or("missing")
            .to_string();
        Box::pin(async move {
            tokio::task::yield_now().await;
            if page == "child" {
                Ok(format!("/{page}.htm"))
            } else {
                Err(format!("no page `{page}`"))
            }
        })
    });
    let component = bridge
        .create(
            ComponentConfig::new("routed")
                .url_resolver(resolver)
                .domain(CHILD_DOMAIN)
                .prop("page", PropDefinition::new(PropType::String).required()),
        )
        .expect("create");

    let good = component
        .init(Props::new().with("page", "child"))
        .expect("init");
    good.render(container(&env)).await.expect("render");
    let window = good.window().expect("window").window();
    assert_eq!(env.window_url(window).expect("url").path(), "/child.htm");
    good.destroy();

    let bad = component.init(Props::new().with("page", "nope")).expect("init");
    let err = bad.render(container(&env)).await.expect_err("render");
    assert_eq!(
        err,
        BridgeError::Url {
            reason: "no page `nope`".to_string()
        }
    );
}
