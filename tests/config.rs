mod common;

use std::io::Write;
use std::time::Duration;

use common::*;
use crossframe::{Bridge, BridgeConfig, BridgeError, Context, PropType, Props};
use tempfile::NamedTempFile;

const SAMPLE: &str = r#"
call_timeout_ms = 2500

[[component]]
tag = "login"
url = "mock://child.com/child.htm"
context = "popup"
dimensions = { width = 200, height = 40 }

[component.props.label]
type = "string"
required = true
query_param = true

[[component]]
tag = "banner"
url = "/child.htm"
domain = "mock://child.com"
popup_proxy = false
"#;

#[test]
fn parses_components_and_fills_defaults() {
    let config = BridgeConfig::from_toml_str(SAMPLE).expect("config");
    assert_eq!(config.call_timeout(), Duration::from_millis(2500));
    assert_eq!(config.render_timeout(), BridgeConfig::default().render_timeout());
    assert_eq!(config.popup_poll_interval(), Duration::from_millis(100));

    assert_eq!(config.components.len(), 2);
    let login = &config.components[0];
    assert_eq!(login.tag, "login");
    assert_eq!(login.context, Context::Popup);
    assert_eq!(login.dimensions, crossframe::Dimensions::new(200, 40));
    assert!(login.popup_proxy);
    let label = &login.props["label"];
    assert_eq!(label.prop_type, PropType::String);
    assert!(label.required && label.query_param);

    let banner = &config.components[1];
    assert_eq!(banner.context, Context::Iframe);
    assert!(!banner.popup_proxy);
}

#[test]
fn rejects_invalid_files() {
    assert!(matches!(
        BridgeConfig::from_toml_str("call_timeout_ms = 0"),
        Err(BridgeError::Config { .. })
    ));
    assert!(matches!(
        BridgeConfig::from_toml_str("call_timeout_ms = \"soon\""),
        Err(BridgeError::Config { .. })
    ));
    assert!(matches!(
        BridgeConfig::from_toml_str("[[component]]\nurl = \"mock://a.com/\""),
        Err(BridgeError::Config { .. })
    ));
    assert!(matches!(
        BridgeConfig::load("/definitely/not/here.toml"),
        Err(BridgeError::Config { .. })
    ));
}

#[test]
fn loads_from_disk() {
    let mut file = NamedTempFile::new().expect("tempfile");
    file.write_all(SAMPLE.as_bytes()).expect("write");

    let config = BridgeConfig::load(file.path()).expect("load");
    assert_eq!(config.call_timeout_ms, 2500);
    assert_eq!(config.components.len(), 2);
}

#[tokio::test]
async fn bridge_registers_configured_components() {
    let config = BridgeConfig::from_toml_str(SAMPLE).expect("config");
    let (env, bridge) = setup_with(config);
    serve_child(&env);
    assert_eq!(bridge.specs().tags(), vec!["banner".to_string(), "login".to_string()]);

    let banner = bridge.component("banner").expect("banner");
    let instance = banner.init(Props::new()).expect("init");
    instance.render(container(&env)).await.expect("render");
    assert!(instance.hosted_element().is_some());
    instance.destroy();

    let login = bridge.component("login").expect("login");
    assert!(login.init(Props::new()).is_err(), "label is required");
    let instance = login.init(Props::new().with("label", "hi")).expect("init");
    instance.render(container(&env)).await.expect("render");
    assert!(instance.hosted_element().is_none(), "login renders as a popup");
    instance.destroy();
}

#[tokio::test]
async fn bridge_refuses_invalid_configured_components() {
    init_tracing();
    let config = BridgeConfig::from_toml_str("[[component]]\ntag = \"rel\"\nurl = \"/child.htm\"")
        .expect("config parses");
    let env = crossframe::MockEnvironment::new(HOST).expect("env");
    let err = Bridge::new(env, config).err().expect("invalid component");
    assert!(matches!(err, BridgeError::SpecValidation { .. }));
}

#[tokio::test]
async fn bridge_refuses_zero_durations_built_in_code() {
    init_tracing();
    for config in [
        BridgeConfig {
            popup_poll_interval_ms: 0,
            ..BridgeConfig::default()
        },
        BridgeConfig {
            call_timeout_ms: 0,
            ..BridgeConfig::default()
        },
        BridgeConfig {
            render_timeout_ms: 0,
            ..BridgeConfig::default()
        },
    ] {
        let env = crossframe::MockEnvironment::new(HOST).expect("env");
        let err = Bridge::new(env, config).err().expect("zero duration");
        assert!(matches!(err, BridgeError::Config { .. }));
    }
}
