use crossframe::child::{LoadContext, INSTANCE_PARAM, PARENT_PARAM};
use crossframe::envelope::{Envelope, Kind, EVENT_INIT};
use crossframe::origin::{origin_of, Domain};
use crossframe::BridgeError;
use serde_json::json;
use url::Url;

#[test]
fn envelope_wire_shape() {
    let invoke = Envelope::method_invoke("abc", "onLogin-0", vec![json!(1)]);
    let raw: serde_json::Value = serde_json::from_str(&invoke.encode().expect("encode")).expect("json");
    assert_eq!(
        raw,
        json!({ "instanceId": "abc", "kind": "method-invoke", "name": "onLogin-0", "args": [1] })
    );

    let init = Envelope::decode(r#"{"instanceId":"abc","kind":"lifecycle-event","name":"init","callId":"call-3"}"#)
        .expect("decode");
    assert!(init.is_event(EVENT_INIT));
    assert!(init.is_request());
    assert!(!init.is_response());

    let error = Envelope::error("abc", None, "boom");
    assert_eq!(error.kind, Kind::Error);
    assert!(!error.is_response(), "uncorrelated errors are events");

    assert!(Envelope::decode(r#"{"kind":"method-result"}"#).is_err());
    assert!(Envelope::decode(r#"{"instanceId":"x","kind":"telepathy"}"#).is_err());
}

#[test]
fn origins_and_domains() {
    let url = Url::parse("https://Example.com:8443/path?q=1").expect("url");
    assert_eq!(origin_of(&url), "https://example.com:8443");
    assert_eq!(
        origin_of(&Url::parse("mock://child.com/child.htm").expect("url")),
        "mock://child.com"
    );

    let domain = Domain::parse("mock://child.com/anything").expect("domain");
    assert!(domain.matches("mock://child.com"));
    assert!(!domain.matches("mock://child.com.evil.com"));
    assert_eq!(domain.target_origin(), "mock://child.com");

    let any = Domain::parse("*").expect("wildcard");
    assert!(any.matches("mock://whatever.com"));
    assert_eq!(any.target_origin(), "*");
    assert!(any.base_url().is_none());

    assert!(Domain::parse("not a url").is_err());
}

#[test]
fn load_context_comes_from_the_child_url() {
    let mut url = Url::parse("mock://child.com/child.htm?user=bob").expect("url");
    url.query_pairs_mut()
        .append_pair(INSTANCE_PARAM, "abc")
        .append_pair(PARENT_PARAM, "mock://host.com");
    let context = LoadContext::from_url(&url).expect("context");
    assert_eq!(context.instance_id, "abc");
    assert_eq!(context.parent_origin, "mock://host.com");

    let bare = Url::parse("mock://child.com/child.htm?user=bob").expect("url");
    assert!(matches!(
        LoadContext::from_url(&bare),
        Err(BridgeError::Handshake { .. })
    ));
}
