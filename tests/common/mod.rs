#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use crossframe::props::CallbackResult;
use crossframe::{Bridge, BridgeConfig, ComponentConfig, MockEnvironment};
use parking_lot::Mutex;
use serde_json::Value;

pub const HOST: &str = "mock://host.com";
pub const CHILD_DOMAIN: &str = "mock://child.com";
pub const CHILD_URL: &str = "mock://child.com/child.htm";

static TRACING: Once = Once::new();

/// Route `tracing` output through the test harness. `RUST_LOG=crossframe=debug`
/// shows discarded messages and transitions.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A fresh browser plus a bridge on its host page.
pub fn setup() -> (Arc<MockEnvironment>, Arc<Bridge>) {
    setup_with(BridgeConfig::default())
}

pub fn setup_with(config: BridgeConfig) -> (Arc<MockEnvironment>, Arc<Bridge>) {
    init_tracing();
    let env = MockEnvironment::new(HOST).expect("host url");
    let bridge = Bridge::new(env.clone(), config).expect("bridge");
    (env, bridge)
}

/// The `t1` component: relative url from a resolver, explicit child domain.
pub fn t1() -> ComponentConfig {
    ComponentConfig::new("t1")
        .url_fn(|_| "/child.htm".to_string())
        .domain(CHILD_DOMAIN)
}

/// Serve a well-behaved child at [`CHILD_URL`]: exports `title`, exposes
/// `echo` and `fail`, then waits to be closed.
pub fn serve_child(env: &MockEnvironment) {
    env.serve(CHILD_URL, |page| async move {
        let Ok(mut child) = page.attach() else { return };
        child.export("title", "hello from child");
        child.expose("echo", |args| Ok(Value::Array(args)));
        child.expose("fail", |_| Err("child says no".to_string()));
        if child.handshake().await.is_err() {
            return;
        }
        child.closed().await;
    })
    .expect("serve");
}

/// Serve a child that completes the handshake and then stops listening, so
/// every later request goes unanswered.
pub fn serve_silent_child(env: &MockEnvironment) {
    env.serve(CHILD_URL, |page| async move {
        let _ = page.connect().await;
    })
    .expect("serve");
}

/// Counts invocations of a callback prop and records their arguments.
#[derive(Clone, Default)]
pub struct Recorder {
    hits: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<Vec<Value>>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(Vec<Value>) -> CallbackResult + Send + Sync + 'static {
        let recorder = self.clone();
        move |args| {
            recorder.hits.fetch_add(1, Ordering::SeqCst);
            recorder.calls.lock().push(args);
            Ok(Value::Null)
        }
    }

    pub fn count(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Vec<Value>> {
        self.calls.lock().clone()
    }
}

/// Let spawned tasks (child pages, the messenger) run until they block.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// A `div` attached to the body.
pub fn container(env: &MockEnvironment) -> crossframe::NodeId {
    let div = env.create_element("div");
    env.append_child(env.body(), div).expect("append");
    div
}
