use super::*;
use std::future::Future;
use std::time::Duration;

use frames::{decode_message, encode_message};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as TMessage;

use crate::ReconnectPolicy;

type PeerSocket = WebSocketStream<TcpStream>;

fn fast_config() -> ClientConfig {
    ClientConfig::default().with_reconnect(ReconnectPolicy::Fixed(Duration::from_millis(50)))
}

/// Accept WebSocket connections on `listener` and hand each one to `peer`.
fn serve_peer<F, Fut>(listener: TcpListener, peer: F)
where
    F: Fn(PeerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let peer = Arc::new(peer);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let peer = peer.clone();
            tokio::spawn(async move {
                if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                    peer(ws).await;
                }
            });
        }
    });
}

async fn fake_broker<F, Fut>(peer: F) -> String
where
    F: Fn(PeerSocket) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    serve_peer(listener, peer);
    format!("ws://{addr}")
}

async fn send_frame(ws: &mut PeerSocket, message: &Message) {
    let json = encode_message(message).expect("encode");
    ws.send(TMessage::Text(json.into())).await.expect("peer send");
}

async fn next_request(ws: &mut PeerSocket) -> Option<Message> {
    while let Some(Ok(frame)) = ws.next().await {
        if let TMessage::Text(text) = frame {
            return decode_message(text.as_str()).ok();
        }
    }
    None
}

async fn wait_for_attempts(client: &BrokerClient, at_least: u64) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while client.connect_attempts() < at_least {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("attempts observed");
}

async fn open(client: &BrokerClient) {
    tokio::time::timeout(Duration::from_secs(3), client.wait_until_open())
        .await
        .expect("link opened in time")
        .expect("state channel alive");
}

// =============================================================================
// NOT CONNECTED / PROXIES
// =============================================================================

#[tokio::test]
async fn call_before_connect_is_not_connected() {
    let client = BrokerClient::new(ClientConfig::default());
    assert_eq!(client.state(), LinkState::Closed);

    let err = client.call("core", "greet", Value::Null).await.unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
    assert_eq!(client.pending_calls(), 0, "failed send must not leak a pending call");

    let err = client.send(Message::event("x", Value::Null)).unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn module_proxies_are_cached_per_name() {
    let client = BrokerClient::default();
    let a = client.module("core");
    let b = client.module("core");
    let other = client.module("math");

    assert!(a.ptr_eq(&b));
    assert!(!a.ptr_eq(&other));
    assert_eq!(client.proxy_count(), 2);
    assert_eq!(a.name(), "core");

    let greet = a.method("greet");
    assert_eq!(greet.module(), "core");
    assert_eq!(greet.name(), "greet");
}

#[tokio::test]
async fn proxy_outliving_client_reports_closed() {
    let proxy = BrokerClient::default().module("core");
    let err = proxy.call("greet", Value::Null).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}

// =============================================================================
// CORRELATION
// =============================================================================

#[tokio::test]
async fn duplicate_responses_resolve_once() {
    let url = fake_broker(|mut ws| async move {
        send_frame(&mut ws, &Message::event("broker", json!(["alpha", "beta"]))).await;
        while let Some(request) = next_request(&mut ws).await {
            let reply = request.response(json!("pong"));
            send_frame(&mut ws, &reply).await;
            send_frame(&mut ws, &reply).await;
            let mut stray = request.response(json!("stray"));
            stray.request_id = Some("nobody-asked".to_owned());
            send_frame(&mut ws, &stray).await;
        }
    })
    .await;

    let client = BrokerClient::new(fast_config());
    let mut events = client.subscribe_events();
    client.connect(url);
    open(&client).await;

    let proxy = client.module("alpha");
    assert_eq!(proxy.call("ping", json!(1)).await.expect("first call"), json!("pong"));
    assert_eq!(proxy.method("ping").call(json!(2)).await.expect("second call"), json!("pong"));
    assert_eq!(client.pending_calls(), 0);

    assert_eq!(client.modules(), vec!["alpha".to_owned(), "beta".to_owned()]);
    let event = events.recv().await.expect("event broadcast");
    assert_eq!(event.kind, Kind::Event);
    assert_eq!(event.target, "broker");
}

#[tokio::test]
async fn typed_call_surfaces_remote_error() {
    let url = fake_broker(|mut ws| async move {
        while let Some(request) = next_request(&mut ws).await {
            let payload = if request.method_name() == "ok" {
                json!({"sum": 3})
            } else {
                json!({"error": "boom", "code": "E_INVOCATION_FAILED"})
            };
            send_frame(&mut ws, &request.response(payload)).await;
        }
    })
    .await;

    let client = BrokerClient::start(fast_config().with_url(url));
    open(&client).await;

    #[derive(Debug, serde::Deserialize)]
    struct Sum {
        sum: i64,
    }

    let proxy = client.module("math");
    let sum: Sum = proxy.call_typed("ok", &json!([1, 2])).await.expect("typed ok");
    assert_eq!(sum.sum, 3);

    let err = proxy.call_typed::<_, Sum>("bad", &json!(null)).await.unwrap_err();
    match err {
        ClientError::Remote(remote) => {
            assert_eq!(remote.code, "E_INVOCATION_FAILED");
            assert_eq!(remote.message, "boom");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_frames_do_not_drop_the_link() {
    let url = fake_broker(|mut ws| async move {
        ws.send(TMessage::Text("not json".into())).await.expect("send garbage");
        ws.send(TMessage::Text(r#"{"id":"x","type":9,"target":"t","payload":null,"ts":0}"#.into()))
            .await
            .expect("send unknown kind");
        send_frame(&mut ws, &Message::request("client", "poke", Value::Null)).await;
        send_frame(&mut ws, &Message::event("broker", json!(["core"]))).await;
        while next_request(&mut ws).await.is_some() {}
    })
    .await;

    let client = BrokerClient::new(fast_config());
    let mut modules = client.watch_modules();
    client.connect(url);

    tokio::time::timeout(Duration::from_secs(3), modules.wait_for(|m| !m.is_empty()))
        .await
        .expect("event arrived")
        .expect("watch alive");
    assert_eq!(client.modules(), vec!["core".to_owned()]);
    assert_eq!(client.state(), LinkState::Open);
    assert_eq!(client.connect_attempts(), 1);
}

#[tokio::test]
async fn call_times_out_and_forgets_pending_entry() {
    let url = fake_broker(|mut ws| async move {
        // Read requests, never answer.
        while next_request(&mut ws).await.is_some() {}
    })
    .await;

    let client = BrokerClient::start(fast_config().with_url(url).with_call_timeout(Duration::from_millis(100)));
    open(&client).await;

    let err = client.call("core", "slow", Value::Null).await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));
    assert_eq!(client.pending_calls(), 0);
}

// =============================================================================
// RECONNECTION
// =============================================================================

#[tokio::test]
async fn reconnects_after_peer_closes() {
    let url = fake_broker(|mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;

    let client = BrokerClient::new(fast_config());
    client.connect(url);
    wait_for_attempts(&client, 3).await;
}

#[tokio::test]
async fn keeps_retrying_until_broker_appears() {
    let reserved = TcpListener::bind("127.0.0.1:0").await.expect("reserve port");
    let addr = reserved.local_addr().expect("addr");
    drop(reserved);

    let client = BrokerClient::new(fast_config());
    client.connect(format!("ws://{addr}"));
    wait_for_attempts(&client, 2).await;
    assert_ne!(client.state(), LinkState::Open);

    let listener = TcpListener::bind(addr).await.expect("rebind reserved port");
    serve_peer(listener, |mut ws| async move { while next_request(&mut ws).await.is_some() {} });
    open(&client).await;
}

#[tokio::test]
async fn shutdown_stops_reconnecting() {
    let url = fake_broker(|mut ws| async move {
        let _ = ws.close(None).await;
    })
    .await;

    let client = BrokerClient::new(fast_config());
    client.connect(url);
    wait_for_attempts(&client, 2).await;

    client.shutdown();
    let attempts = client.connect_attempts();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(client.connect_attempts(), attempts);
    assert_eq!(client.state(), LinkState::Closed);
}

#[tokio::test]
async fn shutdown_resolves_pending_calls_with_closed() {
    let url = fake_broker(|mut ws| async move { while next_request(&mut ws).await.is_some() {} }).await;

    let client = BrokerClient::start(fast_config().with_url(url));
    open(&client).await;

    let caller = client.clone();
    let call = tokio::spawn(async move { caller.call("core", "hang", Value::Null).await });
    tokio::time::timeout(Duration::from_secs(3), async {
        while client.pending_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("call registered");

    client.shutdown();
    let result = call.await.expect("join");
    assert!(matches!(result, Err(ClientError::Closed)));
}

// =============================================================================
// RECONNECT TIMING
// =============================================================================

/// Record the instant of each new connection attempt, polling the counter.
async fn attempt_instants(client: &BrokerClient, count: usize) -> Vec<std::time::Instant> {
    let mut seen = Vec::with_capacity(count);
    let mut last = client.connect_attempts();
    tokio::time::timeout(Duration::from_secs(5), async {
        while seen.len() < count {
            let now = client.connect_attempts();
            if now > last {
                seen.push(std::time::Instant::now());
                last = now;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("attempts observed");
    seen
}

fn refused_url() -> String {
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let addr = reserved.local_addr().expect("addr");
    drop(reserved);
    format!("ws://{addr}")
}

#[tokio::test]
async fn fixed_policy_waits_between_sessions() {
    let delay = Duration::from_millis(200);
    let accepted = Arc::new(Mutex::new(Vec::new()));
    let log = accepted.clone();
    let url = fake_broker(move |mut ws| {
        let log = log.clone();
        async move {
            lock_ignore_poison(&log).push(std::time::Instant::now());
            let _ = ws.close(None).await;
        }
    })
    .await;

    let client = BrokerClient::new(ClientConfig::default().with_reconnect(ReconnectPolicy::Fixed(delay)));
    client.connect(url);
    wait_for_attempts(&client, 3).await;
    tokio::time::timeout(Duration::from_secs(3), async {
        while lock_ignore_poison(&accepted).len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("three sessions accepted");
    client.shutdown();

    let accepted = lock_ignore_poison(&accepted).clone();
    for pair in accepted.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= delay, "next session started after {gap:?}, before the {delay:?} delay");
    }
}

#[tokio::test]
async fn backoff_policy_doubles_up_to_cap_between_failed_attempts() {
    let initial = Duration::from_millis(100);
    let max = Duration::from_millis(200);
    let slack = Duration::from_millis(15);

    let client = BrokerClient::new(ClientConfig::default().with_reconnect(ReconnectPolicy::Backoff { initial, max }));
    client.connect(refused_url());
    // Attempt 1 starts immediately; measure from it.
    wait_for_attempts(&client, 1).await;
    let start = std::time::Instant::now();
    let instants = attempt_instants(&client, 3).await;
    client.shutdown();

    let gaps: Vec<Duration> = std::iter::once(instants[0].duration_since(start))
        .chain(instants.windows(2).map(|pair| pair[1].duration_since(pair[0])))
        .collect();

    // Gaps run 100ms, 200ms, then stay at the 200ms cap (uncapped: 400ms).
    // The first is measured from a polled start, so only its successors are
    // checked.
    assert!(gaps[0] <= initial + Duration::from_millis(100), "first retry took {:?}", gaps[0]);
    assert!(gaps[1] + slack >= Duration::from_millis(200), "second gap {:?} did not double", gaps[1]);
    assert!(gaps[2] + slack >= max, "third gap {:?} shorter than cap", gaps[2]);
    assert!(gaps[2] < Duration::from_millis(390), "third gap {:?} exceeded the cap", gaps[2]);
}

// =============================================================================
// STATE TRANSITIONS
// =============================================================================

#[tokio::test]
async fn watch_state_reports_open_then_closed() {
    let url = fake_broker(|mut ws| async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = ws.close(None).await;
    })
    .await;

    let client = BrokerClient::new(ClientConfig::default().with_reconnect(ReconnectPolicy::Fixed(Duration::from_secs(2))));
    let mut states = client.watch_state();
    assert_eq!(*states.borrow(), LinkState::Closed);
    client.connect(url);

    tokio::time::timeout(Duration::from_secs(3), states.wait_for(|s| *s == LinkState::Open))
        .await
        .expect("opened in time")
        .expect("watch alive");
    let after_open = *tokio::time::timeout(Duration::from_secs(3), states.wait_for(|s| *s != LinkState::Open))
        .await
        .expect("closed in time")
        .expect("watch alive");
    assert_eq!(after_open, LinkState::Closed, "peer close must surface as Closed before the 2s retry");
    assert_eq!(client.connect_attempts(), 1);
}

#[tokio::test]
async fn superseded_supervisor_cannot_reopen_after_shutdown() {
    let client = BrokerClient::new(ClientConfig::default());
    let stale = client.inner.generation.load(Ordering::Acquire);

    client.shutdown();
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(!client.inner.transition(stale, LinkState::Open, Some(tx)));

    assert_eq!(client.state(), LinkState::Closed);
    let err = client.send(Message::event("x", Value::Null)).unwrap_err();
    assert!(matches!(err, ClientError::NotConnected));
}

#[tokio::test]
async fn connect_after_shutdown_opens_again() {
    let url = fake_broker(|mut ws| async move { while next_request(&mut ws).await.is_some() {} }).await;

    let client = BrokerClient::new(fast_config());
    client.connect(url.clone());
    open(&client).await;
    client.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), LinkState::Closed);

    client.connect(url);
    open(&client).await;
    assert_eq!(client.state(), LinkState::Open);
}
