use std::time::Duration;

use hpx_rtm::{
    OutgoingMessage, RtmClient, RtmConfig, RtmError, RtmEvent, SessionInfo, StaticSession,
    wire::memory::{MemoryPeer, memory_dialer},
};
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

fn probing_config() -> RtmConfig {
    RtmConfig::new()
        .ping_interval(Duration::from_millis(50))
        .probe_timeout(Duration::from_millis(120))
        .wait_for_hello(false)
}

/// Route library logs through the test harness; `RUST_LOG` selects levels.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn connected(config: RtmConfig) -> (RtmClient, MemoryPeer) {
    init_tracing();
    let (dialer, mut listener) = memory_dialer(16);
    let client = RtmClient::new(
        config,
        StaticSession::with_endpoint("memory://rtm", SessionInfo::default()),
        dialer,
    )
    .expect("client");
    client.connect().await.expect("connect");
    let peer = timeout(Duration::from_secs(1), listener.accept())
        .await
        .expect("accept timeout")
        .expect("listener closed");
    (client, peer)
}

/// Skip events until the connection reports it went down.
async fn wait_disconnected(client: &RtmClient) -> (bool, Option<String>) {
    let events = client.events();
    timeout(Duration::from_secs(3), async {
        loop {
            match events.recv().await {
                Some(RtmEvent::Disconnected {
                    intentional,
                    reason,
                    ..
                }) => return (intentional, reason),
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("no Disconnected event")
}

#[tokio::test]
async fn test_unanswered_probe_tears_down() {
    let (client, mut peer) = connected(probing_config()).await;

    let ping = timeout(Duration::from_secs(1), peer.recv_json())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ping["type"], "ping");
    assert!(ping["id"].as_u64().unwrap() >= 1);

    let (intentional, reason) = wait_disconnected(&client).await;
    assert!(!intentional);
    assert!(reason.unwrap().contains("unanswered"));

    assert!(!client.is_connected());
    assert!(!client.was_intentional());
    assert_eq!(client.outstanding_probes(), 0);
}

#[tokio::test]
async fn test_answered_probes_keep_connection_alive() {
    let (client, mut peer) = connected(probing_config()).await;

    let responder = tokio::spawn(async move {
        while let Some(frame) = peer.recv_json().await {
            if frame["type"] == "ping" {
                let reply = json!({"type": "pong", "reply_to": frame["id"]});
                if peer.send_json(&reply).is_err() {
                    break;
                }
            }
        }
    });

    let events = client.events();
    let latency = timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(RtmEvent::LatencyReport { latency }) => return latency,
                Some(RtmEvent::Disconnected { reason, .. }) => {
                    panic!("disconnected while answering probes: {reason:?}")
                }
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("no latency report");
    assert!(latency < Duration::from_secs(1));

    // Several probe windows pass without a teardown.
    sleep(Duration::from_millis(400)).await;
    assert!(client.is_connected());
    assert!(client.outstanding_probes() <= 2);

    client.disconnect().await.unwrap();
    let (intentional, reason) = wait_disconnected(&client).await;
    assert!(intentional);
    assert!(reason.is_none());

    timeout(Duration::from_secs(1), responder)
        .await
        .expect("responder did not observe close")
        .unwrap();
}

#[tokio::test]
async fn test_probe_identifiers_share_the_message_sequence() {
    let (client, mut peer) = connected(
        RtmConfig::new()
            .ping_interval(Duration::from_millis(50))
            .probe_timeout(Duration::from_secs(5))
            .wait_for_hello(false),
    )
    .await;

    let ping = timeout(Duration::from_secs(1), peer.recv_json())
        .await
        .unwrap()
        .unwrap();
    let ping_id = ping["id"].as_u64().unwrap();

    let id = client
        .send_message(OutgoingMessage::new("C1", "after ping"))
        .await
        .unwrap();
    assert!(id.get() > ping_id);

    let mut seen: Vec<Value> = Vec::new();
    timeout(Duration::from_secs(1), async {
        while let Some(frame) = peer.recv_json().await {
            let is_message = frame["type"] == "message";
            seen.push(frame);
            if is_message {
                break;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(seen.last().unwrap()["id"], id.get());
}

#[tokio::test]
async fn test_remote_close() {
    let (client, peer) = connected(RtmConfig::new().wait_for_hello(false)).await;
    peer.send(hpx_rtm::Frame::Close).unwrap();

    let (intentional, reason) = wait_disconnected(&client).await;
    assert!(!intentional);
    assert!(reason.unwrap().contains("remote sent close"));
    assert!(!client.is_connected());
    assert!(matches!(
        client.disconnect().await,
        Err(RtmError::NotConnected)
    ));
}

#[tokio::test]
async fn test_end_of_stream() {
    let (client, mut peer) = connected(RtmConfig::new().wait_for_hello(false)).await;
    peer.close();

    let (intentional, reason) = wait_disconnected(&client).await;
    assert!(!intentional);
    assert!(reason.unwrap().contains("end of stream"));
}

#[tokio::test]
async fn test_read_error_tears_down() {
    let (client, peer) = connected(RtmConfig::new().wait_for_hello(false)).await;
    peer.fail(RtmError::websocket("connection reset by peer"))
        .unwrap();

    let (intentional, reason) = wait_disconnected(&client).await;
    assert!(!intentional);
    assert!(reason.unwrap().contains("connection reset by peer"));
    assert!(client.session_info().is_none());
}

#[tokio::test]
async fn test_write_failure_reports_message() {
    let (client, mut peer) = connected(RtmConfig::new().wait_for_hello(false)).await;
    peer.refuse_writes();

    let id = client
        .send_message(OutgoingMessage::new("C1", "into the void"))
        .await
        .unwrap();

    let events = client.events();
    let mut failed = None;
    let mut disconnected = false;
    timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            match event {
                RtmEvent::OutgoingError { id, error } => {
                    assert!(error.is_connection_error());
                    failed = Some(id);
                }
                RtmEvent::Disconnected { intentional, .. } => {
                    assert!(!intentional);
                    disconnected = true;
                    break;
                }
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(failed, Some(id));
    assert!(disconnected);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_write_failure_is_reported_when_events_back_up() {
    let (client, mut peer) = connected(
        RtmConfig::new()
            .ping_interval(Duration::from_secs(3600))
            .incoming_capacity(2)
            .wait_for_hello(false),
    )
    .await;

    for n in 0..4 {
        peer.send_json(&json!({"type": "counter", "n": n})).unwrap();
    }
    // Nobody is consuming; the reader stalls on a full queue.
    sleep(Duration::from_millis(50)).await;

    peer.refuse_writes();
    let id = client
        .send_message(OutgoingMessage::new("C1", "behind a full queue"))
        .await
        .unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(!client.is_connected());

    let events = client.events();
    let mut kinds = Vec::new();
    let mut failed = None;
    timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            kinds.push(event.kind());
            match event {
                RtmEvent::OutgoingError { id, .. } => failed = Some(id),
                RtmEvent::Disconnected { .. } => break,
                _ => {}
            }
        }
    })
    .await
    .expect("no Disconnected event");

    assert_eq!(failed, Some(id));
    let error_at = kinds.iter().position(|k| *k == "outgoing_error").unwrap();
    assert_eq!(error_at, kinds.len() - 2, "{kinds:?}");
}
