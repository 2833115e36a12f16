use std::time::Duration;

use async_trait::async_trait;
use hpx_rtm::{
    ConnectionEpoch, ConnectionPhase, OutgoingMessage, RtmClient, RtmConfig, RtmError, RtmEvent,
    RtmResult, SessionInfo, SessionProvider, SessionStart, StaticSession, TeamDetails,
    UserDetails,
    wire::memory::{MemoryDialer, MemoryListener, MemoryPeer, memory_dialer},
};
use serde_json::{Value, json};
use tokio::time::{sleep, timeout};

fn session_info() -> SessionInfo {
    SessionInfo {
        url: "wss://rtm.example.com/websocket/abc".to_string(),
        user: UserDetails {
            id: "U023BECGF".to_string(),
            name: "bobby".to_string(),
            ..Default::default()
        },
        team: TeamDetails {
            id: "T024BE7LD".to_string(),
            name: "Example".to_string(),
            domain: "example".to_string(),
        },
    }
}

fn quiet_config() -> RtmConfig {
    RtmConfig::new()
        .ping_interval(Duration::from_secs(3600))
        .hello_timeout(Duration::from_secs(2))
}

/// Route library logs through the test harness; `RUST_LOG` selects levels.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn new_client(config: RtmConfig) -> (RtmClient, MemoryDialer, MemoryListener) {
    init_tracing();
    let (dialer, listener) = memory_dialer(16);
    let client = RtmClient::new(
        config,
        StaticSession::with_endpoint("memory://rtm", session_info()),
        dialer.clone(),
    )
    .expect("client");
    (client, dialer, listener)
}

async fn connect_with_hello(client: &RtmClient, listener: &mut MemoryListener) -> MemoryPeer {
    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    let peer = timeout(Duration::from_secs(1), listener.accept())
        .await
        .expect("accept timeout")
        .expect("listener closed");
    peer.send_json(&json!({"type": "hello"})).expect("hello");

    timeout(Duration::from_secs(2), connecting)
        .await
        .expect("connect timeout")
        .expect("join")
        .expect("connect");
    peer
}

async fn next_event(client: &RtmClient) -> RtmEvent<Value> {
    timeout(Duration::from_secs(2), client.events().recv())
        .await
        .expect("event timeout")
        .expect("event stream ended")
}

#[tokio::test]
async fn test_connect_waits_for_hello() {
    let (client, _dialer, mut listener) = new_client(quiet_config());
    let peer = connect_with_hello(&client, &mut listener).await;

    assert_eq!(peer.endpoint(), "memory://rtm");
    assert!(client.is_connected());
    assert_eq!(client.phase(), ConnectionPhase::Connected);
    assert_eq!(client.epoch(), ConnectionEpoch(1));
    assert_eq!(client.session_info(), Some(session_info()));

    assert!(matches!(
        next_event(&client).await,
        RtmEvent::Connected { epoch } if epoch == ConnectionEpoch(1)
    ));
    match next_event(&client).await {
        RtmEvent::Hello { info } => assert_eq!(info.user.name, "bobby"),
        other => panic!("expected hello, got {other:?}"),
    }
}

#[tokio::test]
async fn test_double_disconnect() {
    let (client, _dialer, mut listener) = new_client(quiet_config());
    let _peer = connect_with_hello(&client, &mut listener).await;

    client.disconnect().await.expect("first disconnect");
    assert!(matches!(
        client.disconnect().await,
        Err(RtmError::NotConnected)
    ));

    let snap = client.snapshot();
    assert_eq!(snap.phase, ConnectionPhase::Disconnected);
    assert!(!snap.is_connected);
    assert!(!snap.has_link);
    assert!(snap.was_intentional);
    assert!(client.session_info().is_none());

    loop {
        if let RtmEvent::Disconnected {
            epoch,
            intentional,
            reason,
        } = next_event(&client).await
        {
            assert_eq!(epoch, ConnectionEpoch(1));
            assert!(intentional);
            assert!(reason.is_none());
            break;
        }
    }
}

#[tokio::test]
async fn test_connect_while_connected() {
    let (client, _dialer, mut listener) = new_client(quiet_config());
    let _peer = connect_with_hello(&client, &mut listener).await;

    assert!(matches!(
        client.connect().await,
        Err(RtmError::AlreadyConnected)
    ));
    assert!(matches!(
        client.reconnect().await,
        Err(RtmError::AlreadyConnected)
    ));
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_reconnect_starts_new_epoch() {
    let (client, _dialer, mut listener) = new_client(quiet_config());
    let mut peer = connect_with_hello(&client, &mut listener).await;

    let id = client
        .send_message(OutgoingMessage::new("C1", "first"))
        .await
        .expect("send");
    assert_eq!(id.get(), 1);
    let wire = timeout(Duration::from_secs(1), peer.recv_json())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wire["id"], 1);

    client.disconnect().await.expect("disconnect");

    let reconnecting = {
        let client = client.clone();
        tokio::spawn(async move { client.reconnect().await })
    };
    let mut peer = timeout(Duration::from_secs(1), listener.accept())
        .await
        .unwrap()
        .unwrap();
    peer.send_json(&json!({"type": "hello"})).unwrap();
    let epoch = reconnecting.await.unwrap().expect("reconnect");
    assert_eq!(epoch, ConnectionEpoch(2));

    let id = client
        .send_message(OutgoingMessage::new("C1", "second"))
        .await
        .expect("send");
    assert_eq!(id.get(), 1);
    let wire = timeout(Duration::from_secs(1), peer.recv_json())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(wire["text"], "second");
}

#[tokio::test]
async fn test_dial_failure_leaves_state_disconnected() {
    let (client, dialer, mut listener) = new_client(quiet_config());
    dialer.refuse_connections(true);

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, RtmError::Dial { .. }));
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    assert!(!client.is_connected());
    assert_eq!(client.epoch(), ConnectionEpoch(0));

    dialer.refuse_connections(false);
    let _peer = connect_with_hello(&client, &mut listener).await;
    assert_eq!(client.epoch(), ConnectionEpoch(1));
}

struct RevokedSession;

#[async_trait]
impl SessionProvider for RevokedSession {
    async fn start_session(&self) -> RtmResult<SessionStart> {
        Err(RtmError::session("token_revoked"))
    }
}

#[tokio::test]
async fn test_session_failure_leaves_state_disconnected() {
    let (dialer, _listener) = memory_dialer(4);
    let client = RtmClient::new(quiet_config(), RevokedSession, dialer).unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, RtmError::Session { .. }));
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
}

/// Takes its time before handing out the session.
struct SlowSession {
    delay: Duration,
    inner: StaticSession,
}

#[async_trait]
impl SessionProvider for SlowSession {
    async fn start_session(&self) -> RtmResult<SessionStart> {
        sleep(self.delay).await;
        self.inner.start_session().await
    }
}

#[tokio::test]
async fn test_abandoned_connect_can_be_retried() {
    init_tracing();
    let (dialer, mut listener) = memory_dialer(4);
    let client = RtmClient::new(
        quiet_config().wait_for_hello(false),
        SlowSession {
            delay: Duration::from_millis(200),
            inner: StaticSession::with_endpoint("memory://rtm", session_info()),
        },
        dialer,
    )
    .unwrap();

    assert!(
        timeout(Duration::from_millis(20), client.connect())
            .await
            .is_err()
    );
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
    assert!(!client.is_connected());
    assert!(matches!(
        client.disconnect().await,
        Err(RtmError::NotConnected)
    ));

    let epoch = timeout(Duration::from_secs(2), client.connect())
        .await
        .expect("connect hung")
        .expect("connect");
    assert_eq!(epoch, ConnectionEpoch(1));
    assert!(client.is_connected());
    let _peer = timeout(Duration::from_secs(1), listener.accept())
        .await
        .expect("accept timeout")
        .expect("listener closed");
}

#[tokio::test]
async fn test_previous_disconnect_precedes_next_connected() {
    let (client, _dialer, mut listener) =
        new_client(quiet_config().wait_for_hello(false).incoming_capacity(2));

    client.connect().await.expect("connect");
    let peer = listener.accept().await.unwrap();
    peer.send_json(&json!({"type": "marker"})).unwrap();
    // Connected plus the marker fill the queue.
    sleep(Duration::from_millis(50)).await;

    client.disconnect().await.expect("disconnect");
    let epoch = client.connect().await.expect("reconnect");
    assert_eq!(epoch, ConnectionEpoch(2));
    let _peer = listener.accept().await.unwrap();

    assert!(matches!(
        next_event(&client).await,
        RtmEvent::Connected { epoch } if epoch == ConnectionEpoch(1)
    ));
    assert!(matches!(
        next_event(&client).await,
        RtmEvent::Event(event) if event.type_tag == "marker"
    ));
    assert!(matches!(
        next_event(&client).await,
        RtmEvent::Disconnected { epoch, intentional: true, .. } if epoch == ConnectionEpoch(1)
    ));
    assert!(matches!(
        next_event(&client).await,
        RtmEvent::Connected { epoch } if epoch == ConnectionEpoch(2)
    ));
}

#[tokio::test]
async fn test_hello_timeout() {
    let (client, _dialer, mut listener) =
        new_client(quiet_config().hello_timeout(Duration::from_millis(100)));

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let _peer = listener.accept().await.unwrap();

    let err = timeout(Duration::from_secs(2), connecting)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RtmError::Handshake { .. }));
    assert!(!client.is_connected());
    assert!(!client.was_intentional());
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
}

#[tokio::test]
async fn test_close_before_hello() {
    let (client, _dialer, mut listener) = new_client(quiet_config());

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    let mut peer = listener.accept().await.unwrap();
    peer.close();

    let err = timeout(Duration::from_secs(2), connecting)
        .await
        .unwrap()
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RtmError::Handshake { .. }));
    assert_eq!(client.phase(), ConnectionPhase::Disconnected);
}

#[tokio::test]
async fn test_connect_without_waiting_for_hello() {
    let (client, _dialer, mut listener) = new_client(quiet_config().wait_for_hello(false));

    let epoch = client.connect().await.expect("connect");
    assert_eq!(epoch, ConnectionEpoch(1));
    assert!(client.is_connected());
    assert!(client.session_info().is_none());

    let peer = listener.accept().await.unwrap();
    peer.send_json(&json!({"type": "hello"})).unwrap();
    loop {
        if let RtmEvent::Hello { .. } = next_event(&client).await {
            break;
        }
    }
    assert_eq!(client.session_info(), Some(session_info()));
}

#[tokio::test]
async fn test_session_provider_is_reachable() {
    let (client, _dialer, _listener) = new_client(quiet_config());
    let start = client.session().start_session().await.unwrap();
    assert_eq!(start.endpoint, "memory://rtm");
}

#[tokio::test]
async fn test_dropping_last_handle_closes_connection() {
    let (client, _dialer, mut listener) = new_client(quiet_config());
    let mut peer = connect_with_hello(&client, &mut listener).await;
    let clone = client.clone();

    drop(client);
    assert!(clone.is_connected());

    drop(clone);
    let closed = timeout(Duration::from_secs(2), async {
        while peer.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok(), "connection was not closed after drop");
}
