//! `NotificationClient` lifecycle against a scripted connector, on paused
//! tokio time so the 5 s reconnect delay costs nothing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use civic_portal_core::notifications::FrameStream;
use civic_portal_core::{
    ConnectError, ConnectionState, Connector, FileStore, InboundFrame, MemoryStore,
    NotificationClient, NotificationStore, ReconnectPolicy,
};
use futures_util::stream::{self, StreamExt};
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;

const URL: &str = "ws://localhost:5000/ws/admin/notifications";
const FRAME: &str = r#"{"type":"NewComplaint","trackingNumber":"TRK-1","complaintType":"Roads","submittedAt":"2025-01-01T00:00:00Z"}"#;

enum Script {
    Fail,
    /// Open, deliver these frames, then close.
    Frames(Vec<InboundFrame>),
    /// Open and stay open until the sender is dropped.
    Hold(mpsc::UnboundedReceiver<InboundFrame>),
}

#[derive(Clone, Default)]
struct ScriptedConnector {
    scripts: Arc<Mutex<VecDeque<Script>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl ScriptedConnector {
    fn then(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push_back(script);
        self
    }

    fn hold(self) -> (Self, mpsc::UnboundedSender<InboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.then(Script::Hold(rx)), tx)
    }

    fn connects(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, url: &str) -> Result<FrameStream, ConnectError> {
        self.urls.lock().unwrap().push(url.to_string());
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or(Script::Fail);
        match script {
            Script::Fail => Err(ConnectError::Handshake {
                status: None,
                message: "connection refused".into(),
            }),
            Script::Frames(frames) => Ok(stream::iter(frames.into_iter().map(Ok)).boxed()),
            Script::Hold(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|frame| (Ok(frame), rx))
            })
            .boxed()),
        }
    }
}

fn client(connector: ScriptedConnector) -> NotificationClient<ScriptedConnector> {
    let store = Arc::new(NotificationStore::load(Arc::new(MemoryStore::new())));
    NotificationClient::new(connector, store, URL, ReconnectPolicy::default())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_five_reconnects() {
    let connector = ScriptedConnector::default();
    let client = client(connector.clone());

    client.connect("A1");
    tokio::time::sleep(Duration::from_secs(60)).await;

    // The initial attempt plus five reconnects.
    assert_eq!(connector.connects(), 6);
    assert_eq!(
        client.state(),
        ConnectionState {
            connected: false,
            reconnect_attempts: 5
        }
    );
    assert!(!client.is_running());

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(connector.connects(), 6);
}

#[tokio::test(start_paused = true)]
async fn reconnects_on_the_fixed_delay() {
    let connector = ScriptedConnector::default();
    let client = client(connector.clone());

    client.connect("A1");
    settle().await;
    assert_eq!(connector.connects(), 1);

    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert_eq!(connector.connects(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(connector.connects(), 2);
    assert_eq!(client.state().reconnect_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_the_counter() {
    let connector = ScriptedConnector::default()
        .then(Script::Fail)
        .then(Script::Fail)
        .then(Script::Frames(vec![InboundFrame::Text(FRAME.into())]));
    let client = client(connector.clone());

    client.connect("A1");
    tokio::time::sleep(Duration::from_secs(120)).await;

    // Two failures, one open, then a fresh budget of five reconnects.
    assert_eq!(connector.connects(), 3 + 5);
    assert_eq!(client.store().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_frames_do_not_close_the_connection() {
    let (connector, tx) = ScriptedConnector::default().hold();
    let client = client(connector.clone());

    client.connect("A1");
    settle().await;
    assert!(client.state().connected);

    tx.send(InboundFrame::Text("not json".into())).unwrap();
    tx.send(InboundFrame::Text(r#"{"type":"NewComplaint"}"#.into())).unwrap();
    tx.send(InboundFrame::Binary(vec![0, 1, 2])).unwrap();
    tx.send(InboundFrame::Text(FRAME.into())).unwrap();
    settle().await;

    assert!(client.state().connected);
    assert_eq!(connector.connects(), 1);
    let records = client.store().list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tracking_number, "TRK-1");
    assert!(!records[0].read);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (connector, _tx) = ScriptedConnector::default().hold();
    let client = client(connector.clone());
    let mut state = client.subscribe_state();

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::default());
    assert!(!state.has_changed().unwrap());

    client.connect("A1");
    settle().await;
    assert!(client.state().connected);

    client.disconnect();
    assert_eq!(client.state(), ConnectionState::default());
    client.disconnect();
    assert_eq!(client.state(), ConnectionState::default());
    assert!(!client.is_running());
}

#[tokio::test(start_paused = true)]
async fn disconnect_after_giving_up_keeps_state() {
    let connector = ScriptedConnector::default();
    let client = client(connector.clone());

    client.connect("A1");
    tokio::time::sleep(Duration::from_secs(60)).await;
    let exhausted = ConnectionState {
        connected: false,
        reconnect_attempts: 5,
    };
    assert_eq!(client.state(), exhausted);

    let mut state = client.subscribe_state();
    client.disconnect();
    assert_eq!(client.state(), exhausted);
    assert!(!state.has_changed().unwrap());
    assert_eq!(connector.connects(), 6);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let connector = ScriptedConnector::default();
    let client = client(connector.clone());

    client.connect("A1");
    tokio::time::sleep(Duration::from_secs(1)).await;
    client.disconnect();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_supersedes_the_previous_connection() {
    let (connector, first) = ScriptedConnector::default().hold();
    let (connector, _second) = connector.hold();
    let client = client(connector.clone());

    client.connect("A1");
    settle().await;
    client.connect("A 2");
    settle().await;

    assert_eq!(
        connector.urls(),
        vec![format!("{URL}?token=A1"), format!("{URL}?token=A%202")]
    );
    assert!(first.is_closed());
    assert!(client.state().connected);

    // Frames on the superseded socket go nowhere.
    assert!(first.send(InboundFrame::Text(FRAME.into())).is_err());
    settle().await;
    assert!(client.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn records_survive_a_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let store = Arc::new(NotificationStore::load(Arc::new(FileStore::open(&path).unwrap())));
    let connector = ScriptedConnector::default()
        .then(Script::Frames(vec![InboundFrame::Text(FRAME.into())]));
    let client = NotificationClient::new(connector, store.clone(), URL, ReconnectPolicy::default());

    let mut arrivals = store.subscribe();
    client.connect("A1");
    let record = arrivals.recv().await.unwrap();
    client.disconnect();

    let reloaded = NotificationStore::load(Arc::new(FileStore::open(&path).unwrap()));
    assert_eq!(reloaded.list(), vec![record.clone()]);
    assert_eq!(record.kind, "NewComplaint");
    assert_eq!(record.complaint_type, "Roads");
    assert_eq!(record.submitted_at, "2025-01-01T00:00:00Z");
    assert!(!record.read);
}
