//! Push listener against a fake Socket.IO server over a real WebSocket.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::Message;

use tex_timelapse::backend::memory::InMemoryBackend;
use tex_timelapse::config::Config;
use tex_timelapse::models::{Project, ProjectConfig, Snapshot, Stage, StageStatus};
use tex_timelapse::progress::{RenderProgressEvent, RenderProgressReporter};
use tex_timelapse::push::PushListener;
use tex_timelapse::store::StateStore;

struct Recorder(Mutex<Vec<RenderProgressEvent>>);

impl RenderProgressReporter for Recorder {
    fn report(&self, event: RenderProgressEvent) {
        self.0.lock().unwrap().push(event);
    }
}

fn store() -> Arc<StateStore> {
    let store = Arc::new(StateStore::new(Arc::new(InMemoryBackend::new())));
    store.set_project(Project {
        name: "thesis".into(),
        config: ProjectConfig::default(),
        snapshots: vec![
            Snapshot::new("aaaa1111", 100),
            Snapshot::new("bbbb2222", 200),
        ],
    });
    store
}

/// Accept one client, run the Engine.IO handshake, then send `frames`.
/// Reports every text frame received from the client.
async fn fake_socket_io(frames: Vec<String>) -> (String, oneshot::Receiver<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        let mut received = Vec::new();

        ws.send(Message::text(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
        ))
        .await
        .unwrap();
        // Client joins the default namespace.
        if let Some(Ok(Message::Text(t))) = ws.next().await {
            received.push(t.as_str().to_string());
        }
        ws.send(Message::text(r#"40{"sid":"def"}"#)).await.unwrap();

        ws.send(Message::text("2")).await.unwrap();
        if let Some(Ok(Message::Text(t))) = ws.next().await {
            received.push(t.as_str().to_string());
        }

        for frame in frames {
            ws.send(Message::text(frame)).await.unwrap();
        }
        let _ = done_tx.send(received);

        // Hold the connection open until the client closes it.
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    (format!("http://{}", addr), done_rx)
}

fn completed_snapshot(sha: &str, date: i64) -> serde_json::Value {
    let mut snap = common::wire_snapshot(sha, date);
    snap["status"] = common::status_map(Some(3));
    snap["pages"] = json!(["page-01.png"]);
    snap
}

#[tokio::test]
async fn test_listener_merges_and_reports() {
    let frames = vec![
        r#"42["stage",{"stage":"Compile LaTeX","length":2}]"#.to_string(),
        format!(
            "42{}",
            json!(["add_progress", { "snapshot": completed_snapshot("bbbb2222", 200) }])
        ),
        r#"42["log",{"msg":"compiled","snapshot":"bbbb2222"}]"#.to_string(),
        r#"42["unknown_event",{}]"#.to_string(),
        // Unknown snapshot ids are dropped by the store.
        format!(
            "42{}",
            json!(["add_progress", { "snapshot": completed_snapshot("ffff0000", 300) }])
        ),
    ];
    let (url, handshake) = fake_socket_io(frames).await;

    let store = store();
    let mut updates = store.subscribe_project();
    updates.drain();
    let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
    let listener = PushListener::new(&Config::minimal(&url), store.clone(), recorder.clone())
        .unwrap()
        .with_reconnect(Duration::from_millis(50));

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move { listener.run(stop_rx).await });

    let update = tokio::time::timeout(Duration::from_secs(5), updates.next())
        .await
        .expect("no project update")
        .unwrap();
    let project = update.project.unwrap();
    let snap = project.snapshot("bbbb2222").unwrap();
    assert_eq!(snap.status(Stage::AssembleImage), StageStatus::Completed);
    assert_eq!(snap.pages, vec!["page-01.png"]);
    assert!(project.snapshot("ffff0000").is_none());

    let received = handshake.await.unwrap();
    assert_eq!(received, vec!["40".to_string(), "3".to_string()]);

    // Let the trailing frames arrive before stopping.
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("listener did not stop")
        .unwrap();

    let events = recorder.0.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![
            RenderProgressEvent::Stage {
                name: "Compile LaTeX".into(),
                length: 2
            },
            RenderProgressEvent::Log {
                msg: "compiled".into(),
                snapshot: Some("bbbb2222".into())
            },
        ]
    );
    // Only the known snapshot changed the aggregate.
    assert!(updates.drain().is_empty());
}

#[tokio::test]
async fn test_listener_stops_while_disconnected() {
    // Nothing listens on this port; the listener keeps retrying.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let push = PushListener::new(
        &Config::minimal(&url),
        store(),
        Arc::new(Recorder(Mutex::new(Vec::new()))),
    )
    .unwrap()
    .with_reconnect(Duration::from_millis(20));

    let (stop_tx, stop_rx) = watch::channel(false);
    let task = tokio::spawn(async move { push.run(stop_rx).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("listener did not stop")
        .unwrap();
}
