//! End-to-end: session → relay → analyzer over real sockets.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use camstream_core::{
    ANALYZER_ROLE, CLIENT_ROLE, CaptureSource, Envelope, Frame, PixelFormat, Plane,
    PresentationSink, RelayServer, SessionConfig, SessionController, SessionState,
    WebSocketConnector,
};

#[derive(Default)]
struct Unbinds(AtomicUsize);

impl CaptureSource for Unbinds {
    fn unbind(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Lines(Mutex<Vec<String>>);

impl PresentationSink for Lines {
    fn show(&self, status: &str) {
        self.0.lock().unwrap().push(status.to_string());
    }
}

fn gradient_frame(width: usize, height: usize) -> Frame {
    let y = (0..width * height).map(|i| (i % 256) as u8).collect();
    let chroma = vec![128; (width / 2) * (height / 2)];
    Frame::new(
        vec![
            Plane::packed(y, width),
            Plane::packed(chroma.clone(), width / 2),
            Plane::packed(chroma, width / 2),
        ],
        width as u32,
        height as u32,
        PixelFormat::Yuv420,
    )
}

async fn wait_for_state(session: &SessionController, target: SessionState) {
    let mut rx = session.subscribe();
    tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("session never reached {target}"))
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn frame_result_and_termination_through_relay() {
    let relay = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let addr = relay.local_addr().unwrap();
    let stop_relay = CancellationToken::new();
    tokio::spawn(relay.run(stop_relay.clone()));

    let (mut analyzer, _) = connect_async(format!("ws://{addr}/{ANALYZER_ROLE}"))
        .await
        .unwrap();
    // Registration completes on the relay side just after the handshake.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let capture = Arc::new(Unbinds::default());
    let sink = Arc::new(Lines::default());
    let config = SessionConfig {
        server_url: format!("ws://{addr}"),
        ..Default::default()
    };
    let session = SessionController::new(
        config,
        Arc::new(WebSocketConnector),
        Arc::clone(&capture) as Arc<dyn CaptureSource>,
        Arc::clone(&sink) as Arc<dyn PresentationSink>,
    )
    .unwrap();

    session.start().unwrap();
    wait_for_state(&session, SessionState::Streaming).await;

    // The analyzer sees nothing until a frame is admitted and sent.
    let pipeline = session.on_frame(gradient_frame(32, 24));
    assert!(pipeline.is_admitted());

    let incoming = tokio::time::timeout(Duration::from_secs(10), analyzer.next())
        .await
        .expect("analyzer got no frame")
        .unwrap()
        .unwrap();
    let Message::Text(text) = incoming else {
        panic!("expected a text frame, got {incoming:?}");
    };
    let envelope = Envelope::from_json(&text).unwrap();
    assert_eq!(envelope.from(), CLIENT_ROLE);
    assert_eq!(envelope.receiver(), ANALYZER_ROLE);
    let jpeg = STANDARD.decode(envelope.data()).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

    let reply = Envelope::new(ANALYZER_ROLE, CLIENT_ROLE, "RESULT").to_json().unwrap();
    analyzer.send(Message::Text(reply)).await.unwrap();
    wait_for_state(&session, SessionState::AwaitingTermination).await;
    assert_eq!(session.result().as_deref(), Some("RESULT"));

    let done = Envelope::new(ANALYZER_ROLE, CLIENT_ROLE, "done").to_json().unwrap();
    analyzer.send(Message::Text(done)).await.unwrap();

    let terminal = tokio::time::timeout(Duration::from_secs(10), session.wait_terminal())
        .await
        .expect("session never ended");
    assert_eq!(terminal, SessionState::Closed);
    assert_eq!(session.result().as_deref(), Some("RESULT"));
    assert_eq!(capture.0.load(Ordering::SeqCst), 1);
    assert_eq!(session.stats().frames_sent, 1);

    let lines = sink.0.lock().unwrap().clone();
    assert_eq!(lines, vec!["Connected".to_string(), "RESULT".to_string()]);

    stop_relay.cancel();
}

#[tokio::test]
async fn unreachable_relay_fails_session() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let capture = Arc::new(Unbinds::default());
    let sink = Arc::new(Lines::default());
    let session = SessionController::new(
        SessionConfig {
            server_url: format!("ws://{addr}"),
            ..Default::default()
        },
        Arc::new(WebSocketConnector),
        Arc::clone(&capture) as Arc<dyn CaptureSource>,
        Arc::clone(&sink) as Arc<dyn PresentationSink>,
    )
    .unwrap();

    session.start().unwrap();
    let terminal = tokio::time::timeout(Duration::from_secs(10), session.wait_terminal())
        .await
        .expect("session never ended");

    assert_eq!(terminal, SessionState::Failed);
    assert_eq!(capture.0.load(Ordering::SeqCst), 1);
    assert!(session.result().is_none());
    let lines = sink.0.lock().unwrap().clone();
    assert!(lines[0].starts_with("Connection error:"));
}
