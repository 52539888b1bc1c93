//! Correlated request/response exchanges over the in-process transport.

use chrono::Utc;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use warden::config::{ConnectionConfig, DeliveryConfig, TopicConfig};
use warden::protocol::{
    ProcessConnectionRequest, ProgressReport, ReplyKind, ReplyMessage, RequestEnvelope,
    RequestKind,
};
use warden::session::manager::ProgressListener;
use warden::session::{MemoryTransport, SessionManager};
use warden::WardenError;

fn session(transport: Arc<MemoryTransport>, timeout_secs: u64) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(
        transport,
        TopicConfig::default(),
        ConnectionConfig {
            reconnect_backoff_secs: 1,
            request_timeout_secs: timeout_secs,
        },
        DeliveryConfig::default(),
    ))
}

fn request_kind() -> RequestKind {
    RequestKind::ProcessConnection(ProcessConnectionRequest {
        process_name: "P_TEST01".to_string(),
        process_host_name: "daq-host-1".to_string(),
        process_startup_time: Utc::now(),
    })
}

/// Spawn a responder that answers every request on the request topic with the
/// given reply sequence.
fn spawn_responder(transport: Arc<MemoryTransport>, replies: Vec<ReplyKind>) {
    let mut published = transport.published();
    tokio::spawn(async move {
        while let Ok(frame) = published.recv().await {
            if frame.topic != "warden.request" {
                continue;
            }
            let envelope: RequestEnvelope = serde_json::from_str(&frame.payload).unwrap();
            for kind in replies.clone() {
                let reply = ReplyMessage {
                    request_id: envelope.request_id.clone(),
                    kind,
                };
                transport
                    .inject(&envelope.reply_to, &serde_json::to_string(&reply).unwrap())
                    .await;
            }
        }
    });
}

#[tokio::test]
async fn request_resolves_with_final_result() {
    let transport = Arc::new(MemoryTransport::new());
    let session = session(transport.clone(), 5);
    session.start().await.unwrap();

    spawn_responder(
        transport.clone(),
        vec![ReplyKind::Result(json!({"processName": "P_TEST01", "processPik": 42}))],
    );

    let value = session.send_request(request_kind(), None).await.unwrap();
    assert_eq!(value["processPik"], 42);
    assert_eq!(session.in_flight_requests(), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn progress_reports_are_forwarded_while_waiting() {
    let transport = Arc::new(MemoryTransport::new());
    let session = session(transport.clone(), 5);
    session.start().await.unwrap();

    spawn_responder(
        transport.clone(),
        vec![
            ReplyKind::Progress(ProgressReport {
                description: "loading configuration".to_string(),
                current: 1,
                total: 2,
            }),
            ReplyKind::Progress(ProgressReport {
                description: "loading configuration".to_string(),
                current: 2,
                total: 2,
            }),
            ReplyKind::Result(json!("done")),
        ],
    );

    struct Collector(Mutex<Vec<u32>>);
    impl ProgressListener for Collector {
        fn on_progress(&self, report: &ProgressReport) {
            self.0.lock().unwrap().push(report.current);
        }
    }
    let collector = Arc::new(Collector(Mutex::new(Vec::new())));

    let value = session
        .send_request(
            request_kind(),
            Some(collector.clone() as Arc<dyn ProgressListener>),
        )
        .await
        .unwrap();
    assert_eq!(value, json!("done"));
    assert_eq!(collector.0.lock().unwrap().clone(), vec![1, 2]);

    session.shutdown().await;
}

#[tokio::test]
async fn error_report_terminates_the_wait() {
    let transport = Arc::new(MemoryTransport::new());
    let session = session(transport.clone(), 5);
    session.start().await.unwrap();

    spawn_responder(
        transport.clone(),
        vec![ReplyKind::Error("configuration unavailable".to_string())],
    );

    struct ErrorCollector(Mutex<Vec<String>>);
    impl ProgressListener for ErrorCollector {
        fn on_progress(&self, _report: &ProgressReport) {}
        fn on_error(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }
    let collector = Arc::new(ErrorCollector(Mutex::new(Vec::new())));

    let err = session
        .send_request(
            request_kind(),
            Some(collector.clone() as Arc<dyn ProgressListener>),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, WardenError::RequestFailed(_)));
    // The error report also reaches the registered listener before the wait
    // resolves.
    assert_eq!(
        collector.0.lock().unwrap().clone(),
        vec!["configuration unavailable".to_string()]
    );
    assert_eq!(session.in_flight_requests(), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn silent_server_times_out() {
    let transport = Arc::new(MemoryTransport::new());
    let session = session(transport.clone(), 1);
    session.start().await.unwrap();

    let started = std::time::Instant::now();
    let err = session.send_request(request_kind(), None).await.unwrap_err();
    assert!(matches!(err, WardenError::RequestTimeout { .. }));
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(session.in_flight_requests(), 0);

    session.shutdown().await;
}

#[tokio::test]
async fn progress_alone_still_times_out() {
    let transport = Arc::new(MemoryTransport::new());
    let session = session(transport.clone(), 1);
    session.start().await.unwrap();

    spawn_responder(
        transport.clone(),
        vec![ReplyKind::Progress(ProgressReport {
            description: "stuck".to_string(),
            current: 1,
            total: 10,
        })],
    );

    let err = session.send_request(request_kind(), None).await.unwrap_err();
    assert!(matches!(err, WardenError::RequestTimeout { .. }));

    session.shutdown().await;
}
