//! End-to-end supervision scenarios over the in-process transport.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use warden::config::{
    AppConfig, ConnectionConfig, DeliveryConfig, LoggingConfig, ServerConfig, SupervisionConfig,
    TopicConfig,
};
use warden::domain::{EntityKind, EquipmentEntity, ProcessEntity, SubEquipmentEntity, SupervisionStatus};
use warden::protocol::{
    ProcessConnectionRequest, ProcessConnectionResponse, ProcessDisconnectionRequest,
    RequestEnvelope, RequestKind, PIK_REJECTED,
};
use warden::registry::{AliveTimer, CommFaultBinding};
use warden::session::{InboundFrame, MemoryTransport};
use warden::Warden;

fn test_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            ws_url: "ws://unused.local/test".to_string(),
            topics: TopicConfig::default(),
        },
        delivery: DeliveryConfig::default(),
        connection: ConnectionConfig {
            reconnect_backoff_secs: 1,
            request_timeout_secs: 5,
        },
        supervision: SupervisionConfig {
            scan_interval_secs: 1,
            test_mode: false,
        },
        logging: LoggingConfig::default(),
    }
}

/// P1(state 100, alive 101) owning E1(state 110, fault 112, sub SUB1) and
/// E2(state 130, fault 132); SUB1(state 120, fault 122).
fn populate(warden: &Warden, alive_interval_ms: u64) {
    let registry = warden.registry();

    let mut p1 = ProcessEntity::new(1, "P_TEST01", 100);
    p1.alive_tag_id = Some(101);
    p1.equipment_ids = vec![10, 20];
    registry.register_process(p1);
    registry
        .alive_timers
        .register(AliveTimer::new(101, 1, EntityKind::Process, alive_interval_ms));

    let mut e1 = EquipmentEntity::new(10, "E_TEST01", 1, 110);
    e1.alive_tag_id = Some(111);
    e1.comm_fault_tag_id = Some(112);
    e1.sub_equipment_ids = vec![30];
    registry.register_equipment(e1);
    registry
        .alive_timers
        .register(AliveTimer::new(111, 10, EntityKind::Equipment, 60_000));
    let mut e1_fault = CommFaultBinding::new(112, 10, EntityKind::Equipment, json!(true));
    e1_fault.alive_tag_id = Some(111);
    registry.comm_faults.register(e1_fault);

    let mut e2 = EquipmentEntity::new(20, "E_TEST02", 1, 130);
    e2.comm_fault_tag_id = Some(132);
    registry.register_equipment(e2);
    registry
        .comm_faults
        .register(CommFaultBinding::new(132, 20, EntityKind::Equipment, json!(true)));

    let mut sub1 = SubEquipmentEntity::new(30, "SUB_TEST01", 10, 120);
    sub1.comm_fault_tag_id = Some(122);
    registry.register_sub_equipment(sub1);
    registry
        .comm_faults
        .register(CommFaultBinding::new(122, 30, EntityKind::SubEquipment, json!(true)));
}

fn connection_envelope(reply_to: &str) -> String {
    let envelope = RequestEnvelope {
        request_id: reply_to.trim_start_matches("warden.reply.").to_string(),
        reply_to: reply_to.to_string(),
        timestamp: Utc::now(),
        kind: RequestKind::ProcessConnection(ProcessConnectionRequest {
            process_name: "P_TEST01".to_string(),
            process_host_name: "daq-host-1".to_string(),
            process_startup_time: Utc::now(),
        }),
    };
    serde_json::to_string(&envelope).unwrap()
}

/// Wait for a published frame on the given topic.
async fn await_frame(
    published: &mut broadcast::Receiver<InboundFrame>,
    topic: &str,
) -> InboundFrame {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), published.recv())
            .await
            .expect("timed out waiting for published frame")
            .expect("published channel closed");
        if frame.topic == topic {
            return frame;
        }
    }
}

async fn status_of(warden: &Warden, state_tag_id: u64) -> Option<SupervisionStatus> {
    warden
        .registry()
        .control_tags
        .get(state_tag_id)
        .and_then(|tag| tag.as_status())
}

async fn connect_process(warden: &Warden, transport: &MemoryTransport) -> i64 {
    let mut published = transport.published();
    let reply_to = "warden.reply.handshake-1";
    assert!(
        transport
            .inject("warden.request", &connection_envelope(reply_to))
            .await
    );
    let frame = await_frame(&mut published, reply_to).await;
    let reply: serde_json::Value = serde_json::from_str(&frame.payload).unwrap();
    let response: ProcessConnectionResponse =
        serde_json::from_value(reply["body"].clone()).unwrap();
    assert!(!response.is_rejected());
    response.process_pik
}

#[tokio::test]
async fn process_alive_expiry_cascades_down_with_fault_tags() {
    let transport = Arc::new(MemoryTransport::new());
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden, 200);
    warden.start().await.unwrap();

    connect_process(&warden, &transport).await;

    // No alive updates arrive; the scanner detects expiry within two sweeps.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(status_of(&warden, 100).await, Some(SupervisionStatus::Down));
    assert_eq!(status_of(&warden, 110).await, Some(SupervisionStatus::Down));
    assert_eq!(status_of(&warden, 130).await, Some(SupervisionStatus::Down));
    assert_eq!(status_of(&warden, 120).await, Some(SupervisionStatus::Down));

    let registry = warden.registry();
    assert_eq!(registry.control_tags.get(112).unwrap().value, json!(true));
    assert_eq!(registry.control_tags.get(132).unwrap().value, json!(true));
    assert_eq!(registry.control_tags.get(122).unwrap().value, json!(true));

    warden.shutdown().await;
}

#[tokio::test]
async fn running_process_connection_is_rejected_without_mutation() {
    let transport = Arc::new(MemoryTransport::new());
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden, 60_000);
    warden.start().await.unwrap();

    let first_pik = connect_process(&warden, &transport).await;
    assert_eq!(status_of(&warden, 100).await, Some(SupervisionStatus::Startup));

    let mut published = transport.published();
    let reply_to = "warden.reply.handshake-2";
    assert!(
        transport
            .inject("warden.request", &connection_envelope(reply_to))
            .await
    );
    let frame = await_frame(&mut published, reply_to).await;
    let reply: serde_json::Value = serde_json::from_str(&frame.payload).unwrap();
    let response: ProcessConnectionResponse =
        serde_json::from_value(reply["body"].clone()).unwrap();
    assert_eq!(response.process_pik, PIK_REJECTED);

    // No state mutation on rejection.
    assert_eq!(status_of(&warden, 100).await, Some(SupervisionStatus::Startup));
    let cached = warden
        .registry()
        .processes
        .with_read(1, |p| p.current_pik)
        .await
        .flatten();
    assert_eq!(cached, Some(first_pik));

    warden.shutdown().await;
}

#[tokio::test]
async fn fault_tag_marks_equipment_down_without_resetting_timer() {
    let transport = Arc::new(MemoryTransport::new());
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden, 60_000);
    warden.start().await.unwrap();

    // Bring E1 up through its alive tag first.
    let alive = json!({
        "tagId": 111,
        "value": 1,
        "sourceTimestamp": Utc::now(),
    });
    assert!(transport.inject("warden.control.10", &alive.to_string()).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(status_of(&warden, 110).await, Some(SupervisionStatus::Running));

    let timer_before = warden.registry().alive_timers.get(111).unwrap().last_update;

    let fault = json!({
        "tagId": 112,
        "value": true,
        "sourceTimestamp": Utc::now(),
    });
    assert!(transport.inject("warden.control.10", &fault.to_string()).await);
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(status_of(&warden, 110).await, Some(SupervisionStatus::Down));
    assert_eq!(status_of(&warden, 120).await, Some(SupervisionStatus::Down));
    assert_eq!(
        warden.registry().alive_timers.get(111).unwrap().last_update,
        timer_before
    );

    warden.shutdown().await;
}

#[tokio::test]
async fn disconnection_with_matching_pik_cascades_down() {
    let transport = Arc::new(MemoryTransport::new());
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden, 60_000);
    warden.start().await.unwrap();

    let pik = connect_process(&warden, &transport).await;

    let envelope = RequestEnvelope {
        request_id: "disc-1".to_string(),
        reply_to: "warden.reply.disc-1".to_string(),
        timestamp: Utc::now(),
        kind: RequestKind::ProcessDisconnection(ProcessDisconnectionRequest {
            process_id: None,
            process_name: Some("P_TEST01".to_string()),
            process_pik: pik,
            process_startup_time: Utc::now(),
        }),
    };
    assert!(
        transport
            .inject("warden.request", &serde_json::to_string(&envelope).unwrap())
            .await
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(status_of(&warden, 100).await, Some(SupervisionStatus::Down));
    assert_eq!(status_of(&warden, 110).await, Some(SupervisionStatus::Down));
    assert_eq!(status_of(&warden, 130).await, Some(SupervisionStatus::Down));
    let cached = warden
        .registry()
        .processes
        .with_read(1, |p| p.current_pik)
        .await
        .flatten();
    assert_eq!(cached, None);

    warden.shutdown().await;
}

#[tokio::test]
async fn accepted_transitions_are_published_on_the_supervision_topic() {
    let transport = Arc::new(MemoryTransport::new());
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden, 60_000);
    warden.start().await.unwrap();

    let mut published = transport.published();
    connect_process(&warden, &transport).await;

    let frame = await_frame(&mut published, "warden.supervision").await;
    let event: warden::SupervisionEvent = serde_json::from_str(&frame.payload).unwrap();
    assert_eq!(event.entity_type, EntityKind::Process);
    assert_eq!(event.entity_id, 1);
    assert_eq!(event.status, SupervisionStatus::Startup);

    warden.shutdown().await;
}
