//! Connection loss and recovery: subscriptions are rebuilt from scratch and
//! registered listeners keep working across the reconnect.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use warden::config::{
    AppConfig, ConnectionConfig, DeliveryConfig, LoggingConfig, ServerConfig, SupervisionConfig,
    TopicConfig,
};
use warden::domain::{EntityKind, EquipmentEntity, ProcessEntity, SupervisionStatus};
use warden::registry::{AliveTimer, CommFaultBinding};
use warden::session::{ConnectionListener, ConnectionState, MemoryTransport};
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
            scan_interval_secs: 60,
            test_mode: false,
        },
        logging: LoggingConfig::default(),
    }
}

fn populate(warden: &Warden) {
    let registry = warden.registry();
    let mut p1 = ProcessEntity::new(1, "P_TEST01", 100);
    p1.equipment_ids = vec![10];
    registry.register_process(p1);

    let mut e1 = EquipmentEntity::new(10, "E_TEST01", 1, 110);
    e1.alive_tag_id = Some(111);
    e1.comm_fault_tag_id = Some(112);
    registry.register_equipment(e1);
    registry
        .alive_timers
        .register(AliveTimer::new(111, 10, EntityKind::Equipment, 60_000));
    registry
        .comm_faults
        .register(CommFaultBinding::new(112, 10, EntityKind::Equipment, json!(true)));
}

async fn inject_alive(transport: &MemoryTransport) -> bool {
    let update = json!({
        "tagId": 111,
        "value": 1,
        "sourceTimestamp": Utc::now(),
    });
    transport.inject("warden.control.10", &update.to_string()).await
}

#[tokio::test]
async fn subscriptions_survive_a_reconnect() {
    let transport = Arc::new(MemoryTransport::new());
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden);
    warden.start().await.unwrap();

    assert!(inject_alive(&transport).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        warden
            .registry()
            .control_tags
            .get(110)
            .and_then(|t| t.as_status()),
        Some(SupervisionStatus::Running)
    );

    transport.fail("broker restart");

    // The session reconnects and rebuilds all topics.
    tokio::time::sleep(Duration::from_millis(1800)).await;
    assert_eq!(warden.session().state().await, ConnectionState::Connected);
    let subs = transport.subscriptions().await;
    assert!(subs.contains("warden.supervision"));
    assert!(subs.contains("warden.request"));
    assert!(subs.contains("warden.control.10"));

    // The rebuilt channel still feeds the state machine.
    warden
        .supervision()
        .entity_down(EntityKind::Equipment, 10, Utc::now(), "fault injected")
        .await;
    assert!(inject_alive(&transport).await);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        warden
            .registry()
            .control_tags
            .get(110)
            .and_then(|t| t.as_status()),
        Some(SupervisionStatus::Running)
    );

    warden.shutdown().await;
}

#[tokio::test]
async fn repeated_connect_failures_keep_retrying() {
    let transport = Arc::new(MemoryTransport::new());
    // First two attempts refused; the third succeeds.
    transport.fail_next_connects(2);
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden);

    warden.start().await.unwrap();
    assert_eq!(warden.session().state().await, ConnectionState::Connected);
    assert!(transport.subscriptions().await.contains("warden.control.10"));

    warden.shutdown().await;
}

#[tokio::test]
async fn connection_listeners_see_both_transitions() {
    let transport = Arc::new(MemoryTransport::new());
    let warden = Warden::new(test_config(), transport.clone(), None);
    populate(&warden);

    struct Recorder {
        log: std::sync::Mutex<Vec<&'static str>>,
    }
    impl ConnectionListener for Recorder {
        fn on_connection(&self) {
            self.log.lock().unwrap().push("up");
        }
        fn on_disconnection(&self) {
            self.log.lock().unwrap().push("down");
        }
    }
    let recorder = Arc::new(Recorder {
        log: std::sync::Mutex::new(Vec::new()),
    });
    warden
        .session()
        .register_connection_listener(recorder.clone() as Arc<dyn ConnectionListener>)
        .await;

    warden.start().await.unwrap();
    transport.fail("broker restart");
    tokio::time::sleep(Duration::from_millis(1800)).await;

    // Immediate "down" at registration, "up" on connect, then the
    // disconnect/reconnect pair from the fault.
    assert_eq!(
        recorder.log.lock().unwrap().clone(),
        vec!["down", "up", "down", "up"]
    );

    warden.shutdown().await;
}
