//! End-to-end tests of the translation engine against simulated ECUs
//!
//! Every test builds an engine from TOML, scripts the simulated ECU behind
//! it and checks both the result and the exact frames on the wire.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use sovd2uds::session::XorKey;
use sovd2uds::transport::sim::SimulatedEcu;
use sovd2uds::{
    BridgeConfig, DiagError, ErrorKind, OperationKind, SecurityDenial, SovdExecutor, SovdRequest,
    SovdValue, TranslationEngine,
};

// =============================================================================
// Fixtures
// =============================================================================

const CONFIG: &str = r#"
[pool]
maintenance_interval_ms = 50

[[targets]]
id = "engine"
name = "Engine Control Module"
transport = { type = "simulated" }
timing = { pending_poll_interval_ms = 10, pending_ceiling_ms = 300, max_retries = 2, backoff = { base_delay_ms = 5 } }

[[targets.catalog.data]]
name = "coding"
did = "0x0100"
data_type = { type = "bytes", length = 2 }
writable = true
security_level = 1

[[targets.catalog.data]]
name = "coolant_temp"
did = "0xF405"
data_type = { type = "number", kind = "u8", offset = -40.0 }
unit = "degC"

[[targets.catalog.routines]]
name = "self_test"
rid = "0xFF00"
result_type = { type = "number", kind = "u8" }

[[targets.catalog.actuators]]
name = "fan"
ioid = "0x0200"
data_type = { type = "number", kind = "u8" }

[[targets]]
id = "abs"
transport = { type = "simulated" }
"#;

fn engine() -> TranslationEngine {
    let config = BridgeConfig::from_toml_str(CONFIG).unwrap();
    TranslationEngine::builder(config).build().unwrap()
}

fn ecu(engine: &TranslationEngine, id: &str) -> Arc<SimulatedEcu> {
    engine.simulated().unwrap().ecu(id).unwrap()
}

fn read(component: &str, identifier: &str) -> SovdRequest {
    SovdRequest::new(component, OperationKind::ReadData, identifier)
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_read_vin() {
    let engine = engine();
    let response = engine.execute_request(read("engine", "vin")).await;

    assert!(response.is_success());
    assert_eq!(response.data, Some(SovdValue::from("WVWZZZ1KZBW123456")));
    assert!(ecu(&engine, "engine")
        .requests()
        .contains(&vec![0x22, 0xF1, 0x90]));
}

#[tokio::test]
async fn test_read_scaled_value() {
    let engine = engine();
    ecu(&engine, "engine").set_did(0xF405, vec![132]);

    let value = engine.execute(&read("engine", "coolant_temp")).await.unwrap();
    assert_eq!(value, Some(SovdValue::Float(92.0)));
}

#[tokio::test]
async fn test_envelope_json() {
    let engine = engine();
    let response = engine.execute_request(read("engine", "vin")).await;
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["status"], json!("success"));
    assert_eq!(json["data"], json!("WVWZZZ1KZBW123456"));
    assert!(json["request_id"].is_string());
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_unknown_component_never_touches_transport() {
    let engine = engine();
    let response = engine.execute_request(read("transmission", "vin")).await;

    assert!(!response.is_success());
    assert_eq!(response.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(response.status_code(), 404);
    for id in ["engine", "abs"] {
        assert_eq!(ecu(&engine, id).links_opened(), 0);
        assert!(ecu(&engine, id).requests().is_empty());
    }
}

#[tokio::test]
async fn test_unknown_data_item() {
    let engine = engine();
    let err = engine.execute(&read("engine", "odometer")).await.unwrap_err();
    assert!(matches!(err, DiagError::NotFound(_)));
    assert_eq!(ecu(&engine, "engine").links_opened(), 0);
}

// =============================================================================
// Negative responses and retries
// =============================================================================

#[tokio::test]
async fn test_clear_dtc_out_of_range_not_retried() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    ecu.set_response([0x14, 0xFF, 0xFF, 0xFF], vec![vec![0x7F, 0x14, 0x31]]);

    let response = engine
        .execute_request(SovdRequest::new("engine", OperationKind::ClearDtc, "all"))
        .await;

    assert_eq!(response.error_kind, Some(ErrorKind::NegativeResponse));
    let detail = response.error_detail.unwrap();
    assert_eq!(detail.nrc, Some(0x31));
    assert_eq!(detail.nrc_name.as_deref(), Some("RequestOutOfRange"));
    assert_eq!(detail.service_id, Some(0x14));
    assert_eq!(ecu.request_count(0x14), 1);
}

#[tokio::test]
async fn test_busy_repeat_retried() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    ecu.push_exchange([0x22, 0xF1, 0x90], vec![vec![0x7F, 0x22, 0x21]]);

    let value = engine.execute(&read("engine", "vin")).await.unwrap();
    assert_eq!(value, Some(SovdValue::from("WVWZZZ1KZBW123456")));
    assert_eq!(ecu.request_count(0x22), 2);
}

#[tokio::test]
async fn test_malformed_response() {
    let engine = engine();
    ecu(&engine, "engine").set_response([0x22, 0xF1, 0x90], vec![vec![0x63, 0xF1, 0x90]]);

    let err = engine.execute(&read("engine", "vin")).await.unwrap_err();
    assert!(matches!(err, DiagError::MalformedResponse(_)));
}

// =============================================================================
// Response pending
// =============================================================================

#[tokio::test]
async fn test_pending_then_positive() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    // connect first so only the pending exchange is timed
    engine.execute(&read("engine", "ecu_serial_number")).await.unwrap();

    let mut vin = vec![0x62, 0xF1, 0x90];
    vin.extend_from_slice(b"WVWZZZ1KZBW123456");
    ecu.push_pending([0x22, 0xF1, 0x90], 5, vin);

    let started = Instant::now();
    let value = engine.execute(&read("engine", "vin")).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(value, Some(SovdValue::from("WVWZZZ1KZBW123456")));
    // ceiling 300 ms plus one 10 ms poll
    assert!(elapsed <= Duration::from_millis(310), "took {elapsed:?}");
    // pending is waited out on the same exchange, not re-requested
    assert_eq!(ecu.request_count(0x22), 2);
}

#[tokio::test]
async fn test_pending_ceiling_times_out() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    engine.execute(&read("engine", "ecu_serial_number")).await.unwrap();
    ecu.push_pending([0x22, 0xF1, 0x90], 10_000, vec![0x62]);

    let started = Instant::now();
    let response = engine.execute_request(read("engine", "vin")).await;
    let elapsed = started.elapsed();

    assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
    assert!(elapsed <= Duration::from_millis(400), "took {elapsed:?}");

    // the indeterminate link was dropped; the next request reconnects
    assert_eq!(ecu.links_closed(), 1);
    ecu.clear_scripts();
    assert!(engine.execute(&read("engine", "vin")).await.is_ok());
    assert_eq!(ecu.links_opened(), 2);
}

#[tokio::test]
async fn test_request_deadline() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    engine.execute(&read("engine", "vin")).await.unwrap();
    ecu.set_latency(Duration::from_millis(300));

    let err = engine
        .execute(&read("engine", "vin").with_timeout(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(matches!(err, DiagError::Timeout(_)));

    ecu.set_latency(Duration::ZERO);
    assert!(engine.execute(&read("engine", "vin")).await.is_ok());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_target_serialized() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    ecu.set_latency(Duration::from_millis(10));

    let calls = (0..8).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.execute(&read("engine", "vin")).await })
    });
    for result in futures::future::join_all(calls).await {
        assert!(result.unwrap().is_ok());
    }

    assert_eq!(ecu.overlapping_calls(), 0);
    assert_eq!(ecu.request_count(0x22), 8);
    assert_eq!(ecu.links_opened(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_targets_parallel() {
    let engine = engine();
    // warm up both sessions
    engine.execute(&read("engine", "vin")).await.unwrap();
    engine.execute(&read("abs", "vin")).await.unwrap();

    let latency = Duration::from_millis(200);
    ecu(&engine, "engine").set_latency(latency);
    ecu(&engine, "abs").set_latency(latency);

    let engine_vin = read("engine", "vin");
    let abs_vin = read("abs", "vin");
    let started = Instant::now();
    let (a, b) = tokio::join!(engine.execute(&engine_vin), engine.execute(&abs_vin));
    let elapsed = started.elapsed();

    assert!(a.is_ok() && b.is_ok());
    assert!(elapsed < latency * 2, "took {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_target_fifo_order() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    engine.execute(&read("engine", "vin")).await.unwrap();
    ecu.set_latency(Duration::from_millis(30));
    ecu.clear_requests();

    let items = [
        "ecu_serial_number",
        "ecu_hardware_version",
        "ecu_software_version",
        "system_supplier_id",
        "vin",
    ];
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let mut tasks = Vec::new();
    for item in items {
        let engine = engine.clone();
        let tx = tx.clone();
        tasks.push(tokio::spawn(async move {
            let result = engine.execute(&read("engine", item)).await;
            tx.send(item).unwrap();
            result
        }));
        // queue each caller behind the previous one
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    drop(tx);
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let mut completed = Vec::new();
    while let Some(item) = rx.recv().await {
        completed.push(item);
    }
    assert_eq!(completed, items.to_vec());

    let dids: Vec<_> = ecu.requests().iter().map(|r| [r[1], r[2]]).collect();
    assert_eq!(
        dids,
        vec![[0xF1, 0x8C], [0xF1, 0x91], [0xF1, 0x94], [0xF1, 0x8A], [0xF1, 0x90]]
    );
    assert_eq!(ecu.overlapping_calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_connection_shared_across_targets() {
    let config = CONFIG.replacen("[pool]\n", "[pool]\nmax_connections = 1\n", 1);
    let engine = TranslationEngine::builder(BridgeConfig::from_toml_str(&config).unwrap())
        .build()
        .unwrap();
    ecu(&engine, "engine").set_latency(Duration::from_millis(50));

    let engine_vin = read("engine", "vin");
    let abs_vin = read("abs", "vin").with_timeout(Duration::from_secs(1));
    let started = Instant::now();
    let (a, b) = tokio::join!(engine.execute(&engine_vin), async {
        // let the engine request take the only connection first
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.execute(&abs_vin).await
    });
    let elapsed = started.elapsed();

    assert!(a.is_ok(), "{a:?}");
    assert!(b.is_ok(), "{b:?}");
    assert!(elapsed < Duration::from_millis(500), "took {elapsed:?}");
    // the idle engine link was evicted to make room for abs
    assert_eq!(ecu(&engine, "engine").links_closed(), 1);
    assert_eq!(ecu(&engine, "abs").links_opened(), 1);
}

// =============================================================================
// Security
// =============================================================================

#[tokio::test]
async fn test_secured_write_unlocks_once() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");

    let write = |value: &str| {
        SovdRequest::new("engine", OperationKind::WriteData, "coding").with_parameter("value", value)
    };
    engine.execute(&write("ABCD")).await.unwrap();
    engine.execute(&write("0102")).await.unwrap();

    let requests = ecu.requests();
    let security: Vec<_> = requests.iter().filter(|r| r[0] == 0x27).collect();
    assert_eq!(security.len(), 2);
    assert_eq!(security[0], &vec![0x27, 0x01]);
    assert_eq!(security[1][..2], [0x27, 0x02]);

    let key_at = requests.iter().position(|r| r[..2] == [0x27, 0x02]).unwrap();
    let write_at = requests.iter().position(|r| r[0] == 0x2E).unwrap();
    assert!(key_at < write_at);

    assert_eq!(ecu.did(0x0100), Some(vec![0x01, 0x02]));
    assert_eq!(ecu.session(), 0x03);
}

#[tokio::test]
async fn test_failed_key_blocks_write() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    ecu.set_key_algorithm(Arc::new(XorKey { mask: 0x55 }));

    let err = engine
        .execute(
            &SovdRequest::new("engine", OperationKind::WriteData, "coding")
                .with_parameter("value", "ABCD"),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DiagError::SecurityAccessDenied {
            reason: SecurityDenial::InvalidKey,
            ..
        }
    ));
    assert_eq!(ecu.request_count(0x27), 2);
    assert_eq!(ecu.request_count(0x2E), 0);
}

#[tokio::test]
async fn test_attempt_exhaustion_reports_delay() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    ecu.set_key_algorithm(Arc::new(XorKey { mask: 0x55 }));

    let unlock = SovdRequest::new("engine", OperationKind::SecurityAccess, "1");
    let mut last = None;
    for _ in 0..3 {
        last = Some(engine.execute_request(unlock.clone()).await);
    }
    let detail = last.unwrap().error_detail.unwrap();
    assert_eq!(detail.nrc, Some(0x36));
    assert!(detail.delay_required);

    // locked out: the seed request itself is refused
    let response = engine.execute_request(unlock).await;
    assert_eq!(response.error_kind, Some(ErrorKind::SecurityAccessDenied));
    assert_eq!(response.error_detail.unwrap().nrc, Some(0x37));
}

// =============================================================================
// DTCs
// =============================================================================

#[tokio::test]
async fn test_read_dtcs_in_ecu_order() {
    let engine = engine();
    let value = engine
        .execute(&SovdRequest::new("engine", OperationKind::ReadDtc, "all"))
        .await
        .unwrap()
        .unwrap();

    let SovdValue::Array(dtcs) = value else {
        panic!("expected an array, got {value:?}");
    };
    let codes: Vec<_> = dtcs
        .iter()
        .map(|d| d.get("code").and_then(SovdValue::as_str).unwrap().to_string())
        .collect();
    assert_eq!(codes, vec!["P0101", "C0420", "U0100"]);
    assert_eq!(
        dtcs[0].get("status").and_then(|s| s.get("confirmed")),
        Some(&SovdValue::Bool(true))
    );
}

#[tokio::test]
async fn test_dtc_count_and_snapshot() {
    let engine = engine();
    let count = engine
        .execute(
            &SovdRequest::new("engine", OperationKind::ReadDtc, "count")
                .with_parameter("status_mask", 0x08i64),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(count.get("count"), Some(&SovdValue::Integer(2)));

    let snapshot = engine
        .execute(
            &SovdRequest::new("engine", OperationKind::ReadDtc, "snapshot")
                .with_parameter("dtc", "P0101"),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot.get("record"), Some(&SovdValue::Integer(1)));
    assert_eq!(
        snapshot.get("data"),
        Some(&SovdValue::Bytes(vec![0x01, 0xF4, 0x0C, 0x0B, 0xB8]))
    );
}

#[tokio::test]
async fn test_clear_with_filter() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");

    let clear = |codes: Vec<&str>| {
        SovdRequest::new("engine", OperationKind::ClearDtc, "all").with_parameter(
            "dtcs",
            SovdValue::Array(codes.into_iter().map(SovdValue::from).collect()),
        )
    };

    // nothing requested is stored: no clear is sent
    let value = engine.execute(&clear(vec!["B1234"])).await.unwrap().unwrap();
    assert_eq!(value.get("cleared"), Some(&SovdValue::Array(vec![])));
    assert_eq!(ecu.request_count(0x14), 0);

    let value = engine
        .execute(&clear(vec!["P0101", "B1234"]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        value.get("cleared"),
        Some(&SovdValue::Array(vec![
            "P0101".into(),
            "C0420".into(),
            "U0100".into()
        ]))
    );
    assert_eq!(
        value.get("not_present"),
        Some(&SovdValue::Array(vec!["B1234".into()]))
    );
    assert_eq!(ecu.request_count(0x14), 1);
    assert!(ecu.dtcs().is_empty());
}

#[tokio::test]
async fn test_clear_all_has_no_payload() {
    let engine = engine();
    let response = engine
        .execute_request(SovdRequest::new("engine", OperationKind::ClearDtc, "all"))
        .await;
    assert!(response.is_success());
    assert_eq!(response.data, None);
    assert!(ecu(&engine, "engine").dtcs().is_empty());
}

// =============================================================================
// Routines and actuators
// =============================================================================

#[tokio::test]
async fn test_routine_result_decoded() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    ecu.set_routine_result(0xFF00, vec![0x02]);

    let value = engine
        .execute(&SovdRequest::new("engine", OperationKind::ExecuteRoutine, "self_test"))
        .await
        .unwrap();
    assert_eq!(value, Some(SovdValue::Integer(2)));
    assert!(ecu.requests().contains(&vec![0x31, 0x01, 0xFF, 0x00]));
}

#[tokio::test]
async fn test_actuator_adjust_and_return() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");

    let value = engine
        .execute(
            &SovdRequest::new("engine", OperationKind::ControlActuator, "fan")
                .with_parameter("value", 42i64),
        )
        .await
        .unwrap();
    assert_eq!(value, Some(SovdValue::Integer(42)));
    assert_eq!(ecu.output(0x0200), Some(vec![42]));

    engine
        .execute(
            &SovdRequest::new("engine", OperationKind::ControlActuator, "fan")
                .with_parameter("action", "return_control"),
        )
        .await
        .unwrap();
    assert_eq!(ecu.output(0x0200), Some(vec![0]));
}

// =============================================================================
// ECU reset
// =============================================================================

#[tokio::test]
async fn test_reset_relocks_secured_items() {
    let engine = engine();
    let ecu = ecu(&engine, "engine");
    let write = SovdRequest::new("engine", OperationKind::WriteData, "coding")
        .with_parameter("value", "ABCD");
    engine.execute(&write).await.unwrap();
    assert_eq!(ecu.session(), 0x03);

    let value = engine
        .execute(&SovdRequest::new("engine", OperationKind::EcuReset, "hard"))
        .await
        .unwrap();
    assert_eq!(value, Some(SovdValue::object([("reset_type", "hard".into())])));
    assert!(ecu.requests().contains(&vec![0x11, 0x01]));
    assert_eq!(ecu.session(), 0x01);
    assert_eq!(ecu.security_level(), None);

    // the next secured write goes through session and seed/key again
    engine.execute(&write).await.unwrap();
    assert_eq!(ecu.request_count(0x27), 4);
    assert_eq!(ecu.links_opened(), 1);
}

#[tokio::test]
async fn test_reset_refused() {
    let engine = engine();
    ecu(&engine, "engine").set_response([0x11, 0x02], vec![vec![0x7F, 0x11, 0x22]]);

    let response = engine
        .execute_request(
            SovdRequest::new("engine", OperationKind::EcuReset, "ecu")
                .with_parameter("reset_type", 2i64),
        )
        .await;
    assert_eq!(response.error_kind, Some(ErrorKind::NegativeResponse));
    assert_eq!(
        response.error_detail.unwrap().nrc_name.as_deref(),
        Some("ConditionsNotCorrect")
    );
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_components_and_shutdown() {
    let engine = engine();
    assert_eq!(engine.component_ids(), vec!["abs".to_string(), "engine".to_string()]);
    let engine_target = engine.target("engine").unwrap();
    assert_eq!(engine_target.display_name(), "Engine Control Module");
    assert!(engine_target.catalog.resolve("coding").is_ok());

    engine.execute(&read("engine", "vin")).await.unwrap();
    assert_eq!(engine.open_connections(), 1);
    engine.shutdown().await;
    assert_eq!(engine.open_connections(), 0);
    assert_eq!(ecu(&engine, "engine").links_closed(), 1);
}
