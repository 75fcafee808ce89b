//! End-to-end scenario tests (§8), driven through the real router via
//! `tower::ServiceExt::oneshot` rather than a bound socket.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use fleet_core::{
    CpuMetrics, DiskMetrics, MemoryMetrics, MetricReport, NetworkMetrics, ProcessesMetrics, Report,
};
use fleet_server::config::ServerConfig;
use fleet_server::state::AppState;
use fleet_server::store::sqlite;
use serde_json::{json, Value};
use tower::ServiceExt;

fn sample_metrics(cpu: f32) -> MetricReport {
    MetricReport {
        uptime_seconds: 10,
        cpu: CpuMetrics {
            percent: cpu,
            per_core: vec![],
            load_avg: [0.0, 0.0, 0.0],
            count: 1,
            threads: 1,
        },
        memory: MemoryMetrics {
            total: 100,
            available: 50,
            used: 50,
            percent: cpu,
            swap_total: 0,
            swap_used: 0,
            swap_percent: 0.0,
        },
        disk: DiskMetrics {
            total: 100,
            used: 25,
            free: 75,
            percent: cpu,
            read_bytes: 0,
            write_bytes: 0,
            read_count: 0,
            write_count: 0,
        },
        network: NetworkMetrics {
            bytes_sent: 0,
            bytes_recv: 0,
            packets_sent: 0,
            packets_recv: 0,
            errin: 0,
            errout: 0,
            dropin: 0,
            dropout: 0,
            connections: 0,
        },
        processes: ProcessesMetrics {
            total: 0,
            top_cpu: vec![],
            top_memory: vec![],
        },
        battery: None,
        temperature: None,
        users: vec![],
        security: None,
    }
}

async fn test_state() -> AppState {
    let db = sqlite::connect_in_memory().await.unwrap();
    let mut config = ServerConfig::default();
    config.server.api_key = "test-key".into();
    AppState::new(db, config).await
}

fn report_request(machine_id: &str, report: &Report) -> Request<Body> {
    let envelope = fleet_core::envelope::wrap_plaintext(
        &serde_json::to_vec(report).unwrap(),
        machine_id,
    );
    Request::builder()
        .method("POST")
        .uri("/api/fleet/report")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key")
        .body(Body::from(serde_json::to_vec(&envelope).unwrap()))
        .unwrap()
}

async fn send_report(
    router: &axum::Router,
    machine_id: &str,
    cpu: f32,
    timestamp: chrono::DateTime<Utc>,
) -> StatusCode {
    let report = Report {
        machine_id: machine_id.to_string(),
        timestamp,
        machine_info: None,
        metrics: sample_metrics(cpu),
        monitors: Default::default(),
        speedtest: None,
        command_results: vec![],
    };
    router
        .clone()
        .oneshot(report_request(machine_id, &report))
        .await
        .unwrap()
        .status()
}

// Scenario 1: fresh agent registration — first report creates the machine
// and it shows up as online.
#[tokio::test]
async fn fresh_agent_registration() {
    let state = test_state().await;
    let router = fleet_server::create_router(state.clone());

    let status = send_report(&router, "mac-fresh", 12.0, Utc::now()).await;
    assert_eq!(status, StatusCode::OK);

    let (_, is_new) = state.store.get_or_register("mac-fresh", Utc::now()).await;
    assert!(!is_new, "second lookup should find the already-registered machine");

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/fleet/machines")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(
        &axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap(),
    )
    .unwrap();
    let machines = body["machines"].as_array().unwrap();
    assert!(machines.iter().any(|m| m["machine_id"] == "mac-fresh"));
}

// Scenario 2: encrypted round-trip — a report sealed with the server's
// configured key decrypts and ingests identically to a plaintext one.
#[tokio::test]
async fn encrypted_round_trip() {
    let key = fleet_core::envelope::decode_key(&base64_key()).unwrap();
    let db = sqlite::connect_in_memory().await.unwrap();
    let mut config = ServerConfig::default();
    config.server.api_key = "test-key".into();
    config.server.encryption_key = Some(base64_key());
    let state = AppState::new(db, config).await;
    let router = fleet_server::create_router(state.clone());

    let report = Report {
        machine_id: "mac-enc".to_string(),
        timestamp: Utc::now(),
        machine_info: None,
        metrics: sample_metrics(20.0),
        monitors: Default::default(),
        speedtest: None,
        command_results: vec![],
    };
    let body = serde_json::to_vec(&report).unwrap();
    let envelope = fleet_core::envelope::seal(&body, &key, "mac-enc");

    let request = Request::builder()
        .method("POST")
        .uri("/api/fleet/report")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key")
        .body(Body::from(serde_json::to_vec(&envelope).unwrap()))
        .unwrap();

    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entry = state.store.get("mac-enc").await.unwrap();
    let guard = entry.lock().await;
    assert_eq!(guard.latest_metrics.as_ref().unwrap().cpu.percent, 20.0);
}

fn base64_key() -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode([7u8; 32])
}

// Scenario 3: offline transition — status moves online -> warning -> offline
// at the 2x / 5x interval boundaries (§4.4).
#[tokio::test]
async fn offline_transition_boundaries() {
    let interval = 10i64;
    assert_eq!(
        fleet_core::MachineStatus::derive(
            Utc::now() - chrono::Duration::seconds(2 * interval - 1),
            Utc::now(),
            interval
        ),
        fleet_core::MachineStatus::Online
    );
    assert_eq!(
        fleet_core::MachineStatus::derive(
            Utc::now() - chrono::Duration::seconds(2 * interval + 1),
            Utc::now(),
            interval
        ),
        fleet_core::MachineStatus::Warning
    );
    assert_eq!(
        fleet_core::MachineStatus::derive(
            Utc::now() - chrono::Duration::seconds(5 * interval + 1),
            Utc::now(),
            interval
        ),
        fleet_core::MachineStatus::Offline
    );
}

// Scenario 4: command round-trip — an enqueued command is delivered on the
// agent's next report and its result is recorded.
#[tokio::test]
async fn command_round_trip() {
    let state = test_state().await;
    let router = fleet_server::create_router(state.clone());

    assert_eq!(send_report(&router, "mac-cmd", 5.0, Utc::now()).await, StatusCode::OK);

    let enqueue_request = Request::builder()
        .method("POST")
        .uri("/api/fleet/commands/mac-cmd")
        .header("content-type", "application/json")
        .header("x-api-key", "test-key")
        .body(Body::from(
            serde_json::to_vec(&json!({ "type": "speedtest_now", "args": {} })).unwrap(),
        ))
        .unwrap();
    let response = router.clone().oneshot(enqueue_request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let enqueued: Value = serde_json::from_slice(
        &axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap(),
    )
    .unwrap();
    let command_id = enqueued["command_id"].as_str().unwrap().to_string();

    // Next report delivers the pending command.
    let report = Report {
        machine_id: "mac-cmd".to_string(),
        timestamp: Utc::now(),
        machine_info: None,
        metrics: sample_metrics(5.0),
        monitors: Default::default(),
        speedtest: None,
        command_results: vec![],
    };
    let response = router
        .clone()
        .oneshot(report_request("mac-cmd", &report))
        .await
        .unwrap();
    let delivered: Value = serde_json::from_slice(
        &axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap(),
    )
    .unwrap();
    let commands = delivered["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0]["command_id"], command_id);

    // Agent posts the result back on its following report.
    let report_with_result = Report {
        machine_id: "mac-cmd".to_string(),
        timestamp: Utc::now(),
        machine_info: None,
        metrics: sample_metrics(5.0),
        monitors: Default::default(),
        speedtest: None,
        command_results: vec![fleet_core::CommandResult {
            command_id: command_id.parse().unwrap(),
            status: "ok".to_string(),
            output: json!({ "download_mbps": 100.0 }),
        }],
    };
    let status = router
        .oneshot(report_request("mac-cmd", &report_with_result))
        .await
        .unwrap()
        .status();
    assert_eq!(status, StatusCode::OK);
}

// Scenario 5: fleet summary math — three machines reporting CPU 30/60/90
// average to 60.
#[tokio::test]
async fn fleet_summary_math() {
    let state = test_state().await;
    let router = fleet_server::create_router(state.clone());

    for (id, cpu) in [("mac-a", 30.0), ("mac-b", 60.0), ("mac-c", 90.0)] {
        assert_eq!(send_report(&router, id, cpu, Utc::now()).await, StatusCode::OK);
    }

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/fleet/summary")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(
        &axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap(),
    )
    .unwrap();
    assert_eq!(body["total_machines"], 3);
    assert_eq!(body["online"], 3);
    assert!((body["avg_cpu"].as_f64().unwrap() - 60.0).abs() < 0.001);
}

// Scenario 6: brute-force lockout — the 6th login attempt within the window
// is rejected before password verification even runs.
#[tokio::test]
async fn brute_force_lockout_on_sixth_attempt() {
    let db = sqlite::connect_in_memory().await.unwrap();
    let mut config = ServerConfig::default();
    config.server.api_key = "test-key".into();
    let state = AppState::new(db, config).await;
    let router = fleet_server::create_router(state.clone());

    let (hash, _salt) = fleet_server::auth::password::hash_password("correct-horse").unwrap();
    sqlite::create_user(&state.db, "operator", &hash, &_salt)
        .await
        .unwrap();

    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)), 51234);
    let login_attempt = |password: &'static str| {
        let mut request = Request::builder()
            .method("POST")
            .uri("/login")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({ "username": "operator", "password": password }))
                    .unwrap(),
            ))
            .unwrap();
        request.extensions_mut().insert(axum::extract::ConnectInfo(addr));
        request
    };

    for _ in 0..5 {
        let response = router.clone().oneshot(login_attempt("wrong")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // 6th attempt, even with the correct password, is locked out.
    let response = router.oneshot(login_attempt("correct-horse")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}
