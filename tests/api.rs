use actix_web::{
    App,
    dev::ServiceResponse,
    http::{StatusCode, header},
    test::{self, TestRequest},
    web,
};
use bridge_ui::{
    api::{self, Api, DeviceContext},
    device::{DeviceSignal, HostDevice, HostDeviceConfig, LogUpdateNotifier},
    link_status::{LinkStatusProvider, SharedLinkStatus},
    log_buffer::LogBuffer,
    services::{
        auth::SessionToken,
        parameters::{IniParameterStore, ParameterStore},
    },
};
use serde_json::{Value, json};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::sync::broadcast;

const BOUNDARY: &str = "bridgeuiboundary";

struct Fixture {
    _dir: TempDir,
    parameters_path: PathBuf,
    image_path: PathBuf,
    gcs: SharedLinkStatus,
    vehicle: SharedLinkStatus,
    log: LogBuffer,
    signals: broadcast::Receiver<DeviceSignal>,
    api: Api,
}

fn fixture_with_space(free_sketch_space: u32) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let parameters_path = dir.path().join("config").join("parameters.ini");
    let image_path = dir.path().join("firmware.bin");
    let (sender, signals) = broadcast::channel(16);
    let gcs = SharedLinkStatus::new();
    let vehicle = SharedLinkStatus::new();
    let log = LogBuffer::new(1024);

    let api = Api::new(DeviceContext {
        store: Box::new(IniParameterStore::open(&parameters_path).unwrap()),
        device: Box::new(HostDevice::new(
            HostDeviceConfig {
                image_path: image_path.clone(),
                free_sketch_space,
                flash_size_map: 4,
                flash_chip_id: 0x1640E0,
            },
            sender,
        )),
        notifier: Box::new(LogUpdateNotifier),
        gcs: Arc::new(gcs.clone()),
        vehicle: Arc::new(vehicle.clone()),
        log: Arc::new(log.clone()),
        restart_delay: Duration::from_millis(10),
    });

    Fixture {
        _dir: dir,
        parameters_path,
        image_path,
        gcs,
        vehicle,
        log,
        signals,
        api,
    }
}

fn fixture() -> Fixture {
    fixture_with_space(0x10_0000)
}

async fn info_json(fixture: &Fixture) -> Value {
    let res = call(
        fixture,
        TestRequest::get()
            .uri("/info.json")
            .insert_header(session_cookie()),
    )
    .await;
    test::read_body_json(res).await
}

fn session_cookie() -> (header::HeaderName, String) {
    (
        header::COOKIE,
        format!(
            "lang=en; {}",
            SessionToken::derive("admin", "admin1234").cookie_pair()
        ),
    )
}

async fn call(fixture: &Fixture, req: TestRequest) -> ServiceResponse {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(fixture.api.clone()))
            .configure(api::configure),
    )
    .await;
    test::call_service(&app, req.to_request()).await
}

async fn body_text(res: ServiceResponse) -> String {
    String::from_utf8(test::read_body(res).await.to_vec()).unwrap()
}

async fn next_signal(signals: &mut broadcast::Receiver<DeviceSignal>) -> DeviceSignal {
    tokio::time::timeout(Duration::from_secs(2), signals.recv())
        .await
        .expect("no device signal received")
        .expect("device signal channel closed")
}

fn multipart(filename: &str, content: &[u8]) -> (String, Vec<u8>) {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"update\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    (format!("multipart/form-data; boundary={BOUNDARY}"), body)
}

fn upload_request(filename: &str, content: &[u8]) -> TestRequest {
    let (content_type, body) = multipart(filename, content);

    TestRequest::post()
        .uri("/upload")
        .insert_header(session_cookie())
        .insert_header((header::CONTENT_TYPE, content_type))
        .set_payload(body)
}

#[actix_web::test]
async fn protected_endpoints_redirect_to_login() {
    let fixture = fixture();

    for path in [
        "/getsysconfig",
        "/getapconfig",
        "/getstaconfig",
        "/setparameters?baud=57600",
        "/getstatus",
        "/info.json",
        "/status.json",
        "/log.json",
        "/update",
    ] {
        let res = call(&fixture, TestRequest::get().uri(path)).await;

        assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY, "{path}");
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/login");
        assert_eq!(
            res.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );
        assert!(body_text(res).await.is_empty());
    }

    let (content_type, body) = multipart("firmware.bin", &[0xE9]);
    let res = call(
        &fixture,
        TestRequest::post()
            .uri("/upload")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body),
    )
    .await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert!(!fixture.image_path.exists());
}

#[actix_web::test]
async fn stale_session_cookie_is_rejected() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/getsysconfig")
            .insert_header((header::COOKIE, "ESPSESSIONID=0")),
    )
    .await;

    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
}

#[actix_web::test]
async fn login_sets_session_cookie_and_shows_system_view() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::post()
            .uri("/login")
            .set_form([("USERNAME", "admin"), ("PASSWORD", "admin1234")]),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::SET_COOKIE).unwrap(),
        SessionToken::derive("admin", "admin1234")
            .cookie_pair()
            .as_str()
    );
    assert!(body_text(res).await.contains(r#"name="baud" value="921600""#));
}

#[actix_web::test]
async fn failed_login_hides_credentials_unless_debugging() {
    let fixture = fixture();
    let wrong_login = || {
        TestRequest::get()
            .uri("/login?USERNAME=admin&PASSWORD=wrong")
    };

    let res = call(&fixture, wrong_login()).await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get(header::SET_COOKIE).is_none());
    let body = body_text(res).await;
    assert!(body.contains("Wrong username/password! try again."));
    assert!(!body.contains("admin,admin1234"));

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?debug=1")
            .insert_header(session_cookie()),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let body = body_text(call(&fixture, wrong_login()).await).await;
    assert!(body.contains("Wrong username/password! try again.admin,admin1234"));
}

#[actix_web::test]
async fn disconnect_clears_session_cookie() {
    let fixture = fixture();

    let res = call(&fixture, TestRequest::get().uri("/login?DISCONNECT=1")).await;

    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(
        res.headers().get(header::SET_COOKIE).unwrap(),
        "ESPSESSIONID=0"
    );
    assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/login");
}

#[actix_web::test]
async fn pages_are_not_cached() {
    let fixture = fixture();

    let res = call(&fixture, TestRequest::get().uri("/help")).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache, no-store, must-revalidate"
    );
    assert_eq!(res.headers().get(header::PRAGMA).unwrap(), "no-cache");
    assert_eq!(res.headers().get(header::EXPIRES).unwrap(), "0");
}

#[actix_web::test]
async fn set_parameters_persists_and_restarts() {
    let mut fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::post()
            .uri("/setparameters")
            .insert_header(session_cookie())
            .set_form([("reboot", "1"), ("baud", "57600")]),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_text(res).await.contains(r#"name="baud" value="57600""#));

    let stored = IniParameterStore::open(&fixture.parameters_path).unwrap();
    assert_eq!(stored.parameters().uart_baud_rate, 57600);

    assert_eq!(next_signal(&mut fixture.signals).await, DeviceSignal::Restart);
}

#[actix_web::test]
async fn invalid_field_rejects_batch_without_persisting() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?baud=57600&pwd=short")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(res).await, "BAD ARGS\r\n");
    assert!(!fixture.parameters_path.exists());
}

#[actix_web::test]
async fn empty_batch_is_rejected() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::post()
            .uri("/setparameters")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(res).await, "BAD ARGS\r\n");
}

#[actix_web::test]
async fn batch_of_unknown_fields_is_rejected_without_persisting() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::post()
            .uri("/setparameters?colour=blue&bauds=57600")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(res).await, "BAD ARGS\r\n");
    assert!(!fixture.parameters_path.exists());
}

#[actix_web::test]
async fn reboot_only_batch_is_unclassified_but_restarts() {
    let mut fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?reboot=1")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(res).await, "unknown error\r\n");
    assert!(fixture.parameters_path.exists());
    assert_eq!(next_signal(&mut fixture.signals).await, DeviceSignal::Restart);
}

#[actix_web::test]
async fn station_edit_confirms_with_station_view() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?cport=14600&ipsta=192.168.4.20")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    let body = body_text(res).await;
    assert!(body.contains("<h1>Station</h1>"));
    assert!(body.contains(r#"name="cport" value="14600""#));
    assert!(body.contains(r#"name="ipsta" value="192.168.4.20""#));
}

#[actix_web::test]
async fn system_view_wins_over_access_point_view() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?ssid=Field&baud=115200")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(body_text(res).await.contains("<h1>System</h1>"));

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/getapconfig")
            .insert_header(session_cookie()),
    )
    .await;
    assert!(body_text(res).await.contains(r#"name="ssid" value="Field""#));
}

#[actix_web::test]
async fn changed_credentials_invalidate_the_session() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?webpassword=secret99")
            .insert_header(session_cookie()),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/getsysconfig")
            .insert_header(session_cookie()),
    )
    .await;
    assert_eq!(res.status(), StatusCode::MOVED_PERMANENTLY);

    let res = call(
        &fixture,
        TestRequest::get().uri("/getsysconfig").insert_header((
            header::COOKIE,
            SessionToken::derive("admin", "secret99").cookie_pair(),
        )),
    )
    .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[actix_web::test]
async fn status_json_reports_and_resets_counters() {
    let fixture = fixture();
    fixture.gcs.record(|status| {
        status.packets_received = 12;
        status.radio_status_sent = 2;
    });
    fixture.vehicle.record(|status| {
        status.packets_lost = 3;
        status.queue_status = 7;
    });

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/status.json")
            .insert_header(session_cookie()),
    )
    .await;
    assert_eq!(
        res.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json"
    );
    let status: Value = test::read_body_json(res).await;
    assert_eq!(
        status,
        json!({
            "gpackets": "12", "gsent": "0", "glost": "0",
            "vpackets": "0", "vsent": "0", "vlost": "3",
            "radio": "2", "buffer": "7"
        })
    );

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/status.json?r=1")
            .insert_header(session_cookie()),
    )
    .await;
    let status: Value = test::read_body_json(res).await;
    assert!(status.as_object().unwrap().values().all(|v| v == "0"));
    assert_eq!(fixture.gcs.status().packets_received, 0);
    assert_eq!(fixture.vehicle.status().queue_status, 0);
}

#[actix_web::test]
async fn info_json_checksum_follows_parameter_changes() {
    let fixture = fixture();
    fixture.log.append("boot\n");

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/info.json")
            .insert_header(session_cookie()),
    )
    .await;
    let before: Value = test::read_body_json(res).await;

    assert_eq!(before["size"], "4MB (512/512)");
    assert_eq!(before["id"], "0xE0 0x4016");
    assert_eq!(before["flashfree"], "1048576");
    assert_eq!(before["logsize"], "5");
    assert!(before["heapfree"].is_string());

    call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?channel=6")
            .insert_header(session_cookie()),
    )
    .await;

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/info.json")
            .insert_header(session_cookie()),
    )
    .await;
    let after: Value = test::read_body_json(res).await;

    assert_ne!(before["paramcrc"], after["paramcrc"]);
}

#[actix_web::test]
async fn rejected_batch_refreshes_parameter_checksum() {
    let fixture = fixture();

    let before = info_json(&fixture).await;

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/setparameters?ssid=renamed&pwd=short")
            .insert_header(session_cookie()),
    )
    .await;
    assert_eq!(body_text(res).await, "BAD ARGS\r\n");

    let after = info_json(&fixture).await;

    assert!(!fixture.parameters_path.exists());
    assert_ne!(before["paramcrc"], after["paramcrc"]);
}

#[actix_web::test]
async fn get_status_renders_tables() {
    let fixture = fixture();
    fixture.gcs.record(|status| status.packets_sent = 42);

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/getstatus")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    let body = body_text(res).await;
    assert!(body.contains("<p>Comm Status</p>"));
    assert!(body.contains("<tr><td>Packets Sent to GCS</td><td>42</td></tr>"));
    assert!(body.contains("<p>System Status</p>"));
}

#[actix_web::test]
async fn log_json_returns_excerpt() {
    let fixture = fixture();
    fixture.log.append("boot \"ok\"\n");

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/log.json?position=0")
            .insert_header(session_cookie()),
    )
    .await;
    let log: Value = test::read_body_json(res).await;
    assert_eq!(log, json!({"len": 10, "start": 0, "text": "boot \"ok\"\n"}));

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/log.json?position=100")
            .insert_header(session_cookie()),
    )
    .await;
    let log: Value = test::read_body_json(res).await;
    assert_eq!(log, json!({"len": 0, "start": 100, "text": ""}));
}

#[actix_web::test]
async fn update_form_closes_connection() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/update")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get(header::CONNECTION).unwrap(), "close");
    assert_eq!(
        res.headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert!(body_text(res).await.contains(r#"action="/upload""#));
}

#[actix_web::test]
async fn firmware_upload_stores_image_and_restarts() {
    let mut fixture = fixture();
    let image = [0xE9, 0x03, 0x02, 0x20, 0x00, 0x10];

    let res = call(&fixture, upload_request("firmware.bin", &image)).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers().get(header::CONNECTION).unwrap(), "close");
    assert_eq!(body_text(res).await, "OK");
    assert_eq!(std::fs::read(&fixture.image_path).unwrap(), image);

    assert_eq!(
        next_signal(&mut fixture.signals).await,
        DeviceSignal::StopListeners
    );
    assert_eq!(next_signal(&mut fixture.signals).await, DeviceSignal::Restart);
}

#[actix_web::test]
async fn oversized_upload_fails_and_still_restarts() {
    // leaves room for exactly 0x1000 bytes
    let mut fixture = fixture_with_space(0x2000);
    let mut image = vec![0u8; 0x1400];
    image[0] = 0xE9;

    let res = call(&fixture, upload_request("firmware.bin", &image)).await;

    assert_eq!(body_text(res).await, "FAIL");
    assert!(!fixture.image_path.exists());

    assert_eq!(
        next_signal(&mut fixture.signals).await,
        DeviceSignal::StopListeners
    );
    assert_eq!(next_signal(&mut fixture.signals).await, DeviceSignal::Restart);
}

#[actix_web::test]
async fn upload_with_wrong_magic_fails() {
    let fixture = fixture();

    let res = call(&fixture, upload_request("firmware.bin", b"not firmware")).await;

    assert_eq!(body_text(res).await, "FAIL");
    assert!(!fixture.image_path.exists());
}

#[actix_web::test]
async fn upload_only_accepts_post() {
    let fixture = fixture();

    let res = call(
        &fixture,
        TestRequest::get()
            .uri("/upload")
            .insert_header(session_cookie()),
    )
    .await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(body_text(res).await.contains("URI: /upload"));
}

#[actix_web::test]
async fn unknown_path_echoes_request() {
    let fixture = fixture();

    let res = call(&fixture, TestRequest::get().uri("/nothing?x=1&y=%3Cb%3E")).await;

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body = body_text(res).await;
    assert!(body.contains("URI: /nothing\nMethod: GET\nArguments: 2\n</label>"));
    assert!(body.contains(" x: 1\n"));
    assert!(body.contains(" y: &lt;b&gt;\n"));
}
