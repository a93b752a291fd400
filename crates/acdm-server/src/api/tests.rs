use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use acdm_core::models::EcfmpFlowMeasure;

use crate::{
    api,
    config::{Config, PluginConfig},
    logging::LogControl,
    loops::sync_loop::run_update_cycle,
    persistence::{self, log_messages, LogRecord},
    state::AppState,
};

fn offline_config() -> Config {
    let mut config = Config::from_env();
    config.server_url = Some("http://127.0.0.1:9".to_string());
    config
}

fn setup_app() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(
        offline_config(),
        &PluginConfig::default(),
        Arc::new(LogControl::detached()),
    ));
    (api::app(state.clone()), state)
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("parse json")
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn flightplan(callsign: &str) -> Value {
    json!({
        "callsign": callsign,
        "origin": "EDDF",
        "destination": "KJFK",
        "runway": "25C",
        "sid": "OBOKA1G",
        "eobt": "1415",
        "latitude": 50.0379,
        "longitude": 8.5622
    })
}

async fn become_master(app: &axum::Router) {
    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/v1/session",
            json!({ "connected": true, "callsign": "EDDF_TWR", "facility": 4 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/commands",
            json!({ "command": ".vacdm MASTER" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_carries_request_id() {
    let (app, _state) = setup_app();

    let res = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-request-id").is_some());

    let req = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-42")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-42");
}

#[tokio::test]
async fn flightplans_appear_after_update_cycle() {
    let (app, state) = setup_app();

    let res = app
        .clone()
        .oneshot(json_request("PUT", "/v1/airports", json!({ "airports": ["eddf"] })))
        .await
        .unwrap();
    assert_eq!(read_json(res).await["airports"], json!(["EDDF"]));

    let res = app
        .clone()
        .oneshot(json_request("POST", "/v1/flightplans", flightplan("dlh400")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body = read_json(res).await;
    assert_eq!(body["callsign"], "DLH400");
    assert_eq!(body["movement"], Value::Null);

    // not visible until the cycle merged it
    let res = app.clone().oneshot(get("/v1/pilots")).await.unwrap();
    assert_eq!(read_json(res).await, json!([]));

    run_update_cycle(&state).await;

    let res = app.clone().oneshot(get("/v1/pilots")).await.unwrap();
    let pilots = read_json(res).await;
    assert_eq!(pilots.as_array().map(Vec::len), Some(1));
    assert_eq!(pilots[0]["callsign"], "DLH400");
    assert_eq!(pilots[0]["stage"], "PLANNED");
    assert_eq!(pilots[0]["server"], Value::Null);

    let res = app.clone().oneshot(get("/v1/pilots/dlh400")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["local"]["runway"], "25C");

    let res = app.clone().oneshot(get("/v1/pilots?airport=EDDM")).await.unwrap();
    assert_eq!(read_json(res).await, json!([]));

    let res = app.oneshot(get("/v1/pilots/UNKNOWN")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn flightplan_requires_callsign_and_origin() {
    let (app, _state) = setup_app();
    let res = app
        .oneshot(json_request(
            "POST",
            "/v1/flightplans",
            json!({ "callsign": " ", "origin": "EDDF", "latitude": 50.03, "longitude": 8.55 }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        read_json(res).await["error"],
        "callsign and origin are required"
    );
}

#[tokio::test]
async fn flightplan_without_position_is_rejected() {
    let (app, state) = setup_app();
    state.set_active_airports(vec!["EDDF".to_string()]);
    app.clone()
        .oneshot(json_request("POST", "/v1/flightplans", flightplan("DLH1")))
        .await
        .unwrap();
    run_update_cycle(&state).await;
    become_master(&app).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/pilots/DLH1/actions",
            json!({ "action": "asat_now" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    state.take_pending_actions();

    let res = app
        .oneshot(json_request(
            "POST",
            "/v1/flightplans",
            json!({ "callsign": "DLH1", "origin": "EDDF", "destination": "LEMD", "eobt": "1030" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(state.take_pending_actions().is_empty());
    assert!(state.take_flightplan_updates().is_empty());
    assert_eq!(state.pilot("DLH1").unwrap().consolidated.aobt, None);
}

#[tokio::test]
async fn actions_follow_master_role() {
    let (app, state) = setup_app();
    state.set_active_airports(vec!["EDDF".to_string()]);
    app.clone()
        .oneshot(json_request("POST", "/v1/flightplans", flightplan("CFG1")))
        .await
        .unwrap();
    run_update_cycle(&state).await;

    let action = json!({ "action": "startup_request" });
    let res = app
        .clone()
        .oneshot(json_request("POST", "/v1/pilots/CFG1/actions", action.clone()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    become_master(&app).await;

    let res = app
        .clone()
        .oneshot(json_request("POST", "/v1/pilots/XYZ9/actions", action.clone()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/pilots/CFG1/actions",
            json!({ "action": "set_tobt", "clock": "25:00" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = app
        .clone()
        .oneshot(json_request("POST", "/v1/pilots/cfg1/actions", action))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["updates"][0]["type"], "UpdateAsrt");
    assert!(body["pilot"]["asrt"].is_string());

    let res = app.oneshot(get("/v1/pilots/CFG1")).await.unwrap();
    assert_eq!(read_json(res).await["stage"], "STARTUP_REQUESTED");
}

#[tokio::test]
async fn commands_report_outcome() {
    let (app, state) = setup_app();

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/commands",
            json!({ "command": ".vacdm UPDATERATE 4" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(state.update_cycle_seconds(), 4);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/v1/commands",
            json!({ "command": ".vacdm MASTER" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body = read_json(res).await;
    assert_eq!(body["handled"], true);
    assert_eq!(body["success"], false);

    let res = app
        .oneshot(json_request("POST", "/v1/commands", json!({ "command": ".atis" })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(res).await["handled"], false);
}

#[tokio::test]
async fn status_and_logs() {
    let (app, _state) = setup_app();

    let res = app.clone().oneshot(get("/v1/status")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let status = read_json(res).await;
    assert_eq!(status["master"], false);
    assert_eq!(status["server_url"], "http://127.0.0.1:9");
    assert_eq!(status["api"]["checked"], false);

    let res = app.clone().oneshot(get("/v1/flow-measures?active=true")).await.unwrap();
    assert_eq!(read_json(res).await, json!([]));

    let res = app.oneshot(get("/v1/logs")).await.unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    let db = persistence::init_database(":memory:", 1).await.unwrap();
    let state = Arc::new(
        AppState::new(
            offline_config(),
            &PluginConfig::default(),
            Arc::new(LogControl::detached()),
        )
        .with_database(db),
    );
    let res = api::app(state).oneshot(get("/v1/logs?limit=5")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await, json!([]));
}

#[tokio::test]
async fn disconnect_drops_master_role() {
    let (app, state) = setup_app();
    become_master(&app).await;
    assert!(state.is_master());

    let res = app
        .clone()
        .oneshot(json_request("PUT", "/v1/session", json!({ "connected": false })))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["master"], false);
    assert_eq!(body["session"]["connected"], false);

    let res = app.oneshot(get("/v1/status")).await.unwrap();
    assert_eq!(read_json(res).await["master"], false);
}

#[tokio::test]
async fn airports_are_replaced_and_listed() {
    let (app, _state) = setup_app();

    let res = app.clone().oneshot(get("/v1/airports")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await["airports"], json!([]));

    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/v1/airports",
            json!({ "airports": ["eddm", " EDDF ", "EDDM", ""] }),
        ))
        .await
        .unwrap();
    assert_eq!(read_json(res).await["airports"], json!(["EDDM", "EDDF"]));

    let res = app.clone().oneshot(get("/v1/airports")).await.unwrap();
    assert_eq!(read_json(res).await["airports"], json!(["EDDM", "EDDF"]));

    let res = app
        .oneshot(json_request("PUT", "/v1/airports", json!({ "airports": [] })))
        .await
        .unwrap();
    assert_eq!(read_json(res).await["airports"], json!([]));
}

#[tokio::test]
async fn flow_measures_filter_on_active() {
    let (app, state) = setup_app();
    let now = chrono::Utc::now();
    let measure = |id: i64, ident: &str| EcfmpFlowMeasure {
        id,
        ident: ident.to_string(),
        event_id: None,
        reason: "Weather".to_string(),
        starttime: Some(now - chrono::Duration::hours(1)),
        endtime: Some(now + chrono::Duration::hours(1)),
        withdrawn_at: None,
        notified_firs: vec![],
        measures: vec![],
        filters: vec![],
    };
    let mut withdrawn = measure(2, "EGTT02A");
    withdrawn.withdrawn_at = Some(now - chrono::Duration::minutes(10));
    let mut upcoming = measure(3, "EDGG03A");
    upcoming.starttime = Some(now + chrono::Duration::hours(2));
    upcoming.endtime = Some(now + chrono::Duration::hours(3));
    state.replace_flow_measures(vec![measure(1, "EDMM01A"), withdrawn, upcoming]);

    let res = app.clone().oneshot(get("/v1/flow-measures")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await.as_array().unwrap().len(), 3);

    let res = app.oneshot(get("/v1/flow-measures?active=true")).await.unwrap();
    let active = read_json(res).await;
    let idents: Vec<&str> = active
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|measure| measure["ident"].as_str())
        .collect();
    assert_eq!(idents, vec!["EDMM01A"]);
}

#[tokio::test]
async fn log_limit_is_clamped() {
    let db = persistence::init_database(":memory:", 1).await.unwrap();
    let mut tx = db.pool().begin().await.unwrap();
    for index in 0..1005 {
        let record = LogRecord::new(chrono::Utc::now(), "server", 1, format!("message {}", index));
        log_messages::insert_message_tx(&mut tx, &record).await.unwrap();
    }
    tx.commit().await.unwrap();

    let state = Arc::new(
        AppState::new(
            offline_config(),
            &PluginConfig::default(),
            Arc::new(LogControl::detached()),
        )
        .with_database(db),
    );
    let app = api::app(state);

    let res = app.clone().oneshot(get("/v1/logs?limit=0")).await.unwrap();
    let logs = read_json(res).await;
    assert_eq!(logs.as_array().unwrap().len(), 1);
    assert_eq!(logs[0]["message"], "message 1004");

    let res = app.clone().oneshot(get("/v1/logs?limit=5000")).await.unwrap();
    assert_eq!(read_json(res).await.as_array().unwrap().len(), 1000);

    let res = app.oneshot(get("/v1/logs")).await.unwrap();
    assert_eq!(read_json(res).await.as_array().unwrap().len(), 100);
}
