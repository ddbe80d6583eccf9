// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot against a
// seeded in-memory database.

use std::time::Duration;

use futures::StreamExt as _;
use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use alumni_tracker::config::DiscoveryConfig;
use alumni_tracker::{build_state, db, router, AppState};

const BODY_LIMIT: usize = 1024 * 1024;

async fn test_state() -> AppState {
    let pool = db::connect_memory().await.expect("memory db");
    db::seed_demo_data(&pool).await.expect("seed");
    build_state(pool, &DiscoveryConfig::default())
        .await
        .expect("app state")
}

async fn call(app: Router, method: &str, uri: &str, body: Option<Json>) -> (StatusCode, Json) {
    let mut req = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            req = req.header("content-type", "application/json");
            Body::from(v.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .oneshot(req.body(body).expect("build request"))
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let v = if bytes.is_empty() {
        Json::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, v)
}

#[tokio::test]
async fn health_reports_service_and_version() {
    let app = router(test_state().await);
    let (status, v) = call(app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "healthy");
    assert_eq!(v["service"], "alumni-achievement-tracker");
    assert!(v["version"].is_string());
}

#[tokio::test]
async fn alumni_list_get_and_missing() {
    let state = test_state().await;

    let (status, v) = call(router(state.clone()), "GET", "/api/alumni", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v.as_array().map(Vec::len), Some(5));

    let (status, v) = call(router(state.clone()), "GET", "/api/alumni/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["name"], "Sarah Chen");
    assert!(v["privacy_settings"]["public_profile"].is_boolean());

    let (status, v) = call(router(state.clone()), "GET", "/api/alumni/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(v["detail"].as_str().is_some_and(|d| d.contains("999")));

    let (status, _) = call(router(state), "GET", "/api/alumni/999/projects", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn alumni_create_validates_input() {
    let state = test_state().await;

    let good = json!({
        "name": "Lena Park",
        "graduation_year": 2022,
        "degree_program": "Screenwriting",
        "email": "lena@example.com"
    });
    let (status, v) = call(router(state.clone()), "POST", "/api/alumni", Some(good)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["name"], "Lena Park");
    assert_eq!(v["degree_program"], "Screenwriting");

    let bad_year = json!({
        "name": "Too Early",
        "graduation_year": 1950,
        "degree_program": "Animation"
    });
    let (status, v) = call(router(state.clone()), "POST", "/api/alumni", Some(bad_year)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["detail"].as_str().is_some_and(|d| d.contains("graduation_year")));

    let (status, v) = call(router(state), "GET", "/api/alumni/search?q=park", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn search_requires_a_query() {
    let app = router(test_state().await);
    let (status, _) = call(app, "GET", "/api/alumni/search?q=%20", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn review_queue_shrinks_after_verify() {
    let state = test_state().await;

    let (status, v) = call(router(state.clone()), "GET", "/api/achievements/unverified", None).await;
    assert_eq!(status, StatusCode::OK);
    let queue = v.as_array().expect("array");
    assert_eq!(queue.len(), 1);
    let id = queue[0]["id"].as_i64().expect("id");
    assert_eq!(queue[0]["type"], "Production Credit");

    let uri = format!("/api/achievements/{id}/verify");
    let (status, v) = call(router(state.clone()), "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["verified"], true);

    let (_, v) = call(router(state.clone()), "GET", "/api/achievements/unverified", None).await;
    assert_eq!(v.as_array().map(Vec::len), Some(0));

    let (status, _) = call(router(state), "POST", "/api/achievements/999/verify", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn dashboard_counts_seeded_catalogue() {
    let app = router(test_state().await);
    let (status, v) = call(app, "GET", "/api/dashboard/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["total_alumni"], 5);
    assert_eq!(v["total_achievements"], 7);
    assert_eq!(v["total_projects"], 4);
    assert_eq!(v["recent_achievements"].as_array().map(Vec::len), Some(5));
    assert_eq!(v["achievements_by_year"]["2024"], 5);
}

#[tokio::test]
async fn automation_status_and_sources_shape() {
    let state = test_state().await;

    let (status, v) = call(router(state.clone()), "GET", "/api/automation/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "stopped");
    assert_eq!(v["schedule_enabled"], false);
    assert_eq!(v["active_sources"], 4);
    assert_eq!(v["total_sources"], 5);
    assert_eq!(v["run_count"], 0);
    assert!(v["next_scheduled_run"].is_null());
    assert!(v["discoveries_change"].is_number());
    assert!(v["high_confidence"].is_number());
    assert!(v["avg_processing_time"].is_number());
    assert!(v.get("high_confidence_discoveries").is_none());

    let (status, v) = call(router(state), "GET", "/api/automation/sources", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = v.as_array().expect("array");
    assert_eq!(rows.len(), 5);
    let aacta = rows
        .iter()
        .find(|r| r["name"] == "AACTA Awards")
        .expect("aacta row");
    assert_eq!(aacta["type"], "Web Scraping");
    assert_eq!(aacta["active"], false);
    assert!(aacta["next_run"].is_null());
    assert_eq!(aacta["success_rate"], 100.0);
}

#[tokio::test]
async fn toggle_rejects_unknown_action() {
    let app = router(test_state().await);
    let (status, v) = call(app, "POST", "/api/automation/toggle", Some(json!({ "action": "pause" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(v["detail"].as_str().is_some_and(|d| d.contains("pause")));
}

#[tokio::test]
async fn manual_run_then_discoveries_feed() {
    let state = test_state().await;

    let (status, v) = call(router(state.clone()), "POST", "/api/automation/manual-run", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["status"], "initiated");
    assert!(v["source_names"].is_null());

    // run happens in the background
    for _ in 0..100 {
        if !state.automation.is_busy() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(!state.automation.is_busy(), "run did not finish");

    let (status, v) = call(router(state.clone()), "GET", "/api/automation/discoveries?limit=100", None).await;
    assert_eq!(status, StatusCode::OK);
    let rows = v.as_array().expect("array");
    assert!(rows.len() > 7, "expected new discoveries, got {}", rows.len());
    assert!(rows.iter().all(|r| r["alumni_name"].is_string()));
    assert!(rows.iter().all(|r| r["timestamp"].is_string()));
    assert!(rows.iter().all(|r| r.get("discovered_at").is_none()));

    let (_, v) = call(router(state.clone()), "GET", "/api/automation/discoveries?verified_only=true&limit=100", None).await;
    assert_eq!(v.as_array().map(Vec::len), Some(6));

    let (_, v) = call(router(state), "GET", "/api/automation/status", None).await;
    assert_eq!(v["run_count"], 1);
    assert!(v["next_scheduled_run"].is_string());
}

#[tokio::test]
async fn manual_run_rejects_malformed_scope() {
    let app = router(test_state().await);
    let req = Request::builder()
        .method("POST")
        .uri("/api/automation/manual-run")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scoped_manual_run_echoes_scope() {
    let app = router(test_state().await);
    let body = json!({ "source_names": ["TMDb API"], "subject_ids": [1, 3] });
    let (status, v) = call(app, "POST", "/api/automation/manual-run", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["source_names"], json!(["TMDb API"]));
    assert_eq!(v["subject_ids"], json!([1, 3]));
}

#[tokio::test]
async fn events_stream_opens_with_status_frame() {
    let app = router(test_state().await);
    let req = Request::builder()
        .uri("/api/automation/events")
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream")));

    // the stream stays open, so read one frame instead of the whole body
    let mut frames = resp.into_body().into_data_stream();
    let first = tokio::time::timeout(Duration::from_secs(2), frames.next())
        .await
        .expect("first frame in time")
        .expect("stream not empty")
        .expect("frame bytes");
    let text = String::from_utf8(first.to_vec()).expect("utf8 frame");
    assert!(text.starts_with("event: status"), "unexpected frame: {text}");
    assert!(text.contains("\"type\":\"status\""));
    assert!(text.contains("\"status\":\"stopped\""));
}
