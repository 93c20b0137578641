//! HTTP surface: admin auth, intake, decisions, media webhook, upload
//! sessions, schedule settings and batch runs.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use pressgate::models::approval::{ApprovalStatus, Platform, RequestKey};
use pressgate::notification::webhook::sign_payload;
use pressgate::store::RequestStore;

use common::{app_state, harness, test_config, Harness, ADMIN_KEY};

struct TestApp {
    router: Router,
    h: Harness,
    _dir: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    test_app_with(|_| {}).await
}

async fn test_app_with(configure: impl FnOnce(&mut pressgate::config::Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(true);
    let mut config = test_config(dir.path());
    configure(&mut config);
    let state = app_state(&h, config).await;
    TestApp {
        router: pressgate::app(state),
        h,
        _dir: dir,
    }
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-admin-key", ADMIN_KEY);
    match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

async fn submit(app: &TestApp, story_id: &str) {
    let (status, body) = send(
        app,
        admin(
            "POST",
            "/api/v1/stories",
            Some(json!({
                "story_id": story_id,
                "workflow_id": "wf_api",
                "content": "Rates cut again\nThe central bank moved today.",
                "sub_content": "Rates cut"
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn test_probes_are_public() {
        let app = test_app().await;
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);
        let req = Request::builder().uri("/readyz").body(Body::empty()).unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_routes_require_key() {
        let app = test_app().await;

        let missing = Request::builder()
            .uri("/api/v1/requests")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, missing).await.0, StatusCode::UNAUTHORIZED);

        let wrong = Request::builder()
            .uri("/api/v1/requests")
            .header("x-admin-key", "definitely-not-the-key")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, wrong).await.0, StatusCode::UNAUTHORIZED);

        let bearer = Request::builder()
            .uri("/api/v1/requests")
            .header("authorization", format!("Bearer {}", ADMIN_KEY))
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&app, bearer).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_responses_carry_request_id() {
        let app = test_app().await;
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert!(resp.headers().contains_key("x-request-id"));
    }
}

mod requests {
    use super::*;

    #[tokio::test]
    async fn test_submit_then_list_and_show() {
        let app = test_app().await;
        submit(&app, "API1").await;

        let (status, body) = send(&app, admin("GET", "/api/v1/requests?status=PENDING", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (status, body) = send(&app, admin("GET", "/api/v1/requests/API1/x", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["platform"], "twitter");
        assert_eq!(body["status"], "PENDING");
        assert!(body["decisionDeadline"].is_string());

        let (status, _) = send(&app, admin("GET", "/api/v1/requests/API1/myspace", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, admin("GET", "/api/v1/requests/nope/twitter", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_resubmission_reports_existing_keys() {
        let app = test_app().await;
        submit(&app, "API2").await;

        let (status, body) = send(
            &app,
            admin(
                "POST",
                "/api/v1/stories",
                Some(json!({"story_id": "API2", "content": "again"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["already_exists"].as_array().unwrap().len(), 3);
        assert!(body["created"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decisions_are_idempotent_over_http() {
        let app = test_app().await;
        submit(&app, "API3").await;
        let approve_all = json!({"story_id": "API3", "action": "approve_all"});

        let (status, body) = send(&app, admin("POST", "/api/v1/decisions", Some(approve_all.clone()))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["decisions"]
            .as_array()
            .unwrap()
            .iter()
            .all(|d| d["outcome"] == "applied"));

        let (status, body) = send(&app, admin("POST", "/api/v1/decisions", Some(approve_all))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["decisions"]
            .as_array()
            .unwrap()
            .iter()
            .all(|d| d["outcome"] == "stale" && d["current"] == "APPROVED"));

        let (status, body) = send(&app, admin("GET", "/api/v1/workflows/wf_api/summary", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["by_status"]["APPROVED"], 3);

        let (_, metrics) = send(
            &app,
            Request::builder().uri("/metrics").body(Body::empty()).unwrap(),
        )
        .await;
        assert!(metrics.as_str().unwrap().contains("pressgate_transitions_total"));
    }

    #[tokio::test]
    async fn test_decision_errors() {
        let app = test_app().await;
        let (status, _) = send(
            &app,
            admin(
                "POST",
                "/api/v1/decisions",
                Some(json!({"story_id": "ghost", "action": "reject_all"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        submit(&app, "API4").await;
        let (status, body) = send(
            &app,
            admin(
                "POST",
                "/api/v1/decisions",
                Some(json!({"story_id": "API4", "action": "approve"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_event");
    }

    #[tokio::test]
    async fn test_manual_tick_publishes_oldest_approved() {
        let app = test_app().await;
        submit(&app, "API5").await;
        app.h
            .store
            .update_status(&RequestKey::new("API5", Platform::Youtube), ApprovalStatus::Approved)
            .await
            .unwrap();

        let (status, body) = send(&app, admin("POST", "/api/v1/scheduler/tick", None)).await;
        assert_eq!(status, StatusCode::OK);
        // No media, so the fallback image is generated before posting.
        assert_eq!(body["published"]["outcome"], "posted");
        assert_eq!(app.h.publishes.count(), 1);

        let (_, body) = send(&app, admin("POST", "/api/v1/scheduler/tick", None)).await;
        assert!(body["published"].is_null());
    }
}

mod media {
    use super::*;

    fn notification(story_id: &str, platform: &str, url: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "public_id": "upload-1",
            "resource_type": "image",
            "secure_url": url,
            "context": {"custom": {"story_id": story_id, "platform": platform}}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_signed_webhook_attaches_overlaid_image() {
        let app = test_app_with(|c| c.media_webhook_secret = Some("whsec_test".into())).await;
        submit(&app, "MW1").await;
        let payload = notification("MW1", "instagram", "https://cdn.test/mw1.jpg");

        let unsigned = Request::builder()
            .method("POST")
            .uri("/hooks/media")
            .header("content-type", "application/json")
            .body(Body::from(payload.clone()))
            .unwrap();
        assert_eq!(send(&app, unsigned).await.0, StatusCode::UNAUTHORIZED);

        let forged = Request::builder()
            .method("POST")
            .uri("/hooks/media")
            .header("x-pressgate-signature", sign_payload("other", &payload).unwrap())
            .body(Body::from(payload.clone()))
            .unwrap();
        assert_eq!(send(&app, forged).await.0, StatusCode::UNAUTHORIZED);

        let signed = Request::builder()
            .method("POST")
            .uri("/hooks/media")
            .header("x-pressgate-signature", sign_payload("whsec_test", &payload).unwrap())
            .body(Body::from(payload))
            .unwrap();
        let (status, body) = send(&app, signed).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["outcome"], "stored");
        assert_eq!(body["overlaid"], true);

        let record = app
            .h
            .store
            .get(&RequestKey::new("MW1", Platform::Instagram))
            .await
            .unwrap();
        assert_eq!(record.media.images, vec!["https://cdn.test/mw1.jpg?overlay=1"]);
    }

    #[tokio::test]
    async fn test_webhook_without_context_is_rejected() {
        let app = test_app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/hooks/media")
            .body(Body::from(
                serde_json::to_vec(&json!({"public_id": "p", "secure_url": "https://cdn.test/p.jpg"}))
                    .unwrap(),
            ))
            .unwrap();
        assert_eq!(send(&app, req).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_webhook_for_rejected_request_conflicts() {
        let app = test_app().await;
        submit(&app, "MW2").await;
        app.h
            .store
            .update_status(&RequestKey::new("MW2", Platform::Twitter), ApprovalStatus::Rejected)
            .await
            .unwrap();

        let req = Request::builder()
            .method("POST")
            .uri("/hooks/media")
            .body(Body::from(notification("MW2", "twitter", "https://cdn.test/late.jpg")))
            .unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "media_rejected");
    }

    #[tokio::test]
    async fn test_upload_session_over_http() {
        let app = test_app().await;
        submit(&app, "UP1").await;

        let (status, _) = send(
            &app,
            admin(
                "POST",
                "/api/v1/uploads",
                Some(json!({"owner": "ed", "story_id": "UP1", "platform": "youtube"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        for (name, url) in [("a.jpg", "https://cdn.test/a.jpg"), ("b.mp4", "https://cdn.test/b.mp4")] {
            let (status, _) = send(
                &app,
                admin(
                    "POST",
                    "/api/v1/uploads/ed/items",
                    Some(json!({"file_name": name, "reference": url})),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = send(
            &app,
            admin(
                "POST",
                "/api/v1/uploads/ed/items",
                Some(json!({"file_name": "notes.docx", "reference": "x"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, admin("POST", "/api/v1/uploads/ed/commit", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["images"], 1);
        assert_eq!(body["videos"], 1);

        // The session is gone after commit.
        let (status, _) = send(&app, admin("DELETE", "/api/v1/uploads/ed", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

mod settings {
    use super::*;

    #[tokio::test]
    async fn test_schedule_read_and_update() {
        let app = test_app().await;

        let (status, body) = send(&app, admin("GET", "/api/v1/schedule", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["run_interval_secs"], 10800);

        let (status, body) = send(
            &app,
            admin(
                "PUT",
                "/api/v1/schedule",
                Some(json!({"run_interval_secs": 30})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_schedule");

        let (status, body) = send(
            &app,
            admin(
                "PUT",
                "/api/v1/schedule",
                Some(json!({
                    "run_interval_secs": 3600,
                    "exclusion_start": "23:00",
                    "exclusion_end": "06:00",
                    "enabled": false
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["within_exclusion_window"], true);

        let (_, body) = send(&app, admin("GET", "/api/v1/schedule", None)).await;
        assert_eq!(body["run_interval_secs"], 3600);
        assert_eq!(body["enabled"], false);
    }

    #[tokio::test]
    async fn test_batch_run_selection() {
        let app = test_app().await;

        let (status, _) = send(
            &app,
            admin(
                "POST",
                "/api/v1/runs",
                Some(json!({"workflow_id": "daily_1", "candidates": ["h1", "h2", "h3"]})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        for pick in ["h3", "h1"] {
            let (status, _) = send(
                &app,
                admin("POST", "/api/v1/runs/daily_1/select", Some(json!({"pick": pick}))),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = send(
            &app,
            admin("POST", "/api/v1/runs/daily_1/select", Some(json!({"pick": "h9"}))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, admin("POST", "/api/v1/runs/daily_1/close", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["selected"], json!(["h1", "h3"]));

        let (status, _) = send(&app, admin("POST", "/api/v1/runs/daily_1/close", None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
