//! HTTP surface: routing, status codes and the error envelope.

mod common;

use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};
use uuid::Uuid;

use common::in_memory_state;
use messaging_core::error::ErrorResponse;
use messaging_core::models::Message;
use messaging_core::routes::{self, inbox::InboxResponse, threads::ThreadResponse};

macro_rules! app {
    () => {
        test::init_service(
            App::new()
                .app_data(web::Data::new(in_memory_state()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_rt::test]
async fn test_health() {
    let app = app!();
    let req = test::TestRequest::get().uri("/health").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_rt::test]
async fn test_send_then_read_inbox_and_thread() {
    let app = app!();
    let (candidate, recruiter) = (Uuid::new_v4(), Uuid::new_v4());

    let req = test::TestRequest::post()
        .uri("/api/v1/messages")
        .set_json(json!({
            "sender_id": candidate,
            "receiver_id": recruiter,
            "body": "Hi, I applied",
            "context_id": "job#42"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let message: Message = test::read_body_json(resp).await;
    assert_eq!(message.body, "Hi, I applied");

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{recruiter}/inbox"))
        .to_request();
    let inbox: InboxResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(inbox.entries.len(), 1);
    assert_eq!(inbox.total_unread, 1);

    let req = test::TestRequest::get()
        .uri(&format!(
            "/api/v1/threads?user_a={recruiter}&user_b={candidate}&context_id=job%2342"
        ))
        .to_request();
    let thread: ThreadResponse = test::call_and_read_body_json(&app, req).await;
    assert_eq!(thread.messages.len(), 1);
    assert!(thread.next_cursor.is_none());

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/messages/{}/read", message.id))
        .set_json(json!({ "acting_user_id": recruiter }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/users/{recruiter}/inbox/unread"))
        .to_request();
    let badge: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(badge["unread"], 0);
}

#[actix_rt::test]
async fn test_empty_body_is_400_with_envelope() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/v1/messages")
        .set_json(json!({
            "sender_id": Uuid::new_v4(),
            "receiver_id": Uuid::new_v4(),
            "body": ""
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.code, "VALIDATION_ERROR");
    assert_eq!(body.status, 400);
}

#[actix_rt::test]
async fn test_malformed_json_uses_error_envelope() {
    let app = app!();
    let req = test::TestRequest::post()
        .uri("/api/v1/messages")
        .insert_header(("content-type", "application/json"))
        .set_payload("{not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.error_type, "validation_error");
}

#[actix_rt::test]
async fn test_unknown_message_is_404_and_sender_read_is_403() {
    let app = app!();
    let req = test::TestRequest::get()
        .uri("/api/v1/messages/424242")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let req = test::TestRequest::post()
        .uri("/api/v1/messages")
        .set_json(json!({ "sender_id": a, "receiver_id": b, "body": "hi" }))
        .to_request();
    let message: Message = test::call_and_read_body_json(&app, req).await;

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/messages/{}/read", message.id))
        .set_json(json!({ "acting_user_id": a }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_rt::test]
async fn test_bad_cursor_is_400() {
    let app = app!();
    let req = test::TestRequest::get()
        .uri(&format!(
            "/api/v1/threads?user_a={}&user_b={}&cursor=%25%25",
            Uuid::new_v4(),
            Uuid::new_v4()
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn test_mark_thread_read_and_notification_hook() {
    let app = app!();
    let candidate = Uuid::new_v4();

    let req = test::TestRequest::post()
        .uri("/internal/v1/notifications")
        .set_json(json!({
            "recipient_id": candidate,
            "context_id": "job#9",
            "kind": "interview_scheduled",
            "params": { "scheduled_at": "Monday 10:00", "position": "SRE" }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let message: Message = test::read_body_json(resp).await;
    assert_eq!(
        message.body,
        "An interview for SRE has been scheduled for Monday 10:00."
    );

    let req = test::TestRequest::patch()
        .uri("/api/v1/threads/read")
        .set_json(json!({
            "user_a": candidate,
            "user_b": message.sender_id,
            "context_id": "job#9",
            "acting_user_id": candidate
        }))
        .to_request();
    let marked: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(marked["marked"], 1);

    let req = test::TestRequest::post()
        .uri("/internal/v1/notifications")
        .set_json(json!({
            "recipient_id": candidate,
            "kind": "interview_scheduled"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn test_reconcile_endpoint_reports_clean_inbox() {
    let app = app!();
    let owner = Uuid::new_v4();
    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/users/{owner}/inbox/reconcile"))
        .to_request();
    let report: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(report["repaired"], false);
    assert_eq!(report["drifted"], json!([]));
}
