//! # End-to-End API Scenario: Monthly Food Safety Audit
//!
//! Exercises the full router as one system: an administrator sets up
//! templates, a monthly requirement and an outlet, runs an audit through
//! form submission, submission and review, and the authorization layer
//! keeps outlet users out of the admin surface.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use zeroize::Zeroizing;

use nexus_api::state::{AppConfig, AppState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ADMIN_EMAIL: &str = "admin@nexus.test";
const ADMIN_PASSWORD: &str = "admin-password";

/// Seeded in-memory state with a known administrator.
fn test_state(storage: &tempfile::TempDir) -> AppState {
    AppState::seeded(AppConfig {
        admin_email: Some(ADMIN_EMAIL.into()),
        admin_password: Some(Zeroizing::new(ADMIN_PASSWORD.into())),
        password_iterations: 10,
        storage_root: storage.path().to_path_buf(),
        ..AppConfig::default()
    })
}

/// Full application over seeded in-memory state.
fn test_app(storage: &tempfile::TempDir) -> axum::Router {
    nexus_api::app(test_state(storage))
}

fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Send a request, returning status and parsed JSON (Null for empty bodies).
async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(request(method, uri, token, body))
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn login(app: &axum::Router, email: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/login",
        None,
        Some(json!({ "email": email, "password": password, "device_name": "test" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "login failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

fn template_body(name: &str, field_id: &str) -> Value {
    json!({
        "name": name,
        "structure": {
            "sections": [{
                "title": "Checks",
                "fields": [
                    { "id": field_id, "label": field_id, "type": "text", "required": true },
                    { "id": "remarks", "label": "Remarks", "type": "textarea" }
                ]
            }]
        }
    })
}

struct Fixture {
    admin: String,
    template_ids: [i64; 2],
    compliance_id: i64,
    outlet_id: i64,
}

/// Two templates, a monthly requirement using both, one outlet.
async fn setup(app: &axum::Router) -> Fixture {
    let admin = login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let mut template_ids = [0; 2];
    for (slot, (name, field)) in [("Kitchen Hygiene", "fridge_temp"), ("Storage", "pest_check")]
        .into_iter()
        .enumerate()
    {
        let (status, body) = send(
            app,
            "POST",
            "/admin/form-templates",
            Some(&admin),
            Some(template_body(name, field)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        template_ids[slot] = body["id"].as_i64().unwrap();
    }

    let (status, body) = send(
        app,
        "POST",
        "/admin/compliance-requirements",
        Some(&admin),
        Some(json!({
            "title": "Monthly Food Safety",
            "category": "Food Safety",
            "frequency": "Monthly",
            "form_template_ids": template_ids,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let compliance_id = body["id"].as_i64().unwrap();

    let (status, body) = send(
        app,
        "POST",
        "/admin/outlets",
        Some(&admin),
        Some(json!({
            "name": "Downtown Branch",
            "address": "1 Main Street",
            "city": "Kuala Lumpur",
            "state": "WP",
            "postal_code": "50000",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let outlet_id = body["id"].as_i64().unwrap();

    Fixture {
        admin,
        template_ids,
        compliance_id,
        outlet_id,
    }
}

async fn start_audit(app: &axum::Router, fx: &Fixture) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/api/audits",
        Some(&fx.admin),
        Some(json!({
            "compliance_id": fx.compliance_id,
            "outlet_id": fx.outlet_id,
            "start_time": "2024-03-10T09:00:00",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

fn form_body(audit_id: i64, form_id: i64, value: Value) -> Value {
    json!({ "audit_id": audit_id, "form_id": form_id, "name": "submission", "value": value })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_runs_from_draft_to_approval() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);
    let fx = setup(&app).await;
    let [first, second] = fx.template_ids;

    // Act 1: start the audit; the monthly due date is the end of March.
    let audit = start_audit(&app, &fx).await;
    let audit_id = audit["id"].as_i64().unwrap();
    assert_eq!(audit["status"], "draft");
    assert_eq!(audit["due_date"], "2024-03-31T23:59:59");
    assert_eq!(audit["progress"].as_f64(), Some(0.0));

    // Act 2: a form missing a required field is refused.
    let (status, body) = send(
        &app,
        "POST",
        "/api/audit-forms",
        Some(&fx.admin),
        Some(form_body(audit_id, first, json!({ "remarks": "ok" }))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    // Act 3: the first form brings progress to 50%.
    let (status, body) = send(
        &app,
        "POST",
        "/api/audit-forms",
        Some(&fx.admin),
        Some(form_body(audit_id, first, json!({ "fridge_temp": "4C" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["audit_progress"].as_f64(), Some(50.0));
    assert_eq!(body["progress"]["outcome"], "updated");

    // Act 4: resubmitting the same template updates in place.
    let (status, body) = send(
        &app,
        "POST",
        "/api/audit-forms",
        Some(&fx.admin),
        Some(form_body(audit_id, first, json!({ "fridge_temp": "3C" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["audit_progress"].as_f64(), Some(50.0));
    let (_, forms) = send(
        &app,
        "GET",
        &format!("/api/audits/{audit_id}/forms"),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(forms.as_array().unwrap().len(), 1);
    assert_eq!(forms[0]["value"]["fridge_temp"], "3C");

    // Act 5: an audit with a missing form cannot be submitted.
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/audits/{audit_id}/submit"),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    // Act 6: the second form completes the audit.
    let (status, body) = send(
        &app,
        "POST",
        "/api/audit-forms",
        Some(&fx.admin),
        Some(form_body(audit_id, second, json!({ "pest_check": "clear" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["audit_progress"].as_f64(), Some(100.0));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/audits/{audit_id}/submit"),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["audit"]["status"], "pending");

    // Act 7: submitted audits are locked against edits and deletion.
    let (status, _) = send(
        &app,
        "POST",
        "/api/audit-forms",
        Some(&fx.admin),
        Some(form_body(audit_id, first, json!({ "fridge_temp": "5C" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/audits/{audit_id}"),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Act 8: rejection needs notes; approval closes the audit.
    let review = format!("/admin/audits/{audit_id}/review");
    let (status, _) = send(
        &app,
        "POST",
        &review,
        Some(&fx.admin),
        Some(json!({ "decision": "reject" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = send(
        &app,
        "POST",
        &review,
        Some(&fx.admin),
        Some(json!({ "decision": "approve", "notes": "All good" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["audit"]["status"], "approved");
    assert!(!body["audit"]["end_time"].is_null());
    assert!(body["forms"]
        .as_array()
        .unwrap()
        .iter()
        .all(|f| f["status"] == "approved"));

    // The trail records the approval.
    let (status, body) = send(
        &app,
        "GET",
        "/admin/activity-logs?action=approved&target_type=audit",
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["target_id"].as_i64() == Some(audit_id)));
}

#[tokio::test]
async fn draft_audit_is_deleted_with_its_forms() {
    let storage = tempfile::tempdir().unwrap();
    let state = test_state(&storage);
    let app = nexus_api::app(state.clone());
    let fx = setup(&app).await;
    let audit_id = start_audit(&app, &fx).await["id"].as_i64().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/api/audit-forms",
        Some(&fx.admin),
        Some(form_body(audit_id, fx.template_ids[0], json!({ "fridge_temp": "4C" }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let form_id = body["form"]["id"].as_i64().unwrap();
    assert_eq!(state.audit_forms.count(|f| f.audit_id == audit_id), 1);

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/audits/{audit_id}"),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert_eq!(state.audit_forms.count(|f| f.audit_id == audit_id), 0);
    assert!(state.audit_forms.get(&form_id).is_none());

    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/audits/{audit_id}"),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        "GET",
        &format!("/admin/audit-forms/{form_id}"),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn protected_routes_reject_missing_or_unknown_tokens() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);

    let (status, body) = send(&app, "GET", "/api/audits", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _) = send(&app, "GET", "/api/me", Some("not-a-session"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/api/login",
        None,
        Some(json!({ "email": ADMIN_EMAIL, "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn logout_revokes_the_session() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);
    let token = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = send(&app, "GET", "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], ADMIN_EMAIL);

    let (status, _) = send(&app, "POST", "/api/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", "/api/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn outlet_user_is_kept_out_of_admin_routes() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);
    let fx = setup(&app).await;

    let (_, roles) = send(&app, "GET", "/admin/roles", Some(&fx.admin), None).await;
    let outlet_role = roles
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "outlet-user")
        .and_then(|r| r["id"].as_i64())
        .unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/admin/users",
        Some(&fx.admin),
        Some(json!({
            "name": "Outlet Staff",
            "email": "staff@nexus.test",
            "password": "staff-password",
            "role_ids": [outlet_role],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["roles"], json!(["outlet-user"]));

    let staff = login(&app, "staff@nexus.test", "staff-password").await;

    for uri in ["/admin/users", "/admin/roles", "/admin/activity-logs"] {
        let (status, body) = send(&app, "GET", uri, Some(&staff), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}: {body}");
    }

    // The outlet is not assigned to them.
    let (status, _) = send(
        &app,
        "POST",
        "/api/audits",
        Some(&staff),
        Some(json!({ "compliance_id": fx.compliance_id, "outlet_id": fx.outlet_id })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Mobile master data is readable.
    let (status, body) = send(
        &app,
        "GET",
        "/api/compliance-requirements",
        Some(&staff),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn referenced_master_data_cannot_be_deleted() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);
    let fx = setup(&app).await;
    start_audit(&app, &fx).await;

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/admin/outlets/{}", fx.outlet_id),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/admin/form-templates/{}", fx.template_ids[0]),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn evidence_upload_round_trips() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/upload-file",
        Some(&admin),
        Some(json!({ "file": "data:text/plain;base64,aGVsbG8=", "fileName": "note.txt" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["url"], "/api/files/note.txt");
    assert_eq!(body["size"], 5);

    let response = app
        .clone()
        .oneshot(request("GET", "/api/files/note.txt", Some(&admin), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"hello");
}

#[tokio::test]
async fn openapi_document_is_served_to_sessions() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);
    let admin = login(&app, ADMIN_EMAIL, ADMIN_PASSWORD).await;

    let (status, body) = send(&app, "GET", "/openapi.json", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/audits"].is_object());
    assert!(body["paths"]["/admin/audits/{id}/review"].is_object());
}

#[tokio::test]
async fn rotating_forwarded_for_cannot_evade_login_limit() {
    let storage = tempfile::tempdir().unwrap();
    let app = test_app(&storage);
    let body = json!({ "email": ADMIN_EMAIL, "password": "wrong-password" });

    let mut limited = 0;
    for n in 0..1001u32 {
        let request = Request::builder()
            .method("POST")
            .uri("/api/login")
            .header("content-type", "application/json")
            .header("x-forwarded-for", format!("10.{}.{}.{}", n / 65536, (n / 256) % 256, n % 256))
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        }
    }
    assert_eq!(limited, 1);
}
