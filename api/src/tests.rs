use crate::{build_router, ApiState};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::{Duration, Utc};
use quotagate_core::{Gateway, GatewayConfig, InMemoryStore, JwtIdentityProvider, ManualClock};
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    server: TestServer,
    gateway: Gateway,
    provider: Arc<JwtIdentityProvider>,
    clock: Arc<ManualClock>,
}

impl Harness {
    async fn new() -> Self {
        let mut config = GatewayConfig::default();
        config.auth.jwt_secret = "api-test-secret".into();

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let provider = Arc::new(JwtIdentityProvider::new(config.auth.clone()));
        let gateway = Gateway::new(config, Arc::new(InMemoryStore::new()), provider.clone(), clock.clone());
        let server = TestServer::new(build_router(ApiState::new(gateway.clone()))).unwrap();

        let harness = Self {
            server,
            gateway,
            provider,
            clock,
        };
        harness.register("root").await;
        harness.gateway.subjects.set_admin("root", true, "bootstrap").await.unwrap();
        harness
    }

    fn token(&self, subject: &str) -> String {
        self.provider
            .issue_token(subject, None, Duration::hours(1))
            .unwrap()
    }

    fn bearer(&self, subject: &str) -> (HeaderName, HeaderValue) {
        let value = HeaderValue::from_str(&format!("Bearer {}", self.token(subject))).unwrap();
        (HeaderName::from_static("authorization"), value)
    }

    async fn register(&self, subject: &str) -> StatusCode {
        let (name, value) = self.bearer(subject);
        self.server
            .post("/api/v1/register")
            .add_header(name, value)
            .json(&json!({}))
            .await
            .status_code()
    }

    async fn post_as(&self, subject: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let (name, value) = self.bearer(subject);
        let response = self.server.post(path).add_header(name, value).json(&body).await;
        (response.status_code(), response.json::<Value>())
    }

    async fn create_license(&self, plan: &str, days: u32) -> String {
        let (status, body) = self
            .post_as(
                "root",
                "/api/v1/admin/create-license",
                json!({ "plan": plan, "validityDays": days }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        body["data"]["key"].as_str().unwrap().to_string()
    }
}

fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}

#[tokio::test]
async fn test_register_then_usage() {
    let h = Harness::new().await;
    assert_eq!(h.register("alice").await, StatusCode::CREATED);
    assert_eq!(h.register("alice").await, StatusCode::OK);

    let (name, value) = h.bearer("alice");
    let response = h.server.get("/api/v1/usage").add_header(name, value).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body = response.json::<Value>();
    assert_eq!(body["data"]["plan"], "free");
    assert_eq!(body["data"]["messagesLimit"], 10);
    assert_eq!(body["data"]["remaining"], 10);
}

#[tokio::test]
async fn test_missing_or_bad_credential() {
    let h = Harness::new().await;

    let response = h.server.post("/api/v1/messages/authorize").json(&json!({})).await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&response.json::<Value>()), "UNAUTHENTICATED");

    let response = h
        .server
        .post("/api/v1/messages/authorize")
        .json(&json!({ "credential": "not-a-token" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_quota_exhaustion_and_admin_reset() {
    let h = Harness::new().await;
    h.register("alice").await;

    for used in 1..=10 {
        let (status, body) = h.post_as("alice", "/api/v1/messages/authorize", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["messagesUsed"], used);
    }
    let (status, body) = h.post_as("alice", "/api/v1/messages/authorize", json!({})).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), "QUOTA_EXCEEDED");

    let (status, _) = h
        .post_as("root", "/api/v1/admin/reset-usage", json!({ "subjectId": "alice" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = h.post_as("alice", "/api/v1/messages/authorize", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["messagesUsed"], 1);
}

#[tokio::test]
async fn test_license_activation_flow() {
    let h = Harness::new().await;
    h.register("a").await;
    h.register("b").await;
    let key = h.create_license("pro", 30).await;

    let (status, body) = h
        .post_as("a", "/api/v1/activate-license", json!({ "subjectId": "b", "licenseKey": key }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "NOT_OWN_ACCOUNT");

    let (status, body) = h
        .post_as("a", "/api/v1/activate-license", json!({ "subjectId": "a", "licenseKey": key }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["plan"], "pro");
    assert_eq!(body["data"]["messageLimit"], 1000);
    assert_eq!(body["data"]["messagesUsed"], 0);

    let (status, body) = h
        .post_as("b", "/api/v1/activate-license", json!({ "subjectId": "b", "licenseKey": key }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "LICENSE_ALREADY_USED");

    // Lapses back to Free once the license runs out
    h.clock.advance(Duration::days(31));
    let (status, body) = h
        .post_as("a", "/api/v1/daily-reset", json!({ "subjectId": "a" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["plan"], "free");
    assert_eq!(body["data"]["messagesLimit"], 10);
}

#[tokio::test]
async fn test_activation_is_rate_limited() {
    let h = Harness::new().await;
    h.register("a").await;

    for _ in 0..5 {
        let (status, body) = h
            .post_as("a", "/api/v1/activate-license", json!({ "subjectId": "a", "licenseKey": "BOGUS" }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "INVALID_LICENSE");
    }

    let (name, value) = h.bearer("a");
    let response = h
        .server
        .post("/api/v1/activate-license")
        .add_header(name, value)
        .json(&json!({ "subjectId": "a", "licenseKey": "BOGUS" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&response.json::<Value>()), "RATE_LIMITED");
    assert_eq!(response.header("retry-after"), "60");

    h.clock.advance(Duration::seconds(61));
    let (status, _) = h
        .post_as("a", "/api/v1/activate-license", json!({ "subjectId": "a", "licenseKey": "BOGUS" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_ban_blocks_until_lifted() {
    let h = Harness::new().await;
    h.register("spammer").await;

    let (status, _) = h
        .post_as(
            "root",
            "/api/v1/admin/ban-user",
            json!({ "subjectId": "spammer", "reason": "spam", "durationMinutes": 60 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = h.post_as("spammer", "/api/v1/messages/authorize", json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "UNAUTHORIZED");

    let (status, _) = h
        .post_as("root", "/api/v1/admin/unban-user", json!({ "subjectId": "spammer" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.post_as("spammer", "/api/v1/messages/authorize", json!({})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_guards() {
    let h = Harness::new().await;
    h.register("alice").await;

    let (status, _) = h
        .post_as("alice", "/api/v1/admin/create-license", json!({ "plan": "pro", "validityDays": 30 }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h
        .post_as("root", "/api/v1/admin/ban-user", json!({ "subjectId": "root", "reason": "oops" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "CONFLICT");

    let (status, body) = h
        .post_as("root", "/api/v1/admin/ban-user", json!({ "subjectId": "alice", "reason": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, _) = h
        .post_as("root", "/api/v1/admin/create-license", json!({ "plan": "free", "validityDays": 30 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_address_ban() {
    let h = Harness::new().await;
    h.register("alice").await;

    let (status, _) = h
        .post_as(
            "root",
            "/api/v1/admin/ban-address",
            json!({ "address": "203.0.113.50", "reason": "scraping" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (name, value) = h.bearer("alice");
    let response = h
        .server
        .get("/api/v1/usage")
        .add_header(name, value)
        .add_header(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("203.0.113.50, 10.0.0.1"),
        )
        .await;
    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);

    let (status, _) = h
        .post_as("root", "/api/v1/admin/ban-address", json!({ "address": "nope", "reason": "x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_license_admin_and_audit_trail() {
    let h = Harness::new().await;
    let keep = h.create_license("classic", 7).await;
    let drop = h.create_license("pro", 7).await;

    let (status, _) = h
        .post_as("root", "/api/v1/admin/invalidate-license", json!({ "licenseKey": drop }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (name, value) = h.bearer("root");
    let listed = h
        .server
        .get("/api/v1/admin/licenses")
        .add_query_param("valid", true)
        .add_header(name, value)
        .await
        .json::<Value>();
    let keys: Vec<_> = listed["data"].as_array().unwrap().iter().map(|l| l["key"].clone()).collect();
    assert_eq!(keys, vec![json!(keep)]);
    assert_eq!(listed["data"][0]["state"], "created");

    let (status, body) = h.post_as("root", "/api/v1/admin/purge-licenses", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], 1);

    let (name, value) = h.bearer("root");
    let audit = h
        .server
        .get("/api/v1/admin/audit-logs")
        .add_query_param("action", "license.create")
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(audit["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_subject_listing_follows_live_bans() {
    let h = Harness::new().await;
    h.register("brief").await;
    h.register("forever").await;

    for (subject, minutes) in [("brief", json!(1)), ("forever", Value::Null)] {
        let (status, _) = h
            .post_as(
                "root",
                "/api/v1/admin/ban-user",
                json!({ "subjectId": subject, "reason": "spam", "durationMinutes": minutes }),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }
    h.clock.advance(Duration::minutes(5));

    let (name, value) = h.bearer("root");
    let banned = h
        .server
        .get("/api/v1/admin/subjects")
        .add_query_param("banned", true)
        .add_header(name, value)
        .await
        .json::<Value>();
    let ids: Vec<_> = banned["data"].as_array().unwrap().iter().map(|s| s["id"].clone()).collect();
    assert_eq!(ids, vec![json!("forever")]);

    let (name, value) = h.bearer("root");
    let admins = h
        .server
        .get("/api/v1/admin/subjects")
        .add_query_param("admin", true)
        .add_header(name, value)
        .await
        .json::<Value>();
    assert_eq!(admins["data"].as_array().unwrap().len(), 1);
    assert_eq!(admins["data"][0]["id"], "root");

    let (status, _) = h.post_as("brief", "/api/v1/messages/authorize", json!({})).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_delete_user_cascade() {
    let h = Harness::new().await;
    h.register("gone").await;

    let (status, _) = h
        .post_as("root", "/api/v1/admin/delete-user", json!({ "subjectId": "gone" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h.post_as("gone", "/api/v1/messages/authorize", json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_and_openapi() {
    let h = Harness::new().await;

    let health = h.server.get("/health").await;
    assert_eq!(health.status_code(), StatusCode::OK);
    assert_eq!(health.json::<Value>()["status"], "healthy");

    let doc = h.server.get("/api-docs/openapi.json").await.json::<Value>();
    assert!(doc["paths"]["/api/v1/messages/authorize"].is_object());
    assert!(doc["components"]["securitySchemes"]["bearer"].is_object());
}
