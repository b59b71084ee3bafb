use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, SET_COOKIE},
    },
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use server::{
    auth::{Identity, Role},
    config::{Config, GpioMode},
    database::{MemoryStore, Store},
    identity::{IdentityProvider, LocalIdentity},
    router,
    state::State,
    utils::{day_key, today},
};
use tower::ServiceExt;

const SUPER_EMAIL: &str = "root@jemlo.be";
const SUPER_PASSWORD: &str = "correct horse";

fn config() -> Config {
    Config {
        port: 0,
        department: "EPHEC01".to_string(),
        serial: "M02".to_string(),
        database_url: "memory".to_string(),
        database_secret: None,
        identity_url: "http://identity.invalid".to_string(),
        identity_api_key: None,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "jemlo-backend".to_string(),
        jwt_audience: "jemlo-dashboard".to_string(),
        jwt_ttl: Duration::from_secs(3600),
        super_admin_email: SUPER_EMAIL.to_string(),
        super_admin_password: SUPER_PASSWORD.to_string(),
        org_email_domain: "@jemlo.be".to_string(),
        cookie_secure: false,
        cookie_domain: None,
        allowed_origins: vec!["http://localhost:5173".to_string()],
        gpio_mode: GpioMode::Off,
        button_pin: 17,
        pump_pin: 27,
        pump_active_low: false,
        upstream_timeout: Duration::from_secs(1),
        upstream_retries: 0,
    }
}

struct TestApp {
    state: Arc<State>,
    router: Router,
}

impl TestApp {
    async fn new(root: Value) -> Self {
        let identity = LocalIdentity::new();
        identity.create_user("ops@jemlo.be", "ops-pass").await.unwrap();
        identity.create_user("visitor@gmail.com", "visitor-pass").await.unwrap();

        let state = State::with_backends(
            config(),
            Arc::new(MemoryStore::with_root(root)),
            Arc::new(identity),
        );

        Self {
            router: router(state.clone()),
            state,
        }
    }

    fn cookie_for(&self, email: &str, role: Role) -> String {
        let token = self
            .state
            .tokens
            .issue(&Identity {
                email,
                uid: None,
                role,
            })
            .unwrap();
        format!("access_token={token}")
    }

    fn admin_cookie(&self) -> String {
        self.cookie_for("ops@jemlo.be", Role::Admin)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let set_cookie = response
            .headers()
            .get(SET_COOKIE)
            .map(|value| value.to_str().unwrap().to_string());
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        (status, set_cookie, body)
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> (StatusCode, Value) {
        let mut request = Request::get(uri);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        let (status, _, body) = self.send(request.body(Body::empty()).unwrap()).await;
        (status, body)
    }

    async fn post(
        &self,
        uri: &str,
        cookie: Option<&str>,
        body: Value,
    ) -> (StatusCode, Option<String>, Value) {
        let mut request = Request::post(uri).header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }

        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Option<String>, Value) {
        self.post(
            "/api/admin/login",
            None,
            json!({ "email": email, "password": password }),
        )
        .await
    }
}

/// `access_token=...` part of a `Set-Cookie` header.
fn cookie_pair(set_cookie: &str) -> String {
    set_cookie.split(';').next().unwrap().trim().to_string()
}

#[tokio::test]
async fn serial_joins_department_and_device() {
    let app = TestApp::new(Value::Null).await;

    let (status, body) = app.get("/api/serial", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "serial": "EPHEC01M02" }));
}

#[tokio::test]
async fn missing_counter_reads_as_zeroed_shape() {
    let app = TestApp::new(Value::Null).await;

    let (status, body) = app.get("/api/read-machine/2025-12-01", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "waterLiters": 0.0,
            "plasticRecycledGrams": 0.0,
            "lastTransaction": { "waterLiters": 0.0, "plasticRecycledGrams": 0.0 }
        })
    );
}

#[tokio::test]
async fn malformed_date_is_a_bad_request() {
    let app = TestApp::new(Value::Null).await;

    let (status, body) = app.get("/api/read-machine/01-12-2025", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Malformed payload");
}

#[tokio::test]
async fn department_sums_its_fountains() {
    let app = TestApp::new(json!({
        "2025-12-01": { "EPHEC01": {
            "M01": { "waterLiters": 1.5, "plasticRecycledGrams": 63 },
            "M02": { "waterLiters": 0.5, "plasticRecycledGrams": 21 }
        } }
    }))
    .await;

    let (status, body) = app.get("/api/read-department/2025-12-01", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "waterLiters": 2.0, "plasticRecycledGrams": 84.0 })
    );
}

#[tokio::test]
async fn stats_on_empty_store_are_zero() {
    let app = TestApp::new(Value::Null).await;

    let (status, body) = app
        .get("/api/admin/stats_total", Some(&app.admin_cookie()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "active_fountains": 0, "total_water": 0.0, "total_plastic": 0.0, "growth": 0.0 })
    );
}

#[tokio::test]
async fn admin_reads_need_a_token_then_an_admin_role() {
    let app = TestApp::new(Value::Null).await;
    let client = app.cookie_for("visitor@gmail.com", Role::Client);

    let (status, body) = app.get("/api/admin/stats_total", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["detail"], "Not authenticated");

    let (status, _) = app
        .get("/api/admin/stats_total", Some("access_token=garbage"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/api/admin/logs", Some(&client)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["detail"], "Insufficient permissions");

    let (status, _) = app.get("/api/admin/fountains", Some(&client)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn bearer_header_is_accepted() {
    let app = TestApp::new(Value::Null).await;
    let cookie = app.admin_cookie();
    let token = cookie.trim_start_matches("access_token=");

    let request = Request::get("/api/admin/verify")
        .header(AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, _, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "ops@jemlo.be");
    assert_eq!(body["role"], "admin");
}

#[tokio::test]
async fn graph_groups_last_transactions_by_day() {
    let app = TestApp::new(json!({
        "users": { "u1": { "email": "ops@jemlo.be", "role": "admin" } },
        "2025-12-01": { "EPHEC01": {
            "M01": { "waterLiters": 3.0, "lastTransaction": { "waterLiters": 1.5 } },
            "M02": { "waterLiters": 1.0, "lastTransaction": { "waterLiters": 0.5 } }
        } }
    }))
    .await;

    let (status, body) = app
        .get("/api/admin/fountain_graph", Some(&app.admin_cookie()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "dates": ["1 Dec"], "water_consumed": [2.0] }));
}

#[tokio::test]
async fn super_admin_login_sets_cookie_and_is_audited() {
    let app = TestApp::new(Value::Null).await;

    let (status, set_cookie, body) = app.login(SUPER_EMAIL, SUPER_PASSWORD).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({ "role": "super_admin", "expires_in": 3600, "token_type": "bearer" })
    );

    let set_cookie = set_cookie.unwrap();
    assert!(set_cookie.starts_with("access_token="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));

    let (status, body) = app
        .get("/api/admin/verify", Some(&cookie_pair(&set_cookie)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "super_admin");
    assert_eq!(body["uid"], Value::Null);

    let (_, logs) = app
        .get("/api/admin/logs?limit=50", Some(&cookie_pair(&set_cookie)))
        .await;
    assert_eq!(logs[0]["type"], "login");
    assert_eq!(logs[0]["message"], format!("Super admin login: {SUPER_EMAIL}"));
}

#[tokio::test]
async fn super_admin_email_must_match_exactly() {
    let app = TestApp::new(Value::Null).await;

    let (status, set_cookie, _) = app
        .login(&format!(" {SUPER_EMAIL} "), SUPER_PASSWORD)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(set_cookie.is_none());

    let (status, _, _) = app.login(&SUPER_EMAIL.to_uppercase(), SUPER_PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_query_parameters_answer_with_detail() {
    let app = TestApp::new(Value::Null).await;
    let admin = app.admin_cookie();

    let (status, body) = app.get("/api/admin/logs?limit=many", Some(&admin)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Malformed payload");

    let (status, body) = app
        .get("/api/admin/fountain_graph?days=-3", Some(&admin))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Malformed payload");
}

#[tokio::test]
async fn managed_login_derives_role_and_stores_profile() {
    let app = TestApp::new(Value::Null).await;

    let (status, _, body) = app.login("OPS@jemlo.be", "ops-pass").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    let (status, _, body) = app.login("visitor@gmail.com", "visitor-pass").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "client");

    let users = app.state.store.get("/users").await.unwrap().unwrap();
    let roles: Vec<&str> = users
        .as_object()
        .unwrap()
        .values()
        .map(|profile| profile["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles.len(), 2);
    assert!(roles.contains(&"admin"));
    assert!(roles.contains(&"client"));

    let entries = app.state.audit.recent(50).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].message, "Admin login: ops@jemlo.be");
}

#[tokio::test]
async fn failed_org_logins_raise_alerts() {
    let app = TestApp::new(Value::Null).await;

    let (status, set_cookie, body) = app.login("ops@jemlo.be", "wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(set_cookie.is_none());
    assert_eq!(body["detail"], "Invalid credentials");

    app.login("ghost@jemlo.be", "whatever").await;
    app.login("visitor@gmail.com", "wrong").await;
    app.login(SUPER_EMAIL, "not the password").await;

    let (status, alerts) = app
        .get("/api/admin/alerts", Some(&app.admin_cookie()))
        .await;
    assert_eq!(status, StatusCode::OK);

    let messages: Vec<&str> = alerts
        .as_array()
        .unwrap()
        .iter()
        .map(|alert| alert["message"].as_str().unwrap())
        .collect();
    assert_eq!(
        messages,
        vec![
            "Failed admin login (unknown user): root@jemlo.be",
            "Failed admin login (unknown user): ghost@jemlo.be",
            "Failed admin login (bad password): ops@jemlo.be",
        ]
    );
}

#[tokio::test]
async fn malformed_login_body_is_a_bad_request() {
    let app = TestApp::new(Value::Null).await;

    let (status, _, body) = app
        .post("/api/admin/login", None, json!({ "email": "ops@jemlo.be" }))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], "Malformed payload");
}

#[tokio::test]
async fn admins_create_users_once() {
    let app = TestApp::new(Value::Null).await;
    let admin = app.admin_cookie();
    let account = json!({ "email": "new@jemlo.be", "password": "secret1" });

    let (status, _, body) = app
        .post("/api/admin/create-user", Some(&admin), account.clone())
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["email"], "new@jemlo.be");
    assert_eq!(body["role"], "admin");

    let uid = body["uid"].as_str().unwrap();
    let profile = app
        .state
        .store
        .get(&format!("/users/{uid}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(profile["organisation"], "EPHEC01");
    assert!(profile["createdAt"].is_string());

    let (status, _, _) = app
        .post("/api/admin/create-user", Some(&admin), account)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _, _) = app
        .post(
            "/api/admin/create-user",
            Some(&admin),
            json!({ "email": "short@gmail.com", "password": "12345" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = app
        .post(
            "/api/admin/create-user",
            Some(&app.cookie_for("visitor@gmail.com", Role::Client)),
            json!({ "email": "x@gmail.com", "password": "secret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, logs) = app.get("/api/admin/logs", Some(&admin)).await;
    assert_eq!(logs.as_array().unwrap().len(), 1);
    assert_eq!(logs[0]["type"], "user_created");
}

#[tokio::test]
async fn logout_clears_the_cookie() {
    let app = TestApp::new(Value::Null).await;

    let (status, set_cookie, _) = app
        .post("/api/admin/logout", Some(&app.admin_cookie()), Value::Null)
        .await;

    assert_eq!(status, StatusCode::OK);
    let set_cookie = set_cookie.unwrap();
    assert!(set_cookie.starts_with("access_token=;"));
    assert!(set_cookie.contains("Max-Age=0"));
}

#[tokio::test]
async fn fountains_list_today_as_last_active() {
    let day = day_key(today());
    let app = TestApp::new(json!({
        day.clone(): { "EPHEC01": { "M02": { "waterLiters": 0.5, "plasticRecycledGrams": 21 } } }
    }))
    .await;

    let (status, body) = app
        .get("/api/admin/fountains", Some(&app.admin_cookie()))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([{
            "department": "EPHEC01",
            "serial": "M02",
            "water_liters": 0.5,
            "plastic_grams": 21.0,
            "last_active": day
        }])
    );
}
