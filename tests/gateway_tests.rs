//! End-to-end gateway tests
//!
//! Tests the full flow through the router:
//! - Token issuance over the client-credentials form
//! - Bearer verification and role/method policy at the resource gate
//! - Forwarding to the weather service with the verified client id

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, Uri, header},
    response::Response,
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;

use weather_auth_gateway::auth::{
    AuthMode, InMemoryClientDirectory, KeyPair, RegisteredClient, Role, build_claims,
    claims::unix_now,
};
use weather_auth_gateway::gateway::{AppState, ResourceGate, Upstream, create_router};

const PRIVATE_PEM: &str = include_str!("fixtures/dev_private.pem");
const PUBLIC_PEM: &str = include_str!("fixtures/dev_public.pem");
const ISSUER: &str = "SkyAPI";

fn keys() -> KeyPair {
    KeyPair::from_pem(PRIVATE_PEM.as_bytes(), PUBLIC_PEM.as_bytes(), None).unwrap()
}

fn client(id: &str, secret: &str, role: Role) -> RegisteredClient {
    RegisteredClient {
        client_id: id.to_string(),
        client_secret: bcrypt::hash(secret, 4).unwrap(),
        name: format!("{role} client"),
        role,
        enabled: true,
        trashed: false,
    }
}

fn directory() -> InMemoryClientDirectory {
    [
        client("sys-client", "sys-secret", Role::System),
        client("reader-client", "reader-secret", Role::Reader),
        client("updater-client", "updater-secret", Role::Updater),
    ]
    .into_iter()
    .collect()
}

fn app(upstream: Option<Upstream>) -> Router {
    let mode = AuthMode::enabled(Arc::new(directory()), keys(), ISSUER, 60, Duration::ZERO);
    create_router(Arc::new(AppState {
        gate: Arc::new(ResourceGate::new(
            mode,
            vec!["/".to_string(), "/health".to_string()],
        )),
        upstream,
        max_body_size: 64 * 1024,
    }))
}

/// Weather service stand-in echoing what it received.
async fn spawn_upstream() -> Upstream {
    async fn echo(method: Method, uri: Uri, headers: HeaderMap) -> Json<Value> {
        Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "client_id": headers.get("x-client-id").and_then(|v| v.to_str().ok()),
            "client_scope": headers.get("x-client-scope").and_then(|v| v.to_str().ok()),
        }))
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = Router::new().fallback(echo);
    tokio::spawn(async move {
        axum::serve(listener, service).await.unwrap();
    });

    Upstream::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn token_request(form: &[(&str, &str)]) -> Request<Body> {
    Request::post("/oauth2/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(serde_urlencoded::to_string(form).unwrap()))
        .unwrap()
}

async fn fetch_token(app: &Router, id: &str, secret: &str) -> String {
    let response = app
        .clone()
        .oneshot(token_request(&[
            ("grant_type", "client_credentials"),
            ("client_id", id),
            ("client_secret", secret),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await["access_token"]
        .as_str()
        .unwrap()
        .to_string()
}

fn resource_request(method: Method, path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

/// Test the token endpoint response shape
#[tokio::test]
async fn test_token_endpoint_issues_bearer_token() {
    // GIVEN: a registered SYSTEM client
    let app = app(None);

    // WHEN: it exchanges its credentials
    let response = app
        .oneshot(token_request(&[
            ("grant_type", "client_credentials"),
            ("client_id", "sys-client"),
            ("client_secret", "sys-secret"),
        ]))
        .await
        .unwrap();

    // THEN: a one-hour bearer token scoped to its role, never cached
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-store"
    );
    let body = body_json(response).await;
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["expires_in"], 3600);
    assert_eq!(body["scope"], "SYSTEM");
    assert_eq!(body["access_token"].as_str().unwrap().split('.').count(), 3);
}

/// Test that wrong secrets and unknown clients are indistinguishable
#[tokio::test]
async fn test_bad_credentials_are_401() {
    let app = app(None);

    let wrong_secret = app
        .clone()
        .oneshot(token_request(&[
            ("grant_type", "client_credentials"),
            ("client_id", "sys-client"),
            ("client_secret", "nope"),
        ]))
        .await
        .unwrap();
    let unknown = app
        .oneshot(token_request(&[
            ("grant_type", "client_credentials"),
            ("client_id", "ghost"),
            ("client_secret", "sys-secret"),
        ]))
        .await
        .unwrap();

    assert_eq!(wrong_secret.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(wrong_secret).await, body_json(unknown).await);
}

/// Test grant type validation
#[tokio::test]
async fn test_unsupported_grant_type_is_400() {
    let response = app(None)
        .oneshot(token_request(&[
            ("grant_type", "password"),
            ("client_id", "sys-client"),
            ("client_secret", "sys-secret"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_grant_type");
}

/// Test the happy path through the gate to the weather service
#[tokio::test]
async fn test_system_client_can_update_location() {
    // GIVEN: a SYSTEM token and a live weather service
    let app = app(Some(spawn_upstream().await));
    let token = fetch_token(&app, "sys-client", "sys-secret").await;

    // WHEN: it updates a location
    let response = app
        .oneshot(resource_request(Method::PUT, "/v1/locations/XYZ", Some(&token)))
        .await
        .unwrap();

    // THEN: the request reaches the service with the verified client attached
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["method"], "PUT");
    assert_eq!(body["path"], "/v1/locations/XYZ");
    assert_eq!(body["client_id"], "sys-client");
    assert_eq!(body["client_scope"], "SYSTEM");
}

/// Test that client-supplied identity headers are replaced
#[tokio::test]
async fn test_spoofed_client_header_is_overwritten() {
    let app = app(Some(spawn_upstream().await));
    let token = fetch_token(&app, "reader-client", "reader-secret").await;

    let request = Request::get("/v1/realtime/NYC_US")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header("x-client-id", "sys-client")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["client_id"], "reader-client");
}

/// Test role/method enforcement per resource group
#[tokio::test]
async fn test_role_matrix_through_router() {
    let app = app(Some(spawn_upstream().await));
    let reader = fetch_token(&app, "reader-client", "reader-secret").await;
    let updater = fetch_token(&app, "updater-client", "updater-secret").await;

    let cases = [
        (&reader, Method::GET, "/v1/locations", StatusCode::OK),
        (&reader, Method::PUT, "/v1/locations/XYZ", StatusCode::FORBIDDEN),
        (&reader, Method::PUT, "/v1/daily/XYZ", StatusCode::FORBIDDEN),
        (&updater, Method::PUT, "/v1/daily/XYZ", StatusCode::OK),
        (&updater, Method::GET, "/v1/hourly", StatusCode::OK),
        (&updater, Method::DELETE, "/v1/locations/XYZ", StatusCode::FORBIDDEN),
    ];

    for (token, method, path, expected) in cases {
        let response = app
            .clone()
            .oneshot(resource_request(method.clone(), path, Some(token)))
            .await
            .unwrap();
        assert_eq!(response.status(), expected, "{method} {path}");
    }
}

/// Test that dot segments cannot smuggle a write into another resource group
#[tokio::test]
async fn test_updater_cannot_traverse_into_catalog() {
    // GIVEN: an UPDATER token and a live weather service
    let app = app(Some(spawn_upstream().await));
    let token = fetch_token(&app, "updater-client", "updater-secret").await;

    for path in [
        "/v1/realtime/../locations/XYZ",
        "/v1/realtime/%2e%2e/locations/XYZ",
        "/v1/realtime/%2E%2E/locations/XYZ",
        "/v1/realtime/./../locations/XYZ",
    ] {
        // WHEN: a realtime write climbs into the catalog
        let response = app
            .clone()
            .oneshot(resource_request(Method::PUT, path, Some(&token)))
            .await
            .unwrap();

        // THEN: denied before anything is forwarded
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{path}");
        assert_eq!(body_json(response).await["error"], "insufficient_scope");
    }

    // the canonical realtime write still goes through
    let response = app
        .oneshot(resource_request(Method::PUT, "/v1/realtime/XYZ", Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Test the 403 body for an insufficient scope
#[tokio::test]
async fn test_reader_cannot_update_location() {
    let app = app(Some(spawn_upstream().await));
    let token = fetch_token(&app, "reader-client", "reader-secret").await;

    let response = app
        .oneshot(resource_request(Method::PUT, "/v1/locations/XYZ", Some(&token)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "insufficient_scope");
}

/// Test that missing tokens are challenged
#[tokio::test]
async fn test_missing_token_is_401() {
    let response = app(None)
        .oneshot(resource_request(Method::GET, "/v1/locations", None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

/// Test that expired tokens are rejected
#[tokio::test]
async fn test_expired_token_is_401() {
    // GIVEN: a SYSTEM token that expired a minute ago
    let client = client("sys-client", "sys-secret", Role::System);
    let claims = build_claims(&client, ISSUER, unix_now() - 3660, Duration::from_secs(3600));
    let signing = keys().signing;
    let token = jsonwebtoken::encode(&signing.header(), &claims, signing.encoding_key()).unwrap();

    // WHEN: it is presented for a catalog write
    let response = app(None)
        .oneshot(resource_request(Method::PUT, "/v1/locations/XYZ", Some(&token)))
        .await
        .unwrap();

    // THEN: rejected as an invalid token
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_token");
}

/// Test that a reader cannot escalate by editing its payload
#[tokio::test]
async fn test_tampered_payload_is_401() {
    // GIVEN: a READER token with its scope rewritten to SYSTEM
    let app = app(None);
    let token = fetch_token(&app, "reader-client", "reader-secret").await;
    let parts: Vec<&str> = token.split('.').collect();
    let payload = String::from_utf8(URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
    let forged_payload = URL_SAFE_NO_PAD.encode(payload.replace("READER", "SYSTEM"));
    let forged = format!("{}.{forged_payload}.{}", parts[0], parts[2]);

    // WHEN: the forged token is presented for a catalog write
    let response = app
        .oneshot(resource_request(Method::PUT, "/v1/locations/XYZ", Some(&forged)))
        .await
        .unwrap();

    // THEN: the signature no longer matches
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

/// Test public paths
#[tokio::test]
async fn test_discovery_and_health_are_public() {
    let app = app(None);

    let discovery = app
        .clone()
        .oneshot(
            Request::get("/")
                .header(header::HOST, "weather.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(discovery.status(), StatusCode::OK);
    assert_eq!(
        body_json(discovery).await["locations_url"],
        "http://weather.example/v1/locations"
    );

    let health = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(body_json(health).await["auth"], "enabled");
}
