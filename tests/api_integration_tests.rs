//! API Integration Tests
//!
//! Drives the HTTP API against a real in-memory database, covering the
//! auth flows, RBAC, and the CRUD surface. Tests are serialized because
//! they share a global test pool.
//!
//! Note: The `more-di` DI framework doesn't support injecting custom pools.
//! We work around this by using `DatabaseConnection::set_test_pool()` to set
//! a global pool that the DI-created DatabaseConnection will use.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use chrono::Utc;
use di::{Injectable, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use serde_json::{Value, json};
use serial_test::serial;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio_llm_studio_api::api;
use tokio_llm_studio_api::core::generation;
use tokio_llm_studio_api::core::runtime::RuntimeClient;
use tokio_llm_studio_api::core::services::{
    MyAgentService, MyAuthService, MyConversationService, MyDatasetService, MyJobService,
    MyModelService, MyUserService,
};
use tokio_llm_studio_api::infrastructure::config::AppConfig;
use tokio_llm_studio_api::infrastructure::database::DatabaseConnection;
use tokio_llm_studio_api::infrastructure::repositories::{
    DbConversationRepository, DbDatasetRepository, DbErrorRepository, DbModelRepository,
    DbTrainingJobRepository, DbUserRepository,
};
use tower::ServiceExt;
use uuid::Uuid;

/// Counter for unique test database URIs
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Setup test database with migrations and returns pool
/// Uses in-memory SQLite for test isolation
async fn setup_test_db() -> SqlitePool {
    let db_num = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_url = format!("sqlite:file:testdb{}?mode=memory&cache=shared", db_num);

    let pool = SqlitePool::connect(&db_url).await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();

    DatabaseConnection::set_test_pool(pool.clone());

    pool
}

fn cleanup_test_db() {
    DatabaseConnection::clear_test_pool();
}

/// Create test app - uses the global test pool set by setup_test_db()
fn create_test_app() -> axum::Router {
    let provider = ServiceCollection::new()
        .add(AppConfig::singleton())
        .add(DatabaseConnection::transient())
        .add(RuntimeClient::singleton())
        .add(DbUserRepository::scoped())
        .add(DbModelRepository::scoped())
        .add(DbDatasetRepository::scoped())
        .add(DbTrainingJobRepository::scoped())
        .add(DbConversationRepository::scoped())
        .add(DbErrorRepository::scoped())
        .add(MyAuthService::scoped())
        .add(MyUserService::scoped())
        .add(MyModelService::scoped())
        .add(MyDatasetService::scoped())
        .add(MyJobService::scoped())
        .add(MyConversationService::scoped())
        .add(MyAgentService::scoped())
        .build_provider()
        .unwrap();

    axum::Router::new()
        .nest("/api/v1", api::router())
        .with_provider(provider)
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn bare_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn multipart_upload(uri: &str, token: &str, filename: &str, contents: &str) -> Request<Body> {
    let boundary = "test-boundary-7MA4YWxkTrZu0gW";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
         Content-Type: text/plain\r\n\r\n\
         {contents}\r\n\
         --{boundary}--\r\n"
    );

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn register(app: &axum::Router, username: &str) -> (StatusCode, Value) {
    send(
        app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            &json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": "correct horse battery",
            }),
        ),
    )
    .await
}

async fn login(app: &axum::Router, username: &str) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            &json!({ "username": username, "password": "correct horse battery" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_owned()
}

async fn register_and_login(app: &axum::Router, username: &str) -> String {
    let (status, _) = register(app, username).await;
    assert_eq!(status, StatusCode::CREATED);
    login(app, username).await
}

async fn seed_ready_model(pool: &SqlitePool) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO models (id, name, source_id, path, status, created_at) \
         VALUES (?, 'tinyllama', ?, '/srv/models/tinyllama', 'ready', ?)",
    )
    .bind(id)
    .bind(format!("tinyllama-{id}"))
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn seed_dataset(pool: &SqlitePool, owner: Uuid) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO datasets (id, owner, filename, path, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(owner)
    .bind(format!("corpus-{id}.txt"))
    .bind(format!("/tmp/corpus-{id}.txt"))
    .bind(Utc::now())
    .execute(pool)
    .await
    .unwrap();
    id
}

#[tokio::test]
#[serial]
async fn test_first_registered_user_is_admin() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, alice) = register(&app, "alice").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(alice["role"], "admin");

    let (status, bob) = register(&app, "bob").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(bob["role"], "user");

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_register_validations() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            &json!({ "username": "alice", "email": "alice@example.com", "password": "short" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/register",
            None,
            &json!({ "username": "alice", "email": "nonsense", "password": "correct horse battery" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_duplicate_username_is_conflict() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let (status, _) = register(&app, "alice").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = register(&app, "alice").await;
    assert_eq!(status, StatusCode::CONFLICT);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_login_with_wrong_password_is_rejected() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    register(&app, "alice").await;

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/auth/login",
            None,
            &json!({ "username": "alice", "password": "not the password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_me_returns_the_token_owner() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let token = register_and_login(&app, "alice").await;

    let (status, body) = send(&app, bare_request("GET", "/api/v1/auth/me", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice");
    assert_eq!(body["role"], "admin");

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_missing_or_bad_token_is_unauthorized() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    for uri in ["/api/v1/models", "/api/v1/jobs", "/api/v1/conversations"] {
        let (status, _) = send(&app, bare_request("GET", uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri} without token");

        let (status, _) = send(&app, bare_request("GET", uri, Some("made-up-token"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri} with bad token");
    }

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_user_management_requires_admin() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    register(&app, "alice").await;
    let bob_token = register_and_login(&app, "bob").await;
    let target = Uuid::new_v4();

    let forbidden = [
        bare_request("GET", "/api/v1/users", Some(&bob_token)),
        bare_request("GET", &format!("/api/v1/users/{target}"), Some(&bob_token)),
        json_request(
            "PATCH",
            &format!("/api/v1/users/{target}"),
            Some(&bob_token),
            &json!({ "role": "admin" }),
        ),
        bare_request("DELETE", &format!("/api/v1/users/{target}"), Some(&bob_token)),
        bare_request("GET", "/api/v1/agent/errors", Some(&bob_token)),
        bare_request("GET", "/api/v1/system/config", Some(&bob_token)),
    ];

    for request in forbidden {
        let uri = request.uri().clone();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{uri}");
    }

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_admin_manages_users() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let admin_token = register_and_login(&app, "alice").await;
    let (_, bob) = register(&app, "bob").await;
    let bob_id = bob["id"].as_str().unwrap().to_owned();

    let (status, body) = send(&app, bare_request("GET", "/api/v1/users", Some(&admin_token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().unwrap().len(), 2);

    let (status, body) = send(
        &app,
        json_request(
            "PATCH",
            &format!("/api/v1/users/{bob_id}"),
            Some(&admin_token),
            &json!({ "role": "admin" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    let (status, _) = send(
        &app,
        bare_request("DELETE", &format!("/api/v1/users/{bob_id}"), Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        bare_request("DELETE", &format!("/api/v1/users/{bob_id}"), Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app, bare_request("GET", "/api/v1/users", Some(&admin_token))).await;
    assert_eq!(body["users"].as_array().unwrap().len(), 1);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_settings_roundtrip() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let token = register_and_login(&app, "alice").await;

    let (status, body) = send(
        &app,
        bare_request("GET", "/api/v1/users/settings", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_epochs"], 3);
    assert_eq!(body["default_batch_size"], 4);
    assert_eq!(body["theme"], "dark");

    let (status, body) = send(
        &app,
        json_request(
            "PUT",
            "/api/v1/users/settings",
            Some(&token),
            &json!({ "default_epochs": 5, "default_batch_size": 8, "theme": "light" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_epochs"], 5);
    assert_eq!(body["theme"], "light");

    let (status, _) = send(
        &app,
        json_request(
            "PUT",
            "/api/v1/users/settings",
            Some(&token),
            &json!({ "default_epochs": 0, "default_batch_size": 8, "theme": "light" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_job_with_unknown_references_creates_nothing() {
    let pool = setup_test_db().await;
    let app = create_test_app();

    let token = register_and_login(&app, "alice").await;

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/jobs/start",
            Some(&token),
            &json!({ "model_id": Uuid::new_v4(), "dataset_id": Uuid::new_v4() }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Known model and dataset, unknown eval dataset: still rejected.
    let model_id = seed_ready_model(&pool).await;
    let (_, me) = send(&app, bare_request("GET", "/api/v1/auth/me", Some(&token))).await;
    let owner = Uuid::parse_str(me["id"].as_str().unwrap()).unwrap();
    let dataset_id = seed_dataset(&pool, owner).await;

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/jobs/start",
            Some(&token),
            &json!({
                "model_id": model_id,
                "dataset_id": dataset_id,
                "eval_dataset_id": Uuid::new_v4(),
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, bare_request("GET", "/api/v1/jobs", Some(&token))).await;
    assert_eq!(body["jobs"].as_array().unwrap().len(), 0);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_job_start_and_poll_detail() {
    let pool = setup_test_db().await;
    let app = create_test_app();

    let token = register_and_login(&app, "alice").await;
    let (_, me) = send(&app, bare_request("GET", "/api/v1/auth/me", Some(&token))).await;
    let owner = Uuid::parse_str(me["id"].as_str().unwrap()).unwrap();

    let model_id = seed_ready_model(&pool).await;
    let dataset_id = seed_dataset(&pool, owner).await;

    // No hyperparameters given: the user's stored defaults apply.
    let (status, job) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/jobs/start",
            Some(&token),
            &json!({ "model_id": model_id, "dataset_id": dataset_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(job["status"], "pending");
    assert_eq!(job["epochs"], 3);
    assert_eq!(job["batch_size"], 4);

    let job_id = job["id"].as_str().unwrap();
    let (status, detail) = send(
        &app,
        bare_request("GET", &format!("/api/v1/jobs/{job_id}"), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["model_name"], "tinyllama");
    assert!(detail["dataset_filename"].as_str().unwrap().starts_with("corpus-"));
    assert_eq!(detail["metrics"].as_array().unwrap().len(), 0);

    let (_, body) = send(&app, bare_request("GET", "/api/v1/jobs", Some(&token))).await;
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_job_requires_ready_model() {
    let pool = setup_test_db().await;
    let app = create_test_app();

    let token = register_and_login(&app, "alice").await;
    let (_, me) = send(&app, bare_request("GET", "/api/v1/auth/me", Some(&token))).await;
    let owner = Uuid::parse_str(me["id"].as_str().unwrap()).unwrap();
    let dataset_id = seed_dataset(&pool, owner).await;

    let model_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO models (id, name, source_id, status, created_at) \
         VALUES (?, 'tiny', 'tiny-pending', 'pending', ?)",
    )
    .bind(model_id)
    .bind(Utc::now())
    .execute(&pool)
    .await
    .unwrap();

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/jobs/start",
            Some(&token),
            &json!({ "model_id": model_id, "dataset_id": dataset_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_conversation_lifecycle_and_cascade() {
    let pool = setup_test_db().await;
    let app = create_test_app();

    let token = register_and_login(&app, "alice").await;

    let (status, conversation) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/conversations",
            Some(&token),
            &json!({ "title": "first chat" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(conversation["title"], "first chat");
    let conversation_id = conversation["id"].as_str().unwrap().to_owned();

    // A fresh conversation carries the assistant system prompt.
    let (status, body) = send(
        &app,
        bare_request(
            "GET",
            &format!("/api/v1/conversations/{conversation_id}/messages"),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["kind"], "System");

    let (status, _) = send(
        &app,
        bare_request(
            "DELETE",
            &format!("/api/v1/conversations/{conversation_id}"),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
        .bind(Uuid::parse_str(&conversation_id).unwrap())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 0);

    // Deleting again is a plain 404 with no side effects.
    let (status, _) = send(
        &app,
        bare_request(
            "DELETE",
            &format!("/api/v1/conversations/{conversation_id}"),
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_conversations_are_scoped_to_their_owner() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let alice_token = register_and_login(&app, "alice").await;
    let bob_token = register_and_login(&app, "bob").await;

    let (_, conversation) = send(
        &app,
        json_request("POST", "/api/v1/conversations", Some(&alice_token), &json!({})),
    )
    .await;
    let conversation_id = conversation["id"].as_str().unwrap();

    let (_, body) = send(
        &app,
        bare_request("GET", "/api/v1/conversations", Some(&bob_token)),
    )
    .await;
    assert_eq!(body["conversations"].as_array().unwrap().len(), 0);

    let (status, _) = send(
        &app,
        bare_request(
            "GET",
            &format!("/api/v1/conversations/{conversation_id}"),
            Some(&bob_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        bare_request(
            "DELETE",
            &format!("/api/v1/conversations/{conversation_id}"),
            Some(&bob_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_dataset_upload_conflict_and_delete() {
    let _pool = setup_test_db().await;

    let upload_dir = tempfile::tempdir().unwrap();
    // SAFETY: tests touching the environment are serialized
    unsafe { std::env::set_var("DATASETS_DIR", upload_dir.path()) };

    let app = create_test_app();
    let token = register_and_login(&app, "alice").await;

    let (status, dataset) = send(
        &app,
        multipart_upload("/api/v1/datasets/upload", &token, "corpus.txt", "hello world"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(dataset["filename"], "corpus.txt");
    assert!(upload_dir.path().join("corpus.txt").exists());

    let (status, _) = send(
        &app,
        multipart_upload("/api/v1/datasets/upload", &token, "corpus.txt", "other data"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(&app, bare_request("GET", "/api/v1/datasets", Some(&token))).await;
    assert_eq!(body["datasets"].as_array().unwrap().len(), 1);

    let dataset_id = dataset["id"].as_str().unwrap();
    let (status, _) = send(
        &app,
        bare_request("DELETE", &format!("/api/v1/datasets/{dataset_id}"), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!upload_dir.path().join("corpus.txt").exists());

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_dataset_delete_requires_owner_or_admin() {
    let _pool = setup_test_db().await;

    let upload_dir = tempfile::tempdir().unwrap();
    // SAFETY: tests touching the environment are serialized
    unsafe { std::env::set_var("DATASETS_DIR", upload_dir.path()) };

    let app = create_test_app();
    let admin_token = register_and_login(&app, "alice").await;
    let bob_token = register_and_login(&app, "bob").await;
    let carol_token = register_and_login(&app, "carol").await;

    let (_, dataset) = send(
        &app,
        multipart_upload("/api/v1/datasets/upload", &bob_token, "bobs.txt", "data"),
    )
    .await;
    let dataset_id = dataset["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        bare_request(
            "DELETE",
            &format!("/api/v1/datasets/{dataset_id}"),
            Some(&carol_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        bare_request(
            "DELETE",
            &format!("/api/v1/datasets/{dataset_id}"),
            Some(&admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_model_download_registers_pending_and_conflicts() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let token = register_and_login(&app, "alice").await;

    let (status, model) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/models/download",
            Some(&token),
            &json!({ "source_id": "tinyllama:latest" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(model["status"], "pending");
    assert_eq!(model["name"], "tinyllama:latest");

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/v1/models/download",
            Some(&token),
            &json!({ "source_id": "tinyllama:latest" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_model_delete_is_admin_only() {
    let pool = setup_test_db().await;
    let app = create_test_app();

    register(&app, "alice").await;
    let bob_token = register_and_login(&app, "bob").await;
    let model_id = seed_ready_model(&pool).await;

    let (status, _) = send(
        &app,
        bare_request("DELETE", &format!("/api/v1/models/{model_id}"), Some(&bob_token)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin_token = login(&app, "alice").await;
    let (status, _) = send(
        &app,
        bare_request(
            "DELETE",
            &format!("/api/v1/models/{model_id}"),
            Some(&admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_agent_error_listing() {
    let pool = setup_test_db().await;
    let app = create_test_app();

    let admin_token = register_and_login(&app, "alice").await;

    let error_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO captured_errors (id, traceback, file_path, line_number, status, created_at) \
         VALUES (?, 'database is locked', 'src/core/trainer.rs', 42, 'new', ?)",
    )
    .bind(error_id)
    .bind(Utc::now())
    .execute(&pool)
    .await
    .unwrap();

    let (status, body) = send(
        &app,
        bare_request("GET", "/api/v1/agent/errors", Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["errors"].as_array().unwrap().len(), 1);

    let (status, body) = send(
        &app,
        bare_request(
            "GET",
            &format!("/api/v1/agent/errors/{error_id}"),
            Some(&admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["traceback"], "database is locked");
    assert_eq!(body["status"], "new");

    let (status, _) = send(
        &app,
        bare_request(
            "GET",
            &format!("/api/v1/agent/errors/{}", Uuid::new_v4()),
            Some(&admin_token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_system_config_reports_version() {
    let _pool = setup_test_db().await;
    let app = create_test_app();

    let admin_token = register_and_login(&app, "alice").await;

    let (status, body) = send(
        &app,
        bare_request("GET", "/api/v1/system/config", Some(&admin_token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert!(body["runtime_host"].as_str().is_some());
    assert!(body["trainer_command"].as_str().is_some());

    cleanup_test_db();
}

#[tokio::test]
#[serial]
async fn test_chat_message_streams_and_stores_reply() {
    use tokio_llm_studio_api::GENERATION_SENDER;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let pool = setup_test_db().await;

    let ndjson = concat!(
        "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
        "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
        "{\"message\":{\"content\":\"\"},\"done\":true}\n",
    );
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ndjson, "application/x-ndjson"))
        .mount(&server)
        .await;

    // Install the generation worker once for the test binary; only this
    // test posts chat messages.
    let (sender, receiver) = tokio::sync::mpsc::channel(10);
    GENERATION_SENDER
        .set(sender)
        .expect("generation sender already set");
    tokio::spawn(generation::background_task(
        receiver,
        RuntimeClient::with_host(server.uri()),
    ));

    let app = create_test_app();
    let token = register_and_login(&app, "alice").await;
    seed_ready_model(&pool).await;

    let (_, conversation) = send(
        &app,
        json_request("POST", "/api/v1/conversations", Some(&token), &json!({})),
    )
    .await;
    let conversation_id = conversation["id"].as_str().unwrap().to_owned();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/conversations/{conversation_id}/messages"),
            Some(&token),
            &json!({ "text": "say hi" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8_lossy(&bytes);
    assert!(body.contains("event: new_message"));
    assert!(body.contains("event: message_part"));
    assert!(body.contains("Hel"));

    // The assembled reply is stored as a bot message once the stream ends.
    let stored: (String,) = sqlx::query_as(
        "SELECT text FROM messages WHERE conversation_id = ? AND kind = 2",
    )
    .bind(Uuid::parse_str(&conversation_id).unwrap())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(stored.0, "Hello");

    cleanup_test_db();
}
