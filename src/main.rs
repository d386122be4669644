//! Self-hosted LLM studio backend
//!
//! Serves the dashboard API and hosts the three background workers
//! (chat generation, training, code health agent).
//!
//! (c) Softlandia 2025

use tokio_llm_studio_api::api;
use tokio_llm_studio_api::core;
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
use tokio_llm_studio_api::{ERROR_SINK, GENERATION_SENDER, JOB_SENDER};

use axum::http::{HeaderValue, Method};
use axum::response::Html;
use axum::{Router, routing::get};
use di::{Injectable, Ref, ServiceCollection};
use di_axum::RouterServiceProviderExtensions;
use log::info;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    let config = AppConfig::from_env();
    let connection = Ref::new(DatabaseConnection::create());
    runtime.block_on(sqlx::migrate!().run(&**connection))?;

    // background worker for chat generation
    let (generation_sender, generation_receiver) = mpsc::channel(10);
    GENERATION_SENDER
        .set(generation_sender)
        .expect("generation sender should not be set");
    let generation_handle = runtime.spawn(core::generation::background_task(
        generation_receiver,
        RuntimeClient::create(),
    ));

    // background worker for training jobs, one at a time
    let (job_sender, job_receiver) = mpsc::channel(32);
    JOB_SENDER
        .set(job_sender)
        .expect("job sender should not be set");
    let trainer_handle = runtime.spawn(core::trainer::background_task(
        job_receiver,
        DbTrainingJobRepository::new(connection.clone()),
        DbModelRepository::new(connection.clone()),
        DbDatasetRepository::new(connection.clone()),
        config.clone(),
    ));

    // background worker for the code health agent
    let (error_sender, error_receiver) = mpsc::channel(64);
    ERROR_SINK
        .set(error_sender)
        .expect("error sink should not be set");
    let agent_handle = runtime.spawn(core::agent::background_task(
        error_receiver,
        DbErrorRepository::new(connection.clone()),
        DbModelRepository::new(connection.clone()),
        RuntimeClient::create(),
    ));

    let web_task_handle = runtime.spawn(web_server_task(config));

    runtime.block_on(async {
        web_task_handle
            .await
            .expect("failed to join web_task_handle");
        generation_handle
            .await
            .expect("failed to join generation worker");
        trainer_handle.await.expect("failed to join training worker");
        agent_handle.await.expect("failed to join agent worker");
    });

    Ok(())
}

async fn web_server_task(config: AppConfig) {
    let provider = ServiceCollection::new()
        .add(AppConfig::singleton())
        .add(DatabaseConnection::singleton())
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

    let app = Router::new()
        .route("/", get(index))
        .nest_service(
            "/static",
            ServiceBuilder::new().service(ServeDir::new("static")),
        )
        .nest("/api/v1", api::router())
        .layer(
            CorsLayer::new()
                .allow_headers(Any)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::PATCH,
                    Method::DELETE,
                ])
                .allow_origin([
                    "http://localhost:3000".parse::<HeaderValue>().unwrap(),
                    "http://localhost:5173".parse::<HeaderValue>().unwrap(),
                ]),
        )
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.unwrap();
    info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.unwrap();
    info!("Shutting down...");
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}
