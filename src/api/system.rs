//! System configuration endpoint

use crate::api::{ApiError, ExtractToken};
use crate::core::traits::AuthService;
use crate::infrastructure::config::AppConfig;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new().route("/config", get(get_config))
}

/// The non-secret runtime configuration, for the admin dashboard.
async fn get_config(
    Inject(config): Inject<AppConfig>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::SystemConfig>, ApiError> {
    auth_service.require_admin(&token).await?;

    Ok(Json(schemas::SystemConfig {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        bind_addr: config.bind_addr.clone(),
        runtime_host: config.runtime_host.clone(),
        models_dir: config.models_dir.clone(),
        datasets_dir: config.datasets_dir.clone(),
        trainer_command: config.trainer_command.clone(),
    }))
}

pub mod schemas {
    use serde::Serialize;

    #[derive(Serialize, Debug)]
    pub struct SystemConfig {
        pub version: String,
        pub bind_addr: String,
        pub runtime_host: String,
        pub models_dir: String,
        pub datasets_dir: String,
        pub trainer_command: String,
    }
}
