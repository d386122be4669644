//! Auth endpoints

use crate::api::{ApiError, ExtractToken};
use crate::core::services::SESSION_TTL_DAYS;
use crate::core::traits::{AuthService, UserService};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}

async fn register(
    Inject(auth_service): Inject<dyn AuthService>,
    Json(request): Json<schemas::RegisterRequest>,
) -> Result<(StatusCode, Json<schemas::UserInfo>), ApiError> {
    let user = auth_service
        .register(request.username, request.email, request.password)
        .await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

async fn login(
    Inject(auth_service): Inject<dyn AuthService>,
    Json(request): Json<schemas::LoginRequest>,
) -> Result<Json<schemas::LoginResponse>, ApiError> {
    let (token, user) = auth_service.login(request.username, request.password).await?;

    Ok(Json(schemas::LoginResponse {
        token,
        token_type: "Bearer".to_owned(),
        expires_in: (SESSION_TTL_DAYS * 24 * 3600) as u64,
        user: user.into(),
    }))
}

async fn me(
    Inject(auth_service): Inject<dyn AuthService>,
    Inject(user_service): Inject<dyn UserService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::UserInfo>, ApiError> {
    let authed = auth_service.authenticate(&token).await?;
    let user = user_service.get_user(authed.id).await?;
    Ok(Json(user.into()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct RegisterRequest {
        pub username: String,
        pub email: String,
        pub password: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct LoginRequest {
        pub username: String,
        pub password: String,
    }

    #[derive(Serialize, Debug)]
    pub struct LoginResponse {
        pub token: String,
        pub token_type: String,
        pub expires_in: u64,
        pub user: UserInfo,
    }

    #[derive(Serialize, Debug)]
    pub struct UserInfo {
        pub id: Uuid,
        pub username: String,
        pub email: String,
        pub role: entities::Role,
    }

    impl From<entities::User> for UserInfo {
        fn from(user: entities::User) -> Self {
            UserInfo {
                id: user.id,
                username: user.username,
                email: user.email,
                role: user.role,
            }
        }
    }
}
