//! User management and settings endpoints
//!
//! Everything except `/settings` is admin only.

use crate::api::{ApiError, ExtractToken};
use crate::core::traits::{AuthService, UserService};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/settings", get(get_settings).put(update_settings))
        .route(
            "/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
}

async fn list_users(
    Inject(user_service): Inject<dyn UserService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::UserList>, ApiError> {
    auth_service.require_admin(&token).await?;

    let users = user_service.list_users().await?;
    Ok(Json(schemas::UserList {
        users: users.into_iter().map(schemas::User::from).collect(),
    }))
}

async fn get_user(
    Inject(user_service): Inject<dyn UserService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(user_id): Path<Uuid>,
) -> Result<Json<schemas::User>, ApiError> {
    auth_service.require_admin(&token).await?;

    let user = user_service.get_user(user_id).await?;
    Ok(Json(user.into()))
}

async fn update_user(
    Inject(user_service): Inject<dyn UserService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(user_id): Path<Uuid>,
    Json(request): Json<schemas::UpdateUser>,
) -> Result<Json<schemas::User>, ApiError> {
    auth_service.require_admin(&token).await?;

    let user = user_service.set_role(user_id, request.role).await?;
    Ok(Json(user.into()))
}

async fn delete_user(
    Inject(user_service): Inject<dyn UserService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth_service.require_admin(&token).await?;

    user_service.delete_user(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_settings(
    Inject(user_service): Inject<dyn UserService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::Settings>, ApiError> {
    let authed = auth_service.authenticate(&token).await?;

    let user = user_service.get_settings(authed.id).await?;
    Ok(Json(user.into()))
}

async fn update_settings(
    Inject(user_service): Inject<dyn UserService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Json(request): Json<schemas::UpdateSettings>,
) -> Result<Json<schemas::Settings>, ApiError> {
    let authed = auth_service.authenticate(&token).await?;

    let user = user_service
        .update_settings(
            authed.id,
            request.default_epochs,
            request.default_batch_size,
            request.theme,
        )
        .await?;
    Ok(Json(user.into()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Serialize, Debug)]
    pub struct User {
        pub id: Uuid,
        pub username: String,
        pub email: String,
        pub role: entities::Role,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::User> for User {
        fn from(user: entities::User) -> Self {
            User {
                id: user.id,
                username: user.username,
                email: user.email,
                role: user.role,
                created_at: user.created_at,
            }
        }
    }

    #[derive(Serialize, Debug, Default)]
    pub struct UserList {
        pub users: Vec<User>,
    }

    #[derive(Deserialize, Debug)]
    pub struct UpdateUser {
        pub role: entities::Role,
    }

    #[derive(Serialize, Debug)]
    pub struct Settings {
        pub default_epochs: i64,
        pub default_batch_size: i64,
        pub theme: String,
    }

    impl From<entities::User> for Settings {
        fn from(user: entities::User) -> Self {
            Settings {
                default_epochs: user.default_epochs,
                default_batch_size: user.default_batch_size,
                theme: user.theme,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct UpdateSettings {
        pub default_epochs: i64,
        pub default_batch_size: i64,
        pub theme: String,
    }
}
