use crate::api::{handlers::UserId, password};
use axum::{extract::Extension, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, error, info_span, instrument, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

type LoginResponse = Result<(StatusCode, Json<UserId>), (StatusCode, String)>;

struct LoginRecord {
    id: Uuid,
    password_digest: Option<String>,
}

#[utoipa::path(
    post,
    path= "/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Login successful", body = UserId, content_type = "application/json"),
        (status = 400, description = "Missing payload", body = String),
        (status = 401, description = "Invalid credentials or incorrect password", body = String),
        (status = 500, description = "Store failure", body = String),
    ),
    tag = "auth",
)]
#[instrument(skip(pool, payload))]
pub async fn login(
    Extension(pool): Extension<PgPool>,
    payload: Option<Json<LoginRequest>>,
) -> LoginResponse {
    let Some(Json(request)) = payload else {
        return Err((StatusCode::BAD_REQUEST, "Missing payload".to_string()));
    };

    let Some(record) = fetch_login_record(&pool, &request.email).await? else {
        debug!("login refused, unknown email");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    };

    // Identity-provider-only accounts have no digest and cannot password-login.
    let Some(digest) = record.password_digest else {
        debug!("login refused, account has no password digest");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()));
    };

    if !password::verify(&request.password, &digest) {
        debug!("login refused, digest mismatch");
        return Err((StatusCode::UNAUTHORIZED, "Incorrect password".to_string()));
    }

    Ok((StatusCode::OK, Json(UserId { user_id: record.id })))
}

async fn fetch_login_record(
    pool: &PgPool,
    email: &str,
) -> Result<Option<LoginRecord>, (StatusCode, String)> {
    let query = "SELECT id, password_digest FROM users WHERE email = $1";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .map_err(|err| {
            error!("Failed to look up user by email: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to look up user".to_string(),
            )
        })?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: Uuid = row.try_get("id").map_err(|err| {
        error!("Failed to read user id from database: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to look up user".to_string(),
        )
    })?;

    let password_digest: Option<String> = row.try_get("password_digest").map_err(|err| {
        error!("Failed to read password digest from database: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to look up user".to_string(),
        )
    })?;

    Ok(Some(LoginRecord {
        id,
        password_digest,
    }))
}
