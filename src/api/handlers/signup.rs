use crate::api::{
    handlers::{valid_email, UserId},
    password,
};
use axum::{extract::Extension, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{debug, error, info_span, instrument, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub public_key: String,
}

type SignupResponse = Result<(StatusCode, Json<UserId>), (StatusCode, String)>;

#[utoipa::path(
    post,
    path= "/signup",
    request_body = SignupRequest,
    responses (
        (status = 201, description = "Registration successful", body = UserId, content_type = "application/json"),
        (status = 400, description = "Missing payload or malformed email", body = String),
        (status = 409, description = "Email already exists", body = String),
        (status = 500, description = "Store failure", body = String),
    ),
    tag = "auth",
)]
#[instrument(skip(pool, payload))]
pub async fn signup(
    Extension(pool): Extension<PgPool>,
    payload: Option<Json<SignupRequest>>,
) -> SignupResponse {
    let Some(Json(request)) = payload else {
        return Err((StatusCode::BAD_REQUEST, "Missing payload".to_string()));
    };

    if !valid_email(&request.email) {
        return Err((StatusCode::BAD_REQUEST, "Invalid email".to_string()));
    }

    if fetch_user_id_by_email(&pool, &request.email)
        .await?
        .is_some()
    {
        debug!("signup refused, email already registered");
        return Err((StatusCode::CONFLICT, "Email already exists".to_string()));
    }

    let digest = password::hash(&request.password).map_err(|err| {
        error!("Failed to hash password: {err:#}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to hash password".to_string(),
        )
    })?;

    let user_id = insert_user(&pool, &request, &digest).await?;

    Ok((StatusCode::CREATED, Json(UserId { user_id })))
}

pub(crate) async fn fetch_user_id_by_email(
    pool: &PgPool,
    email: &str,
) -> Result<Option<Uuid>, (StatusCode, String)> {
    let query = "SELECT id FROM users WHERE email = $1";
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

    row.map(|row| row.try_get("id"))
        .transpose()
        .map_err(|err| {
            error!("Failed to read user id from database: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to look up user".to_string(),
            )
        })
}

async fn insert_user(
    pool: &PgPool,
    request: &SignupRequest,
    digest: &str,
) -> Result<Uuid, (StatusCode, String)> {
    let query =
        "INSERT INTO users (email, password_digest, public_key) VALUES ($1, $2, $3) RETURNING id";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(&request.email)
        .bind(digest)
        .bind(&request.public_key)
        .fetch_one(pool)
        .instrument(span)
        .await
        .map_err(|err| {
            // Two concurrent signups with the same email can both pass the
            // read check; the UNIQUE constraint is the backstop.
            if is_unique_violation(&err) {
                debug!("signup raced, unique constraint hit");
                return (StatusCode::CONFLICT, "Email already exists".to_string());
            }
            error!("Failed to insert user into database: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist user".to_string(),
            )
        })?;

    row.try_get("id").map_err(|err| {
        error!("Failed to read user id from database: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist user".to_string(),
        )
    })
}

// SQLSTATE 23505: unique_violation
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }

    false
}
