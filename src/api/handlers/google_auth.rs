use crate::api::{
    google::{IdentityVerifier, TokenInfo},
    handlers::{signup::is_unique_violation, UserId},
};
use axum::{extract::Extension, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tracing::{debug, error, info_span, instrument, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct GoogleAuthRequest {
    pub google_token: String,
    pub public_key: Option<String>,
}

type GoogleAuthResponse = Result<(StatusCode, Json<UserId>), (StatusCode, String)>;

struct ProviderRecord {
    id: Uuid,
    public_key: Option<String>,
}

/// What to do for a verified token given the current store state.
#[derive(Debug, PartialEq, Eq)]
enum Resolution<'a> {
    Create,
    Existing {
        user_id: Uuid,
        backfill: Option<&'a str>,
    },
}

#[utoipa::path(
    post,
    path= "/google-auth",
    request_body = GoogleAuthRequest,
    responses (
        (status = 200, description = "Authentication successful", body = UserId, content_type = "application/json"),
        (status = 400, description = "Missing payload", body = String),
        (status = 401, description = "Token rejected by the identity provider", body = String),
        (status = 500, description = "Store failure", body = String),
    ),
    tag = "auth",
)]
#[instrument(skip(pool, verifier, payload))]
pub async fn google_auth(
    Extension(pool): Extension<PgPool>,
    Extension(verifier): Extension<Arc<dyn IdentityVerifier>>,
    payload: Option<Json<GoogleAuthRequest>>,
) -> GoogleAuthResponse {
    let Some(Json(request)) = payload else {
        return Err((StatusCode::BAD_REQUEST, "Missing payload".to_string()));
    };

    let info = verifier
        .verify(&request.google_token)
        .await
        .map_err(|err| {
            error!("Token introspection failed: {err:#}");
            (StatusCode::UNAUTHORIZED, "Invalid Google token".to_string())
        })?;

    resolve_user(&pool, &info, request.public_key.as_deref()).await
}

/// Find the account behind a verified token, creating it on first login and
/// backfilling a missing public key. Replays resolve to the same identifier.
async fn resolve_user(
    pool: &PgPool,
    info: &TokenInfo,
    public_key: Option<&str>,
) -> GoogleAuthResponse {
    let found = fetch_by_subject_or_email(pool, info).await?;

    match plan_resolution(found.as_ref(), public_key) {
        Resolution::Existing { user_id, backfill } => {
            if let Some(key) = backfill {
                backfill_public_key(pool, user_id, key).await?;
            }

            Ok((StatusCode::OK, Json(UserId { user_id })))
        }
        Resolution::Create => {
            let user_id = match insert_provider_user(pool, info, public_key).await? {
                Some(user_id) => user_id,
                // Lost the insert race to a concurrent first login; the row
                // exists now, so resolve to it instead of failing.
                None => match fetch_by_subject_or_email(pool, info).await? {
                    Some(record) => record.id,
                    None => {
                        error!("User not found after losing insert race");
                        return Err((
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Failed to look up user".to_string(),
                        ));
                    }
                },
            };

            Ok((StatusCode::OK, Json(UserId { user_id })))
        }
    }
}

/// Decide between creating a row and reusing an existing one. A public key is
/// only ever backfilled when the stored one is absent; it is never
/// overwritten.
fn plan_resolution<'a>(
    found: Option<&ProviderRecord>,
    public_key: Option<&'a str>,
) -> Resolution<'a> {
    let Some(record) = found else {
        return Resolution::Create;
    };

    let backfill = match (&record.public_key, public_key) {
        (None, Some(key)) => Some(key),
        _ => None,
    };

    Resolution::Existing {
        user_id: record.id,
        backfill,
    }
}

/// Subject id first, then email, so the outcome is deterministic when both
/// match different rows.
async fn fetch_by_subject_or_email(
    pool: &PgPool,
    info: &TokenInfo,
) -> Result<Option<ProviderRecord>, (StatusCode, String)> {
    let by_subject = fetch_record(
        pool,
        "SELECT id, public_key FROM users WHERE google_id = $1",
        &info.sub,
    )
    .await?;

    if by_subject.is_some() {
        return Ok(by_subject);
    }

    let Some(email) = info.email.as_deref() else {
        return Ok(None);
    };

    fetch_record(
        pool,
        "SELECT id, public_key FROM users WHERE email = $1",
        email,
    )
    .await
}

async fn fetch_record(
    pool: &PgPool,
    query: &'static str,
    value: &str,
) -> Result<Option<ProviderRecord>, (StatusCode, String)> {
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(value)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .map_err(|err| {
            error!("Failed to look up user: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to look up user".to_string(),
            )
        })?;

    let Some(row) = row else {
        return Ok(None);
    };

    let id: Uuid = row.try_get("id").map_err(read_error)?;
    let public_key: Option<String> = row.try_get("public_key").map_err(read_error)?;

    Ok(Some(ProviderRecord { id, public_key }))
}

fn read_error(err: sqlx::Error) -> (StatusCode, String) {
    error!("Failed to read user row from database: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Failed to look up user".to_string(),
    )
}

/// Insert a first-login row. Returns `None` when a concurrent request won the
/// insert, mirroring the unique-violation handling on the signup path.
async fn insert_provider_user(
    pool: &PgPool,
    info: &TokenInfo,
    public_key: Option<&str>,
) -> Result<Option<Uuid>, (StatusCode, String)> {
    let query =
        "INSERT INTO users (email, google_id, public_key) VALUES ($1, $2, $3) RETURNING id";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = match sqlx::query(query)
        .bind(info.email.as_deref())
        .bind(&info.sub)
        .bind(public_key)
        .fetch_one(pool)
        .instrument(span)
        .await
    {
        Ok(row) => row,
        Err(err) if is_unique_violation(&err) => {
            debug!("first login raced, unique constraint hit");
            return Ok(None);
        }
        Err(err) => {
            error!("Failed to insert user into database: {}", err);
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to persist user".to_string(),
            ));
        }
    };

    row.try_get("id").map(Some).map_err(|err| {
        error!("Failed to read user id from database: {}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to persist user".to_string(),
        )
    })
}

async fn backfill_public_key(
    pool: &PgPool,
    user_id: Uuid,
    public_key: &str,
) -> Result<(), (StatusCode, String)> {
    // The IS NULL guard repeats the in-process check at the store.
    let query = "UPDATE users SET public_key = $1 WHERE id = $2 AND public_key IS NULL";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(public_key)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .map_err(|err| {
            error!("Failed to backfill public key: {}", err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update user".to_string(),
            )
        })?;

    debug!("public key backfilled for {}", user_id);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::unreachable_pool;
    use anyhow::anyhow;
    use std::{future::Future, pin::Pin};

    struct TestVerifier {
        sub: &'static str,
        email: Option<&'static str>,
        fail: bool,
    }

    impl IdentityVerifier for TestVerifier {
        fn verify<'a>(
            &'a self,
            _token: &'a str,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<TokenInfo>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail {
                    return Err(anyhow!("token rejected"));
                }
                Ok(TokenInfo {
                    sub: self.sub.to_string(),
                    email: self.email.map(str::to_string),
                })
            })
        }
    }

    fn verifier(fail: bool) -> Arc<dyn IdentityVerifier> {
        Arc::new(TestVerifier {
            sub: "110169484474386276334",
            email: Some("user@example.com"),
            fail,
        })
    }

    fn request() -> GoogleAuthRequest {
        GoogleAuthRequest {
            google_token: "opaque-token".to_string(),
            public_key: Some("pk-test".to_string()),
        }
    }

    fn record(public_key: Option<&str>) -> ProviderRecord {
        ProviderRecord {
            id: Uuid::new_v4(),
            public_key: public_key.map(str::to_string),
        }
    }

    #[test]
    fn unknown_subject_plans_a_create() {
        assert_eq!(plan_resolution(None, Some("pk-new")), Resolution::Create);
        assert_eq!(plan_resolution(None, None), Resolution::Create);
    }

    #[test]
    fn missing_public_key_is_backfilled() {
        let record = record(None);

        let resolution = plan_resolution(Some(&record), Some("pk-new"));
        assert_eq!(
            resolution,
            Resolution::Existing {
                user_id: record.id,
                backfill: Some("pk-new"),
            }
        );
    }

    #[test]
    fn existing_public_key_is_never_overwritten() {
        let record = record(Some("pk-old"));

        let resolution = plan_resolution(Some(&record), Some("pk-new"));
        assert_eq!(
            resolution,
            Resolution::Existing {
                user_id: record.id,
                backfill: None,
            }
        );
    }

    #[test]
    fn absent_supplied_key_leaves_the_row_alone() {
        let record = record(None);

        let resolution = plan_resolution(Some(&record), None);
        assert_eq!(
            resolution,
            Resolution::Existing {
                user_id: record.id,
                backfill: None,
            }
        );
    }

    #[test]
    fn replay_resolves_to_the_same_identifier() {
        // Once the row exists, every replay plans the same existing id and
        // never another create.
        let record = record(Some("pk-test"));

        let first = plan_resolution(Some(&record), Some("pk-test"));
        let second = plan_resolution(Some(&record), Some("pk-test"));

        assert_eq!(first, second);
        assert!(matches!(
            first,
            Resolution::Existing { user_id, backfill: None } if user_id == record.id
        ));
    }

    #[tokio::test]
    async fn google_auth_without_payload_is_bad_request() {
        let result = google_auth(Extension(unreachable_pool()), Extension(verifier(false)), None)
            .await;
        assert!(matches!(result, Err((StatusCode::BAD_REQUEST, msg)) if msg == "Missing payload"));
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let result = google_auth(
            Extension(unreachable_pool()),
            Extension(verifier(true)),
            Some(Json(request())),
        )
        .await;
        assert!(
            matches!(result, Err((StatusCode::UNAUTHORIZED, msg)) if msg == "Invalid Google token")
        );
    }

    #[tokio::test]
    async fn verified_token_still_fails_without_db() {
        let result = google_auth(
            Extension(unreachable_pool()),
            Extension(verifier(false)),
            Some(Json(request())),
        )
        .await;
        assert!(matches!(
            result,
            Err((StatusCode::INTERNAL_SERVER_ERROR, _))
        ));
    }

    #[tokio::test]
    async fn email_less_token_reaches_the_store() {
        // Tokens without an email are looked up by subject id only.
        let verifier: Arc<dyn IdentityVerifier> = Arc::new(TestVerifier {
            sub: "110169484474386276334",
            email: None,
            fail: false,
        });

        let result = google_auth(
            Extension(unreachable_pool()),
            Extension(verifier),
            Some(Json(request())),
        )
        .await;
        assert!(matches!(
            result,
            Err((StatusCode::INTERNAL_SERVER_ERROR, _))
        ));
    }

    #[tokio::test]
    async fn fetch_record_returns_error_on_db_failure() {
        let pool = unreachable_pool();
        let result = fetch_record(
            &pool,
            "SELECT id, public_key FROM users WHERE google_id = $1",
            "110169484474386276334",
        )
        .await;
        assert!(matches!(
            result,
            Err((StatusCode::INTERNAL_SERVER_ERROR, _))
        ));
    }

    #[tokio::test]
    async fn backfill_public_key_fails_without_db() {
        let pool = unreachable_pool();
        let result = backfill_public_key(&pool, Uuid::new_v4(), "pk-test").await;
        assert!(matches!(
            result,
            Err((StatusCode::INTERNAL_SERVER_ERROR, _))
        ));
    }
}
